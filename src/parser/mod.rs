//! Parser module for ksh scripts
//!
//! This module contains the input stack, the lexer and the recursive descent
//! grammar, split by construct.

pub mod types;
pub mod diagnostics;
pub mod input;
pub mod lexer;
pub mod arena;
pub mod declarations;
pub mod arithmetic;
pub mod state;
pub mod parser;
pub mod redirection;
pub mod conditional_parser;
pub mod assignment;
pub mod compound_parser;
pub mod command_parser;

// Re-exports
pub use arena::{ArenaStats, FunctionBody};
pub use declarations::Declarations;
pub use diagnostics::{Diagnostic, MessageKey, Severity};
pub use input::{InputStack, LineSource};
pub use lexer::{Lexer, Token, TokenType};
pub use parser::{parse, Parser};
pub use types::{ParseError, ParseException, ParseResult, ResourceError};
