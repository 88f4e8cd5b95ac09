//! ksh-grammar - lexer and parser for the ksh93 command language
//!
//! This library turns ksh scripts into an AST for an executor or for
//! analysis, and reads and writes the precompiled form of that AST.

pub mod ast;
pub mod compiled;
pub mod config;
pub mod parser;
pub mod xref;

pub use ast::types::*;
pub use config::{LintPolicy, ParseOptions};
pub use parser::{parse, ParseError, ParseException, Parser, ResourceError};
