//! Abstract Syntax Tree (AST) Types for ksh scripts
//!
//! The tree is a closed set of node kinds that an executor pattern-matches.
//!
//! Architecture:
//!   Input stack → Lexer → Parser → AST → (executor | precompiled image)

pub mod types;
