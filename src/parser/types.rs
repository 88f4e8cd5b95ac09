//! Parser Types and Constants
//!
//! Error types and default limits shared across parser modules.

use std::fmt;
use thiserror::Error;

// Default parser limits; each can be overridden through `ParseOptions`.
pub const MAX_INPUT_SIZE: usize = 1_000_000; // 1MB max input
pub const MAX_NODES: usize = 500_000; // Max arena allocations per parse
pub const MAX_PARSER_DEPTH: usize = 200; // Max recursion depth for nested constructs

/// Syntax error: malformed token sequence. Aborts the current parse.
#[derive(Debug, Clone, Error)]
pub struct ParseException {
    pub message: String,
    pub line: usize,
    pub token: Option<String>,
}

impl fmt::Display for ParseException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at line {}: {}", self.line, self.message)
    }
}

impl ParseException {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
            token: None,
        }
    }

    pub fn with_token(message: impl Into<String>, line: usize, token: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line,
            token: Some(token.into()),
        }
    }
}

/// Fatal conditions with no safe recovery point.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("parse arena exhausted after {limit} nodes")]
    ArenaExhausted { limit: usize },
    #[error("line {line}: nesting exceeds {limit} levels")]
    RecursionLimit { limit: usize, line: usize },
    #[error("input of {size} bytes exceeds the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },
    #[error("not a precompiled script")]
    BadHeader,
    #[error("incompatible version {found} of precompiled script (supported: {supported})")]
    VersionMismatch { found: u8, supported: u8 },
    #[error("corrupt precompiled script: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Anything a parse entry point can fail with.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Syntax(#[from] ParseException),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl ParseError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, ParseError::Syntax(_))
    }

    /// Source line of a syntax error.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Syntax(e) => Some(e.line),
            ParseError::Resource(ResourceError::RecursionLimit { line, .. }) => Some(*line),
            ParseError::Resource(_) => None,
        }
    }
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::Resource(ResourceError::Io(e))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
