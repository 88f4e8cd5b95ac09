//! Parse options
//!
//! Shell options that change how scripts are parsed, plus resource limits.
//! Options can be built in code or loaded from a TOML file:
//!
//! ```toml
//! lint = "warn"
//! posix = false
//! max_depth = 200
//!
//! [aliases]
//! ll = "ls -l "
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::parser::types::{MAX_INPUT_SIZE, MAX_NODES, MAX_PARSER_DEPTH};

/// What to do with lint warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintPolicy {
    /// Suspicious constructs are accepted silently.
    #[default]
    Off,
    /// Warnings are collected and logged.
    Warn,
    /// Every warning becomes a syntax error.
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub lint: LintPolicy,
    /// Disable ksh extensions that change the meaning of POSIX scripts.
    pub posix: bool,
    /// `set -k`: assignments are recognized anywhere on the command line.
    pub keyword: bool,
    /// Restricted shell: command names containing `/` are never builtins.
    pub restricted: bool,
    /// Keep declarations created by `typeset -T`/`enum` after the parse ends.
    pub retain_declarations: bool,
    pub max_depth: usize,
    pub max_nodes: usize,
    pub max_input_size: usize,
    pub aliases: IndexMap<String, String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            lint: LintPolicy::Off,
            posix: false,
            keyword: false,
            restricted: false,
            retain_declarations: false,
            max_depth: MAX_PARSER_DEPTH,
            max_nodes: MAX_NODES,
            max_input_size: MAX_INPUT_SIZE,
            aliases: IndexMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ParseOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Lint checks run at all.
    pub fn lint_enabled(&self) -> bool {
        self.lint != LintPolicy::Off
    }

    pub fn with_lint(mut self, lint: LintPolicy) -> Self {
        self.lint = lint;
        self
    }

    pub fn with_alias(mut self, name: &str, value: &str) -> Self {
        self.aliases.insert(name.to_string(), value.to_string());
        self
    }
}
