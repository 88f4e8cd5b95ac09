//! Parser diagnostics
//!
//! Message catalog plus the sink that collects lint warnings. Warnings never
//! stop a parse unless the lint policy escalates them; errors are returned as
//! [`ParseException`](super::types::ParseException) instead of being collected.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

/// Catalog of parser messages. `{}` placeholders are filled in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKey {
    TypesetOrder,
    ObsoleteSet,
    EmptyForList,
    LabelIgnored,
    UnknownLabel,
    ArithDollar,
    InvariantTest,
    TestNeedsArgument,
    BadRegex,
    LabelDefined,
    Unexpected,
    Unmatched,
    BadFunctionName,
    HereDocUnterminated,
    ArithSyntax,
}

impl MessageKey {
    pub fn template(self) -> &'static str {
        match self {
            MessageKey::TypesetOrder => "{} invalid typeset option order",
            MessageKey::ObsoleteSet => "`set {}' obsolete",
            MessageKey::EmptyForList => "empty for list",
            MessageKey::LabelIgnored => "label {} ignored",
            MessageKey::UnknownLabel => "{} unknown label",
            MessageKey::ArithDollar => {
                "variable expansion makes arithmetic evaluation less efficient: ${} in (({}))"
            }
            MessageKey::InvariantTest => "Invariant test",
            MessageKey::TestNeedsArgument => "-t requires argument",
            MessageKey::BadRegex => "`{}' is not a valid regular expression",
            MessageKey::LabelDefined => "label {} already defined",
            MessageKey::Unexpected => "`{}' unexpected",
            MessageKey::Unmatched => "`{}' unmatched",
            MessageKey::BadFunctionName => "{}: invalid function name",
            MessageKey::HereDocUnterminated => "here-document `{}' unmatched",
            MessageKey::ArithSyntax => "{}: arithmetic syntax error",
        }
    }

    /// Substitute `args` into the template.
    pub fn format(self, args: &[&str]) -> String {
        let mut out = String::new();
        let mut rest = self.template();
        let mut args = args.iter();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            out.push_str(args.next().copied().unwrap_or(""));
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub key: MessageKey,
    pub severity: Severity,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: line {}: {}", self.line, self.message),
            Severity::Error => write!(f, "line {}: {}", self.line, self.message),
        }
    }
}

/// Collected warnings of one parser.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, key: MessageKey, line: usize, args: &[&str]) -> &Diagnostic {
        let diagnostic = Diagnostic {
            key,
            severity: Severity::Warning,
            line,
            message: key.format(args),
        };
        log::warn!("{}", diagnostic);
        self.entries.push(diagnostic);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn has(&self, key: MessageKey) -> bool {
        self.entries.iter().any(|d| d.key == key)
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fills_placeholders_in_order() {
        assert_eq!(MessageKey::LabelIgnored.format(&["outer"]), "label outer ignored");
        assert_eq!(
            MessageKey::ArithDollar.format(&["x", "$x+1"]),
            "variable expansion makes arithmetic evaluation less efficient: $x in (($x+1))"
        );
        assert_eq!(MessageKey::Unexpected.format(&[]), "`' unexpected");
    }

    #[test]
    fn test_report_collects() {
        let mut diags = Diagnostics::new();
        diags.report(MessageKey::EmptyForList, 7, &[]);
        assert!(diags.has(MessageKey::EmptyForList));
        assert_eq!(diags.entries()[0].to_string(), "warning: line 7: empty for list");
        assert_eq!(diags.take().len(), 1);
        assert!(diags.entries().is_empty());
    }
}
