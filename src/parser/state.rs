//! Per-parse grammar state
//!
//! Everything the grammar remembers between tokens besides the token itself:
//! loop nesting and labels, the innermost open construct (for "unmatched"
//! diagnostics), and the builtin context of the command being parsed.

use crate::parser::lexer::TokenType;

/// A `name:` label in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub line: usize,
    /// Loop depth at which the label was declared.
    pub depth: usize,
}

/// Construct whose terminator has not been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConstruct {
    pub kind: TokenType,
    pub line: usize,
}

/// Loop and label scope saved around a function body.
#[derive(Debug)]
pub struct LoopScope {
    loop_depth: usize,
    label_floor: usize,
    label_mark: usize,
    uses_getopts: bool,
}

#[derive(Debug, Default)]
pub struct ParserState {
    pub loop_depth: usize,
    pub labels: Vec<Label>,
    /// Labels below this index belong to an enclosing scope and are not visible.
    pub label_floor: usize,
    /// Inside the arguments of a declaration builtin.
    pub in_typeset: bool,
    /// Current function body calls `getopts`.
    pub uses_getopts: bool,
    pub construct: Option<OpenConstruct>,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `kind` as the innermost open construct; returns the previous one.
    pub fn open(&mut self, kind: TokenType, line: usize) -> Option<OpenConstruct> {
        self.construct.replace(OpenConstruct { kind, line })
    }

    pub fn close(&mut self, previous: Option<OpenConstruct>) {
        self.construct = previous;
    }

    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub fn leave_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
        if self.loop_depth == 0 {
            self.label_floor = self.labels.len();
        }
    }

    /// Active label named `name`.
    pub fn find_label(&self, name: &str) -> Option<&Label> {
        let floor = self.label_floor.min(self.labels.len());
        self.labels[floor..].iter().rev().find(|l| l.name == name)
    }

    /// Declare a label at the current depth. Returns false if it is already active.
    pub fn push_label(&mut self, name: &str, line: usize) -> bool {
        if self.find_label(name).is_some() {
            return false;
        }
        self.labels.push(Label {
            name: name.to_string(),
            line,
            depth: self.loop_depth,
        });
        true
    }

    /// Start a function body: loops and labels of the caller are not visible.
    pub fn enter_function(&mut self) -> LoopScope {
        let scope = LoopScope {
            loop_depth: self.loop_depth,
            label_floor: self.label_floor,
            label_mark: self.labels.len(),
            uses_getopts: self.uses_getopts,
        };
        self.loop_depth = 0;
        self.label_floor = self.labels.len();
        self.uses_getopts = false;
        scope
    }

    /// Restore the caller's scope; returns whether the body used getopts.
    pub fn leave_function(&mut self, scope: LoopScope) -> bool {
        let used = self.uses_getopts;
        self.labels.truncate(scope.label_mark);
        self.loop_depth = scope.loop_depth;
        self.label_floor = scope.label_floor;
        self.uses_getopts = scope.uses_getopts;
        used
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
