//! Abstract Syntax Tree (AST) Types for ksh scripts
//!
//! This module defines the tree handed to the executor. Every node carries the
//! source line it started on. Nodes are built bottom-up by the grammar and are
//! read-only once a parse returns.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::parser::arena::FunctionBody;

// =============================================================================
// ARGUMENTS
// =============================================================================

bitflags! {
    /// Lexical properties of a word, computed while it is scanned.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ArgFlags: u16 {
        /// No expansion of any kind is needed.
        const RAW = 1 << 0;
        /// Contains quoting or backslash escapes.
        const QUOTED = 1 << 1;
        /// Has the shape of an assignment word.
        const ASSIGNMENT = 1 << 2;
        /// Contains parameter, command or arithmetic substitution.
        const MACRO = 1 << 3;
        /// Value of an indexed array assignment.
        const ARRAY = 1 << 4;
        /// Needs pattern, brace or tilde expansion.
        const EXP = 1 << 5;
        /// `name+=value`
        const APPEND = 1 << 6;
    }
}

/// A word together with its lexical flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub text: String,
    pub flags: ArgFlags,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<ArgPayload>>,
}

/// Structured content hanging off an argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgPayload {
    /// `name=( ... )`
    Compound(CompoundAssignment),
    /// `<( ... )` or `>( ... )` used as a plain argument
    ProcessSubstitution(Box<Node>),
}

impl Argument {
    pub fn new(text: impl Into<String>, flags: ArgFlags, line: usize) -> Self {
        Self {
            text: text.into(),
            flags,
            line,
            payload: None,
        }
    }

    /// A literal word that needs no expansion.
    pub fn raw(text: impl Into<String>, line: usize) -> Self {
        Self::new(text, ArgFlags::RAW, line)
    }

    pub fn is_raw(&self) -> bool {
        self.flags.contains(ArgFlags::RAW)
    }

    pub fn is_assignment(&self) -> bool {
        self.flags.contains(ArgFlags::ASSIGNMENT)
    }

    /// Variable name of an assignment word (`a`, `a.b`, `a[1]`), without the operator.
    pub fn assignment_name(&self) -> Option<&str> {
        if !self.is_assignment() {
            return None;
        }
        let end = assignment_split(&self.text)?;
        let name = &self.text[..end];
        Some(name.strip_suffix('+').unwrap_or(name))
    }

    /// Compound value attached by `name=( ... )`.
    pub fn compound(&self) -> Option<&CompoundAssignment> {
        match self.payload.as_deref() {
            Some(ArgPayload::Compound(c)) => Some(c),
            _ => None,
        }
    }
}

/// Byte offset of the `=` that ends the name part of an assignment word.
pub fn assignment_split(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => return if i == 0 { None } else { Some(i) },
            b'\\' | b'\'' | b'"' | b'$' | b'`' if depth == 0 => return None,
            _ => {}
        }
    }
    None
}

// =============================================================================
// NODES
// =============================================================================

/// Union of every node kind the grammar produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Command(SimpleCommand),
    /// Command run in a forked process: background, pipeline element, coprocess.
    Fork(ForkNode),
    /// Redirections (and pipe ends) applied around a command in the current shell.
    SetIo(ForkNode),
    Subshell(ParenNode),
    Brace(BraceNode),
    List(ListNode),
    Pipe(PipeNode),
    Time(TimeNode),
    If(IfNode),
    While(WhileNode),
    For(ForNode),
    Case(CaseNode),
    Function(FunctionNode),
    Namespace(NamespaceNode),
    Arith(ArithNode),
    Test(TestNode),
}

impl Node {
    /// Source line the node started on.
    pub fn line(&self) -> usize {
        match self {
            Node::Command(n) => n.line,
            Node::Fork(n) | Node::SetIo(n) => n.line,
            Node::Subshell(n) => n.line,
            Node::Brace(n) => n.line,
            Node::List(n) => n.line,
            Node::Pipe(n) => n.line,
            Node::Time(n) => n.line,
            Node::If(n) => n.line,
            Node::While(n) => n.line,
            Node::For(n) => n.line,
            Node::Case(n) => n.line,
            Node::Function(n) => n.line,
            Node::Namespace(n) => n.line,
            Node::Arith(n) => n.line,
            Node::Test(n) => n.line,
        }
    }

    /// Short name of the node kind, used in dumps and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Command(_) => "command",
            Node::Fork(_) => "fork",
            Node::SetIo(_) => "setio",
            Node::Subshell(_) => "subshell",
            Node::Brace(_) => "brace",
            Node::List(n) => n.kind.as_str(),
            Node::Pipe(_) => "pipe",
            Node::Time(_) => "time",
            Node::If(_) => "if",
            Node::While(n) => {
                if n.until {
                    "until"
                } else {
                    "while"
                }
            }
            Node::For(n) => {
                if n.select {
                    "select"
                } else {
                    "for"
                }
            }
            Node::Case(_) => "case",
            Node::Function(_) => "function",
            Node::Namespace(_) => "namespace",
            Node::Arith(_) => "arith",
            Node::Test(_) => "test",
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Node::While(_) | Node::For(_))
    }
}

/// Which builtin a command name resolved to at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinKind {
    /// typeset and friends: arguments are parsed as assignments
    Declaration,
    /// `enum`: declares a new declaration command
    Enum,
    /// `command`: the next word is the command name
    Command,
    Exec,
    Redirect,
    Break,
    Continue,
    Set,
    Test,
    Bracket,
    Getopts,
    Dot,
    Regular,
}

impl BuiltinKind {
    pub fn is_declaration(self) -> bool {
        matches!(self, BuiltinKind::Declaration | BuiltinKind::Enum)
    }
}

/// Simple command: assignments, words and redirections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimpleCommand {
    pub args: Vec<Argument>,
    pub assignments: Vec<Argument>,
    pub io: Vec<IoNode>,
    pub builtin: Option<BuiltinKind>,
    /// False when every word is RAW and can be used without expansion.
    pub needs_expansion: bool,
    /// Command was prefixed with `;` (show-me mode).
    pub showme: bool,
    pub line: usize,
}

impl SimpleCommand {
    /// Text of the command name, if any word is present.
    pub fn name(&self) -> Option<&str> {
        self.args.first().map(|a| a.text.as_str())
    }
}

bitflags! {
    /// Process and pipe disposition of a fork or set-io wrapper.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ForkFlags: u16 {
        /// Run asynchronously (`&`).
        const BACKGROUND = 1 << 0;
        /// Standard output feeds a pipe.
        const PIPE_OUT = 1 << 1;
        /// Standard input comes from a pipe.
        const PIPE_IN = 1 << 2;
        /// Close the pipe's read end after the fork.
        const PIPE_CLOSE = 1 << 3;
        /// Coprocess (`|&`).
        const COPROCESS = 1 << 4;
        /// Ignore interrupts in the child.
        const NO_INTERRUPT = 1 << 5;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkNode {
    pub flags: ForkFlags,
    pub body: Box<Node>,
    pub io: Vec<IoNode>,
    pub line: usize,
}

/// Subshell: ( list )
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParenNode {
    pub body: Box<Node>,
    pub line: usize,
}

/// Brace group: { list; }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BraceNode {
    pub body: Box<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListKind {
    /// `a ; b`
    Sequence,
    /// `a && b`
    And,
    /// `a || b`
    Or,
}

impl ListKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ListKind::Sequence => "list",
            ListKind::And => "and",
            ListKind::Or => "or",
        }
    }
}

/// Two or more commands joined by the same operator, run left to right.
/// `a && b || c` is an `Or` list whose first item is the `And` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListNode {
    pub kind: ListKind,
    pub items: Vec<Node>,
    pub line: usize,
}

/// One join of a pipeline; right-nested for longer pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeNode {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub line: usize,
}

/// `time pipeline` or `! pipeline`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeNode {
    pub timed: bool,
    pub negated: bool,
    pub body: Option<Box<Node>>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    pub condition: Box<Node>,
    pub then_branch: Box<Node>,
    /// `elif` chains appear as a nested [`Node::If`].
    pub else_branch: Option<Box<Node>>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileNode {
    pub until: bool,
    pub condition: Box<Node>,
    pub body: Box<Node>,
    /// Increment expression of an arithmetic `for`.
    pub increment: Option<ArithNode>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForNode {
    pub select: bool,
    pub variable: String,
    /// `None` iterates over the positional parameters.
    pub words: Option<Vec<Argument>>,
    pub body: Box<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseNode {
    pub word: Argument,
    pub clauses: Vec<CaseClause>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseClause {
    pub patterns: Vec<Argument>,
    pub body: Option<Box<Node>>,
    /// Clause ended with `;&`.
    pub fallthrough: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionStyle {
    /// `name() body`
    Posix,
    /// `function name { ... }`
    Ksh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub name: String,
    pub style: FunctionStyle,
    /// Argument names of `function .sh.math.f x y { ... }`.
    pub params: Vec<String>,
    pub body: Rc<FunctionBody>,
    /// Body calls getopts; the executor may cache option parsing.
    pub uses_getopts: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceNode {
    pub name: String,
    pub body: Option<Box<Node>>,
    pub line: usize,
}

/// Arithmetic command: (( expr ))
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithNode {
    pub expr: Argument,
    /// Present when the text is RAW and was compiled at parse time.
    pub compiled: Option<ArithExpr>,
    pub line: usize,
}

/// Conditional command: [[ expr ]]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub expr: CondExpr,
    pub line: usize,
}

// =============================================================================
// REDIRECTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoOp {
    /// `<`
    Input,
    /// `>`
    Output,
    /// `>>`
    Append,
    /// `<>`
    ReadWrite,
    /// `>|`
    Clobber,
    /// `<&`
    DupInput,
    /// `>&`
    DupOutput,
    /// `<<` and `<<-`
    HereDoc,
    /// `<<<`
    HereString,
    /// `<#` and `>#`
    Seek,
}

impl IoOp {
    pub fn default_fd(self) -> i32 {
        match self {
            IoOp::Output | IoOp::Append | IoOp::Clobber | IoOp::DupOutput => 1,
            _ => 0,
        }
    }

    pub fn is_output(self) -> bool {
        self.default_fd() == 1
    }
}

bitflags! {
    /// Modifiers on a redirection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct IoFlags: u16 {
        /// `n<&m-` / `n>&m-`: close the source after duplicating.
        const MOVE = 1 << 0;
        /// `<>;` / `>;`: truncate to the current offset on success.
        const REWRITE = 1 << 1;
        /// `<##`: copy up to the seek pattern to standard output.
        const SEEK_COPY = 1 << 2;
        /// `<<-`
        const STRIP_TABS = 1 << 3;
        /// Here-document delimiter was quoted; the body is not expanded.
        const QUOTED = 1 << 4;
        /// Target needs no expansion.
        const RAW = 1 << 5;
        /// Seek target is an arithmetic expression.
        const ARITH = 1 << 6;
        /// Target is a process substitution.
        const PROCSUB = 1 << 7;
        /// Seek target was `)` inside a command substitution.
        const CURRENT = 1 << 8;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IoTarget {
    Word(Argument),
    Arithmetic(Argument),
    ProcessSubstitution(Box<Node>),
    HereDoc(HereDocRef),
    /// No operand (seek to current offset).
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoNode {
    pub fd: i32,
    pub op: IoOp,
    pub flags: IoFlags,
    /// `{name}>file`: the descriptor is allocated and stored in `name`.
    pub var: Option<String>,
    pub target: IoTarget,
    pub line: usize,
}

/// Handle to a here-document body in the [`HereDocStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HereDocRef {
    pub id: usize,
    pub delimiter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HereDocBody {
    pub delimiter: String,
    pub text: String,
    pub complete: bool,
}

/// Buffer of collected here-document bodies, indexed by [`HereDocRef::id`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HereDocStore {
    bodies: Vec<HereDocBody>,
}

impl HereDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a body that will be collected later.
    pub fn reserve(&mut self, delimiter: &str) -> usize {
        self.bodies.push(HereDocBody {
            delimiter: delimiter.to_string(),
            ..Default::default()
        });
        self.bodies.len() - 1
    }

    pub fn fill(&mut self, id: usize, text: String) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.text = text;
            body.complete = true;
        }
    }

    pub fn body(&self, id: usize) -> Option<&str> {
        self.bodies.get(id).map(|b| b.text.as_str())
    }

    pub fn get(&self, id: usize) -> Option<&HereDocBody> {
        self.bodies.get(id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Drop every body reserved after `mark`.
    pub fn truncate(&mut self, mark: usize) {
        self.bodies.truncate(mark);
    }
}

// =============================================================================
// COMPOUND ASSIGNMENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompoundKind {
    /// `x=()`
    Empty,
    /// Indexed or associative array.
    Array,
    /// Compound variable whose members are assignments and declarations.
    Compound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundAssignment {
    pub name: String,
    /// `+=`: merge into the existing value.
    pub append: bool,
    pub kind: CompoundKind,
    pub elements: Vec<CompoundElement>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKey {
    /// Position within the literal; the executor adds the base index.
    Position(usize),
    /// `[key]=value`
    Subscript(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompoundElement {
    Indexed { key: ElementKey, value: Argument },
    /// Assignment or declaration command inside a compound variable.
    Member(Node),
}

impl CompoundAssignment {
    /// Keys of the indexed elements, in literal order.
    pub fn keys(&self) -> Vec<&ElementKey> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                CompoundElement::Indexed { key, .. } => Some(key),
                CompoundElement::Member(_) => None,
            })
            .collect()
    }
}

// =============================================================================
// ARITHMETIC EXPRESSIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArithExpr {
    Number(ArithNumberNode),
    Float(ArithFloatNode),
    Variable(ArithVariableNode),
    Binary(Box<ArithBinaryNode>),
    Unary(Box<ArithUnaryNode>),
    Ternary(Box<ArithTernaryNode>),
    Assignment(Box<ArithAssignmentNode>),
    Call(ArithCallNode),
    Group(Box<ArithExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithNumberNode {
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithFloatNode {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithVariableNode {
    pub name: String,
    pub subscript: Option<Box<ArithExpr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithBinaryNode {
    pub operator: ArithBinaryOperator,
    pub left: ArithExpr,
    pub right: ArithExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithBinaryOperator {
    Add, Sub, Mul, Div, Mod, Pow,
    LShift, RShift,
    Lt, Le, Gt, Ge, Eq, Ne,
    BitAnd, BitOr, BitXor,
    LogAnd, LogOr,
    Comma,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithUnaryNode {
    pub operator: ArithUnaryOperator,
    pub operand: ArithExpr,
    pub prefix: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithUnaryOperator {
    Neg, Pos, Not, BitNot, Inc, Dec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithTernaryNode {
    pub condition: ArithExpr,
    pub consequent: ArithExpr,
    pub alternate: ArithExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithAssignmentOperator {
    Assign, AddAssign, SubAssign, MulAssign, DivAssign, ModAssign,
    LShiftAssign, RShiftAssign, AndAssign, OrAssign, XorAssign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithAssignmentNode {
    pub operator: ArithAssignmentOperator,
    pub target: ArithVariableNode,
    pub value: ArithExpr,
}

/// Math function call: `sin(x)`, `pow(a, b)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithCallNode {
    pub name: String,
    pub args: Vec<ArithExpr>,
}

// =============================================================================
// CONDITIONAL EXPRESSIONS (for [[ ]])
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CondExpr {
    Unary(CondUnaryNode),
    Binary(CondBinaryNode),
    Not(Box<CondExpr>),
    Group(Box<CondExpr>),
    And(Box<CondExpr>, Box<CondExpr>),
    Or(Box<CondExpr>, Box<CondExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondUnaryNode {
    /// Operator letter: `n` for `-n`, `f` for `-f`, ...
    pub operator: char,
    pub operand: Argument,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondBinaryOperator {
    /// `=`, `==` with a literal right side
    StrEq,
    /// `!=` with a literal right side
    StrNe,
    /// `=`, `==`, `=~` with a pattern right side
    PatEq,
    /// `!=` with a pattern right side
    PatNe,
    StrLt,
    StrGt,
    NumEq,
    NumNe,
    NumLt,
    NumLe,
    NumGt,
    NumGe,
    Nt,
    Ot,
    Ef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondBinaryNode {
    pub operator: CondBinaryOperator,
    pub left: Argument,
    pub right: Argument,
    pub line: usize,
}

// =============================================================================
// PROGRAM
// =============================================================================

/// Result of parsing a whole source: the tree plus its here-document bodies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub root: Option<Node>,
    pub heredocs: HereDocStore,
}

// =============================================================================
// FACTORY FUNCTIONS (AST builders)
// =============================================================================

/// AST factory for building nodes
pub struct AST;

impl AST {
    pub fn list(kind: ListKind, items: Vec<Node>) -> Node {
        let line = items.first().map_or(0, Node::line);
        Node::List(ListNode { kind, items, line })
    }

    pub fn fork(flags: ForkFlags, body: Node) -> Node {
        let line = body.line();
        Node::Fork(ForkNode {
            flags,
            body: Box::new(body),
            io: Vec::new(),
            line,
        })
    }

    pub fn set_io(flags: ForkFlags, body: Node, io: Vec<IoNode>) -> Node {
        let line = body.line();
        Node::SetIo(ForkNode {
            flags,
            body: Box::new(body),
            io,
            line,
        })
    }

    pub fn pipe(left: Node, right: Node) -> Node {
        let line = left.line();
        Node::Pipe(PipeNode {
            left: Box::new(left),
            right: Box::new(right),
            line,
        })
    }

    pub fn if_node(condition: Node, then_branch: Node, else_branch: Option<Node>, line: usize) -> Node {
        Node::If(IfNode {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
            line,
        })
    }

    pub fn while_node(until: bool, condition: Node, body: Node, increment: Option<ArithNode>, line: usize) -> Node {
        Node::While(WhileNode {
            until,
            condition: Box::new(condition),
            body: Box::new(body),
            increment,
            line,
        })
    }

    pub fn arith(expr: Argument, compiled: Option<ArithExpr>) -> ArithNode {
        let line = expr.line;
        ArithNode { expr, compiled, line }
    }

    pub fn io(fd: i32, op: IoOp, flags: IoFlags, target: IoTarget, line: usize) -> IoNode {
        IoNode {
            fd,
            op,
            flags,
            var: None,
            target,
            line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_name() {
        let arg = Argument::new("a[i=1]+=x", ArgFlags::ASSIGNMENT, 1);
        assert_eq!(arg.assignment_name(), Some("a[i=1]"));
        let arg = Argument::new("x=y=z", ArgFlags::ASSIGNMENT, 1);
        assert_eq!(arg.assignment_name(), Some("x"));
        let arg = Argument::new("x=y", ArgFlags::RAW, 1);
        assert_eq!(arg.assignment_name(), None);
    }

    #[test]
    fn test_heredoc_store_truncate() {
        let mut store = HereDocStore::new();
        let a = store.reserve("EOF");
        store.fill(a, "one\n".to_string());
        let mark = store.len();
        store.reserve("END");
        store.truncate(mark);
        assert_eq!(store.len(), 1);
        assert_eq!(store.body(a), Some("one\n"));
        assert!(store.get(a).map(|b| b.complete).unwrap_or(false));
    }

    #[test]
    fn test_default_fds() {
        assert_eq!(IoOp::Input.default_fd(), 0);
        assert_eq!(IoOp::Append.default_fd(), 1);
        assert_eq!(IoOp::HereString.default_fd(), 0);
        assert!(IoOp::Clobber.is_output());
    }

    #[test]
    fn test_list_builder_takes_first_line() {
        let left = Node::Command(SimpleCommand { line: 3, ..Default::default() });
        let right = Node::Command(SimpleCommand { line: 4, ..Default::default() });
        let node = AST::list(ListKind::And, vec![left, right]);
        assert_eq!(node.line(), 3);
        assert_eq!(node.kind_name(), "and");
    }
}
