//! Builtin table and declaration shadow table
//!
//! The parser needs to know which command names are declaration builtins,
//! because their arguments are parsed as assignments (`typeset x=(a b)`).
//! `typeset -T Name` and `enum Name` create new declaration commands at run
//! time; so that a script can use them further down before they have run, the
//! parser records them in a shadow table that is consulted alongside the real
//! builtin table.
//!
//! The shadow table is attached while a statement is being parsed. Attachment
//! nests; only the outermost [`ShadowGuard`] clears the table when it is
//! dropped, which discards names whose declaring command never ran.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::ast::types::{Argument, BuiltinKind};

lazy_static! {
    static ref DEFAULT_BUILTINS: Vec<(&'static str, BuiltinKind)> = {
        use BuiltinKind::*;
        let mut v = vec![
            ("alias", Declaration),
            ("autoload", Declaration),
            ("compound", Declaration),
            ("export", Declaration),
            ("float", Declaration),
            ("functions", Declaration),
            ("integer", Declaration),
            ("nameref", Declaration),
            ("readonly", Declaration),
            ("typeset", Declaration),
            ("enum", Enum),
            ("command", Command),
            ("exec", Exec),
            ("redirect", Redirect),
            ("break", Break),
            ("continue", Continue),
            ("set", Set),
            ("test", Test),
            ("[", Bracket),
            ("getopts", Getopts),
            (".", Dot),
            ("source", Dot),
        ];
        for name in [
            ":", "bg", "builtin", "cd", "disown", "echo", "eval", "exit", "false", "fc", "fg", "hash", "hist",
            "jobs", "kill", "let", "print", "printf", "pwd", "read", "return", "shift", "sleep", "trap",
            "true", "ulimit", "umask", "unalias", "unset", "wait", "whence",
        ] {
            v.push((name, Regular));
        }
        v
    };
}

/// Builtins known to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinTable {
    entries: IndexMap<String, BuiltinKind>,
}

impl Default for BuiltinTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_BUILTINS.iter().map(|(n, k)| (n.to_string(), *k)).collect(),
        }
    }
}

impl BuiltinTable {
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<BuiltinKind> {
        self.entries.get(name).copied()
    }

    pub fn insert(&mut self, name: &str, kind: BuiltinKind) {
        self.entries.insert(name.to_string(), kind);
    }

    pub fn remove(&mut self, name: &str) -> Option<BuiltinKind> {
        self.entries.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builtin table plus the parse-time shadow overlay.
#[derive(Debug)]
pub struct Declarations {
    builtins: RefCell<BuiltinTable>,
    shadow: RefCell<IndexMap<String, BuiltinKind>>,
    depth: Cell<usize>,
    retain: Cell<bool>,
}

impl Declarations {
    pub fn new() -> Rc<Self> {
        Self::with_table(BuiltinTable::default())
    }

    pub fn with_table(table: BuiltinTable) -> Rc<Self> {
        Rc::new(Self {
            builtins: RefCell::new(table),
            shadow: RefCell::new(IndexMap::new()),
            depth: Cell::new(0),
            retain: Cell::new(false),
        })
    }

    /// Keep shadow entries after the outermost detach (whole-script compilation).
    pub fn set_retain(&self, retain: bool) {
        self.retain.set(retain);
    }

    /// Attach the shadow table for the lifetime of the returned guard.
    pub fn attach(self: &Rc<Self>) -> ShadowGuard {
        self.depth.set(self.depth.get() + 1);
        ShadowGuard {
            decls: Rc::clone(self),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.depth.get() > 0
    }

    /// Nesting level of attached guards.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Resolve a command name: real builtins first, then the shadow table.
    pub fn lookup(&self, name: &str) -> Option<BuiltinKind> {
        if let Some(kind) = self.builtins.borrow().get(name) {
            return Some(kind);
        }
        if self.is_attached() {
            return self.shadow.borrow().get(name).copied();
        }
        None
    }

    pub fn is_declaration(&self, name: &str) -> bool {
        self.lookup(name).map(BuiltinKind::is_declaration).unwrap_or(false)
    }

    /// Record a declaration command seen at parse time.
    pub fn declare(&self, name: &str) {
        if self.builtins.borrow().get(name).is_some() {
            return;
        }
        log::debug!("provisional declaration command {}", name);
        self.shadow.borrow_mut().insert(name.to_string(), BuiltinKind::Declaration);
    }

    /// Make a declaration permanent once its defining command has run.
    pub fn register_declaration(&self, name: &str) {
        self.shadow.borrow_mut().shift_remove(name);
        self.builtins.borrow_mut().insert(name, BuiltinKind::Declaration);
    }

    /// Names currently in the shadow table.
    pub fn shadowed(&self) -> Vec<String> {
        self.shadow.borrow().keys().cloned().collect()
    }

    pub fn builtin(&self, name: &str) -> Option<BuiltinKind> {
        self.builtins.borrow().get(name)
    }

    fn detach(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 && !self.retain.get() {
            let mut shadow = self.shadow.borrow_mut();
            if !shadow.is_empty() {
                log::debug!("discarding {} provisional declaration(s)", shadow.len());
                shadow.clear();
            }
        }
    }
}

/// Scoped attachment of the shadow table; detaches on drop.
#[derive(Debug)]
pub struct ShadowGuard {
    decls: Rc<Declarations>,
}

impl Drop for ShadowGuard {
    fn drop(&mut self) {
        self.decls.detach();
    }
}

/// Option-letter classes of `typeset`: attribute letters, then letters that
/// take a size or type, then digits.
fn typeset_class(c: char) -> u8 {
    match c {
        'b' | 'f' | 'l' | 'm' | 'n' | 'p' | 'r' | 's' | 't' | 'u' | 'x' | 'A' | 'C' | 'H' | 'S' => 1,
        'a' | 'i' | 'E' | 'F' | 'L' | 'R' | 'X' | 'h' | 'T' | 'Z' => 2,
        '0'..='9' => 3,
        _ => 0,
    }
}

/// False when the letters of a `typeset` option word are out of canonical order.
pub fn typeset_order_ok(word: &str) -> bool {
    if !(word.starts_with('-') || word.starts_with('+')) {
        return true;
    }
    let mut last = 0;
    for c in word.chars() {
        let class = typeset_class(c);
        if class < last {
            return false;
        }
        last = class;
    }
    true
}

/// Attribute flags a declaration command passes to a compound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeclarationShape {
    /// `-a`: indexed array.
    pub array: bool,
    /// `-A`: associative array.
    pub associative: bool,
    /// `-T`: type definition.
    pub type_def: bool,
    /// `-C` or `compound`: compound variable.
    pub compound: bool,
}

/// Scan the option words of a declaration command.
pub fn declaration_shape(args: &[Argument]) -> DeclarationShape {
    let mut shape = DeclarationShape::default();
    if let Some(first) = args.first() {
        shape.compound = first.text == "compound";
    }
    for arg in args.iter().skip(1) {
        let text = arg.text.as_str();
        if text == "--" || !(text.starts_with('-') || text.starts_with('+')) {
            break;
        }
        let letters = &text[1..];
        if text.starts_with('-') {
            shape.array |= letters.contains('a');
            shape.associative |= letters.contains('A');
            shape.compound |= letters.contains('C');
        }
        shape.type_def |= letters.starts_with('T') || letters.contains('T');
    }
    shape
}

/// Name introduced by `typeset -T Name` or `enum Name`, if any.
pub fn defined_type_name(args: &[Argument], kind: BuiltinKind) -> Option<String> {
    let mut iter = args.iter().skip(1).peekable();
    while let Some(arg) = iter.next() {
        let text = arg.text.as_str();
        if text == "--" {
            return match kind {
                BuiltinKind::Enum => iter.next().filter(|a| a.is_raw()).map(|a| strip_value(&a.text)),
                _ => None,
            };
        }
        if text.starts_with('-') || text.starts_with('+') {
            if kind != BuiltinKind::Enum {
                if let Some(rest) = text.strip_prefix("-T") {
                    if !rest.is_empty() {
                        return Some(strip_value(rest));
                    }
                    return iter.next().filter(|a| a.is_raw()).map(|a| strip_value(&a.text));
                }
            }
            continue;
        }
        return match kind {
            BuiltinKind::Enum => Some(strip_value(text)),
            _ => None,
        };
    }
    None
}

fn strip_value(text: &str) -> String {
    let end = text.find(['=', '[']).unwrap_or(text.len());
    text[..end].trim_end_matches('+').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<Argument> {
        words.iter().map(|w| Argument::raw(*w, 1)).collect()
    }

    #[test]
    fn test_default_table() {
        let decls = Declarations::new();
        assert!(decls.is_declaration("typeset"));
        assert!(decls.is_declaration("enum"));
        assert_eq!(decls.lookup("command"), Some(BuiltinKind::Command));
        assert_eq!(decls.lookup("ls"), None);
    }

    #[test]
    fn test_shadow_visible_only_while_attached() {
        let decls = Declarations::new();
        let guard = decls.attach();
        decls.declare("Point");
        assert!(decls.is_declaration("Point"));
        drop(guard);
        assert!(!decls.is_declaration("Point"));
        assert!(decls.shadowed().is_empty());
    }

    #[test]
    fn test_nested_attach_clears_on_outermost() {
        let decls = Declarations::new();
        let outer = decls.attach();
        {
            let _inner = decls.attach();
            decls.declare("Color");
            assert_eq!(decls.depth(), 2);
        }
        assert!(decls.is_declaration("Color"));
        drop(outer);
        assert_eq!(decls.depth(), 0);
        let _again = decls.attach();
        assert!(!decls.is_declaration("Color"));
    }

    #[test]
    fn test_retain_and_register() {
        let decls = Declarations::new();
        decls.set_retain(true);
        {
            let _g = decls.attach();
            decls.declare("Point");
        }
        assert_eq!(decls.shadowed(), vec!["Point".to_string()]);
        decls.register_declaration("Point");
        assert!(decls.shadowed().is_empty());
        assert!(decls.is_declaration("Point"));
    }

    #[test]
    fn test_typeset_order() {
        assert!(typeset_order_ok("-xi"));
        assert!(typeset_order_ok("-ui10"));
        assert!(!typeset_order_ok("-ix"));
        assert!(!typeset_order_ok("-i10x"));
        assert!(typeset_order_ok("name"));
    }

    #[test]
    fn test_defined_type_name() {
        assert_eq!(
            defined_type_name(&args(&["typeset", "-T", "Point"]), BuiltinKind::Declaration),
            Some("Point".to_string())
        );
        assert_eq!(
            defined_type_name(&args(&["typeset", "-TPoint=(x=1)"]), BuiltinKind::Declaration),
            Some("Point".to_string())
        );
        assert_eq!(defined_type_name(&args(&["typeset", "-i", "x"]), BuiltinKind::Declaration), None);
        assert_eq!(
            defined_type_name(&args(&["enum", "-i", "Color"]), BuiltinKind::Enum),
            Some("Color".to_string())
        );
    }

    #[test]
    fn test_declaration_shape() {
        let shape = declaration_shape(&args(&["typeset", "-a", "x"]));
        assert!(shape.array);
        let shape = declaration_shape(&args(&["compound", "x"]));
        assert!(shape.compound);
        let shape = declaration_shape(&args(&["typeset", "-T", "P"]));
        assert!(shape.type_def);
    }
}
