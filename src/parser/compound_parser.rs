//! Compound Command Parser
//!
//! Handles parsing of compound commands: if, for, select, while, until, case,
//! subshell, brace group, function definitions, namespaces and `(( ))`.
//!
//! Each construct starts at its opening token and consumes its own
//! terminator; the token after it is read with the flags the lexer leaves
//! behind.

use crate::ast::types::*;
use crate::parser::arena::{FunctionBody, NodeArena};
use crate::parser::arithmetic::{compile_limited, dollar_variables, split_arith_for, ArithError};
use crate::parser::diagnostics::MessageKey;
use crate::parser::lexer::{is_identifier, LexFlags, TokenType};
use crate::parser::parser::{GrammarFlags, Parser};
use crate::parser::types::{ParseError, ParseException, ParseResult, ResourceError};

/// A case pattern is a plain word even when it spells a reserved word.
fn pattern_word(kind: TokenType, mut arg: Argument) -> Argument {
    if kind == TokenType::Label {
        arg.text.push(':');
    }
    arg.flags.remove(ArgFlags::ASSIGNMENT | ArgFlags::APPEND);
    arg
}

impl Parser {
    // =========================================================================
    // GROUPS
    // =========================================================================

    /// `{ list; }`
    pub(crate) fn brace_group(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        let body = self.required_list(TokenType::RBrace, GrammarFlags::NL | GrammarFlags::SEMI)?;
        self.advance()?;
        self.alloc()?;
        Ok(Node::Brace(BraceNode {
            body: Box::new(body),
            line,
        }))
    }

    /// `( list )`
    pub(crate) fn subshell(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        let body = self.required_list(TokenType::RParen, GrammarFlags::NL | GrammarFlags::SEMI)?;
        self.advance()?;
        self.alloc()?;
        Ok(Node::Subshell(ParenNode {
            body: Box::new(body),
            line,
        }))
    }

    /// Non-empty list ending at `end`, which is left as the current token.
    fn required_list(&mut self, end: TokenType, flags: GrammarFlags) -> ParseResult<Node> {
        match self.sh_cmd(Some(end), flags)? {
            Some(node) => Ok(node),
            None => Err(self.syntax_error()),
        }
    }

    // =========================================================================
    // CONDITIONALS
    // =========================================================================

    /// `if list then list [elif list then list]... [else list] fi`
    pub(crate) fn if_command(&mut self) -> ParseResult<Node> {
        self.descend()?;
        let result = self.if_clause();
        self.ascend();
        result
    }

    fn if_clause(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        let condition = self.required_list(TokenType::Then, GrammarFlags::NL)?;
        self.advance()?;
        let then_branch = self.required_list(TokenType::Else, GrammarFlags::NL | GrammarFlags::SEMI)?;
        let else_branch = match self.token.kind {
            // the nested clause consumes `fi`
            TokenType::Elif => Some(self.if_command()?),
            TokenType::Else => {
                self.advance()?;
                let branch = self.required_list(TokenType::Fi, GrammarFlags::NL | GrammarFlags::SEMI)?;
                self.advance()?;
                Some(branch)
            }
            _ => {
                self.advance()?;
                None
            }
        };
        self.alloc()?;
        Ok(AST::if_node(condition, then_branch, else_branch, line))
    }

    /// `case word in [(]pattern[|pattern]...) list ;; ... esac`
    ///
    /// `{` and `}` may stand for `in` and `esac`.
    pub(crate) fn case_command(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        if self.token.kind != TokenType::Word {
            return Err(self.syntax_error());
        }
        let mut word = self.token_arg();
        word.flags.remove(ArgFlags::ASSIGNMENT | ArgFlags::APPEND);
        self.advance_with(LexFlags::RESERVED)?;
        self.skip_newlines_with(LexFlags::RESERVED)?;
        let end = match self.token.kind {
            TokenType::In => TokenType::Esac,
            TokenType::LBrace => TokenType::RBrace,
            _ => return Err(self.syntax_error()),
        };
        self.advance_with(LexFlags::RESERVED)?;

        let mut clauses = Vec::new();
        loop {
            self.skip_newlines_with(LexFlags::RESERVED)?;
            if self.token.kind == end {
                self.advance()?;
                break;
            }
            let clause_line = self.token.line;
            if self.token.kind == TokenType::LParen {
                self.advance_with(LexFlags::empty())?;
            }
            let mut patterns = Vec::new();
            loop {
                let kind = self.token.kind;
                let acceptable = kind == TokenType::Word || kind == TokenType::Label || kind.is_reserved();
                if !acceptable || self.token.arg.is_none() {
                    return Err(self.syntax_error());
                }
                patterns.push(pattern_word(kind, self.token_arg()));
                self.advance_with(LexFlags::empty())?;
                if self.token.kind != TokenType::Pipe {
                    break;
                }
                self.advance_with(LexFlags::empty())?;
            }
            self.expect(TokenType::RParen)?;
            self.advance()?;

            let body = self.sh_cmd(None, GrammarFlags::NL | GrammarFlags::EMPTY | GrammarFlags::SEMI)?;
            let fallthrough = match self.token.kind {
                TokenType::DSemi | TokenType::SemiAnd => {
                    let fallthrough = self.token.kind == TokenType::SemiAnd;
                    self.advance_with(LexFlags::RESERVED)?;
                    fallthrough
                }
                kind if kind == end => false,
                _ => return Err(self.syntax_error()),
            };
            clauses.push(CaseClause {
                patterns,
                body: body.map(Box::new),
                fallthrough,
                line: clause_line,
            });
            self.alloc()?;
        }
        self.alloc()?;
        Ok(Node::Case(CaseNode { word, clauses, line }))
    }

    // =========================================================================
    // LOOPS
    // =========================================================================

    /// `while list do list done` and `until list do list done`
    pub(crate) fn while_command(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        let until = self.token.kind == TokenType::Until;
        self.advance()?;
        self.state.enter_loop();
        let condition = self.required_list(TokenType::Do, GrammarFlags::NL)?;
        self.advance()?;
        let body = self.required_list(TokenType::Done, GrammarFlags::NL | GrammarFlags::SEMI)?;
        self.advance()?;
        self.state.leave_loop();
        self.alloc()?;
        Ok(AST::while_node(until, condition, body, None, line))
    }

    /// `for name [in word...] do list done`, `select ...`, and
    /// `for ((init; cond; incr)) do list done`
    pub(crate) fn for_command(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        let select = self.token.kind == TokenType::Select;
        self.advance()?;
        if self.token.kind == TokenType::Expr && !select {
            return self.arith_for(line);
        }
        if self.token.kind != TokenType::Word {
            return Err(self.syntax_error());
        }
        let variable = self.token_arg().text;
        if let Some(xref) = self.xref.as_mut() {
            xref.variable(&variable, self.token.line)?;
        }
        self.advance_with(LexFlags::RESERVED)?;
        self.skip_newlines_with(LexFlags::RESERVED)?;

        let mut words = None;
        if self.token.kind == TokenType::In {
            self.advance_with(LexFlags::empty())?;
            let mut list = Vec::new();
            while self.token.kind == TokenType::Word {
                let mut arg = self.token_arg();
                arg.flags.remove(ArgFlags::ASSIGNMENT | ArgFlags::APPEND);
                list.push(arg);
                self.alloc()?;
                self.advance_with(LexFlags::empty())?;
            }
            if list.is_empty() {
                self.lint(MessageKey::EmptyForList, self.token.line, &[])?;
            }
            if !matches!(self.token.kind, TokenType::Newline | TokenType::Semicolon) {
                return Err(self.syntax_error());
            }
            self.advance()?;
            self.skip_newlines()?;
            if self.token.kind == TokenType::Semicolon {
                return Err(self.syntax_error());
            }
            words = Some(list);
        } else if self.token.kind == TokenType::Semicolon {
            self.advance()?;
            self.skip_newlines()?;
        }

        let body = self.loop_body()?;
        self.alloc()?;
        Ok(Node::For(ForNode {
            select,
            variable,
            words,
            body: Box::new(body),
            line,
        }))
    }

    /// Arithmetic `for`: becomes `init; while cond; do body; incr; done`
    /// with the increment kept on the loop node.
    fn arith_for(&mut self, line: usize) -> ParseResult<Node> {
        let header = self.token_arg();
        let Some((init, condition, increment)) = split_arith_for(&header.text) else {
            return Err(self.error(MessageKey::Unexpected, header.line, &["))"]));
        };
        let part = |text: &str| Argument::new(text.trim(), header.flags, header.line);
        let init = if init.trim().is_empty() {
            None
        } else {
            Some(self.arith_node(part(&init))?)
        };
        let condition = if condition.trim().is_empty() {
            part("1")
        } else {
            part(&condition)
        };
        let condition = self.arith_node(condition)?;
        let increment = if increment.trim().is_empty() {
            None
        } else {
            Some(self.arith_node(part(&increment))?)
        };
        self.advance()?;
        if matches!(self.token.kind, TokenType::Semicolon | TokenType::Newline) {
            self.advance()?;
            self.skip_newlines()?;
        }

        let body = self.loop_body()?;
        self.alloc()?;
        let mut node = AST::while_node(false, Node::Arith(condition), body, increment, line);
        if let Some(init) = init {
            self.alloc()?;
            node = AST::list(ListKind::Sequence, vec![Node::Arith(init), node]);
        }
        Ok(node)
    }

    /// `do list done` or `{ list }`
    fn loop_body(&mut self) -> ParseResult<Node> {
        let end = match self.token.kind {
            TokenType::Do => TokenType::Done,
            TokenType::LBrace => TokenType::RBrace,
            _ => return Err(self.syntax_error()),
        };
        self.advance()?;
        self.state.enter_loop();
        let body = self.required_list(end, GrammarFlags::NL | GrammarFlags::SEMI)?;
        self.advance()?;
        self.state.leave_loop();
        Ok(body)
    }

    // =========================================================================
    // FUNCTIONS
    // =========================================================================

    /// `function name [(param...)] { list }`
    pub(crate) fn function_definition(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        if self.token.kind != TokenType::Word {
            return Err(self.syntax_error());
        }
        let name = self.token_arg();
        if !name.is_raw() {
            return Err(self.error(MessageKey::BadFunctionName, line, &[&name.text]));
        }
        self.advance_with(LexFlags::RESERVED)?;

        let mut params = Vec::new();
        if self.token.kind == TokenType::LParen {
            self.advance_with(LexFlags::empty())?;
            while self.token.kind == TokenType::Word {
                let param = self.token_arg().text;
                if !is_identifier(&param) {
                    return Err(self.syntax_error());
                }
                params.push(param);
                self.advance_with(LexFlags::empty())?;
            }
            self.expect(TokenType::RParen)?;
            self.advance_with(LexFlags::RESERVED)?;
        }
        self.skip_newlines_with(LexFlags::RESERVED)?;
        self.expect(TokenType::LBrace)?;
        self.function_body(name.text, FunctionStyle::Ksh, params, line)
    }

    /// `name() body`; the current token is the `)`.
    pub(crate) fn posix_function(&mut self, name: Argument) -> ParseResult<Node> {
        let line = name.line;
        if !name.is_raw() {
            return Err(self.error(MessageKey::BadFunctionName, line, &[&name.text]));
        }
        self.advance_with(LexFlags::COMMAND_START)?;
        self.skip_newlines()?;
        if matches!(self.token.kind, TokenType::Semicolon | TokenType::Eof) {
            return Err(self.syntax_error());
        }
        self.function_body(name.text, FunctionStyle::Posix, Vec::new(), line)
    }

    /// Parse a function body into its own arena so that it can outlive the
    /// tree of the script that defined it.
    fn function_body(
        &mut self,
        name: String,
        style: FunctionStyle,
        params: Vec<String>,
        line: usize,
    ) -> ParseResult<Node> {
        let private = NodeArena::new(self.options.max_nodes);
        let outer = std::mem::replace(&mut self.arena, private);
        let scope = self.state.enter_function();
        let xref_scope = self.xref.as_mut().map(|x| x.enter_function(&name));

        let result = self.item(GrammarFlags::NOIO);

        let uses_getopts = self.state.leave_function(scope);
        let private = std::mem::replace(&mut self.arena, outer);
        let tree = match result? {
            Some(tree) => tree,
            None => return Err(self.syntax_error()),
        };
        if let (Some(xref), Some(previous)) = (self.xref.as_mut(), xref_scope) {
            xref.leave_function(previous, &name, line, self.lex.line())?;
        }
        let stats = private.stats();
        log::debug!("function {} at line {}: {} nodes", name, line, stats.allocated);

        self.alloc()?;
        Ok(Node::Function(FunctionNode {
            name,
            style,
            params,
            body: FunctionBody::new(tree, stats),
            uses_getopts,
            line,
        }))
    }

    /// `namespace name { list }`
    pub(crate) fn namespace_command(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        let name = self.token_arg().text;
        if self.token.kind != TokenType::Word || !is_identifier(&name) {
            return Err(self.syntax_error());
        }
        self.advance_with(LexFlags::RESERVED)?;
        self.skip_newlines_with(LexFlags::RESERVED)?;
        self.expect(TokenType::LBrace)?;
        self.advance()?;
        let body = self.sh_cmd(Some(TokenType::RBrace), GrammarFlags::NL | GrammarFlags::EMPTY)?;
        self.advance()?;
        self.alloc()?;
        Ok(Node::Namespace(NamespaceNode {
            name,
            body: body.map(Box::new),
            line,
        }))
    }

    // =========================================================================
    // ARITHMETIC
    // =========================================================================

    /// `(( expr ))`
    pub(crate) fn arith_command(&mut self) -> ParseResult<Node> {
        let node = self.arith_node(self.token_arg())?;
        self.advance()?;
        self.alloc()?;
        Ok(Node::Arith(node))
    }

    /// Literal expressions are compiled now; others wait for expansion.
    pub(crate) fn arith_node(&mut self, expr: Argument) -> ParseResult<ArithNode> {
        let line = expr.line;
        if expr.is_raw() {
            return match compile_limited(&expr.text, self.options.posix, self.options.max_depth) {
                Ok(compiled) => Ok(AST::arith(expr, Some(compiled))),
                Err(ArithError::TooDeep { limit, .. }) => Err(ResourceError::RecursionLimit { limit, line }.into()),
                Err(e) => Err(ParseError::Syntax(ParseException::with_token(
                    e.to_string(),
                    line,
                    e.text(),
                ))),
            };
        }
        let substitutes = expr.text.contains("$(") || expr.text.contains('`');
        if self.options.lint_enabled() && !substitutes {
            if let Some(name) = dollar_variables(&expr.text).into_iter().next() {
                self.lint(MessageKey::ArithDollar, line, &[&name, &expr.text])?;
            }
        }
        Ok(AST::arith(expr, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LintPolicy, ParseOptions};

    fn root(input: &str) -> Node {
        let mut parser = Parser::new();
        parser.parse(input).unwrap().root.unwrap()
    }

    fn error(input: &str) -> String {
        let mut parser = Parser::new();
        parser.parse(input).unwrap_err().to_string()
    }

    fn command_name(node: &Node) -> Option<&str> {
        match node {
            Node::Command(cmd) => cmd.name(),
            _ => None,
        }
    }

    #[test]
    fn test_if_elif_else() {
        let node = root("if a; then b\nelif c\nthen d\nelse e; fi");
        let Node::If(outer) = node else { panic!("expected if") };
        assert_eq!(command_name(&outer.condition), Some("a"));
        let Some(Node::If(elif)) = outer.else_branch.as_deref() else { panic!("expected elif") };
        assert_eq!(command_name(&elif.condition), Some("c"));
        assert_eq!(elif.else_branch.as_deref().and_then(command_name), Some("e"));
    }

    #[test]
    fn test_if_requires_then_body() {
        assert!(error("if a; then fi").contains("`fi' unexpected"));
        assert!(error("if a; then b").contains("`if' unmatched"));
    }

    #[test]
    fn test_while_and_until() {
        let Node::While(w) = root("while true\ndo\n  x\ndone") else { panic!("expected while") };
        assert!(!w.until);
        assert_eq!(command_name(&w.body), Some("x"));
        let Node::While(u) = root("until false; do y; done") else { panic!("expected until") };
        assert!(u.until);
    }

    #[test]
    fn test_for_in_list() {
        let Node::For(f) = root("for i in a 'b c' $d\ndo echo $i; done") else { panic!("expected for") };
        assert!(!f.select);
        assert_eq!(f.variable, "i");
        let words: Vec<&str> = f.words.as_ref().unwrap().iter().map(|w| w.text.as_str()).collect();
        assert_eq!(words, vec!["a", "'b c'", "$d"]);
    }

    #[test]
    fn test_for_without_list_and_brace_body() {
        let Node::For(f) = root("for arg; do :; done") else { panic!("expected for") };
        assert!(f.words.is_none());
        let Node::For(f) = root("select x in a b\n{ echo $x; }") else { panic!("expected select") };
        assert!(f.select);
        assert_eq!(f.words.map(|w| w.len()), Some(2));
    }

    #[test]
    fn test_for_errors() {
        assert!(error("for i in a b do echo; done").contains("`done' unexpected"));
        assert!(error("for i in a\n; do x; done").contains("`;' unexpected"));
    }

    #[test]
    fn test_empty_for_list_warning() {
        let mut parser = Parser::with_options(ParseOptions::default().with_lint(LintPolicy::Warn));
        parser.parse("for i in; do x; done").unwrap();
        assert!(parser.diagnostics().iter().any(|d| d.key == MessageKey::EmptyForList));
    }

    #[test]
    fn test_arith_for() {
        let node = root("for ((i=0; i<3; i++)); do echo $i; done");
        let Node::List(mut list) = node else { panic!("expected init list") };
        assert_eq!(list.items.len(), 2);
        let Some(Node::While(w)) = list.items.pop() else { panic!("expected loop") };
        assert!(matches!(list.items[0], Node::Arith(_)));
        let Node::Arith(cond) = *w.condition else { panic!("expected condition") };
        assert_eq!(cond.expr.text, "i<3");
        assert!(cond.compiled.is_some());
        assert_eq!(w.increment.map(|i| i.expr.text), Some("i++".to_string()));
    }

    #[test]
    fn test_arith_for_defaults() {
        let Node::While(w) = root("for ((;;)) { break; }") else { panic!("expected loop") };
        let Node::Arith(cond) = *w.condition else { panic!("expected condition") };
        assert_eq!(cond.expr.text, "1");
        assert!(w.increment.is_none());
        assert!(error("for ((i=0)) do x; done").contains("`))' unexpected"));
    }

    #[test]
    fn test_case_clauses() {
        let node = root("case $x in\n(a|b) one;;\n*.c) two ;&\nin|esac) ;;\nesac");
        let Node::Case(c) = node else { panic!("expected case") };
        assert_eq!(c.word.text, "$x");
        assert_eq!(c.clauses.len(), 3);
        let pats: Vec<&str> = c.clauses[0].patterns.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(pats, vec!["a", "b"]);
        assert!(c.clauses[1].fallthrough);
        let pats: Vec<&str> = c.clauses[2].patterns.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(pats, vec!["in", "esac"]);
        assert!(c.clauses[2].body.is_none());
    }

    #[test]
    fn test_case_braces_and_last_clause() {
        let Node::Case(c) = root("case x { x) y;; }") else { panic!("expected case") };
        assert_eq!(c.clauses.len(), 1);
        assert!(!c.clauses[0].fallthrough);
        let Node::Case(c) = root("case x in esac") else { panic!("expected case") };
        assert!(c.clauses.is_empty());
    }

    #[test]
    fn test_case_unterminated() {
        assert!(error("case x in a) b;;").contains("`case' unmatched"));
    }

    #[test]
    fn test_ksh_function() {
        let Node::Function(f) = root("function greet {\n  print hi\n}") else { panic!("expected function") };
        assert_eq!(f.name, "greet");
        assert_eq!(f.style, FunctionStyle::Ksh);
        assert!(matches!(f.body.tree, Node::Brace(_)));
        assert!(f.body.stats.allocated >= 2);
    }

    #[test]
    fn test_function_params() {
        let Node::Function(f) = root("function .sh.math.hyp (a b) { (( sqrt(a*a+b*b) )); }") else {
            panic!("expected function")
        };
        assert_eq!(f.params, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_bad_function_name() {
        assert!(error("function 'f' { :; }").contains("invalid function name"));
    }

    #[test]
    fn test_posix_function_body() {
        let Node::Function(f) = root("f()\n{ :; }") else { panic!("expected function") };
        assert_eq!(f.style, FunctionStyle::Posix);
        assert!(error("f() ;").contains("`;' unexpected"));
    }

    #[test]
    fn test_function_scope_hides_loops() {
        let mut parser = Parser::with_options(ParseOptions::default().with_lint(LintPolicy::Warn));
        parser.parse("outer: while x; do function f { break outer; }; done").unwrap();
        assert!(parser.diagnostics().iter().any(|d| d.key == MessageKey::UnknownLabel));
    }

    #[test]
    fn test_namespace() {
        let Node::Namespace(ns) = root("namespace app {\n  x=1\n}") else { panic!("expected namespace") };
        assert_eq!(ns.name, "app");
        assert!(ns.body.is_some());
        assert!(error("namespace 1x { x=1; }").contains("unexpected"));
    }

    #[test]
    fn test_arith_command() {
        let Node::Arith(a) = root("(( x = 1 + 2 ))") else { panic!("expected arith") };
        assert!(a.compiled.is_some());
        let Node::Arith(a) = root("(( $x + 1 ))") else { panic!("expected arith") };
        assert!(a.compiled.is_none());
        assert!(error("(( 1 + ))").contains("arithmetic syntax error"));
    }

    #[test]
    fn test_arith_nesting_limit() {
        let mut parser = Parser::with_options(ParseOptions {
            max_depth: 32,
            ..Default::default()
        });
        let text = format!("(( {}1{} ))", "(".repeat(1000), ")".repeat(1000));
        let err = parser.parse(&text).unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::RecursionLimit { limit: 32, line: 1 })));
        let nots = format!("(( {}1 ))", "! ".repeat(1000));
        assert!(matches!(parser.parse(&nots), Err(ParseError::Resource(_))));
        assert!(parser.parse("(( ((1 + 2)) * 3 ))").is_ok());
    }

    #[test]
    fn test_arith_dollar_warning() {
        let mut parser = Parser::with_options(ParseOptions::default().with_lint(LintPolicy::Warn));
        parser.parse("(( $count > 1 ))\n(( $(date +%s) > 0 ))").unwrap();
        let hits: Vec<_> = parser.diagnostics().iter().filter(|d| d.key == MessageKey::ArithDollar).collect();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].message.contains("count"));
    }

    #[test]
    fn test_brace_and_subshell_need_bodies() {
        assert!(error("{ }").contains("`}' unexpected"));
        assert!(error("( )").contains("`)' unexpected"));
    }
}
