//! Recursive Descent Parser for ksh Scripts
//!
//! The parser pulls tokens from the lexer one at a time. Before each pull it
//! may set the lexer's recognition flags, because what a word means (reserved
//! word, assignment, alias, `((`) depends on where the grammar is.
//!
//! Grammar (simplified):
//!   cmd      ::= list ((';' | '&' | '|&' | newline) list)*
//!   list     ::= term (('&&' | '||') term)*
//!   term     ::= ('time' | '!') [term] | item ['|' term]
//!   item     ::= io* (simple | compound) io*
//!   compound ::= '(' cmd ')' | '{' cmd '}' | if | while | until | for
//!              | select | case | function | namespace | label
//!              | '((' expr '))' | '[[' test ']]'
//!
//! The grammar is spread over several `impl Parser` blocks: simple commands in
//! `command_parser`, compound commands in `compound_parser`, `[[ ]]` in
//! `conditional_parser`, redirections in `redirection` and `name=( ... )` in
//! `assignment`.

use bitflags::bitflags;
use std::rc::Rc;

use crate::ast::types::*;
use crate::config::{LintPolicy, ParseOptions};
use crate::parser::arena::{ArenaMark, ArenaStats, NodeArena};
use crate::parser::declarations::Declarations;
use crate::parser::diagnostics::{Diagnostic, Diagnostics, MessageKey};
use crate::parser::input::InputStack;
use crate::parser::lexer::{LexFlags, Lexer, Token, TokenType};
use crate::parser::state::ParserState;
use crate::parser::types::{ParseError, ParseException, ParseResult, ResourceError};
use crate::xref::{Recorder, XrefSink};

bitflags! {
    /// Context handed down through the grammar functions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GrammarFlags: u8 {
        /// Newline separates commands.
        const NL = 1 << 0;
        /// An empty list is accepted.
        const EMPTY = 1 << 1;
        /// A leading `;` (show-me) is accepted.
        const SEMI = 1 << 2;
        /// No leading redirections.
        const NOIO = 1 << 3;
        /// Words are array elements.
        const ARRAY = 1 << 4;
        /// Member of a compound assignment.
        const ASSIGN = 1 << 5;
    }
}

/// Allocation and here-document levels to restore when a parse fails.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    arena: ArenaMark,
    heredocs: usize,
}

/// Main parser struct
pub struct Parser {
    pub(crate) options: ParseOptions,
    pub(crate) decls: Rc<Declarations>,
    pub(crate) lex: Lexer,
    /// Current lookahead token.
    pub(crate) token: Token,
    pub(crate) state: ParserState,
    pub(crate) arena: NodeArena,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) xref: Option<Recorder>,
    /// Parsing the body of a `$( ... )`.
    pub(crate) in_comsub: bool,
    depth: usize,
    primed: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::with_options(ParseOptions::default())
    }

    pub fn with_options(options: ParseOptions) -> Self {
        Self::with_declarations(options, Declarations::new())
    }

    /// Parser sharing a builtin/declaration table with its caller.
    pub fn with_declarations(options: ParseOptions, decls: Rc<Declarations>) -> Self {
        decls.set_retain(options.retain_declarations);
        let lex = Lexer::new(InputStack::from_str(""), options.aliases.clone());
        let arena = NodeArena::new(options.max_nodes);
        Self {
            options,
            decls,
            lex,
            token: Token::new(TokenType::Eof, 0),
            state: ParserState::new(),
            arena,
            diagnostics: Diagnostics::new(),
            xref: None,
            in_comsub: false,
            depth: 0,
            primed: false,
        }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn declarations(&self) -> &Rc<Declarations> {
        &self.decls
    }

    /// Lint warnings of the last parse.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.entries()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Here-document bodies collected so far by [`parse_command`](Self::parse_command).
    pub fn heredocs(&self) -> &HereDocStore {
        &self.lex.heredocs
    }

    pub fn take_heredocs(&mut self) -> HereDocStore {
        std::mem::take(&mut self.lex.heredocs)
    }

    /// Emit cross-reference records for everything parsed from now on.
    pub fn set_xref(&mut self, sink: Box<dyn XrefSink>, script: &str) -> ParseResult<()> {
        self.xref = Some(Recorder::new(sink, script)?);
        Ok(())
    }

    pub fn finish_xref(&mut self) -> ParseResult<()> {
        if let Some(rec) = self.xref.as_mut() {
            rec.finish()?;
        }
        Ok(())
    }

    pub fn check_input_size(&self, size: usize) -> Result<(), ResourceError> {
        if size > self.options.max_input_size {
            return Err(ResourceError::InputTooLarge {
                size,
                limit: self.options.max_input_size,
            });
        }
        Ok(())
    }

    /// Parse a complete script held in memory.
    pub fn parse(&mut self, input: &str) -> ParseResult<Program> {
        self.check_input_size(input.len())?;
        self.parse_program(InputStack::from_str(input))
    }

    /// Parse everything `input` supplies into one tree.
    pub fn parse_program(&mut self, input: InputStack) -> ParseResult<Program> {
        self.start(input);
        log::debug!("parsing program");
        let mark = self.checkpoint();
        match self.program() {
            Ok(root) => {
                let heredocs = std::mem::take(&mut self.lex.heredocs);
                log::debug!(
                    "parsed program: {} nodes, {} here-document(s)",
                    self.arena.allocated(),
                    heredocs.len()
                );
                Ok(Program { root, heredocs })
            }
            Err(e) => {
                self.rewind(mark);
                Err(e)
            }
        }
    }

    fn program(&mut self) -> ParseResult<Option<Node>> {
        self.advance_with(LexFlags::COMMAND_START)?;
        self.sh_cmd(
            Some(TokenType::Eof),
            GrammarFlags::NL | GrammarFlags::EMPTY | GrammarFlags::SEMI,
        )
    }

    /// Begin reading `input` one command at a time.
    pub fn start(&mut self, input: InputStack) {
        self.lex = Lexer::new(input, self.options.aliases.clone());
        self.token = Token::new(TokenType::Eof, 0);
        self.state.reset();
        self.arena.reset();
        self.diagnostics.clear();
        self.depth = 0;
        self.primed = false;
    }

    /// Next complete command of the input given to [`start`](Self::start), or
    /// `None` at end of input. Input is read only as far as the command needs.
    /// After a syntax error the rest of the offending line is skipped, so the
    /// caller may keep reading.
    pub fn parse_command(&mut self) -> ParseResult<Option<Node>> {
        let mark = self.checkpoint();
        let result = self.next_command();
        if result.is_err() {
            self.rewind(mark);
            self.recover();
        }
        result
    }

    fn next_command(&mut self) -> ParseResult<Option<Node>> {
        if !self.primed {
            self.advance_with(LexFlags::COMMAND_START)?;
            self.primed = true;
        }
        while self.token.kind == TokenType::Newline {
            self.advance_with(LexFlags::COMMAND_START)?;
        }
        if self.token.kind == TokenType::Eof {
            return Ok(None);
        }
        self.state.construct = None;
        self.sh_cmd(Some(TokenType::Newline), GrammarFlags::SEMI | GrammarFlags::EMPTY)
    }

    fn recover(&mut self) {
        let at_line_end = matches!(self.token.kind, TokenType::Newline | TokenType::Eof);
        self.lex.reset();
        if !at_line_end {
            let _ = self.lex.input.read_line();
        }
        self.state.reset();
        self.depth = 0;
        self.primed = false;
    }

    /// Parse the text of a command substitution as a nested program. The
    /// surrounding parse continues where it left off afterwards.
    pub fn parse_dolparen(&mut self, text: &str) -> ParseResult<Program> {
        self.check_input_size(text.len())?;
        let mut input = InputStack::from_str(text);
        input.set_line(self.lex.line());
        let inner = Lexer::new(input, self.options.aliases.clone());
        let saved_lex = std::mem::replace(&mut self.lex, inner);
        let saved_token = std::mem::replace(&mut self.token, Token::new(TokenType::Eof, 0));
        let saved_construct = self.state.construct.take();
        let saved_comsub = std::mem::replace(&mut self.in_comsub, true);
        let mark = self.arena.checkpoint();

        let result = self.program();

        let mut inner = std::mem::replace(&mut self.lex, saved_lex);
        self.token = saved_token;
        self.state.construct = saved_construct;
        self.in_comsub = saved_comsub;
        match result {
            Ok(root) => Ok(Program {
                root,
                heredocs: std::mem::take(&mut inner.heredocs),
            }),
            Err(e) => {
                self.arena.rewind(mark);
                Err(e)
            }
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            arena: self.arena.checkpoint(),
            heredocs: self.lex.heredocs.len(),
        }
    }

    fn rewind(&mut self, mark: Checkpoint) {
        self.arena.rewind(mark.arena);
        self.lex.heredocs.truncate(mark.heredocs);
    }

    // =========================================================================
    // TOKEN HELPERS
    // =========================================================================

    /// Replace the lookahead with the next token; returns the old one.
    pub(crate) fn advance(&mut self) -> ParseResult<Token> {
        let next = self.lex.next_token()?;
        Ok(std::mem::replace(&mut self.token, next))
    }

    /// Advance with the given recognition flags.
    pub(crate) fn advance_with(&mut self, flags: LexFlags) -> ParseResult<Token> {
        self.lex.flags = flags;
        self.advance()
    }

    pub(crate) fn skip_newlines(&mut self) -> ParseResult<()> {
        while self.token.kind == TokenType::Newline {
            self.advance()?;
        }
        Ok(())
    }

    /// Skip newlines, reading each following token with `flags`.
    pub(crate) fn skip_newlines_with(&mut self, flags: LexFlags) -> ParseResult<()> {
        while self.token.kind == TokenType::Newline {
            self.advance_with(flags)?;
        }
        Ok(())
    }

    /// Word of the current token, or its operator text.
    pub(crate) fn token_arg(&self) -> Argument {
        match &self.token.arg {
            Some(arg) => arg.clone(),
            None => Argument::raw(self.token.kind.as_str(), self.token.line),
        }
    }

    pub(crate) fn expect(&self, kind: TokenType) -> ParseResult<()> {
        if self.token.kind != kind {
            return Err(self.syntax_error());
        }
        Ok(())
    }

    /// Syntax error at the current token. At end of input the innermost open
    /// construct is reported as unmatched.
    pub(crate) fn syntax_error(&self) -> ParseError {
        if self.token.kind == TokenType::Eof {
            if let Some(open) = self.state.construct {
                let what = open.kind.as_str();
                return self.error(MessageKey::Unmatched, open.line, &[what]);
            }
        }
        let line = if self.token.line == 0 { self.lex.line() } else { self.token.line };
        self.error(MessageKey::Unexpected, line, &[self.token.text()])
    }

    pub(crate) fn error(&self, key: MessageKey, line: usize, args: &[&str]) -> ParseError {
        let token = args.first().copied().unwrap_or("");
        ParseError::Syntax(ParseException::with_token(key.format(args), line, token))
    }

    /// Report a lint warning according to the lint policy.
    pub(crate) fn lint(&mut self, key: MessageKey, line: usize, args: &[&str]) -> ParseResult<()> {
        match self.options.lint {
            LintPolicy::Off => Ok(()),
            LintPolicy::Warn => {
                let entry = self.diagnostics.report(key, line, args);
                log::warn!("line {}: {}", entry.line, entry.message);
                Ok(())
            }
            LintPolicy::Deny => Err(ParseError::Syntax(ParseException::new(key.format(args), line))),
        }
    }

    pub(crate) fn alloc(&mut self) -> ParseResult<()> {
        self.arena.allocate()?;
        Ok(())
    }

    pub(crate) fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= self.options.max_depth {
            return Err(ResourceError::RecursionLimit {
                limit: self.options.max_depth,
                line: self.token.line,
            }
            .into());
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // =========================================================================
    // LISTS
    // =========================================================================

    /// Commands separated by `;`, `&`, `|&` (and newlines with `NL`) up to a
    /// terminator. `end` names the terminator that must follow; `None` accepts
    /// any. The terminator is left as the current token.
    pub(crate) fn sh_cmd(&mut self, end: Option<TokenType>, flags: GrammarFlags) -> ParseResult<Option<Node>> {
        let _shadow = self.decls.attach();
        let mut flags = flags;
        let mut items = Vec::new();
        loop {
            let left = self.list(flags)?;
            let mut kind = self.token.kind;
            if kind == TokenType::Newline {
                if flags.contains(GrammarFlags::NL) {
                    kind = TokenType::Semicolon;
                }
            } else if left.is_none() && !flags.contains(GrammarFlags::EMPTY) {
                return Err(self.syntax_error());
            }
            match kind {
                TokenType::Amp | TokenType::PipeAmp | TokenType::Semicolon => {
                    let Some(mut node) = left else {
                        return Err(self.syntax_error());
                    };
                    if kind != TokenType::Semicolon {
                        let mut fork = ForkFlags::BACKGROUND | ForkFlags::NO_INTERRUPT;
                        if kind == TokenType::PipeAmp {
                            fork |= ForkFlags::PIPE_IN
                                | ForkFlags::PIPE_OUT
                                | ForkFlags::PIPE_CLOSE
                                | ForkFlags::COPROCESS;
                        }
                        node = match node {
                            Node::Subshell(paren) => *paren.body,
                            other => other,
                        };
                        node = AST::fork(fork, node);
                        self.alloc()?;
                    }
                    items.push(node);
                    self.advance()?;
                    flags |= GrammarFlags::EMPTY;
                }
                _ => {
                    let closes = match end {
                        None => true,
                        Some(TokenType::Else) => matches!(kind, TokenType::Else | TokenType::Elif | TokenType::Fi),
                        Some(TokenType::Newline) => matches!(kind, TokenType::Newline | TokenType::Eof),
                        Some(end) => kind == end,
                    };
                    if !closes {
                        return Err(self.syntax_error());
                    }
                    items.extend(left);
                    break;
                }
            }
        }

        if items.len() < 2 {
            return Ok(items.pop());
        }
        self.alloc()?;
        Ok(Some(AST::list(ListKind::Sequence, items)))
    }

    /// `term ('&&' | '||') term ...`, left associative.
    fn list(&mut self, flags: GrammarFlags) -> ParseResult<Option<Node>> {
        let Some(first) = self.term(flags)? else {
            return Ok(None);
        };
        let mut levels = 0;
        let result = self.and_or(first, &mut levels);
        for _ in 0..levels {
            self.ascend();
        }
        result.map(Some)
    }

    /// A run of one operator stays a single list; switching operators nests
    /// the run so far one level down.
    fn and_or(&mut self, first: Node, levels: &mut usize) -> ParseResult<Node> {
        let mut kind = match self.token.kind {
            TokenType::AndAnd => ListKind::And,
            TokenType::OrOr => ListKind::Or,
            _ => return Ok(first),
        };
        let mut items = vec![first];
        loop {
            self.advance()?;
            let Some(right) = self.term(GrammarFlags::NL | GrammarFlags::SEMI)? else {
                return Err(self.syntax_error());
            };
            items.push(right);
            let next = match self.token.kind {
                TokenType::AndAnd => ListKind::And,
                TokenType::OrOr => ListKind::Or,
                _ => break,
            };
            if next != kind {
                self.descend()?;
                *levels += 1;
                self.alloc()?;
                items = vec![AST::list(kind, items)];
                kind = next;
            }
        }
        self.alloc()?;
        Ok(AST::list(kind, items))
    }

    /// Pipeline, optionally timed or negated.
    fn term(&mut self, flags: GrammarFlags) -> ParseResult<Option<Node>> {
        self.descend()?;
        let result = self.term_inner(flags);
        self.ascend();
        result
    }

    fn term_inner(&mut self, flags: GrammarFlags) -> ParseResult<Option<Node>> {
        if flags.contains(GrammarFlags::NL) {
            self.skip_newlines()?;
            if self.token.kind == TokenType::Semicolon && !flags.contains(GrammarFlags::SEMI) {
                return Err(self.syntax_error());
            }
        }
        if matches!(self.token.kind, TokenType::Time | TokenType::Bang) {
            let line = self.token.line;
            let timed = self.token.kind == TokenType::Time;
            self.advance()?;
            let body = self.term(GrammarFlags::empty())?;
            self.alloc()?;
            return Ok(Some(Node::Time(TimeNode {
                timed,
                negated: !timed,
                body: body.map(Box::new),
                line,
            })));
        }
        let item_flags = GrammarFlags::NL | GrammarFlags::EMPTY | (flags & GrammarFlags::SEMI);
        let Some(left) = self.item(item_flags)? else {
            return Ok(None);
        };
        if self.token.kind != TokenType::Pipe {
            return Ok(Some(left));
        }
        self.advance()?;
        let left = AST::fork(ForkFlags::PIPE_OUT, left);
        let Some(right) = self.term(GrammarFlags::NL)? else {
            return Err(self.syntax_error());
        };
        self.alloc()?;
        self.alloc()?;
        Ok(Some(AST::pipe(left, pipe_input(right))))
    }

    // =========================================================================
    // ITEMS
    // =========================================================================

    /// One command with its redirections.
    pub(crate) fn item(&mut self, flags: GrammarFlags) -> ParseResult<Option<Node>> {
        let mut io = Vec::new();
        if !flags.contains(GrammarFlags::NOIO) && self.token.kind.is_redirection() {
            self.inout(&mut io, LexFlags::COMMAND_START)?;
        }
        let kind = self.token.kind;
        let opens = matches!(
            kind,
            TokenType::DBrackStart
                | TokenType::Case
                | TokenType::If
                | TokenType::For
                | TokenType::Select
                | TokenType::While
                | TokenType::Until
                | TokenType::LBrace
                | TokenType::LParen
                | TokenType::Namespace
        );
        let previous = if opens { Some(self.state.open(kind, self.token.line)) } else { None };

        let node = match kind {
            TokenType::DBrackStart => self.test_command()?,
            TokenType::Expr => self.arith_command()?,
            TokenType::Case => self.case_command()?,
            TokenType::If => self.if_command()?,
            TokenType::For | TokenType::Select => self.for_command()?,
            TokenType::While | TokenType::Until => self.while_command()?,
            TokenType::Function => self.function_definition()?,
            TokenType::Namespace => self.namespace_command()?,
            TokenType::Label => self.labeled_command(flags)?,
            TokenType::LBrace => self.brace_group()?,
            TokenType::LParen => self.subshell()?,
            TokenType::Semicolon if io.is_empty() => {
                if !flags.contains(GrammarFlags::SEMI) {
                    return Ok(None);
                }
                self.advance()?;
                if matches!(self.token.kind, TokenType::Semicolon | TokenType::Newline | TokenType::Eof) {
                    return Err(self.syntax_error());
                }
                let mut node = self.simple(flags, io)?;
                if let Node::Command(cmd) = &mut node {
                    cmd.showme = true;
                }
                return Ok(Some(node));
            }
            TokenType::Word => return self.simple(flags, io).map(Some),
            _ if !io.is_empty() => return self.simple(flags, io).map(Some),
            _ => return Ok(None),
        };

        if let Some(previous) = previous {
            self.state.close(previous);
        }
        if self.token.kind.is_redirection() {
            self.inout(&mut io, LexFlags::empty())?;
        }
        if io.is_empty() {
            return Ok(Some(node));
        }
        self.alloc()?;
        Ok(Some(AST::set_io(ForkFlags::empty(), node, io)))
    }

    /// `label: loop`
    fn labeled_command(&mut self, flags: GrammarFlags) -> ParseResult<Node> {
        self.descend()?;
        let result = self.labeled_command_inner(flags);
        self.ascend();
        result
    }

    fn labeled_command_inner(&mut self, flags: GrammarFlags) -> ParseResult<Node> {
        let label = self.token_arg();
        let line = self.token.line;
        if !self.state.push_label(&label.text, line) {
            return Err(self.error(MessageKey::LabelDefined, line, &[&label.text]));
        }
        self.advance()?;
        self.skip_newlines()?;
        if self.token.kind == TokenType::Semicolon && !flags.contains(GrammarFlags::SEMI) {
            return Err(self.syntax_error());
        }
        let Some(node) = self.item(GrammarFlags::NL)? else {
            return Err(self.syntax_error());
        };
        if !node.is_loop() {
            self.lint(MessageKey::LabelIgnored, line, &[&label.text])?;
        }
        Ok(node)
    }
}

/// Mark the right side of a `|` as reading from the pipe.
fn pipe_input(node: Node) -> Node {
    let input = ForkFlags::PIPE_IN | ForkFlags::PIPE_CLOSE;
    match node {
        Node::Fork(mut fork) => {
            fork.flags |= input;
            Node::Fork(fork)
        }
        Node::Pipe(mut pipe) => {
            if let Node::Fork(fork) = pipe.left.as_mut() {
                fork.flags |= input;
            }
            Node::Pipe(pipe)
        }
        Node::SetIo(mut fork) => {
            fork.flags |= input;
            Node::SetIo(fork)
        }
        other => AST::set_io(input, other, Vec::new()),
    }
}

/// Convenience function to parse a script
pub fn parse(input: &str) -> ParseResult<Program> {
    let mut parser = Parser::new();
    parser.parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(input: &str) -> Node {
        let mut parser = Parser::new();
        parser.parse(input).unwrap().root.unwrap()
    }

    fn command(node: &Node) -> &SimpleCommand {
        match node {
            Node::Command(cmd) => cmd,
            other => panic!("expected command, got {}", other.kind_name()),
        }
    }

    fn words(node: &Node) -> Vec<&str> {
        command(node).args.iter().map(|a| a.text.as_str()).collect()
    }

    fn syntax_message(input: &str) -> String {
        let mut parser = Parser::new();
        match parser.parse(input) {
            Err(ParseError::Syntax(e)) => e.message,
            other => panic!("expected syntax error, got {:?}", other.map(|p| p.root.is_some())),
        }
    }

    #[test]
    fn test_parse_empty() {
        let mut parser = Parser::new();
        let program = parser.parse("").unwrap();
        assert!(program.root.is_none());
        let program = parser.parse("\n\n# comment only\n").unwrap();
        assert!(program.root.is_none());
    }

    #[test]
    fn test_parse_simple_command() {
        let node = root("echo hello world");
        assert_eq!(words(&node), vec!["echo", "hello", "world"]);
        let cmd = command(&node);
        assert_eq!(cmd.builtin, Some(BuiltinKind::Regular));
        assert!(!cmd.needs_expansion);
    }

    #[test]
    fn test_parse_sequence_is_flat() {
        let Node::List(list) = root("a; b; c") else { panic!("expected list") };
        assert_eq!(list.kind, ListKind::Sequence);
        let items: Vec<_> = list.items.iter().map(words).collect();
        assert_eq!(items, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_parse_and_or_left_associative() {
        let Node::List(or) = root("a && b && c || d") else { panic!("expected list") };
        assert_eq!(or.kind, ListKind::Or);
        assert_eq!(or.items.len(), 2);
        let Node::List(and) = &or.items[0] else { panic!("expected list") };
        assert_eq!(and.kind, ListKind::And);
        assert_eq!(and.items.len(), 3);
        assert_eq!(words(&or.items[1]), vec!["d"]);
    }

    #[test]
    fn test_parse_long_script_stays_shallow() {
        let text = "echo line\n".repeat(20_000);
        let Node::List(list) = root(&text) else { panic!("expected list") };
        assert_eq!(list.items.len(), 20_000);

        let chain = format!("a{}", " && a || a".repeat(300));
        let mut parser = Parser::new();
        let err = parser.parse(&chain).unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::RecursionLimit { .. })));
    }

    #[test]
    fn test_parse_and_continues_after_newline() {
        let Node::List(and) = root("a &&\n\n b") else { panic!("expected list") };
        assert_eq!(and.kind, ListKind::And);
    }

    #[test]
    fn test_parse_pipeline_flags() {
        let Node::Pipe(outer) = root("a | b | c") else { panic!("expected pipe") };
        let Node::Fork(first) = outer.left.as_ref() else { panic!("expected fork") };
        assert_eq!(first.flags, ForkFlags::PIPE_OUT);
        let Node::Pipe(inner) = outer.right.as_ref() else { panic!("expected pipe") };
        let Node::Fork(middle) = inner.left.as_ref() else { panic!("expected fork") };
        assert_eq!(
            middle.flags,
            ForkFlags::PIPE_OUT | ForkFlags::PIPE_IN | ForkFlags::PIPE_CLOSE
        );
        let Node::SetIo(last) = inner.right.as_ref() else { panic!("expected set-io") };
        assert_eq!(last.flags, ForkFlags::PIPE_IN | ForkFlags::PIPE_CLOSE);
        assert_eq!(words(&last.body), vec!["c"]);
    }

    #[test]
    fn test_parse_background() {
        let Node::List(list) = root("a & b") else { panic!("expected list") };
        let Node::Fork(fork) = &list.items[0] else { panic!("expected fork") };
        assert_eq!(fork.flags, ForkFlags::BACKGROUND | ForkFlags::NO_INTERRUPT);
        assert_eq!(words(&list.items[1]), vec!["b"]);
    }

    #[test]
    fn test_parse_background_subshell_unwrapped() {
        let Node::Fork(fork) = root("(a; b) &") else { panic!("expected fork") };
        assert!(matches!(fork.body.as_ref(), Node::List(_)));
    }

    #[test]
    fn test_parse_coprocess() {
        let Node::Fork(fork) = root("a |&") else { panic!("expected fork") };
        assert!(fork.flags.contains(ForkFlags::COPROCESS | ForkFlags::BACKGROUND));
    }

    #[test]
    fn test_parse_negation_and_time() {
        let Node::Time(t) = root("! a | b") else { panic!("expected time") };
        assert!(t.negated && !t.timed);
        assert!(matches!(t.body.as_deref(), Some(Node::Pipe(_))));

        let Node::Time(t) = root("time") else { panic!("expected time") };
        assert!(t.timed);
        assert!(t.body.is_none());
    }

    #[test]
    fn test_parse_subshell_and_brace() {
        assert!(matches!(root("(echo hello)"), Node::Subshell(_)));
        assert!(matches!(root("{ echo hello; }"), Node::Brace(_)));
    }

    #[test]
    fn test_parse_compound_trailing_redirection() {
        let Node::SetIo(set) = root("{ a; } > out 2>&1") else { panic!("expected set-io") };
        assert!(matches!(set.body.as_ref(), Node::Brace(_)));
        assert_eq!(set.io.len(), 2);
        assert_eq!(set.io[0].op, IoOp::Output);
        assert_eq!(set.io[1].fd, 2);
    }

    #[test]
    fn test_parse_showme_prefix() {
        let node = root("; echo hi");
        assert!(command(&node).showme);
    }

    #[test]
    fn test_syntax_error_unexpected() {
        assert_eq!(syntax_message("fi"), "`fi' unexpected");
        assert_eq!(syntax_message("echo )"), "`)' unexpected");
        assert_eq!(syntax_message("a && "), "`end of file' unexpected");
    }

    #[test]
    fn test_syntax_error_unmatched_reports_opening_line() {
        let mut parser = Parser::new();
        let err = parser.parse("\nif a; then\n  b\n").unwrap_err();
        let ParseError::Syntax(e) = err else { panic!("expected syntax error") };
        assert_eq!(e.message, "`if' unmatched");
        assert_eq!(e.line, 2);
    }

    #[test]
    fn test_recursion_limit() {
        let options = ParseOptions {
            max_depth: 20,
            ..Default::default()
        };
        let mut parser = Parser::with_options(options);
        let input = format!("{}a{}", "( ".repeat(40), " )".repeat(40));
        let err = parser.parse(&input).unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::RecursionLimit { limit: 20, .. })));
        assert!(parser.parse("( ( a ) )").is_ok());
    }

    #[test]
    fn test_arena_limit() {
        let options = ParseOptions {
            max_nodes: 5,
            ..Default::default()
        };
        let mut parser = Parser::with_options(options);
        let err = parser.parse("a; b; c; d; e; f; g").unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::ArenaExhausted { limit: 5 })));
        assert_eq!(parser.arena_stats().allocated, 0);
    }

    #[test]
    fn test_input_too_large() {
        let options = ParseOptions {
            max_input_size: 4,
            ..Default::default()
        };
        let mut parser = Parser::with_options(options);
        let err = parser.parse("echo hi").unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::InputTooLarge { size: 7, limit: 4 })));
    }

    #[test]
    fn test_parse_command_incremental() {
        let mut parser = Parser::new();
        parser.start(InputStack::from_str("a\nb; c\n\n"));
        let first = parser.parse_command().unwrap().unwrap();
        assert_eq!(words(&first), vec!["a"]);
        let second = parser.parse_command().unwrap().unwrap();
        assert!(matches!(second, Node::List(_)));
        assert!(parser.parse_command().unwrap().is_none());
    }

    #[test]
    fn test_parse_command_recovers_after_error() {
        let mut parser = Parser::new();
        parser.start(InputStack::from_str("fi oops\necho ok\n"));
        assert!(parser.parse_command().is_err());
        let next = parser.parse_command().unwrap().unwrap();
        assert_eq!(words(&next), vec!["echo", "ok"]);
    }

    #[test]
    fn test_parse_command_collects_heredoc() {
        let mut parser = Parser::new();
        parser.start(InputStack::from_str("cat <<EOF\nbody\nEOF\necho next\n"));
        let cmd = parser.parse_command().unwrap().unwrap();
        let IoTarget::HereDoc(doc) = &command(&cmd).io[0].target else { panic!("expected here-doc") };
        assert_eq!(parser.heredocs().body(doc.id), Some("body\n"));
        let next = parser.parse_command().unwrap().unwrap();
        assert_eq!(words(&next), vec!["echo", "next"]);
    }

    #[test]
    fn test_parse_dolparen() {
        let mut parser = Parser::new();
        let program = parser.parse_dolparen("echo $x | wc -l").unwrap();
        assert!(matches!(program.root, Some(Node::Pipe(_))));
    }

    #[test]
    fn test_lint_policy() {
        let mut parser = Parser::with_options(ParseOptions::default().with_lint(LintPolicy::Warn));
        parser.parse("for i in; do :; done").unwrap();
        assert!(parser.diagnostics().iter().any(|d| d.key == MessageKey::EmptyForList));

        let mut parser = Parser::with_options(ParseOptions::default().with_lint(LintPolicy::Deny));
        let err = parser.parse("for i in; do :; done").unwrap_err();
        assert!(err.to_string().contains("empty for list"));

        let mut parser = Parser::new();
        parser.parse("for i in; do :; done").unwrap();
        assert!(parser.diagnostics().is_empty());
    }

    #[test]
    fn test_alias_expansion() {
        let options = ParseOptions::default().with_alias("ll", "ls -l ");
        let mut parser = Parser::with_options(options);
        let program = parser.parse("ll dir").unwrap();
        assert_eq!(words(program.root.as_ref().unwrap()), vec!["ls", "-l", "dir"]);
    }

    #[test]
    fn test_labeled_loop() {
        assert!(matches!(root("outer: while a; do b; done"), Node::While(_)));
        let message = syntax_message("x: while a; do x: while b; do c; done; done");
        assert_eq!(message, "label x already defined");
    }
}
