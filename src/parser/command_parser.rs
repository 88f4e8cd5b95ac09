//! Command Parser
//!
//! Handles simple commands: words, assignments and redirections in any order.
//!
//! Which words are assignments depends on their position and on the command:
//! - before the command name every `name=value` word is an assignment
//! - after a declaration builtin (`typeset`, `export`, ... or a type made by
//!   `typeset -T`/`enum`) assignments stay recognized, and each variable name
//!   is also passed to the command as an argument
//! - `command` moves the command name one word to the right
//!
//! Once the words are collected, `break`/`continue` labels become loop
//! counts and `test -t` gets its implicit descriptor.

use crate::ast::types::*;
use crate::parser::declarations::{declaration_shape, defined_type_name, typeset_order_ok, DeclarationShape};
use crate::parser::diagnostics::MessageKey;
use crate::parser::lexer::{is_identifier, LexFlags, TokenType};
use crate::parser::parser::{GrammarFlags, Parser};
use crate::parser::types::ParseResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignMode {
    Plain,
    /// Arguments of a declaration builtin.
    Declaration,
    /// `alias name=value`: the words are not assignments.
    Alias,
}

/// What came before the current token; decides what `(` means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Previous {
    Start,
    /// `name=` whose value may be a compound literal.
    Assignment(usize),
    /// The only word so far: `name ( )` defines a function.
    FirstWord,
    Other,
}

#[derive(Debug)]
struct Scan {
    mode: AssignMode,
    key_on: bool,
    decl_kind: Option<BuiltinKind>,
    /// Index of the command name among the literal words.
    cmdarg: usize,
    /// Literal words seen so far; `None` after a word that needs expansion.
    argno: Option<usize>,
    previous: Previous,
}

impl Scan {
    /// Lexer flags for the word after the current one.
    fn next_flags(&self, named: bool) -> LexFlags {
        if !named {
            LexFlags::ASSIGN | LexFlags::ALIAS
        } else if self.key_on {
            LexFlags::ASSIGN
        } else {
            LexFlags::empty()
        }
    }
}

/// Variable name declared by an assignment argument of a declaration command:
/// the text before `=` without `+` or a trailing subscript.
pub(crate) fn declared_name(text: &str) -> String {
    let eq = assignment_split(text).unwrap_or(text.len());
    let name = text[..eq].trim_end_matches('+');
    match name.find('[') {
        Some(i) if i > 0 && name.ends_with(']') && !name[..i].ends_with('.') => name[..i].to_string(),
        _ => name.to_string(),
    }
}

impl Parser {
    /// Parse a simple command starting at the current token. `io` holds
    /// redirections already read in front of it.
    pub(crate) fn simple(&mut self, flags: GrammarFlags, io: Vec<IoNode>) -> ParseResult<Node> {
        let saved_typeset = std::mem::replace(&mut self.state.in_typeset, false);
        let result = self.simple_inner(flags, io);
        self.state.in_typeset = saved_typeset;
        result
    }

    fn simple_inner(&mut self, flags: GrammarFlags, io: Vec<IoNode>) -> ParseResult<Node> {
        let no_io = flags.contains(GrammarFlags::NOIO);
        let array = flags.contains(GrammarFlags::ARRAY);
        let mut cmd = SimpleCommand {
            io,
            line: self.token.line,
            ..Default::default()
        };
        let mut scan = Scan {
            mode: AssignMode::Plain,
            key_on: self.options.keyword && !no_io,
            decl_kind: None,
            cmdarg: 0,
            argno: Some(0),
            previous: Previous::Start,
        };

        loop {
            match self.token.kind {
                TokenType::Word => self.simple_word(&mut cmd, &mut scan, flags)?,
                TokenType::Label if flags.contains(GrammarFlags::ASSIGN) => {
                    self.simple_word(&mut cmd, &mut scan, flags)?
                }
                TokenType::ProcIn | TokenType::ProcOut => {
                    let line = self.token.line;
                    let opener = self.token.kind.as_str();
                    let body = self.process_substitution()?;
                    let mut arg = Argument::new(opener, ArgFlags::EXP, line);
                    arg.payload = Some(Box::new(ArgPayload::ProcessSubstitution(Box::new(body))));
                    cmd.args.push(arg);
                    self.alloc()?;
                    scan.argno = None;
                    scan.previous = Previous::Other;
                    self.advance_with(scan.next_flags(true))?;
                }
                TokenType::LParen => match scan.previous {
                    Previous::Assignment(index) => {
                        let shape = if scan.mode == AssignMode::Declaration {
                            declaration_shape(&cmd.args)
                        } else {
                            DeclarationShape::default()
                        };
                        let word = cmd.assignments[index].clone();
                        let after = scan.next_flags(!cmd.args.is_empty());
                        let in_typeset = std::mem::replace(&mut self.state.in_typeset, false);
                        let value = self.compound_assign(word, shape, after);
                        self.state.in_typeset = in_typeset;
                        cmd.assignments[index] = value?;
                        scan.previous = Previous::Other;
                    }
                    Previous::FirstWord if !array => {
                        let line = self.token.line;
                        self.advance()?;
                        if self.token.kind != TokenType::RParen {
                            return Err(self.error(MessageKey::Unexpected, line, &["("]));
                        }
                        let name = cmd.args.remove(0);
                        return self.posix_function(name);
                    }
                    _ => break,
                },
                kind if kind.is_redirection() && !no_io => {
                    let after = scan.next_flags(!cmd.args.is_empty());
                    self.inout(&mut cmd.io, after)?;
                    scan.previous = Previous::Other;
                }
                _ => break,
            }
        }

        if cmd.args.is_empty() && cmd.assignments.is_empty() && cmd.io.is_empty() {
            return Err(self.syntax_error());
        }
        cmd.needs_expansion = cmd
            .args
            .iter()
            .chain(&cmd.assignments)
            .any(|a| !a.is_raw() || a.payload.is_some());

        if let Some(kind) = scan.decl_kind {
            if self.state.in_typeset {
                if let Some(name) = defined_type_name(&cmd.args, kind) {
                    self.decls.declare(&name);
                }
            }
            self.check_declaration_options(&cmd)?;
        }
        match cmd.builtin {
            Some(BuiltinKind::Break) | Some(BuiltinKind::Continue) => self.resolve_label(&mut cmd)?,
            Some(BuiltinKind::Set) => self.check_set(&cmd)?,
            _ => {}
        }
        if let Some(argno) = scan.argno {
            if argno > 0 && !array && !self.options.posix {
                self.check_test(&mut cmd, argno)?;
            }
        }
        self.record_command(&cmd, scan.mode == AssignMode::Declaration)?;
        self.alloc()?;
        Ok(Node::Command(cmd))
    }

    /// One word of a simple command; advances past it.
    fn simple_word(&mut self, cmd: &mut SimpleCommand, scan: &mut Scan, flags: GrammarFlags) -> ParseResult<()> {
        let mut arg = self.token_arg();
        if self.token.kind == TokenType::Label {
            arg.text.push(':');
            arg.flags.remove(ArgFlags::ASSIGNMENT | ArgFlags::APPEND);
        }
        if arg.is_assignment() && scan.mode != AssignMode::Alias {
            if scan.mode == AssignMode::Declaration {
                cmd.args.push(Argument::raw(declared_name(&arg.text), arg.line));
                if let Some(n) = scan.argno.as_mut() {
                    *n += 1;
                }
                self.alloc()?;
            }
            cmd.assignments.push(arg);
            scan.previous = Previous::Assignment(cmd.assignments.len() - 1);
        } else {
            arg.flags.remove(ArgFlags::ASSIGNMENT | ArgFlags::APPEND);
            if !arg.is_raw() {
                scan.argno = None;
            }
            let at_name = scan.argno == Some(scan.cmdarg)
                && !flags.contains(GrammarFlags::ARRAY)
                && !(self.options.restricted && arg.text.contains('/'));
            if let Some(n) = scan.argno.as_mut() {
                *n += 1;
            }
            if at_name {
                self.command_name(cmd, scan, &arg.text);
            }
            cmd.args.push(arg);
            scan.previous = if scan.argno == Some(1) && cmd.assignments.is_empty() {
                Previous::FirstWord
            } else {
                Previous::Other
            };
        }
        self.alloc()?;
        self.advance_with(scan.next_flags(!cmd.args.is_empty()))?;
        Ok(())
    }

    fn command_name(&mut self, cmd: &mut SimpleCommand, scan: &mut Scan, name: &str) {
        let Some(kind) = self.decls.lookup(name) else {
            return;
        };
        if scan.cmdarg == 0 {
            cmd.builtin = Some(kind);
        }
        match kind {
            BuiltinKind::Declaration | BuiltinKind::Enum if name == "alias" => scan.mode = AssignMode::Alias,
            BuiltinKind::Declaration | BuiltinKind::Enum => {
                scan.mode = AssignMode::Declaration;
                scan.key_on = true;
                scan.decl_kind = Some(kind);
                self.state.in_typeset = true;
            }
            BuiltinKind::Command => scan.cmdarg += 1,
            BuiltinKind::Getopts => self.state.uses_getopts = true,
            _ => {}
        }
    }

    fn check_declaration_options(&mut self, cmd: &SimpleCommand) -> ParseResult<()> {
        let misordered: Vec<(String, usize)> = cmd
            .args
            .iter()
            .skip(1)
            .take_while(|a| a.text.starts_with(['-', '+']) && a.text != "--")
            .filter(|a| !typeset_order_ok(&a.text))
            .map(|a| (a.text.clone(), a.line))
            .collect();
        for (text, line) in misordered {
            self.lint(MessageKey::TypesetOrder, line, &[&text])?;
        }
        Ok(())
    }

    /// `break label` / `continue label` become `break n`.
    fn resolve_label(&mut self, cmd: &mut SimpleCommand) -> ParseResult<()> {
        let Some(arg) = cmd.args.get_mut(1) else {
            return Ok(());
        };
        if !arg.is_raw() || arg.text.starts_with(|c: char| c.is_ascii_digit()) {
            return Ok(());
        }
        let loop_depth = self.state.loop_depth;
        let offset = self
            .state
            .find_label(&arg.text)
            .map(|label| loop_depth as isize - label.depth as isize);
        match offset {
            Some(n) if n >= 1 => {
                arg.text = n.to_string();
                Ok(())
            }
            // a label outside any enclosing loop keeps its word
            Some(_) => Ok(()),
            None => {
                let (text, line) = (arg.text.clone(), arg.line);
                self.lint(MessageKey::UnknownLabel, line, &[&text])
            }
        }
    }

    fn check_set(&mut self, cmd: &SimpleCommand) -> ParseResult<()> {
        let Some(arg) = cmd.args.get(1) else {
            return Ok(());
        };
        let text = arg.text.as_str();
        if text.starts_with(['-', '+']) && (text.len() == 1 || text.contains('k')) {
            return self.lint(MessageKey::ObsoleteSet, arg.line, &[text]);
        }
        Ok(())
    }

    /// `test x` and `[ x ]` with one literal operand always give the same
    /// answer, except `-t` which means `-t 1`.
    fn check_test(&mut self, cmd: &mut SimpleCommand, argno: usize) -> ParseResult<()> {
        let bracket = cmd.name() == Some("[");
        let special = if bracket {
            3
        } else if cmd.builtin == Some(BuiltinKind::Test) {
            2
        } else {
            return Ok(());
        };
        let negated = cmd.args.get(1).map(|a| a.text.as_str()) == Some("!");
        let operand = if argno == special + 1 && negated {
            2
        } else if argno == special {
            1
        } else {
            return Ok(());
        };
        let line = cmd.line;
        if cmd.args.get(operand).map(|a| a.text.as_str()) != Some("-t") {
            return self.lint(MessageKey::InvariantTest, line, &[]);
        }
        let fd = Argument::raw("1", line);
        if bracket {
            let at = cmd.args.len() - 1;
            cmd.args.insert(at, fd);
        } else {
            cmd.args.push(fd);
        }
        self.lint(MessageKey::TestNeedsArgument, line, &[])
    }

    fn record_command(&mut self, cmd: &SimpleCommand, declaration: bool) -> ParseResult<()> {
        let Some(rec) = self.xref.as_mut() else {
            return Ok(());
        };
        let line = cmd.line;
        if !declaration {
            for name in cmd.assignments.iter().filter_map(Argument::assignment_name) {
                rec.variable(name.split('[').next().unwrap_or(name), line)?;
            }
        }
        let Some(name) = cmd.name() else {
            return Ok(());
        };
        rec.command(name, cmd.builtin.is_some(), line)?;
        if declaration || name == "read" {
            for arg in cmd.args.iter().skip(1).filter(|a| a.is_raw() && is_identifier(&a.text)) {
                rec.variable(&arg.text, line)?;
            }
        } else if cmd.builtin == Some(BuiltinKind::Dot) {
            if let Some(script) = cmd.args.get(1) {
                rec.dot(&script.text, line)?;
            }
        }
        Ok(())
    }
}
