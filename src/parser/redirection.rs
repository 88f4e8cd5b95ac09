//! Redirection Parser
//!
//! Reads the redirections at the current position. The operator token carries
//! its descriptor (`2>`) or variable (`{fd}>`) prefix; the target is the next
//! token.

use crate::ast::types::*;
use crate::parser::lexer::{LexFlags, TokenType};
use crate::parser::parser::{GrammarFlags, Parser};
use crate::parser::types::ParseResult;

fn redirection_op(kind: TokenType) -> (IoOp, IoFlags) {
    use TokenType::*;
    match kind {
        Great | AndGreat => (IoOp::Output, IoFlags::empty()),
        DGreat | AndDGreat => (IoOp::Append, IoFlags::empty()),
        DLess => (IoOp::HereDoc, IoFlags::empty()),
        DLessDash => (IoOp::HereDoc, IoFlags::STRIP_TABS),
        TLess => (IoOp::HereString, IoFlags::empty()),
        LessAnd => (IoOp::DupInput, IoFlags::empty()),
        GreatAnd => (IoOp::DupOutput, IoFlags::empty()),
        LessGreat => (IoOp::ReadWrite, IoFlags::empty()),
        LessGreatSemi => (IoOp::ReadWrite, IoFlags::REWRITE),
        Clobber => (IoOp::Clobber, IoFlags::empty()),
        GreatSemi => (IoOp::Output, IoFlags::REWRITE),
        LessSharp | GreatSharp => (IoOp::Seek, IoFlags::empty()),
        LessDSharp => (IoOp::Seek, IoFlags::SEEK_COPY),
        _ => (IoOp::Input, IoFlags::empty()),
    }
}

/// `<(...)` may feed an input redirection, `>(...)` an output one.
fn accepts_procsub(op: IoOp, flags: IoFlags, kind: TokenType) -> bool {
    if flags.contains(IoFlags::REWRITE) {
        return false;
    }
    match op {
        IoOp::Input | IoOp::ReadWrite => kind == TokenType::ProcIn,
        IoOp::Output | IoOp::Append | IoOp::Clobber => kind == TokenType::ProcOut,
        _ => false,
    }
}

/// Here-document delimiter with its quoting removed.
pub(crate) fn unquote(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (None, '\'') | (None, '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => out.push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            (_, c) => out.push(c),
        }
    }
    out
}

impl Parser {
    /// Append redirections to `io` while the current token is an operator.
    /// `after` are the lexer flags for the token following the last target.
    pub(crate) fn inout(&mut self, io: &mut Vec<IoNode>, after: LexFlags) -> ParseResult<()> {
        while self.token.kind.is_redirection() {
            let kind = self.token.kind;
            let (op, mut flags) = redirection_op(kind);
            let fd = self.token.fd.unwrap_or(match kind {
                TokenType::GreatSharp | TokenType::AndGreat | TokenType::AndDGreat => 1,
                _ => op.default_fd(),
            });
            let var = self.token.var.clone();
            let line = self.token.line;

            let target_flags = if op == IoOp::Seek { LexFlags::EXPR } else { LexFlags::empty() };
            self.advance_with(target_flags)?;
            let target = match self.token.kind {
                TokenType::Word => self.word_target(op, &mut flags)?,
                TokenType::Expr if op == IoOp::Seek => {
                    flags |= IoFlags::ARITH;
                    IoTarget::Arithmetic(self.token_arg())
                }
                // `$(<#)` seeks to the current offset
                TokenType::RParen if op == IoOp::Seek && self.in_comsub => {
                    flags |= IoFlags::CURRENT | IoFlags::ARITH;
                    let mut node = AST::io(fd, op, flags, IoTarget::None, line);
                    node.var = var;
                    io.push(node);
                    self.alloc()?;
                    return Ok(());
                }
                TokenType::ProcIn | TokenType::ProcOut if accepts_procsub(op, flags, self.token.kind) => {
                    flags |= IoFlags::PROCSUB;
                    IoTarget::ProcessSubstitution(Box::new(self.process_substitution()?))
                }
                _ => return Err(self.syntax_error()),
            };
            self.record_redirection(op, &target, line)?;

            let mut node = AST::io(fd, op, flags, target, line);
            node.var = var;
            io.push(node);
            self.alloc()?;
            if matches!(kind, TokenType::AndGreat | TokenType::AndDGreat) {
                let stdout = IoTarget::Word(Argument::raw("1", line));
                io.push(AST::io(2, IoOp::DupOutput, IoFlags::RAW, stdout, line));
                self.alloc()?;
            }
            self.advance_with(after)?;
        }
        Ok(())
    }

    fn word_target(&mut self, op: IoOp, flags: &mut IoFlags) -> ParseResult<IoTarget> {
        let mut arg = self.token_arg();
        match op {
            IoOp::HereDoc => {
                let delimiter = unquote(&arg.text);
                if arg.flags.contains(ArgFlags::QUOTED) || delimiter != arg.text {
                    *flags |= IoFlags::QUOTED;
                }
                *flags |= IoFlags::RAW;
                let id = self.lex.queue_heredoc(&delimiter, flags.contains(IoFlags::STRIP_TABS));
                Ok(IoTarget::HereDoc(HereDocRef { id, delimiter }))
            }
            IoOp::DupInput | IoOp::DupOutput => {
                if arg.text.len() > 1 && arg.text.ends_with('-') {
                    *flags |= IoFlags::MOVE;
                    arg.text.pop();
                }
                if arg.is_raw() {
                    *flags |= IoFlags::RAW;
                }
                Ok(IoTarget::Word(arg))
            }
            _ => {
                if arg.is_raw() {
                    *flags |= IoFlags::RAW;
                }
                Ok(IoTarget::Word(arg))
            }
        }
    }

    fn record_redirection(&mut self, op: IoOp, target: &IoTarget, line: usize) -> ParseResult<()> {
        let Some(rec) = self.xref.as_mut() else {
            return Ok(());
        };
        let (name, mode) = match (op, target) {
            (IoOp::HereDoc, IoTarget::HereDoc(doc)) => (doc.delimiter.as_str(), 'h'),
            (IoOp::DupInput | IoOp::DupOutput | IoOp::HereString, _) => return Ok(()),
            (IoOp::Output | IoOp::Clobber, IoTarget::Word(arg)) => (arg.text.as_str(), 'w'),
            (IoOp::Append, IoTarget::Word(arg)) => (arg.text.as_str(), 'a'),
            (_, IoTarget::Word(arg)) => (arg.text.as_str(), 'r'),
            _ => return Ok(()),
        };
        rec.file(name, line, mode)?;
        Ok(())
    }

    /// `<( list )` or `>( list )`. Leaves the closing `)` as the current token.
    pub(crate) fn process_substitution(&mut self) -> ParseResult<Node> {
        let output = self.token.kind == TokenType::ProcOut;
        let previous = self.state.open(self.token.kind, self.token.line);
        self.advance_with(LexFlags::COMMAND_START)?;
        let body = self
            .sh_cmd(Some(TokenType::RParen), GrammarFlags::NL)?
            .ok_or_else(|| self.syntax_error())?;
        self.state.close(previous);
        let flags = if output {
            ForkFlags::PIPE_IN | ForkFlags::BACKGROUND | ForkFlags::PIPE_CLOSE
        } else {
            ForkFlags::PIPE_OUT
        };
        self.alloc()?;
        Ok(AST::fork(flags, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(input: &str) -> SimpleCommand {
        let mut parser = Parser::new();
        match parser.parse(input).unwrap().root.unwrap() {
            Node::Command(cmd) => cmd,
            other => panic!("expected command, got {}", other.kind_name()),
        }
    }

    fn target_text(io: &IoNode) -> &str {
        match &io.target {
            IoTarget::Word(arg) | IoTarget::Arithmetic(arg) => &arg.text,
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_basic_redirections() {
        let cmd = command("cmd < in > out 2>> log");
        let ops: Vec<(i32, IoOp)> = cmd.io.iter().map(|io| (io.fd, io.op)).collect();
        assert_eq!(ops, vec![(0, IoOp::Input), (1, IoOp::Output), (2, IoOp::Append)]);
        assert_eq!(target_text(&cmd.io[2]), "log");
        assert!(cmd.io[0].flags.contains(IoFlags::RAW));
    }

    #[test]
    fn test_oversized_descriptor_stays_an_argument() {
        let cmd = command("cmd 99999999999>out");
        let args: Vec<&str> = cmd.args.iter().map(|a| a.text.as_str()).collect();
        assert_eq!(args, vec!["cmd", "99999999999"]);
        assert_eq!(cmd.io.len(), 1);
        assert_eq!((cmd.io[0].fd, cmd.io[0].op), (1, IoOp::Output));
        assert_eq!(target_text(&cmd.io[0]), "out");
    }

    #[test]
    fn test_redirection_before_command() {
        let cmd = command("> out echo hi");
        assert_eq!(cmd.name(), Some("echo"));
        assert_eq!(cmd.io.len(), 1);
    }

    #[test]
    fn test_rewrite_and_clobber() {
        let cmd = command("cmd >; a >| b <>; c");
        assert_eq!(cmd.io[0].op, IoOp::Output);
        assert!(cmd.io[0].flags.contains(IoFlags::REWRITE));
        assert_eq!(cmd.io[1].op, IoOp::Clobber);
        assert_eq!(cmd.io[2].op, IoOp::ReadWrite);
        assert!(cmd.io[2].flags.contains(IoFlags::REWRITE));
    }

    #[test]
    fn test_duplicate_and_move() {
        let cmd = command("cmd 2>&1 3<&4-");
        assert_eq!((cmd.io[0].fd, cmd.io[0].op), (2, IoOp::DupOutput));
        assert_eq!(target_text(&cmd.io[0]), "1");
        assert_eq!((cmd.io[1].fd, cmd.io[1].op), (3, IoOp::DupInput));
        assert!(cmd.io[1].flags.contains(IoFlags::MOVE));
        assert_eq!(target_text(&cmd.io[1]), "4");
    }

    #[test]
    fn test_and_great_adds_stderr() {
        let cmd = command("cmd &> all");
        assert_eq!(cmd.io.len(), 2);
        assert_eq!((cmd.io[0].fd, cmd.io[0].op), (1, IoOp::Output));
        assert_eq!((cmd.io[1].fd, cmd.io[1].op), (2, IoOp::DupOutput));
        assert_eq!(target_text(&cmd.io[1]), "1");
    }

    #[test]
    fn test_variable_descriptor() {
        let cmd = command("exec {fd}> file");
        assert_eq!(cmd.io[0].var.as_deref(), Some("fd"));
        assert_eq!(cmd.builtin, Some(BuiltinKind::Exec));
    }

    #[test]
    fn test_seek() {
        let cmd = command("cmd <#((10)) <## pat >#((0))");
        assert_eq!(cmd.io[0].op, IoOp::Seek);
        assert!(cmd.io[0].flags.contains(IoFlags::ARITH));
        assert!(cmd.io[1].flags.contains(IoFlags::SEEK_COPY));
        assert_eq!(target_text(&cmd.io[1]), "pat");
        assert_eq!(cmd.io[2].fd, 1);
    }

    #[test]
    fn test_heredoc_quoted_strip() {
        let mut parser = Parser::new();
        let program = parser.parse("cat <<-'EOF'\n\tline\n\tEOF\n").unwrap();
        let Some(Node::Command(cmd)) = &program.root else { panic!("expected command") };
        let io = &cmd.io[0];
        assert!(io.flags.contains(IoFlags::STRIP_TABS | IoFlags::QUOTED));
        let IoTarget::HereDoc(doc) = &io.target else { panic!("expected here-doc") };
        assert_eq!(doc.delimiter, "EOF");
        assert_eq!(program.heredocs.body(doc.id), Some("line\n"));
    }

    #[test]
    fn test_unterminated_heredoc() {
        let mut parser = Parser::new();
        assert!(parser.parse("cat <<EOF\nnever closed\n").is_err());
    }

    #[test]
    fn test_process_substitution_argument() {
        let cmd = command("diff <(sort a) <(sort b)");
        assert_eq!(cmd.args.len(), 3);
        assert!(cmd.needs_expansion);
        match cmd.args[1].payload.as_deref() {
            Some(ArgPayload::ProcessSubstitution(node)) => {
                let Node::Fork(fork) = node.as_ref() else { panic!("expected fork") };
                assert_eq!(fork.flags, ForkFlags::PIPE_OUT);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_process_substitution_target() {
        let cmd = command("cmd > >(wc -l)");
        assert!(cmd.io[0].flags.contains(IoFlags::PROCSUB));
        let IoTarget::ProcessSubstitution(node) = &cmd.io[0].target else { panic!("expected procsub") };
        let Node::Fork(fork) = node.as_ref() else { panic!("expected fork") };
        assert!(fork.flags.contains(ForkFlags::BACKGROUND | ForkFlags::PIPE_IN));
    }

    #[test]
    fn test_missing_target() {
        let mut parser = Parser::new();
        assert!(parser.parse("cmd >").is_err());
        assert!(parser.parse("cmd < <(a) >; >(b)").is_err());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'EOF'"), "EOF");
        assert_eq!(unquote("\"E\"OF"), "EOF");
        assert_eq!(unquote("\\EOF"), "EOF");
        assert_eq!(unquote("E'\\'"), "E\\");
    }
}
