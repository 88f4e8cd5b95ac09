//! Compound Assignment Parser
//!
//! `name=( ... )` is either an array literal, a compound variable whose
//! members are assignments and declarations, or empty. The first token inside
//! the parentheses decides which:
//!
//! ```text
//! a=()                    empty
//! a=(1 2 3)               array
//! a=([k]=v [j]=w)         array with subscripts
//! a=((1 2) (3 4))         array of arrays
//! c=(x=1 y=2)             compound
//! c=(typeset -i n=0)      compound
//! ```

use crate::ast::types::*;
use crate::parser::declarations::DeclarationShape;
use crate::parser::diagnostics::MessageKey;
use crate::parser::lexer::{LexFlags, TokenType};
use crate::parser::parser::{GrammarFlags, Parser};
use crate::parser::types::ParseResult;

/// `[key]=value` split into key and value.
fn split_subscript(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('[')?;
    let eq = assignment_split(text)?;
    let close = text[..eq].rfind(']')?;
    let value = &text[eq + 1..];
    Some((&rest[..close - 1], value))
}

fn element_word(token_kind: TokenType, mut arg: Argument) -> Argument {
    if token_kind == TokenType::Label {
        arg.text.push(':');
    }
    arg.flags.remove(ArgFlags::ASSIGNMENT | ArgFlags::APPEND);
    arg
}

impl Parser {
    /// Parse the parenthesized value of the assignment word `word`. The
    /// current token is `(`; on return it is the token after `)`, read with
    /// `after`.
    pub(crate) fn compound_assign(
        &mut self,
        word: Argument,
        shape: DeclarationShape,
        after: LexFlags,
    ) -> ParseResult<Argument> {
        self.descend()?;
        self.lex.compound_level += 1;
        let result = self.compound_value(word, shape);
        self.lex.compound_level = self.lex.compound_level.saturating_sub(1);
        self.ascend();
        let arg = result?;
        // the closing `)` is still current; what follows is outside the literal
        self.advance_with(after)?;
        Ok(arg)
    }

    fn compound_value(&mut self, word: Argument, shape: DeclarationShape) -> ParseResult<Argument> {
        let line = self.token.line;
        let Some(head) = word.text.strip_suffix('=') else {
            return Err(self.error(MessageKey::Unexpected, line, &["("]));
        };
        let (name, append) = match head.strip_suffix('+') {
            Some(name) => (name.to_string(), true),
            None => (head.to_string(), false),
        };
        let previous = self.state.open(TokenType::LParen, line);

        let inner = if shape.array {
            LexFlags::empty()
        } else {
            LexFlags::RESERVED | LexFlags::ASSIGN
        };
        self.advance_with(inner)?;
        self.skip_newlines_with(inner)?;

        let kind = self.compound_kind(&shape)?;
        let mut elements = Vec::new();
        match kind {
            CompoundKind::Empty => {}
            CompoundKind::Array => self.array_elements(&mut elements)?,
            CompoundKind::Compound => self.compound_members(&mut elements)?,
        }
        self.expect(TokenType::RParen)?;
        self.state.close(previous);
        log::trace!("compound assignment {} ({:?}, {} elements)", name, kind, elements.len());

        let mut flags = (word.flags & ArgFlags::QUOTED) | ArgFlags::ASSIGNMENT;
        if append {
            flags |= ArgFlags::APPEND;
        }
        if kind == CompoundKind::Array {
            flags |= ArgFlags::ARRAY;
        }
        let mut arg = Argument::new(word.text, flags, word.line);
        arg.payload = Some(Box::new(ArgPayload::Compound(CompoundAssignment {
            name,
            append,
            kind,
            elements,
            line,
        })));
        self.alloc()?;
        Ok(arg)
    }

    fn compound_kind(&mut self, shape: &DeclarationShape) -> ParseResult<CompoundKind> {
        let kind = match self.token.kind {
            TokenType::RParen => CompoundKind::Empty,
            TokenType::LParen => CompoundKind::Array,
            TokenType::Function => CompoundKind::Compound,
            TokenType::Word | TokenType::Label if shape.array => CompoundKind::Array,
            TokenType::Word => {
                let arg = self.token_arg();
                if arg.is_assignment() {
                    if arg.text.starts_with('[') {
                        CompoundKind::Array
                    } else {
                        CompoundKind::Compound
                    }
                } else if self.is_member_command(&arg) {
                    CompoundKind::Compound
                } else if shape.type_def || shape.compound {
                    return Err(self.syntax_error());
                } else {
                    CompoundKind::Array
                }
            }
            _ if self.token.arg.is_some() => CompoundKind::Array,
            _ => return Err(self.syntax_error()),
        };
        Ok(kind)
    }

    /// Declarations, `.` and `name()` definitions may appear inside a
    /// compound variable.
    fn is_member_command(&mut self, arg: &Argument) -> bool {
        if !arg.is_raw() {
            return false;
        }
        let declares = matches!(
            self.decls.lookup(&arg.text),
            Some(BuiltinKind::Declaration | BuiltinKind::Enum | BuiltinKind::Dot)
        );
        declares || self.lex.input.looking_at("()")
    }

    fn array_elements(&mut self, elements: &mut Vec<CompoundElement>) -> ParseResult<()> {
        let mut position = 0;
        let mut keyed = false;
        loop {
            let line = self.token.line;
            match self.token.kind {
                TokenType::RParen => return Ok(()),
                TokenType::Newline => {
                    self.advance_with(LexFlags::empty())?;
                }
                TokenType::LParen => {
                    if keyed {
                        return Err(self.syntax_error());
                    }
                    let word = Argument::raw(format!("[{}]=", position), line);
                    let value = self.compound_assign(word, DeclarationShape::default(), LexFlags::empty())?;
                    elements.push(CompoundElement::Indexed {
                        key: ElementKey::Position(position),
                        value,
                    });
                    position += 1;
                }
                kind if self.token.arg.is_some() && kind != TokenType::Expr => {
                    let arg = self.token_arg();
                    let subscript = if arg.is_assignment() { split_subscript(&arg.text) } else { None };
                    match subscript {
                        Some((key, value)) => {
                            if elements.is_empty() {
                                keyed = true;
                            }
                            let key = ElementKey::Subscript(key.to_string());
                            let empty = value.is_empty();
                            let value = Argument::new(value, arg.flags - (ArgFlags::ASSIGNMENT | ArgFlags::APPEND), line);
                            self.advance_with(LexFlags::empty())?;
                            let value = if empty && self.token.kind == TokenType::LParen {
                                self.compound_assign(arg, DeclarationShape::default(), LexFlags::empty())?
                            } else {
                                value
                            };
                            elements.push(CompoundElement::Indexed { key, value });
                        }
                        None => {
                            if keyed {
                                return Err(self.syntax_error());
                            }
                            elements.push(CompoundElement::Indexed {
                                key: ElementKey::Position(position),
                                value: element_word(kind, arg),
                            });
                            position += 1;
                            self.advance_with(LexFlags::empty())?;
                        }
                    }
                    self.alloc()?;
                }
                _ => return Err(self.syntax_error()),
            }
        }
    }

    fn compound_members(&mut self, elements: &mut Vec<CompoundElement>) -> ParseResult<()> {
        let member_flags = LexFlags::RESERVED | LexFlags::ASSIGN;
        loop {
            if self.token.kind == TokenType::RParen {
                return Ok(());
            }
            let member = match self.token.kind {
                TokenType::Function => self.function_definition()?,
                TokenType::Word => {
                    let arg = self.token_arg();
                    if !arg.is_assignment() && !self.is_member_command(&arg) {
                        return Err(self.syntax_error());
                    }
                    self.simple(GrammarFlags::NOIO | GrammarFlags::ASSIGN, Vec::new())?
                }
                _ => return Err(self.syntax_error()),
            };
            elements.push(CompoundElement::Member(member));
            match self.token.kind {
                TokenType::RParen => return Ok(()),
                TokenType::Newline | TokenType::Semicolon => {
                    self.advance_with(member_flags)?;
                    self.skip_newlines_with(member_flags)?;
                }
                _ => return Err(self.syntax_error()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(input: &str) -> CompoundAssignment {
        let mut parser = Parser::new();
        let program = parser.parse(input).unwrap();
        let Some(Node::Command(cmd)) = program.root else { panic!("expected command") };
        let arg = cmd.assignments.last().expect("assignment");
        arg.compound().cloned().expect("compound value")
    }

    fn values(c: &CompoundAssignment) -> Vec<(ElementKey, String)> {
        c.elements
            .iter()
            .map(|e| match e {
                CompoundElement::Indexed { key, value } => (key.clone(), value.text.clone()),
                CompoundElement::Member(_) => panic!("unexpected member"),
            })
            .collect()
    }

    #[test]
    fn test_indexed_array() {
        let c = assignment("a=(one 'two' $three)");
        assert_eq!(c.name, "a");
        assert_eq!(c.kind, CompoundKind::Array);
        assert_eq!(
            values(&c),
            vec![
                (ElementKey::Position(0), "one".to_string()),
                (ElementKey::Position(1), "'two'".to_string()),
                (ElementKey::Position(2), "$three".to_string()),
            ]
        );
    }

    #[test]
    fn test_subscripted_array() {
        let c = assignment("a=([x]=1\n  [y z]=2)");
        assert_eq!(c.kind, CompoundKind::Array);
        assert_eq!(
            values(&c),
            vec![
                (ElementKey::Subscript("x".to_string()), "1".to_string()),
                (ElementKey::Subscript("y z".to_string()), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_mixed_keys_rejected() {
        let mut parser = Parser::new();
        assert!(parser.parse("a=([x]=1 2)").is_err());
    }

    #[test]
    fn test_nested_arrays() {
        let c = assignment("a=((1 2) (3))");
        assert_eq!(c.elements.len(), 2);
        let CompoundElement::Indexed { key, value } = &c.elements[1] else { panic!("expected element") };
        assert_eq!(key, &ElementKey::Position(1));
        assert_eq!(value.text, "[1]=");
        assert_eq!(value.compound().map(|n| n.elements.len()), Some(1));
    }

    #[test]
    fn test_empty_and_append() {
        let c = assignment("a=()");
        assert_eq!(c.kind, CompoundKind::Empty);
        assert!(c.elements.is_empty());

        let mut parser = Parser::new();
        let program = parser.parse("a+=(x)").unwrap();
        let Some(Node::Command(cmd)) = program.root else { panic!("expected command") };
        let arg = &cmd.assignments[0];
        assert!(arg.flags.contains(ArgFlags::APPEND | ArgFlags::ARRAY | ArgFlags::ASSIGNMENT));
        assert!(arg.compound().is_some_and(|c| c.append && c.name == "a"));
    }

    #[test]
    fn test_compound_members() {
        let c = assignment("p=(x=1 y=2; typeset -i n=3\n)");
        assert_eq!(c.kind, CompoundKind::Compound);
        assert_eq!(c.elements.len(), 2);
        let CompoundElement::Member(Node::Command(first)) = &c.elements[0] else { panic!("expected member") };
        assert_eq!(first.assignments.len(), 2);
        let CompoundElement::Member(Node::Command(second)) = &c.elements[1] else { panic!("expected member") };
        assert_eq!(second.builtin, Some(BuiltinKind::Declaration));
    }

    #[test]
    fn test_nested_compound_member() {
        let c = assignment("p=(q=(r=1))");
        let CompoundElement::Member(Node::Command(member)) = &c.elements[0] else { panic!("expected member") };
        let inner = member.assignments[0].compound().expect("nested value");
        assert_eq!(inner.name, "q");
        assert_eq!(inner.kind, CompoundKind::Compound);
    }

    #[test]
    fn test_discipline_function_member() {
        let c = assignment("p=(get() { :; }; x=1)");
        assert_eq!(c.kind, CompoundKind::Compound);
        assert_eq!(c.elements.len(), 2);
        assert!(matches!(&c.elements[0], CompoundElement::Member(Node::Function(f)) if f.name == "get"));
    }

    #[test]
    fn test_declared_array_keeps_words() {
        let mut parser = Parser::new();
        let program = parser.parse("typeset -a a=(x=1 y)").unwrap();
        let Some(Node::Command(cmd)) = program.root else { panic!("expected command") };
        let c = cmd.assignments[0].compound().expect("array value");
        assert_eq!(c.kind, CompoundKind::Array);
        assert_eq!(values(c)[0].1, "x=1");
        assert_eq!(cmd.args[2].text, "a");
    }

    #[test]
    fn test_compound_requires_members() {
        let mut parser = Parser::new();
        assert!(parser.parse("compound c=(a b)").is_err());
        assert!(parser.parse("c=(x=1; ls)").is_err());
    }

    #[test]
    fn test_unterminated_literal() {
        let mut parser = Parser::new();
        let err = parser.parse("a=(1 2").unwrap_err();
        assert!(err.to_string().contains("`(' unmatched"), "{}", err);
    }

    #[test]
    fn test_command_after_literal() {
        let mut parser = Parser::new();
        let program = parser.parse("a=(1) b=2 cmd arg").unwrap();
        let Some(Node::Command(cmd)) = program.root else { panic!("expected command") };
        assert_eq!(cmd.assignments.len(), 2);
        assert_eq!(cmd.name(), Some("cmd"));
    }
}
