//! Conditional Expression Parser
//!
//! Handles parsing of `[[ ... ]]` conditional commands.
//!
//! The lexer is in test mode between `[[` and `]]`: `<` and `>` are
//! comparison tokens, `!` is a word, and `]]` ends the expression. Newlines
//! may appear around operands.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::ast::types::*;
use crate::parser::diagnostics::MessageKey;
use crate::parser::lexer::{LexFlags, TokenType};
use crate::parser::parser::Parser;
use crate::parser::types::ParseResult;

/// Letters of the unary file and string tests (`-f file`, `-z str`, ...).
const UNARY_OPS: &str = "abcdefghknoprstuvwxzGLNOSR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    /// `=` or `==`: string or pattern match depending on the right side.
    Equal,
    NotEqual,
    /// `=~`
    Regex,
    Compare(CondBinaryOperator),
}

lazy_static! {
    static ref BINARY_OPS: HashMap<&'static str, BinaryOp> = {
        use CondBinaryOperator::*;
        let mut m = HashMap::new();
        m.insert("=", BinaryOp::Equal);
        m.insert("==", BinaryOp::Equal);
        m.insert("!=", BinaryOp::NotEqual);
        m.insert("=~", BinaryOp::Regex);
        m.insert("-eq", BinaryOp::Compare(NumEq));
        m.insert("-ne", BinaryOp::Compare(NumNe));
        m.insert("-lt", BinaryOp::Compare(NumLt));
        m.insert("-le", BinaryOp::Compare(NumLe));
        m.insert("-gt", BinaryOp::Compare(NumGt));
        m.insert("-ge", BinaryOp::Compare(NumGe));
        m.insert("-nt", BinaryOp::Compare(Nt));
        m.insert("-ot", BinaryOp::Compare(Ot));
        m.insert("-ef", BinaryOp::Compare(Ef));
        m
    };
}

fn unary_op(arg: &Argument) -> Option<char> {
    if !arg.is_raw() {
        return None;
    }
    let mut chars = arg.text.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('-'), Some(c), None) if UNARY_OPS.contains(c) => Some(c),
        _ => None,
    }
}

fn binary_op(arg: &Argument) -> Option<BinaryOp> {
    if !arg.is_raw() {
        return None;
    }
    BINARY_OPS.get(arg.text.as_str()).copied()
}

fn non_empty(operand: Argument, line: usize) -> CondExpr {
    CondExpr::Unary(CondUnaryNode {
        operator: 'n',
        operand,
        line,
    })
}

impl Parser {
    /// `[[ expr ]]`
    pub(crate) fn test_command(&mut self) -> ParseResult<Node> {
        let line = self.token.line;
        self.advance()?;
        let expr = self.test_or()?;
        self.expect(TokenType::DBrackEnd)?;
        self.advance()?;
        self.alloc()?;
        Ok(Node::Test(TestNode { expr, line }))
    }

    fn test_or(&mut self) -> ParseResult<CondExpr> {
        let mut links = 0;
        let result = self.test_chain(TokenType::OrOr, &mut links);
        for _ in 0..links {
            self.ascend();
        }
        result
    }

    fn test_and(&mut self) -> ParseResult<CondExpr> {
        let mut links = 0;
        let result = self.test_chain(TokenType::AndAnd, &mut links);
        for _ in 0..links {
            self.ascend();
        }
        result
    }

    /// `x op y op z`, left associative; each `op` nests one level deeper.
    fn test_chain(&mut self, op: TokenType, links: &mut usize) -> ParseResult<CondExpr> {
        let mut left = self.test_operand(op)?;
        while self.token.kind == op {
            self.descend()?;
            *links += 1;
            self.advance()?;
            let right = self.test_operand(op)?;
            left = if op == TokenType::OrOr {
                CondExpr::Or(Box::new(left), Box::new(right))
            } else {
                CondExpr::And(Box::new(left), Box::new(right))
            };
        }
        Ok(left)
    }

    fn test_operand(&mut self, op: TokenType) -> ParseResult<CondExpr> {
        if op == TokenType::OrOr {
            self.test_and()
        } else {
            self.required_primary()
        }
    }

    fn required_primary(&mut self) -> ParseResult<CondExpr> {
        match self.test_primary()? {
            Some(expr) => Ok(expr),
            None => Err(self.syntax_error()),
        }
    }

    fn test_primary(&mut self) -> ParseResult<Option<CondExpr>> {
        self.descend()?;
        let result = self.test_primary_inner();
        self.ascend();
        result
    }

    fn test_primary_inner(&mut self) -> ParseResult<Option<CondExpr>> {
        self.skip_newlines()?;
        let expr = match self.token.kind {
            TokenType::LParen => {
                self.advance()?;
                let inner = self.test_or()?;
                self.expect(TokenType::RParen)?;
                self.advance()?;
                CondExpr::Group(Box::new(inner))
            }
            TokenType::Word if self.token.arg.as_ref().is_some_and(|a| a.is_raw() && a.text == "!") => {
                self.advance()?;
                let inner = self.required_primary()?;
                // `! ! x` is `x`
                return Ok(Some(match inner {
                    CondExpr::Not(e) => *e,
                    e => CondExpr::Not(Box::new(e)),
                }));
            }
            TokenType::Word => self.test_operands()?,
            _ => return Ok(None),
        };
        self.skip_newlines()?;
        Ok(Some(expr))
    }

    /// Unary test, binary test, or a lone word meaning `-n word`.
    fn test_operands(&mut self) -> ParseResult<CondExpr> {
        let left = self.token_arg();
        let line = left.line;
        self.advance()?;

        if let Some(op) = unary_op(&left) {
            match self.token.kind {
                TokenType::DBrackEnd | TokenType::AndAnd | TokenType::OrOr | TokenType::RParen => {
                    return Ok(non_empty(left, line));
                }
                TokenType::Word if self.token.arg.as_ref().and_then(binary_op).is_none() => {
                    let operand = self.token_arg();
                    self.advance()?;
                    return Ok(CondExpr::Unary(CondUnaryNode {
                        operator: op,
                        operand,
                        line,
                    }));
                }
                // `-x op y` compares the word `-x`
                _ => {}
            }
        }

        let op = match self.token.kind {
            TokenType::Less => BinaryOp::Compare(CondBinaryOperator::StrLt),
            TokenType::Great => BinaryOp::Compare(CondBinaryOperator::StrGt),
            TokenType::Word => match self.token.arg.as_ref().and_then(binary_op) {
                Some(op) => op,
                None => return Err(self.syntax_error()),
            },
            TokenType::DBrackEnd | TokenType::AndAnd | TokenType::OrOr | TokenType::RParen | TokenType::Newline => {
                return Ok(non_empty(left, line));
            }
            _ => return Err(self.syntax_error()),
        };
        if op == BinaryOp::Regex {
            self.lex.flags.insert(LexFlags::REGEX);
        }
        self.advance()?;
        self.skip_newlines()?;
        if self.token.kind != TokenType::Word {
            return Err(self.syntax_error());
        }
        let mut right = self.token_arg();
        self.advance()?;

        let operator = match op {
            BinaryOp::Equal if right.is_raw() => CondBinaryOperator::StrEq,
            BinaryOp::Equal => CondBinaryOperator::PatEq,
            BinaryOp::NotEqual if right.is_raw() => CondBinaryOperator::StrNe,
            BinaryOp::NotEqual => CondBinaryOperator::PatNe,
            BinaryOp::Regex => {
                self.check_regex(&right)?;
                right.text = format!("~(E){}", right.text);
                right.flags.remove(ArgFlags::RAW);
                right.flags.insert(ArgFlags::EXP);
                CondBinaryOperator::PatEq
            }
            BinaryOp::Compare(op) => op,
        };
        Ok(CondExpr::Binary(CondBinaryNode {
            operator,
            left,
            right,
            line,
        }))
    }

    /// Literal regular expressions are compiled once to catch mistakes early.
    fn check_regex(&mut self, pattern: &Argument) -> ParseResult<()> {
        if !self.options.lint_enabled() || pattern.flags.intersects(ArgFlags::QUOTED | ArgFlags::MACRO) {
            return Ok(());
        }
        if let Err(e) = regex_lite::Regex::new(&pattern.text) {
            log::debug!("regex {:?} rejected: {}", pattern.text, e);
            self.lint(MessageKey::BadRegex, pattern.line, &[&pattern.text])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LintPolicy, ParseOptions};
    use crate::parser::types::{ParseError, ResourceError};

    fn test_expr(input: &str) -> CondExpr {
        let mut parser = Parser::new();
        match parser.parse(input).unwrap().root.unwrap() {
            Node::Test(test) => test.expr,
            other => panic!("expected test, got {}", other.kind_name()),
        }
    }

    fn binary(expr: &CondExpr) -> &CondBinaryNode {
        match expr {
            CondExpr::Binary(b) => b,
            other => panic!("expected binary test, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_file_test() {
        let CondExpr::Unary(u) = test_expr("[[ -f /etc/passwd ]]") else { panic!("expected unary") };
        assert_eq!(u.operator, 'f');
        assert_eq!(u.operand.text, "/etc/passwd");
    }

    #[test]
    fn test_lone_word_is_non_empty_test() {
        let CondExpr::Unary(u) = test_expr("[[ $x ]]") else { panic!("expected unary") };
        assert_eq!(u.operator, 'n');
        let CondExpr::Unary(u) = test_expr("[[ -z ]]") else { panic!("expected unary") };
        assert_eq!((u.operator, u.operand.text.as_str()), ('n', "-z"));
    }

    #[test]
    fn test_string_and_pattern_equality() {
        assert_eq!(binary(&test_expr("[[ $a == b ]]")).operator, CondBinaryOperator::StrEq);
        assert_eq!(binary(&test_expr("[[ $a = b* ]]")).operator, CondBinaryOperator::PatEq);
        assert_eq!(binary(&test_expr("[[ $a != b ]]")).operator, CondBinaryOperator::StrNe);
        assert_eq!(binary(&test_expr("[[ $a != @(x|y) ]]")).operator, CondBinaryOperator::PatNe);
    }

    #[test]
    fn test_numeric_and_file_comparisons() {
        assert_eq!(binary(&test_expr("[[ a -eq 1 ]]")).operator, CondBinaryOperator::NumEq);
        assert_eq!(binary(&test_expr("[[ a -ge 1 ]]")).operator, CondBinaryOperator::NumGe);
        assert_eq!(binary(&test_expr("[[ a -nt b ]]")).operator, CondBinaryOperator::Nt);
        assert_eq!(binary(&test_expr("[[ a < b ]]")).operator, CondBinaryOperator::StrLt);
        assert_eq!(binary(&test_expr("[[ a > b ]]")).operator, CondBinaryOperator::StrGt);
    }

    #[test]
    fn test_dash_word_as_left_operand() {
        let b = test_expr("[[ -a == -a ]]");
        assert_eq!(binary(&b).left.text, "-a");
    }

    #[test]
    fn test_regex_match() {
        let b = test_expr("[[ $x =~ ^ab+ ]]");
        let b = binary(&b);
        assert_eq!(b.operator, CondBinaryOperator::PatEq);
        assert_eq!(b.right.text, "~(E)^ab+");
        assert!(b.right.flags.contains(ArgFlags::EXP));
        assert!(!b.right.is_raw());
    }

    #[test]
    fn test_bad_regex_warns() {
        let mut parser = Parser::with_options(ParseOptions::default().with_lint(LintPolicy::Warn));
        parser.parse("[[ $x =~ *a ]]").unwrap();
        assert!(parser.diagnostics().iter().any(|d| d.key == MessageKey::BadRegex));
    }

    #[test]
    fn test_logical_structure() {
        let expr = test_expr("[[ a < b && ! c -nt d || ( e ) ]]");
        let CondExpr::Or(left, right) = expr else { panic!("expected or") };
        let CondExpr::And(lt, not) = *left else { panic!("expected and") };
        assert_eq!(binary(&lt).operator, CondBinaryOperator::StrLt);
        let CondExpr::Not(nt) = *not else { panic!("expected not") };
        assert_eq!(binary(&nt).operator, CondBinaryOperator::Nt);
        assert!(matches!(*right, CondExpr::Group(_)));
    }

    #[test]
    fn test_long_chain_hits_depth_limit() {
        let expr = test_expr(&format!("[[ a{} ]]", " && a".repeat(50)));
        assert!(matches!(expr, CondExpr::And(_, _)));
        let mut parser = Parser::new();
        let err = parser.parse(&format!("[[ a{} ]]", " || a".repeat(5000))).unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::RecursionLimit { .. })));
        assert!(parser.parse("[[ a || b ]]").is_ok());
    }

    #[test]
    fn test_double_negation_cancels() {
        let CondExpr::Unary(u) = test_expr("[[ ! ! -e x ]]") else { panic!("expected unary") };
        assert_eq!(u.operator, 'e');
    }

    #[test]
    fn test_newlines_inside() {
        let expr = test_expr("[[ a &&\n  b\n]]");
        assert!(matches!(expr, CondExpr::And(_, _)));
    }

    #[test]
    fn test_errors() {
        let mut parser = Parser::new();
        let err = parser.parse("[[ ]]").unwrap_err();
        assert!(err.to_string().contains("`]]' unexpected"));
        let err = parser.parse("[[ a == b").unwrap_err();
        assert!(err.to_string().contains("`[[' unmatched"));
        assert!(parser.parse("[[ a -frob b ]]").is_err());
    }
}
