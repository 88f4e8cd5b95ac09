//! Arithmetic Expression Compiler
//!
//! Compiles the text of `(( ... ))` and of the arithmetic `for` header into an
//! [`ArithExpr`] tree when the text needs no expansion:
//! - `i = (2 + 3) * 4`
//! - `x++, y--`
//! - `a ? b : c`
//! - `16#ff`, `0x1F`, `1.5e3`
//!
//! One function per precedence level, lowest first. Each takes the input and
//! a byte position and returns the parsed node plus the position after it.
//! Nesting through parentheses, subscripts, unary operators and chained
//! assignments is bounded by a depth limit.

use std::cell::Cell;

use thiserror::Error;

use crate::ast::types::*;
use crate::parser::diagnostics::MessageKey;
use crate::parser::types::MAX_PARSER_DEPTH;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithError {
    /// The offending text and its byte offset.
    #[error("{}", MessageKey::ArithSyntax.format(&[text.as_str()]))]
    Syntax { text: String, offset: usize },
    #[error("arithmetic nesting exceeds {limit} levels")]
    TooDeep { limit: usize, offset: usize },
}

impl ArithError {
    /// Text at which compilation stopped.
    pub fn text(&self) -> &str {
        match self {
            ArithError::Syntax { text, .. } => text,
            ArithError::TooDeep { .. } => "",
        }
    }
}

type ArithResult<T> = Result<T, ArithError>;

fn error_at(input: &str, pos: usize) -> ArithError {
    let rest = input.get(pos..).unwrap_or("").trim();
    ArithError::Syntax {
        text: if rest.is_empty() { input.trim().to_string() } else { rest.to_string() },
        offset: pos,
    }
}

/// Assignment operators, longest first so `<<=` wins over `<`.
const ASSIGN_OPS: &[(&str, ArithAssignmentOperator)] = &[
    ("<<=", ArithAssignmentOperator::LShiftAssign),
    (">>=", ArithAssignmentOperator::RShiftAssign),
    ("+=", ArithAssignmentOperator::AddAssign),
    ("-=", ArithAssignmentOperator::SubAssign),
    ("*=", ArithAssignmentOperator::MulAssign),
    ("/=", ArithAssignmentOperator::DivAssign),
    ("%=", ArithAssignmentOperator::ModAssign),
    ("&=", ArithAssignmentOperator::AndAssign),
    ("|=", ArithAssignmentOperator::OrAssign),
    ("^=", ArithAssignmentOperator::XorAssign),
    ("=", ArithAssignmentOperator::Assign),
];

/// Compile arithmetic text. `posix` makes a leading `0` mean octal.
pub fn compile(input: &str, posix: bool) -> ArithResult<ArithExpr> {
    compile_limited(input, posix, MAX_PARSER_DEPTH)
}

/// [`compile`] with an explicit nesting limit.
pub fn compile_limited(input: &str, posix: bool, max_depth: usize) -> ArithResult<ArithExpr> {
    if !input.is_ascii() {
        return Err(error_at(input, 0));
    }
    let ctx = Ctx {
        input,
        posix,
        depth: Cell::new(0),
        max_depth,
    };
    let start = skip_ws(input, 0);
    if start >= input.len() {
        return Err(error_at(input, start));
    }
    let (expr, pos) = ctx.comma(start)?;
    let pos = skip_ws(input, pos);
    if pos < input.len() {
        return Err(error_at(input, pos));
    }
    Ok(expr)
}

fn skip_ws(input: &str, mut pos: usize) -> usize {
    let bytes = input.as_bytes();
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    pos
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'.'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn binary(operator: ArithBinaryOperator, left: ArithExpr, right: ArithExpr) -> ArithExpr {
    ArithExpr::Binary(Box::new(ArithBinaryNode { operator, left, right }))
}

struct Ctx<'a> {
    input: &'a str,
    posix: bool,
    depth: Cell<usize>,
    max_depth: usize,
}

impl<'a> Ctx<'a> {
    fn deepen(&self, pos: usize) -> ArithResult<()> {
        let depth = self.depth.get();
        if depth >= self.max_depth {
            return Err(ArithError::TooDeep {
                limit: self.max_depth,
                offset: pos,
            });
        }
        self.depth.set(depth + 1);
        Ok(())
    }

    /// Run `parse` one nesting level down.
    fn nested<T>(&self, pos: usize, parse: impl FnOnce() -> ArithResult<T>) -> ArithResult<T> {
        let depth = self.depth.get();
        self.deepen(pos)?;
        let result = parse();
        self.depth.set(depth);
        result
    }

    fn rest(&self, pos: usize) -> &'a str {
        self.input.get(pos..).unwrap_or("")
    }

    fn byte(&self, pos: usize) -> Option<u8> {
        self.input.as_bytes().get(pos).copied()
    }

    /// Operand required at `pos`.
    fn expect_operand(&self, pos: usize) -> ArithResult<usize> {
        let pos = skip_ws(self.input, pos);
        if pos >= self.input.len() {
            return Err(error_at(self.input, pos));
        }
        Ok(pos)
    }

    fn comma(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::assign, |s| {
            s.starts_with(',').then_some((ArithBinaryOperator::Comma, 1))
        })
    }

    fn assign(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let (left, next) = self.ternary(pos)?;
        let after = skip_ws(self.input, next);
        let ArithExpr::Variable(target) = &left else {
            return Ok((left, next));
        };
        let rest = self.rest(after);
        for (text, operator) in ASSIGN_OPS {
            if rest.starts_with(text) && !(*text == "=" && rest.starts_with("==")) {
                let start = self.expect_operand(after + text.len())?;
                let (value, end) = self.nested(start, || self.assign(start))?;
                return Ok((
                    ArithExpr::Assignment(Box::new(ArithAssignmentNode {
                        operator: *operator,
                        target: target.clone(),
                        value,
                    })),
                    end,
                ));
            }
        }
        Ok((left, next))
    }

    fn ternary(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let (condition, next) = self.logical_or(pos)?;
        let pos = skip_ws(self.input, next);
        if self.byte(pos) != Some(b'?') {
            return Ok((condition, next));
        }
        let start = self.expect_operand(pos + 1)?;
        let (consequent, next) = self.nested(start, || self.assign(start))?;
        let pos = skip_ws(self.input, next);
        if self.byte(pos) != Some(b':') {
            return Err(error_at(self.input, pos));
        }
        let start = self.expect_operand(pos + 1)?;
        let (alternate, end) = self.nested(start, || self.assign(start))?;
        Ok((
            ArithExpr::Ternary(Box::new(ArithTernaryNode {
                condition,
                consequent,
                alternate,
            })),
            end,
        ))
    }

    /// Left-associative level whose operators are matched by `op_at`.
    fn level(
        &self,
        pos: usize,
        next: fn(&Self, usize) -> ArithResult<(ArithExpr, usize)>,
        op_at: fn(&str) -> Option<(ArithBinaryOperator, usize)>,
    ) -> ArithResult<(ArithExpr, usize)> {
        let depth = self.depth.get();
        let result = self.chain(pos, next, op_at);
        self.depth.set(depth);
        result
    }

    /// Every operator in the chain nests the tree built so far one level.
    fn chain(
        &self,
        pos: usize,
        next: fn(&Self, usize) -> ArithResult<(ArithExpr, usize)>,
        op_at: fn(&str) -> Option<(ArithBinaryOperator, usize)>,
    ) -> ArithResult<(ArithExpr, usize)> {
        let (mut left, mut pos) = next(self, pos)?;
        loop {
            let at = skip_ws(self.input, pos);
            let Some((operator, len)) = op_at(self.rest(at)) else {
                return Ok((left, pos));
            };
            self.deepen(at)?;
            let start = self.expect_operand(at + len)?;
            let (right, end) = next(self, start)?;
            left = binary(operator, left, right);
            pos = end;
        }
    }

    fn logical_or(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::logical_and, |s| {
            s.starts_with("||").then_some((ArithBinaryOperator::LogOr, 2))
        })
    }

    fn logical_and(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::bitwise_or, |s| {
            s.starts_with("&&").then_some((ArithBinaryOperator::LogAnd, 2))
        })
    }

    fn bitwise_or(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::bitwise_xor, |s| {
            (s.starts_with('|') && !s.starts_with("||") && !s.starts_with("|="))
                .then_some((ArithBinaryOperator::BitOr, 1))
        })
    }

    fn bitwise_xor(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::bitwise_and, |s| {
            (s.starts_with('^') && !s.starts_with("^=")).then_some((ArithBinaryOperator::BitXor, 1))
        })
    }

    fn bitwise_and(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::equality, |s| {
            (s.starts_with('&') && !s.starts_with("&&") && !s.starts_with("&="))
                .then_some((ArithBinaryOperator::BitAnd, 1))
        })
    }

    fn equality(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::relational, |s| {
            if s.starts_with("==") {
                Some((ArithBinaryOperator::Eq, 2))
            } else if s.starts_with("!=") {
                Some((ArithBinaryOperator::Ne, 2))
            } else {
                None
            }
        })
    }

    fn relational(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::shift, |s| {
            if s.starts_with("<<") || s.starts_with(">>") {
                None
            } else if s.starts_with("<=") {
                Some((ArithBinaryOperator::Le, 2))
            } else if s.starts_with(">=") {
                Some((ArithBinaryOperator::Ge, 2))
            } else if s.starts_with('<') {
                Some((ArithBinaryOperator::Lt, 1))
            } else if s.starts_with('>') {
                Some((ArithBinaryOperator::Gt, 1))
            } else {
                None
            }
        })
    }

    fn shift(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::additive, |s| {
            if s.starts_with("<<=") || s.starts_with(">>=") {
                None
            } else if s.starts_with("<<") {
                Some((ArithBinaryOperator::LShift, 2))
            } else if s.starts_with(">>") {
                Some((ArithBinaryOperator::RShift, 2))
            } else {
                None
            }
        })
    }

    fn additive(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::multiplicative, |s| {
            let b = s.as_bytes();
            match (b.first(), b.get(1)) {
                (Some(b'+'), Some(b'+' | b'=')) | (Some(b'-'), Some(b'-' | b'=')) => None,
                (Some(b'+'), _) => Some((ArithBinaryOperator::Add, 1)),
                (Some(b'-'), _) => Some((ArithBinaryOperator::Sub, 1)),
                _ => None,
            }
        })
    }

    fn multiplicative(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        self.level(pos, Self::power, |s| {
            let b = s.as_bytes();
            match (b.first(), b.get(1)) {
                (Some(b'*'), Some(b'*' | b'=')) | (Some(b'/' | b'%'), Some(b'=')) => None,
                (Some(b'*'), _) => Some((ArithBinaryOperator::Mul, 1)),
                (Some(b'/'), _) => Some((ArithBinaryOperator::Div, 1)),
                (Some(b'%'), _) => Some((ArithBinaryOperator::Mod, 1)),
                _ => None,
            }
        })
    }

    /// `**` is right associative.
    fn power(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let (base, next) = self.unary(pos)?;
        let at = skip_ws(self.input, next);
        if self.rest(at).starts_with("**") && !self.rest(at).starts_with("**=") {
            let start = self.expect_operand(at + 2)?;
            let (exponent, end) = self.nested(start, || self.power(start))?;
            return Ok((binary(ArithBinaryOperator::Pow, base, exponent), end));
        }
        Ok((base, next))
    }

    fn unary(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let pos = skip_ws(self.input, pos);
        let rest = self.rest(pos);
        let (operator, len) = if rest.starts_with("++") {
            (ArithUnaryOperator::Inc, 2)
        } else if rest.starts_with("--") {
            (ArithUnaryOperator::Dec, 2)
        } else {
            match self.byte(pos) {
                Some(b'-') => (ArithUnaryOperator::Neg, 1),
                Some(b'+') => (ArithUnaryOperator::Pos, 1),
                Some(b'!') => (ArithUnaryOperator::Not, 1),
                Some(b'~') => (ArithUnaryOperator::BitNot, 1),
                _ => return self.postfix(pos),
            }
        };
        let start = self.expect_operand(pos + len)?;
        let (operand, end) = self.nested(start, || self.unary(start))?;
        if matches!(operator, ArithUnaryOperator::Inc | ArithUnaryOperator::Dec)
            && !matches!(operand, ArithExpr::Variable(_))
        {
            return Err(error_at(self.input, pos));
        }
        Ok((
            ArithExpr::Unary(Box::new(ArithUnaryNode {
                operator,
                operand,
                prefix: true,
            })),
            end,
        ))
    }

    fn postfix(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let (operand, next) = self.primary(pos)?;
        if !matches!(operand, ArithExpr::Variable(_)) {
            return Ok((operand, next));
        }
        let at = skip_ws(self.input, next);
        let operator = if self.rest(at).starts_with("++") {
            ArithUnaryOperator::Inc
        } else if self.rest(at).starts_with("--") {
            ArithUnaryOperator::Dec
        } else {
            return Ok((operand, next));
        };
        Ok((
            ArithExpr::Unary(Box::new(ArithUnaryNode {
                operator,
                operand,
                prefix: false,
            })),
            at + 2,
        ))
    }

    fn primary(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let pos = skip_ws(self.input, pos);
        match self.byte(pos) {
            Some(b'(') => {
                let start = self.expect_operand(pos + 1)?;
                let (inner, next) = self.nested(start, || self.comma(start))?;
                let close = skip_ws(self.input, next);
                if self.byte(close) != Some(b')') {
                    return Err(error_at(self.input, close));
                }
                Ok((ArithExpr::Group(Box::new(inner)), close + 1))
            }
            Some(b) if b.is_ascii_digit() => self.number(pos),
            Some(b'.') if self.byte(pos + 1).map_or(false, |b| b.is_ascii_digit()) => self.number(pos),
            Some(b) if is_name_start(b) => self.name(pos),
            _ => Err(error_at(self.input, pos)),
        }
    }

    fn name(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let bytes = self.input.as_bytes();
        let mut end = pos;
        while end < bytes.len() && is_name_char(bytes[end]) {
            end += 1;
        }
        let name = self.input[pos..end].to_string();
        match self.byte(end) {
            Some(b'[') => {
                let start = self.expect_operand(end + 1)?;
                let (index, next) = self.nested(start, || self.comma(start))?;
                let close = skip_ws(self.input, next);
                if self.byte(close) != Some(b']') {
                    return Err(error_at(self.input, close));
                }
                Ok((
                    ArithExpr::Variable(ArithVariableNode {
                        name,
                        subscript: Some(Box::new(index)),
                    }),
                    close + 1,
                ))
            }
            Some(b'(') => {
                let mut args = Vec::new();
                let mut at = skip_ws(self.input, end + 1);
                if self.byte(at) == Some(b')') {
                    return Ok((ArithExpr::Call(ArithCallNode { name, args }), at + 1));
                }
                loop {
                    let start = self.expect_operand(at)?;
                    let (arg, next) = self.nested(start, || self.assign(start))?;
                    args.push(arg);
                    at = skip_ws(self.input, next);
                    match self.byte(at) {
                        Some(b',') => at += 1,
                        Some(b')') => return Ok((ArithExpr::Call(ArithCallNode { name, args }), at + 1)),
                        _ => return Err(error_at(self.input, at)),
                    }
                }
            }
            _ => Ok((ArithExpr::Variable(ArithVariableNode { name, subscript: None }), end)),
        }
    }

    fn number(&self, pos: usize) -> ArithResult<(ArithExpr, usize)> {
        let bytes = self.input.as_bytes();
        let mut end = pos;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'#' | b'_' | b'@' | b'.')) {
            // exponent sign: 1e-3
            end += 1;
            if matches!(bytes[end - 1], b'e' | b'E')
                && end < bytes.len()
                && matches!(bytes[end], b'+' | b'-')
                && !self.input[pos..end].contains(['#', 'x', 'X'])
            {
                end += 1;
            }
        }
        let text = &self.input[pos..end];
        let expr = parse_arith_number(text, self.posix).ok_or_else(|| error_at(self.input, pos))?;
        Ok((expr, end))
    }
}

/// Numeric literal: decimal, `0x` hex, `base#digits`, float, and octal when `posix`.
pub fn parse_arith_number(text: &str, posix: bool) -> Option<ArithExpr> {
    if let Some((base, digits)) = text.split_once('#') {
        let base: u32 = base.parse().ok()?;
        if !(2..=64).contains(&base) || digits.is_empty() {
            return None;
        }
        let mut value: i64 = 0;
        for c in digits.chars() {
            let d = digit_value(c, base)?;
            value = value.checked_mul(base as i64)?.checked_add(d as i64)?;
        }
        return Some(ArithExpr::Number(ArithNumberNode { value }));
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let value = i64::from_str_radix(hex, 16).ok()?;
        return Some(ArithExpr::Number(ArithNumberNode { value }));
    }
    if text.contains(['.', 'e', 'E']) {
        let value: f64 = text.parse().ok()?;
        return Some(ArithExpr::Float(ArithFloatNode { value }));
    }
    if posix && text.len() > 1 && text.starts_with('0') {
        let value = i64::from_str_radix(&text[1..], 8).ok()?;
        return Some(ArithExpr::Number(ArithNumberNode { value }));
    }
    let value: i64 = text.parse().ok()?;
    Some(ArithExpr::Number(ArithNumberNode { value }))
}

fn digit_value(c: char, base: u32) -> Option<u32> {
    let d = match c {
        '0'..='9' => c as u32 - '0' as u32,
        'a'..='z' => c as u32 - 'a' as u32 + 10,
        'A'..='Z' if base <= 36 => c as u32 - 'A' as u32 + 10,
        'A'..='Z' => c as u32 - 'A' as u32 + 36,
        '@' => 62,
        '_' => 63,
        _ => return None,
    };
    (d < base).then_some(d)
}

/// Split an arithmetic `for` header on the `;` separators at nesting level zero.
/// Returns `None` when there are fewer than two.
pub fn split_arith_for(text: &str) -> Option<(String, String, String)> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            '\'' | '"' if quote.is_none() => quote = Some(c),
            q if Some(q) == quote => quote = None,
            '(' | '[' | '{' if quote.is_none() => depth += 1,
            ')' | ']' | '}' if quote.is_none() => depth = depth.saturating_sub(1),
            ';' if quote.is_none() && depth == 0 && parts.len() < 2 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if parts.len() < 2 {
        return None;
    }
    let condition = parts.pop()?;
    let init = parts.pop()?;
    Some((init, condition, current))
}

/// Simple variable names referenced as `$name` or `${name}` in arithmetic text.
pub fn dollar_variables(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut names = Vec::new();
    let mut i = 0;
    let mut in_single = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_single = !in_single,
            b'\\' => i += 1,
            b'$' if !in_single => {
                let braced = bytes.get(i + 1) == Some(&b'{');
                let start = if braced { i + 2 } else { i + 1 };
                let mut end = start;
                if end < bytes.len() && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
                    while end < bytes.len() && is_name_char(bytes[end]) {
                        end += 1;
                    }
                    let closes = !braced || bytes.get(end) == Some(&b'}');
                    if closes {
                        names.push(text[start..end].to_string());
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(value: i64) -> ArithExpr {
        ArithExpr::Number(ArithNumberNode { value })
    }

    fn var(name: &str) -> ArithExpr {
        ArithExpr::Variable(ArithVariableNode {
            name: name.to_string(),
            subscript: None,
        })
    }

    #[test]
    fn test_precedence() {
        let expr = compile("1 + 2 * 3", false).unwrap();
        assert_eq!(
            expr,
            binary(ArithBinaryOperator::Add, num(1), binary(ArithBinaryOperator::Mul, num(2), num(3)))
        );
    }

    #[test]
    fn test_power_right_assoc() {
        let expr = compile("2**3**2", false).unwrap();
        assert_eq!(
            expr,
            binary(ArithBinaryOperator::Pow, num(2), binary(ArithBinaryOperator::Pow, num(3), num(2)))
        );
    }

    #[test]
    fn test_assignment_and_comma() {
        let expr = compile("i = 0, j += 2", false).unwrap();
        let ArithExpr::Binary(node) = expr else {
            panic!("expected comma");
        };
        assert_eq!(node.operator, ArithBinaryOperator::Comma);
        assert!(matches!(&node.left, ArithExpr::Assignment(a) if a.operator == ArithAssignmentOperator::Assign));
        assert!(matches!(&node.right, ArithExpr::Assignment(a) if a.operator == ArithAssignmentOperator::AddAssign));
    }

    #[test]
    fn test_comparison_not_assignment() {
        let expr = compile("i == 1", false).unwrap();
        assert_eq!(expr, binary(ArithBinaryOperator::Eq, var("i"), num(1)));
        let expr = compile("a <= b", false).unwrap();
        assert_eq!(expr, binary(ArithBinaryOperator::Le, var("a"), var("b")));
    }

    #[test]
    fn test_increments() {
        let expr = compile("i++", false).unwrap();
        assert!(matches!(expr, ArithExpr::Unary(u) if !u.prefix && u.operator == ArithUnaryOperator::Inc));
        let expr = compile("--i", false).unwrap();
        assert!(matches!(expr, ArithExpr::Unary(u) if u.prefix && u.operator == ArithUnaryOperator::Dec));
        assert!(compile("++3", false).is_err());
    }

    #[test]
    fn test_ternary_and_call() {
        let expr = compile("x ? pow(2, 3) : a[i+1]", false).unwrap();
        let ArithExpr::Ternary(node) = expr else {
            panic!("expected ternary");
        };
        assert!(matches!(&node.consequent, ArithExpr::Call(c) if c.name == "pow" && c.args.len() == 2));
        assert!(matches!(&node.alternate, ArithExpr::Variable(v) if v.subscript.is_some()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_arith_number("16#ff", false), Some(num(255)));
        assert_eq!(parse_arith_number("2#1010", false), Some(num(10)));
        assert_eq!(parse_arith_number("0x1F", false), Some(num(31)));
        assert_eq!(parse_arith_number("010", false), Some(num(10)));
        assert_eq!(parse_arith_number("010", true), Some(num(8)));
        assert_eq!(parse_arith_number("1.5", false), Some(ArithExpr::Float(ArithFloatNode { value: 1.5 })));
        assert_eq!(parse_arith_number("2#12", false), None);
        assert_eq!(compile("1e-3", false).unwrap(), ArithExpr::Float(ArithFloatNode { value: 0.001 }));
    }

    #[test]
    fn test_errors() {
        assert!(compile("1 +", false).is_err());
        assert!(compile("(1", false).is_err());
        assert!(compile("", false).is_err());
        let err = compile("1 2", false).unwrap_err();
        assert_eq!(err, ArithError::Syntax { text: "2".to_string(), offset: 2 });
        assert_eq!(err.to_string(), "2: arithmetic syntax error");
    }

    #[test]
    fn test_nesting_limit() {
        let nested = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert!(compile_limited(&nested, false, 32).is_ok());
        assert!(matches!(compile_limited(&nested, false, 10), Err(ArithError::TooDeep { limit: 10, .. })));

        let deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert!(matches!(compile_limited(&deep, false, 64), Err(ArithError::TooDeep { .. })));
        let nots = format!("{}1", "! ".repeat(200_000));
        assert!(matches!(compile_limited(&nots, false, 64), Err(ArithError::TooDeep { .. })));
        let chain = format!("{}1", "a=".repeat(20_000));
        assert!(matches!(compile_limited(&chain, false, 64), Err(ArithError::TooDeep { .. })));
        let sum = format!("1{}", "+1".repeat(20_000));
        assert!(matches!(compile_limited(&sum, false, 64), Err(ArithError::TooDeep { .. })));
        assert!(compile_limited(&format!("1{}", "+1".repeat(40)), false, 64).is_ok());
    }

    #[test]
    fn test_split_arith_for() {
        assert_eq!(
            split_arith_for("i=0; i<10; i++"),
            Some(("i=0".to_string(), " i<10".to_string(), " i++".to_string()))
        );
        assert_eq!(
            split_arith_for(";;"),
            Some((String::new(), String::new(), String::new()))
        );
        assert_eq!(split_arith_for("a[x;y]=1; 1"), None);
        assert_eq!(split_arith_for("i=0; i<3"), None);
    }

    #[test]
    fn test_dollar_variables() {
        assert_eq!(dollar_variables("$x + ${y} + $1 + '$z'"), vec!["x".to_string(), "y".to_string()]);
    }
}
