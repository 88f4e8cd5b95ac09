//! Lexer for ksh Scripts
//!
//! The lexer is pulled one token at a time by the parser, which adjusts
//! [`LexFlags`] before each pull: reserved words are only recognized in
//! command position, assignment words only where the grammar allows them, and
//! `[[ ... ]]` switches the operator set. It handles:
//! - Operators, redirection operators and pending fd prefixes
//! - Words (with quoting rules, substitutions and extended patterns)
//! - Comments and line continuations
//! - Alias expansion through the input stack
//! - Here-document body collection

use bitflags::bitflags;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use std::collections::{HashMap, VecDeque};

use crate::ast::types::{assignment_split, ArgFlags, Argument, HereDocStore};
use crate::parser::diagnostics::MessageKey;
use crate::parser::input::InputStack;
use crate::parser::types::{ParseError, ParseException, ResourceError};

/// Token types for the ksh lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // End of input
    Eof,

    // Newlines and separators
    Newline,
    Semicolon,
    Amp, // &

    // Operators
    Pipe,    // |
    PipeAmp, // |&
    AndAnd,  // &&
    OrOr,    // ||
    LParen,  // (
    RParen,  // )
    DSemi,   // ;;
    SemiAnd, // ;&

    // Redirections
    Less,          // <
    Great,         // >
    DLess,         // <<
    DLessDash,     // <<-
    TLess,         // <<<
    DGreat,        // >>
    LessAnd,       // <&
    GreatAnd,      // >&
    LessGreat,     // <>
    LessGreatSemi, // <>;
    Clobber,       // >|
    GreatSemi,     // >;
    LessSharp,     // <#
    LessDSharp,    // <##
    GreatSharp,    // >#
    AndGreat,      // &>
    AndDGreat,     // &>>

    // Process substitution
    ProcIn,  // <(
    ProcOut, // >(

    // Words
    Word,
    Expr,  // (( ... ))
    Label, // name:

    // Reserved words
    If,
    Then,
    Else,
    Elif,
    Fi,
    For,
    Select,
    While,
    Until,
    Do,
    Done,
    Case,
    Esac,
    In,
    Function,
    Namespace,
    Time,
    Bang,
    LBrace,
    RBrace,
    DBrackStart, // [[
    DBrackEnd,   // ]]
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eof => "end of file",
            Self::Newline => "newline",
            Self::Semicolon => ";",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::PipeAmp => "|&",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::DSemi => ";;",
            Self::SemiAnd => ";&",
            Self::Less => "<",
            Self::Great => ">",
            Self::DLess => "<<",
            Self::DLessDash => "<<-",
            Self::TLess => "<<<",
            Self::DGreat => ">>",
            Self::LessAnd => "<&",
            Self::GreatAnd => ">&",
            Self::LessGreat => "<>",
            Self::LessGreatSemi => "<>;",
            Self::Clobber => ">|",
            Self::GreatSemi => ">;",
            Self::LessSharp => "<#",
            Self::LessDSharp => "<##",
            Self::GreatSharp => ">#",
            Self::AndGreat => "&>",
            Self::AndDGreat => "&>>",
            Self::ProcIn => "<(",
            Self::ProcOut => ">(",
            Self::Word => "word",
            Self::Expr => "((",
            Self::Label => "label",
            Self::If => "if",
            Self::Then => "then",
            Self::Else => "else",
            Self::Elif => "elif",
            Self::Fi => "fi",
            Self::For => "for",
            Self::Select => "select",
            Self::While => "while",
            Self::Until => "until",
            Self::Do => "do",
            Self::Done => "done",
            Self::Case => "case",
            Self::Esac => "esac",
            Self::In => "in",
            Self::Function => "function",
            Self::Namespace => "namespace",
            Self::Time => "time",
            Self::Bang => "!",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::DBrackStart => "[[",
            Self::DBrackEnd => "]]",
        }
    }

    pub fn is_redirection(&self) -> bool {
        matches!(
            self,
            Self::Less
                | Self::Great
                | Self::DLess
                | Self::DLessDash
                | Self::TLess
                | Self::DGreat
                | Self::LessAnd
                | Self::GreatAnd
                | Self::LessGreat
                | Self::LessGreatSemi
                | Self::Clobber
                | Self::GreatSemi
                | Self::LessSharp
                | Self::LessDSharp
                | Self::GreatSharp
                | Self::AndGreat
                | Self::AndDGreat
        )
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_WORDS.values().any(|t| t == self)
    }
}

lazy_static! {
    /// Reserved words, recognized only in command position.
    pub static ref RESERVED_WORDS: HashMap<&'static str, TokenType> = {
        let mut m = HashMap::new();
        m.insert("if", TokenType::If);
        m.insert("then", TokenType::Then);
        m.insert("else", TokenType::Else);
        m.insert("elif", TokenType::Elif);
        m.insert("fi", TokenType::Fi);
        m.insert("for", TokenType::For);
        m.insert("select", TokenType::Select);
        m.insert("while", TokenType::While);
        m.insert("until", TokenType::Until);
        m.insert("do", TokenType::Do);
        m.insert("done", TokenType::Done);
        m.insert("case", TokenType::Case);
        m.insert("esac", TokenType::Esac);
        m.insert("in", TokenType::In);
        m.insert("function", TokenType::Function);
        m.insert("namespace", TokenType::Namespace);
        m.insert("time", TokenType::Time);
        m.insert("!", TokenType::Bang);
        m.insert("{", TokenType::LBrace);
        m.insert("}", TokenType::RBrace);
        m.insert("[[", TokenType::DBrackStart);
        m
    };
}

bitflags! {
    /// Recognition modes the parser sets before pulling a token.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LexFlags: u8 {
        /// Reserved words and labels are recognized.
        const RESERVED = 1 << 0;
        /// Words shaped like `name=value` are assignments.
        const ASSIGN = 1 << 1;
        /// The next word may be alias-expanded.
        const ALIAS = 1 << 2;
        /// Inside `[[ ... ]]`.
        const TEST = 1 << 3;
        /// Next word is the operand of `=~`.
        const REGEX = 1 << 4;
        /// `((` starts an arithmetic command.
        const EXPR = 1 << 5;
    }
}

impl LexFlags {
    /// Flags in effect at the start of a command.
    pub const COMMAND_START: LexFlags = LexFlags::RESERVED
        .union(LexFlags::ASSIGN)
        .union(LexFlags::ALIAS)
        .union(LexFlags::EXPR);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenType,
    /// Text of words, reserved words, labels and `((...))` bodies.
    pub arg: Option<Argument>,
    /// Descriptor prefix of a redirection operator (`2>`).
    pub fd: Option<i32>,
    /// Variable prefix of a redirection operator (`{fd}>`).
    pub var: Option<String>,
    pub line: usize,
}

impl Token {
    pub(crate) fn new(kind: TokenType, line: usize) -> Self {
        Self {
            kind,
            arg: None,
            fd: None,
            var: None,
            line,
        }
    }

    /// Text for diagnostics.
    pub fn text(&self) -> &str {
        match &self.arg {
            Some(arg) => &arg.text,
            None => self.kind.as_str(),
        }
    }
}

/// A here-document waiting for the end of its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHereDoc {
    pub id: usize,
    pub delimiter: String,
    pub strip_tabs: bool,
}

pub struct Lexer {
    pub input: InputStack,
    pub flags: LexFlags,
    /// Depth of enclosing `name=( ... )`; enables `[key]=value` words.
    pub compound_level: usize,
    pub heredocs: HereDocStore,
    aliases: IndexMap<String, String>,
    pending: VecDeque<PendingHereDoc>,
    alias_next: bool,
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `name`, `a.b.c`, `.sh.value`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => chars.all(|c| is_name_char(c) || c == '.'),
        Some('.') => s.len() > 1 && s[1..].starts_with(is_name_start) && s.chars().all(|c| is_name_char(c) || c == '.'),
        _ => false,
    }
}

/// Variable part of an assignment word, with an optional subscript.
fn is_assignment_target(name: &str, compound: bool) -> bool {
    match name.find('[') {
        Some(0) => compound && name.ends_with(']'),
        Some(i) => is_identifier(&name[..i]) && name.ends_with(']'),
        None => is_identifier(name),
    }
}

impl Lexer {
    pub fn new(input: InputStack, aliases: IndexMap<String, String>) -> Self {
        Self {
            input,
            flags: LexFlags::COMMAND_START,
            compound_level: 0,
            heredocs: HereDocStore::new(),
            aliases,
            pending: VecDeque::new(),
            alias_next: false,
        }
    }

    pub fn line(&self) -> usize {
        self.input.line()
    }

    /// Queue a here-document; its body is read after the next newline.
    pub fn queue_heredoc(&mut self, delimiter: &str, strip_tabs: bool) -> usize {
        let id = self.heredocs.reserve(delimiter);
        self.pending.push_back(PendingHereDoc {
            id,
            delimiter: delimiter.to_string(),
            strip_tabs,
        });
        id
    }

    fn syntax(&self, message: String, line: usize) -> ParseError {
        ParseError::Syntax(ParseException::new(message, line))
    }

    fn unmatched(&self, what: &str, line: usize) -> ParseError {
        let message = MessageKey::Unmatched.format(&[what]);
        ParseError::Syntax(ParseException::with_token(message, line, what))
    }

    /// Pull the next token.
    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        loop {
            self.skip_blanks();
            if self.input.end_token() {
                self.alias_next = true;
            }
            let line = self.input.line();
            let Some(c) = self.input.peek() else {
                if let Some(e) = self.input.take_error() {
                    return Err(ParseError::Resource(ResourceError::Io(e)));
                }
                if let Some(h) = self.pending.front() {
                    return Err(self.unmatched_heredoc(&h.delimiter, line));
                }
                return Ok(self.finish(Token::new(TokenType::Eof, line)));
            };
            let test = self.flags.contains(LexFlags::TEST);
            let token = match c {
                '#' => {
                    while let Some(c) = self.input.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.input.next();
                    }
                    continue;
                }
                '\n' => {
                    self.input.next();
                    self.collect_heredocs()?;
                    Token::new(TokenType::Newline, line)
                }
                ';' => {
                    self.input.next();
                    let kind = if self.input.eat(';') {
                        TokenType::DSemi
                    } else if self.input.eat('&') {
                        TokenType::SemiAnd
                    } else {
                        TokenType::Semicolon
                    };
                    Token::new(kind, line)
                }
                '&' => {
                    self.input.next();
                    let kind = if self.input.eat('&') {
                        TokenType::AndAnd
                    } else if !test && self.input.eat('>') {
                        if self.input.eat('>') {
                            TokenType::AndDGreat
                        } else {
                            TokenType::AndGreat
                        }
                    } else {
                        TokenType::Amp
                    };
                    Token::new(kind, line)
                }
                '|' => {
                    self.input.next();
                    let kind = if self.input.eat('|') {
                        TokenType::OrOr
                    } else if self.input.eat('&') {
                        TokenType::PipeAmp
                    } else {
                        TokenType::Pipe
                    };
                    Token::new(kind, line)
                }
                '(' => {
                    if self.flags.contains(LexFlags::EXPR) && self.input.peek_nth(1) == Some('(') {
                        if let Some(arg) = self.scan_arith_command(line)? {
                            let mut token = Token::new(TokenType::Expr, line);
                            token.arg = Some(arg);
                            return Ok(self.finish(token));
                        }
                    }
                    self.input.next();
                    Token::new(TokenType::LParen, line)
                }
                ')' => {
                    self.input.next();
                    Token::new(TokenType::RParen, line)
                }
                '<' | '>' if test => {
                    self.input.next();
                    let kind = if c == '<' { TokenType::Less } else { TokenType::Great };
                    Token::new(kind, line)
                }
                '<' | '>' => self.scan_redirection(None, None, line),
                '0'..='9' if !test => match self.fd_prefix() {
                    Some(fd) => self.scan_redirection(Some(fd), None, line),
                    None => match self.scan_word_token(line)? {
                        Some(token) => token,
                        None => continue,
                    },
                },
                '{' if !test => match self.var_prefix() {
                    Some(var) => self.scan_redirection(None, Some(var), line),
                    None => match self.scan_word_token(line)? {
                        Some(token) => token,
                        None => continue,
                    },
                },
                _ => match self.scan_word_token(line)? {
                    Some(token) => token,
                    None => continue,
                },
            };
            log::trace!("token {:?} at line {}", token.kind, token.line);
            return Ok(self.finish(token));
        }
    }

    /// Update recognition modes after a token has been produced.
    fn finish(&mut self, token: Token) -> Token {
        use TokenType::*;
        match token.kind {
            Word => {
                let assignment = token.arg.as_ref().map(|a| a.is_assignment()).unwrap_or(false);
                self.flags.remove(LexFlags::RESERVED | LexFlags::EXPR | LexFlags::REGEX);
                if !assignment {
                    self.flags.remove(LexFlags::ALIAS);
                }
            }
            Newline | Semicolon | Amp | Pipe | PipeAmp | AndAnd | OrOr | LParen | RParen | DSemi
            | SemiAnd | ProcIn | ProcOut | If | Then | Else | Elif | Do | While | Until | Bang | Time
            | LBrace | RBrace | Fi | Done | Esac | Label => {
                if !self.flags.contains(LexFlags::TEST) {
                    self.flags.insert(LexFlags::COMMAND_START);
                }
            }
            Expr => {
                self.flags.remove(LexFlags::ASSIGN | LexFlags::ALIAS | LexFlags::EXPR);
                self.flags.insert(LexFlags::RESERVED);
            }
            For | Select => {
                self.flags.remove(LexFlags::COMMAND_START);
                self.flags.insert(LexFlags::EXPR);
            }
            Case | Function | Namespace | In => self.flags.remove(LexFlags::COMMAND_START),
            DBrackStart => {
                self.flags.remove(LexFlags::COMMAND_START);
                self.flags.insert(LexFlags::TEST);
            }
            DBrackEnd => {
                self.flags.remove(LexFlags::TEST | LexFlags::REGEX);
            }
            Eof => {}
            _ => self.flags.remove(LexFlags::COMMAND_START),
        }
        if token.kind != Eof {
            self.alias_next = false;
        }
        token
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.input.peek() {
                Some(c) if is_blank(c) => {
                    self.input.next();
                }
                Some('\\') if self.input.peek_nth(1) == Some('\n') => {
                    self.input.next();
                    self.input.next();
                }
                _ => break,
            }
        }
    }

    /// Digits immediately followed by `<` or `>`. A number too large for a
    /// descriptor is left to be read as a word.
    fn fd_prefix(&mut self) -> Option<i32> {
        let mut digits = String::new();
        while let Some(c) = self.input.peek_nth(digits.len()).filter(char::is_ascii_digit) {
            digits.push(c);
        }
        if !matches!(self.input.peek_nth(digits.len()), Some('<') | Some('>')) {
            return None;
        }
        let fd = digits.parse().ok()?;
        for _ in 0..digits.len() {
            self.input.next();
        }
        Some(fd)
    }

    /// `{name}` immediately followed by `<` or `>`.
    fn var_prefix(&mut self) -> Option<String> {
        let mut n = 1;
        let mut name = String::new();
        while let Some(c) = self.input.peek_nth(n) {
            if c == '}' {
                break;
            }
            if !(is_name_char(c) || c == '.') {
                return None;
            }
            name.push(c);
            n += 1;
        }
        if !is_identifier(&name) || !matches!(self.input.peek_nth(n + 1), Some('<') | Some('>')) {
            return None;
        }
        for _ in 0..=n {
            self.input.next();
        }
        Some(name)
    }

    fn scan_redirection(&mut self, fd: Option<i32>, var: Option<String>, line: usize) -> Token {
        use TokenType::*;
        let first = self.input.next();
        let kind = if first == Some('<') {
            if fd.is_none() && var.is_none() && self.input.eat('(') {
                ProcIn
            } else if self.input.eat('<') {
                if self.input.eat('<') {
                    TLess
                } else if self.input.eat('-') {
                    DLessDash
                } else {
                    DLess
                }
            } else if self.input.eat('&') {
                LessAnd
            } else if self.input.eat('>') {
                if self.input.eat(';') {
                    LessGreatSemi
                } else {
                    LessGreat
                }
            } else if self.input.eat('#') {
                if self.input.eat('#') {
                    LessDSharp
                } else {
                    LessSharp
                }
            } else {
                Less
            }
        } else if fd.is_none() && var.is_none() && self.input.eat('(') {
            ProcOut
        } else if self.input.eat('>') {
            DGreat
        } else if self.input.eat('&') {
            GreatAnd
        } else if self.input.eat('|') {
            Clobber
        } else if self.input.eat(';') {
            GreatSemi
        } else if self.input.eat('#') {
            GreatSharp
        } else {
            Great
        };
        let mut token = Token::new(kind, line);
        token.fd = fd;
        token.var = var;
        token
    }

    /// Scan a word and classify it. Returns `None` when an alias was expanded.
    fn scan_word_token(&mut self, line: usize) -> Result<Option<Token>, ParseError> {
        let mut arg = self.scan_word(line)?;
        let flags = self.flags;

        let literal = !arg.flags.intersects(ArgFlags::QUOTED | ArgFlags::MACRO);
        if flags.contains(LexFlags::TEST) && arg.text == "]]" && literal {
            let mut token = Token::new(TokenType::DBrackEnd, line);
            token.arg = Some(arg);
            return Ok(Some(token));
        }

        if (flags.contains(LexFlags::ALIAS) || self.alias_next) && arg.is_raw() && !flags.contains(LexFlags::TEST) {
            if let Some(value) = self.aliases.get(&arg.text) {
                if !self.input.alias_active(&arg.text) {
                    let value = value.clone();
                    log::trace!("alias {} expands to {:?}", arg.text, value);
                    self.input.push_alias(&arg.text, &value);
                    self.alias_next = false;
                    return Ok(None);
                }
            }
        }

        if flags.contains(LexFlags::RESERVED) && literal {
            if let Some(&kind) = RESERVED_WORDS.get(arg.text.as_str()) {
                let mut token = Token::new(kind, line);
                token.arg = Some(arg);
                return Ok(Some(token));
            }
            if let Some(name) = arg.text.strip_suffix(':') {
                if is_identifier(name) {
                    let mut token = Token::new(TokenType::Label, line);
                    arg.text = name.to_string();
                    token.arg = Some(arg);
                    return Ok(Some(token));
                }
            }
        }

        if flags.contains(LexFlags::ASSIGN) || self.compound_level > 0 {
            if let Some(eq) = assignment_split(&arg.text) {
                let name = &arg.text[..eq];
                let (name, append) = match name.strip_suffix('+') {
                    Some(n) => (n, true),
                    None => (name, false),
                };
                let allowed = flags.contains(LexFlags::ASSIGN) || name.starts_with('[');
                if allowed && is_assignment_target(name, self.compound_level > 0) {
                    arg.flags.insert(ArgFlags::ASSIGNMENT);
                    if append {
                        arg.flags.insert(ArgFlags::APPEND);
                    }
                }
            }
        }

        let mut token = Token::new(TokenType::Word, line);
        token.arg = Some(arg);
        Ok(Some(token))
    }

    /// Read one word with its quoting intact.
    pub fn scan_word(&mut self, line: usize) -> Result<Argument, ParseError> {
        let mut text = String::new();
        let mut flags = ArgFlags::empty();
        let regex = self.flags.contains(LexFlags::REGEX);
        let mut depth = 0usize;
        let mut open_brace = false;

        while let Some(c) = self.input.peek() {
            match c {
                '\n' => break,
                ' ' | '\t' if depth == 0 => break,
                '(' if regex => {
                    depth += 1;
                    text.push(c);
                    self.input.next();
                }
                ')' if regex && depth > 0 => {
                    depth -= 1;
                    text.push(c);
                    self.input.next();
                }
                '|' | '<' | '>' if regex && (depth > 0 || c == '|') => {
                    text.push(c);
                    self.input.next();
                }
                ' ' | '\t' => {
                    text.push(c);
                    self.input.next();
                }
                '(' if text.ends_with(['@', '*', '+', '?', '!', '~']) => {
                    self.input.next();
                    text.push('(');
                    self.scan_group(&mut text, &mut flags, line)?;
                    flags.insert(ArgFlags::EXP);
                }
                c if is_meta(c) => break,
                '\\' => {
                    self.input.next();
                    match self.input.next() {
                        Some('\n') => {}
                        Some(escaped) => {
                            text.push('\\');
                            text.push(escaped);
                            flags.insert(ArgFlags::QUOTED);
                        }
                        None => text.push('\\'),
                    }
                }
                '\'' => {
                    self.input.next();
                    self.scan_single_quoted(&mut text, line)?;
                    flags.insert(ArgFlags::QUOTED);
                }
                '"' => {
                    self.input.next();
                    self.scan_double_quoted(&mut text, &mut flags, line)?;
                    flags.insert(ArgFlags::QUOTED);
                }
                '$' => {
                    self.input.next();
                    self.scan_dollar(&mut text, &mut flags, line)?;
                }
                '`' => {
                    self.input.next();
                    self.scan_backquote(&mut text, line)?;
                    flags.insert(ArgFlags::MACRO);
                }
                '[' if (self.flags.contains(LexFlags::ASSIGN) || self.compound_level > 0)
                    && (is_identifier(&text) || (text.is_empty() && self.compound_level > 0)) =>
                {
                    self.scan_subscript(&mut text, &mut flags);
                }
                '*' | '?' | '[' => {
                    flags.insert(ArgFlags::EXP);
                    text.push(c);
                    self.input.next();
                }
                '~' if text.is_empty() => {
                    flags.insert(ArgFlags::EXP);
                    text.push(c);
                    self.input.next();
                }
                '{' => {
                    open_brace = true;
                    text.push(c);
                    self.input.next();
                }
                '}' => {
                    if open_brace {
                        flags.insert(ArgFlags::EXP);
                    }
                    text.push(c);
                    self.input.next();
                }
                _ => {
                    text.push(c);
                    self.input.next();
                }
            }
        }

        // a lone `[` is the test command, not a bracket expression
        if text == "[" {
            flags.remove(ArgFlags::EXP);
        }
        if !flags.intersects(ArgFlags::QUOTED | ArgFlags::MACRO | ArgFlags::EXP) {
            flags.insert(ArgFlags::RAW);
        }
        Ok(Argument::new(text, flags, line))
    }

    /// `name[subscript]` where the subscript may contain blanks, but only when
    /// an `=` or `+=` follows; otherwise `[` is an ordinary pattern character.
    fn scan_subscript(&mut self, text: &mut String, flags: &mut ArgFlags) {
        let mark = self.input.mark();
        let mut sub = String::new();
        let mut depth = 0usize;
        while let Some(c) = self.input.next() {
            sub.push(c);
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                '\n' => break,
                '$' | '`' | '"' | '\'' | '\\' => flags.insert(ArgFlags::MACRO),
                _ => {}
            }
        }
        let closes = depth == 0 && (self.input.peek() == Some('=') || self.input.looking_at("+="));
        if closes {
            text.push_str(&sub);
        } else {
            self.input.seek(&mark);
            self.input.next();
            text.push('[');
            flags.insert(ArgFlags::EXP);
        }
    }

    fn scan_single_quoted(&mut self, text: &mut String, line: usize) -> Result<(), ParseError> {
        text.push('\'');
        loop {
            match self.input.next() {
                Some('\'') => {
                    text.push('\'');
                    return Ok(());
                }
                Some(c) => text.push(c),
                None => return Err(self.unmatched("'", line)),
            }
        }
    }

    /// `$'...'`: backslash escapes are honored, so `\'` does not close it.
    fn scan_ansi_quoted(&mut self, text: &mut String, line: usize) -> Result<(), ParseError> {
        text.push('\'');
        loop {
            match self.input.next() {
                Some('\'') => {
                    text.push('\'');
                    return Ok(());
                }
                Some('\\') => {
                    text.push('\\');
                    match self.input.next() {
                        Some(c) => text.push(c),
                        None => return Err(self.unmatched("'", line)),
                    }
                }
                Some(c) => text.push(c),
                None => return Err(self.unmatched("'", line)),
            }
        }
    }

    fn scan_double_quoted(&mut self, text: &mut String, flags: &mut ArgFlags, line: usize) -> Result<(), ParseError> {
        text.push('"');
        loop {
            match self.input.next() {
                Some('"') => {
                    text.push('"');
                    return Ok(());
                }
                Some('\\') => match self.input.next() {
                    Some('\n') => {}
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => return Err(self.unmatched("\"", line)),
                },
                Some('$') => self.scan_dollar(text, flags, line)?,
                Some('`') => {
                    self.scan_backquote(text, line)?;
                    flags.insert(ArgFlags::MACRO);
                }
                Some(c) => text.push(c),
                None => return Err(self.unmatched("\"", line)),
            }
        }
    }

    fn scan_backquote(&mut self, text: &mut String, line: usize) -> Result<(), ParseError> {
        text.push('`');
        loop {
            match self.input.next() {
                Some('`') => {
                    text.push('`');
                    return Ok(());
                }
                Some('\\') => {
                    text.push('\\');
                    if let Some(c) = self.input.next() {
                        text.push(c);
                    }
                }
                Some(c) => text.push(c),
                None => return Err(self.unmatched("`", line)),
            }
        }
    }

    /// After a `$`: parameter, command or arithmetic substitution.
    fn scan_dollar(&mut self, text: &mut String, flags: &mut ArgFlags, line: usize) -> Result<(), ParseError> {
        text.push('$');
        match self.input.peek() {
            Some('(') => {
                self.input.next();
                text.push('(');
                if self.input.eat('(') {
                    text.push('(');
                    self.scan_arith_substitution(text, line)?;
                } else {
                    self.scan_command_substitution(text, line)?;
                }
                flags.insert(ArgFlags::MACRO);
            }
            Some('{') => {
                self.input.next();
                text.push('{');
                self.scan_braced_parameter(text, line)?;
                flags.insert(ArgFlags::MACRO);
            }
            Some('\'') => {
                self.input.next();
                self.scan_ansi_quoted(text, line)?;
                flags.insert(ArgFlags::QUOTED);
            }
            Some('"') => {
                self.input.next();
                self.scan_double_quoted(text, flags, line)?;
                flags.insert(ArgFlags::QUOTED);
            }
            Some(c) if is_name_char(c) || "?#@*!$-".contains(c) => {
                flags.insert(ArgFlags::MACRO);
            }
            _ => {}
        }
        Ok(())
    }

    fn scan_braced_parameter(&mut self, text: &mut String, line: usize) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.input.next() {
                Some('}') => {
                    text.push('}');
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some('{') => {
                    text.push('{');
                    depth += 1;
                }
                Some('\\') => {
                    text.push('\\');
                    if let Some(c) = self.input.next() {
                        text.push(c);
                    }
                }
                Some('\'') => self.scan_single_quoted(text, line)?,
                Some('"') => {
                    let mut inner = ArgFlags::empty();
                    self.scan_double_quoted(text, &mut inner, line)?;
                }
                Some('$') => {
                    let mut inner = ArgFlags::empty();
                    self.scan_dollar(text, &mut inner, line)?;
                }
                Some('`') => self.scan_backquote(text, line)?,
                Some(c) => text.push(c),
                None => return Err(self.unmatched("${", line)),
            }
        }
    }

    /// Body of `$((...))` after the opening `$((`.
    fn scan_arith_substitution(&mut self, text: &mut String, line: usize) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            match self.input.next() {
                Some('(') => {
                    depth += 1;
                    text.push('(');
                }
                Some(')') => {
                    text.push(')');
                    if depth == 0 {
                        if self.input.eat(')') {
                            text.push(')');
                            return Ok(());
                        }
                        return Err(self.unmatched("$((", line));
                    }
                    depth -= 1;
                }
                Some('$') => {
                    let mut inner = ArgFlags::empty();
                    self.scan_dollar(text, &mut inner, line)?;
                }
                Some('\'') => self.scan_single_quoted(text, line)?,
                Some('"') => {
                    let mut inner = ArgFlags::empty();
                    self.scan_double_quoted(text, &mut inner, line)?;
                }
                Some('`') => self.scan_backquote(text, line)?,
                Some(c) => text.push(c),
                None => return Err(self.unmatched("$((", line)),
            }
        }
    }

    /// Body of `$(...)` after the opening `$(`. Tracks `case ... esac` so that
    /// the `)` closing a case pattern does not end the substitution.
    fn scan_command_substitution(&mut self, text: &mut String, line: usize) -> Result<(), ParseError> {
        let mut depth = 1usize;
        let mut word = String::new();
        let mut case_depth = 0usize;
        let mut expect_in = false;
        let mut in_pattern = false;
        let mut glob_depth = 0usize;
        let mut at_word_start = true;

        loop {
            let Some(c) = self.input.next() else {
                return Err(self.unmatched("$(", line));
            };
            if is_name_char(c) {
                word.push(c);
            } else if !word.is_empty() {
                match word.as_str() {
                    "case" if !in_pattern => {
                        case_depth += 1;
                        expect_in = true;
                    }
                    "in" if expect_in => {
                        expect_in = false;
                        in_pattern = true;
                    }
                    "esac" if case_depth > 0 => {
                        case_depth -= 1;
                        in_pattern = false;
                    }
                    _ => {}
                }
                word.clear();
            }
            match c {
                '\\' => {
                    text.push('\\');
                    if let Some(next) = self.input.next() {
                        text.push(next);
                    }
                }
                '\'' => self.scan_single_quoted(text, line)?,
                '"' => {
                    let mut inner = ArgFlags::empty();
                    self.scan_double_quoted(text, &mut inner, line)?;
                }
                '`' => self.scan_backquote(text, line)?,
                '$' => {
                    let mut inner = ArgFlags::empty();
                    self.scan_dollar(text, &mut inner, line)?;
                }
                '#' if at_word_start => {
                    text.push('#');
                    while let Some(next) = self.input.peek() {
                        if next == '\n' {
                            break;
                        }
                        text.push(next);
                        self.input.next();
                    }
                }
                '(' => {
                    if in_pattern {
                        if text.ends_with(['@', '*', '+', '?', '!']) {
                            glob_depth += 1;
                        }
                    } else {
                        depth += 1;
                    }
                    text.push('(');
                }
                ')' => {
                    text.push(')');
                    if in_pattern {
                        if glob_depth > 0 {
                            glob_depth -= 1;
                        } else {
                            in_pattern = false;
                        }
                    } else {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(());
                        }
                    }
                }
                ';' if case_depth > 0 && !in_pattern => {
                    text.push(';');
                    if self.input.peek() == Some(';') || self.input.peek() == Some('&') {
                        if let Some(next) = self.input.next() {
                            text.push(next);
                        }
                        in_pattern = true;
                    }
                }
                _ => text.push(c),
            }
            at_word_start = is_meta(c);
        }
    }

    /// Balanced `( ... )` of an extended pattern, after the `(`.
    fn scan_group(&mut self, text: &mut String, flags: &mut ArgFlags, line: usize) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.input.next() {
                Some('(') => {
                    depth += 1;
                    text.push('(');
                }
                Some(')') => {
                    text.push(')');
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some('\\') => {
                    text.push('\\');
                    if let Some(c) = self.input.next() {
                        text.push(c);
                    }
                    flags.insert(ArgFlags::QUOTED);
                }
                Some('\'') => {
                    self.scan_single_quoted(text, line)?;
                    flags.insert(ArgFlags::QUOTED);
                }
                Some('"') => {
                    self.scan_double_quoted(text, flags, line)?;
                    flags.insert(ArgFlags::QUOTED);
                }
                Some('$') => self.scan_dollar(text, flags, line)?,
                Some(c) => text.push(c),
                None => return Err(self.unmatched("(", line)),
            }
        }
    }

    /// `(( ... ))` in command position. Returns `None` (input untouched) when the
    /// parentheses do not close as `))`, which makes it two nested subshells.
    fn scan_arith_command(&mut self, line: usize) -> Result<Option<Argument>, ParseError> {
        let mark = self.input.mark();
        self.input.next();
        self.input.next();
        let mut text = String::new();
        let mut flags = ArgFlags::empty();
        let mut depth = 0usize;
        loop {
            let Some(c) = self.input.next() else {
                return Err(self.unmatched("((", line));
            };
            match c {
                '(' => {
                    depth += 1;
                    text.push('(');
                }
                ')' if depth == 0 => {
                    if self.input.eat(')') {
                        break;
                    }
                    self.input.seek(&mark);
                    return Ok(None);
                }
                ')' => {
                    depth -= 1;
                    text.push(')');
                }
                '$' => self.scan_dollar(&mut text, &mut flags, line)?,
                '\'' => {
                    self.scan_single_quoted(&mut text, line)?;
                    flags.insert(ArgFlags::QUOTED);
                }
                '"' => {
                    self.scan_double_quoted(&mut text, &mut flags, line)?;
                    flags.insert(ArgFlags::QUOTED);
                }
                '`' => {
                    self.scan_backquote(&mut text, line)?;
                    flags.insert(ArgFlags::MACRO);
                }
                '\\' if self.input.peek() == Some('\n') => {
                    self.input.next();
                }
                _ => text.push(c),
            }
        }
        if flags.contains(ArgFlags::QUOTED) {
            flags.insert(ArgFlags::MACRO);
        }
        if !flags.intersects(ArgFlags::QUOTED | ArgFlags::MACRO) {
            flags.insert(ArgFlags::RAW);
        }
        Ok(Some(Argument::new(text, flags, line)))
    }

    fn unmatched_heredoc(&self, delimiter: &str, line: usize) -> ParseError {
        ParseError::Syntax(ParseException::with_token(
            MessageKey::HereDocUnterminated.format(&[delimiter]),
            line,
            delimiter,
        ))
    }

    /// Read the bodies of every queued here-document, in queue order.
    fn collect_heredocs(&mut self) -> Result<(), ParseError> {
        while let Some(doc) = self.pending.pop_front() {
            let start = self.input.line();
            let mut body = String::new();
            loop {
                let Some(raw) = self.input.read_line() else {
                    return Err(self.unmatched_heredoc(&doc.delimiter, start));
                };
                let line = if doc.strip_tabs {
                    raw.trim_start_matches('\t')
                } else {
                    raw.as_str()
                };
                if line.strip_suffix('\n').unwrap_or(line) == doc.delimiter {
                    break;
                }
                body.push_str(line);
            }
            log::trace!("here-document {} collected ({} bytes)", doc.delimiter, body.len());
            self.heredocs.fill(doc.id, body);
        }
        Ok(())
    }

    /// Return to command-start recognition (after an error or a fresh line).
    pub fn reset(&mut self) {
        self.flags = LexFlags::COMMAND_START;
        self.compound_level = 0;
        self.pending.clear();
        self.alias_next = false;
    }

    /// Raise a syntax error at the current line.
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        self.syntax(message.into(), self.input.line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexer(input: &str) -> Lexer {
        Lexer::new(InputStack::from_str(input), IndexMap::new())
    }

    fn kinds(input: &str) -> Vec<TokenType> {
        let mut lx = lexer(input);
        let mut out = Vec::new();
        loop {
            let token = lx.next_token().unwrap();
            if token.kind == TokenType::Eof {
                break;
            }
            out.push(token.kind);
        }
        out
    }

    #[test]
    fn test_operators() {
        use TokenType::*;
        assert_eq!(
            kinds("a | b || c && d ; e & f |& g ;; ;&"),
            vec![Word, Pipe, Word, OrOr, Word, AndAnd, Word, Semicolon, Word, Amp, Word, PipeAmp, Word, DSemi, SemiAnd]
        );
    }

    #[test]
    fn test_reserved_only_in_command_position() {
        use TokenType::*;
        assert_eq!(kinds("if echo if; then fi"), vec![If, Word, Word, Semicolon, Then, Fi]);
        assert_eq!(kinds("echo { }"), vec![Word, Word, Word]);
    }

    #[test]
    fn test_redirection_operators() {
        use TokenType::*;
        assert_eq!(
            kinds("a <x >y >>z <>w <>;v >|u >;t <#s <##r >#q &>p &>>o <&0 >&1"),
            vec![
                Word, Less, Word, Great, Word, DGreat, Word, LessGreat, Word, LessGreatSemi, Word, Clobber, Word,
                GreatSemi, Word, LessSharp, Word, LessDSharp, Word, GreatSharp, Word, AndGreat, Word, AndDGreat,
                Word, LessAnd, Word, GreatAnd, Word
            ]
        );
    }

    #[test]
    fn test_fd_prefix() {
        let mut lx = lexer("cmd 2>&1 10<file 12x");
        lx.next_token().unwrap();
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::GreatAnd);
        assert_eq!(t.fd, Some(2));
        assert_eq!(lx.next_token().unwrap().text(), "1");
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::Less);
        assert_eq!(t.fd, Some(10));
        lx.next_token().unwrap();
        assert_eq!(lx.next_token().unwrap().text(), "12x");
    }

    #[test]
    fn test_oversized_fd_is_a_word() {
        let mut lx = lexer("cmd 99999999999>out");
        lx.next_token().unwrap();
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::Word);
        assert_eq!(t.text(), "99999999999");
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::Great);
        assert_eq!(t.fd, None);
        assert_eq!(lx.next_token().unwrap().text(), "out");
    }

    #[test]
    fn test_var_prefix() {
        let mut lx = lexer("exec {fd}>out");
        lx.next_token().unwrap();
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::Great);
        assert_eq!(t.var.as_deref(), Some("fd"));
    }

    #[test]
    fn test_word_flags() {
        let mut lx = lexer("plain 'q' $x *.c \"a$b\" ~/x");
        let raw = lx.next_token().unwrap().arg.unwrap();
        assert!(raw.is_raw());
        let quoted = lx.next_token().unwrap().arg.unwrap();
        assert!(quoted.flags.contains(ArgFlags::QUOTED));
        assert!(!quoted.is_raw());
        let mac = lx.next_token().unwrap().arg.unwrap();
        assert!(mac.flags.contains(ArgFlags::MACRO));
        let glob = lx.next_token().unwrap().arg.unwrap();
        assert!(glob.flags.contains(ArgFlags::EXP));
        let dq = lx.next_token().unwrap().arg.unwrap();
        assert!(dq.flags.contains(ArgFlags::QUOTED | ArgFlags::MACRO));
        let tilde = lx.next_token().unwrap().arg.unwrap();
        assert!(tilde.flags.contains(ArgFlags::EXP));
    }

    #[test]
    fn test_assignment_words() {
        let mut lx = lexer("a=1 b+=2 c[i + 1]=3 echo d=4");
        let a = lx.next_token().unwrap().arg.unwrap();
        assert!(a.is_assignment());
        let b = lx.next_token().unwrap().arg.unwrap();
        assert!(b.flags.contains(ArgFlags::ASSIGNMENT | ArgFlags::APPEND));
        let c = lx.next_token().unwrap().arg.unwrap();
        assert_eq!(c.text, "c[i + 1]=3");
        assert!(c.is_assignment());
        lx.flags.remove(LexFlags::ASSIGN);
        lx.next_token().unwrap();
        let d = lx.next_token().unwrap().arg.unwrap();
        assert!(!d.is_assignment());
    }

    #[test]
    fn test_command_substitution_with_case() {
        let mut lx = lexer("x=$(case a in a) echo hi;; esac) next");
        let word = lx.next_token().unwrap().arg.unwrap();
        assert_eq!(word.text, "x=$(case a in a) echo hi;; esac)");
        assert_eq!(lx.next_token().unwrap().text(), "next");
    }

    #[test]
    fn test_arith_command() {
        let mut lx = lexer("((i = (2 + 3) * 4))");
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::Expr);
        let arg = t.arg.unwrap();
        assert_eq!(arg.text, "i = (2 + 3) * 4");
        assert!(arg.is_raw());
    }

    #[test]
    fn test_nested_subshell_not_arith() {
        use TokenType::*;
        assert_eq!(kinds("((a) )"), vec![LParen, LParen, Word, RParen, RParen]);
    }

    #[test]
    fn test_unterminated_quote() {
        let mut lx = lexer("echo 'abc");
        lx.next_token().unwrap();
        let err = lx.next_token().unwrap_err();
        assert!(err.to_string().contains("unmatched"));
    }

    #[test]
    fn test_heredoc_collection() {
        let mut lx = lexer("cat <<EOF\nline one\n\tline two\nEOF\necho");
        lx.next_token().unwrap();
        lx.next_token().unwrap();
        lx.next_token().unwrap();
        let id = lx.queue_heredoc("EOF", false);
        assert_eq!(lx.next_token().unwrap().kind, TokenType::Newline);
        assert_eq!(lx.heredocs.body(id), Some("line one\n\tline two\n"));
        assert_eq!(lx.next_token().unwrap().text(), "echo");
    }

    #[test]
    fn test_heredoc_strip_tabs() {
        let mut lx = lexer("\n\tbody\n\tEOF\n");
        let id = lx.queue_heredoc("EOF", true);
        lx.next_token().unwrap();
        assert_eq!(lx.heredocs.body(id), Some("body\n"));
    }

    #[test]
    fn test_unterminated_heredoc() {
        let mut lx = lexer("\nbody\n");
        lx.queue_heredoc("EOF", false);
        assert!(lx.next_token().is_err());
    }

    #[test]
    fn test_alias_expansion() {
        let mut aliases = IndexMap::new();
        aliases.insert("ll".to_string(), "ls -l ".to_string());
        aliases.insert("here".to_string(), "/tmp".to_string());
        let mut lx = Lexer::new(InputStack::from_str("ll here"), aliases);
        assert_eq!(lx.next_token().unwrap().text(), "ls");
        assert_eq!(lx.next_token().unwrap().text(), "-l");
        assert_eq!(lx.next_token().unwrap().text(), "/tmp");
    }

    #[test]
    fn test_recursive_alias_stops() {
        let mut aliases = IndexMap::new();
        aliases.insert("ls".to_string(), "ls -F".to_string());
        let mut lx = Lexer::new(InputStack::from_str("ls"), aliases);
        assert_eq!(lx.next_token().unwrap().text(), "ls");
        assert_eq!(lx.next_token().unwrap().text(), "-F");
    }

    #[test]
    fn test_label_token() {
        let mut lx = lexer("outer: while");
        let t = lx.next_token().unwrap();
        assert_eq!(t.kind, TokenType::Label);
        assert_eq!(t.text(), "outer");
        assert_eq!(lx.next_token().unwrap().kind, TokenType::While);
    }

    #[test]
    fn test_test_mode() {
        use TokenType::*;
        let mut lx = lexer("[[ a < b && ! -f x ]]");
        let mut out = Vec::new();
        loop {
            let t = lx.next_token().unwrap();
            if t.kind == Eof {
                break;
            }
            out.push(t.kind);
        }
        assert_eq!(out, vec![DBrackStart, Word, Less, Word, AndAnd, Word, Word, Word, DBrackEnd]);
    }

    #[test]
    fn test_regex_operand() {
        let mut lx = lexer("[[ x =~ ^(a|b)$ ]]");
        lx.next_token().unwrap();
        lx.next_token().unwrap();
        lx.next_token().unwrap();
        lx.flags.insert(LexFlags::REGEX);
        assert_eq!(lx.next_token().unwrap().text(), "^(a|b)$");
        assert_eq!(lx.next_token().unwrap().kind, TokenType::DBrackEnd);
    }

    #[test]
    fn test_extglob_word() {
        let mut lx = lexer("echo @(a|b) !(x)");
        lx.next_token().unwrap();
        assert_eq!(lx.next_token().unwrap().text(), "@(a|b)");
        assert_eq!(lx.next_token().unwrap().text(), "!(x)");
    }

    #[test]
    fn test_process_substitution_tokens() {
        use TokenType::*;
        assert_eq!(kinds("diff <(a) >(b)"), vec![Word, ProcIn, Word, RParen, ProcOut, Word, RParen]);
    }

    #[test]
    fn test_line_continuation_and_comment() {
        let mut lx = lexer("echo a\\\nb # comment\nnext");
        lx.next_token().unwrap();
        assert_eq!(lx.next_token().unwrap().text(), "ab");
        assert_eq!(lx.next_token().unwrap().kind, TokenType::Newline);
        let t = lx.next_token().unwrap();
        assert_eq!(t.text(), "next");
        assert_eq!(t.line, 3);
    }
}
