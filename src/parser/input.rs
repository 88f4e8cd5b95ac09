//! Input stack
//!
//! Character source for the lexer. The bottom frame holds script text and can
//! be refilled line by line from a reader or an interactive line supplier;
//! alias expansions are pushed on top of it. Exhausted frames stay on the
//! stack until the lexer finishes the current token, so a [`Mark`] taken inside
//! a token can always be restored.

use std::io::{self, BufRead};

/// Supplies script text one line at a time (terminal editors, readers).
pub trait LineSource {
    /// Next line including its newline, or `None` at end of input.
    fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// [`LineSource`] over any buffered reader.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

#[derive(Debug)]
enum FrameKind {
    Text,
    Alias { name: String, trailing_blank: bool },
}

#[derive(Debug)]
struct Frame {
    chars: Vec<char>,
    pos: usize,
    kind: FrameKind,
}

impl Frame {
    fn remaining(&self) -> usize {
        self.chars.len() - self.pos
    }
}

/// Saved read position; valid until the end of the current token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    positions: Vec<usize>,
    line: usize,
}

pub struct InputStack {
    frames: Vec<Frame>,
    supplier: Option<Box<dyn LineSource>>,
    line: usize,
    error: Option<io::Error>,
}

const COMPACT_THRESHOLD: usize = 8192;

impl InputStack {
    fn with_base(text: &str, supplier: Option<Box<dyn LineSource>>) -> Self {
        Self {
            frames: vec![Frame {
                chars: text.chars().collect(),
                pos: 0,
                kind: FrameKind::Text,
            }],
            supplier,
            line: 1,
            error: None,
        }
    }

    pub fn from_str(text: &str) -> Self {
        Self::with_base(text, None)
    }

    pub fn from_reader<R: BufRead + 'static>(reader: R) -> Self {
        Self::with_base("", Some(Box::new(ReaderSource::new(reader))))
    }

    pub fn from_source(source: Box<dyn LineSource>) -> Self {
        Self::with_base("", Some(source))
    }

    /// Current line number of the script text.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    /// I/O error hit while refilling, if any. Reads after an error see end of input.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Append one more line from the supplier to the base frame.
    fn refill(&mut self) -> bool {
        let Some(supplier) = self.supplier.as_mut() else {
            return false;
        };
        match supplier.next_line() {
            Ok(Some(line)) => {
                self.frames[0].chars.extend(line.chars());
                true
            }
            Ok(None) => {
                self.supplier = None;
                false
            }
            Err(e) => {
                self.error = Some(e);
                self.supplier = None;
                false
            }
        }
    }

    pub fn peek(&mut self) -> Option<char> {
        self.peek_nth(0)
    }

    /// Look `n` characters ahead without consuming anything.
    pub fn peek_nth(&mut self, mut n: usize) -> Option<char> {
        for i in (1..self.frames.len()).rev() {
            let frame = &self.frames[i];
            if n < frame.remaining() {
                return Some(frame.chars[frame.pos + n]);
            }
            n -= frame.remaining();
        }
        while self.frames[0].remaining() <= n {
            if !self.refill() {
                return None;
            }
        }
        let base = &self.frames[0];
        Some(base.chars[base.pos + n])
    }

    /// True if the upcoming characters are exactly `text`.
    pub fn looking_at(&mut self, text: &str) -> bool {
        text.chars().enumerate().all(|(i, c)| self.peek_nth(i) == Some(c))
    }

    pub fn next(&mut self) -> Option<char> {
        let mut idx = self.frames.len() - 1;
        while idx > 0 && self.frames[idx].remaining() == 0 {
            idx -= 1;
        }
        if idx == 0 && self.frames[0].remaining() == 0 && !self.refill() {
            return None;
        }
        let frame = &mut self.frames[idx];
        let c = frame.chars[frame.pos];
        frame.pos += 1;
        if c == '\n' && matches!(frame.kind, FrameKind::Text) {
            self.line += 1;
        }
        Some(c)
    }

    /// Consume the next character if it equals `c`.
    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.next();
            true
        } else {
            false
        }
    }

    pub fn mark(&self) -> Mark {
        Mark {
            positions: self.frames.iter().map(|f| f.pos).collect(),
            line: self.line,
        }
    }

    /// Return to `mark`. Fails if a frame present at the mark is gone.
    pub fn seek(&mut self, mark: &Mark) -> bool {
        if self.frames.len() < mark.positions.len() {
            return false;
        }
        self.frames.truncate(mark.positions.len());
        for (frame, &pos) in self.frames.iter_mut().zip(&mark.positions) {
            frame.pos = pos;
        }
        self.line = mark.line;
        true
    }

    /// Read the rest of the current line including its newline.
    pub fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        while let Some(c) = self.next() {
            line.push(c);
            if c == '\n' {
                break;
            }
        }
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Stack alias replacement text on top of the input.
    pub fn push_alias(&mut self, name: &str, text: &str) {
        let trailing_blank = text.ends_with(' ') || text.ends_with('\t');
        self.frames.push(Frame {
            chars: text.chars().collect(),
            pos: 0,
            kind: FrameKind::Alias {
                name: name.to_string(),
                trailing_blank,
            },
        });
    }

    /// True while `name` is being expanded, so it must not expand again.
    pub fn alias_active(&self, name: &str) -> bool {
        self.frames.iter().any(|f| match &f.kind {
            FrameKind::Alias { name: n, .. } => n == name,
            FrameKind::Text => false,
        })
    }

    /// Called between tokens: drop exhausted alias frames. Returns true if one of
    /// them ended in a blank, which makes the following word alias-eligible.
    pub fn end_token(&mut self) -> bool {
        let mut blank = false;
        while self.frames.len() > 1 && self.frames[self.frames.len() - 1].remaining() == 0 {
            if let Some(Frame {
                kind: FrameKind::Alias { trailing_blank, .. },
                ..
            }) = self.frames.pop()
            {
                blank |= trailing_blank;
            }
        }
        if self.frames.len() == 1 && self.frames[0].pos > COMPACT_THRESHOLD {
            let base = &mut self.frames[0];
            base.chars.drain(..base.pos);
            base.pos = 0;
        }
        blank
    }

    /// Inside an alias expansion.
    pub fn in_alias(&self) -> bool {
        self.frames[1..].iter().any(|f| f.remaining() > 0)
    }
}

impl std::fmt::Debug for InputStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStack")
            .field("frames", &self.frames)
            .field("line", &self.line)
            .finish()
    }
}
