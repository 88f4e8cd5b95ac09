//! Cross-reference records
//!
//! While parsing, the grammar can report what a script defines and uses:
//! commands it runs, variables it sets, files it redirects, functions it
//! defines. Each thing is an [`Entity`] identified by a CRC-32 of its kind and
//! name; each use is a [`Relation`] from the enclosing script or function.
//!
//! Records go to an [`XrefSink`]. [`CsvXref`] writes them as `;`-separated
//! lines:
//!
//! ```text
//! e;<id>;<kind>;<name>;<parent>;<first>;<last>;<attr>
//! r;<from>;<to>;<first>;<last>;<mode>
//! ```

use flate2::Crc;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    /// Script, function or command.
    Program,
    Variable,
    File,
}

impl EntityKind {
    pub fn as_char(self) -> char {
        match self {
            EntityKind::Program => 'p',
            EntityKind::Variable => 'v',
            EntityKind::File => 'f',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub id: u32,
    pub kind: EntityKind,
    pub name: String,
    pub parent: u32,
    pub first_line: usize,
    pub last_line: usize,
    /// `s` script, `p` function, `b` builtin, `c` command, `d` dot script,
    /// `v` variable, `f` file.
    pub attr: char,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub from: u32,
    pub to: u32,
    pub first_line: usize,
    pub last_line: usize,
    /// `c` call, `d` dot, `s` set, `r` read, `w` write, `a` append, `h` here-document.
    pub mode: char,
}

/// Receiver of cross-reference records.
pub trait XrefSink {
    fn entity(&mut self, entity: &Entity) -> io::Result<()>;
    fn relation(&mut self, relation: &Relation) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Checksum identifying an entity.
pub fn entity_id(kind: EntityKind, name: &str) -> u32 {
    let mut crc = Crc::new();
    let mut tag = [0u8; 4];
    crc.update(kind.as_char().encode_utf8(&mut tag).as_bytes());
    crc.update(name.as_bytes());
    crc.sum()
}

/// Text writer; each entity is written once, the first time it is seen.
pub struct CsvXref<W: Write> {
    writer: csv::Writer<W>,
    seen: HashSet<u32>,
}

impl<W: Write> CsvXref<W> {
    pub fn new(out: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_writer(out);
        Self {
            writer,
            seen: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))
    }
}

impl<W: Write> XrefSink for CsvXref<W> {
    fn entity(&mut self, entity: &Entity) -> io::Result<()> {
        // functions are reported again with their last line
        if !self.seen.insert(entity.id) && entity.last_line == 0 {
            return Ok(());
        }
        self.writer.write_record([
            "e".to_string(),
            entity.id.to_string(),
            entity.kind.as_char().to_string(),
            entity.name.clone(),
            entity.parent.to_string(),
            entity.first_line.to_string(),
            entity.last_line.to_string(),
            entity.attr.to_string(),
        ])?;
        Ok(())
    }

    fn relation(&mut self, relation: &Relation) -> io::Result<()> {
        self.writer.write_record([
            "r".to_string(),
            relation.from.to_string(),
            relation.to.to_string(),
            relation.first_line.to_string(),
            relation.last_line.to_string(),
            relation.mode.to_string(),
        ])?;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Parser-side state of cross-reference emission.
pub struct Recorder {
    sink: Box<dyn XrefSink>,
    script: u32,
    current: u32,
}

impl Recorder {
    pub fn new(mut sink: Box<dyn XrefSink>, script: &str) -> io::Result<Self> {
        let id = entity_id(EntityKind::Program, script);
        sink.entity(&Entity {
            id,
            kind: EntityKind::Program,
            name: script.to_string(),
            parent: 0,
            first_line: 0,
            last_line: 0,
            attr: 's',
        })?;
        Ok(Self {
            sink,
            script: id,
            current: id,
        })
    }

    fn emit(&mut self, kind: EntityKind, name: &str, parent: u32, line: usize, attr: char, mode: char) -> io::Result<u32> {
        let id = entity_id(kind, name);
        self.sink.entity(&Entity {
            id,
            kind,
            name: name.to_string(),
            parent,
            first_line: 0,
            last_line: 0,
            attr,
        })?;
        self.sink.relation(&Relation {
            from: self.current,
            to: id,
            first_line: line,
            last_line: line,
            mode,
        })?;
        Ok(id)
    }

    pub fn command(&mut self, name: &str, builtin: bool, line: usize) -> io::Result<()> {
        let attr = if builtin { 'b' } else { 'c' };
        let base = name.rsplit('/').next().unwrap_or(name);
        self.emit(EntityKind::Program, base, self.script, line, attr, 'c').map(|_| ())
    }

    pub fn dot(&mut self, name: &str, line: usize) -> io::Result<()> {
        self.emit(EntityKind::Program, name, self.script, line, 'd', 'd').map(|_| ())
    }

    pub fn variable(&mut self, name: &str, line: usize) -> io::Result<()> {
        self.emit(EntityKind::Variable, name, self.current, line, 'v', 's').map(|_| ())
    }

    pub fn file(&mut self, name: &str, line: usize, mode: char) -> io::Result<()> {
        self.emit(EntityKind::File, name, self.script, line, 'f', mode).map(|_| ())
    }

    /// Start a function body; returns the enclosing entity to restore.
    pub fn enter_function(&mut self, name: &str) -> u32 {
        let previous = self.current;
        self.current = entity_id(EntityKind::Program, name);
        previous
    }

    pub fn leave_function(&mut self, previous: u32, name: &str, first: usize, last: usize) -> io::Result<()> {
        let id = self.current;
        self.current = previous;
        self.sink.entity(&Entity {
            id,
            kind: EntityKind::Program,
            name: name.to_string(),
            parent: self.script,
            first_line: first,
            last_line: last.max(first),
            attr: 'p',
        })
    }

    pub fn finish(&mut self) -> io::Result<()> {
        self.sink.finish()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("script", &self.script)
            .field("current", &self.current)
            .finish()
    }
}
