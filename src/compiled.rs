//! Precompiled scripts
//!
//! A precompiled script is a four byte magic number, one version byte, and
//! the gzip-compressed JSON form of a [`Program`]. Loading never re-lexes the
//! source; a file written by another version is rejected outright.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;

use crate::ast::types::Program;
use crate::parser::types::{ParseResult, ResourceError, MAX_PARSER_DEPTH};
use crate::parser::Parser;

/// Leading bytes of every precompiled script.
pub const MAGIC: [u8; 4] = [0x0b, 0x13, 0x08, 0x00];

/// Format version written by [`save_program`] and the only one accepted.
pub const VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1;

/// Deepest JSON nesting [`load_program`] accepts.
pub const MAX_NESTING: usize = 16 * MAX_PARSER_DEPTH;

/// Deepest `{`/`[` nesting of a JSON text.
fn nesting_depth(json: &[u8]) -> usize {
    let (mut depth, mut deepest) = (0usize, 0usize);
    let mut in_string = false;
    let mut escaped = false;
    for &b in json {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// True when `bytes` start with the precompiled magic number.
pub fn is_precompiled(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

/// Write `program` in precompiled form.
pub fn save_program<W: Write>(program: &Program, mut out: W) -> Result<(), ResourceError> {
    out.write_all(&MAGIC)?;
    out.write_all(&[VERSION])?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    serde_json::to_writer(&mut encoder, program).map_err(|e| ResourceError::Decode(e.to_string()))?;
    let mut out = encoder.finish()?;
    out.flush()?;
    log::debug!("saved precompiled program (version {})", VERSION);
    Ok(())
}

/// Read a precompiled script written by [`save_program`].
pub fn load_program<R: Read>(mut input: R) -> Result<Program, ResourceError> {
    let mut header = [0u8; HEADER_LEN];
    input.read_exact(&mut header).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ResourceError::BadHeader,
        _ => ResourceError::Io(e),
    })?;
    if header[..MAGIC.len()] != MAGIC {
        return Err(ResourceError::BadHeader);
    }
    let version = header[MAGIC.len()];
    if version != VERSION {
        return Err(ResourceError::VersionMismatch {
            found: version,
            supported: VERSION,
        });
    }
    let mut body = Vec::new();
    GzDecoder::new(input)
        .read_to_end(&mut body)
        .map_err(|e| ResourceError::Decode(e.to_string()))?;
    let depth = nesting_depth(&body);
    if depth > MAX_NESTING {
        return Err(ResourceError::Decode(format!("nesting depth {} exceeds {}", depth, MAX_NESTING)));
    }
    // nesting is bounded above
    let mut de = serde_json::Deserializer::from_slice(&body);
    de.disable_recursion_limit();
    let program = Program::deserialize(&mut de)
        .and_then(|program| de.end().map(|()| program))
        .map_err(|e| ResourceError::Decode(e.to_string()))?;
    log::debug!("loaded precompiled program ({} here-documents)", program.heredocs.len());
    Ok(program)
}

/// Parse script bytes, loading them instead when they are precompiled.
pub fn parse_bytes(parser: &mut Parser, bytes: &[u8]) -> ParseResult<Program> {
    if is_precompiled(bytes) {
        return Ok(load_program(bytes)?);
    }
    let text = std::str::from_utf8(bytes).map_err(|e| ResourceError::Decode(e.to_string()))?;
    parser.parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::ParseError;

    const SCRIPT: &str = "\
function greet {
    typeset who=${1:-world}
    print -r -- \"hello $who\"
}
for i in 1 2 3; do greet $i | tr a-z A-Z; done
cat <<EOF
body $x
EOF
a=([k]=v)
(( n = 2 * 3 ))
";

    fn compiled(program: &Program) -> Vec<u8> {
        let mut out = Vec::new();
        save_program(program, &mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip() {
        let program = Parser::new().parse(SCRIPT).unwrap();
        let bytes = compiled(&program);
        assert!(is_precompiled(&bytes));
        assert_eq!(bytes[4], VERSION);
        let loaded = load_program(bytes.as_slice()).unwrap();
        assert_eq!(loaded, program);
        assert_eq!(loaded.heredocs.len(), 1);
    }

    #[test]
    fn test_parse_bytes_detects_format() {
        let mut parser = Parser::new();
        let text = parser.parse("echo hi").unwrap();
        let from_text = parse_bytes(&mut parser, b"echo hi").unwrap();
        assert_eq!(from_text, text);
        let from_binary = parse_bytes(&mut parser, &compiled(&text)).unwrap();
        assert_eq!(from_binary, text);
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = compiled(&Program::default());
        bytes[4] = VERSION + 1;
        let err = load_program(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ResourceError::VersionMismatch { found, supported } if found == VERSION + 1 && supported == VERSION));
    }

    #[test]
    fn test_bad_header_and_body() {
        assert!(matches!(load_program(&b"#!/bin/ksh\n"[..]), Err(ResourceError::BadHeader)));
        assert!(matches!(load_program(&MAGIC[..2]), Err(ResourceError::BadHeader)));
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        bytes.extend_from_slice(b"not gzip");
        assert!(matches!(load_program(bytes.as_slice()), Err(ResourceError::Decode(_))));
    }

    #[test]
    fn test_long_and_nested_scripts_round_trip() {
        let mut text = String::new();
        for i in 0..500 {
            text.push_str(&format!("echo line{}\n", i));
        }
        text.push_str(&"if a; then ".repeat(60));
        text.push_str("b");
        text.push_str(&"; fi".repeat(60));
        text.push('\n');
        let program = Parser::new().parse(&text).unwrap();
        let loaded = load_program(compiled(&program).as_slice()).unwrap();
        assert_eq!(loaded, program);
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        let mut encoder = GzEncoder::new(bytes, Compression::default());
        encoder.write_all("[".repeat(MAX_NESTING + 1).as_bytes()).unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(matches!(load_program(bytes.as_slice()), Err(ResourceError::Decode(_))));
        assert_eq!(nesting_depth(br#"{"a":["{[\"]"],"b":{}}"#), 2);
    }

    #[test]
    fn test_invalid_utf8_text() {
        let err = parse_bytes(&mut Parser::new(), &[b'e', 0xff, b'\n']).unwrap_err();
        assert!(matches!(err, ParseError::Resource(ResourceError::Decode(_))));
    }
}
