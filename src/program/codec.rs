//! Binary bytecode format.
//!
//! ```text
//! [ "#!<interpreter>\n" ]   optional, ignored by the loader
//! [ MAGIC: 8 bytes     ]
//! [ record ]*              16 bytes each
//! ```
//!
//! Each record is the opcode tag (u32 LE), four zero padding bytes, then the
//! operand word (u64 LE). The loader searches for the magic anywhere in the
//! buffer and treats everything before it as a prefix.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Instruction, Program};
use crate::isa::Opcode;
use crate::value::Value;

pub const MAGIC: [u8; 8] = *b"LAPISBC\x01";

/// Size of one encoded instruction.
pub const RECORD_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("bytecode magic not found")]
    MissingMagic,
    #[error("{remainder} trailing bytes after the last full instruction")]
    TrailingBytes { remainder: usize },
    #[error("illegal instruction tag {tag} at address {address}")]
    IllegalInstruction { address: usize, tag: u32 },
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("could not write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Serialises `program`, optionally behind a `#!<interpreter>` line.
pub fn encode(program: &Program, interpreter: Option<&str>) -> Vec<u8> {
    let prefix_len = interpreter.map_or(0, |path| path.len() + 3);
    let mut out = Vec::with_capacity(prefix_len + MAGIC.len() + program.len() * RECORD_SIZE);
    if let Some(path) = interpreter {
        out.extend_from_slice(b"#!");
        out.extend_from_slice(path.as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(&MAGIC);
    for inst in program {
        encode_instruction(inst, &mut out);
    }
    debug!(instructions = program.len(), bytes = out.len(), "encoded program");
    out
}

fn encode_instruction(inst: &Instruction, out: &mut Vec<u8>) {
    out.extend_from_slice(&inst.opcode.tag().to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    let operand = if inst.opcode.takes_operand() { inst.operand } else { Value::ZERO };
    out.extend_from_slice(&operand.bits().to_le_bytes());
}

/// Decodes a program, skipping any prefix before the magic.
pub fn decode(bytes: &[u8]) -> Result<Program, CodecError> {
    let start = find_magic(bytes).ok_or(CodecError::MissingMagic)?;
    let body = &bytes[start + MAGIC.len()..];

    let remainder = body.len() % RECORD_SIZE;
    if remainder != 0 {
        return Err(CodecError::TrailingBytes { remainder });
    }

    let program = body
        .chunks_exact(RECORD_SIZE)
        .enumerate()
        .map(|(address, record)| decode_instruction(address, record))
        .collect::<Result<Program, _>>()?;
    debug!(instructions = program.len(), prefix = start, "decoded program");
    Ok(program)
}

fn decode_instruction(address: usize, record: &[u8]) -> Result<Instruction, CodecError> {
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&record[..4]);
    let tag = u32::from_le_bytes(tag);
    let mut operand = [0u8; 8];
    operand.copy_from_slice(&record[8..RECORD_SIZE]);

    let opcode = Opcode::from_tag(tag).ok_or(CodecError::IllegalInstruction { address, tag })?;
    Ok(Instruction::with_operand(opcode, Value::from_bits(u64::from_le_bytes(operand))))
}

fn find_magic(bytes: &[u8]) -> Option<usize> {
    bytes.windows(MAGIC.len()).position(|window| window == MAGIC)
}

/// Reads and decodes a whole bytecode file.
pub fn read_file(path: &Path) -> Result<Program, CodecError> {
    let bytes = std::fs::read(path).map_err(|source| CodecError::Read { path: path.to_path_buf(), source })?;
    decode(&bytes)
}

/// Encodes `program` and writes it out in one go. With an interpreter line
/// the file is also made executable on Unix.
pub fn write_file(path: &Path, program: &Program, interpreter: Option<&str>) -> Result<(), CodecError> {
    let bytes = encode(program, interpreter);
    std::fs::write(path, bytes).map_err(|source| CodecError::Write { path: path.to_path_buf(), source })?;
    if interpreter.is_some() {
        mark_executable(path).map_err(|source| CodecError::Write { path: path.to_path_buf(), source })?;
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program::new(vec![
            Instruction::with_operand(Opcode::Push, Value::from_i64(10)),
            Instruction::with_operand(Opcode::Push, Value::from_i64(-15)),
            Instruction::new(Opcode::Lt),
            Instruction::new(Opcode::Hlt),
        ])
    }

    #[test]
    fn layout_is_magic_then_fixed_records() {
        let bytes = encode(&sample(), None);
        assert_eq!(bytes.len(), MAGIC.len() + 4 * RECORD_SIZE);
        assert_eq!(&bytes[..8], &MAGIC);

        let first = &bytes[8..8 + RECORD_SIZE];
        assert_eq!(&first[..4], &Opcode::Push.tag().to_le_bytes());
        assert_eq!(&first[4..8], &[0, 0, 0, 0]);
        assert_eq!(&first[8..], &10u64.to_le_bytes());
    }

    #[test]
    fn decode_reads_back_what_encode_wrote() {
        let program = sample();
        assert_eq!(decode(&encode(&program, None)).unwrap(), program);
    }

    #[test]
    fn ignored_operands_are_written_as_zero() {
        let program = Program::new(vec![Instruction::with_operand(Opcode::Add, Value::from_i64(77))]);
        let decoded = decode(&encode(&program, None)).unwrap();
        assert_eq!(decoded.as_slice()[0], Instruction::new(Opcode::Add));
    }

    #[test]
    fn interpreter_line_is_skipped() {
        let bytes = encode(&sample(), Some("/usr/local/bin/lapis"));
        assert!(bytes.starts_with(b"#!/usr/local/bin/lapis\n"));
        assert_eq!(decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn arbitrary_prefix_is_skipped() {
        let mut bytes = b"garbage before".to_vec();
        bytes.extend(encode(&sample(), None));
        assert_eq!(decode(&bytes).unwrap().len(), 4);
    }

    #[test]
    fn missing_magic_is_rejected() {
        assert!(matches!(decode(b"#!/bin/lapis\nLAPISBC"), Err(CodecError::MissingMagic)));
        assert!(matches!(decode(&[]), Err(CodecError::MissingMagic)));
    }

    #[test]
    fn empty_program_is_valid() {
        assert!(decode(&MAGIC).unwrap().is_empty());
    }

    #[test]
    fn partial_record_is_a_format_error() {
        let mut bytes = encode(&sample(), None);
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(decode(&bytes), Err(CodecError::TrailingBytes { remainder: 3 })));
    }

    #[test]
    fn unknown_tag_reports_its_address() {
        let mut bytes = encode(&sample(), None);
        let second = MAGIC.len() + RECORD_SIZE;
        bytes[second..second + 4].copy_from_slice(&999u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::IllegalInstruction { address: 1, tag: 999 })
        ));
    }

    #[test]
    fn files_round_trip_and_shebang_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.lbc");
        write_file(&path, &sample(), Some("/bin/lapis")).unwrap();
        assert_eq!(read_file(&path).unwrap(), sample());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_file(Path::new("/definitely/not/here.lbc")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.lbc"), "{err}");
    }
}
