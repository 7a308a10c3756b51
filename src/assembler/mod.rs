//! Source text to [`Program`]: lexer, then both parser phases.

use tracing::debug;

use crate::lexer::{Lexer, Token};
use crate::parser::{AsmError, Parser};
use crate::program::{Instruction, Program};

/// Progress reported while assembling, for `--debug` echoing.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// A token just read, before phase one accepts it.
    Token(&'a Token),
    /// A fully resolved instruction and its address.
    Instruction { address: usize, instruction: &'a Instruction },
}

pub fn assemble(source: &str) -> Result<Program, AsmError> {
    assemble_with(source, |_| {})
}

/// Like [`assemble`], calling `observe` for every token and every emitted
/// instruction.
pub fn assemble_with(source: &str, mut observe: impl FnMut(Event<'_>)) -> Result<Program, AsmError> {
    let mut lexer = Lexer::new(source);
    let mut parser = Parser::new();
    while let Some(token) = lexer.next_token()? {
        observe(Event::Token(&token));
        parser.accept(token)?;
    }

    let mut resolver = parser.finish();
    debug!(labels = resolver.labels().len(), tokens = resolver.token_count(), "phase one complete");

    let mut instructions = Vec::new();
    while let Some(instruction) = resolver.next_instruction()? {
        observe(Event::Instruction { address: instructions.len(), instruction: &instruction });
        instructions.push(instruction);
    }
    debug!(instructions = instructions.len(), "phase two complete");
    Ok(Program::new(instructions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode;
    use crate::program::codec;
    use crate::value::Value;

    #[test]
    fn assembles_comparison_program() {
        let program = assemble("push 10\npush 15\nlt\nhlt").unwrap();
        assert_eq!(
            program.as_slice(),
            [
                Instruction::with_operand(Opcode::Push, Value::from_i64(10)),
                Instruction::with_operand(Opcode::Push, Value::from_i64(15)),
                Instruction::new(Opcode::Lt),
                Instruction::new(Opcode::Hlt),
            ]
        );
    }

    #[test]
    fn assembled_program_survives_the_codec() {
        let program = assemble("start: push 'A' ncall 2 jmp start").unwrap();
        let decoded = codec::decode(&codec::encode(&program, None)).unwrap();
        assert_eq!(decoded, program);
        assert_eq!(decoded.as_slice()[2].operand, Value::ZERO);
    }

    #[test]
    fn observer_sees_tokens_then_instructions() {
        let mut seen = Vec::new();
        assemble_with("l: push 1 jmp l", |event| match event {
            Event::Token(token) => seen.push(format!("tok {}", token.text)),
            Event::Instruction { address, instruction } => seen.push(format!("{address}: {instruction}")),
        })
        .unwrap();
        assert_eq!(seen, ["tok l:", "tok push", "tok 1", "tok jmp", "tok l", "0: push 1", "1: jmp 0"]);
    }

    #[test]
    fn first_error_aborts() {
        let err = assemble("push 1\njmp missing\npush").unwrap_err();
        assert!(matches!(err, AsmError::UndefinedLabel { .. }));
    }

    #[test]
    fn empty_source_is_an_empty_program() {
        assert!(assemble("; nothing here\n").unwrap().is_empty());
    }
}
