//! Decoded instructions and the programs built from them.
//!
//! A [`Program`] is immutable once built: the parser produces one, the codec
//! decodes one, and the engine takes ownership of it for a session. An
//! instruction's index in the program is its address.

pub mod codec;

use std::fmt;

use crate::isa::Opcode;
use crate::value::Value;

/// One decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Value,
}

impl Instruction {
    /// An instruction with a zero operand.
    pub const fn new(opcode: Opcode) -> Self {
        Instruction { opcode, operand: Value::ZERO }
    }

    pub const fn with_operand(opcode: Opcode, operand: Value) -> Self {
        Instruction { opcode, operand }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.opcode.takes_operand() {
            write!(f, "{} {}", self.opcode, self.operand)
        } else {
            write!(f, "{}", self.opcode)
        }
    }
}

/// An ordered, fixed sequence of instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Program { instructions }
    }

    pub fn get(&self, address: usize) -> Option<&Instruction> {
        self.instructions.get(address)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl FromIterator<Instruction> for Program {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Program::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// Listing with one `address: instruction` line per instruction.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.len().saturating_sub(1).to_string().len();
        for (address, inst) in self.instructions.iter().enumerate() {
            writeln!(f, "{address:>width$}: {inst}")?;
        }
        Ok(())
    }
}
