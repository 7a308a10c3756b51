//! Two-phase label resolution.
//!
//! Phase one ([`Parser`]) takes tokens one at a time, records every label
//! definition against the address of the next instruction and buffers the
//! rest. Phase two ([`Resolver`]) walks that buffer and turns each mnemonic
//! and its operand into an [`Instruction`], looking label references up in
//! the table phase one built. Forward references therefore resolve the same
//! way as backward ones.
//!
//! The grammar is `(label:)* mnemonic operand? ...` repeated.

use std::collections::HashMap;
use std::fmt;

use crate::isa::Opcode;
use crate::lexer::{LexError, Token, TokenKind};
use crate::program::Instruction;
use crate::source::Span;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("undefined label `{name}`")]
    UndefinedLabel { name: String, span: Span },
    #[error("unexpected {found} `{text}`, expected an instruction")]
    UnexpectedToken { found: &'static str, text: String, span: Span },
    #[error("`{opcode}` expects an operand")]
    MissingOperand { opcode: Opcode, span: Span },
    #[error("`{opcode}` cannot take {found} `{text}` as its operand")]
    UnexpectedOperand { opcode: Opcode, found: &'static str, text: String, span: Span },
    #[error("label `{name}` is defined more than once")]
    DuplicateLabel { name: String, span: Span, first: Span },
}

impl AsmError {
    /// Stable error code shown in diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            AsmError::Lex(_) => "ASM-L001",
            AsmError::UndefinedLabel { .. } => "ASM-P001",
            AsmError::UnexpectedToken { .. } => "ASM-P002",
            AsmError::MissingOperand { .. } => "ASM-P003",
            AsmError::UnexpectedOperand { .. } => "ASM-P004",
            AsmError::DuplicateLabel { .. } => "ASM-P005",
        }
    }

    /// Where the error points in the source.
    pub fn span(&self) -> Span {
        match self {
            AsmError::Lex(e) => e.span(),
            AsmError::UndefinedLabel { span, .. }
            | AsmError::UnexpectedToken { span, .. }
            | AsmError::MissingOperand { span, .. }
            | AsmError::UnexpectedOperand { span, .. }
            | AsmError::DuplicateLabel { span, .. } => *span,
        }
    }
}

/// A label bound to an instruction address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub address: usize,
    pub span: Span,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.address)
    }
}

#[derive(Debug, Default)]
struct LabelTable {
    labels: Vec<Label>,
    by_name: HashMap<String, usize>,
}

impl LabelTable {
    fn define(&mut self, label: Label) -> Result<(), AsmError> {
        if let Some(&index) = self.by_name.get(&label.name) {
            return Err(AsmError::DuplicateLabel {
                name: label.name,
                span: label.span,
                first: self.labels[index].span,
            });
        }
        self.by_name.insert(label.name.clone(), self.labels.len());
        self.labels.push(label);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<&Label> {
        self.by_name.get(name).map(|&index| &self.labels[index])
    }
}

/// Phase one: label collection.
#[derive(Debug, Default)]
pub struct Parser {
    labels: LabelTable,
    tokens: Vec<Token>,
    address: usize,
}

impl Parser {
    pub fn new() -> Self {
        Parser::default()
    }

    pub fn accept(&mut self, token: Token) -> Result<(), AsmError> {
        match token.kind {
            TokenKind::LabelDef(name) => {
                self.labels.define(Label { name, address: self.address, span: token.span })?;
            }
            TokenKind::Instruction(_) => {
                self.address += 1;
                self.tokens.push(token);
            }
            TokenKind::Integer(_) | TokenKind::Identifier(_) => self.tokens.push(token),
        }
        Ok(())
    }

    /// Address the next instruction will get.
    pub fn address(&self) -> usize {
        self.address
    }

    /// Labels defined so far, in definition order.
    pub fn labels(&self) -> &[Label] {
        &self.labels.labels
    }

    pub fn finish(self) -> Resolver {
        Resolver { labels: self.labels, tokens: self.tokens, cursor: 0 }
    }
}

/// Phase two: operand resolution over the buffered tokens.
#[derive(Debug)]
pub struct Resolver {
    labels: LabelTable,
    tokens: Vec<Token>,
    cursor: usize,
}

impl Resolver {
    pub fn labels(&self) -> &[Label] {
        &self.labels.labels
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// The next resolved instruction, or `None` when the buffer is spent.
    pub fn next_instruction(&mut self) -> Result<Option<Instruction>, AsmError> {
        let Some(token) = self.tokens.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let opcode = match token.kind {
            TokenKind::Instruction(op) => op,
            ref other => {
                return Err(AsmError::UnexpectedToken {
                    found: other.describe(),
                    text: token.text.clone(),
                    span: token.span,
                });
            }
        };
        if !opcode.takes_operand() {
            return Ok(Some(Instruction::new(opcode)));
        }

        let Some(operand) = self.tokens.get(self.cursor) else {
            return Err(AsmError::MissingOperand { opcode, span: token.span });
        };
        self.cursor += 1;

        let value = match &operand.kind {
            TokenKind::Integer(n) => Value::from_i64(*n),
            TokenKind::Identifier(name) => {
                let label = self
                    .labels
                    .resolve(name)
                    .ok_or_else(|| AsmError::UndefinedLabel { name: name.clone(), span: operand.span })?;
                Value::from_i64(label.address as i64)
            }
            other => {
                return Err(AsmError::UnexpectedOperand {
                    opcode,
                    found: other.describe(),
                    text: operand.text.clone(),
                    span: operand.span,
                });
            }
        };
        Ok(Some(Instruction::with_operand(opcode, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn resolve(source: &str) -> Result<Vec<Instruction>, AsmError> {
        let mut parser = Parser::new();
        for token in lex(source)? {
            parser.accept(token)?;
        }
        let mut resolver = parser.finish();
        let mut out = Vec::new();
        while let Some(inst) = resolver.next_instruction()? {
            out.push(inst);
        }
        Ok(out)
    }

    #[test]
    fn label_resolves_to_following_instruction() {
        let insts = resolve("loop: push 1\njmp loop").unwrap();
        assert_eq!(insts[1], Instruction::with_operand(Opcode::Jmp, Value::from_i64(0)));
    }

    #[test]
    fn forward_references_resolve() {
        let insts = resolve("jmp end push 1 push 2 end: hlt").unwrap();
        assert_eq!(insts[0].operand.as_i64(), 3);
        assert_eq!(insts.len(), 4);
    }

    #[test]
    fn operands_do_not_take_addresses() {
        let mut parser = Parser::new();
        for token in lex("push 1 push 2 add here: there: hlt").unwrap() {
            parser.accept(token).unwrap();
        }
        assert_eq!(parser.address(), 4);
        let addresses: Vec<usize> = parser.labels().iter().map(|l| l.address).collect();
        assert_eq!(addresses, [3, 3]);
        assert_eq!(parser.labels()[0].to_string(), "here = 3");
    }

    #[test]
    fn label_at_end_points_past_the_program() {
        let insts = resolve("jmp done done:").unwrap();
        assert_eq!(insts[0].operand.as_i64(), 1);
    }

    #[test]
    fn literal_operands_pass_through() {
        let insts = resolve("push -3 ncall 0 hlt").unwrap();
        assert_eq!(insts[0].operand.as_i64(), -3);
        assert_eq!(insts[2], Instruction::new(Opcode::Hlt));
    }

    #[test]
    fn undefined_label() {
        let err = resolve("jmp nowhere").unwrap_err();
        assert_eq!(err, AsmError::UndefinedLabel { name: "nowhere".into(), span: Span::new(4, 11) });
        assert_eq!(err.code(), "ASM-P001");
    }

    #[test]
    fn stray_literal_is_unexpected() {
        let err = resolve("push 1 2").unwrap_err();
        assert!(matches!(err, AsmError::UnexpectedToken { found: "integer literal", .. }), "{err:?}");
        assert_eq!(err.span(), Span::new(7, 8));

        let err = resolve("add foo").unwrap_err();
        assert!(matches!(err, AsmError::UnexpectedToken { found: "identifier", .. }), "{err:?}");
    }

    #[test]
    fn missing_operand_at_end() {
        let err = resolve("push 1 push").unwrap_err();
        assert_eq!(err, AsmError::MissingOperand { opcode: Opcode::Push, span: Span::new(7, 11) });
        assert_eq!(err.to_string(), "`push` expects an operand");
    }

    #[test]
    fn mnemonic_in_operand_slot() {
        let err = resolve("push hlt").unwrap_err();
        assert!(matches!(err, AsmError::UnexpectedOperand { opcode: Opcode::Push, found: "instruction", .. }));
    }

    #[test]
    fn duplicate_label_points_at_both() {
        let err = resolve("a: nop a: hlt").unwrap_err();
        assert_eq!(
            err,
            AsmError::DuplicateLabel { name: "a".into(), span: Span::new(7, 9), first: Span::new(0, 2) }
        );
    }
}
