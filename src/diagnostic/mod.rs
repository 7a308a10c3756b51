pub mod ansi;

use crate::parser::AsmError;
use crate::source::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

/// A named source text the labels point into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<SourceFile>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.source = Some(SourceFile { name: name.into(), text: text.into() });
        self
    }
}

impl From<&AsmError> for Diagnostic {
    fn from(e: &AsmError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            AsmError::Lex(_) => d
                .with_span(e.span(), "not a word")
                .with_note("this is a bug in the lexer"),
            AsmError::UndefinedLabel { name, span } => d
                .with_span(*span, "no label with this name")
                .with_suggestion(format!("define it with `{name}:` before the target instruction")),
            AsmError::UnexpectedToken { span, .. } => d
                .with_span(*span, "expected an instruction mnemonic here")
                .with_note("only push, drop, dup, swap, jumps, call and ncall take an operand"),
            AsmError::MissingOperand { span, .. } => d
                .with_span(*span, "operand missing after this instruction"),
            AsmError::UnexpectedOperand { span, .. } => d
                .with_span(*span, "expected an integer literal or a label name")
                .with_note("a label used as an operand is written without its colon"),
            AsmError::DuplicateLabel { span, first, .. } => d
                .with_span(*span, "redefined here")
                .with_secondary_span(*first, "first defined here"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.message, "something went wrong");
        assert!(d.code.is_none());
        assert!(d.labels.is_empty());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
        assert!(d.source.is_none());
    }

    #[test]
    fn diagnostic_with_span_and_source() {
        let d = Diagnostic::error("bad operand")
            .with_span(Span::new(5, 8), "here")
            .with_source("prog.lasm", "push hlt");
        assert_eq!(d.labels.len(), 1);
        assert!(d.labels[0].is_primary);
        assert_eq!(d.labels[0].span, Span::new(5, 8));
        assert_eq!(d.source.as_ref().map(|s| s.name.as_str()), Some("prog.lasm"));
    }

    #[test]
    fn from_undefined_label() {
        let e = AsmError::UndefinedLabel { name: "exit".into(), span: Span::new(4, 8) };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("ASM-P001"));
        assert!(d.message.contains("exit"));
        assert_eq!(d.labels[0].span, Span::new(4, 8));
        assert!(d.suggestion.as_deref().is_some_and(|s| s.contains("exit:")));
    }

    #[test]
    fn from_duplicate_label_points_at_both() {
        let e = AsmError::DuplicateLabel { name: "top".into(), span: Span::new(10, 14), first: Span::new(0, 4) };
        let d = Diagnostic::from(&e);
        assert_eq!(d.labels.len(), 2);
        assert!(d.labels[0].is_primary);
        assert_eq!(d.labels[1].span, Span::new(0, 4));
        assert!(!d.labels[1].is_primary);
    }

    #[test]
    fn from_missing_operand() {
        let e = AsmError::MissingOperand { opcode: Opcode::Jmp, span: Span::new(0, 3) };
        let d = Diagnostic::from(&e);
        assert_eq!(d.message, "`jmp` expects an operand");
        assert_eq!(d.code, Some("ASM-P003"));
    }
}
