use std::fmt::Write;

use super::{Diagnostic, Label};
use crate::source::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let heading = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        let _ = writeln!(out, "{}: {}", self.bold_red(&heading), self.bold(&d.message));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            let map = SourceMap::new(&source.text);
            self.snippet(&mut out, &map, &source.name, label);
        }

        for label in d.labels.iter().filter(|l| !l.is_primary) {
            match &d.source {
                Some(source) => {
                    let at = SourceMap::new(&source.text).locate(label.span.start);
                    let _ = writeln!(out, "  {} {} at {}:{at}", self.dim("="), label.message, source.name);
                }
                None => {
                    let _ = writeln!(out, "  {} {}", self.dim("="), label.message);
                }
            }
        }

        for note in &d.notes {
            let _ = writeln!(out, "  {} note: {}", self.dim("="), note);
        }

        if let Some(suggestion) = &d.suggestion {
            let _ = writeln!(out, "  {} suggestion: {}", self.dim("="), suggestion);
        }

        out
    }

    /// `--> file:line:col`, the source line, and carets under the span.
    fn snippet(&self, out: &mut String, map: &SourceMap<'_>, name: &str, label: &Label) {
        let at = map.locate(label.span.start);
        let line_text = map.line(at.line);

        let _ = writeln!(out, "  {} {name}:{at}", self.cyan("-->"));

        let gutter = at.line.to_string().len();
        let pipe = self.cyan("|");
        let pad = " ".repeat(gutter);
        let _ = writeln!(out, "{pad} {pipe}");

        let line_num = self.cyan(&format!("{:>gutter$}", at.line));
        let _ = writeln!(out, "{line_num} {pipe} {line_text}");

        let width = map
            .source()
            .get(label.span.start..label.span.end)
            .map_or(label.span.len(), |text| text.chars().count())
            .max(1);
        let carets = self.bold_red(&"^".repeat(width));
        let indent = " ".repeat(at.col - 1);
        if label.message.is_empty() {
            let _ = writeln!(out, "{pad} {pipe} {indent}{carets}");
        } else {
            let _ = writeln!(out, "{pad} {pipe} {indent}{carets} {}", self.bold_red(&label.message));
        }

        let _ = writeln!(out, "{pad} {pipe}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use crate::source::Span;

    const SOURCE: &str = "start:\n  push 1\n  jmp finish\n";

    fn undefined_label() -> Diagnostic {
        let err = assemble(SOURCE).unwrap_err();
        Diagnostic::from(&err).with_source("loop.lasm", SOURCE)
    }

    #[test]
    fn render_heading_has_code_and_message() {
        let out = AnsiRenderer { use_color: false }.render(&undefined_label());
        assert!(out.starts_with("error[ASM-P001]: undefined label `finish`\n"), "{out}");
    }

    #[test]
    fn render_points_at_file_line_and_column() {
        let out = AnsiRenderer { use_color: false }.render(&undefined_label());
        assert!(out.contains("--> loop.lasm:3:7"), "{out}");
        assert!(out.contains("3 |   jmp finish"), "{out}");
        assert!(out.contains("  |       ^^^^^^ no label with this name"), "{out}");
        assert!(out.contains("= suggestion: define it with `finish:`"), "{out}");
    }

    #[test]
    fn secondary_labels_show_their_location() {
        let source = "top: nop\ntop: hlt\n";
        let err = assemble(source).unwrap_err();
        let out = AnsiRenderer { use_color: false }.render(&Diagnostic::from(&err).with_source("dup.lasm", source));
        assert!(out.contains("--> dup.lasm:2:1"), "{out}");
        assert!(out.contains("= first defined here at dup.lasm:1:1"), "{out}");
    }

    #[test]
    fn render_no_source_still_works() {
        let d = Diagnostic::error("something bad");
        let out = AnsiRenderer { use_color: false }.render(&d);
        assert_eq!(out, "error: something bad\n");
    }

    #[test]
    fn caret_width_counts_characters() {
        let source = "push 'é' x";
        let d = Diagnostic::error("bad").with_span(Span::new(5, 9), "").with_source("c.lasm", source);
        let out = AnsiRenderer { use_color: false }.render(&d);
        assert!(out.contains("|      ^^^\n"), "{out}");
    }

    #[test]
    fn colour_is_optional() {
        let d = undefined_label();
        assert!(AnsiRenderer { use_color: true }.render(&d).contains("\x1b["));
        assert!(!AnsiRenderer { use_color: false }.render(&d).contains("\x1b["));
    }
}
