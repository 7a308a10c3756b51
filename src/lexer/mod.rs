use logos::Logos;

use crate::isa::Opcode;
use crate::source::Span;

/// Raw scan: every whitespace-delimited run is a word unless it opens a
/// comment. Classification happens afterwards in [`classify`].
#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"(//|#|;)[^\n]*", allow_greedy = true))]
enum Raw {
    #[regex(r"[^ \t\r\n\f;#/][^ \t\r\n\f]*")]
    #[regex(r"/([^ \t\r\n\f/][^ \t\r\n\f]*)?")]
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Instruction(Opcode),
    Integer(i64),
    /// `name:`; holds the name without the colon.
    LabelDef(String),
    /// A label reference, resolved in phase two.
    Identifier(String),
}

impl TokenKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Instruction(_) => "instruction",
            TokenKind::Integer(_) => "integer literal",
            TokenKind::LabelDef(_) => "label definition",
            TokenKind::Identifier(_) => "identifier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    /// Every non-blank byte belongs to some word, so this is an internal
    /// invariant failure rather than bad input.
    #[error("unreachable token {text:?}")]
    Unreachable { text: String, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::Unreachable { span, .. } => *span,
        }
    }
}

/// Pull-based lexer: one classified token per call.
pub struct Lexer<'src> {
    raw: logos::Lexer<'src, Raw>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer { raw: Raw::lexer(source) }
    }

    /// The next token, or `None` once the source is exhausted.
    pub fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        let Some(result) = self.raw.next() else {
            return Ok(None);
        };
        let text = self.raw.slice();
        let span = Span::from(self.raw.span());
        match result {
            Ok(Raw::Word) => Ok(Some(Token { kind: classify(text), text: text.to_string(), span })),
            Err(()) => Err(LexError::Unreachable { text: text.to_string(), span }),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

/// Lex a whole source text.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).collect()
}

/// Mnemonic, then integer literal, then label definition, else identifier.
pub fn classify(text: &str) -> TokenKind {
    if let Some(op) = Opcode::from_mnemonic(text) {
        return TokenKind::Instruction(op);
    }
    if let Some(n) = parse_integer(text) {
        return TokenKind::Integer(n);
    }
    match text.strip_suffix(':') {
        Some(name) if !name.is_empty() && !name.contains(':') => TokenKind::LabelDef(name.to_string()),
        _ => TokenKind::Identifier(text.to_string()),
    }
}

/// Parses a whole token as an integer literal.
///
/// Accepts an optional sign, `0x`/`0b`/`0o` prefixes, C-style leading-zero
/// octal and quoted character literals. Decimal literals must fit in `i64`;
/// prefixed ones may use the full `u64` range and wrap.
pub fn parse_integer(text: &str) -> Option<i64> {
    if let Some(quoted) = text.strip_prefix('\'') {
        return parse_char(quoted.strip_suffix('\'')?);
    }

    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, body) = match digits.get(..2) {
        Some("0x" | "0X") => (16, &digits[2..]),
        Some("0b" | "0B") => (2, &digits[2..]),
        Some("0o" | "0O") => (8, &digits[2..]),
        _ if digits.len() > 1 && digits.starts_with('0') => (8, &digits[1..]),
        _ => (10, digits),
    };
    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    if radix == 10 {
        return text.parse().ok();
    }
    let magnitude = u64::from_str_radix(body, radix).ok()? as i64;
    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}

/// Body of a character literal with the quotes removed.
fn parse_char(body: &str) -> Option<i64> {
    let mut chars = body.chars();
    let first = chars.next()?;
    if first != '\\' {
        return chars.next().is_none().then_some(first as i64);
    }

    let escape = chars.as_str();
    let value = match escape {
        "\\" => '\\' as i64,
        "'" => '\'' as i64,
        "\"" => '"' as i64,
        "n" => '\n' as i64,
        "t" => '\t' as i64,
        "r" => '\r' as i64,
        _ => {
            if let Some(hex) = escape.strip_prefix('u') {
                if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return None;
                }
                i64::from_str_radix(hex, 16).ok()?
            } else if (1..=3).contains(&escape.len()) && escape.chars().all(|c| matches!(c, '0'..='7')) {
                i64::from_str_radix(escape, 8).ok()?
            } else {
                return None;
            }
        }
    };
    Some(value)
}
