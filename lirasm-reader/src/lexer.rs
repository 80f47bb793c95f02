//! The LIR tokenizer.
//!
//! A single pass over ASCII input producing NAME, NUMBER, PUNCT, and
//! NEWLINE tokens. Identifier-like runs cover `[A-Za-z0-9_$.+-]`, which
//! means directives (`.begin`) and dotted patch targets (`A.exit`) arrive
//! as single NAME tokens. A run is classified NUMBER when it starts with
//! `0x`/`0X`, a digit, or a `.` followed by a digit; everything else is a
//! NAME. `;` and `\n` both produce NEWLINE, so statements can share a
//! physical line.

use crate::error::{Location, ParseError, ParseResult};

/// The kind of a token.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokKind {
    Name,
    Number,
    Punct,
    Newline,
    Eof,
}

/// One token, borrowing its text from the source.
#[derive(Clone, Copy, Debug)]
pub struct Token<'s> {
    pub kind: TokKind,
    pub text: &'s str,
    pub line: u32,
}

impl Token<'_> {
    /// The token's location for error reporting.
    pub fn loc(&self) -> Location {
        Location {
            line_number: self.line,
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'.' | b'+' | b'-')
}

/// The tokenizer.
pub struct Tokenizer<'s> {
    src: &'s [u8],
    pos: usize,
    line: u32,
    peeked: Option<Token<'s>>,
}

impl<'s> Tokenizer<'s> {
    /// Tokenize `src`, counting lines from 1.
    pub fn new(src: &'s str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            peeked: None,
        }
    }

    /// The current location.
    pub fn loc(&self) -> Location {
        Location {
            line_number: self.line,
        }
    }

    fn text(&self, start: usize, end: usize) -> &'s str {
        // The scanner only accepts ASCII, so the slice is valid UTF-8.
        core::str::from_utf8(&self.src[start..end]).expect("non-ASCII slipped through")
    }

    /// Produce the next token.
    pub fn get(&mut self) -> ParseResult<Token<'s>> {
        if let Some(tok) = self.peeked.take() {
            return Ok(tok);
        }
        // Skip horizontal whitespace.
        while let Some(&b) = self.src.get(self.pos) {
            if b == b' ' || b == b'\t' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let line = self.line;
        let Some(&b) = self.src.get(self.pos) else {
            return Ok(Token {
                kind: TokKind::Eof,
                text: "",
                line,
            });
        };
        if !b.is_ascii() {
            return err!(self.loc(), "non-ASCII input");
        }
        // `->` outranks the identifier characters `-` and `>`.
        if b == b'-' && self.src.get(self.pos + 1) == Some(&b'>') {
            let start = self.pos;
            self.pos += 2;
            return Ok(Token {
                kind: TokKind::Punct,
                text: self.text(start, start + 2),
                line,
            });
        }
        if is_ident_byte(b) {
            let start = self.pos;
            while self.pos < self.src.len() && is_ident_byte(self.src[self.pos]) {
                self.pos += 1;
            }
            let text = self.text(start, self.pos);
            let bytes = text.as_bytes();
            let numberish = bytes[0].is_ascii_digit()
                || text.starts_with("0x")
                || text.starts_with("0X")
                || (bytes[0] == b'.' && bytes.len() > 1 && bytes[1].is_ascii_digit());
            return Ok(Token {
                kind: if numberish {
                    TokKind::Number
                } else {
                    TokKind::Name
                },
                text,
                line,
            });
        }
        match b {
            b':' | b',' | b'=' | b'[' | b']' | b'(' | b')' => {
                let start = self.pos;
                self.pos += 1;
                Ok(Token {
                    kind: TokKind::Punct,
                    text: self.text(start, start + 1),
                    line,
                })
            }
            b';' => {
                self.pos += 1;
                Ok(Token {
                    kind: TokKind::Newline,
                    text: ";",
                    line,
                })
            }
            b'\n' => {
                self.pos += 1;
                self.line += 1;
                Ok(Token {
                    kind: TokKind::Newline,
                    text: "\n",
                    line,
                })
            }
            _ => err!(self.loc(), "unrecognized character '{}'", b as char),
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> ParseResult<Token<'s>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.get()?);
        }
        Ok(self.peeked.unwrap())
    }

    /// Consume the next token and assert its kind (and, optionally, its
    /// exact text).
    pub fn eat(&mut self, kind: TokKind, exact: Option<&str>) -> ParseResult<Token<'s>> {
        let tok = self.get()?;
        if tok.kind != kind {
            return err!(
                tok.loc(),
                "expected {}, got '{}'",
                describe(kind, exact),
                tok.text
            );
        }
        if let Some(want) = exact {
            if tok.text != want {
                return err!(tok.loc(), "expected '{}', got '{}'", want, tok.text);
            }
        }
        Ok(tok)
    }

    /// Consume a NAME token and return its text.
    pub fn get_name(&mut self) -> ParseResult<&'s str> {
        Ok(self.eat(TokKind::Name, None)?.text)
    }
}

fn describe(kind: TokKind, exact: Option<&str>) -> String {
    match (kind, exact) {
        (_, Some(text)) => format!("'{text}'"),
        (TokKind::Name, None) => "a name".to_string(),
        (TokKind::Number, None) => "a number".to_string(),
        (TokKind::Punct, None) => "punctuation".to_string(),
        (TokKind::Newline, None) => "end of statement".to_string(),
        (TokKind::Eof, None) => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokKind, String)> {
        let mut t = Tokenizer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = t.get().unwrap();
            if tok.kind == TokKind::Eof {
                break;
            }
            out.push((tok.kind, tok.text.to_string()));
        }
        out
    }

    #[test]
    fn statements_and_names() {
        let toks = kinds("r = addi a b\n");
        assert_eq!(
            toks,
            vec![
                (TokKind::Name, "r".to_string()),
                (TokKind::Punct, "=".to_string()),
                (TokKind::Name, "addi".to_string()),
                (TokKind::Name, "a".to_string()),
                (TokKind::Name, "b".to_string()),
                (TokKind::Newline, "\n".to_string()),
            ]
        );
    }

    #[test]
    fn semicolons_separate_statements() {
        let toks = kinds("a = immi 2; b = immi 3");
        let newlines = toks.iter().filter(|(k, _)| *k == TokKind::Newline).count();
        assert_eq!(newlines, 1);
        assert_eq!(toks[3], (TokKind::Number, "2".to_string()));
    }

    #[test]
    fn number_classification() {
        assert_eq!(kinds("0x1F")[0].0, TokKind::Number);
        assert_eq!(kinds("0XAB")[0].0, TokKind::Number);
        assert_eq!(kinds("42")[0].0, TokKind::Number);
        assert_eq!(kinds(".9")[0].0, TokKind::Number);
        assert_eq!(kinds("1.5e3")[0].0, TokKind::Number);
        assert_eq!(kinds("x9")[0].0, TokKind::Name);
        assert_eq!(kinds(".begin")[0].0, TokKind::Name);
        assert_eq!(kinds("a.exit")[0].0, TokKind::Name);
    }

    #[test]
    fn arrow_outranks_identifier_runs() {
        let toks = kinds(".patch a.g -> b\n");
        assert_eq!(toks[0], (TokKind::Name, ".patch".to_string()));
        assert_eq!(toks[1], (TokKind::Name, "a.g".to_string()));
        assert_eq!(toks[2], (TokKind::Punct, "->".to_string()));
        assert_eq!(toks[3], (TokKind::Name, "b".to_string()));
    }

    #[test]
    fn label_colon_is_punctuation() {
        let toks = kinds("loop: j loop\n");
        assert_eq!(toks[0], (TokKind::Name, "loop".to_string()));
        assert_eq!(toks[1], (TokKind::Punct, ":".to_string()));
    }

    #[test]
    fn lines_are_counted() {
        let mut t = Tokenizer::new("a\nb\nc");
        assert_eq!(t.get().unwrap().line, 1);
        t.get().unwrap(); // newline
        assert_eq!(t.get().unwrap().line, 2);
        t.get().unwrap();
        assert_eq!(t.get().unwrap().line, 3);
    }

    #[test]
    fn rejects_unknown_characters() {
        let mut t = Tokenizer::new("a @ b");
        t.get().unwrap();
        assert!(t.get().is_err());
    }
}
