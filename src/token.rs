//! CIF tokenizer.
//!
//! A byte-level scanner that classifies lexemes as tags, values, and the
//! reserved words `data_`, `save_`, `loop_`, `global_`, `stop_`. CR, LF and
//! CR-LF all normalize to a single LF and the line counter advances on LF.
//! Unquoted lexemes run through a restart ladder (first tried as a float,
//! then as an integer, then accepted as a generic value) after which the
//! completed lexeme may be promoted to a reserved word, the unknown marker
//! `?` or the inapplicable marker `.`.

use crate::error::{Error, Result};
use crate::text::{is_any_print, is_non_blank, is_white};

/// Value classification attached to a [`Token::Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    String,
    TextField,
    /// The `.` marker; the token text is `"."`.
    Inapplicable,
    /// The `?` marker; the token text is empty.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Eof,
    /// `data_<name>`.
    Data(String),
    /// `save_<name>` opens a frame; bare `save_` closes one.
    Save(Option<String>),
    Loop,
    Global,
    Stop,
    /// A tag, including its leading underscore.
    Tag(String),
    Value { text: String, kind: ValueKind },
}

pub struct Tokenizer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    bol: bool,
    strict: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Tokenizer {
            src,
            pos: 0,
            line: 1,
            bol: true,
            strict: false,
        }
    }

    pub fn strict(src: &'a [u8]) -> Self {
        Tokenizer {
            strict: true,
            ..Tokenizer::new(src)
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::parse(self.line, message)
    }

    /// Next input byte with CR/LF translation, or `None` at end of input.
    fn next_byte(&mut self) -> Option<u8> {
        let b = *self.src.get(self.pos)?;
        self.pos += 1;
        if b == b'\r' {
            if self.src.get(self.pos) == Some(&b'\n') {
                self.pos += 1;
            }
            self.line += 1;
            return Some(b'\n');
        }
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn peek_byte(&self) -> Option<u8> {
        match self.src.get(self.pos) {
            Some(b'\r') => Some(b'\n'),
            other => other.copied(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        while let Some(b) = self.peek_byte() {
            match b {
                b' ' | b'\t' => {
                    self.next_byte();
                    self.bol = false;
                }
                b'\n' => {
                    self.next_byte();
                    self.bol = true;
                }
                b'#' => {
                    self.next_byte();
                    loop {
                        match self.peek_byte() {
                            None | Some(b'\n') => break,
                            Some(c) => {
                                if self.strict && !is_any_print(c) {
                                    return Err(self.err("invalid character in comment"));
                                }
                                self.next_byte();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments()?;

        let b = match self.peek_byte() {
            None => return Ok(Token::Eof),
            Some(b) => b,
        };

        if b == b';' && self.bol {
            return self.scan_text_field();
        }
        self.bol = false;

        if b == b'\'' || b == b'"' {
            return self.scan_quoted(b);
        }
        if b == b'_' {
            return self.scan_tag();
        }
        self.scan_unquoted()
    }

    fn scan_tag(&mut self) -> Result<Token> {
        let mut tag = String::new();
        while let Some(b) = self.peek_byte() {
            if !is_non_blank(b) {
                break;
            }
            self.next_byte();
            tag.push(b as char);
        }
        Ok(Token::Tag(tag))
    }

    fn scan_quoted(&mut self, quote: u8) -> Result<Token> {
        self.next_byte(); // opening quote
        let mut text = String::new();
        loop {
            let b = match self.next_byte() {
                None => return Err(self.err("unterminated quoted string")),
                Some(b) => b,
            };
            if b == quote {
                // A closing quote must be followed by whitespace or EOF;
                // anything else makes the quote part of the value.
                match self.peek_byte() {
                    None => return Ok(Token::Value { text, kind: ValueKind::String }),
                    Some(n) if is_white(n) => {
                        return Ok(Token::Value { text, kind: ValueKind::String })
                    }
                    Some(_) => text.push(b as char),
                }
            } else if b == b'\n' || is_any_print(b) {
                push_byte(&mut text, b);
            } else {
                return Err(self.err("invalid character in quoted string"));
            }
        }
    }

    fn scan_text_field(&mut self) -> Result<Token> {
        self.next_byte(); // opening ';'
        self.bol = false;
        let mut text = String::new();
        loop {
            // consume the rest of the current line
            loop {
                match self.next_byte() {
                    None => return Err(self.err("unterminated text field")),
                    Some(b'\n') => break,
                    Some(b) if is_any_print(b) => push_byte(&mut text, b),
                    Some(_) => return Err(self.err("invalid character in text field")),
                }
            }
            // a line starting with ';' terminates the field
            if self.peek_byte() == Some(b';') {
                self.next_byte();
                self.bol = false;
                return Ok(Token::Value {
                    text,
                    kind: ValueKind::TextField,
                });
            }
            if self.peek_byte().is_none() {
                return Err(self.err("unterminated text field"));
            }
            text.push('\n');
        }
    }

    fn scan_unquoted(&mut self) -> Result<Token> {
        let mut text = String::new();
        while let Some(b) = self.peek_byte() {
            if !is_non_blank(b) {
                break;
            }
            self.next_byte();
            push_byte(&mut text, b);
        }
        debug_assert!(!text.is_empty());
        Ok(promote(text))
    }
}

fn push_byte(text: &mut String, b: u8) {
    if b < 0x80 {
        text.push(b as char);
    } else {
        // raw high byte: keep it as the equivalent latin-1 scalar so the
        // content survives; CIF itself is ASCII-only
        text.push(char::from(b));
    }
}

/// Reserved-word promotion of a completed unquoted lexeme.
fn promote(text: String) -> Token {
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("data_") {
        return Token::Data(text[5..].to_string());
    }
    if lower.starts_with("save_") {
        return if text.len() == 5 {
            Token::Save(None)
        } else {
            Token::Save(Some(text[5..].to_string()))
        };
    }
    match lower.as_str() {
        "loop_" => return Token::Loop,
        "global_" => return Token::Global,
        "stop_" => return Token::Stop,
        _ => {}
    }
    if text == "?" {
        return Token::Value {
            text: String::new(),
            kind: ValueKind::Unknown,
        };
    }
    if text == "." {
        return Token::Value {
            text,
            kind: ValueKind::Inapplicable,
        };
    }
    let kind = classify_number(&text);
    Token::Value { text, kind }
}

/// The restart ladder: try the lexeme as an int, then as a float, then fall
/// back to a generic string value. Each attempt must consume the whole
/// lexeme to count.
fn classify_number(text: &str) -> ValueKind {
    if let Some((_, n)) = crate::text::parse_int(text) {
        if n == text.len() {
            return ValueKind::Int;
        }
    }
    if let Some((_, n)) = crate::text::parse_float(text) {
        if n == text.len() {
            return ValueKind::Float;
        }
    }
    ValueKind::String
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(src: &str) -> Vec<Token> {
        let mut t = Tokenizer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let tok = t.next_token().unwrap();
            if tok == Token::Eof {
                break;
            }
            out.push(tok);
        }
        out
    }

    fn value(text: &str, kind: ValueKind) -> Token {
        Token::Value {
            text: text.to_string(),
            kind,
        }
    }

    #[test]
    fn numeric_classification() {
        let toks = all_tokens("1.0 -.2e11 1.3e-10 3.000000 42 -7 boo 1.2.3");
        assert_eq!(
            toks,
            vec![
                value("1.0", ValueKind::Float),
                value("-.2e11", ValueKind::Float),
                value("1.3e-10", ValueKind::Float),
                value("3.000000", ValueKind::Float),
                value("42", ValueKind::Int),
                value("-7", ValueKind::Int),
                value("boo", ValueKind::String),
                value("1.2.3", ValueKind::String),
            ]
        );
    }

    #[test]
    fn reserved_words() {
        let toks = all_tokens("data_TEST loop_ GLOBAL_ stop_ save_frame save_");
        assert_eq!(
            toks,
            vec![
                Token::Data("TEST".into()),
                Token::Loop,
                Token::Global,
                Token::Stop,
                Token::Save(Some("frame".into())),
                Token::Save(None),
            ]
        );
    }

    #[test]
    fn unknown_and_inapplicable() {
        let toks = all_tokens("? .");
        assert_eq!(
            toks,
            vec![
                value("", ValueKind::Unknown),
                value(".", ValueKind::Inapplicable),
            ]
        );
    }

    #[test]
    fn tags() {
        let toks = all_tokens("_cell.length_a 50.0");
        assert_eq!(
            toks,
            vec![
                Token::Tag("_cell.length_a".into()),
                value("50.0", ValueKind::Float),
            ]
        );
    }

    #[test]
    fn quoted_strings_close_only_before_whitespace() {
        let toks = all_tokens("'it's fine' \"two words\"");
        assert_eq!(
            toks,
            vec![
                value("it's fine", ValueKind::String),
                value("two words", ValueKind::String),
            ]
        );
    }

    #[test]
    fn unterminated_quote_reports_line() {
        let mut t = Tokenizer::new(b"a b\n'oops");
        t.next_token().unwrap();
        t.next_token().unwrap();
        match t.next_token() {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn text_field_preserves_internal_whitespace() {
        let toks = all_tokens("_t.v\n;line one\n  indented\n\nlast\n;\n");
        assert_eq!(
            toks,
            vec![
                Token::Tag("_t.v".into()),
                value("line one\n  indented\n\nlast", ValueKind::TextField),
            ]
        );
    }

    #[test]
    fn text_field_only_opens_at_line_start() {
        // a mid-line semicolon is an ordinary value character
        let toks = all_tokens("_t.v a;b");
        assert_eq!(
            toks,
            vec![Token::Tag("_t.v".into()), value("a;b", ValueKind::String)]
        );
    }

    #[test]
    fn unterminated_text_field() {
        let mut t = Tokenizer::new(b";open\nnever closed");
        assert!(matches!(t.next_token(), Err(Error::Parse { .. })));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = all_tokens("# leading\nval # trailing\nnext");
        assert_eq!(
            toks,
            vec![
                value("val", ValueKind::String),
                value("next", ValueKind::String),
            ]
        );
    }

    #[test]
    fn strict_mode_checks_comment_bytes() {
        let src = b"# bad \x01 comment\nval";
        let mut strict = Tokenizer::strict(src);
        assert!(matches!(strict.next_token(), Err(Error::Parse { .. })));
        let mut lenient = Tokenizer::new(src);
        assert!(matches!(lenient.next_token(), Ok(Token::Value { .. })));
    }

    #[test]
    fn crlf_normalizes() {
        let toks = all_tokens("_t.v\r\n;a\r\nb\r\n;\r\n");
        assert_eq!(
            toks,
            vec![
                Token::Tag("_t.v".into()),
                value("a\nb", ValueKind::TextField),
            ]
        );
    }

    #[test]
    fn hash_inside_value_is_not_a_comment() {
        // comments require preceding whitespace
        let toks = all_tokens("ab#cd ef");
        assert_eq!(
            toks,
            vec![
                value("ab#cd", ValueKind::String),
                value("ef", ValueKind::String),
            ]
        );
    }
}
