//! Pull-style grammar driver.
//!
//! The driver consumes tokens and raises semantic events (data block,
//! category, row, item, save frame) on a [`Sink`]. Data files reject save
//! frames; the dictionary parser supplies a sink that treats them as
//! nested scopes.

pub mod scan;

use crate::error::{Error, Result};
use crate::token::{Token, Tokenizer, ValueKind};
use crate::text::{iequals, split_tag_name};

pub use scan::{index_datablocks, scan_datablock};

/// Receiver of the parser's semantic events.
pub(crate) trait Sink {
    fn datablock(&mut self, name: &str) -> Result<()>;
    fn category(&mut self, name: &str) -> Result<()>;
    fn row(&mut self) -> Result<()>;
    fn item(&mut self, item: &str, text: &str, kind: ValueKind) -> Result<()>;
    fn save_begin(&mut self, name: &str) -> Result<()>;
    fn save_end(&mut self) -> Result<()>;

    /// Whether save frames are legal; data files say no.
    fn accepts_save_frames(&self) -> bool {
        false
    }
}

pub(crate) struct Parser<'a, S: Sink> {
    tok: Tokenizer<'a>,
    lookahead: Token,
    sink: &'a mut S,
}

impl<'a, S: Sink> Parser<'a, S> {
    pub(crate) fn new(src: &'a [u8], sink: &'a mut S) -> Result<Self> {
        let mut tok = Tokenizer::new(src);
        let lookahead = tok.next_token()?;
        Ok(Parser {
            tok,
            lookahead,
            sink,
        })
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.tok.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::parse(self.tok.line(), message)
    }

    /// Parse a whole stream: any number of `global_` sections (parsed and
    /// discarded) and named data blocks.
    pub(crate) fn parse_file(&mut self) -> Result<()> {
        loop {
            match &self.lookahead {
                Token::Eof => return Ok(()),
                Token::Global => {
                    self.advance()?;
                    self.parse_global()?;
                }
                Token::Data(name) => {
                    let name = name.clone();
                    self.sink.datablock(&name)?;
                    self.advance()?;
                    self.parse_datablock()?;
                }
                _ => return Err(self.err("this does not seem to be a CIF file")),
            }
        }
    }

    fn parse_global(&mut self) -> Result<()> {
        while matches!(self.lookahead, Token::Tag(_)) {
            self.advance()?;
            match self.lookahead {
                Token::Value { .. } => {
                    self.advance()?;
                }
                _ => return Err(self.err("expected a value in global_ section")),
            }
        }
        Ok(())
    }

    /// The body of one data block (or save frame).
    pub(crate) fn parse_datablock(&mut self) -> Result<()> {
        // the sentinel keeps the first tag-value run from merging into a
        // category of the same name from a preceding loop
        let mut current: Option<String> = None;

        loop {
            match &self.lookahead {
                Token::Loop => {
                    current = None;
                    self.advance()?;
                    self.parse_loop()?;
                }
                Token::Tag(tag) => {
                    let (cat, item) = split_tag_name(tag);
                    let (cat, item) = (cat.to_string(), item.to_string());
                    if current.as_deref().map_or(true, |c| !iequals(c, &cat)) {
                        self.sink.category(&cat)?;
                        self.sink.row()?;
                        current = Some(cat);
                    }
                    self.advance()?;
                    match self.advance()? {
                        Token::Value { text, kind } => self.sink.item(&item, &text, kind)?,
                        _ => return Err(self.err(format!("expected a value for tag _{item}"))),
                    }
                }
                Token::Save(Some(name)) => {
                    if !self.sink.accepts_save_frames() {
                        return Err(
                            self.err("a regular CIF file should not contain a save frame")
                        );
                    }
                    let name = name.clone();
                    self.sink.save_begin(&name)?;
                    self.advance()?;
                    self.parse_datablock()?;
                    match self.advance()? {
                        Token::Save(None) => self.sink.save_end()?,
                        _ => return Err(self.err("unterminated save frame")),
                    }
                    current = None;
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_loop(&mut self) -> Result<()> {
        let mut category: Option<String> = None;
        let mut items: Vec<String> = Vec::new();

        while let Token::Tag(tag) = &self.lookahead {
            let (cat, item) = split_tag_name(tag);
            match &category {
                None => {
                    self.sink.category(cat)?;
                    category = Some(cat.to_string());
                }
                Some(current) if !iequals(current, cat) => {
                    return Err(self.err("inconsistent categories in loop_"));
                }
                Some(_) => {}
            }
            items.push(item.to_string());
            self.advance()?;
        }

        if items.is_empty() {
            return Err(self.err("loop_ without tags"));
        }

        while matches!(self.lookahead, Token::Value { .. }) {
            self.sink.row()?;
            for item in &items {
                match self.advance()? {
                    Token::Value { text, kind } => self.sink.item(item, &text, kind)?,
                    _ => {
                        return Err(
                            self.err("loop_ value count is not a multiple of its tag count")
                        )
                    }
                }
            }
        }
        Ok(())
    }
}
