//! The file container: an ordered set of data blocks with an optional
//! attached validator, plus the load/save entry points.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parse::{self, Parser, Sink};
use crate::store::datablock::DataBlock;
use crate::store::row::RowId;
use crate::text::iequals;
use crate::token::ValueKind;
use crate::validate::Validator;

#[derive(Default)]
pub struct File {
    blocks: Vec<DataBlock>,
    validator: Option<Arc<Validator>>,
}

impl File {
    pub fn new() -> File {
        File::default()
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Parse a complete CIF text.
    pub fn parse(src: &[u8]) -> Result<File> {
        let mut sink = FileSink::default();
        Parser::new(src, &mut sink)?.parse_file()?;
        Ok(sink.file)
    }

    /// Read a byte stream to its end and parse it.
    pub fn load(mut reader: impl Read) -> Result<File> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        File::parse(&buf)
    }

    /// Parse only the named data block, located with a fast byte scan.
    /// Returns `None` when the stream has no such block.
    pub fn parse_single_datablock(src: &[u8], name: &str) -> Result<Option<File>> {
        match parse::scan_datablock(src, name) {
            None => Ok(None),
            Some(offset) => Self::parse_block_at(src, name, offset).map(Some),
        }
    }

    /// Parse the named block at a byte offset previously produced by
    /// [`parse::index_datablocks`].
    pub fn parse_block_at(src: &[u8], name: &str, offset: usize) -> Result<File> {
        let mut sink = FileSink::default();
        sink.datablock(name)?;
        Parser::new(&src[offset..], &mut sink)?.parse_datablock()?;
        Ok(sink.file)
    }

    // -----------------------------------------------------------------------
    // Saving
    // -----------------------------------------------------------------------

    pub fn save(&self, writer: impl Write) -> Result<()> {
        crate::write::write_file(self, writer)
    }

    /// Save with a tag-order hint: categories are emitted in the order
    /// their first tag appears in `tag_order`.
    pub fn save_with_order(&self, writer: impl Write, tag_order: &[String]) -> Result<()> {
        crate::write::write_file_with_order(self, writer, tag_order)
    }

    /// Tags of all blocks in serialization order.
    pub fn tag_order(&self) -> Vec<String> {
        let mut out = Vec::new();
        for b in &self.blocks {
            out.extend(b.get_tag_order());
        }
        out
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &DataBlock> {
        self.blocks.iter()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut DataBlock> {
        self.blocks.iter_mut()
    }

    pub fn front(&self) -> Option<&DataBlock> {
        self.blocks.first()
    }

    pub fn front_mut(&mut self) -> Option<&mut DataBlock> {
        self.blocks.first_mut()
    }

    pub fn get(&self, name: &str) -> Option<&DataBlock> {
        self.blocks.iter().find(|b| iequals(b.name(), name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DataBlock> {
        self.blocks.iter_mut().find(|b| iequals(b.name(), name))
    }

    /// Get or append a block; block names are unique case-insensitively.
    pub fn block(&mut self, name: &str) -> &mut DataBlock {
        let ix = match self.blocks.iter().position(|b| iequals(b.name(), name)) {
            Some(ix) => ix,
            None => {
                let mut db = DataBlock::new(name);
                let _ = db.set_validator(self.validator.clone());
                self.blocks.push(db);
                self.blocks.len() - 1
            }
        };
        &mut self.blocks[ix]
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Attach a validator; the attachment cascades to every block and
    /// category.
    pub fn set_validator(&mut self, v: Option<Arc<Validator>>) -> Result<()> {
        self.validator = v.clone();
        for b in &mut self.blocks {
            b.set_validator(v.clone()).map_err(|e| match e {
                Error::Validation {
                    category,
                    item,
                    message,
                } => Error::Validation {
                    category,
                    item,
                    message: format!("while setting validator in datablock {}: {message}", b.name()),
                },
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn validator(&self) -> Option<&Arc<Validator>> {
        self.validator.as_ref()
    }

    /// Validate every block; see [`DataBlock::validate`].
    pub fn validate(&self) -> Result<bool> {
        let mut clean = true;
        for b in &self.blocks {
            clean = b.validate()? && clean;
        }
        Ok(clean)
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        if self.blocks.len() != other.blocks.len() {
            return false;
        }
        self.blocks
            .iter()
            .all(|b| other.get(b.name()).is_some_and(|o| b == o))
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.blocks.iter().map(DataBlock::name))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Parse sink
// ---------------------------------------------------------------------------

/// Builds a [`File`] from parser events.
#[derive(Default)]
struct FileSink {
    file: File,
    block: Option<usize>,
    category: Option<String>,
    row: Option<RowId>,
}

impl Sink for FileSink {
    fn datablock(&mut self, name: &str) -> Result<()> {
        self.file.block(name);
        self.block = self
            .file
            .blocks
            .iter()
            .position(|b| iequals(b.name(), name));
        self.category = None;
        self.row = None;
        Ok(())
    }

    fn category(&mut self, name: &str) -> Result<()> {
        let Some(bix) = self.block else {
            return Err(Error::Dictionary("category outside a data block".into()));
        };
        self.file.blocks[bix].category(name);
        self.category = Some(name.to_string());
        self.row = None;
        Ok(())
    }

    fn row(&mut self) -> Result<()> {
        let (Some(bix), Some(cat)) = (self.block, self.category.as_deref()) else {
            return Err(Error::Dictionary("row outside a category".into()));
        };
        self.row = Some(self.file.blocks[bix].category(cat).new_row());
        Ok(())
    }

    fn item(&mut self, item: &str, text: &str, kind: ValueKind) -> Result<()> {
        if kind == ValueKind::Unknown {
            return Ok(());
        }
        let (Some(bix), Some(cat), Some(row)) =
            (self.block, self.category.as_deref(), self.row)
        else {
            return Err(Error::Dictionary("item outside a row".into()));
        };
        self.file.blocks[bix].category(cat).parse_item(row, item, text)
    }

    // the driver rejects save frames before these can fire
    fn save_begin(&mut self, _name: &str) -> Result<()> {
        Err(Error::Dictionary("save frame in a data file".into()))
    }

    fn save_end(&mut self) -> Result<()> {
        Err(Error::Dictionary("save frame in a data file".into()))
    }
}
