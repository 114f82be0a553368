//! Rows and row handles.
//!
//! A row is a short list of cells, one per column holding a non-default
//! value. Column lookup walks the list, which is fine because mmCIF rows
//! are narrow. Rows live in their category's slab and are addressed by
//! [`RowId`]; an id stays valid across every mutation that does not erase
//! its row.

use super::category::Category;
use super::cell::Cell;
use crate::text::iequals;

/// Stable handle to a row within its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub(crate) u32);

#[derive(Default, Clone)]
pub(crate) struct Row {
    pub(crate) cells: Vec<Cell>,
}

impl Row {
    /// Text of the cell in `column`, or `None` when the value is unknown.
    pub(crate) fn text(&self, column: u16) -> Option<&str> {
        self.cells
            .iter()
            .find(|c| c.column_ix == column)
            .map(Cell::text)
    }

    pub(crate) fn text_or_empty(&self, column: u16) -> &str {
        self.text(column).unwrap_or("")
    }

    /// Store `text` in `column`, replacing any existing cell.
    pub(crate) fn set(&mut self, column: u16, text: &str) {
        match self.cells.iter_mut().find(|c| c.column_ix == column) {
            Some(cell) => cell.set_text(text),
            None => self.cells.push(Cell::new(column, text)),
        }
    }

    /// Drop the cell in `column`, turning the value back into unknown.
    pub(crate) fn remove(&mut self, column: u16) {
        self.cells.retain(|c| c.column_ix != column);
    }
}

/// Read access to one row of a category.
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    pub(crate) cat: &'a Category,
    pub(crate) id: RowId,
}

impl<'a> RowRef<'a> {
    pub fn id(&self) -> RowId {
        self.id
    }

    fn row(&self) -> &'a Row {
        self.cat.row_storage(self.id)
    }

    /// The raw text of an item, or `None` when the value is unknown (`?`).
    pub fn text(&self, tag: &str) -> Option<&'a str> {
        let col = self.cat.get_column_ix(tag);
        if col as usize == self.cat.column_count() {
            return None;
        }
        self.row().text(col)
    }

    pub fn text_or_empty(&self, tag: &str) -> &'a str {
        self.text(tag).unwrap_or("")
    }

    /// True when the item holds the inapplicable marker `.`.
    pub fn is_inapplicable(&self, tag: &str) -> bool {
        self.text(tag) == Some(".")
    }

    /// True when the item has no stored cell (`?`).
    pub fn is_unknown(&self, tag: &str) -> bool {
        self.text(tag).is_none()
    }

    /// True when the item is unknown, inapplicable, or the empty string.
    pub fn is_empty_value(&self, tag: &str) -> bool {
        matches!(self.text(tag), None | Some("") | Some("."))
    }

    /// Convert an item to a typed value; `None` when the value is empty or
    /// does not parse.
    pub fn get<T: FromCif>(&self, tag: &str) -> Option<T> {
        let text = self.text(tag)?;
        if text.is_empty() || text == "." {
            return None;
        }
        let v = T::from_cif(text);
        if v.is_none() {
            log::warn!(
                "cannot convert {:?} (item {tag} of {}) to the requested type",
                text,
                self.cat.name()
            );
        }
        v
    }

    /// Snapshot of the row as `(column name, text)` pairs in column order.
    pub fn items(&self) -> Vec<(&'a str, &'a str)> {
        self.row()
            .cells
            .iter()
            .map(|c| (self.cat.column_name(c.column_ix).unwrap_or(""), c.text()))
            .collect()
    }
}

impl std::fmt::Debug for RowRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RowRef({}, {:?})", self.cat.name(), self.id)
    }
}

impl PartialEq for RowRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.cat, other.cat) && self.id == other.id
    }
}

/// Conversion from stored CIF text to a typed value.
pub trait FromCif: Sized {
    fn from_cif(text: &str) -> Option<Self>;
}

// Numeric conversions parse the longest valid prefix, so values carrying
// CIF uncertainty notation like `50.123(4)` still read as numbers.
macro_rules! from_cif_int {
    ($($t:ty),*) => {$(
        impl FromCif for $t {
            fn from_cif(text: &str) -> Option<Self> {
                let (v, _) = crate::text::parse_int(text)?;
                <$t>::try_from(v).ok()
            }
        }
    )*};
}

from_cif_int!(i64, i32, u64, u32, u16);

impl FromCif for f64 {
    fn from_cif(text: &str) -> Option<Self> {
        crate::text::parse_float(text).map(|(v, _)| v)
    }
}

impl FromCif for f32 {
    fn from_cif(text: &str) -> Option<Self> {
        f64::from_cif(text).map(|v| v as f32)
    }
}

impl FromCif for String {
    fn from_cif(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl FromCif for bool {
    fn from_cif(text: &str) -> Option<Self> {
        Some(iequals(text, "y") || iequals(text, "yes"))
    }
}
