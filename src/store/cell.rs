//! Compact cell storage.
//!
//! Each stored field is a [`Cell`]: a column index plus its text. Strings
//! shorter than the inline capacity live directly in the cell; longer
//! strings own a heap buffer. In a typical mmCIF file well over 99% of the
//! values fit inline.
//!
//! The value payload is 24 bytes and the whole cell at most 32 on 64-bit
//! targets; both bounds are asserted at compile time.

/// Longest string stored without a heap allocation.
pub(crate) const INLINE_CAP: usize = 22;

pub(crate) enum CellValue {
    Inline { len: u8, buf: [u8; INLINE_CAP] },
    Heap(Box<str>),
}

const _: () = assert!(std::mem::size_of::<CellValue>() == 24);
const _: () = assert!(std::mem::size_of::<Cell>() <= 32);

impl CellValue {
    fn new(text: &str) -> Self {
        if text.len() <= INLINE_CAP {
            let mut buf = [0u8; INLINE_CAP];
            buf[..text.len()].copy_from_slice(text.as_bytes());
            CellValue::Inline {
                len: text.len() as u8,
                buf,
            }
        } else {
            CellValue::Heap(text.into())
        }
    }

    fn as_str(&self) -> &str {
        match self {
            CellValue::Inline { len, buf } => {
                // the bytes were copied from a &str, so this cannot fail
                std::str::from_utf8(&buf[..*len as usize]).unwrap_or("")
            }
            CellValue::Heap(s) => s,
        }
    }
}

impl Clone for CellValue {
    fn clone(&self) -> Self {
        match self {
            CellValue::Inline { len, buf } => CellValue::Inline {
                len: *len,
                buf: *buf,
            },
            CellValue::Heap(s) => CellValue::Heap(s.clone()),
        }
    }
}

/// One `(column, text)` pair of a row. Exactly one cell exists per column
/// holding a non-default value; a missing cell reads as the unknown value.
#[derive(Clone)]
pub(crate) struct Cell {
    pub(crate) column_ix: u16,
    value: CellValue,
}

impl Cell {
    pub(crate) fn new(column_ix: u16, text: &str) -> Self {
        Cell {
            column_ix,
            value: CellValue::new(text),
        }
    }

    pub(crate) fn text(&self) -> &str {
        self.value.as_str()
    }

    pub(crate) fn set_text(&mut self, text: &str) {
        self.value = CellValue::new(text);
    }

    pub(crate) fn is_inline(&self) -> bool {
        matches!(self.value, CellValue::Inline { .. })
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cell({}, {:?})", self.column_ix, self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_stay_inline() {
        let c = Cell::new(3, "aap");
        assert!(c.is_inline());
        assert_eq!(c.text(), "aap");
        assert_eq!(c.column_ix, 3);
    }

    #[test]
    fn boundary_lengths() {
        let at_cap = "x".repeat(INLINE_CAP);
        let over_cap = "x".repeat(INLINE_CAP + 1);
        assert!(Cell::new(0, &at_cap).is_inline());
        assert!(!Cell::new(0, &over_cap).is_inline());
        assert_eq!(Cell::new(0, &over_cap).text(), over_cap);
    }

    #[test]
    fn empty_text_is_a_real_value() {
        let c = Cell::new(1, "");
        assert_eq!(c.text(), "");
        assert!(c.is_inline());
    }

    #[test]
    fn rewrite_switches_representation() {
        let mut c = Cell::new(0, "short");
        c.set_text(&"y".repeat(100));
        assert_eq!(c.text().len(), 100);
        c.set_text("short again");
        assert!(c.is_inline());
    }
}
