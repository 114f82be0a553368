//! Condition algebra for querying categories.
//!
//! A [`Condition`] is a tree of predicates over the items of a row. Before
//! evaluation it is *prepared* against a category, which resolves tag names
//! to column indices and attaches the item's type validator so comparisons
//! are type-aware. Preparation happens once per query; evaluation is pure.
//!
//! ```ignore
//! use cifdb::query::key;
//!
//! let hits: Vec<_> = cat.find(&(key("id").is(1) & key("name").ne("aap"))).collect();
//! ```

use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use regex::Regex;

use crate::store::category::Category;
use crate::store::row::Row;
use crate::text::icompare;
use crate::validate::TypeValidator;

/// A typed comparison value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Predicate tree over the items of a row.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Matches every row.
    All,
    /// The item is unknown, inapplicable, or empty.
    IsEmpty { tag: String },
    Equals { tag: String, value: Value },
    NotEquals { tag: String, value: Value },
    Compare {
        tag: String,
        op: CompareOp,
        value: Value,
    },
    Matches { tag: String, rx: Regex },
    /// Some item of the row equals the value.
    AnyEquals { value: Value },
    /// Some item of the row matches the pattern.
    AnyMatches { rx: Regex },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl BitAnd for Condition {
    type Output = Condition;
    fn bitand(self, rhs: Condition) -> Condition {
        match (self, rhs) {
            (Condition::All, r) => r,
            (l, Condition::All) => l,
            (l, r) => Condition::And(Box::new(l), Box::new(r)),
        }
    }
}

impl BitOr for Condition {
    type Output = Condition;
    fn bitor(self, rhs: Condition) -> Condition {
        Condition::Or(Box::new(self), Box::new(rhs))
    }
}

/// Start a predicate on the named item.
pub fn key(tag: &str) -> Key {
    Key(tag.to_string())
}

pub struct Key(String);

impl Key {
    pub fn is(self, value: impl Into<Value>) -> Condition {
        Condition::Equals {
            tag: self.0,
            value: value.into(),
        }
    }

    pub fn ne(self, value: impl Into<Value>) -> Condition {
        Condition::NotEquals {
            tag: self.0,
            value: value.into(),
        }
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.cmp(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Condition {
        self.cmp(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.cmp(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Condition {
        self.cmp(CompareOp::Ge, value)
    }

    fn cmp(self, op: CompareOp, value: impl Into<Value>) -> Condition {
        Condition::Compare {
            tag: self.0,
            op,
            value: value.into(),
        }
    }

    pub fn matches(self, rx: Regex) -> Condition {
        Condition::Matches { tag: self.0, rx }
    }

    pub fn is_empty(self) -> Condition {
        Condition::IsEmpty { tag: self.0 }
    }
}

/// Start a predicate over every item of the row.
pub fn any_item() -> AnyItem {
    AnyItem
}

pub struct AnyItem;

impl AnyItem {
    pub fn is(self, value: impl Into<Value>) -> Condition {
        Condition::AnyEquals {
            value: value.into(),
        }
    }

    pub fn matches(self, rx: Regex) -> Condition {
        Condition::AnyMatches { rx }
    }
}

// ---------------------------------------------------------------------------
// Prepared form
// ---------------------------------------------------------------------------

/// A column index resolved against a category; `None` when the category has
/// no such column (the predicate then only matches through emptiness).
type Col = Option<u16>;

#[derive(Debug)]
pub(crate) enum Prepared {
    All,
    IsEmpty {
        col: Col,
    },
    Equals {
        col: Col,
        value: Value,
        ty: Option<Arc<TypeValidator>>,
        negate: bool,
    },
    Compare {
        col: Col,
        op: CompareOp,
        value: Value,
        ty: Option<Arc<TypeValidator>>,
    },
    Matches {
        col: Col,
        rx: Regex,
    },
    AnyEquals {
        value: Value,
    },
    AnyMatches {
        rx: Regex,
    },
    And(Box<Prepared>, Box<Prepared>),
    Or(Box<Prepared>, Box<Prepared>),
}

impl Condition {
    /// Resolve tags to column indices and attach type validators.
    /// Re-preparing against another category simply rebinds the indices.
    pub(crate) fn prepare(&self, cat: &Category) -> Prepared {
        let col = |tag: &str| -> Col {
            let ix = cat.get_column_ix(tag);
            (ix as usize != cat.column_count()).then_some(ix)
        };
        match self {
            Condition::All => Prepared::All,
            Condition::IsEmpty { tag } => Prepared::IsEmpty { col: col(tag) },
            Condition::Equals { tag, value } => Prepared::Equals {
                col: col(tag),
                value: value.clone(),
                ty: cat.item_type(tag),
                negate: false,
            },
            Condition::NotEquals { tag, value } => Prepared::Equals {
                col: col(tag),
                value: value.clone(),
                ty: cat.item_type(tag),
                negate: true,
            },
            Condition::Compare { tag, op, value } => Prepared::Compare {
                col: col(tag),
                op: *op,
                value: value.clone(),
                ty: cat.item_type(tag),
            },
            Condition::Matches { tag, rx } => Prepared::Matches {
                col: col(tag),
                rx: rx.clone(),
            },
            Condition::AnyEquals { value } => Prepared::AnyEquals {
                value: value.clone(),
            },
            Condition::AnyMatches { rx } => Prepared::AnyMatches { rx: rx.clone() },
            Condition::And(l, r) => {
                Prepared::And(Box::new(l.prepare(cat)), Box::new(r.prepare(cat)))
            }
            Condition::Or(l, r) => {
                Prepared::Or(Box::new(l.prepare(cat)), Box::new(r.prepare(cat)))
            }
        }
    }
}

impl Prepared {
    pub(crate) fn matches(&self, cat: &Category, row: &Row) -> bool {
        match self {
            Prepared::All => true,
            Prepared::IsEmpty { col } => match col {
                None => true,
                Some(c) => matches!(row.text(*c), None | Some("") | Some(".")),
            },
            Prepared::Equals {
                col,
                value,
                ty,
                negate,
            } => {
                let text = col.and_then(|c| row.text(c)).unwrap_or("");
                let eq = value_equals(text, value, ty.as_deref());
                eq != *negate
            }
            Prepared::Compare { col, op, value, ty } => {
                let text = col.and_then(|c| row.text(c)).unwrap_or("");
                match value_order(text, value, ty.as_deref()) {
                    None => false,
                    Some(ord) => match op {
                        CompareOp::Lt => ord == Ordering::Less,
                        CompareOp::Le => ord != Ordering::Greater,
                        CompareOp::Gt => ord == Ordering::Greater,
                        CompareOp::Ge => ord != Ordering::Less,
                    },
                }
            }
            Prepared::Matches { col, rx } => {
                let text = col.and_then(|c| row.text(c)).unwrap_or("");
                full_match(rx, text)
            }
            Prepared::AnyEquals { value } => row
                .cells
                .iter()
                .any(|c| value_equals(c.text(), value, None)),
            Prepared::AnyMatches { rx } => row.cells.iter().any(|c| full_match(rx, c.text())),
            Prepared::And(l, r) => l.matches(cat, row) && r.matches(cat, row),
            Prepared::Or(l, r) => l.matches(cat, row) || r.matches(cat, row),
        }
    }
}

fn full_match(rx: &Regex, text: &str) -> bool {
    rx.find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

fn value_equals(text: &str, value: &Value, ty: Option<&TypeValidator>) -> bool {
    match value {
        Value::Int(v) => parse_full_i64(text) == Some(*v),
        Value::Float(v) => parse_full_f64(text).is_some_and(|t| t == *v),
        Value::Bool(v) => {
            let t = !text.is_empty() && crate::text::iequals(text, "y");
            t == *v
        }
        Value::Text(s) => match ty {
            Some(tv) => {
                if text.is_empty() || s.is_empty() {
                    text.is_empty() && s.is_empty()
                } else {
                    tv.compare(text, s) == Ordering::Equal
                }
            }
            None => icompare(text, s) == Ordering::Equal,
        },
    }
}

fn value_order(text: &str, value: &Value, ty: Option<&TypeValidator>) -> Option<Ordering> {
    match value {
        Value::Int(v) => parse_full_i64(text).map(|t| t.cmp(v)),
        Value::Float(v) => parse_full_f64(text).and_then(|t| t.partial_cmp(v)),
        Value::Bool(_) => None,
        Value::Text(s) => match ty {
            Some(tv) => Some(tv.compare(text, s)),
            None => Some(icompare(text, s)),
        },
    }
}

fn parse_full_i64(text: &str) -> Option<i64> {
    let (v, n) = crate::text::parse_int(text)?;
    (n == text.len()).then_some(v)
}

fn parse_full_f64(text: &str) -> Option<f64> {
    let (v, n) = crate::text::parse_float(text)?;
    (n == text.len()).then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::category::Category;

    fn sample() -> Category {
        let mut c = Category::new("t");
        c.emplace(&[("id", "1"), ("n", "aap")]).unwrap();
        c.emplace(&[("id", "2"), ("n", "noot")]).unwrap();
        c.emplace(&[("id", "3"), ("n", "mies")]).unwrap();
        c.emplace(&[("id", "4"), ("n", ".")]).unwrap();
        c.emplace(&[("id", "5")]).unwrap();
        c
    }

    #[test]
    fn equality_and_projection() {
        let c = sample();
        let hit = c.find1(&key("id").is(1)).unwrap();
        assert_eq!(hit.text("n"), Some("aap"));
    }

    #[test]
    fn empties_cover_inapplicable_and_unknown() {
        let c = sample();
        assert_eq!(c.count(&key("n").is_empty()), 2);
    }

    #[test]
    fn and_or_composition() {
        let c = sample();
        assert_eq!(c.count(&(key("id").gt(1) & key("id").lt(4))), 2);
        assert_eq!(c.count(&(key("n").is("aap") | key("n").is("noot"))), 2);
    }

    #[test]
    fn not_equals_counts_empty_rows() {
        let c = sample();
        // rows 2..5: noot, mies, '.', missing
        assert_eq!(c.count(&key("n").ne("aap")), 4);
    }

    #[test]
    fn regex_matching_is_anchored() {
        let c = sample();
        let rx = Regex::new("[a-z]*oo[a-z]*").unwrap();
        assert_eq!(c.count(&key("n").matches(rx)), 1);
        let partial = Regex::new("oo").unwrap();
        assert_eq!(c.count(&key("n").matches(partial)), 0);
    }

    #[test]
    fn any_item_search() {
        let c = sample();
        assert_eq!(c.count(&any_item().is("mies")), 1);
        assert_eq!(c.count(&any_item().is(3)), 1);
    }

    #[test]
    fn unknown_column_never_equals() {
        let c = sample();
        assert_eq!(c.count(&key("nope").is("x")), 0);
        // ...but is empty everywhere
        assert_eq!(c.count(&key("nope").is_empty()), 5);
    }

    #[test]
    fn all_matches_everything() {
        let c = sample();
        assert_eq!(c.count(&Condition::All), 5);
        assert_eq!(c.count(&(Condition::All & key("id").is(1))), 1);
    }

    #[test]
    fn find1_requires_single_hit() {
        let c = sample();
        assert!(c.find1(&key("id").gt(0)).is_err());
        assert!(c.find1(&key("id").is(99)).is_err());
        assert!(c.find1(&key("id").is(2)).is_ok());
    }
}
