//! A category: one named table of a data block.
//!
//! Rows are kept in a slab and chained in insertion order by index, so a
//! [`RowId`] is stable for the life of its row. The column table is
//! append-only; parsing an item for an unknown column is what creates the
//! column. When a validator is attached, unknown tags are reported through
//! it and a transient primary-key index backs duplicate detection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::query::{Condition, Prepared};
use crate::store::row::{Row, RowId, RowRef};
use crate::text::iequals;
use crate::validate::{CategoryValidator, ItemValidator, TypeValidator, Validator};

/// Separator for the parts of a normalized key tuple.
const KEY_SEP: char = '\u{1f}';

#[derive(Debug, Clone)]
struct Column {
    name: String,
}

struct Slot {
    row: Row,
    next: Option<RowId>,
}

#[derive(Default)]
pub struct Category {
    name: String,
    columns: Vec<Column>,
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    head: Option<RowId>,
    tail: Option<RowId>,
    len: usize,
    validator: Option<Arc<Validator>>,
    key_index: Option<HashMap<String, RowId>>,
}

impl Category {
    pub fn new(name: &str) -> Category {
        Category {
            name: name.to_string(),
            ..Category::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // -----------------------------------------------------------------------
    // Validator attachment
    // -----------------------------------------------------------------------

    /// Attach (or detach) a validator. Existing columns are checked against
    /// the category's item list; unknown tags are reported.
    pub fn set_validator(&mut self, v: Option<Arc<Validator>>) -> Result<()> {
        self.validator = v;
        self.key_index = None;
        if let Some(v) = self.validator.clone() {
            if let Some(cv) = v.category(&self.name) {
                for col in &self.columns {
                    if cv.item(&col.name).is_none() {
                        v.report(
                            &self.name,
                            Some(&col.name),
                            &format!(
                                "tag {} not allowed in category {}",
                                col.name, self.name
                            ),
                            false,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validator(&self) -> Option<&Arc<Validator>> {
        self.validator.as_ref()
    }

    pub fn cat_validator(&self) -> Option<&CategoryValidator> {
        self.validator.as_ref()?.category(&self.name)
    }

    pub(crate) fn item_validator(&self, item: &str) -> Option<&ItemValidator> {
        self.cat_validator()?.item(item)
    }

    pub(crate) fn item_type(&self, item: &str) -> Option<Arc<TypeValidator>> {
        self.item_validator(item)?.item_type.clone()
    }

    // -----------------------------------------------------------------------
    // Columns
    // -----------------------------------------------------------------------

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of `name`, or `columns.len()` when the column does not exist.
    pub fn get_column_ix(&self, name: &str) -> u16 {
        self.columns
            .iter()
            .position(|c| iequals(&c.name, name))
            .unwrap_or(self.columns.len()) as u16
    }

    pub fn column_name(&self, ix: u16) -> Option<&str> {
        self.columns.get(ix as usize).map(|c| c.name.as_str())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Idempotent column registration. With a validator attached an unknown
    /// tag is reported (fatal under a strict validator).
    pub fn add_column(&mut self, name: &str) -> Result<u16> {
        let ix = self.get_column_ix(name);
        if (ix as usize) < self.columns.len() {
            return Ok(ix);
        }
        if self.columns.len() >= u16::MAX as usize {
            return Err(Error::validation(
                &self.name,
                Some(name),
                "too many columns in category",
            ));
        }
        if let Some(v) = &self.validator {
            if let Some(cv) = v.category(&self.name) {
                if cv.item(name).is_none() {
                    v.report(
                        &self.name,
                        Some(name),
                        &format!("tag {name} not allowed in category {}", self.name),
                        false,
                    )?;
                }
            }
        }
        self.columns.push(Column {
            name: name.to_string(),
        });
        Ok(ix)
    }

    /// Full tags of this category's columns, in column order.
    pub fn tag_order(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| format!("_{}.{}", self.name, c.name))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Row access
    // -----------------------------------------------------------------------

    pub(crate) fn row_storage(&self, id: RowId) -> &Row {
        &self.slots[id.0 as usize].as_ref().expect("stale row id").row
    }

    fn row_storage_mut(&mut self, id: RowId) -> &mut Row {
        &mut self.slots[id.0 as usize].as_mut().expect("stale row id").row
    }

    fn next_of(&self, id: RowId) -> Option<RowId> {
        self.slots[id.0 as usize].as_ref().and_then(|s| s.next)
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.slots.get(id.0 as usize).is_some_and(Option::is_some)
    }

    pub fn row(&self, id: RowId) -> Option<RowRef<'_>> {
        self.contains(id).then_some(RowRef { cat: self, id })
    }

    pub fn front(&self) -> Option<RowRef<'_>> {
        self.head.map(|id| RowRef { cat: self, id })
    }

    pub fn back(&self) -> Option<RowRef<'_>> {
        self.tail.map(|id| RowRef { cat: self, id })
    }

    pub fn rows(&self) -> Rows<'_> {
        Rows {
            cat: self,
            cur: self.head,
        }
    }

    pub(crate) fn row_text(&self, id: RowId, item: &str) -> Option<&str> {
        let col = self.get_column_ix(item);
        if col as usize == self.columns.len() {
            return None;
        }
        self.row_storage(id).text(col)
    }

    pub(crate) fn row_text_or_empty(&self, id: RowId, item: &str) -> &str {
        self.row_text(id, item).unwrap_or("")
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Lazily iterate the rows matching `cond`. The condition is prepared
    /// against this category exactly once.
    pub fn find<'a>(&'a self, cond: &Condition) -> Find<'a> {
        Find {
            cat: self,
            cur: self.head,
            prepared: cond.prepare(self),
        }
    }

    pub(crate) fn find_ids(&self, cond: &Condition) -> Vec<RowId> {
        self.find(cond).map(|r| r.id()).collect()
    }

    /// The single row matching `cond`; an error when there are zero or
    /// several hits.
    pub fn find1<'a>(&'a self, cond: &Condition) -> Result<RowRef<'a>> {
        let mut it = self.find(cond);
        let first = it
            .next()
            .ok_or_else(|| Error::Query(format!("no hits in {}", self.name)))?;
        if it.next().is_some() {
            return Err(Error::Query(format!("hit not unique in {}", self.name)));
        }
        Ok(first)
    }

    /// Typed projection of one item of the single matching row.
    pub fn find1_get<T: crate::store::row::FromCif>(
        &self,
        cond: &Condition,
        item: &str,
    ) -> Result<Option<T>> {
        Ok(self.find1(cond)?.get(item))
    }

    pub fn exists(&self, cond: &Condition) -> bool {
        self.find(cond).next().is_some()
    }

    pub fn count(&self, cond: &Condition) -> usize {
        self.find(cond).count()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Append a row built from `(item, value)` pairs. Every value is
    /// validated before the row becomes observable, and a configured
    /// primary key must stay unique.
    pub fn emplace(&mut self, items: &[(&str, &str)]) -> Result<RowId> {
        let mut row = Row::default();
        for (name, value) in items {
            let ix = self.add_column(name)?;
            if let Some(iv) = self.item_validator(name) {
                iv.validate(&self.name, value)?;
            }
            if *value == "?" {
                continue;
            }
            row.set(ix, value);
        }
        if let Some(key) = self.key_string_of(&row) {
            self.ensure_index();
            if let Some(index) = &self.key_index {
                if index.contains_key(&key) {
                    return Err(Error::DuplicateKey {
                        category: self.name.clone(),
                        key,
                    });
                }
            }
        }
        Ok(self.append_row(row))
    }

    /// Rewrite one item of one row without touching linked categories.
    /// The value is validated and primary-key uniqueness is enforced.
    pub fn set_value(&mut self, id: RowId, item: &str, value: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::Query(format!("stale row handle in {}", self.name)));
        }
        if let Some(iv) = self.item_validator(item) {
            iv.validate(&self.name, value)?;
        }
        let col = self.add_column(item)?;
        if self.is_key_item(item) {
            let mut candidate = self.row_storage(id).clone();
            if value == "?" {
                candidate.remove(col);
            } else {
                candidate.set(col, value);
            }
            if let Some(key) = self.key_string_of(&candidate) {
                self.ensure_index();
                if let Some(&other) = self.key_index.as_ref().and_then(|ix| ix.get(&key)) {
                    if other != id {
                        return Err(Error::DuplicateKey {
                            category: self.name.clone(),
                            key,
                        });
                    }
                }
            }
            self.key_index = None;
        }
        let row = self.row_storage_mut(id);
        if value == "?" {
            row.remove(col);
        } else {
            row.set(col, value);
        }
        Ok(())
    }

    /// Erase the rows matching `cond` without link cascading; returns the
    /// number of rows removed. Cascading erase lives on the data block.
    pub fn erase(&mut self, cond: &Condition) -> usize {
        let ids = self.find_ids(cond);
        for id in &ids {
            self.unlink_row(*id);
        }
        ids.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.key_index = None;
    }

    // -----------------------------------------------------------------------
    // Internal row plumbing (also used by the parser and the propagator)
    // -----------------------------------------------------------------------

    fn alloc(&mut self, row: Row) -> RowId {
        match self.free.pop() {
            Some(ix) => {
                self.slots[ix as usize] = Some(Slot { row, next: None });
                RowId(ix)
            }
            None => {
                self.slots.push(Some(Slot { row, next: None }));
                RowId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn append_row(&mut self, row: Row) -> RowId {
        let id = self.alloc(row);
        match self.tail {
            Some(t) => self.slots[t.0 as usize].as_mut().unwrap().next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        self.key_index = None;
        id
    }

    /// Insert a row immediately after `after`, used when a cascading update
    /// splits a child.
    pub(crate) fn insert_row_after(&mut self, after: RowId, row: Row) -> RowId {
        let id = self.alloc(row);
        let next = self.next_of(after);
        self.slots[after.0 as usize].as_mut().unwrap().next = Some(id);
        self.slots[id.0 as usize].as_mut().unwrap().next = next;
        if self.tail == Some(after) {
            self.tail = Some(id);
        }
        self.len += 1;
        self.key_index = None;
        id
    }

    pub(crate) fn unlink_row(&mut self, id: RowId) {
        if !self.contains(id) {
            return;
        }
        let next = self.next_of(id);
        if self.head == Some(id) {
            self.head = next;
        } else {
            let mut cur = self.head;
            while let Some(c) = cur {
                if self.next_of(c) == Some(id) {
                    self.slots[c.0 as usize].as_mut().unwrap().next = next;
                    break;
                }
                cur = self.next_of(c);
            }
        }
        if self.tail == Some(id) {
            self.tail = self
                .rows()
                .last()
                .map(|r| r.id());
        }
        self.slots[id.0 as usize] = None;
        self.free.push(id.0);
        self.len -= 1;
        self.key_index = None;
    }

    pub(crate) fn clone_row(&self, id: RowId) -> Row {
        self.row_storage(id).clone()
    }

    /// Register a column without consulting the validator; the propagator
    /// runs its checks during plan validation, before any mutation.
    pub(crate) fn add_column_unchecked(&mut self, name: &str) -> u16 {
        let ix = self.get_column_ix(name);
        if (ix as usize) < self.columns.len() {
            return ix;
        }
        self.columns.push(Column {
            name: name.to_string(),
        });
        ix
    }

    /// The validator-side check of [`Category::add_column`] on its own,
    /// without registering anything.
    pub(crate) fn check_column_allowed(&self, name: &str) -> Result<()> {
        if (self.get_column_ix(name) as usize) < self.columns.len() {
            return Ok(());
        }
        if let Some(v) = &self.validator {
            if let Some(cv) = v.category(&self.name) {
                if cv.item(name).is_none() {
                    v.report(
                        &self.name,
                        Some(name),
                        &format!("tag {name} not allowed in category {}", self.name),
                        false,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Raw cell write used when applying a validated mutation plan.
    /// `None` removes the cell (the value becomes unknown).
    pub(crate) fn write_cell(&mut self, id: RowId, item: &str, value: Option<&str>) {
        let col = self.add_column_unchecked(item);
        let row = self.row_storage_mut(id);
        match value {
            Some(v) => row.set(col, v),
            None => row.remove(col),
        }
        self.key_index = None;
    }

    /// The key a row would have after overriding some of its items;
    /// used for collision checks before a cascade commits.
    pub(crate) fn key_string_with(
        &self,
        id: RowId,
        overrides: &[(&str, &str)],
    ) -> Option<String> {
        let mut candidate = self.row_storage(id).clone();
        for (item, value) in overrides {
            let col = self.get_column_ix(item);
            if col as usize == self.columns.len() {
                continue;
            }
            if *value == "?" {
                candidate.remove(col);
            } else {
                candidate.set(col, value);
            }
        }
        self.key_string_of(&candidate)
    }

    /// Whether any override touches a primary-key item.
    pub(crate) fn touches_key(&self, items: &[(&str, &str)]) -> bool {
        items.iter().any(|(item, _)| self.is_key_item(item))
    }

    pub(crate) fn new_row(&mut self) -> RowId {
        self.append_row(Row::default())
    }

    /// Parse-path item assignment: unknown tags and invalid values are
    /// reported through the validator instead of failing outright.
    pub(crate) fn parse_item(&mut self, id: RowId, item: &str, value: &str) -> Result<()> {
        let ix = self.add_column(item)?;
        if let Some(v) = self.validator.clone() {
            if let Some(iv) = self.item_validator(item) {
                if let Err(e) = iv.validate(&self.name, value) {
                    v.report(&self.name, Some(item), &e.to_string(), false)?;
                }
            }
        }
        self.row_storage_mut(id).set(ix, value);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Primary keys
    // -----------------------------------------------------------------------

    pub(crate) fn is_key_item(&self, item: &str) -> bool {
        self.cat_validator()
            .is_some_and(|cv| cv.keys.iter().any(|k| iequals(k, item)))
    }

    /// The normalized key tuple of a row, `None` without a configured key.
    /// Normalization follows each key item's type compare rules, so `UChar`
    /// keys collide case-insensitively.
    fn key_string_of(&self, row: &Row) -> Option<String> {
        let cv = self.cat_validator()?;
        if cv.keys.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(cv.keys.len());
        for k in &cv.keys {
            let col = self.get_column_ix(k);
            let text = if col as usize == self.columns.len() {
                ""
            } else {
                row.text_or_empty(col)
            };
            let norm = match self.item_type(k) {
                Some(tv) => tv.normalize(text),
                None => text.to_ascii_lowercase(),
            };
            parts.push(norm);
        }
        let mut s = String::new();
        for (i, p) in parts.iter().enumerate() {
            if i > 0 {
                s.push(KEY_SEP);
            }
            s.push_str(p);
        }
        Some(s)
    }

    pub(crate) fn key_of(&self, id: RowId) -> Option<String> {
        self.key_string_of(self.row_storage(id))
    }

    fn ensure_index(&mut self) {
        if self.key_index.is_some() {
            return;
        }
        if self.cat_validator().map_or(true, |cv| cv.keys.is_empty()) {
            return;
        }
        let mut index = HashMap::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(id) = cur {
            if let Some(key) = self.key_of(id) {
                index.insert(key, id);
            }
            cur = self.next_of(id);
        }
        self.key_index = Some(index);
    }

    /// Check the primary-key uniqueness invariant over all rows.
    pub fn keys_unique(&self) -> bool {
        let Some(cv) = self.cat_validator() else {
            return true;
        };
        if cv.keys.is_empty() {
            return true;
        }
        let mut seen = std::collections::HashSet::with_capacity(self.len);
        self.rows()
            .all(|r| seen.insert(self.key_of(r.id()).unwrap_or_default()))
    }

    // -----------------------------------------------------------------------
    // Equality
    // -----------------------------------------------------------------------

    /// Normalized snapshot of a row for structural comparison.
    fn row_fingerprint(&self, id: RowId) -> Vec<(String, String)> {
        let row = self.row_storage(id);
        let mut cells: Vec<(String, String)> = row
            .cells
            .iter()
            .map(|c| {
                let name = self
                    .column_name(c.column_ix)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                let text = match self.item_type(&name) {
                    Some(tv) => tv.normalize(c.text()),
                    None => c.text().to_string(),
                };
                (name, text)
            })
            .collect();
        cells.sort();
        cells
    }
}

/// Structural, type-aware equality: same case-insensitive name and the same
/// multiset of rows. Row order is deliberately ignored, the stronger of the
/// two defensible readings for categories without a primary key.
impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        if !iequals(&self.name, &other.name) || self.len != other.len {
            return false;
        }
        let mut a: Vec<_> = self.rows().map(|r| self.row_fingerprint(r.id())).collect();
        let mut b: Vec<_> = other.rows().map(|r| other.row_fingerprint(r.id())).collect();
        a.sort();
        b.sort();
        a == b
    }
}

impl std::fmt::Debug for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Category")
            .field("name", &self.name)
            .field("columns", &self.columns.len())
            .field("rows", &self.len)
            .finish()
    }
}

/// Insertion-order iterator over a category's rows.
pub struct Rows<'a> {
    cat: &'a Category,
    cur: Option<RowId>,
}

impl<'a> Iterator for Rows<'a> {
    type Item = RowRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        self.cur = self.cat.next_of(id);
        Some(RowRef { cat: self.cat, id })
    }
}

/// Lazy iterator over the rows matching a prepared condition.
pub struct Find<'a> {
    cat: &'a Category,
    cur: Option<RowId>,
    prepared: Prepared,
}

impl<'a> Iterator for Find<'a> {
    type Item = RowRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.cur {
            self.cur = self.cat.next_of(id);
            if self.prepared.matches(self.cat, self.cat.row_storage(id)) {
                return Some(RowRef { cat: self.cat, id });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::key;

    #[test]
    fn emplace_and_iterate() {
        let mut c = Category::new("foo");
        c.emplace(&[("id", "1"), ("s", "aap")]).unwrap();
        c.emplace(&[("id", "2"), ("s", "noot")]).unwrap();
        c.emplace(&[("id", "3"), ("s", "mies")]).unwrap();

        assert_eq!(c.len(), 3);
        let expected = ["aap", "noot", "mies"];
        for (n, r) in c.rows().enumerate() {
            assert_eq!(r.get::<i64>("id"), Some(n as i64 + 1));
            assert_eq!(r.text("s"), Some(expected[n]));
        }
    }

    #[test]
    fn column_registration_is_idempotent() {
        let mut c = Category::new("foo");
        let a = c.add_column("x").unwrap();
        let b = c.add_column("X").unwrap();
        assert_eq!(a, b);
        assert_eq!(c.column_count(), 1);
        assert_eq!(c.get_column_ix("unknown") as usize, c.column_count());
    }

    #[test]
    fn long_values_survive() {
        let mut c = Category::new("foo");
        for i in 1..256usize {
            let txt = "x".repeat(i);
            c.emplace(&[("id", &i.to_string()), ("txt", &txt)]).unwrap();
        }
        for (i, r) in c.rows().enumerate() {
            assert_eq!(r.text("txt").unwrap().len(), i + 1);
        }
    }

    #[test]
    fn erase_relinks_the_list() {
        let mut c = Category::new("foo");
        c.emplace(&[("id", "1")]).unwrap();
        c.emplace(&[("id", "2")]).unwrap();
        c.emplace(&[("id", "3")]).unwrap();

        assert_eq!(c.erase(&key("id").is(2)), 1);
        let left: Vec<_> = c.rows().filter_map(|r| r.get::<i64>("id")).collect();
        assert_eq!(left, vec![1, 3]);

        c.emplace(&[("id", "4")]).unwrap();
        let left: Vec<_> = c.rows().filter_map(|r| r.get::<i64>("id")).collect();
        assert_eq!(left, vec![1, 3, 4]);
    }

    #[test]
    fn row_ids_survive_unrelated_mutations() {
        let mut c = Category::new("foo");
        let a = c.emplace(&[("id", "1")]).unwrap();
        c.emplace(&[("id", "2")]).unwrap();
        c.erase(&key("id").is(2));
        c.emplace(&[("id", "3")]).unwrap();
        assert_eq!(c.row(a).unwrap().get::<i64>("id"), Some(1));
    }

    #[test]
    fn unknown_values_store_no_cell() {
        let mut c = Category::new("foo");
        let id = c.emplace(&[("id", "1"), ("n", "?")]).unwrap();
        let r = c.row(id).unwrap();
        assert!(r.is_unknown("n"));
        assert!(!r.is_unknown("id"));
    }

    #[test]
    fn multiset_equality_ignores_row_order() {
        let mut a = Category::new("foo");
        a.emplace(&[("id", "1")]).unwrap();
        a.emplace(&[("id", "2")]).unwrap();
        let mut b = Category::new("foo");
        b.emplace(&[("id", "2")]).unwrap();
        b.emplace(&[("id", "1")]).unwrap();
        assert_eq!(a, b);

        b.emplace(&[("id", "3")]).unwrap();
        assert_ne!(a, b);
    }
}
