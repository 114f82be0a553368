//! A data block and its referential-update propagator.
//!
//! The block owns its categories, so every operation that has to look
//! across category boundaries lives here: cascading value updates,
//! cascading erases, and link navigation. Link groups are resolved from
//! the attached validator at operation time, which keeps intra-block
//! references valid across clones and moves by construction.
//!
//! Updates run in three phases: split copies are planned first, then the
//! whole plan is validated (item types, primary-key collisions), and only
//! then are cells rewritten. A failed update leaves the block unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::query::Condition;
use crate::store::category::Category;
use crate::store::row::RowId;
use crate::text::{icompare, iequals};
use crate::validate::{LinkValidator, Validator};

pub struct DataBlock {
    name: String,
    categories: Vec<Category>,
    validator: Option<Arc<Validator>>,
}

impl DataBlock {
    pub fn new(name: &str) -> DataBlock {
        DataBlock {
            name: name.to_string(),
            categories: Vec::new(),
            validator: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    // -----------------------------------------------------------------------
    // Category access
    // -----------------------------------------------------------------------

    fn index_of(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| iequals(c.name(), name))
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.index_of(name).map(|ix| &self.categories[ix])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Category> {
        self.index_of(name).map(move |ix| &mut self.categories[ix])
    }

    /// Get or append a category. A freshly created category inherits the
    /// block's validator.
    pub fn category(&mut self, name: &str) -> &mut Category {
        let ix = match self.index_of(name) {
            Some(ix) => ix,
            None => {
                let mut cat = Category::new(name);
                // attaching to an empty category cannot fail
                let _ = cat.set_validator(self.validator.clone());
                self.categories.push(cat);
                self.categories.len() - 1
            }
        };
        &mut self.categories[ix]
    }

    /// Move an existing category to the front of the block, used by the
    /// serializer to hoist the well-known header categories.
    pub fn promote_front(&mut self, name: &str) {
        if let Some(ix) = self.index_of(name) {
            if ix > 0 {
                let cat = self.categories.remove(ix);
                self.categories.insert(0, cat);
            }
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    // -----------------------------------------------------------------------
    // Validator
    // -----------------------------------------------------------------------

    pub fn set_validator(&mut self, v: Option<Arc<Validator>>) -> Result<()> {
        self.validator = v.clone();
        for cat in &mut self.categories {
            cat.set_validator(v.clone())?;
        }
        Ok(())
    }

    pub fn validator(&self) -> Option<&Arc<Validator>> {
        self.validator.as_ref()
    }

    /// Check every category against the validator: mandatory items, value
    /// types, and primary-key uniqueness. Returns whether the block is
    /// clean; under a strict validator the first problem is an error.
    pub fn validate(&self) -> Result<bool> {
        let Some(v) = &self.validator else {
            return Err(Error::Dictionary("no validator specified".into()));
        };
        let mut clean = true;
        for cat in &self.categories {
            let Some(cv) = v.category(cat.name()) else {
                v.report(
                    cat.name(),
                    None,
                    &format!("category {} is not defined in the dictionary", cat.name()),
                    false,
                )?;
                clean = false;
                continue;
            };
            for row in cat.rows() {
                for iv in cv.mandatory_items() {
                    if row.text(&iv.tag).is_none() {
                        v.report(
                            cat.name(),
                            Some(&iv.tag),
                            &format!(
                                "missing mandatory item {} in category {}",
                                iv.tag,
                                cat.name()
                            ),
                            false,
                        )?;
                        clean = false;
                    }
                }
                for (item, text) in row.items() {
                    if let Some(iv) = cv.item(item) {
                        if let Err(e) = iv.validate(cat.name(), text) {
                            v.report(cat.name(), Some(item), &e.to_string(), false)?;
                            clean = false;
                        }
                    }
                }
            }
            if !cat.keys_unique() {
                v.report(
                    cat.name(),
                    None,
                    &format!("duplicate primary key in category {}", cat.name()),
                    false,
                )?;
                clean = false;
            }
        }
        Ok(self.validate_links()? && clean)
    }

    /// Check the link closure: every child row whose join columns are all
    /// filled must have a matching parent row.
    pub fn validate_links(&self) -> Result<bool> {
        let Some(v) = &self.validator else {
            return Ok(true);
        };
        let mut clean = true;
        for link in v.links() {
            let (Some(child_ix), Some(parent_ix)) = (
                self.index_of(&link.child_category),
                self.index_of(&link.parent_category),
            ) else {
                continue;
            };
            let child = &self.categories[child_ix];
            for row in child.rows() {
                let tuple: Vec<&str> = link
                    .child_keys
                    .iter()
                    .map(|k| child.row_text_or_empty(row.id(), k))
                    .collect();
                if tuple.iter().any(|t| t.is_empty() || *t == ".") {
                    continue;
                }
                if !self.parent_exists(parent_ix, child_ix, link, &tuple) {
                    v.report(
                        &link.child_category,
                        None,
                        &format!(
                            "no parent row in {} for child in {} ({})",
                            link.parent_category,
                            link.child_category,
                            tuple.join(", ")
                        ),
                        false,
                    )?;
                    clean = false;
                }
            }
        }
        Ok(clean)
    }

    // -----------------------------------------------------------------------
    // Row insertion
    // -----------------------------------------------------------------------

    /// Insert a row into the named category; see [`Category::emplace`].
    pub fn emplace(&mut self, category: &str, items: &[(&str, &str)]) -> Result<RowId> {
        self.category(category).emplace(items)
    }

    // -----------------------------------------------------------------------
    // Cascading update
    // -----------------------------------------------------------------------

    /// Rewrite one item of every row matching `cond`, propagating the
    /// change through the configured link groups. Returns the number of
    /// directly updated rows.
    pub fn update_value(
        &mut self,
        category: &str,
        cond: &Condition,
        item: &str,
        value: &str,
    ) -> Result<usize> {
        let cat_ix = self
            .index_of(category)
            .ok_or_else(|| Error::Query(format!("no category {category} in {}", self.name)))?;
        let ids = self.categories[cat_ix].find_ids(cond);
        for &id in &ids {
            self.update_row_value_ix(cat_ix, id, item, value)?;
        }
        Ok(ids.len())
    }

    /// Rewrite one item of one row, cascading into children.
    pub fn update_row_value(
        &mut self,
        category: &str,
        row: RowId,
        item: &str,
        value: &str,
    ) -> Result<()> {
        let cat_ix = self
            .index_of(category)
            .ok_or_else(|| Error::Query(format!("no category {category} in {}", self.name)))?;
        self.update_row_value_ix(cat_ix, row, item, value)
    }

    fn update_row_value_ix(
        &mut self,
        cat_ix: usize,
        row: RowId,
        item: &str,
        value: &str,
    ) -> Result<()> {
        if !self.categories[cat_ix].contains(row) {
            return Err(Error::Query(format!(
                "stale row handle in {}",
                self.categories[cat_ix].name()
            )));
        }
        let mut plan = Plan::default();
        let mut visited = HashSet::new();
        self.plan_update(cat_ix, row, item, value, &mut plan, &mut visited)?;
        self.validate_plan(&plan)?;
        self.apply_plan(plan);
        Ok(())
    }

    /// Recursive planning step: collect the cell writes and row clones an
    /// update implies, without mutating anything. The visited set is keyed
    /// on row identity plus column and updated before recursing, which
    /// terminates cycles in the link graph.
    fn plan_update(
        &self,
        cat_ix: usize,
        row: RowId,
        item: &str,
        value: &str,
        plan: &mut Plan,
        visited: &mut HashSet<(usize, RowId, String)>,
    ) -> Result<()> {
        if !visited.insert((cat_ix, row, item.to_ascii_lowercase())) {
            return Ok(());
        }
        let cat = &self.categories[cat_ix];
        let old = cat.row_text_or_empty(row, item);
        if old == value {
            return Ok(());
        }
        cat.check_column_allowed(item)?;

        let validator = cat.validator().cloned();
        let affected: Vec<&LinkValidator> = match &validator {
            None => Vec::new(),
            Some(v) => v
                .links_for_parent(cat.name())
                .into_iter()
                .filter(|l| l.parent_keys.iter().any(|k| iequals(k, item)))
                .collect(),
        };
        let affected_ids: HashSet<u32> = affected.iter().map(|l| l.link_group_id).collect();

        for g in &affected {
            let Some(child_ix) = self.index_of(&g.child_category) else {
                continue;
            };
            let old_tuple: Vec<&str> = g
                .parent_keys
                .iter()
                .map(|k| cat.row_text_or_empty(row, k))
                .collect();
            if old_tuple.iter().any(|t| t.is_empty() || *t == ".") {
                continue;
            }
            let matching = self.matching_children(child_ix, g, &old_tuple);
            for ch in matching {
                let has_other_parent = validator.as_ref().is_some_and(|v| {
                    v.links_for_child(&g.child_category).iter().any(|g2| {
                        g2.link_group_id != g.link_group_id
                            && !affected_ids.contains(&g2.link_group_id)
                            && self.link_resolves(child_ix, ch, g2, None)
                    })
                });
                if has_other_parent {
                    // splitting keeps the original bound to its other
                    // parents; only the clone follows this link group
                    let rewrites: Vec<(String, String)> = g
                        .child_keys
                        .iter()
                        .zip(&g.parent_keys)
                        .filter(|(_, pk)| iequals(pk, item))
                        .map(|(ck, _)| (ck.clone(), value.to_string()))
                        .collect();
                    plan.clones.push(PlannedClone {
                        cat_ix: child_ix,
                        source: ch,
                        rewrites,
                    });
                } else {
                    for (ck, pk) in g.child_keys.iter().zip(&g.parent_keys) {
                        if iequals(pk, item) {
                            self.plan_update(child_ix, ch, ck, value, plan, visited)?;
                        }
                    }
                }
            }
        }

        plan.writes.push(PlannedWrite {
            cat_ix,
            row,
            item: item.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Child rows of `child_ix` whose join columns for `g` equal `tuple`.
    fn matching_children(
        &self,
        child_ix: usize,
        g: &LinkValidator,
        tuple: &[&str],
    ) -> Vec<RowId> {
        let child = &self.categories[child_ix];
        child
            .rows()
            .filter(|r| {
                g.child_keys.iter().zip(tuple).all(|(ck, want)| {
                    self.linked_values_equal(
                        child_ix,
                        ck,
                        child.row_text_or_empty(r.id(), ck),
                        want,
                    )
                })
            })
            .map(|r| r.id())
            .collect()
    }

    /// Does link group `g2` bind child row `ch` to some live parent row?
    /// Rows in `excluded` (pending erasure) do not count as live.
    fn link_resolves(
        &self,
        child_ix: usize,
        ch: RowId,
        g2: &LinkValidator,
        excluded: Option<&HashSet<(usize, RowId)>>,
    ) -> bool {
        let child = &self.categories[child_ix];
        let tuple: Vec<&str> = g2
            .child_keys
            .iter()
            .map(|k| child.row_text_or_empty(ch, k))
            .collect();
        if tuple.iter().any(|t| t.is_empty() || *t == ".") {
            return false;
        }
        let Some(parent_ix) = self.index_of(&g2.parent_category) else {
            return false;
        };
        let parent = &self.categories[parent_ix];
        parent.rows().any(|r| {
            if excluded.is_some_and(|ex| ex.contains(&(parent_ix, r.id()))) {
                return false;
            }
            g2.parent_keys.iter().zip(&tuple).all(|(pk, want)| {
                self.linked_values_equal(child_ix, pk, parent.row_text_or_empty(r.id(), pk), want)
            })
        })
    }

    fn parent_exists(
        &self,
        parent_ix: usize,
        child_ix: usize,
        link: &LinkValidator,
        tuple: &[&str],
    ) -> bool {
        let parent = &self.categories[parent_ix];
        parent.rows().any(|r| {
            link.parent_keys.iter().zip(tuple).all(|(pk, want)| {
                self.linked_values_equal(child_ix, pk, parent.row_text_or_empty(r.id(), pk), want)
            })
        })
    }

    /// Equality of two linked values under the child item's type (parent
    /// types propagate to untyped child keys when the dictionary loads).
    fn linked_values_equal(&self, child_ix: usize, child_item: &str, a: &str, b: &str) -> bool {
        match self.categories[child_ix].item_type(child_item) {
            Some(tv) => {
                if a.is_empty() || b.is_empty() {
                    a.is_empty() && b.is_empty()
                } else {
                    tv.compare(a, b) == std::cmp::Ordering::Equal
                }
            }
            None => icompare(a, b) == std::cmp::Ordering::Equal,
        }
    }

    /// Validate a staged plan: every written value against its item
    /// validator, and the resulting primary keys against the rest of their
    /// categories.
    fn validate_plan(&self, plan: &Plan) -> Result<()> {
        for w in &plan.writes {
            let cat = &self.categories[w.cat_ix];
            if let Some(iv) = cat.item_validator(&w.item) {
                iv.validate(cat.name(), &w.value)?;
            }
        }
        for c in &plan.clones {
            let cat = &self.categories[c.cat_ix];
            for (item, value) in &c.rewrites {
                if let Some(iv) = cat.item_validator(item) {
                    iv.validate(cat.name(), value)?;
                }
            }
        }

        // primary-key collisions, per touched category
        let mut touched_rows: Vec<(usize, RowId)> = plan
            .writes
            .iter()
            .map(|w| (w.cat_ix, w.row))
            .collect();
        touched_rows.sort();
        touched_rows.dedup();

        for &(cat_ix, row) in &touched_rows {
            let cat = &self.categories[cat_ix];
            let overrides: Vec<(&str, &str)> = plan
                .writes
                .iter()
                .filter(|w| w.cat_ix == cat_ix && w.row == row)
                .map(|w| (w.item.as_str(), w.value.as_str()))
                .collect();
            if !cat.touches_key(&overrides) {
                continue;
            }
            let Some(new_key) = cat.key_string_with(row, &overrides) else {
                continue;
            };
            // against untouched rows
            for other in cat.rows() {
                if touched_rows.binary_search(&(cat_ix, other.id())).is_ok() {
                    continue;
                }
                if cat.key_of(other.id()).as_deref() == Some(new_key.as_str()) {
                    return Err(Error::DuplicateKey {
                        category: cat.name().to_string(),
                        key: new_key,
                    });
                }
            }
            // against the other touched rows' post-update keys
            for &(oc, or) in &touched_rows {
                if (oc, or) == (cat_ix, row) || oc != cat_ix {
                    continue;
                }
                let other_overrides: Vec<(&str, &str)> = plan
                    .writes
                    .iter()
                    .filter(|w| w.cat_ix == oc && w.row == or)
                    .map(|w| (w.item.as_str(), w.value.as_str()))
                    .collect();
                if cat.key_string_with(or, &other_overrides).as_deref()
                    == Some(new_key.as_str())
                {
                    return Err(Error::DuplicateKey {
                        category: cat.name().to_string(),
                        key: new_key,
                    });
                }
            }
        }
        Ok(())
    }

    /// Commit a validated plan: clones first, in-place rewrites last.
    fn apply_plan(&mut self, plan: Plan) {
        for c in plan.clones {
            let cat = &mut self.categories[c.cat_ix];
            let mut row = cat.clone_row(c.source);
            for (item, value) in &c.rewrites {
                let col = cat.add_column_unchecked(item);
                row.set(col, value);
            }
            cat.insert_row_after(c.source, row);
        }
        for w in plan.writes {
            let value = if w.value == "?" { None } else { Some(w.value.as_str()) };
            self.categories[w.cat_ix].write_cell(w.row, &w.item, value);
        }
    }

    // -----------------------------------------------------------------------
    // Cascading erase
    // -----------------------------------------------------------------------

    /// Erase every row of `category` matching `cond`, cascading into child
    /// rows. A child is erased with its parent unless another link group
    /// still binds it to a surviving parent, in which case only the removed
    /// link's columns are blanked. Returns the number of directly erased
    /// rows.
    pub fn erase(&mut self, category: &str, cond: &Condition) -> Result<usize> {
        let Some(cat_ix) = self.index_of(category) else {
            return Ok(0);
        };
        let ids = self.categories[cat_ix].find_ids(cond);
        let mut count = 0;
        for id in ids {
            if !self.categories[cat_ix].contains(id) {
                continue; // already cascaded away by a previous erase
            }
            let mut doomed = Vec::new();
            let mut doomed_set = HashSet::new();
            let mut blanks = Vec::new();
            self.plan_erase(cat_ix, id, &mut doomed, &mut doomed_set, &mut blanks);
            for (cix, rid, item) in blanks {
                if doomed_set.contains(&(cix, rid)) {
                    continue;
                }
                self.categories[cix].write_cell(rid, &item, None);
            }
            for (cix, rid) in doomed {
                self.categories[cix].unlink_row(rid);
            }
            count += 1;
        }
        Ok(count)
    }

    fn plan_erase(
        &self,
        cat_ix: usize,
        row: RowId,
        doomed: &mut Vec<(usize, RowId)>,
        doomed_set: &mut HashSet<(usize, RowId)>,
        blanks: &mut Vec<(usize, RowId, String)>,
    ) {
        if !doomed_set.insert((cat_ix, row)) {
            return;
        }
        doomed.push((cat_ix, row));
        let cat = &self.categories[cat_ix];
        let Some(v) = cat.validator().cloned() else {
            return;
        };
        for g in v.links_for_parent(cat.name()) {
            let Some(child_ix) = self.index_of(&g.child_category) else {
                continue;
            };
            let tuple: Vec<&str> = g
                .parent_keys
                .iter()
                .map(|k| cat.row_text_or_empty(row, k))
                .collect();
            if tuple.iter().any(|t| t.is_empty() || *t == ".") {
                continue;
            }
            for ch in self.matching_children(child_ix, g, &tuple) {
                if doomed_set.contains(&(child_ix, ch)) {
                    continue;
                }
                let survives = v.links_for_child(&g.child_category).iter().any(|g2| {
                    g2.link_group_id != g.link_group_id
                        && self.link_resolves(child_ix, ch, g2, Some(doomed_set))
                });
                if survives {
                    for ck in &g.child_keys {
                        blanks.push((child_ix, ch, ck.clone()));
                    }
                } else {
                    self.plan_erase(child_ix, ch, doomed, doomed_set, blanks);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Link navigation
    // -----------------------------------------------------------------------

    /// Rows of `child_category` joined to `row` through any link group.
    pub fn get_children(&self, category: &str, row: RowId, child_category: &str) -> Vec<RowId> {
        let Some(cat_ix) = self.index_of(category) else {
            return Vec::new();
        };
        let Some(child_ix) = self.index_of(child_category) else {
            return Vec::new();
        };
        let cat = &self.categories[cat_ix];
        let Some(v) = cat.validator() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for g in v.links_for_parent(category) {
            if !iequals(&g.child_category, child_category) {
                continue;
            }
            let tuple: Vec<&str> = g
                .parent_keys
                .iter()
                .map(|k| cat.row_text_or_empty(row, k))
                .collect();
            if tuple.iter().any(|t| t.is_empty() || *t == ".") {
                continue;
            }
            for ch in self.matching_children(child_ix, g, &tuple) {
                if seen.insert(ch) {
                    out.push(ch);
                }
            }
        }
        out
    }

    /// Rows of `parent_category` that `row` of `category` joins to.
    pub fn get_parents(&self, category: &str, row: RowId, parent_category: &str) -> Vec<RowId> {
        let Some(cat_ix) = self.index_of(category) else {
            return Vec::new();
        };
        let Some(parent_ix) = self.index_of(parent_category) else {
            return Vec::new();
        };
        let cat = &self.categories[cat_ix];
        let Some(v) = cat.validator() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for g in v.links_for_child(category) {
            if !iequals(&g.parent_category, parent_category) {
                continue;
            }
            let tuple: Vec<&str> = g
                .child_keys
                .iter()
                .map(|k| cat.row_text_or_empty(row, k))
                .collect();
            if tuple.iter().any(|t| t.is_empty() || *t == ".") {
                continue;
            }
            let parent = &self.categories[parent_ix];
            for r in parent.rows() {
                let hit = g
                    .parent_keys
                    .iter()
                    .zip(&g.child_keys)
                    .zip(&tuple)
                    .all(|((pk, ck), want)| {
                        self.linked_values_equal(
                            cat_ix,
                            ck,
                            parent.row_text_or_empty(r.id(), pk),
                            want,
                        )
                    });
                if hit && seen.insert(r.id()) {
                    out.push(r.id());
                }
            }
        }
        out
    }

    /// Rows of `other` joined to `row` in either direction.
    pub fn get_linked(&self, category: &str, row: RowId, other: &str) -> Vec<RowId> {
        let mut out = self.get_children(category, row, other);
        for id in self.get_parents(category, row, other) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    pub fn has_children(&self, category: &str, row: RowId) -> bool {
        let Some(cat) = self.get(category) else {
            return false;
        };
        let Some(v) = cat.validator() else {
            return false;
        };
        v.links_for_parent(category)
            .iter()
            .any(|g| !self.get_children(category, row, &g.child_category).is_empty())
    }

    pub fn has_parents(&self, category: &str, row: RowId) -> bool {
        let Some(cat) = self.get(category) else {
            return false;
        };
        let Some(v) = cat.validator() else {
            return false;
        };
        v.links_for_child(category)
            .iter()
            .any(|g| !self.get_parents(category, row, &g.parent_category).is_empty())
    }

    // -----------------------------------------------------------------------
    // Tag order
    // -----------------------------------------------------------------------

    /// Full tags of the block in serialization order: `entry` and
    /// `audit_conform` first, then the remaining categories as stored.
    pub fn get_tag_order(&self) -> Vec<String> {
        let mut out = Vec::new();
        for name in ["entry", "audit_conform"] {
            if let Some(cat) = self.get(name) {
                out.extend(cat.tag_order());
            }
        }
        for cat in &self.categories {
            if iequals(cat.name(), "entry") || iequals(cat.name(), "audit_conform") {
                continue;
            }
            out.extend(cat.tag_order());
        }
        out
    }
}

/// Block equality compares the non-empty categories by case-insensitive
/// name and then category by category.
impl PartialEq for DataBlock {
    fn eq(&self, other: &Self) -> bool {
        if !iequals(&self.name, &other.name) {
            return false;
        }
        let names = |db: &DataBlock| {
            let mut n: Vec<String> = db
                .categories
                .iter()
                .filter(|c| !c.is_empty())
                .map(|c| c.name().to_ascii_lowercase())
                .collect();
            n.sort();
            n
        };
        if names(self) != names(other) {
            return false;
        }
        self.categories
            .iter()
            .filter(|c| !c.is_empty())
            .all(|c| other.get(c.name()).is_some_and(|o| c == o))
    }
}

impl std::fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBlock")
            .field("name", &self.name)
            .field("categories", &self.categories.len())
            .finish()
    }
}

#[derive(Default)]
struct Plan {
    writes: Vec<PlannedWrite>,
    clones: Vec<PlannedClone>,
}

struct PlannedWrite {
    cat_ix: usize,
    row: RowId,
    item: String,
    value: String,
}

struct PlannedClone {
    cat_ix: usize,
    source: RowId,
    rewrites: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::key;
    use crate::store::file::File;
    use crate::validate::parse_dictionary;

    const SHARED_COLUMN_DICT: &str = r#"
data_links.dic
    _dictionary.title   links.dic
    _dictionary.version 1.0

    loop_
    _item_type_list.code
    _item_type_list.primitive_code
    _item_type_list.construct
               int       numb   '[+-]?[0-9]+'

save_parent
    _category.id              parent
    _category.mandatory_code  no
    _category_key.name        '_parent.id'
    save_

save__parent.id
    _item.name                '_parent.id'
    _item.category_id         parent
    _item.mandatory_code      yes
    _item_type.code           int
    save_

save_child
    _category.id              child
    _category.mandatory_code  no
    _category_key.name        '_child.id'
    save_

save__child.id
    _item.name           '_child.id'
    _item.category_id    child
    _item.mandatory_code yes
    _item_type.code      int
    save_

save__child.parent_id
    _item.name           '_child.parent_id'
    _item.category_id    child
    _item.mandatory_code no
    save_

save__child.parent_id2
    _item.name           '_child.parent_id2'
    _item.category_id    child
    _item.mandatory_code no
    save_

save__child.parent_id3
    _item.name           '_child.parent_id3'
    _item.category_id    child
    _item.mandatory_code no
    save_

loop_
_pdbx_item_linked_group_list.child_category_id
_pdbx_item_linked_group_list.link_group_id
_pdbx_item_linked_group_list.child_name
_pdbx_item_linked_group_list.parent_name
_pdbx_item_linked_group_list.parent_category_id
child 1 '_child.parent_id'  '_parent.id' parent
child 2 '_child.parent_id2' '_parent.id' parent
child 3 '_child.parent_id3' '_parent.id' parent
"#;

    const SHARED_COLUMN_DATA: &str = r#"
data_test
loop_
_parent.id
1
2
3

loop_
_child.id
_child.parent_id
_child.parent_id2
_child.parent_id3
1 1 ? ?
2 ? 1 ?
3 ? ? 1
4 2 2 ?
5 2 ? 2
6 ? 2 2
7 3 3 3
"#;

    fn shared_column_file() -> File {
        let v = parse_dictionary("links", SHARED_COLUMN_DICT.as_bytes()).unwrap();
        let mut f = File::parse(SHARED_COLUMN_DATA.as_bytes()).unwrap();
        f.set_validator(Some(std::sync::Arc::new(v))).unwrap();
        f
    }

    fn count(db: &DataBlock, cat: &str, item: &str, value: i64) -> usize {
        db.get(cat).unwrap().count(&key(item).is(value))
    }

    #[test]
    fn rename_updates_every_link_group_without_splitting() {
        let mut f = shared_column_file();
        let db = f.front_mut().unwrap();

        // one child per link group
        assert_eq!(db.update_value("parent", &key("id").is(1), "id", "10").unwrap(), 1);
        assert_eq!(db.get("parent").unwrap().len(), 3);
        assert_eq!(db.get("child").unwrap().len(), 7);
        assert_eq!(count(db, "parent", "id", 1), 0);
        assert_eq!(count(db, "parent", "id", 10), 1);
        for item in ["parent_id", "parent_id2", "parent_id3"] {
            assert_eq!(count(db, "child", item, 1), 0, "{item}");
            assert_eq!(count(db, "child", item, 10), 1, "{item}");
        }

        // children referencing two of the three columns
        db.update_value("parent", &key("id").is(2), "id", "20").unwrap();
        assert_eq!(db.get("child").unwrap().len(), 7);
        for item in ["parent_id", "parent_id2", "parent_id3"] {
            assert_eq!(count(db, "child", item, 2), 0, "{item}");
            assert_eq!(count(db, "child", item, 20), 2, "{item}");
        }

        // one child referencing all three columns at once
        db.update_value("parent", &key("id").is(3), "id", "30").unwrap();
        assert_eq!(db.get("child").unwrap().len(), 7);
        let full = db
            .get("child")
            .unwrap()
            .find1(&key("id").is(7))
            .unwrap();
        assert_eq!(full.get::<i64>("parent_id"), Some(30));
        assert_eq!(full.get::<i64>("parent_id2"), Some(30));
        assert_eq!(full.get::<i64>("parent_id3"), Some(30));
    }

    #[test]
    fn erase_cascades_unless_another_link_survives() {
        let mut f = shared_column_file();
        let db = f.front_mut().unwrap();

        db.update_value("parent", &key("id").is(1), "id", "10").unwrap();
        db.update_value("parent", &key("id").is(2), "id", "20").unwrap();
        db.update_value("parent", &key("id").is(3), "id", "30").unwrap();

        assert_eq!(db.erase("parent", &key("id").is(10)).unwrap(), 1);
        assert_eq!(db.get("parent").unwrap().len(), 2);
        assert_eq!(db.get("child").unwrap().len(), 4);

        db.erase("parent", &key("id").is(20)).unwrap();
        assert_eq!(db.get("child").unwrap().len(), 1);

        db.erase("parent", &key("id").is(30)).unwrap();
        assert_eq!(db.get("parent").unwrap().len(), 0);
        assert_eq!(db.get("child").unwrap().len(), 0);
    }

    #[test]
    fn children_navigation() {
        let f = shared_column_file();
        let db = f.front().unwrap();
        let parent2 = db.get("parent").unwrap().find1(&key("id").is(2)).unwrap();
        let children = db.get_children("parent", parent2.id(), "child");
        let mut ids: Vec<i64> = children
            .iter()
            .filter_map(|&c| db.get("child").unwrap().row(c).unwrap().get::<i64>("id"))
            .collect();
        ids.sort();
        assert_eq!(ids, vec![4, 5, 6]);
        assert!(db.has_children("parent", parent2.id()));

        let child7 = db.get("child").unwrap().find1(&key("id").is(7)).unwrap();
        let parents = db.get_parents("child", child7.id(), "parent");
        assert_eq!(parents.len(), 1);
        assert!(db.has_parents("child", child7.id()));
    }

    const SPLIT_DICT: &str = r#"
data_split.dic
    _dictionary.title   split.dic
    _dictionary.version 1.0

    loop_
    _item_type_list.code
    _item_type_list.primitive_code
    _item_type_list.construct
               int    numb   '[+-]?[0-9]+'
               code   char   '[A-Za-z0-9_.-]+'

save_parent
    _category.id              parent
    _category.mandatory_code  no
    _category_key.name        '_parent.id'
    save_

save__parent.id
    _item.name                '_parent.id'
    _item.category_id         parent
    _item.mandatory_code      yes
    _item_type.code           int
    save_

save__parent.tag2
    _item.name                '_parent.tag2'
    _item.category_id         parent
    _item.mandatory_code      no
    _item_type.code           code
    save_

save_child
    _category.id              child
    _category.mandatory_code  no
    save_

save__child.p1
    _item.name           '_child.p1'
    _item.category_id    child
    _item.mandatory_code no
    save_

save__child.p2
    _item.name           '_child.p2'
    _item.category_id    child
    _item.mandatory_code no
    save_

loop_
_pdbx_item_linked_group_list.child_category_id
_pdbx_item_linked_group_list.link_group_id
_pdbx_item_linked_group_list.child_name
_pdbx_item_linked_group_list.parent_name
_pdbx_item_linked_group_list.parent_category_id
child 1 '_child.p1' '_parent.id'   parent
child 2 '_child.p2' '_parent.tag2' parent
"#;

    fn split_file() -> File {
        let v = parse_dictionary("split", SPLIT_DICT.as_bytes()).unwrap();
        let data = "\
data_test
loop_
_parent.id
_parent.tag2
1 aap
2 noot

loop_
_child.p1
_child.p2
1 aap
1 ?
";
        let mut f = File::parse(data.as_bytes()).unwrap();
        f.set_validator(Some(std::sync::Arc::new(v))).unwrap();
        f
    }

    #[test]
    fn update_splits_children_bound_to_other_parents() {
        let mut f = split_file();
        let db = f.front_mut().unwrap();

        db.update_value("parent", &key("id").is(1), "id", "10").unwrap();

        let child = db.get("child").unwrap();
        // the doubly-bound child was split: its pre-image keeps the old
        // join for group 2, the clone follows group 1
        assert_eq!(child.len(), 3);
        assert_eq!(child.count(&key("p1").is(1)), 1);
        assert_eq!(child.count(&key("p1").is(10)), 2);
        assert_eq!(child.count(&(key("p1").is(1) & key("p2").is("aap"))), 1);
        assert_eq!(child.count(&(key("p1").is(10) & key("p2").is("aap"))), 1);
        assert_eq!(child.count(&(key("p1").is(10) & key("p2").is_empty())), 1);
    }

    #[test]
    fn erase_blanks_links_with_surviving_parents() {
        let mut f = split_file();
        let db = f.front_mut().unwrap();

        // bind the doubly-linked child's p2 to the OTHER parent, so that
        // erasing parent 1 must keep the row and blank only p1
        db.update_value("child", &key("p2").is("aap"), "p2", "noot").unwrap();
        db.erase("parent", &key("id").is(1)).unwrap();

        let child = db.get("child").unwrap();
        assert_eq!(child.len(), 1);
        let survivor = child.front().unwrap();
        assert!(survivor.is_unknown("p1"));
        assert_eq!(survivor.text("p2"), Some("noot"));
    }

    #[test]
    fn duplicate_parent_key_rejected_and_store_unchanged() {
        let mut f = shared_column_file();
        let db = f.front_mut().unwrap();

        let err = db.update_value("parent", &key("id").is(1), "id", "2");
        assert!(matches!(err, Err(Error::DuplicateKey { .. })));

        // nothing moved
        assert_eq!(count(db, "parent", "id", 1), 1);
        assert_eq!(count(db, "parent", "id", 2), 1);
        assert_eq!(count(db, "child", "parent_id", 1), 1);
        assert_eq!(db.get("child").unwrap().len(), 7);
    }

    #[test]
    fn invalid_value_rejected_and_store_unchanged() {
        let mut f = shared_column_file();
        let db = f.front_mut().unwrap();

        let err = db.update_value("parent", &key("id").is(1), "id", "vijf");
        assert!(matches!(err, Err(Error::Validation { .. })));
        assert_eq!(count(db, "parent", "id", 1), 1);
        assert_eq!(count(db, "child", "parent_id", 1), 1);
    }

    #[test]
    fn emplace_validates_and_rejects_duplicate_keys() {
        let mut f = shared_column_file();
        let db = f.front_mut().unwrap();

        assert!(matches!(
            db.emplace("parent", &[("id", "vijf")]),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            db.emplace("parent", &[("id", "1")]),
            Err(Error::DuplicateKey { .. })
        ));
        db.emplace("parent", &[("id", "4")]).unwrap();
        assert_eq!(db.get("parent").unwrap().len(), 4);
    }

    #[test]
    fn link_validation_reports_closure() {
        let f = shared_column_file();
        let db = f.front().unwrap();
        assert!(db.validate_links().unwrap());

        let mut f2 = shared_column_file();
        let db2 = f2.front_mut().unwrap();
        // a child pointing at a parent that does not exist
        db2.get_mut("child")
            .unwrap()
            .emplace(&[("id", "8"), ("parent_id", "99")])
            .unwrap();
        assert!(!db2.validate_links().unwrap());
    }

    #[test]
    fn block_validate_checks_mandatory_and_types() {
        let f = shared_column_file();
        assert!(f.validate().unwrap());

        let mut f2 = shared_column_file();
        // a child row missing its mandatory id
        f2.front_mut()
            .unwrap()
            .get_mut("child")
            .unwrap()
            .emplace(&[("parent_id", "1")])
            .unwrap();
        assert!(!f2.validate().unwrap());
    }

    const UCODE_DICT: &str = r#"
data_ucase.dic
    _dictionary.title   ucase.dic
    _dictionary.version 1.0

    loop_
    _item_type_list.code
    _item_type_list.primitive_code
    _item_type_list.construct
               code      char   '[A-Za-z0-9_.-]+'
               ucode     uchar  '[A-Za-z0-9_.-]+'

save_cat
    _category.id              cat
    _category.mandatory_code  no
    _category_key.name        '_cat.id'
    save_

save__cat.id
    _item.name                '_cat.id'
    _item.category_id         cat
    _item.mandatory_code      yes
    _item_type.code           ucode
    save_

save__cat.c
    _item.name                '_cat.c'
    _item.category_id         cat
    _item.mandatory_code      no
    _item_type.code           code
    save_
"#;

    #[test]
    fn uchar_keys_collide_case_insensitively() {
        let v = parse_dictionary("ucase", UCODE_DICT.as_bytes()).unwrap();
        let data = "data_test\nloop_\n_cat.id _cat.c\naap Aap\nnoot Noot\nmies Mies\n";
        let mut f = File::parse(data.as_bytes()).unwrap();
        f.set_validator(Some(std::sync::Arc::new(v))).unwrap();
        let db = f.front_mut().unwrap();

        // AAP collides with the row inserted as aap
        assert!(matches!(
            db.emplace("cat", &[("id", "AAP"), ("c", "tweede")]),
            Err(Error::DuplicateKey { .. })
        ));

        // erasing by the upper-cased key removes the lower-cased row
        assert_eq!(db.erase("cat", &key("id").is("AAP")).unwrap(), 1);
        assert_eq!(db.get("cat").unwrap().len(), 2);
        assert_eq!(db.get("cat").unwrap().count(&key("id").is("aap")), 0);

        // with the row gone the key is free again
        db.emplace("cat", &[("id", "aap"), ("c", "tweede")]).unwrap();
        assert_eq!(db.get("cat").unwrap().len(), 3);

        // a Char-typed column would not have collided: c keeps its case
        assert_eq!(db.get("cat").unwrap().count(&key("c").is("noot")), 0);
        assert_eq!(db.get("cat").unwrap().count(&key("c").is("Noot")), 1);
    }

    #[test]
    fn promote_front_reorders_categories() {
        let mut db = DataBlock::new("b");
        db.category("one");
        db.category("two");
        db.category("three");
        db.promote_front("three");
        let names: Vec<&str> = db.categories().map(Category::name).collect();
        assert_eq!(names, vec!["three", "one", "two"]);
    }
}
