//! Dictionary-driven validation.
//!
//! A [`Validator`] is the compiled form of a CIF dictionary: types with
//! their regular expressions, items with their mandatory flags and
//! enumerations, categories with their primary keys, and link groups
//! between categories. Validators are built by [`dictionary::parse_dictionary`]
//! and may be shared between files.

pub mod dictionary;
pub mod factory;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};
use crate::text::{iequals, parse_float, split_tag_name};

pub use dictionary::parse_dictionary;
pub use factory::ValidatorFactory;

/// DDL primitive type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Char,
    UChar,
    Numb,
}

impl Primitive {
    pub fn from_code(code: &str) -> Result<Primitive> {
        if iequals(code, "char") {
            Ok(Primitive::Char)
        } else if iequals(code, "uchar") {
            Ok(Primitive::UChar)
        } else if iequals(code, "numb") {
            Ok(Primitive::Numb)
        } else {
            Err(Error::Dictionary(format!(
                "not a known primitive type: {code}"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Type validator
// ---------------------------------------------------------------------------

/// A named type: a primitive code plus a compiled pattern.
#[derive(Debug)]
pub struct TypeValidator {
    name: String,
    primitive: Primitive,
    rx: Regex,
}

impl TypeValidator {
    /// Compile a type from its dictionary construct. The empty pattern
    /// normalizes to `.+`; the pattern is matched against whole values.
    pub fn new(name: &str, primitive: Primitive, pattern: &str) -> Result<TypeValidator> {
        let pattern = if pattern.is_empty() { ".+" } else { pattern };
        let translated = posix_to_regex(pattern);
        let rx = Regex::new(&format!("^(?s:{translated})$")).map_err(|e| {
            Error::Dictionary(format!("cannot compile pattern for type {name}: {e}"))
        })?;
        Ok(TypeValidator {
            name: name.to_string(),
            primitive,
            rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn matches(&self, value: &str) -> bool {
        self.rx.is_match(value)
    }

    /// Type-aware three-way compare.
    ///
    /// `Numb` compares as `f64` within epsilon, with empty sorting before
    /// non-empty and unparseable values after parseable ones. `Char` and
    /// `UChar` compare bytewise with runs of spaces collapsed to one;
    /// `UChar` also folds case.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        if a.is_empty() || b.is_empty() {
            return a.len().cmp(&b.len());
        }
        match self.primitive {
            Primitive::Numb => {
                let fa = full_float(a);
                let fb = full_float(b);
                match (fa, fb) {
                    (Some(da), Some(db)) => {
                        if (da - db).abs() <= f64::EPSILON {
                            Ordering::Equal
                        } else if da < db {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        }
                    }
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                }
            }
            Primitive::Char | Primitive::UChar => {
                collapse_compare(a, b, self.primitive == Primitive::UChar)
            }
        }
    }

    /// Canonical form of a value under this type's compare, used for
    /// primary-key indexing.
    pub(crate) fn normalize(&self, value: &str) -> String {
        match self.primitive {
            Primitive::Numb => match full_float(value) {
                Some(v) => crate::text::format_general(v),
                None => value.to_string(),
            },
            Primitive::Char => collapse_spaces(value, false),
            Primitive::UChar => collapse_spaces(value, true),
        }
    }
}

fn full_float(s: &str) -> Option<f64> {
    let (v, n) = parse_float(s)?;
    (n == s.len()).then_some(v)
}

fn collapse_compare(a: &str, b: &str, fold: bool) -> Ordering {
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let mut i = 0;
    let mut j = 0;
    loop {
        match (ab.get(i), bb.get(j)) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => {
                let (ca, cb) = if fold {
                    (ca.to_ascii_lowercase(), cb.to_ascii_lowercase())
                } else {
                    (ca, cb)
                };
                match ca.cmp(&cb) {
                    Ordering::Equal => {}
                    other => return other,
                }
                if ca == b' ' {
                    while ab.get(i + 1) == Some(&b' ') {
                        i += 1;
                    }
                    while bb.get(j + 1) == Some(&b' ') {
                        j += 1;
                    }
                }
                i += 1;
                j += 1;
            }
        }
    }
}

fn collapse_spaces(s: &str, fold: bool) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = false;
    for mut c in s.chars() {
        if fold {
            c = c.to_ascii_lowercase();
        }
        if c == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
        } else {
            last_space = false;
        }
        out.push(c);
    }
    out
}

/// Translate the POSIX ERE bracket idioms used by mmCIF dictionaries into
/// syntax the `regex` crate accepts: a `]` placed first in a character
/// class (`[]...]`, `[^]...]`) is literal in POSIX and must be escaped.
pub(crate) fn posix_to_regex(pattern: &str) -> String {
    let bytes = pattern.as_bytes();
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() {
            out.push('\\');
            out.push(bytes[i + 1] as char);
            i += 2;
            continue;
        }
        if b == b'[' {
            out.push('[');
            i += 1;
            if bytes.get(i) == Some(&b'^') {
                out.push('^');
                i += 1;
            }
            if bytes.get(i) == Some(&b']') {
                out.push_str("\\]");
                i += 1;
            }
            // copy the rest of the class verbatim, escaping inner '[' which
            // POSIX treats as literal but the regex crate reserves
            while i < bytes.len() && bytes[i] != b']' {
                match bytes[i] {
                    b'\\' if i + 1 < bytes.len() => {
                        out.push('\\');
                        out.push(bytes[i + 1] as char);
                        i += 1;
                    }
                    b'[' => out.push_str("\\["),
                    c => out.push(c as char),
                }
                i += 1;
            }
            continue;
        }
        out.push(b as char);
        i += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Item / category / link validators
// ---------------------------------------------------------------------------

/// Validation rules for a single item.
#[derive(Debug, Default, Clone)]
pub struct ItemValidator {
    pub tag: String,
    pub mandatory: bool,
    pub item_type: Option<Arc<TypeValidator>>,
    pub enum_values: Vec<String>,
    pub default_value: Option<String>,
}

impl ItemValidator {
    /// Check a stored value. Empty, `.` and `?` always pass; other values
    /// must match the type pattern and, when an enumeration is declared,
    /// be one of the allowed values.
    pub fn validate(&self, category: &str, value: &str) -> Result<()> {
        if value.is_empty() || value == "." || value == "?" {
            return Ok(());
        }
        if let Some(tv) = &self.item_type {
            if !tv.matches(value) {
                return Err(Error::validation(
                    category,
                    Some(&self.tag),
                    format!(
                        "value '{value}' does not match type expression for type {}",
                        tv.name()
                    ),
                ));
            }
        }
        if !self.enum_values.is_empty() {
            let fold = matches!(
                self.item_type.as_deref().map(TypeValidator::primitive),
                Some(Primitive::UChar)
            );
            let hit = self.enum_values.iter().any(|e| {
                if fold {
                    iequals(e, value)
                } else {
                    e == value
                }
            });
            if !hit {
                return Err(Error::validation(
                    category,
                    Some(&self.tag),
                    format!("value '{value}' is not in the list of allowed values"),
                ));
            }
        }
        Ok(())
    }

    /// Compare two stored values under this item's type, falling back to a
    /// case-insensitive lexical compare for untyped items.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match &self.item_type {
            Some(tv) => tv.compare(a, b),
            None => crate::text::icompare(a, b),
        }
    }
}

/// Validation rules for a category: its items, mandatory set and primary key.
#[derive(Debug, Default)]
pub struct CategoryValidator {
    pub name: String,
    pub mandatory: bool,
    /// Item names of the primary key, in declaration order.
    pub keys: Vec<String>,
    items: Vec<ItemValidator>,
    /// Lower-cased item name (canonical or alias) to index into `items`.
    lookup: HashMap<String, usize>,
}

impl CategoryValidator {
    pub(crate) fn new(name: &str) -> CategoryValidator {
        CategoryValidator {
            name: name.to_string(),
            ..CategoryValidator::default()
        }
    }

    pub fn item(&self, name: &str) -> Option<&ItemValidator> {
        self.lookup
            .get(&name.to_ascii_lowercase())
            .map(|&ix| &self.items[ix])
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemValidator> {
        self.items.iter()
    }

    pub fn mandatory_items(&self) -> impl Iterator<Item = &ItemValidator> {
        self.items.iter().filter(|i| i.mandatory)
    }

    pub(crate) fn add_item(&mut self, v: ItemValidator) {
        let key = v.tag.to_ascii_lowercase();
        if self.lookup.contains_key(&key) {
            log::debug!(
                "duplicate item validator for {} in category {}",
                v.tag,
                self.name
            );
            return;
        }
        self.lookup.insert(key, self.items.len());
        self.items.push(v);
    }

    pub(crate) fn add_alias(&mut self, alias: &str, canonical: &str) {
        if let Some(&ix) = self.lookup.get(&canonical.to_ascii_lowercase()) {
            self.lookup.insert(alias.to_ascii_lowercase(), ix);
        }
    }

    pub(crate) fn item_mut(&mut self, name: &str) -> Option<&mut ItemValidator> {
        self.lookup
            .get(&name.to_ascii_lowercase())
            .copied()
            .map(move |ix| &mut self.items[ix])
    }
}

/// A foreign-key relationship between two categories.
///
/// `parent_keys` and `child_keys` have the same length; multiple link
/// groups between the same pair of categories are independent join paths
/// distinguished by `link_group_id`.
#[derive(Debug, Clone)]
pub struct LinkValidator {
    pub link_group_id: u32,
    pub parent_category: String,
    pub child_category: String,
    pub parent_keys: Vec<String>,
    pub child_keys: Vec<String>,
    pub label: Option<String>,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// The compiled form of a data dictionary.
#[derive(Debug, Default)]
pub struct Validator {
    name: String,
    version: String,
    strict: bool,
    types: HashMap<String, Arc<TypeValidator>>,
    categories: Vec<CategoryValidator>,
    category_lookup: HashMap<String, usize>,
    links: Vec<LinkValidator>,
}

impl Validator {
    pub(crate) fn new(name: &str) -> Validator {
        Validator {
            name: name.to_string(),
            ..Validator::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub(crate) fn set_version(&mut self, version: &str) {
        self.version = version.to_string();
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// In strict mode every reported problem is an error; otherwise
    /// non-fatal problems are logged and processing continues.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn type_validator(&self, code: &str) -> Option<&Arc<TypeValidator>> {
        self.types.get(&code.to_ascii_lowercase())
    }

    pub fn category(&self, name: &str) -> Option<&CategoryValidator> {
        self.category_lookup
            .get(&name.to_ascii_lowercase())
            .map(|&ix| &self.categories[ix])
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryValidator> {
        self.categories.iter()
    }

    /// Find the item validator for a full `_category.item` tag.
    pub fn item(&self, tag: &str) -> Option<&ItemValidator> {
        let (cat, item) = split_tag_name(tag);
        self.category(cat)?.item(item)
    }

    pub fn links(&self) -> &[LinkValidator] {
        &self.links
    }

    pub fn links_for_parent(&self, category: &str) -> Vec<&LinkValidator> {
        self.links
            .iter()
            .filter(|l| iequals(&l.parent_category, category))
            .collect()
    }

    pub fn links_for_child(&self, category: &str) -> Vec<&LinkValidator> {
        self.links
            .iter()
            .filter(|l| iequals(&l.child_category, category))
            .collect()
    }

    /// Report a problem: an error in strict mode (or when `fatal`),
    /// otherwise a warning on the log.
    pub fn report(&self, category: &str, item: Option<&str>, message: &str, fatal: bool) -> Result<()> {
        if self.strict || fatal {
            Err(Error::validation(category, item, message))
        } else {
            log::warn!("{message}");
            Ok(())
        }
    }

    pub(crate) fn add_type(&mut self, tv: TypeValidator) {
        let key = tv.name.to_ascii_lowercase();
        if self.types.contains_key(&key) {
            log::debug!("duplicate type validator {}", tv.name);
            return;
        }
        self.types.insert(key, Arc::new(tv));
    }

    pub(crate) fn category_mut(&mut self, name: &str) -> &mut CategoryValidator {
        let key = name.to_ascii_lowercase();
        if let Some(&ix) = self.category_lookup.get(&key) {
            return &mut self.categories[ix];
        }
        self.category_lookup.insert(key, self.categories.len());
        self.categories.push(CategoryValidator::new(name));
        self.categories.last_mut().unwrap()
    }

    /// Install a link, resolving both endpoints. A child key without a type
    /// inherits its parent key's type.
    pub(crate) fn add_link(&mut self, link: LinkValidator) -> Result<()> {
        if link.parent_keys.len() != link.child_keys.len() {
            return Err(Error::Link {
                parent: link.parent_category.clone(),
                child: link.child_category.clone(),
                message: "unequal number of keys for parent and child".into(),
            });
        }
        let link_err = |message: String| Error::Link {
            parent: link.parent_category.clone(),
            child: link.child_category.clone(),
            message,
        };
        if self.category(&link.parent_category).is_none() {
            return Err(link_err(format!(
                "unknown parent category {}",
                link.parent_category
            )));
        }
        if self.category(&link.child_category).is_none() {
            return Err(link_err(format!(
                "unknown child category {}",
                link.child_category
            )));
        }
        let mut inherited: Vec<Option<Arc<TypeValidator>>> = Vec::new();
        {
            let pcv = self.category(&link.parent_category).unwrap();
            let ccv = self.category(&link.child_category).unwrap();
            for (pk, ck) in link.parent_keys.iter().zip(&link.child_keys) {
                let piv = pcv.item(pk).ok_or_else(|| {
                    link_err(format!(
                        "unknown parent tag _{}.{pk}",
                        link.parent_category
                    ))
                })?;
                let civ = ccv.item(ck).ok_or_else(|| {
                    link_err(format!("unknown child tag _{}.{ck}", link.child_category))
                })?;
                if civ.item_type.is_none() {
                    inherited.push(piv.item_type.clone());
                } else {
                    inherited.push(None);
                }
            }
        }
        let child_cat = link.child_category.clone();
        let child_keys = link.child_keys.clone();
        let ccv = self.category_mut(&child_cat);
        for (ck, ty) in child_keys.iter().zip(inherited) {
            if let Some(ty) = ty {
                if let Some(civ) = ccv.item_mut(ck) {
                    civ.item_type = Some(ty);
                }
            }
        }
        self.links.push(link);
        Ok(())
    }

    pub(crate) fn next_link_group_id(&self) -> u32 {
        self.links
            .iter()
            .map(|l| l.link_group_id)
            .max()
            .map_or(1, |m| m + 1)
    }
}
