//! Dictionary loading.
//!
//! A dictionary is itself a CIF file whose save frames carry the schema.
//! Parsing is a second semantic pass: the file is read into a data block
//! plus its frames, and those are walked to install type, item, category
//! and link validators.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use crate::error::{Error, Result};
use crate::parse::{Parser, Sink};
use crate::store::datablock::DataBlock;
use crate::store::row::RowId;
use crate::text::{iequals, split_tag_name};
use crate::token::ValueKind;
use crate::validate::{
    ItemValidator, LinkValidator, Primitive, TypeValidator, Validator,
};

/// Parse a dictionary from a byte stream into a compiled [`Validator`].
pub fn parse_dictionary(name: &str, mut reader: impl Read) -> Result<Validator> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    parse_dictionary_bytes(name, &buf)
}

pub fn parse_dictionary_bytes(name: &str, src: &[u8]) -> Result<Validator> {
    let mut sink = DictSink::default();
    Parser::new(src, &mut sink)?.parse_file()?;
    let root = sink
        .root
        .ok_or_else(|| Error::Dictionary(format!("dictionary {name} has no data block")))?;
    build_validator(name, &root, &sink.frames)
}

// ---------------------------------------------------------------------------
// Sink: a data block plus a flat list of save frames
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DictSink {
    root: Option<DataBlock>,
    frames: Vec<DataBlock>,
    stack: Vec<DataBlock>,
    category: Option<String>,
    row: Option<RowId>,
}

impl DictSink {
    fn current(&mut self) -> Result<&mut DataBlock> {
        if let Some(frame) = self.stack.last_mut() {
            return Ok(frame);
        }
        self.root
            .as_mut()
            .ok_or_else(|| Error::Dictionary("content outside a data block".into()))
    }
}

impl Sink for DictSink {
    fn accepts_save_frames(&self) -> bool {
        true
    }

    fn datablock(&mut self, name: &str) -> Result<()> {
        // dictionaries normally hold one block; extra blocks merge into it
        if self.root.is_none() {
            self.root = Some(DataBlock::new(name));
        }
        self.category = None;
        self.row = None;
        Ok(())
    }

    fn category(&mut self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.current()?.category(&name);
        self.category = Some(name);
        self.row = None;
        Ok(())
    }

    fn row(&mut self) -> Result<()> {
        let Some(cat) = self.category.clone() else {
            return Err(Error::Dictionary("row outside a category".into()));
        };
        self.row = Some(self.current()?.category(&cat).new_row());
        Ok(())
    }

    fn item(&mut self, item: &str, text: &str, kind: ValueKind) -> Result<()> {
        if kind == ValueKind::Unknown {
            return Ok(());
        }
        let (Some(cat), Some(row)) = (self.category.clone(), self.row) else {
            return Err(Error::Dictionary("item outside a row".into()));
        };
        self.current()?.category(&cat).parse_item(row, item, text)
    }

    fn save_begin(&mut self, name: &str) -> Result<()> {
        self.stack.push(DataBlock::new(name));
        self.category = None;
        self.row = None;
        Ok(())
    }

    fn save_end(&mut self) -> Result<()> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| Error::Dictionary("save_ without an open frame".into()))?;
        self.frames.push(frame);
        self.category = None;
        self.row = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Second pass: from parsed frames to a validator
// ---------------------------------------------------------------------------

fn build_validator(name: &str, root: &DataBlock, frames: &[DataBlock]) -> Result<Validator> {
    let mut v = Validator::new(name);

    if let Some(dict) = root.get("dictionary").and_then(|c| c.front()) {
        if let Some(title) = dict.text("title") {
            v.set_name(title);
        }
        if let Some(version) = dict.text("version") {
            v.set_version(version);
        }
    }

    install_types(&mut v, root, frames);
    install_categories(&mut v, frames);
    install_items(&mut v, frames)?;
    install_links(&mut v, root, frames)?;

    Ok(v)
}

fn install_types(v: &mut Validator, root: &DataBlock, frames: &[DataBlock]) {
    for block in std::iter::once(root).chain(frames.iter()) {
        let Some(cat) = block.get("item_type_list") else {
            continue;
        };
        for row in cat.rows() {
            let Some(code) = row.text("code") else {
                continue;
            };
            let primitive = row
                .text("primitive_code")
                .and_then(|p| Primitive::from_code(p).ok())
                .unwrap_or(Primitive::Char);
            let construct = match row.text("construct") {
                None | Some(".") => "",
                Some(c) => c,
            };
            match TypeValidator::new(code, primitive, construct) {
                Ok(tv) => v.add_type(tv),
                Err(e) => {
                    log::warn!("{e}; falling back to an unconstrained pattern");
                    if let Ok(tv) = TypeValidator::new(code, primitive, "") {
                        v.add_type(tv);
                    }
                }
            }
        }
    }
}

fn install_categories(v: &mut Validator, frames: &[DataBlock]) {
    for frame in frames {
        if let Some(cat) = frame.get("category") {
            for row in cat.rows() {
                let Some(id) = row.text("id") else { continue };
                let mandatory = row
                    .text("mandatory_code")
                    .is_some_and(|c| iequals(c, "yes"));
                let cv = v.category_mut(id);
                cv.mandatory = mandatory;
            }
        }
        if let Some(keys) = frame.get("category_key") {
            for row in keys.rows() {
                let Some(tag) = row.text("name") else { continue };
                let (cat, item) = split_tag_name(tag);
                let cv = v.category_mut(cat);
                if !cv.keys.iter().any(|k| iequals(k, item)) {
                    cv.keys.push(item.to_string());
                }
            }
        }
    }
}

fn install_items(v: &mut Validator, frames: &[DataBlock]) -> Result<()> {
    // aliases are resolved after all canonical items exist
    let mut aliases: Vec<(String, String)> = Vec::new();

    for frame in frames {
        let Some(items) = frame.get("item") else {
            continue;
        };

        let type_code = frame
            .get("item_type")
            .and_then(|c| c.front())
            .and_then(|r| r.text("code").map(str::to_string));
        let enum_values: Vec<String> = frame
            .get("item_enumeration")
            .map(|c| {
                c.rows()
                    .filter_map(|r| r.text("value").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let default_value = frame
            .get("item_default")
            .and_then(|c| c.front())
            .and_then(|r| r.text("value").map(str::to_string));

        let mut canonical: Option<String> = None;
        for row in items.rows() {
            let full = match row.text("name") {
                Some(n) => n.to_string(),
                None => frame.name().to_string(),
            };
            let (cat, item) = split_tag_name(&full);
            if cat.is_empty() || item.is_empty() {
                return Err(Error::Dictionary(format!(
                    "malformed item name '{full}' in dictionary frame {}",
                    frame.name()
                )));
            }
            let mandatory = row
                .text("mandatory_code")
                .is_some_and(|c| iequals(c, "yes"));
            let item_type = type_code
                .as_deref()
                .and_then(|c| v.type_validator(c).cloned());
            canonical.get_or_insert_with(|| full.clone());
            v.category_mut(cat).add_item(ItemValidator {
                tag: item.to_string(),
                mandatory,
                item_type,
                enum_values: enum_values.clone(),
                default_value: default_value.clone(),
            });
        }

        if let (Some(aliased), Some(canonical)) = (frame.get("item_aliases"), canonical) {
            for row in aliased.rows() {
                if let Some(alias) = row.text("alias_name") {
                    aliases.push((alias.to_string(), canonical.clone()));
                }
            }
        }
    }

    for (alias, canonical) in aliases {
        let (acat, aitem) = split_tag_name(&alias);
        let (ccat, citem) = split_tag_name(&canonical);
        if iequals(acat, ccat) {
            v.category_mut(acat).add_alias(aitem, citem);
        } else {
            let canonical_item = v.category(ccat).and_then(|c| c.item(citem)).cloned();
            if let Some(mut clone) = canonical_item {
                clone.tag = aitem.to_string();
                v.category_mut(acat).add_item(clone);
            }
        }
    }
    Ok(())
}

fn install_links(v: &mut Validator, root: &DataBlock, frames: &[DataBlock]) -> Result<()> {
    // multi-column groups, keyed by (child category, declared group id)
    struct Group {
        parent_category: String,
        child_category: String,
        parent_keys: Vec<String>,
        child_keys: Vec<String>,
        label: Option<String>,
    }
    let mut groups: Vec<((String, String), Group)> = Vec::new();
    let mut covered: HashSet<(String, String)> = HashSet::new();

    if let Some(list) = root.get("pdbx_item_linked_group_list") {
        for row in list.rows() {
            let (Some(child_cat), Some(group_id), Some(child_name), Some(parent_name)) = (
                row.text("child_category_id"),
                row.text("link_group_id"),
                row.text("child_name"),
                row.text("parent_name"),
            ) else {
                continue;
            };
            let parent_cat = match row.text("parent_category_id") {
                Some(p) => p.to_string(),
                None => split_tag_name(parent_name).0.to_string(),
            };
            let (_, child_item) = split_tag_name(child_name);
            let (_, parent_item) = split_tag_name(parent_name);
            covered.insert((
                child_name.to_ascii_lowercase(),
                parent_name.to_ascii_lowercase(),
            ));

            let key = (child_cat.to_ascii_lowercase(), group_id.to_string());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, g)) => {
                    g.parent_keys.push(parent_item.to_string());
                    g.child_keys.push(child_item.to_string());
                }
                None => groups.push((
                    key,
                    Group {
                        parent_category: parent_cat,
                        child_category: child_cat.to_string(),
                        parent_keys: vec![parent_item.to_string()],
                        child_keys: vec![child_item.to_string()],
                        label: None,
                    },
                )),
            }
        }
    }

    if let Some(labels) = root.get("pdbx_item_linked_group") {
        let mut by_key: HashMap<(String, String), String> = HashMap::new();
        for row in labels.rows() {
            if let (Some(cat), Some(id), Some(label)) = (
                row.text("category_id"),
                row.text("link_group_id"),
                row.text("label"),
            ) {
                by_key.insert((cat.to_ascii_lowercase(), id.to_string()), label.to_string());
            }
        }
        for (key, g) in &mut groups {
            g.label = by_key.get(key).cloned();
        }
    }

    // pairwise _item_linked declarations from the frames; each pair forms
    // its own group unless a pdbx group already covers it
    let mut pairs: Vec<(String, String)> = Vec::new();
    for frame in frames {
        let Some(linked) = frame.get("item_linked") else {
            continue;
        };
        for row in linked.rows() {
            let (Some(child), Some(parent)) = (row.text("child_name"), row.text("parent_name"))
            else {
                continue;
            };
            let k = (child.to_ascii_lowercase(), parent.to_ascii_lowercase());
            if covered.contains(&k) || pairs.iter().any(|(c, p)| {
                c.eq_ignore_ascii_case(child) && p.eq_ignore_ascii_case(parent)
            }) {
                continue;
            }
            pairs.push((child.to_string(), parent.to_string()));
        }
    }

    let mut next_id = 1u32;
    for (_, g) in groups {
        v.add_link(LinkValidator {
            link_group_id: next_id,
            parent_category: g.parent_category,
            child_category: g.child_category,
            parent_keys: g.parent_keys,
            child_keys: g.child_keys,
            label: g.label,
        })?;
        next_id += 1;
    }
    for (child, parent) in pairs {
        let (ccat, citem) = split_tag_name(&child);
        let (pcat, pitem) = split_tag_name(&parent);
        v.add_link(LinkValidator {
            link_group_id: next_id,
            parent_category: pcat.to_string(),
            child_category: ccat.to_string(),
            parent_keys: vec![pitem.to_string()],
            child_keys: vec![citem.to_string()],
            label: None,
        })?;
        next_id += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Primitive;

    const DICT: &str = r#"
data_test_dict.dic
    _dictionary.title           test_dict.dic
    _dictionary.version         1.0

    loop_
    _item_type_list.code
    _item_type_list.primitive_code
    _item_type_list.construct
               code      char   '[A-Za-z0-9_.-]*'
               ucode     uchar  '[A-Za-z0-9_.-]*'
               text      char   .
               int       numb   '[+-]?[0-9]+'

save_cat_1
    _category.description     'A simple test category'
    _category.id              cat_1
    _category.mandatory_code  no
    _category_key.name        '_cat_1.id'
    save_

save__cat_1.id
    _item.name                '_cat_1.id'
    _item.category_id         cat_1
    _item.mandatory_code      yes
    _item_linked.child_name   '_cat_2.parent_id'
    _item_linked.parent_name  '_cat_1.id'
    _item_type.code           code
    save_

save__cat_1.c
    _item.name                '_cat_1.c'
    _item.category_id         cat_1
    _item.mandatory_code      no
    _item_type.code           ucode
    save_

save_cat_2
    _category.description     'A second simple test category'
    _category.id              cat_2
    _category.mandatory_code  no
    _category_key.name        '_cat_2.id'
    save_

save__cat_2.id
    _item.name                '_cat_2.id'
    _item.category_id         cat_2
    _item.mandatory_code      yes
    _item_type.code           int
    save_

save__cat_2.parent_id
    _item.name                '_cat_2.parent_id'
    _item.category_id         cat_2
    _item.mandatory_code      yes
    save_

save__cat_2.state
    _item.name                '_cat_2.state'
    _item.category_id         cat_2
    _item.mandatory_code      no
    _item_type.code           code
    loop_
    _item_enumeration.value
    open
    closed
    save_
"#;

    #[test]
    fn types_and_metadata() {
        let v = parse_dictionary_bytes("test", DICT.as_bytes()).unwrap();
        assert_eq!(v.name(), "test_dict.dic");
        assert_eq!(v.version(), "1.0");
        let int = v.type_validator("int").unwrap();
        assert_eq!(int.primitive(), Primitive::Numb);
        assert!(int.matches("-42"));
        assert!(!int.matches("x"));
        assert_eq!(v.type_validator("ucode").unwrap().primitive(), Primitive::UChar);
    }

    #[test]
    fn categories_and_keys() {
        let v = parse_dictionary_bytes("test", DICT.as_bytes()).unwrap();
        let c1 = v.category("cat_1").unwrap();
        assert_eq!(c1.keys, vec!["id"]);
        assert!(c1.item("id").unwrap().mandatory);
        assert!(!c1.item("c").unwrap().mandatory);
        assert!(c1.item("nope").is_none());
    }

    #[test]
    fn enumerations_attach_to_items() {
        let v = parse_dictionary_bytes("test", DICT.as_bytes()).unwrap();
        let state = v.category("cat_2").unwrap().item("state").unwrap();
        assert_eq!(state.enum_values, vec!["open", "closed"]);
        assert!(state.validate("cat_2", "open").is_ok());
        assert!(state.validate("cat_2", "ajar").is_err());
    }

    #[test]
    fn pairwise_links_and_type_inheritance() {
        let v = parse_dictionary_bytes("test", DICT.as_bytes()).unwrap();
        let links = v.links_for_parent("cat_1");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].child_category, "cat_2");
        assert_eq!(links[0].parent_keys, vec!["id"]);
        assert_eq!(links[0].child_keys, vec!["parent_id"]);
        // parent_id had no type of its own; it inherits 'code' from cat_1.id
        let pid = v.category("cat_2").unwrap().item("parent_id").unwrap();
        assert_eq!(pid.item_type.as_ref().unwrap().name(), "code");
    }

    const GROUPED: &str = r#"
data_grouped.dic
    _dictionary.title   grouped.dic
    _dictionary.version 0.9

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

loop_
_pdbx_item_linked_group_list.child_category_id
_pdbx_item_linked_group_list.link_group_id
_pdbx_item_linked_group_list.child_name
_pdbx_item_linked_group_list.parent_name
_pdbx_item_linked_group_list.parent_category_id
child 1 '_child.parent_id'  '_parent.id' parent
child 2 '_child.parent_id2' '_parent.id' parent

loop_
_pdbx_item_linked_group.category_id
_pdbx_item_linked_group.link_group_id
_pdbx_item_linked_group.label
child 1 child:parent:1
child 2 child:parent:2
"#;

    #[test]
    fn linked_groups_are_independent_join_paths() {
        let v = parse_dictionary_bytes("grouped", GROUPED.as_bytes()).unwrap();
        let links = v.links_for_parent("parent");
        assert_eq!(links.len(), 2);
        assert_ne!(links[0].link_group_id, links[1].link_group_id);
        assert_eq!(links[0].label.as_deref(), Some("child:parent:1"));
        assert_eq!(links[1].label.as_deref(), Some("child:parent:2"));
        // both child keys inherited the parent's int type
        for key in ["parent_id", "parent_id2"] {
            let iv = v.category("child").unwrap().item(key).unwrap();
            assert_eq!(iv.item_type.as_ref().unwrap().name(), "int");
        }
    }

    #[test]
    fn missing_data_block_is_an_error() {
        assert!(parse_dictionary_bytes("empty", b"# nothing here\n").is_err());
    }

    #[test]
    fn strict_validator_rejects_unknown_tags_on_attach() {
        use crate::store::file::File;
        use std::sync::Arc;

        let data = b"data_t\n_cat_1.id aap\n_cat_1.bogus 5\n";

        let lenient = parse_dictionary_bytes("test", DICT.as_bytes()).unwrap();
        let mut f = File::parse(data).unwrap();
        assert!(f.set_validator(Some(Arc::new(lenient))).is_ok());

        let mut strict = parse_dictionary_bytes("test", DICT.as_bytes()).unwrap();
        strict.set_strict(true);
        let mut f = File::parse(data).unwrap();
        assert!(f.set_validator(Some(Arc::new(strict))).is_err());
    }
}
