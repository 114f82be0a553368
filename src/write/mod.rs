//! CIF serialization.
//!
//! Every category with a single row is written as `_cat.item value` pairs,
//! everything else as a `loop_`. Values pick the weakest quoting that
//! round-trips: bare, single quotes, double quotes, or a semicolon text
//! field. A missing cell emits `?`; the stored inapplicable marker emits a
//! bare `.`; an empty string fails the bare rule and comes out as `''`.

use std::io::Write;

use crate::error::Result;
use crate::store::category::Category;
use crate::store::datablock::DataBlock;
use crate::store::file::File;
use crate::store::row::RowRef;
use crate::text::{iequals, is_non_blank, split_tag_name};
use crate::validate::Validator;

pub(crate) fn write_file(f: &File, mut w: impl Write) -> Result<()> {
    for block in f.blocks() {
        write_datablock(block, f.validator().map(|v| &**v), &mut w)?;
    }
    Ok(())
}

pub(crate) fn write_file_with_order(
    f: &File,
    mut w: impl Write,
    tag_order: &[String],
) -> Result<()> {
    for block in f.blocks() {
        write_datablock_with_order(block, tag_order, &mut w)?;
    }
    Ok(())
}

/// Default emission order: `entry` first, then `audit_conform`
/// (synthesized from the validator's name and version when the dictionary
/// declares the category and the block does not carry it), then the
/// remaining categories in store order.
fn write_datablock(db: &DataBlock, validator: Option<&Validator>, w: &mut impl Write) -> Result<()> {
    writeln!(w, "data_{}\n# ", db.name())?;

    if let Some(cat) = db.get("entry") {
        write_category(cat, w)?;
    }

    match db.get("audit_conform").filter(|c| !c.is_empty()) {
        Some(cat) => write_category(cat, w)?,
        None => {
            if let Some(v) = validator.filter(|v| v.category("audit_conform").is_some()) {
                let mut synthesized = Category::new("audit_conform");
                synthesized
                    .emplace(&[("dict_name", v.name()), ("dict_version", v.version())])?;
                write_category(&synthesized, w)?;
            }
        }
    }

    for cat in db.categories() {
        if iequals(cat.name(), "entry") || iequals(cat.name(), "audit_conform") {
            continue;
        }
        write_category(cat, w)?;
    }
    Ok(())
}

/// Ordered emission: categories follow the first appearance of their
/// category in the tag-order hint; stragglers keep store order.
fn write_datablock_with_order(
    db: &DataBlock,
    tag_order: &[String],
    w: &mut impl Write,
) -> Result<()> {
    writeln!(w, "data_{}\n# ", db.name())?;

    let mut cat_order: Vec<&str> = Vec::new();
    for tag in tag_order {
        let (cat, _) = split_tag_name(tag);
        if !cat_order.iter().any(|c| iequals(c, cat)) {
            cat_order.push(cat);
        }
    }

    for name in &cat_order {
        if let Some(cat) = db.get(name) {
            write_category(cat, w)?;
        }
    }
    for cat in db.categories() {
        if cat_order.iter().any(|c| iequals(c, cat.name())) {
            continue;
        }
        write_category(cat, w)?;
    }
    Ok(())
}

fn write_category(cat: &Category, w: &mut impl Write) -> Result<()> {
    if cat.is_empty() {
        return Ok(());
    }
    if cat.len() == 1 {
        write_pairs(cat, w)?;
    } else {
        write_loop(cat, w)?;
    }
    writeln!(w, "#")?;
    Ok(())
}

fn write_pairs(cat: &Category, w: &mut impl Write) -> Result<()> {
    let row = match cat.front() {
        Some(r) => r,
        None => return Ok(()),
    };
    let tags: Vec<(String, &str)> = cat
        .column_names()
        .filter_map(|c| row.text(c).map(|v| (format!("_{}.{c}", cat.name()), v)))
        .collect();
    let width = tags.iter().map(|(t, _)| t.len()).max().unwrap_or(0);
    for (tag, value) in tags {
        match style_of(value) {
            Style::Text => {
                writeln!(w, "{tag}")?;
                write_text_field(value, w)?;
            }
            style => {
                write!(w, "{tag}{:1$}", "", width - tag.len() + 1)?;
                write_inline(value, style, w)?;
                writeln!(w)?;
            }
        }
    }
    Ok(())
}

fn write_loop(cat: &Category, w: &mut impl Write) -> Result<()> {
    writeln!(w, "loop_")?;
    for col in cat.column_names() {
        writeln!(w, "_{}.{col}", cat.name())?;
    }
    for row in cat.rows() {
        write_loop_row(cat, row, w)?;
    }
    Ok(())
}

fn write_loop_row(cat: &Category, row: RowRef<'_>, w: &mut impl Write) -> Result<()> {
    let mut at_line_start = true;
    for col in cat.column_names() {
        let value = row.text(col);
        match value {
            None => {
                if !at_line_start {
                    write!(w, " ")?;
                }
                write!(w, "?")?;
                at_line_start = false;
            }
            Some(v) => match style_of(v) {
                Style::Text => {
                    if !at_line_start {
                        writeln!(w)?;
                    }
                    write_text_field(v, w)?;
                    at_line_start = true;
                }
                style => {
                    if !at_line_start {
                        write!(w, " ")?;
                    }
                    write_inline(v, style, w)?;
                    at_line_start = false;
                }
            },
        }
    }
    if !at_line_start {
        writeln!(w)?;
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Style {
    Bare,
    Single,
    Double,
    Text,
}

fn style_of(value: &str) -> Style {
    if can_write_bare(value) {
        Style::Bare
    } else if !value.contains('\n') && !value.contains('\'') {
        Style::Single
    } else if !value.contains('\n') && !value.contains('"') {
        Style::Double
    } else {
        Style::Text
    }
}

/// The CIF bare-value rule: printable and blank-free, no leading quote or
/// reserved lead-in character, no reserved-word shapes. The inapplicable
/// marker `.` is deliberately bare so it round-trips as itself.
fn can_write_bare(value: &str) -> bool {
    if value.is_empty() || value == "?" {
        return false;
    }
    if value == "." {
        return true;
    }
    if !value.bytes().all(is_non_blank) {
        return false;
    }
    if matches!(
        value.as_bytes()[0],
        b'_' | b'\'' | b'"' | b'#' | b'$' | b'[' | b']' | b';'
    ) {
        return false;
    }
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("data_") || lower.starts_with("save_") {
        return false;
    }
    if lower.contains("loop_") || lower.contains("stop_") || lower.contains("global_") {
        return false;
    }
    true
}

fn write_inline(value: &str, style: Style, w: &mut impl Write) -> Result<()> {
    match style {
        Style::Bare => write!(w, "{value}")?,
        Style::Single => write!(w, "'{value}'")?,
        Style::Double => write!(w, "\"{value}\"")?,
        Style::Text => unreachable!("text fields are written standalone"),
    }
    Ok(())
}

fn write_text_field(value: &str, w: &mut impl Write) -> Result<()> {
    if value.contains("\n;") {
        log::warn!("text field content contains a line starting with ';'");
    }
    writeln!(w, ";{value}")?;
    writeln!(w, ";")?;
    Ok(())
}
