//! Fast data-block location.
//!
//! Dictionaries bundle many schemas in one file; these scanners skip
//! through the raw bytes, respecting comments, quoted strings and text
//! fields, to find `data_` headers without tokenizing the content. The
//! index maps block names to the byte offset just past the header, so a
//! later targeted parse is O(1) seek plus one block.

use std::collections::HashMap;

use crate::text::{is_non_blank, is_white};

#[derive(Clone, Copy, PartialEq)]
enum State {
    Start,
    Comment,
    Quoted(u8),
    QuotedClose(u8),
    TextField,
}

/// One pass over the stream, returning `name → byte offset` for every data
/// block header found.
pub fn index_datablocks(src: &[u8]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    scan(src, |name, offset| {
        index.entry(name.to_string()).or_insert(offset);
        true
    });
    index
}

/// Locate `data_<name>` (case-insensitive on the `data_` keyword, exact on
/// the name) and return the byte offset just past the header, skipping
/// string and comment contexts on the way.
pub fn scan_datablock(src: &[u8], name: &str) -> Option<usize> {
    let mut found = None;
    scan(src, |candidate, offset| {
        if candidate == name {
            found = Some(offset);
            false
        } else {
            true
        }
    });
    found
}

/// Drive `visit(name, offset_past_header)` for each data block header;
/// the callback returns whether to keep scanning.
fn scan(src: &[u8], mut visit: impl FnMut(&str, usize) -> bool) {
    let mut state = State::Start;
    let mut bol = true;
    let mut pos = 0;

    while pos < src.len() {
        let b = src[pos];
        match state {
            State::Start => match b {
                b'#' => state = State::Comment,
                b'\'' | b'"' => state = State::Quoted(b),
                b';' if bol => state = State::TextField,
                b'd' | b'D' => {
                    if let Some((name_end, name)) = match_header(&src[pos..]) {
                        let at_token_start = pos == 0 || is_white(src[pos - 1]);
                        if at_token_start {
                            let end = pos + name_end;
                            if !visit(&name, end) {
                                return;
                            }
                            bol = false;
                            pos = end;
                            continue;
                        }
                    }
                    // an ordinary value starting with d; skip the token
                    while pos < src.len() && is_non_blank(src[pos]) {
                        pos += 1;
                    }
                    continue;
                }
                _ => {}
            },
            State::Comment => {
                if b == b'\n' {
                    state = State::Start;
                }
            }
            State::Quoted(q) => {
                if b == q {
                    state = State::QuotedClose(q);
                }
            }
            State::QuotedClose(q) => {
                state = if is_white(b) {
                    State::Start
                } else if b == q {
                    State::QuotedClose(q)
                } else {
                    State::Quoted(q)
                };
            }
            State::TextField => {
                if b == b';' && bol {
                    state = State::Start;
                }
            }
        }
        bol = b == b'\n';
        pos += 1;
    }
}

/// Try to read `data_<name>` at the start of `src`; returns the length of
/// the whole header and the name.
fn match_header(src: &[u8]) -> Option<(usize, String)> {
    const KEYWORD: &[u8] = b"data_";
    if src.len() < KEYWORD.len() {
        return None;
    }
    if !src[..KEYWORD.len()].eq_ignore_ascii_case(KEYWORD) {
        return None;
    }
    let mut end = KEYWORD.len();
    while end < src.len() && is_non_blank(src[end]) {
        end += 1;
    }
    if end == KEYWORD.len() {
        return None;
    }
    let name = String::from_utf8_lossy(&src[KEYWORD.len()..end]).into_owned();
    Some((end, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "\
# comment with data_NOPE inside
data_first
_a.x 'quoted data_NOT a block'
_a.y
;text field
data_ALSO_NOT
;
data_second
_b.z 1
";

    #[test]
    fn index_finds_real_headers_only() {
        let index = index_datablocks(SRC.as_bytes());
        assert_eq!(index.len(), 2);
        assert!(index.contains_key("first"));
        assert!(index.contains_key("second"));
    }

    #[test]
    fn offsets_point_past_the_header() {
        let index = index_datablocks(SRC.as_bytes());
        let off = index["second"];
        assert_eq!(&SRC[off - "data_second".len()..off], "data_second");
    }

    #[test]
    fn scan_single_block() {
        assert!(scan_datablock(SRC.as_bytes(), "second").is_some());
        assert!(scan_datablock(SRC.as_bytes(), "NOPE").is_none());
        assert!(scan_datablock(SRC.as_bytes(), "ALSO_NOT").is_none());
    }
}
