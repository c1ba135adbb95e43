//! Calldata decoding idioms.
//!
//! The engine renders every argument access as a bounds-checked read of
//! single calldata bytes. Both the bounds check and the per-byte split are
//! noise for dataflow comparison and get folded here.

use super::brackets::{matching_close, rewrite_calls};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SIZE_GUARD: Regex = Regex::new(r"^[0-9A-Za-z_]*calldatasize<=.+$").unwrap();
    static ref OFFSET_SUFFIX: Regex = Regex::new(r"^(.+)\+([0-9]+)$").unwrap();
    static ref OFFSET_PREFIX: Regex = Regex::new(r"^([0-9]+)\+(.+)$").unwrap();
}

const READ_MARKER: &str = "_calldata[";

/// `Or(X==0,size<=N)`, `Or(size<=N,X==0)` and `If(size<=N,0,X)` become `X`.
///
/// The bound may be symbolic, which covers dynamic array elements whose
/// offset is itself read from calldata.
pub fn collapse_guards(text: &str) -> String {
    let text = rewrite_calls(text, "Or", &mut |args| match args {
        [value, guard] | [guard, value] if SIZE_GUARD.is_match(guard) => {
            value.strip_suffix("==0").map(String::from)
        }
        _ => None,
    });

    rewrite_calls(&text, "If", &mut |args| match args {
        [guard, zero, value] if *zero == "0" && SIZE_GUARD.is_match(guard) => {
            Some(value.to_string())
        }
        _ => None,
    })
}

/// Merge runs of adjacent single-byte reads `p_calldata[k],p_calldata[k+1],..`
/// into one range token `p_calldata[k:m]`. Works for symbolic base offsets
/// (`p_calldata[e+4],p_calldata[e+5]` becomes `p_calldata[e+4:e+5]`).
pub fn merge_calldata_ranges(text: &str) -> String {
    let reads = scan_reads(text);

    if reads.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut i = 0;

    while i < reads.len() {
        let mut j = i;
        while j + 1 < reads.len() && reads[j].continued_by(&reads[j + 1], text) {
            j += 1;
        }

        let first = &reads[i];
        let last = &reads[j];

        out.push_str(&text[cursor..first.start]);
        if j > i {
            out.push_str(&format!(
                "{}{}{}:{}]",
                first.prefix,
                READ_MARKER,
                render_offset(&first.base, first.offset),
                render_offset(&last.base, last.offset)
            ));
        } else {
            out.push_str(&format!("{}{}{}]", first.prefix, READ_MARKER, first.index));
        }

        cursor = last.end;
        i = j + 1;
    }

    out.push_str(&text[cursor..]);
    out
}

/// Drop leading `0,` padding left behind by unwrapped concatenations.
pub fn strip_leading_zero(text: &str) -> &str {
    let mut text = text;
    while let Some(rest) = text.strip_prefix("0,") {
        text = rest;
    }
    text
}

//
// Private Implementation
//

#[derive(Debug)]
struct Read<'a> {
    start: usize,
    end: usize,
    prefix: &'a str,
    index: String,
    base: String,
    offset: u64,
    mergeable: bool,
}

impl<'a> Read<'a> {
    fn continued_by(&self, next: &Read, text: &str) -> bool {
        self.mergeable
            && next.mergeable
            && &text[self.end..next.start] == ","
            && self.prefix == next.prefix
            && self.base == next.base
            && self.offset.checked_add(1) == Some(next.offset)
    }
}

fn scan_reads(text: &str) -> Vec<Read<'_>> {
    let mut reads = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(READ_MARKER) {
        let at = cursor + found;
        let open = at + READ_MARKER.len() - 1;
        let prefix_start = prefix_start(text, at);

        match matching_close(text, open) {
            Some(close) if prefix_start < at && prefix_start >= cursor => {
                let index = merge_calldata_ranges(&text[open + 1..close]);
                let (base, offset, mergeable) = parse_index(&index);

                reads.push(Read {
                    start: prefix_start,
                    end: close + 1,
                    prefix: &text[prefix_start..at],
                    index,
                    base,
                    offset,
                    mergeable,
                });
                cursor = close + 1;
            }
            _ => cursor = open + 1,
        }
    }

    reads
}

fn prefix_start(text: &str, at: usize) -> usize {
    text[..at]
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_alphanumeric())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0)
}

fn parse_index(index: &str) -> (String, u64, bool) {
    if has_top_level_colon(index) {
        return (String::new(), 0, false);
    }

    if let Ok(offset) = index.parse::<u64>() {
        return (String::new(), offset, true);
    }

    if let Some(captures) = OFFSET_SUFFIX.captures(index) {
        if let Ok(offset) = captures[2].parse::<u64>() {
            return (captures[1].to_string(), offset, true);
        }
    }

    if let Some(captures) = OFFSET_PREFIX.captures(index) {
        if let Ok(offset) = captures[1].parse::<u64>() {
            return (captures[2].to_string(), offset, true);
        }
    }

    (index.to_string(), 0, true)
}

fn has_top_level_colon(index: &str) -> bool {
    let mut depth = 0_i64;

    for b in index.bytes() {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b':' if depth == 0 => return true,
            _ => {}
        }
    }

    false
}

fn render_offset(base: &str, offset: u64) -> String {
    if base.is_empty() {
        offset.to_string()
    } else if offset == 0 {
        base.to_string()
    } else {
        format!("{}+{}", base, offset)
    }
}
