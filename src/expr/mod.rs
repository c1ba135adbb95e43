//! Textual canonicalization of solver terms.
//!
//! Comparing two symbolic values through the solver is far too slow for a
//! per-instruction hook. Instead both renderings are rewritten into a
//! canonical string and compared as text. Every rewrite rule strictly
//! shortens its input, so iterating the rules reaches a fixed point and
//! normalizing twice is the same as normalizing once.

pub mod brackets;
pub mod calldata;
pub mod structure;

pub use self::{brackets::*, calldata::*, structure::*};

use crate::value::Deadline;
use log::warn;

pub const MAX_ROUNDS: usize = 64;

/// Canonical form of `raw`. Never fails, malformed input is rewritten as
/// far as its brackets allow.
pub fn normalize(raw: &str) -> String {
    normalize_within(raw, Deadline::never()).unwrap_or_default()
}

/// Like [`normalize`] but gives up with `None` once `deadline` expires.
pub fn normalize_within(raw: &str, deadline: Deadline) -> Option<String> {
    let mut current: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    for _ in 0..MAX_ROUNDS {
        if deadline.expired() {
            return None;
        }

        let next = round(&current);

        if next == current {
            return Some(current);
        }

        current = next;
    }

    warn!(
        "normalization did not converge within {} rounds: {}",
        MAX_ROUNDS, raw
    );

    Some(current)
}

fn round(text: &str) -> String {
    let text = collapse_guards(text);
    let text = collapse_wrappers(&text);
    let text = merge_calldata_ranges(&text);

    strip_leading_zero(&text).to_string()
}
