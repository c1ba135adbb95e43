//! Balanced-bracket scanning over rendered solver terms.
//!
//! Everything here tolerates malformed input: an opening bracket without a
//! partner is left as plain text.

/// Index of the bracket closing the one at `open`, honouring nested `()` and
/// `[]`. `None` if `open` is not an opening bracket or the text is unbalanced.
pub fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();

    if !matches!(bytes.get(open), Some(b'(') | Some(b'[')) {
        return None;
    }

    let mut stack: Vec<u8> = Vec::new();

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' | b'[' => stack.push(b),
            b')' | b']' => {
                let expected = if b == b')' { b'(' } else { b'[' };
                if stack.pop() != Some(expected) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Split at every `,` that is not nested inside brackets.
pub fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i64;
    let mut last = 0;

    for (i, b) in text.bytes().enumerate() {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&text[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&text[last..]);
    parts
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Rewrite every call `name(args...)` bottom-up.
///
/// Arguments are rewritten first, then `f` sees them split at top level and
/// may return a replacement for the whole call. Calls with unbalanced
/// brackets are copied verbatim.
pub fn rewrite_calls<F>(text: &str, name: &str, f: &mut F) -> String
where
    F: FnMut(&[&str]) -> Option<String>,
{
    let pattern = format!("{}(", name);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(&pattern) {
        let start = cursor + found;
        let bounded = start == 0 || !is_ident_byte(text.as_bytes()[start - 1]);
        let open = start + name.len();

        match matching_close(text, open) {
            Some(close) if bounded => {
                let inner = rewrite_calls(&text[open + 1..close], name, f);
                let args = split_top_level(&inner);

                out.push_str(&text[cursor..start]);
                match f(&args) {
                    Some(replacement) => out.push_str(&replacement),
                    None => {
                        out.push_str(&pattern);
                        out.push_str(&inner);
                        out.push(')');
                    }
                }
                cursor = close + 1;
            }
            _ => {
                out.push_str(&text[cursor..open]);
                cursor = open;
            }
        }
    }

    out.push_str(&text[cursor..]);
    out
}
