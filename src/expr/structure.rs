//! Structural wrappers of the solver's term language.

use super::brackets::{matching_close, rewrite_calls, split_top_level};
use crate::value::is_literal;

/// Unwrap map updates, zero extensions by zero bits and byte concatenation.
///
/// `Select(Store(b,k,v),k)` is `v`, `Select(Store(b,k,v),q)` is `Select(b,q)`
/// for `q != k`, and a bare `Store(b,k,v)` stands for the written `v` (or
/// the key `k` if `v` is a plain literal). `ZeroExt(0,X)` is `X` and
/// `Concat(a,b,..)` is `a,b,..`.
pub fn collapse_wrappers(text: &str) -> String {
    let text = rewrite_calls(text, "Select", &mut |args| match args {
        [array, key] => select_through_stores(array, key),
        _ => None,
    });

    let text = rewrite_calls(&text, "Store", &mut |args| match args {
        [_, key, value] if is_literal(value) => Some(key.to_string()),
        [_, _, value] => Some(value.to_string()),
        _ => None,
    });

    let text = rewrite_calls(&text, "ZeroExt", &mut |args| match args {
        [bits, value] if *bits == "0" => Some(value.to_string()),
        _ => None,
    });

    rewrite_calls(&text, "Concat", &mut |args| Some(args.join(",")))
}

fn select_through_stores(array: &str, key: &str) -> Option<String> {
    let mut current = array;

    while let Some([base, stored_key, value]) = store_args(current) {
        if stored_key == key {
            return Some(value.to_string());
        }
        current = base;
    }

    if current.len() < array.len() {
        Some(format!("Select({},{})", current, key))
    } else {
        None
    }
}

fn store_args(text: &str) -> Option<[&str; 3]> {
    let inner = text.strip_prefix("Store")?;
    let open = "Store".len();

    if !inner.starts_with('(') || matching_close(text, open) != Some(text.len() - 1) {
        return None;
    }

    match split_top_level(&text[open + 1..text.len() - 1])[..] {
        [base, key, value] => Some([base, key, value]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_of_matching_store_is_the_stored_value() {
        assert_eq!(collapse_wrappers("Select(Store(base,k,v),k)"), "v");
        assert_eq!(
            collapse_wrappers("Select(Store(Store(base,k,v),j,w),k)"),
            "v",
            "walks past stores to other keys"
        );
    }

    #[test]
    fn select_of_foreign_store_reads_the_base() {
        assert_eq!(
            collapse_wrappers("Select(Store(base,k,v),q)"),
            "Select(base,q)"
        );
        assert_eq!(collapse_wrappers("Select(base,q)"), "Select(base,q)");
    }

    #[test]
    fn bare_store_reduces_to_value_or_key() {
        assert_eq!(collapse_wrappers("Store(base,k,v)"), "v");
        assert_eq!(collapse_wrappers("Store(base,k,1)"), "k");
        assert_eq!(
            collapse_wrappers("Store(base,k)"),
            "Store(base,k)",
            "wrong arity is kept"
        );
    }

    #[test]
    fn zero_extension_and_concat_are_unwrapped() {
        assert_eq!(collapse_wrappers("ZeroExt(0,caller)"), "caller");
        assert_eq!(collapse_wrappers("ZeroExt(96,caller)"), "ZeroExt(96,caller)");
        assert_eq!(
            collapse_wrappers("Concat(0,Concat(a,b))"),
            "0,a,b",
            "nested concatenations flatten"
        );
    }

    #[test]
    fn unbalanced_store_is_left_alone() {
        let text = "Select(Store(base,k,v,q)";

        assert_eq!(collapse_wrappers(text), text);
    }
}
