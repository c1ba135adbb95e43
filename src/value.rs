use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, Instant},
};

/// A solver-level value as handed over by the host engine.
///
/// The host renders its symbolic term into `expr` (e.g. `4_calldata[4]` or
/// `Concat(0, caller)`) and reports the bit width. The core never interprets
/// the term beyond text, which is what keeps comparisons off the solver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    /// bit width, 0 if the host could not tell
    #[serde(default)]
    pub size: u32,
    pub expr: String,
}

impl Value {
    pub fn symbolic<S: Into<String>>(expr: S, size: u32) -> Self {
        Self {
            size,
            expr: expr.into(),
        }
    }

    pub fn word<S: Into<String>>(expr: S) -> Self {
        Self::symbolic(expr, 256)
    }

    pub fn concrete(value: u128, size: u32) -> Self {
        Self {
            size,
            expr: value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expr.trim().is_empty()
    }

    /// Concrete value if the rendering is a plain decimal or `0x` literal
    /// that fits into 128 bits.
    pub fn as_concrete(&self) -> Option<u128> {
        parse_literal(self.expr.trim())
    }

    /// True for plain literals, including ones too wide for `as_concrete`.
    pub fn is_literal(&self) -> bool {
        is_literal(self.expr.trim())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.size == 0 {
            write!(f, "{}", self.expr)
        } else {
            write!(f, "{}:{}", self.expr, self.size)
        }
    }
}

pub fn is_literal(text: &str) -> bool {
    if let Some(hex) = text.strip_prefix("0x") {
        !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else {
        !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
    }
}

fn parse_literal(text: &str) -> Option<u128> {
    if let Some(hex) = text.strip_prefix("0x") {
        u128::from_str_radix(hex, 16).ok()
    } else if is_literal(text) {
        text.parse::<u128>().ok()
    } else {
        None
    }
}

/// Cooperative time budget for potentially slow work on the hot path.
///
/// Checked between rewriting rounds instead of preempting anything, so a
/// single round may overshoot the budget.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    end: Option<Instant>,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            end: Instant::now().checked_add(budget),
        }
    }

    pub fn never() -> Self {
        Self { end: None }
    }

    pub fn expired(&self) -> bool {
        match self.end {
            Some(end) => Instant::now() >= end,
            None => false,
        }
    }
}
