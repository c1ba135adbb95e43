//! Value equality with an optional solver fallback.
//!
//! Most comparisons are settled on text: raw renderings, concrete numbers and
//! normalized forms. Only two distinct symbolic renderings are handed to an
//! [`EquivalenceOracle`], which a host may back by its constraint solver.

use crate::value::Value;
use log::{trace, warn};
use thiserror::Error;

pub trait EquivalenceOracle {
    fn name() -> &'static str;

    fn check_equivalence(&self, lhs: &Value, rhs: &Value) -> Result<bool, OracleError> {
        trace!("ask {} oracle: {} == {}", Self::name(), lhs, rhs);

        time_trace!("finished equivalence query", {
            self.check_equivalence_impl(lhs, rhs)
        })
    }

    fn check_equivalence_impl(&self, lhs: &Value, rhs: &Value) -> Result<bool, OracleError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("failed to decide equivalence within the given limits")]
    Unknown,

    #[error("could not decide equivalence before timing out")]
    Timeout,

    #[error("oracle backend failed: {0}")]
    Backend(String),
}

/// Oracle that never proves anything beyond textual equality.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextOracle;

impl EquivalenceOracle for TextOracle {
    fn name() -> &'static str {
        "text"
    }

    fn check_equivalence_impl(&self, _lhs: &Value, _rhs: &Value) -> Result<bool, OracleError> {
        Ok(false)
    }
}

/// A value together with its canonical rendering. An empty `normalized`
/// means the rendering is unknown (e.g. normalization timed out).
#[derive(Clone, Copy, Debug)]
pub struct Operand<'a> {
    pub value: &'a Value,
    pub normalized: &'a str,
}

impl<'a> Operand<'a> {
    pub fn new(value: &'a Value, normalized: &'a str) -> Self {
        Self { value, normalized }
    }
}

/// Decide equality without the oracle if possible.
///
/// `None` means both sides are distinct symbolic renderings of known width
/// and only a solver can tell.
pub fn cheap_equality(lhs: Operand, rhs: Operand) -> Option<bool> {
    if lhs.value.is_empty() || rhs.value.is_empty() {
        return Some(false);
    }

    if lhs.value.size != 0 && rhs.value.size != 0 && lhs.value.size != rhs.value.size {
        return Some(false);
    }

    if lhs.value.expr.trim() == rhs.value.expr.trim() {
        return Some(true);
    }

    if let (Some(l), Some(r)) = (lhs.value.as_concrete(), rhs.value.as_concrete()) {
        return Some(l == r);
    }

    if !lhs.normalized.is_empty() && lhs.normalized == rhs.normalized {
        return Some(true);
    }

    if lhs.value.is_literal()
        || rhs.value.is_literal()
        || lhs.normalized.is_empty()
        || rhs.normalized.is_empty()
    {
        return Some(false);
    }

    None
}

/// Equality of two operands, asking `oracle` only when text cannot decide.
/// Oracle failures count as "not equal".
pub fn values_equal<O: EquivalenceOracle>(oracle: &O, lhs: Operand, rhs: Operand) -> bool {
    match cheap_equality(lhs, rhs) {
        Some(decision) => decision,
        None => ask_oracle(oracle, lhs.value, rhs.value),
    }
}

pub(crate) fn ask_oracle<O: EquivalenceOracle>(oracle: &O, lhs: &Value, rhs: &Value) -> bool {
    match oracle.check_equivalence(lhs, rhs) {
        Ok(equal) => equal,
        Err(e) => {
            warn!("{} oracle failed, treating values as distinct: {}", O::name(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingOracle {
        queries: Cell<usize>,
        answer: Option<bool>,
    }

    impl EquivalenceOracle for CountingOracle {
        fn name() -> &'static str {
            "counting"
        }

        fn check_equivalence_impl(&self, _: &Value, _: &Value) -> Result<bool, OracleError> {
            self.queries.set(self.queries.get() + 1);
            self.answer.ok_or(OracleError::Timeout)
        }
    }

    struct Agreeing;

    impl EquivalenceOracle for Agreeing {
        fn name() -> &'static str {
            "agreeing"
        }

        fn check_equivalence_impl(&self, _: &Value, _: &Value) -> Result<bool, OracleError> {
            Ok(true)
        }
    }

    #[test]
    fn sessions_link_through_a_given_oracle() {
        use crate::graph::{GraphOptions, GraphSession, NewNode, Opcode};

        let mut session = GraphSession::with_oracle(GraphOptions::default(), Agreeing);
        let at = |opcode, address, operands: &[&str]| {
            NewNode::new("f", 1, opcode, address).operands(operands.iter().map(|o| Value::word(*o)))
        };

        let add = session.add_node(at(Opcode::Add, 1, &["x", "y"])).unwrap();
        session
            .complete_node("f", Opcode::Add, Value::word("a+b"), None)
            .unwrap();
        let sub = session.add_node(at(Opcode::Sub, 2, &["b+a", "1"])).unwrap();
        session
            .complete_node("f", Opcode::Sub, Value::word("b+a-1"), None)
            .unwrap();

        assert_eq!(session.node(sub).unwrap().slots[0].preds, vec![add]);
    }

    fn operand(value: &Value) -> (Value, String) {
        (value.clone(), crate::expr::normalize(&value.expr))
    }

    #[test]
    fn text_decides_without_oracle() {
        let oracle = CountingOracle::default();
        let (a, na) = operand(&Value::word("Concat(0,caller)"));
        let (b, nb) = operand(&Value::word("caller"));
        let (c, nc) = operand(&Value::symbolic("caller", 160));

        assert!(values_equal(&oracle, Operand::new(&a, &na), Operand::new(&b, &nb)));
        assert!(
            !values_equal(&oracle, Operand::new(&b, &nb), Operand::new(&c, &nc)),
            "widths differ"
        );
        assert!(values_equal(
            &oracle,
            Operand::new(&Value::word("0x10"), "0x10"),
            Operand::new(&Value::word("16"), "16")
        ));
        assert_eq!(oracle.queries.get(), 0);
    }

    #[test]
    fn literals_and_unknown_renderings_never_reach_the_oracle() {
        let oracle = CountingOracle {
            answer: Some(true),
            ..Default::default()
        };
        let symbolic = Value::word("caller");

        assert!(!values_equal(
            &oracle,
            Operand::new(&symbolic, "caller"),
            Operand::new(&Value::word("42"), "42")
        ));
        assert!(!values_equal(
            &oracle,
            Operand::new(&symbolic, "caller"),
            Operand::new(&Value::word("origin"), "")
        ));
        assert_eq!(oracle.queries.get(), 0);
    }

    #[test]
    fn distinct_symbolic_terms_ask_the_oracle() {
        let yes = CountingOracle {
            answer: Some(true),
            ..Default::default()
        };
        let lhs = Value::word("a+b");
        let rhs = Value::word("b+a");

        assert!(values_equal(
            &yes,
            Operand::new(&lhs, "a+b"),
            Operand::new(&rhs, "b+a")
        ));
        assert_eq!(yes.queries.get(), 1);
    }

    #[test]
    fn oracle_failure_means_distinct() {
        let failing = CountingOracle::default();
        let lhs = Value::word("a+b");
        let rhs = Value::word("b+a");

        assert!(!values_equal(
            &failing,
            Operand::new(&lhs, "a+b"),
            Operand::new(&rhs, "b+a")
        ));
        assert_eq!(failing.queries.get(), 1);
    }

    #[test]
    fn empty_values_are_never_equal() {
        let empty = Value::word("");

        assert_eq!(
            cheap_equality(Operand::new(&empty, ""), Operand::new(&empty, "")),
            Some(false)
        );
        assert!(!TextOracle
            .check_equivalence(&Value::word("a"), &Value::word("b"))
            .unwrap());
    }
}
