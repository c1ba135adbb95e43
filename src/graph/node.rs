use super::{GraphOptions, Opcode};
use crate::{
    expr::normalize_within,
    value::{Deadline, Value},
};
use log::warn;
use serde::{Serialize, Serializer};
use std::{any::Any, cell::OnceCell, rc::Rc};
use strum::{Display, EnumString, EnumVariantNames, IntoStaticStr};

/// Index of a node in its session's arena. Equal to the node's `uid`.
pub type NodeId = usize;

/// Synthetic transaction identifier distinguishing repeated calls of a function.
pub type TxId = u64;

/// Opaque execution state of the host engine at the traced instruction.
pub type StateHandle = Rc<dyn Any>;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumVariantNames, IntoStaticStr,
)]
#[strum(serialize_all = "kebab_case")]
pub enum NodeType {
    EnvironmentContext,
    StateVariable,
    DataFlow,
    ControlFlow,
    LogInformation,
    EntryExit,
    Deleted,
    Unknown,
}

impl Serialize for NodeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let name: &'static str = self.into();
        serializer.serialize_str(name)
    }
}

/// Decoded call-data of an external call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallInfo {
    /// first four bytes of the call data, hex without prefix
    pub selector: Option<String>,
    /// following 32-byte words, hex without prefix
    pub args: Vec<String>,
    /// attached value transfer, `None` for delegate calls
    pub value: Option<Value>,
}

impl CallInfo {
    pub fn decode(call_data: &[u8], value: Option<Value>) -> Self {
        let (selector, rest) = if call_data.len() >= 4 {
            (Some(hex::encode(&call_data[..4])), &call_data[4..])
        } else {
            (None, call_data)
        };

        Self {
            selector,
            args: rest.chunks(32).map(hex::encode).collect(),
            value,
        }
    }
}

/// Payload of a node, one variant per node category.
///
/// Storage accesses always carry two slots (slot, value). Control-flow nodes
/// carry exactly one: the jump destination, the call target or nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Entry,
    Exit,
    Environment,
    StateVariable,
    DataFlow,
    Log { topic_hash: String },
    Call(CallInfo),
    ControlFlow { target: Option<u128> },
    Deleted,
    Unknown,
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Entry | NodeKind::Exit => NodeType::EntryExit,
            NodeKind::Environment => NodeType::EnvironmentContext,
            NodeKind::StateVariable => NodeType::StateVariable,
            NodeKind::DataFlow => NodeType::DataFlow,
            NodeKind::Log { .. } => NodeType::LogInformation,
            NodeKind::Call(_) | NodeKind::ControlFlow { .. } => NodeType::ControlFlow,
            NodeKind::Deleted => NodeType::Deleted,
            NodeKind::Unknown => NodeType::Unknown,
        }
    }
}

/// A solver value with its lazily computed canonical rendering.
#[derive(Clone, Debug, Default)]
pub struct Term {
    pub value: Value,
    normalized: OnceCell<String>,
}

impl Term {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            normalized: OnceCell::new(),
        }
    }

    /// Canonical rendering, empty if it could not be computed in time.
    pub fn normalized(&self, options: &GraphOptions) -> &str {
        self.normalized
            .get_or_init(|| canonical(&self.value, options))
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized.get().is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Slot {
    pub term: Term,
    pub preds: Vec<NodeId>,
}

impl Slot {
    pub fn new(value: Value) -> Self {
        Self {
            term: Term::new(value),
            preds: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &Value {
        &self.term.value
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub uid: NodeId,
    pub function: String,
    /// `None` for the entry and exit sentinels
    pub tx_id: Option<TxId>,
    /// `None` for the entry and exit sentinels
    pub opcode: Option<Opcode>,
    pub address: u64,
    pub kind: NodeKind,
    pub slots: Vec<Slot>,
    pub successors: Vec<NodeId>,
    /// leading node of the enclosing basic block
    pub leader: Option<NodeId>,
    pub awaiting_post: bool,
    /// result of the instruction, known after its post hook
    pub output: Option<Term>,
    pub state: Option<StateHandle>,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn is(&self, opcode: Opcode) -> bool {
        self.opcode == Some(opcode)
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == NodeKind::Deleted
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.kind, NodeKind::Entry | NodeKind::Exit)
    }

    pub fn is_entry(&self) -> bool {
        self.kind == NodeKind::Entry
    }

    pub fn jump_target(&self) -> Option<u128> {
        match self.kind {
            NodeKind::ControlFlow { target } => target,
            _ => None,
        }
    }

    /// All predecessors over all slots, in slot order, without duplicates.
    pub fn predecessors(&self) -> Vec<NodeId> {
        let mut preds = Vec::new();

        for pred in self.slots.iter().flat_map(|s| s.preds.iter()) {
            if !preds.contains(pred) {
                preds.push(*pred);
            }
        }

        preds
    }
}

pub(crate) fn canonical(value: &Value, options: &GraphOptions) -> String {
    if value.expr.len() > options.max_expression_len {
        warn!(
            "expression of {} bytes exceeds rendering limit, treated as unknown",
            value.expr.len()
        );
        return String::new();
    }

    match normalize_within(&value.expr, Deadline::after(options.normalize_timeout)) {
        Some(normalized) => normalized,
        None => {
            warn!("normalization timed out, treated as unknown: {}", value);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_data_splits_into_selector_and_words() {
        let mut data = vec![0xa9, 0x05, 0x9c, 0xbb];
        data.extend_from_slice(&[0_u8; 31]);
        data.push(0x01);

        let info = CallInfo::decode(&data, Some(Value::concrete(0, 256)));

        assert_eq!(info.selector.as_deref(), Some("a9059cbb"));
        assert_eq!(info.args.len(), 1);
        assert!(info.args[0].ends_with("01"));
        assert_eq!(CallInfo::decode(&[0x01], None).selector, None);
    }

    #[test]
    fn terms_normalize_once_and_respect_the_length_limit() {
        let options = GraphOptions {
            max_expression_len: 8,
            ..Default::default()
        };
        let short = Term::new(Value::word("Concat(0,a)"));
        let long = Term::new(Value::word("ZeroExt(0,caller)"));

        assert!(!short.is_normalized());
        assert_eq!(short.normalized(&GraphOptions::default()), "a");
        assert!(short.is_normalized());
        assert_eq!(long.normalized(&options), "", "too long to render");
    }

    #[test]
    fn empty_slots_carry_an_unknown_value() {
        let slot = Slot::empty();

        assert!(slot.preds.is_empty());
        assert!(slot.value().is_empty());
        assert_eq!(slot.value().size, 0);
        assert_eq!(slot.term.normalized(&GraphOptions::default()), "");
    }

    #[test]
    fn node_types_follow_the_payload() {
        assert_eq!(NodeKind::Entry.node_type(), NodeType::EntryExit);
        assert_eq!(
            NodeKind::Call(CallInfo::default()).node_type(),
            NodeType::ControlFlow
        );
        assert_eq!(NodeType::StateVariable.to_string(), "state-variable");
    }
}
