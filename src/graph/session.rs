use super::{CallInfo, Node, NodeId, NodeKind, NodeType, Opcode, Profiler, Slot, StateHandle, Term, TxId};
use crate::{
    oracle::{ask_oracle, cheap_equality, EquivalenceOracle, Operand, TextOracle},
    value::Value,
};
use log::{debug, trace, warn};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use thiserror::Error;

pub mod defaults {
    use super::*;

    pub const START_NODE_LIMIT: usize = 2000;
    pub const SCAN_LIMIT: usize = 20_000;
    pub const LOOP_THRESHOLD: usize = 2;
    pub const EAGER_NORMALIZATION: bool = false;
    pub const NORMALIZE_TIMEOUT: Duration = Duration::from_millis(500);
    pub const MAX_EXPRESSION_LEN: usize = 1 << 16;
    /// 0x0901d12ebe1b195e5aa8748e62bd7734ae19b51f
    pub const SELF_ADDRESS: &str = "51421440056055728346017419001665401074216449311";
}

#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// maximum number of dequeues of a start-node search
    pub start_node_limit: usize,
    /// maximum number of nodes visited by any other backward search
    pub scan_limit: usize,
    /// a jump destination seen more often than this along one path is a loop
    pub loop_threshold: usize,
    /// normalize operands when a node is created instead of on first use
    pub eager_normalization: bool,
    pub normalize_timeout: Duration,
    /// longer renderings are not normalized and count as unknown
    pub max_expression_len: usize,
    /// decimal rendering of the analysed contract's own address
    pub self_address: String,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            start_node_limit: defaults::START_NODE_LIMIT,
            scan_limit: defaults::SCAN_LIMIT,
            loop_threshold: defaults::LOOP_THRESHOLD,
            eager_normalization: defaults::EAGER_NORMALIZATION,
            normalize_timeout: defaults::NORMALIZE_TIMEOUT,
            max_expression_len: defaults::MAX_EXPRESSION_LEN,
            self_address: String::from(defaults::SELF_ADDRESS),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(String),

    #[error("no node with id {0}")]
    UnknownNode(NodeId),

    #[error("{opcode} can not be traced as a node of category {category}")]
    UnsupportedCategory { opcode: Opcode, category: NodeType },

    #[error("preimage of hash node {uid} splits into {parts} parts instead of 2")]
    MalformedPreimage { uid: NodeId, parts: usize },

    #[error("no {opcode} node of function {function} awaits its result")]
    NoPendingNode { function: String, opcode: Opcode },

    #[error("search from node {uid} stopped after {limit} steps")]
    SearchExhausted { uid: NodeId, limit: usize },

    #[error("{opcode} node {uid} lacks operand {slot}")]
    MissingOperand {
        uid: NodeId,
        opcode: Opcode,
        slot: usize,
    },
}

/// A node-local problem that was logged and swallowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Anomaly {
    pub uid: NodeId,
    pub error: GraphError,
}

/// Everything the host knows about a traced instruction when it creates a node.
#[derive(Clone, Debug)]
pub struct NewNode {
    pub function: String,
    pub tx_id: TxId,
    pub opcode: Opcode,
    /// program counter of the instruction
    pub address: u64,
    /// `Unknown` lets the opcode decide
    pub category: NodeType,
    pub operands: Vec<Value>,
    /// concrete call data of `CALL`-like instructions
    pub call_data: Option<Vec<u8>>,
    /// data section of `LOG` instructions
    pub log_data: Option<Value>,
    pub state: Option<StateHandle>,
}

impl NewNode {
    pub fn new<S: Into<String>>(function: S, tx_id: TxId, opcode: Opcode, address: u64) -> Self {
        Self {
            function: function.into(),
            tx_id,
            opcode,
            address,
            category: NodeType::Unknown,
            operands: Vec::new(),
            call_data: None,
            log_data: None,
            state: None,
        }
    }

    pub fn operands<I: IntoIterator<Item = Value>>(mut self, operands: I) -> Self {
        self.operands = operands.into_iter().collect();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sentinels {
    pub entry: NodeId,
    pub exit: NodeId,
}

/// The node arena of one analysed contract.
///
/// Nodes are appended in creation order and never removed, so a node's
/// `uid` is its index. Discard the session between contracts.
pub struct GraphSession<O = TextOracle> {
    pub(super) options: GraphOptions,
    pub(super) oracle: O,
    pub(super) nodes: Vec<Node>,
    pub(super) sentinels: BTreeMap<String, Sentinels>,
    pub(super) tx_nodes: HashMap<(String, TxId), Vec<NodeId>>,
    pub(super) block_starts: HashMap<(String, TxId), Vec<NodeId>>,
    pub(super) pending: Vec<NodeId>,
    pub(super) anomalies: Vec<Anomaly>,
    pub(super) profiler: Profiler,
}

//
// Public Interface
//

impl GraphSession<TextOracle> {
    pub fn new(options: GraphOptions) -> Self {
        Self::with_oracle(options, TextOracle)
    }
}

impl Default for GraphSession<TextOracle> {
    fn default() -> Self {
        Self::new(GraphOptions::default())
    }
}

impl<O: EquivalenceOracle> GraphSession<O> {
    pub fn with_oracle(options: GraphOptions, oracle: O) -> Self {
        Self {
            options,
            oracle,
            nodes: Vec::new(),
            sentinels: BTreeMap::new(),
            tx_nodes: HashMap::new(),
            block_starts: HashMap::new(),
            pending: Vec::new(),
            anomalies: Vec::new(),
            profiler: Profiler::new(),
        }
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, uid: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(uid).ok_or(GraphError::UnknownNode(uid))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.sentinels.keys().map(String::as_str)
    }

    pub fn sentinels(&self, function: &str) -> Option<Sentinels> {
        self.sentinels.get(function).copied()
    }

    /// Drop all nodes, keeping options and oracle.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.sentinels.clear();
        self.tx_nodes.clear();
        self.block_starts.clear();
        self.pending.clear();
        self.anomalies.clear();
        self.profiler = Profiler::new();
    }

    /// Create the node for a traced instruction and link it.
    ///
    /// Nodes of post-hooked opcodes are left pending until
    /// [`complete_node`](Self::complete_node) supplies their result. Pending
    /// nodes of the same function and transaction that never got a result
    /// are linked without it first.
    pub fn add_node(&mut self, new: NewNode) -> Result<NodeId, GraphError> {
        let category = match new.category {
            NodeType::Unknown => new.opcode.default_type(),
            NodeType::EntryExit | NodeType::Deleted => {
                return Err(GraphError::UnsupportedCategory {
                    opcode: new.opcode,
                    category: new.category,
                })
            }
            category => category,
        };

        self.flush_pending_of(&new.function, Some(new.tx_id));

        let sentinels = self.ensure_function(&new.function);
        let key = (new.function.clone(), new.tx_id);

        self.block_starts
            .entry(key.clone())
            .or_insert_with(|| vec![sentinels.entry]);

        let uid = self.nodes.len();
        let (kind, slots) = payload(category, &new);
        let missing = missing_operand(uid, &new);

        let leader = if new.opcode == Opcode::Jumpdest {
            uid
        } else {
            self.block_leader(&new.function, new.tx_id, new.address)
        };

        if matches!(new.opcode, Opcode::Jumpdest | Opcode::Jumpi) {
            if let Some(starts) = self.block_starts.get_mut(&key) {
                starts.push(uid);
            }
        }

        let deferred = new.opcode.is_post_hooked() && kind != NodeKind::Unknown && missing.is_none();

        let node = Node {
            uid,
            function: new.function,
            tx_id: Some(new.tx_id),
            opcode: Some(new.opcode),
            address: new.address,
            kind,
            slots,
            successors: vec![sentinels.exit],
            leader: Some(leader),
            awaiting_post: deferred,
            output: None,
            state: new.state,
        };

        trace!(
            "node {}: {} {} at {} of {}#{}",
            uid,
            node.node_type(),
            new.opcode,
            new.address,
            node.function,
            new.tx_id
        );

        if self.options.eager_normalization {
            for slot in node.slots.iter() {
                let _ = slot.term.normalized(&self.options);
            }
        }

        self.nodes.push(node);
        self.nodes[sentinels.exit].slots[0].preds.push(uid);
        self.tx_nodes.entry(key).or_default().push(uid);
        self.profiler.node_created();

        if self.nodes[uid].kind == NodeKind::Unknown {
            self.record(
                uid,
                GraphError::UnsupportedCategory {
                    opcode: new.opcode,
                    category: NodeType::Unknown,
                },
            );
        } else if let Some(error) = missing {
            self.record(uid, error);
        } else if deferred {
            self.pending.push(uid);
        } else {
            self.run_edge_finding(uid);
        }

        Ok(uid)
    }

    /// Fill in the result of the latest pending `opcode` node of `function`
    /// and link it.
    pub fn complete_node(
        &mut self,
        function: &str,
        opcode: Opcode,
        result: Value,
        state: Option<StateHandle>,
    ) -> Result<NodeId, GraphError> {
        let position = self
            .pending
            .iter()
            .rposition(|uid| {
                let node = &self.nodes[*uid];
                node.function == function && node.is(opcode)
            })
            .ok_or_else(|| GraphError::NoPendingNode {
                function: function.to_string(),
                opcode,
            })?;

        let uid = self.pending.remove(position);
        let node = &mut self.nodes[uid];

        if opcode == Opcode::Sload {
            if let Some(value) = node.slots.get_mut(1) {
                if value.value().is_empty() {
                    *value = Slot::new(result.clone());
                }
            }
        }

        let output = Term::new(result);
        if self.options.eager_normalization {
            let _ = output.normalized(&self.options);
        }

        node.output = Some(output);
        node.awaiting_post = false;
        if state.is_some() {
            node.state = state;
        }

        trace!("node {} completed", uid);

        self.run_edge_finding(uid);

        Ok(uid)
    }

    /// Link pending nodes without their results, optionally only those of
    /// `function`.
    pub fn flush_pending(&mut self, function: Option<&str>) {
        let flushed: Vec<NodeId> = self
            .pending
            .iter()
            .copied()
            .filter(|uid| function.map_or(true, |f| self.nodes[*uid].function == f))
            .collect();

        self.finish_without_result(flushed);
    }

    /// Tombstone a node, detaching it from its neighbours.
    pub fn remove_node(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let node = self.node(uid)?;

        if node.is_sentinel() {
            return Err(GraphError::UnsupportedCategory {
                opcode: node.opcode.unwrap_or(Opcode::Invalid),
                category: NodeType::EntryExit,
            });
        }

        if !node.is_deleted() {
            self.tombstone(uid);
        }

        Ok(())
    }
}

//
// Private Implementation
//

impl<O: EquivalenceOracle> GraphSession<O> {
    pub(super) fn ensure_function(&mut self, function: &str) -> Sentinels {
        if let Some(sentinels) = self.sentinels.get(function) {
            return *sentinels;
        }

        let entry = self.nodes.len();
        let exit = entry + 1;

        for (uid, kind) in [(entry, NodeKind::Entry), (exit, NodeKind::Exit)] {
            self.nodes.push(Node {
                uid,
                function: function.to_string(),
                tx_id: None,
                opcode: None,
                address: 0,
                kind,
                slots: vec![Slot::empty()],
                successors: Vec::new(),
                leader: None,
                awaiting_post: false,
                output: None,
                state: None,
            });
        }

        debug!("sentinels of {}: entry {} exit {}", function, entry, exit);

        let sentinels = Sentinels { entry, exit };
        self.sentinels.insert(function.to_string(), sentinels);
        sentinels
    }

    pub(super) fn sentinels_of(&self, uid: NodeId) -> Option<Sentinels> {
        self.sentinels.get(&self.nodes[uid].function).copied()
    }

    /// Make `pred` supply slot `slot` of `uid`, superseding the provisional
    /// exit link of `pred`.
    pub(super) fn link(&mut self, pred: NodeId, uid: NodeId, slot: usize) {
        if pred == uid || self.nodes[uid].slots.len() <= slot {
            return;
        }

        if self.nodes[uid].slots[slot].preds.contains(&pred) {
            return;
        }

        self.nodes[uid].slots[slot].preds.push(pred);

        let exit = self.sentinels_of(uid).map(|s| s.exit);
        let pred_node = &mut self.nodes[pred];

        pred_node.successors.retain(|s| Some(*s) != exit);
        if !pred_node.successors.contains(&uid) {
            pred_node.successors.push(uid);
        }

        if let Some(exit) = exit {
            self.nodes[exit].slots[0].preds.retain(|p| *p != pred);
        }

        self.profiler.edge_created();
        trace!("link {} -> {}[{}]", pred, uid, slot);
    }

    pub(super) fn tombstone(&mut self, uid: NodeId) {
        let exit = self.sentinels_of(uid).map(|s| s.exit);
        let preds = self.nodes[uid].predecessors();

        for pred in preds {
            let pred_node = &mut self.nodes[pred];
            pred_node.successors.retain(|s| *s != uid);

            if pred_node.successors.is_empty() && !pred_node.is_sentinel() {
                if let Some(exit) = exit {
                    pred_node.successors.push(exit);
                    self.nodes[exit].slots[0].preds.push(pred);
                }
            }
        }

        let successors = std::mem::take(&mut self.nodes[uid].successors);
        for succ in successors {
            for slot in self.nodes[succ].slots.iter_mut() {
                slot.preds.retain(|p| *p != uid);
            }
        }

        let node = &mut self.nodes[uid];
        for slot in node.slots.iter_mut() {
            slot.preds.clear();
        }
        node.kind = NodeKind::Deleted;
        node.awaiting_post = false;

        self.pending.retain(|p| *p != uid);
        self.profiler.node_deleted();

        debug!("removed node {}", uid);
    }

    /// Keep only slot `keep` of `uid`.
    pub(super) fn collapse_to_slot(&mut self, uid: NodeId, keep: usize) {
        let slots = &mut self.nodes[uid].slots;

        if keep < slots.len() {
            let kept = slots.swap_remove(keep);
            *slots = vec![kept];
            debug!("collapsed node {} to its operand {}", uid, keep);
        }
    }

    pub(super) fn terms_equal(&self, lhs: &Term, rhs: &Term) -> bool {
        let lhs_op = Operand::new(&lhs.value, lhs.normalized(&self.options));
        let rhs_op = Operand::new(&rhs.value, rhs.normalized(&self.options));

        match cheap_equality(lhs_op, rhs_op) {
            Some(decision) => decision,
            None => {
                self.profiler.oracle_queried();
                ask_oracle(&self.oracle, &lhs.value, &rhs.value)
            }
        }
    }

    pub(super) fn record(&mut self, uid: NodeId, error: GraphError) {
        warn!("node {}: {}", uid, error);
        self.anomalies.push(Anomaly { uid, error });
    }

    fn run_edge_finding(&mut self, uid: NodeId) {
        let opcode = self.nodes[uid].opcode;
        let (result, took) = time!({ self.find_edge(uid) });

        if let Some(opcode) = opcode {
            self.profiler.edge_finding_took(opcode, took);
        }

        if let Err(error) = result {
            self.record(uid, error);
        }
    }

    fn flush_pending_of(&mut self, function: &str, tx_id: Option<TxId>) {
        let stale: Vec<NodeId> = self
            .pending
            .iter()
            .copied()
            .filter(|uid| {
                let node = &self.nodes[*uid];
                node.function == function && (tx_id.is_none() || node.tx_id == tx_id)
            })
            .collect();

        self.finish_without_result(stale);
    }

    fn finish_without_result(&mut self, uids: Vec<NodeId>) {
        for uid in uids {
            debug!("node {} never received its result", uid);

            self.pending.retain(|p| *p != uid);
            self.nodes[uid].awaiting_post = false;
            self.run_edge_finding(uid);
        }
    }
}

fn payload(category: NodeType, new: &NewNode) -> (NodeKind, Vec<Slot>) {
    let operand = |i: usize| {
        new.operands
            .get(i)
            .cloned()
            .map(Slot::new)
            .unwrap_or_else(Slot::empty)
    };

    let per_operand = || {
        if new.operands.is_empty() {
            vec![Slot::empty()]
        } else {
            new.operands.iter().cloned().map(Slot::new).collect()
        }
    };

    let (kind, slots) = match category {
        NodeType::StateVariable => (NodeKind::StateVariable, vec![operand(0), operand(1)]),
        NodeType::EnvironmentContext => (NodeKind::Environment, per_operand()),
        NodeType::DataFlow => (NodeKind::DataFlow, per_operand()),
        NodeType::LogInformation => {
            let topic_hash = new
                .operands
                .first()
                .map(|t| t.expr.clone())
                .unwrap_or_default();

            let mut slots: Vec<Slot> = new.operands.iter().skip(1).cloned().map(Slot::new).collect();
            if let Some(data) = &new.log_data {
                slots.push(Slot::new(data.clone()));
            }
            if slots.is_empty() {
                slots.push(Slot::empty());
            }

            (NodeKind::Log { topic_hash }, slots)
        }
        NodeType::ControlFlow if new.opcode.is_call() => {
            let value = match new.opcode {
                Opcode::Call | Opcode::Callcode => new.operands.get(2).cloned(),
                _ => None,
            };
            let info = CallInfo::decode(new.call_data.as_deref().unwrap_or_default(), value);

            (NodeKind::Call(info), vec![operand(1)])
        }
        NodeType::ControlFlow if new.opcode.is_jump() => {
            let target = new.operands.first().and_then(Value::as_concrete);

            (NodeKind::ControlFlow { target }, vec![operand(0)])
        }
        NodeType::ControlFlow => (NodeKind::ControlFlow { target: None }, vec![operand(0)]),
        NodeType::EntryExit | NodeType::Deleted | NodeType::Unknown => {
            (NodeKind::Unknown, per_operand())
        }
    };

    // storage reads and writes keep slot and value apart in any category
    if new.opcode.is_storage() {
        (kind, vec![operand(0), operand(1)])
    } else {
        (kind, slots)
    }
}

fn missing_operand(uid: NodeId, new: &NewNode) -> Option<GraphError> {
    let required = match new.opcode {
        Opcode::Sstore | Opcode::And | Opcode::Or | Opcode::Add | Opcode::Sub | Opcode::Jumpi => 2,
        Opcode::Sload | Opcode::Sha3 | Opcode::Calldataload | Opcode::Iszero | Opcode::Jump => 1,
        Opcode::Call | Opcode::Delegatecall => 2,
        Opcode::Log(n) => usize::from(n),
        _ => 0,
    };

    let present = new.operands.iter().take_while(|v| !v.is_empty()).count();

    if present < required {
        Some(GraphError::MissingOperand {
            uid,
            opcode: new.opcode,
            slot: present,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(opcode: Opcode, operands: &[&str]) -> NewNode {
        NewNode::new("transfer", 1, opcode, 0).operands(operands.iter().map(|o| Value::word(*o)))
    }

    #[test]
    fn sentinels_are_created_lazily_and_once() {
        let mut session = GraphSession::new(GraphOptions::default());

        let a = session.add_node(node(Opcode::Jumpdest, &[])).unwrap();
        let b = session.add_node(node(Opcode::Jumpdest, &[])).unwrap();
        let sentinels = session.sentinels("transfer").unwrap();

        assert_eq!(sentinels, Sentinels { entry: 0, exit: 1 });
        assert_eq!((a, b), (2, 3));
        assert_eq!(session.functions().count(), 1);
    }

    #[test]
    fn storage_nodes_always_have_two_slots() {
        let mut session = GraphSession::new(GraphOptions::default());

        let store = session.add_node(node(Opcode::Sstore, &["2", "5", "7"])).unwrap();
        let load = session.add_node(node(Opcode::Sload, &["2"])).unwrap();

        assert_eq!(session.node(store).unwrap().slots.len(), 2);
        assert_eq!(session.node(load).unwrap().slots.len(), 2);
        assert!(session.node(load).unwrap().awaiting_post);
    }

    #[test]
    fn operandless_and_control_flow_nodes_have_one_slot() {
        let mut session = GraphSession::new(GraphOptions::default());

        let caller = session.add_node(node(Opcode::Caller, &[])).unwrap();
        let jumpi = session.add_node(node(Opcode::Jumpi, &["0x40", "c"])).unwrap();

        assert_eq!(session.node(caller).unwrap().slots.len(), 1);
        assert_eq!(session.node(jumpi).unwrap().slots.len(), 1);
        assert_eq!(session.node(jumpi).unwrap().jump_target(), Some(0x40));
    }

    #[test]
    fn new_nodes_are_provisionally_linked_to_exit() {
        let mut session = GraphSession::new(GraphOptions::default());

        let uid = session.add_node(node(Opcode::Sstore, &["2", "5"])).unwrap();
        let exit = session.sentinels("transfer").unwrap().exit;

        assert_eq!(session.node(uid).unwrap().successors, vec![exit]);
        assert!(session.node(exit).unwrap().slots[0].preds.contains(&uid));
    }

    #[test]
    fn completing_without_pending_node_fails() {
        let mut session = GraphSession::new(GraphOptions::default());

        assert_eq!(
            session.complete_node("transfer", Opcode::Caller, Value::word("caller"), None),
            Err(GraphError::NoPendingNode {
                function: String::from("transfer"),
                opcode: Opcode::Caller
            })
        );
    }

    #[test]
    fn sentinel_categories_are_rejected() {
        let mut session = GraphSession::new(GraphOptions::default());
        let mut new = node(Opcode::Add, &["a", "b"]);
        new.category = NodeType::EntryExit;

        assert!(matches!(
            session.add_node(new),
            Err(GraphError::UnsupportedCategory { .. })
        ));
        assert!(session.is_empty());
    }

    #[test]
    fn missing_operands_are_recorded_not_fatal() {
        let mut session = GraphSession::new(GraphOptions::default());

        let uid = session.add_node(node(Opcode::Sstore, &["2"])).unwrap();

        assert_eq!(
            session.anomalies(),
            &[Anomaly {
                uid,
                error: GraphError::MissingOperand {
                    uid,
                    opcode: Opcode::Sstore,
                    slot: 1
                }
            }]
        );
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn pending_nodes_are_flushed_by_the_next_instruction() {
        let mut session = GraphSession::new(GraphOptions::default());

        let caller = session.add_node(node(Opcode::Caller, &[])).unwrap();
        assert!(session.node(caller).unwrap().awaiting_post);

        session.add_node(node(Opcode::Jumpdest, &[])).unwrap();
        let entry = session.sentinels("transfer").unwrap().entry;

        assert!(!session.node(caller).unwrap().awaiting_post);
        assert_eq!(session.node(caller).unwrap().slots[0].preds, vec![entry]);
    }
}
