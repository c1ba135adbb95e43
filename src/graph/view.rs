//! Read-only queries for classifiers built on top of the graph.

use super::{GraphError, GraphSession, NodeId, NodeType, Opcode, TxId};
use crate::oracle::EquivalenceOracle;
use log::error;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Projection of a node, tombstoned ones included.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub uid: NodeId,
    pub function: String,
    pub tx_id: Option<TxId>,
    pub node_type: NodeType,
    pub opcode: Option<String>,
    pub address: u64,
    pub deleted: bool,
    /// canonical rendering per slot
    pub operands: Vec<String>,
    /// producers per slot
    pub predecessors: Vec<Vec<NodeId>>,
    pub successors: Vec<NodeId>,
    pub output: Option<String>,
}

impl<O: EquivalenceOracle> GraphSession<O> {
    pub fn get_node(&self, uid: NodeId) -> Result<NodeView, GraphError> {
        let node = self.node(uid)?;

        Ok(NodeView {
            uid,
            function: node.function.clone(),
            tx_id: node.tx_id,
            node_type: node.node_type(),
            opcode: node.opcode.map(|op| op.to_string()),
            address: node.address,
            deleted: node.is_deleted(),
            operands: node
                .slots
                .iter()
                .map(|s| s.term.normalized(&self.options).to_string())
                .collect(),
            predecessors: node.slots.iter().map(|s| s.preds.clone()).collect(),
            successors: node.successors.clone(),
            output: node
                .output
                .as_ref()
                .map(|o| o.normalized(&self.options).to_string()),
        })
    }

    pub fn check_opcode(&self, uid: NodeId, opcode: Opcode) -> bool {
        self.nodes.get(uid).map_or(false, |n| n.is(opcode))
    }

    /// Nearest node with `opcode` among the transitive producers of `uid`.
    pub fn find_ancestor_with_opcode(
        &self,
        uid: NodeId,
        opcode: Opcode,
    ) -> Result<Option<NodeId>, GraphError> {
        let limit = self.options.scan_limit;
        let mut queue: VecDeque<NodeId> = self.node(uid)?.predecessors().into();
        let mut visited = HashSet::new();
        let mut steps = 0;

        while let Some(current) = queue.pop_front() {
            if steps >= limit {
                error!(
                    "search for a {} ancestor of {} exhausted its limit of {}",
                    opcode, uid, limit
                );
                return Err(GraphError::SearchExhausted { uid, limit });
            }
            steps += 1;

            if !visited.insert(current) {
                continue;
            }

            let node = &self.nodes[current];
            if node.is(opcode) {
                return Ok(Some(current));
            }

            queue.extend(node.predecessors());
        }

        Ok(None)
    }

    /// Slots of `uid` with a symbolic value but no producer. Values that
    /// appear from nowhere are what hardcoded addresses and amounts look like.
    pub fn missing_predecessors(&self, uid: NodeId) -> Result<Vec<usize>, GraphError> {
        let node = self.node(uid)?;

        if node.is_sentinel() || node.is_deleted() {
            return Ok(Vec::new());
        }

        Ok(node
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.preds.is_empty() && !s.value().is_empty())
            .map(|(i, _)| i)
            .collect())
    }
}
