//! Basic-block skeleton of a function.
//!
//! Every node records the leading node of its basic block: the entry
//! sentinel, a `JUMPDEST` (taken jump) or a `JUMPI` (fall-through of a
//! conditional). Walking leaders backward yields the path of blocks a node
//! was reached on, which bounds all backward searches for producers.

use super::{GraphError, GraphSession, NodeId, Opcode, TxId};
use crate::oracle::EquivalenceOracle;
use std::collections::HashSet;

impl<O: EquivalenceOracle> GraphSession<O> {
    /// Leaders from the function entry to the block containing `uid`,
    /// including `JUMPI`s whose branch was taken.
    pub fn block_leader_chain(&self, uid: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let node = self.node(uid)?;
        let entry = self.sentinels_of(uid).map(|s| s.entry);

        let mut chain = Vec::new();
        let mut current = match node.leader {
            Some(leader) => Some(leader),
            None => return Ok(vec![uid]),
        };

        while let Some(leader) = current {
            chain.push(leader);

            let leader_node = &self.nodes[leader];

            current = if leader_node.is_entry() {
                None
            } else if leader_node.is(Opcode::Jumpdest) {
                match leader_node.slots[0].preds.first() {
                    Some(&pred) if self.nodes[pred].is_entry() => Some(pred),
                    Some(&pred) => {
                        if self.nodes[pred].is(Opcode::Jumpi) {
                            chain.push(pred);
                        }
                        self.nodes[pred].leader
                    }
                    None => entry,
                }
            } else {
                leader_node.leader
            };

            // leaders strictly decrease, anything else is a corrupt arena
            if let Some(next) = current {
                if next >= leader {
                    break;
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Leaders actually executed along `chain`: a `JUMPI` directly followed
    /// by the `JUMPDEST` it jumped to only stands for its untaken branch.
    pub fn path_leaders(&self, chain: &[NodeId]) -> Vec<NodeId> {
        chain
            .iter()
            .enumerate()
            .filter(|(i, uid)| match chain.get(i + 1) {
                Some(next) => !self.is_taken_branch(**uid, *next),
                None => true,
            })
            .map(|(_, uid)| *uid)
            .collect()
    }

    pub(super) fn is_taken_branch(&self, jumpi: NodeId, next: NodeId) -> bool {
        self.nodes[jumpi].is(Opcode::Jumpi)
            && self.nodes[next].is(Opcode::Jumpdest)
            && self.nodes[next].slots[0].preds.contains(&jumpi)
    }

    /// Leader of the block a new node at `address` joins: the newest
    /// recorded block start that can precede it.
    pub(super) fn block_leader(&self, function: &str, tx_id: TxId, address: u64) -> NodeId {
        let entry = self.sentinels.get(function).map(|s| s.entry).unwrap_or_default();

        let starts = match self.block_starts.get(&(function.to_string(), tx_id)) {
            Some(starts) => starts,
            None => return entry,
        };

        for &start in starts.iter().rev() {
            let node = &self.nodes[start];

            if node.is_entry() {
                return start;
            }
            if node.is_deleted() {
                continue;
            }

            match node.opcode {
                Some(Opcode::Jumpdest) if node.address <= address => return start,
                Some(Opcode::Jumpi) if node.address < address => return start,
                _ => {}
            }
        }

        entry
    }

    /// Nodes a producer of an operand of `uid` may be searched among, newest
    /// first: earlier nodes of the same function and transaction on the
    /// block path of `uid`.
    pub(super) fn scope_candidates(&self, uid: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[uid];

        let tx_id = match node.tx_id {
            Some(tx_id) => tx_id,
            None => return Vec::new(),
        };

        let leaders: HashSet<NodeId> = match self.block_leader_chain(uid) {
            Ok(chain) => self.path_leaders(&chain).into_iter().collect(),
            Err(_) => return Vec::new(),
        };

        self.tx_nodes
            .get(&(node.function.clone(), tx_id))
            .map(|members| {
                members
                    .iter()
                    .rev()
                    .filter(|c| **c < uid)
                    .take(self.options.scan_limit)
                    .filter(|c| {
                        let candidate = &self.nodes[**c];
                        !candidate.is_deleted()
                            && candidate.leader.map_or(false, |l| leaders.contains(&l))
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Earlier live nodes of the same function and transaction, newest first.
    pub(super) fn earlier_in_transaction(&self, uid: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[uid];

        match node.tx_id {
            Some(tx_id) => self
                .tx_nodes
                .get(&(node.function.clone(), tx_id))
                .map(|members| {
                    members
                        .iter()
                        .rev()
                        .filter(|c| **c < uid)
                        .take(self.options.scan_limit)
                        .filter(|c| !self.nodes[**c].is_deleted())
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }
}
