//! Start-node search: where does a value ultimately come from?

use super::{GraphError, GraphSession, NodeId, NodeKind, Opcode};
use crate::oracle::EquivalenceOracle;
use log::{debug, error};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Origins of a value together with what was passed on the way.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartNodes {
    pub ids: BTreeSet<NodeId>,
    /// hash nodes visited
    pub sha3_count: usize,
    /// storage reads visited
    pub sload_count: usize,
    /// storage writes of a constant that a visited read saw
    pub literal_writes: BTreeSet<NodeId>,
    /// the search hit its limit and `ids` may be incomplete
    pub exhausted: bool,
}

impl StartNodes {
    pub fn contains(&self, uid: NodeId) -> bool {
        self.ids.contains(&uid)
    }
}

impl<O: EquivalenceOracle> GraphSession<O> {
    /// Breadth-first search backward from `seeds` to origin nodes: nodes
    /// without producers or produced by the function entry only.
    ///
    /// Storage reads that are preceded by a write to the same slot continue
    /// at the producers of the written value instead of the slot. Writes of a
    /// constant end there and are listed in `literal_writes`. The search
    /// stops after `limit` dequeues.
    pub fn find_start_node_ids(&mut self, seeds: &[NodeId], limit: usize) -> StartNodes {
        let (result, took) = time!({ self.search_start_nodes(seeds, limit) });

        self.profiler.start_node_search_took(took, result.exhausted);

        result
    }

    /// Start nodes of the producers of slot `slot` of `uid`.
    pub fn find_start_node_ids_for_slot(
        &mut self,
        uid: NodeId,
        slot: usize,
    ) -> Result<StartNodes, GraphError> {
        let seeds = self
            .node(uid)?
            .slots
            .get(slot)
            .map(|s| s.preds.clone())
            .ok_or(GraphError::MissingOperand {
                uid,
                opcode: self.nodes[uid].opcode.unwrap_or(Opcode::Invalid),
                slot,
            })?;

        let limit = self.options.start_node_limit;

        Ok(self.find_start_node_ids(&seeds, limit))
    }

    /// Whether `uid` is an origin: no producers at all, or the entry
    /// sentinel as its only producer.
    pub fn is_start_node(&self, uid: NodeId) -> bool {
        let node = match self.nodes.get(uid) {
            Some(node) => node,
            None => return false,
        };

        let preds = node.predecessors();

        match preds[..] {
            [] => true,
            [only] => self.nodes[only].is_entry(),
            _ => false,
        }
    }
}

impl<O: EquivalenceOracle> GraphSession<O> {
    fn search_start_nodes(&self, seeds: &[NodeId], limit: usize) -> StartNodes {
        let mut result = StartNodes::default();
        let mut queue: VecDeque<(NodeId, usize)> = seeds.iter().map(|s| (*s, 0)).collect();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut dequeues = 0;

        while let Some((uid, depth)) = queue.pop_front() {
            if dequeues >= limit || result.ids.len() >= limit {
                error!(
                    "start-node search from {:?} exhausted its limit of {} at depth {}",
                    seeds, limit, depth
                );
                result.exhausted = true;
                break;
            }
            dequeues += 1;

            if !visited.insert(uid) {
                continue;
            }

            let node = match self.nodes.get(uid) {
                Some(node) => node,
                None => continue,
            };

            if node.is_sentinel() || node.is_deleted() || matches!(node.kind, NodeKind::Log { .. }) {
                continue;
            }

            if node.is(Opcode::Sha3) {
                result.sha3_count += 1;
            } else if node.is(Opcode::Sload) {
                result.sload_count += 1;
            }

            if self.is_start_node(uid) {
                result.ids.insert(uid);
                continue;
            }

            let writes: &[NodeId] = match node.slots.get(1) {
                Some(value) if node.is(Opcode::Sload) => value.preds.as_slice(),
                _ => &[],
            };

            if !writes.is_empty() {
                for write in writes {
                    match self.nodes[*write].slots.get(1) {
                        Some(value) if !value.preds.is_empty() => {
                            queue.extend(value.preds.iter().map(|p| (*p, depth + 1)));
                        }
                        _ => {
                            result.literal_writes.insert(*write);
                        }
                    }
                }
                continue;
            }

            let slots = if node.is(Opcode::Sload) {
                &node.slots[..node.slots.len().min(1)]
            } else {
                &node.slots[..]
            };

            for slot in slots {
                queue.extend(slot.preds.iter().map(|p| (*p, depth + 1)));
            }
        }

        debug!(
            "start nodes of {:?}: {:?} after {} dequeues",
            seeds, result.ids, dequeues
        );

        result
    }
}
