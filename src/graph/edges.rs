//! Edge finding: connecting each operand to the node that produced it.
//!
//! Producers are searched backward among earlier nodes on the same block
//! path of the same function and transaction. A missing edge is always
//! preferred over a wrong one, so every strategy links at most the nearest
//! unambiguous producer and gives up otherwise.

use super::{GraphError, GraphSession, Node, NodeId, NodeKind, Opcode, Term};
use crate::{expr::split_top_level, oracle::EquivalenceOracle, value::is_literal};
use log::{debug, warn};

const HASH_KEY_PRODUCERS: [Opcode; 5] = [
    Opcode::Sha3,
    Opcode::And,
    Opcode::Calldataload,
    Opcode::Caller,
    Opcode::Address,
];

const STORAGE_SLOT_PRODUCERS: [Opcode; 3] = [Opcode::Sha3, Opcode::Add, Opcode::Or];

impl<O: EquivalenceOracle> GraphSession<O> {
    /// Link the operands of `uid` to their producers.
    ///
    /// Slots that already have predecessors are left alone, so calling this
    /// again without new nodes changes nothing.
    pub fn find_edge(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let node = self.node(uid)?;

        if node.is_deleted() || node.is_sentinel() {
            return Ok(());
        }

        let opcode = match node.opcode {
            Some(opcode) => opcode,
            None => return Ok(()),
        };

        let kind = node.kind.clone();
        let operandless = node.slots.iter().all(|s| s.value().is_empty());

        debug!("find edges of {} node {}", opcode, uid);

        match (kind, opcode) {
            (NodeKind::StateVariable, Opcode::Sstore) => self.link_storage_write(uid),
            (NodeKind::StateVariable, Opcode::Sload) => self.link_storage_read(uid),
            (NodeKind::DataFlow, Opcode::Sha3) => self.link_hash(uid),
            (NodeKind::DataFlow, opcode) if opcode.is_mask() => self.link_mask(uid),
            (NodeKind::Environment, Opcode::Calldataload) => self.link_calldata(uid),
            (NodeKind::Environment, _) if operandless => {
                self.link_to_entry(uid);
                Ok(())
            }
            (NodeKind::ControlFlow { .. }, Opcode::Jumpdest) => self.link_jumpdest(uid),
            (NodeKind::ControlFlow { .. }, _) => {
                self.link_to_leader(uid);
                Ok(())
            }
            (NodeKind::Call(_), _)
            | (NodeKind::DataFlow, _)
            | (NodeKind::Environment, _)
            | (NodeKind::StateVariable, _)
            | (NodeKind::Log { .. }, _) => self.link_operands(uid).map(|_| ()),
            (NodeKind::Entry, _)
            | (NodeKind::Exit, _)
            | (NodeKind::Deleted, _)
            | (NodeKind::Unknown, _) => Ok(()),
        }
    }
}

//
// Private Implementation
//

impl<O: EquivalenceOracle> GraphSession<O> {
    /// Whether `candidate` may have produced `term` for a data operand.
    fn produces(&self, candidate: &Node, term: &Term) -> bool {
        if candidate.is_deleted() || candidate.is_sentinel() || candidate.is(Opcode::Sstore) {
            return false;
        }

        match candidate.kind {
            NodeKind::Log { .. }
            | NodeKind::ControlFlow { .. }
            | NodeKind::Call(_)
            | NodeKind::Unknown => return false,
            _ => {}
        }

        if let Some(output) = &candidate.output {
            return self.terms_equal(output, term);
        }

        !candidate.awaiting_post
            && candidate
                .slots
                .iter()
                .any(|slot| !slot.value().is_empty() && self.terms_equal(&slot.term, term))
    }

    fn nearest_producer(
        &self,
        candidates: &[NodeId],
        term: &Term,
        opcodes: Option<&[Opcode]>,
    ) -> Option<NodeId> {
        candidates.iter().copied().find(|c| {
            let candidate = &self.nodes[*c];

            opcodes.map_or(true, |ops| ops.iter().any(|op| candidate.is(*op)))
                && self.produces(candidate, term)
        })
    }

    fn is_linkable(term: &Term) -> bool {
        !term.value.is_empty() && !term.value.is_literal()
    }

    /// Generic strategy: the nearest producer for every symbolic operand.
    /// Returns per slot whether it has a predecessor afterwards.
    fn link_operands(&mut self, uid: NodeId) -> Result<Vec<bool>, GraphError> {
        let candidates = self.scope_candidates(uid);
        let mut resolved = Vec::new();
        let mut links = Vec::new();

        for (index, slot) in self.nodes[uid].slots.iter().enumerate() {
            if !slot.preds.is_empty() {
                resolved.push(true);
                continue;
            }

            let found = if Self::is_linkable(&slot.term) {
                self.nearest_producer(&candidates, &slot.term, None)
            } else {
                None
            };

            if let Some(pred) = found {
                links.push((pred, index));
            }
            resolved.push(found.is_some());
        }

        for (pred, index) in links {
            self.link(pred, uid, index);
        }

        Ok(resolved)
    }

    fn link_storage_slot(&mut self, uid: NodeId, candidates: &[NodeId]) {
        let slot = &self.nodes[uid].slots[0];

        if !slot.preds.is_empty() || !Self::is_linkable(&slot.term) {
            return;
        }

        if let Some(pred) = self.nearest_producer(candidates, &slot.term, Some(&STORAGE_SLOT_PRODUCERS))
        {
            self.link(pred, uid, 0);
        }
    }

    fn link_storage_write(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let candidates = self.scope_candidates(uid);

        self.link_storage_slot(uid, &candidates);

        let value = &self.nodes[uid].slots[1];
        if value.preds.is_empty() && Self::is_linkable(&value.term) {
            if let Some(pred) = self.nearest_producer(&candidates, &value.term, None) {
                self.link(pred, uid, 1);
            }
        }

        Ok(())
    }

    /// The slot as for writes. The value comes from the most recent write to
    /// an equal slot, if there is one on the path.
    fn link_storage_read(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let candidates = self.scope_candidates(uid);

        self.link_storage_slot(uid, &candidates);

        let node = &self.nodes[uid];
        if !node.slots[1].preds.is_empty() || node.slots[0].value().is_empty() {
            return Ok(());
        }

        let write = candidates.iter().copied().find(|c| {
            let candidate = &self.nodes[*c];

            candidate.is(Opcode::Sstore)
                && self.terms_equal(&candidate.slots[0].term, &node.slots[0].term)
        });

        if let Some(write) = write {
            self.link(write, uid, 1);
        }

        Ok(())
    }

    fn link_hash(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let node = &self.nodes[uid];

        if !node.slots[0].preds.is_empty() {
            return Ok(());
        }

        let preimage = node.slots[0].term.normalized(&self.options).to_string();
        if preimage.is_empty() {
            return Ok(());
        }

        let candidates = self.scope_candidates(uid);
        let parts = split_top_level(&preimage);

        if parts.first() == Some(&self.options.self_address.as_str()) {
            let mask = candidates
                .iter()
                .copied()
                .find(|c| self.nodes[*c].is(Opcode::And));

            if let Some(mask) = mask {
                self.link(mask, uid, 0);
            }
            return Ok(());
        }

        if parts.len() != 2 {
            return Err(GraphError::MalformedPreimage {
                uid,
                parts: parts.len(),
            });
        }

        let keys = match parts.split_last() {
            Some((last, rest)) if is_literal(last) => rest,
            _ => &parts[..],
        };

        let mut links = Vec::new();

        for key in keys.iter().filter(|k| !is_literal(k)) {
            let producer = candidates.iter().copied().find(|c| {
                let candidate = &self.nodes[*c];

                HASH_KEY_PRODUCERS.iter().any(|op| candidate.is(*op))
                    && candidate
                        .output
                        .as_ref()
                        .map_or(false, |out| out.normalized(&self.options) == *key)
            });

            if let Some(producer) = producer {
                links.push(producer);
            }
        }

        for producer in links {
            self.link(producer, uid, 0);
        }

        Ok(())
    }

    /// Masks without any producer are noise and get removed. A mask with
    /// one of two operands resolved keeps only that operand.
    fn link_mask(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let resolved = self.link_operands(uid)?;

        if resolved.len() < 2 {
            return Ok(());
        }

        let kept: Vec<usize> = resolved
            .iter()
            .enumerate()
            .filter(|(_, r)| **r)
            .map(|(i, _)| i)
            .collect();

        match kept[..] {
            [] => self.tombstone(uid),
            [only] => self.collapse_to_slot(uid, only),
            _ => {}
        }

        Ok(())
    }

    /// Constant offsets read parameters directly; computed offsets are
    /// linked to their producer if there is one.
    fn link_calldata(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let offset = &self.nodes[uid].slots[0];

        if !offset.preds.is_empty() {
            return Ok(());
        }

        if Self::is_linkable(&offset.term) && self.link_operands(uid)?.first() == Some(&true) {
            return Ok(());
        }

        self.link_to_entry(uid);
        Ok(())
    }

    fn link_to_entry(&mut self, uid: NodeId) {
        if let Some(sentinels) = self.sentinels_of(uid) {
            self.link(sentinels.entry, uid, 0);
        }
    }

    fn link_to_leader(&mut self, uid: NodeId) {
        if let Some(leader) = self.nodes[uid].leader {
            if leader != uid {
                self.link(leader, uid, 0);
            }
        }
    }

    /// A jump destination is entered from the latest conditional jump to it
    /// that has not been taken yet, or from the latest unconditional jump to
    /// it that has no successor yet.
    fn link_jumpdest(&mut self, uid: NodeId) -> Result<(), GraphError> {
        let node = &self.nodes[uid];

        if !node.slots[0].preds.is_empty() {
            return Ok(());
        }

        let target = u128::from(node.address);
        let exit = self.sentinels_of(uid).map(|s| s.exit);
        let earlier = self.earlier_in_transaction(uid);

        let source = earlier.iter().copied().find(|c| {
            let candidate = &self.nodes[*c];

            if candidate.jump_target() != Some(target) {
                return false;
            }

            if candidate.is(Opcode::Jumpi) {
                !candidate
                    .successors
                    .iter()
                    .any(|s| self.nodes[*s].is(Opcode::Jumpdest))
            } else if candidate.is(Opcode::Jump) {
                exit.map_or(false, |exit| candidate.successors == [exit])
            } else {
                false
            }
        });

        if let Some(source) = source {
            self.link(source, uid, 0);
            return Ok(());
        }

        let first_block = !earlier.iter().any(|c| {
            let candidate = &self.nodes[*c];
            candidate.is(Opcode::Jumpdest) || candidate.is(Opcode::Jumpi)
        });

        if first_block {
            self.link_to_entry(uid);
        } else {
            warn!(
                "jump destination {} at {} has no source, removing it",
                uid, self.nodes[uid].address
            );
            self.tombstone(uid);
        }

        Ok(())
    }
}
