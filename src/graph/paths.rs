//! Execution paths of a function and loop detection along them.

use super::{GraphError, GraphSession, NodeId, Opcode};
use crate::oracle::EquivalenceOracle;
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// A terminal of a function whose path revisits a jump destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopReport {
    pub function: String,
    pub terminal: NodeId,
    /// block leaders from entry to the terminal, taken branches included
    pub chain: Vec<NodeId>,
    /// lowest and highest node of the repeated jumps, `None` without a loop
    pub span: Option<(NodeId, NodeId)>,
}

impl LoopReport {
    pub fn is_loop(&self) -> bool {
        self.span.is_some()
    }
}

impl<O: EquivalenceOracle> GraphSession<O> {
    /// Control-flow nodes of `function` after which nothing was traced:
    /// jumps and halts still provisionally linked to the exit sentinel.
    pub fn terminals(&self, function: &str) -> Vec<NodeId> {
        let exit = match self.sentinels(function) {
            Some(sentinels) => sentinels.exit,
            None => return Vec::new(),
        };

        self.nodes
            .iter()
            .filter(|n| n.function == function && !n.is_deleted())
            .filter(|n| n.opcode.map_or(false, |op| op.is_jump() || op.is_halt()))
            .filter(|n| n.successors == [exit])
            .map(|n| n.uid)
            .collect()
    }

    /// For every terminal of `function`, the nodes executed from entry up
    /// to it, in execution order.
    pub fn get_all_paths(&self, function: &str) -> Result<BTreeMap<NodeId, Vec<NodeId>>, GraphError> {
        let entry = match self.sentinels(function) {
            Some(sentinels) => sentinels.entry,
            None => return Ok(BTreeMap::new()),
        };

        let mut paths = BTreeMap::new();

        for terminal in self.terminals(function) {
            let chain = self.block_leader_chain(terminal)?;
            let leaders = self.path_leaders(&chain);
            let tx_id = self.nodes[terminal].tx_id;

            let mut path: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|n| n.function == function && n.tx_id == tx_id && n.uid <= terminal)
                .filter(|n| !n.is_deleted())
                .filter(|n| {
                    n.leader.map_or(false, |l| leaders.contains(&l)) || leaders.contains(&n.uid)
                })
                .map(|n| n.uid)
                .collect();

            path.insert(0, entry);
            path.dedup();

            debug!(
                "path of {} to terminal {}: {} nodes over {} blocks",
                function,
                terminal,
                path.len(),
                leaders.len()
            );

            paths.insert(terminal, path);
        }

        Ok(paths)
    }

    /// Whether a jump destination is re-entered from a conditional jump more
    /// often than the loop threshold along `chain`.
    pub fn detect_path_loops(&self, chain: &[NodeId]) -> bool {
        self.loop_span(chain).is_some()
    }

    /// Lowest and highest node of the conditional jumps and destinations
    /// forming a loop along `chain`.
    pub fn loop_span(&self, chain: &[NodeId]) -> Option<(NodeId, NodeId)> {
        if chain.len() < 2 {
            return None;
        }

        let mut entries: HashMap<u64, Vec<(NodeId, NodeId)>> = HashMap::new();

        for pair in chain.windows(2) {
            let (jumpi, dest) = (&self.nodes[pair[0]], &self.nodes[pair[1]]);

            if jumpi.is(Opcode::Jumpi) && dest.is(Opcode::Jumpdest) {
                entries
                    .entry(dest.address)
                    .or_default()
                    .push((jumpi.uid, dest.uid));
            }
        }

        let looping = entries
            .values()
            .filter(|e| e.len() > self.options.loop_threshold)
            .flat_map(|e| e.iter().flat_map(|(a, b)| [*a, *b]));

        looping.fold(None, |span, uid| match span {
            None => Some((uid, uid)),
            Some((lo, hi)) => Some((lo.min(uid), hi.max(uid))),
        })
    }

    /// Loop report for every terminal of every function.
    pub fn detect_loops(&self) -> Result<Vec<LoopReport>, GraphError> {
        time_debug!("detected loops", {
            let mut reports = Vec::new();

            for function in self.functions() {
                for terminal in self.terminals(function) {
                    let chain = self.block_leader_chain(terminal)?;
                    let span = self.loop_span(&chain);

                    reports.push(LoopReport {
                        function: function.to_string(),
                        terminal,
                        chain,
                        span,
                    });
                }
            }

            Ok(reports)
        })
    }
}
