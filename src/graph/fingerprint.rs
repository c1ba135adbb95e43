//! Shape of a function's business logic, independent of where it was traced.

use super::{GraphSession, NodeId};
use crate::oracle::EquivalenceOracle;
use petgraph::{dot::Dot, Graph};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Live nodes and edges of one function, numbered by position so equal
/// logic in different contracts yields equal graphs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessGraph {
    /// ordinal to `<node-type>:<OPCODE>`
    pub nodes: BTreeMap<usize, String>,
    /// producer ordinal to consumer ordinal
    pub edges: BTreeSet<(usize, usize)>,
}

impl BusinessGraph {
    pub fn to_canonical_json(&self) -> String {
        // maps and sets serialize in key order
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(self.to_canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionFingerprint {
    pub function: String,
    /// hex encoded SHA3-256 of the canonical business graph
    pub hash: String,
    pub nodes: usize,
    pub edges: usize,
}

impl FunctionFingerprint {
    pub fn matches(&self, other: &FunctionFingerprint) -> bool {
        self.hash == other.hash
    }
}

impl<O: EquivalenceOracle> GraphSession<O> {
    pub fn business_graph(&self, function: &str) -> BusinessGraph {
        let ordinals = self.ordinals(function);
        let mut graph = BusinessGraph::default();

        for (uid, ordinal) in ordinals.iter() {
            let node = &self.nodes[*uid];
            let opcode = node.opcode.map(|op| op.to_string()).unwrap_or_default();

            graph
                .nodes
                .insert(*ordinal, format!("{}:{}", node.node_type(), opcode));

            for pred in node.predecessors() {
                if let Some(pred) = ordinals.get(&pred) {
                    graph.edges.insert((*pred, *ordinal));
                }
            }
        }

        graph
    }

    pub fn fingerprint(&self, function: &str) -> FunctionFingerprint {
        let graph = self.business_graph(function);

        FunctionFingerprint {
            function: function.to_string(),
            hash: graph.hash(),
            nodes: graph.nodes.len(),
            edges: graph.edges.len(),
        }
    }

    pub fn fingerprints(&self) -> Vec<FunctionFingerprint> {
        self.functions().map(|f| self.fingerprint(f)).collect()
    }

    /// Dot rendering of the live nodes of `function`, sentinels included.
    pub fn to_dot(&self, function: &str) -> String {
        let mut graph: Graph<String, usize> = Graph::new();
        let mut indices = HashMap::new();

        for node in self.nodes.iter().filter(|n| n.function == function && !n.is_deleted()) {
            let label = match node.opcode {
                Some(opcode) => format!("{} {}", node.uid, opcode),
                None => format!("{} {}", node.uid, node.node_type()),
            };

            indices.insert(node.uid, graph.add_node(label));
        }

        for node in self.nodes.iter().filter(|n| indices.contains_key(&n.uid)) {
            for (slot, preds) in node.slots.iter().map(|s| &s.preds).enumerate() {
                for pred in preds {
                    if let (Some(from), Some(to)) = (indices.get(pred), indices.get(&node.uid)) {
                        graph.add_edge(*from, *to, slot);
                    }
                }
            }
        }

        format!("{:?}", Dot::with_config(&graph, &[]))
    }

    fn ordinals(&self, function: &str) -> BTreeMap<NodeId, usize> {
        self.nodes
            .iter()
            .filter(|n| n.function == function && !n.is_sentinel() && !n.is_deleted())
            .enumerate()
            .map(|(ordinal, n)| (n.uid, ordinal))
            .collect()
    }
}
