use super::Opcode;
use crate::util::{mean, median_of_sorted};
use std::{
    cell::Cell,
    collections::BTreeMap,
    convert::TryFrom,
    fmt::Display,
    time::Duration,
};

#[derive(Debug, Clone, Default)]
pub struct Profiler {
    nodes_created: u64,
    nodes_deleted: u64,
    edges_created: u64,
    oracle_queries: Cell<u64>,
    exhausted_searches: u64,
    edge_finding: BTreeMap<Opcode, Vec<Duration>>,
    start_node_searches: Vec<Duration>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_created(&mut self) {
        self.nodes_created += 1;
    }

    pub fn node_deleted(&mut self) {
        self.nodes_deleted += 1;
    }

    pub fn edge_created(&mut self) {
        self.edges_created += 1;
    }

    pub fn oracle_queried(&self) {
        self.oracle_queries.set(self.oracle_queries.get() + 1);
    }

    pub fn edge_finding_took(&mut self, opcode: Opcode, time: Duration) {
        self.edge_finding.entry(opcode).or_default().push(time);
    }

    pub fn start_node_search_took(&mut self, time: Duration, exhausted: bool) {
        self.start_node_searches.push(time);

        if exhausted {
            self.exhausted_searches += 1;
        }
    }

    pub fn nodes_created(&self) -> u64 {
        self.nodes_created
    }

    pub fn nodes_deleted(&self) -> u64 {
        self.nodes_deleted
    }

    pub fn edges_created(&self) -> u64 {
        self.edges_created
    }

    pub fn oracle_queries(&self) -> u64 {
        self.oracle_queries.get()
    }

    pub fn exhausted_searches(&self) -> u64 {
        self.exhausted_searches
    }

    pub fn edge_finding_times(&self, opcode: Opcode) -> &[Duration] {
        self.edge_finding
            .get(&opcode)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn micros(times: &[Duration]) -> Vec<u64> {
    let mut sorted: Vec<u64> = times
        .iter()
        .map(|t| u64::try_from(t.as_micros()).unwrap_or(u64::MAX))
        .collect();

    sorted.sort_unstable();
    sorted
}

fn summary(f: &mut std::fmt::Formatter<'_>, label: &str, times: &[Duration]) -> std::fmt::Result {
    let sorted = micros(times);

    match (mean(&sorted), median_of_sorted(&sorted), sorted.last()) {
        (Some(mean), Some(median), Some(max)) => writeln!(
            f,
            "  {:<16}n: {}  mean: {}us  median: {}us  max: {}us",
            label,
            sorted.len(),
            mean,
            median,
            max
        ),
        _ => writeln!(f, "  {:<16}n: 0", label),
    }
}

impl Display for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "nodes:            created: {}  deleted: {}",
            self.nodes_created, self.nodes_deleted
        )?;
        writeln!(f, "edges:            {}", self.edges_created)?;
        writeln!(f, "oracle queries:   {}", self.oracle_queries.get())?;
        writeln!(f, "edge finding:")?;

        for (opcode, times) in self.edge_finding.iter() {
            summary(f, &opcode.to_string(), times)?;
        }

        writeln!(
            f,
            "start nodes:      exhausted: {}",
            self.exhausted_searches
        )?;
        summary(f, "search", &self.start_node_searches)
    }
}
