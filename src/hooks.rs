//! Instruction hooks for a host execution engine, and trace replay.
//!
//! The host calls [`on_pre_instruction`] before and [`on_post_instruction`]
//! after every traced instruction. Hooks never fail: node-local problems are
//! logged and the instruction is skipped or recorded as an anomaly, so one
//! malformed event never stops the analysis of a function.

use crate::{
    graph::{GraphSession, NewNode, NodeId, Opcode, StateHandle, TxId},
    oracle::EquivalenceOracle,
    value::Value,
};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use thiserror::Error;

/// An instruction about to execute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionEvent {
    pub function: String,
    pub tx_id: TxId,
    pub opcode: String,
    /// program counter
    pub address: u64,
    /// stack operands, top first
    #[serde(default)]
    pub operands: Vec<Value>,
    /// concrete call data of calls, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_data: Option<Value>,
}

/// An instruction that just executed, with the value it left on the stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInstructionEvent {
    pub function: String,
    pub opcode: String,
    pub result: Value,
}

/// One line of a JSON-lines trace file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "lowercase")]
pub enum TraceRecord {
    Pre(InstructionEvent),
    Post(PostInstructionEvent),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read trace")]
    Io(#[from] std::io::Error),

    #[error("malformed trace record in line {line}")]
    Record {
        line: usize,
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: usize,
    pub nodes: usize,
}

/// Create the node of a pre-hooked instruction. Returns `None` for
/// instructions that are not traced or could not be turned into a node.
pub fn on_pre_instruction<O: EquivalenceOracle>(
    session: &mut GraphSession<O>,
    event: &InstructionEvent,
    state: Option<StateHandle>,
) -> Option<NodeId> {
    let opcode = parse_opcode(&event.opcode)?;

    if !opcode.is_pre_hooked() {
        return None;
    }

    let call_data = event.call_data.as_deref().and_then(|data| {
        hex::decode(data.trim_start_matches("0x"))
            .map_err(|e| warn!("ignoring call data of {} at {}: {}", opcode, event.address, e))
            .ok()
    });

    let mut new = NewNode::new(event.function.as_str(), event.tx_id, opcode, event.address)
        .operands(event.operands.iter().cloned());
    new.call_data = call_data;
    new.log_data = event.log_data.clone();
    new.state = state;

    match session.add_node(new) {
        Ok(uid) => Some(uid),
        Err(e) => {
            warn!("skipping {} at {} of {}: {}", opcode, event.address, event.function, e);
            None
        }
    }
}

/// Complete the pending node of a post-hooked instruction with its result.
pub fn on_post_instruction<O: EquivalenceOracle>(
    session: &mut GraphSession<O>,
    event: &PostInstructionEvent,
    state: Option<StateHandle>,
) -> Option<NodeId> {
    let opcode = parse_opcode(&event.opcode)?;

    if !opcode.is_post_hooked() {
        return None;
    }

    match session.complete_node(&event.function, opcode, event.result.clone(), state) {
        Ok(uid) => Some(uid),
        Err(e) => {
            warn!("dropping result of {}: {}", opcode, e);
            None
        }
    }
}

/// Feed a JSON-lines trace through the hooks. Blank lines are skipped.
/// Results that never arrived are linked without them at the end.
pub fn replay<O: EquivalenceOracle, R: BufRead>(
    session: &mut GraphSession<O>,
    reader: R,
) -> Result<ReplayStats, ReplayError> {
    let mut stats = ReplayStats::default();
    let before = session.len();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let record: TraceRecord =
            serde_json::from_str(&line).map_err(|source| ReplayError::Record {
                line: index + 1,
                source,
            })?;

        trace!("replay {:?}", record);

        match &record {
            TraceRecord::Pre(event) => on_pre_instruction(session, event, None),
            TraceRecord::Post(event) => on_post_instruction(session, event, None),
        };

        stats.records += 1;
    }

    session.flush_pending(None);
    stats.nodes = session.len() - before;

    debug!(
        "replayed {} records into {} nodes",
        stats.records, stats.nodes
    );

    Ok(stats)
}

fn parse_opcode(mnemonic: &str) -> Option<Opcode> {
    Opcode::from_mnemonic(mnemonic)
        .map_err(|e| warn!("{}", e))
        .ok()
}
