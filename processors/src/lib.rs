// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

//!
//! The per-node-type processors (§4.4): the only part of the core that touches the `LLMOracle`.
//! Each processor is a pure async function `(node, graph view, context) -> ProcessingResult`,
//! dispatched by `process` over the closed `NodeType` set.

mod analysis;
mod conclusion;
mod decomposition;
mod oracle;
mod question;
mod research;
mod synthesis;
mod terminal;
mod validation;

pub use oracle::{LLMOracle, OracleError};

use std::fmt;

use bytes::Bytes;
use graph::{Edge, GraphView, Node, NodeType};

/// Read-only dependencies a processor needs beyond the node and graph view themselves: the CAS
/// client (for any additional artifacts a processor wants to persist) and the oracle, plus
/// whatever bytes the Scheduler already resolved for this node's `storage` refs.
pub struct ProcessorContext<'a> {
    pub cas: &'a cas_client::CasClient,
    pub oracle: &'a dyn LLMOracle,
    pub data: Option<Bytes>,
    pub instructions: Option<Bytes>,
}

/// What a processor invocation produced: nodes/edges to splice into the graph, and the result to
/// attach to the processed node itself. Mirrors §4.4's `ProcessingResult`.
#[derive(Clone, Debug, Default)]
pub struct ProcessingResult {
    pub new_nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub result: Option<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub enum ProcessorError {
    /// The oracle itself failed (transport, not content).
    Oracle(OracleError),
    /// The CAS rejected or failed a read/write the processor attempted.
    Cas(cas_client::CasError),
    /// The oracle answered, but its answer didn't parse as the JSON shape this processor
    /// expects. Maps to `OracleMalformed` (§7); retryable by the Scheduler.
    Malformed(String),
    /// A precondition in §4.4's contract table wasn't met (e.g. wrong dependency type/count).
    Precondition(String),
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Oracle(err) => write!(f, "{err}"),
            ProcessorError::Cas(err) => write!(f, "{err}"),
            ProcessorError::Malformed(msg) => write!(f, "oracle produced malformed output: {msg}"),
            ProcessorError::Precondition(msg) => write!(f, "processor precondition violated: {msg}"),
        }
    }
}

impl std::error::Error for ProcessorError {}

impl From<OracleError> for ProcessorError {
    fn from(err: OracleError) -> ProcessorError {
        ProcessorError::Oracle(err)
    }
}

impl From<cas_client::CasError> for ProcessorError {
    fn from(err: cas_client::CasError) -> ProcessorError {
        ProcessorError::Cas(err)
    }
}

/// `Decomposition=1`; research/analysis nodes inherit a priority mapped linearly from the LLM's
/// `importance` score into `[2, 9]`; `Synthesis=10`; `Conclusion=11` (§4.4).
pub const DECOMPOSITION_PRIORITY: i64 = 1;
pub const SYNTHESIS_PRIORITY: i64 = 10;
pub const CONCLUSION_PRIORITY: i64 = 11;

pub fn priority_from_importance(importance: f64) -> i64 {
    let clamped = importance.clamp(0.0, 1.0);
    2 + (clamped * 7.0).round() as i64
}

///
/// The dispatch table described in §9 "Dynamic dispatch over processors", expressed as a match
/// over the closed `NodeType` set rather than an open-ended registry: a new variant must be
/// handled here at compile time.
///
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    match node.node_type {
        NodeType::Question => question::process(node, view, ctx).await,
        NodeType::Decomposition => decomposition::process(node, view, ctx).await,
        NodeType::Research => research::process(node, view, ctx).await,
        NodeType::Analysis => analysis::process(node, view, ctx).await,
        NodeType::Synthesis => synthesis::process(node, view, ctx).await,
        NodeType::Conclusion => conclusion::process(node, view, ctx).await,
        NodeType::Validation => validation::process(node, view, ctx).await,
        NodeType::Hypothesis
        | NodeType::Calculation
        | NodeType::Evidence
        | NodeType::Counterpoint
        | NodeType::Reflection
        | NodeType::Action => terminal::process(node, view, ctx).await,
    }
}

#[cfg(test)]
mod tests;
