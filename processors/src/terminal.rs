use graph::{GraphView, Node};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

/// Shared shape for the six `NodeType` variants with no distinguished contract in §4.4's table
/// (`Hypothesis`, `Calculation`, `Evidence`, `Counterpoint`, `Reflection`, `Action`): absent
/// further LLM-driven expansion they complete with a result and spawn no further nodes. Each such
/// node's `content` already carries the text its spawning processor (`Research`/`Analysis`/
/// `Validation`) produced for it, so there is nothing left to compute.
pub async fn process(
    node: &Node,
    _view: &GraphView<'_>,
    _ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    Ok(ProcessingResult {
        new_nodes: Vec::new(),
        edges: Vec::new(),
        result: Some(serde_json::json!({
            "text": node.content.clone(),
            "confidence": node.metadata.confidence.unwrap_or(0.5),
        })),
    })
}
