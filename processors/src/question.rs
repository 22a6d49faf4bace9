use graph::{GraphView, Node};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

/// `Question` nodes are marked `Completed` synthetically by the Engine when the root is created
/// (§4.5 step 1) and are never handed to the Scheduler. This processor exists only so that the
/// dispatch table in `process` is exhaustive over `NodeType`; reaching it would mean a `Question`
/// node was enqueued, which is a programming error elsewhere in the Engine.
pub async fn process(
    node: &Node,
    _view: &GraphView<'_>,
    _ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    Ok(ProcessingResult {
        new_nodes: Vec::new(),
        edges: Vec::new(),
        result: Some(serde_json::json!({ "text": node.content.clone() })),
    })
}
