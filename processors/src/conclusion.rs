use graph::{GraphView, Node, NodeStatus, NodeType};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

/// Precondition: exactly one `Synthesis` dependency (§4.4). Writes the final answer by carrying
/// forward the `Synthesis` node's `text`/`confidence`. Spawns no nodes, and does not call the
/// oracle: everything it needs was already computed by `Synthesis`.
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    _ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    let dep_id = *node
        .dependencies
        .first()
        .ok_or_else(|| ProcessorError::Precondition("conclusion node has no dependency".into()))?;
    let dep = view
        .node(dep_id)
        .ok_or_else(|| ProcessorError::Precondition("conclusion dependency missing from graph".into()))?;
    if dep.node_type != NodeType::Synthesis {
        return Err(ProcessorError::Precondition(
            "conclusion must depend on a Synthesis node".into(),
        ));
    }
    if dep.status != NodeStatus::Completed {
        return Err(ProcessorError::Precondition(
            "conclusion's synthesis dependency is not Completed".into(),
        ));
    }

    let text = dep
        .result
        .as_ref()
        .and_then(|r| r.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let confidence = dep
        .result
        .as_ref()
        .and_then(|r| r.get("confidence"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5);

    Ok(ProcessingResult {
        new_nodes: Vec::new(),
        edges: Vec::new(),
        result: Some(serde_json::json!({ "answer": text, "confidence": confidence })),
    })
}
