use graph::{GraphView, Node, NodeStatus};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

/// Precondition: all dependencies `Completed` (§4.4). Writes a combined result by concatenating
/// each dependency's own `text` in `dependencies` order, so Scenario G's "answer concatenates the
/// three results in subquestion order" holds as long as `dependencies` preserves that order (it
/// does: `decomposition::process` builds it from the oracle's subquestion list). Spawns no nodes.
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    _ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    let mut combined = String::new();
    let mut confidences = Vec::new();
    for &dep_id in &node.dependencies {
        let dep = view
            .node(dep_id)
            .ok_or_else(|| ProcessorError::Precondition("synthesis dependency missing from graph".into()))?;
        if dep.status != NodeStatus::Completed {
            return Err(ProcessorError::Precondition(
                "synthesis node's dependencies are not all Completed".into(),
            ));
        }
        if let Some(text) = dep.result.as_ref().and_then(|r| r.get("text")).and_then(|v| v.as_str()) {
            combined.push_str(text);
        }
        if let Some(confidence) = dep.metadata.confidence {
            confidences.push(confidence);
        }
    }

    let confidence = if confidences.is_empty() {
        0.5
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    Ok(ProcessingResult {
        new_nodes: Vec::new(),
        edges: Vec::new(),
        result: Some(serde_json::json!({ "text": combined, "confidence": confidence })),
    })
}
