use serde::Deserialize;

use graph::{Edge, EdgeType, GraphView, Node, NodeStatus, NodeType};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

#[derive(Deserialize, Default)]
struct ValidationResponse {
    valid: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Precondition: one dependency whose result is to be checked (§4.4). Emits a boolean result and,
/// when invalid, a `Counterpoint` node carrying the oracle's stated reason.
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    let dep_id = *node
        .dependencies
        .first()
        .ok_or_else(|| ProcessorError::Precondition("validation node has no dependency".into()))?;
    let dep = view
        .node(dep_id)
        .ok_or_else(|| ProcessorError::Precondition("validation dependency missing from graph".into()))?;
    if dep.status != NodeStatus::Completed {
        return Err(ProcessorError::Precondition(
            "validation's dependency is not Completed".into(),
        ));
    }
    let claim = dep
        .result
        .as_ref()
        .and_then(|r| r.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or(&dep.content);

    let prompt = format!(
        "Validate the following claim. Respond as JSON: {{\"valid\": true, \"reason\": \"...\"}}\n\n{claim}"
    );
    let raw = ctx.oracle.complete(&prompt).await?;
    let parsed: ValidationResponse =
        serde_json::from_str(&raw).map_err(|err| ProcessorError::Malformed(err.to_string()))?;

    let mut new_nodes = Vec::new();
    let mut edges = Vec::new();
    if !parsed.valid {
        let counterpoint = Node::new(NodeType::Counterpoint, parsed.reason.clone().unwrap_or_default(), node.priority)
            .with_dependencies(vec![node.id]);
        edges.push(Edge {
            source: node.id,
            target: counterpoint.id,
            edge_type: EdgeType::Contradicts,
            weight: 1.0,
        });
        new_nodes.push(counterpoint);
    }

    Ok(ProcessingResult {
        result: Some(serde_json::json!({
            "valid": parsed.valid,
            "text": parsed.reason.unwrap_or_default(),
        })),
        new_nodes,
        edges,
    })
}
