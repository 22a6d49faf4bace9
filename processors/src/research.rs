use serde::Deserialize;

use graph::{Edge, EdgeType, GraphView, Node, NodeStatus, NodeType};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

#[derive(Deserialize, Default)]
struct ResearchFinding {
    content: String,
    #[serde(default)]
    supports: bool,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Deserialize, Default)]
struct ResearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    findings: Vec<ResearchFinding>,
}

/// Precondition: dependencies all `Completed` (§4.4). Produces 0-k `Evidence`/`Counterpoint`
/// nodes, one per finding the oracle reports.
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    for &dep_id in &node.dependencies {
        let dep = view
            .node(dep_id)
            .ok_or_else(|| ProcessorError::Precondition("research dependency missing from graph".into()))?;
        if dep.status != NodeStatus::Completed {
            return Err(ProcessorError::Precondition(
                "research node's dependencies are not all Completed".into(),
            ));
        }
    }

    let prompt = format!(
        "Research the following and report findings. Respond as JSON: \
         {{\"answer\": \"...\", \"findings\": [{{\"content\": \"...\", \"supports\": true, \"confidence\": 0.0}}]}}\n\n{}",
        node.content
    );
    let raw = ctx.oracle.complete(&prompt).await?;
    let parsed: ResearchResponse =
        serde_json::from_str(&raw).map_err(|err| ProcessorError::Malformed(err.to_string()))?;

    let mut new_nodes = Vec::new();
    let mut edges = Vec::new();
    for finding in parsed.findings {
        let node_type = if finding.supports { NodeType::Evidence } else { NodeType::Counterpoint };
        let edge_type = if finding.supports { EdgeType::Supports } else { EdgeType::Contradicts };
        let confidence = finding.confidence.unwrap_or(0.5);
        let mut child = Node::new(node_type, finding.content, crate::priority_from_importance(confidence))
            .with_dependencies(vec![node.id]);
        child.metadata.confidence = Some(confidence.clamp(0.0, 1.0));
        edges.push(Edge {
            source: node.id,
            target: child.id,
            edge_type,
            weight: confidence.clamp(0.0, 1.0),
        });
        new_nodes.push(child);
    }

    Ok(ProcessingResult {
        result: Some(serde_json::json!({
            "text": parsed.answer.unwrap_or_default(),
            "finding_count": new_nodes.len(),
        })),
        new_nodes,
        edges,
    })
}
