use serde::Deserialize;

use graph::{Edge, EdgeType, GraphView, Node, NodeStatus, NodeType};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

#[derive(Deserialize, Default)]
struct Hypothesis {
    content: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Deserialize, Default)]
struct AnalysisResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    hypotheses: Vec<Hypothesis>,
}

/// Precondition: at least one `Evidence` dependency (§4.4). Produces 0-k `Hypothesis` nodes.
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    let mut saw_evidence = false;
    for &dep_id in &node.dependencies {
        let dep = view
            .node(dep_id)
            .ok_or_else(|| ProcessorError::Precondition("analysis dependency missing from graph".into()))?;
        if dep.node_type == NodeType::Evidence {
            saw_evidence = true;
        }
        if dep.status != NodeStatus::Completed {
            return Err(ProcessorError::Precondition(
                "analysis node's dependencies are not all Completed".into(),
            ));
        }
    }
    if !saw_evidence {
        return Err(ProcessorError::Precondition(
            "analysis node requires at least one Evidence dependency".into(),
        ));
    }

    let prompt = format!(
        "Analyze the following evidence and report hypotheses. Respond as JSON: \
         {{\"answer\": \"...\", \"hypotheses\": [{{\"content\": \"...\", \"confidence\": 0.0}}]}}\n\n{}",
        node.content
    );
    let raw = ctx.oracle.complete(&prompt).await?;
    let parsed: AnalysisResponse =
        serde_json::from_str(&raw).map_err(|err| ProcessorError::Malformed(err.to_string()))?;

    let mut new_nodes = Vec::new();
    let mut edges = Vec::new();
    for hypothesis in parsed.hypotheses {
        let confidence = hypothesis.confidence.unwrap_or(0.5);
        let mut child = Node::new(NodeType::Hypothesis, hypothesis.content, crate::priority_from_importance(confidence))
            .with_dependencies(vec![node.id]);
        child.metadata.confidence = Some(confidence.clamp(0.0, 1.0));
        edges.push(Edge {
            source: node.id,
            target: child.id,
            edge_type: EdgeType::Generates,
            weight: confidence.clamp(0.0, 1.0),
        });
        new_nodes.push(child);
    }

    Ok(ProcessingResult {
        result: Some(serde_json::json!({
            "text": parsed.answer.unwrap_or_default(),
            "hypothesis_count": new_nodes.len(),
        })),
        new_nodes,
        edges,
    })
}
