use serde::Deserialize;

use graph::{Edge, EdgeType, GraphView, Node, NodeType};

use crate::{ProcessingResult, ProcessorContext, ProcessorError};

const MIN_SUBQUESTIONS: usize = 3;
const MAX_SUBQUESTIONS: usize = 7;

#[derive(Deserialize)]
struct Subquestion {
    content: String,
    #[serde(default)]
    approach: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
}

#[derive(Deserialize)]
struct DecompositionResponse {
    subquestions: Vec<Subquestion>,
}

/// Precondition: exactly one dependency of type `Question` or `Synthesis` (§4.4). Produces 3-7
/// subquestion nodes typed by the oracle's `approach` field, a `Synthesis` node depending on all
/// of them, and a `Conclusion` node depending on the `Synthesis`.
pub async fn process(
    node: &Node,
    view: &GraphView<'_>,
    ctx: &ProcessorContext<'_>,
) -> Result<ProcessingResult, ProcessorError> {
    let dep_id = *node
        .dependencies
        .first()
        .ok_or_else(|| ProcessorError::Precondition("decomposition node has no dependency".into()))?;
    let dependency = view
        .node(dep_id)
        .ok_or_else(|| ProcessorError::Precondition("decomposition dependency missing from graph".into()))?;
    if !matches!(dependency.node_type, NodeType::Question | NodeType::Synthesis) {
        return Err(ProcessorError::Precondition(
            "decomposition must depend on a Question or Synthesis node".into(),
        ));
    }

    let prompt = format!(
        "Decompose the following question into 3-7 subquestions. Respond as JSON: \
         {{\"subquestions\": [{{\"content\": \"...\", \"approach\": \"research|analysis|calculation|validation\", \"importance\": 0.0}}]}}\n\n\
         Question: {}",
        dependency.content
    );
    let raw = ctx.oracle.complete(&prompt).await?;
    let parsed: DecompositionResponse =
        serde_json::from_str(&raw).map_err(|err| ProcessorError::Malformed(err.to_string()))?;

    if parsed.subquestions.len() < MIN_SUBQUESTIONS || parsed.subquestions.len() > MAX_SUBQUESTIONS {
        return Err(ProcessorError::Malformed(format!(
            "expected 3-7 subquestions, got {}",
            parsed.subquestions.len()
        )));
    }

    let mut new_nodes = Vec::new();
    let mut edges = Vec::new();
    let mut sub_ids = Vec::new();

    for sub in &parsed.subquestions {
        let node_type = approach_to_node_type(sub.approach.as_deref());
        let importance = sub.importance.unwrap_or(0.5);
        let child = Node::new(node_type, sub.content.clone(), crate::priority_from_importance(importance))
            .with_dependencies(vec![node.id]);
        edges.push(Edge {
            source: node.id,
            target: child.id,
            edge_type: EdgeType::Decomposes,
            weight: importance.clamp(0.0, 1.0),
        });
        sub_ids.push(child.id);
        new_nodes.push(child);
    }

    let synthesis = Node::new(
        NodeType::Synthesis,
        format!("Synthesize answers to: {}", dependency.content),
        crate::SYNTHESIS_PRIORITY,
    )
    .with_dependencies(sub_ids.clone());
    let synthesis_id = synthesis.id;
    for &sub_id in &sub_ids {
        edges.push(Edge {
            source: sub_id,
            target: synthesis_id,
            edge_type: EdgeType::Synthesizes,
            weight: 1.0,
        });
    }
    new_nodes.push(synthesis);

    let conclusion = Node::new(
        NodeType::Conclusion,
        format!("Conclude: {}", dependency.content),
        crate::CONCLUSION_PRIORITY,
    )
    .with_dependencies(vec![synthesis_id]);
    edges.push(Edge {
        source: synthesis_id,
        target: conclusion.id,
        edge_type: EdgeType::Concludes,
        weight: 1.0,
    });
    new_nodes.push(conclusion);

    Ok(ProcessingResult {
        result: Some(serde_json::json!({ "subquestion_count": sub_ids.len() })),
        new_nodes,
        edges,
    })
}

fn approach_to_node_type(approach: Option<&str>) -> NodeType {
    match approach {
        Some("analysis") => NodeType::Analysis,
        Some("calculation") => NodeType::Calculation,
        Some("validation") => NodeType::Validation,
        _ => NodeType::Research,
    }
}
