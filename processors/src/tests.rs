use cas_client::{CasClient, CasClientOptions};
use graph::{Graph, Node, NodeStatus, NodeType};

use crate::{process, OracleError, ProcessorContext, ProcessorError};

struct ScriptedOracle {
    responses: std::sync::Mutex<Vec<Result<String, OracleError>>>,
}

impl ScriptedOracle {
    fn new(responses: Vec<Result<String, OracleError>>) -> ScriptedOracle {
        ScriptedOracle {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[async_trait::async_trait]
impl crate::LLMOracle for ScriptedOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(OracleError("no more scripted responses".into()))
        } else {
            responses.remove(0)
        }
    }
}

fn test_cas() -> CasClient {
    CasClient::new(CasClientOptions::new("http://127.0.0.1:1/".parse().unwrap())).unwrap()
}

fn ctx<'a>(cas: &'a CasClient, oracle: &'a dyn crate::LLMOracle) -> ProcessorContext<'a> {
    ProcessorContext {
        cas,
        oracle,
        data: None,
        instructions: None,
    }
}

#[tokio::test]
async fn decomposition_spawns_subquestions_synthesis_and_conclusion() {
    let graph = Graph::new();
    let question = Node::new(NodeType::Question, "what is the answer?", 0);
    let question_id = question.id;
    graph.insert_node(question).unwrap();
    graph.set_root(question_id).unwrap();

    let decomposition = Node::new(NodeType::Decomposition, "decompose", 1).with_dependencies(vec![question_id]);
    graph.insert_node(decomposition.clone()).unwrap();

    let oracle = ScriptedOracle::new(vec![Ok(serde_json::json!({
        "subquestions": [
            {"content": "q1", "approach": "research", "importance": 0.9},
            {"content": "q2", "approach": "research", "importance": 0.5},
            {"content": "q3", "approach": "analysis", "importance": 0.1},
        ]
    })
    .to_string())]);
    let cas = test_cas();
    let context = ctx(&cas, &oracle);
    let view = graph.view();

    let result = process(&decomposition, &view, &context).await.unwrap();

    // 3 subquestions + synthesis + conclusion.
    assert_eq!(result.new_nodes.len(), 5);
    assert_eq!(result.edges.len(), 3 /* decomposes */ + 3 /* synthesizes */ + 1 /* concludes */);
    let synthesis = result
        .new_nodes
        .iter()
        .find(|n| n.node_type == NodeType::Synthesis)
        .unwrap();
    assert_eq!(synthesis.dependencies.len(), 3);
    let conclusion = result
        .new_nodes
        .iter()
        .find(|n| n.node_type == NodeType::Conclusion)
        .unwrap();
    assert_eq!(conclusion.dependencies, vec![synthesis.id]);
}

#[tokio::test]
async fn decomposition_rejects_wrong_dependency_type() {
    let graph = Graph::new();
    let evidence = Node::new(NodeType::Evidence, "not a question", 0);
    let evidence_id = evidence.id;
    graph.insert_node(evidence).unwrap();
    let decomposition = Node::new(NodeType::Decomposition, "decompose", 1).with_dependencies(vec![evidence_id]);

    let oracle = ScriptedOracle::new(vec![]);
    let cas = test_cas();
    let context = ctx(&cas, &oracle);
    let view = graph.view();

    let err = process(&decomposition, &view, &context).await.unwrap_err();
    assert!(matches!(err, ProcessorError::Precondition(_)));
}

#[tokio::test]
async fn decomposition_surfaces_malformed_oracle_output_as_retryable() {
    let graph = Graph::new();
    let question = Node::new(NodeType::Question, "q", 0);
    let question_id = question.id;
    graph.insert_node(question).unwrap();
    let decomposition = Node::new(NodeType::Decomposition, "decompose", 1).with_dependencies(vec![question_id]);

    let oracle = ScriptedOracle::new(vec![Ok("not json".to_string())]);
    let cas = test_cas();
    let context = ctx(&cas, &oracle);
    let view = graph.view();

    let err = process(&decomposition, &view, &context).await.unwrap_err();
    assert!(matches!(err, ProcessorError::Malformed(_)));
}

#[tokio::test]
async fn synthesis_concatenates_dependency_text_in_order() {
    let graph = Graph::new();
    let mut sub_ids = Vec::new();
    for text in ["one", "two", "three"] {
        let mut node = Node::new(NodeType::Research, text, 2);
        node.status = NodeStatus::Completed;
        node.result = Some(serde_json::json!({ "text": text }));
        sub_ids.push(node.id);
        graph.insert_node(node).unwrap();
    }
    let synthesis = Node::new(NodeType::Synthesis, "synth", crate::SYNTHESIS_PRIORITY).with_dependencies(sub_ids);

    let oracle = ScriptedOracle::new(vec![]);
    let cas = test_cas();
    let context = ctx(&cas, &oracle);
    let view = graph.view();

    let result = process(&synthesis, &view, &context).await.unwrap();
    let text = result.result.unwrap()["text"].as_str().unwrap().to_string();
    assert_eq!(text, "onetwothree");
    assert!(result.new_nodes.is_empty());
}

#[tokio::test]
async fn conclusion_carries_forward_synthesis_result() {
    let graph = Graph::new();
    let mut synthesis = Node::new(NodeType::Synthesis, "synth", crate::SYNTHESIS_PRIORITY);
    synthesis.status = NodeStatus::Completed;
    synthesis.result = Some(serde_json::json!({ "text": "final answer", "confidence": 0.75 }));
    let synthesis_id = synthesis.id;
    graph.insert_node(synthesis).unwrap();

    let conclusion =
        Node::new(NodeType::Conclusion, "conclude", crate::CONCLUSION_PRIORITY).with_dependencies(vec![synthesis_id]);

    let oracle = ScriptedOracle::new(vec![]);
    let cas = test_cas();
    let context = ctx(&cas, &oracle);
    let view = graph.view();

    let result = process(&conclusion, &view, &context).await.unwrap();
    let value = result.result.unwrap();
    assert_eq!(value["answer"], "final answer");
    assert_eq!(value["confidence"], 0.75);
}

#[tokio::test]
async fn terminal_processor_echoes_content_and_spawns_nothing() {
    let graph = Graph::new();
    let mut node = Node::new(NodeType::Evidence, "some finding", 4);
    node.metadata.confidence = Some(0.8);

    let oracle = ScriptedOracle::new(vec![]);
    let cas = test_cas();
    let context = ctx(&cas, &oracle);
    let view = graph.view();

    let result = process(&node, &view, &context).await.unwrap();
    assert!(result.new_nodes.is_empty());
    assert!(result.edges.is_empty());
    let value = result.result.unwrap();
    assert_eq!(value["text"], "some finding");
    assert_eq!(value["confidence"], 0.8);
}
