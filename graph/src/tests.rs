use super::{Edge, EdgeType, Graph, GraphError, Node, NodeId, NodeStatus, NodeType};

fn question(content: &str, priority: i64) -> Node {
    Node::new(NodeType::Question, content, priority)
}

#[test]
fn insert_and_fetch_roundtrips() {
    let graph = Graph::new();
    let root = question("what is 2 + 2?", 100);
    let id = root.id;
    graph.insert_node(root).unwrap();

    assert!(graph.contains(id));
    assert_eq!(graph.node(id).unwrap().content, "what is 2 + 2?");
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn dependency_on_missing_node_is_rejected() {
    let graph = Graph::new();
    let orphan = Node::new(NodeType::Decomposition, "child", 50).with_dependencies(vec![NodeId::new()]);
    let err = graph.insert_node(orphan).unwrap_err();
    assert!(matches!(err, GraphError::DependencyMissing(_)));
}

#[test]
fn duplicate_node_id_is_rejected() {
    let graph = Graph::new();
    let node = question("dup", 1);
    let copy = node.clone();
    graph.insert_node(node).unwrap();
    let err = graph.insert_node(copy).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateNode(_)));
}

#[test]
fn promotes_successors_once_all_dependencies_complete() {
    let graph = Graph::new();
    let root = question("root", 100);
    let root_id = root.id;
    graph.insert_node(root).unwrap();

    let a = Node::new(NodeType::Research, "a", 90).with_dependencies(vec![root_id]);
    let b = Node::new(NodeType::Research, "b", 90).with_dependencies(vec![root_id]);
    let a_id = a.id;
    let b_id = b.id;
    graph.insert_node(a).unwrap();
    graph.insert_node(b).unwrap();

    let synthesis =
        Node::new(NodeType::Synthesis, "combine", 80).with_dependencies(vec![a_id, b_id]);
    let synthesis_id = synthesis.id;
    graph.insert_node(synthesis).unwrap();

    graph
        .update_node(root_id, |n| n.status = NodeStatus::Completed)
        .unwrap();
    let promoted = graph.promote_ready_successors(root_id);
    assert_eq!(promoted.len(), 2);
    assert_eq!(graph.node(a_id).unwrap().status, NodeStatus::Ready);
    assert_eq!(graph.node(b_id).unwrap().status, NodeStatus::Ready);

    // Synthesis isn't ready until both a and b are complete.
    graph
        .update_node(a_id, |n| n.status = NodeStatus::Completed)
        .unwrap();
    assert!(graph.promote_ready_successors(a_id).is_empty());
    assert_eq!(graph.node(synthesis_id).unwrap().status, NodeStatus::Pending);

    graph
        .update_node(b_id, |n| n.status = NodeStatus::Completed)
        .unwrap();
    let promoted = graph.promote_ready_successors(b_id);
    assert_eq!(promoted, vec![synthesis_id]);
    assert_eq!(graph.node(synthesis_id).unwrap().status, NodeStatus::Ready);
}

#[test]
fn add_edge_requires_existing_endpoints() {
    let graph = Graph::new();
    let a = question("a", 1);
    let a_id = a.id;
    graph.insert_node(a).unwrap();

    let err = graph
        .add_edge(Edge {
            source: a_id,
            target: NodeId::new(),
            edge_type: EdgeType::Supports,
            weight: 1.0,
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::DependencyMissing(_)));
}

#[test]
fn canonical_document_round_trips() {
    let graph = Graph::new();
    let root = question("root", 100);
    let root_id = root.id;
    graph.insert_node(root).unwrap();
    graph.set_root(root_id).unwrap();

    let child = Node::new(NodeType::Research, "child", 50).with_dependencies(vec![root_id]);
    let child_id = child.id;
    graph.insert_node(child).unwrap();
    graph
        .add_edge(Edge {
            source: root_id,
            target: child_id,
            edge_type: EdgeType::Decomposes,
            weight: 1.0,
        })
        .unwrap();

    let doc = graph.to_canonical_document();
    assert_eq!(doc.nodes.len(), 2);
    assert_eq!(doc.root_node_id, Some(root_id));

    let json = serde_json::to_string(&doc).unwrap();
    let parsed: super::GraphDocument = serde_json::from_str(&json).unwrap();
    let rebuilt = Graph::from_canonical_document(parsed).unwrap();
    assert_eq!(rebuilt.node_count(), 2);
    assert_eq!(rebuilt.root_node_id(), Some(root_id));
}
