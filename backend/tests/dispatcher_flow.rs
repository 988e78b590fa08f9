//! End-to-end exercise of the session dispatcher against a saved graph,
//! standing in for a full websocket round trip (spec.md §4.H/§6).

use std::sync::Arc;

use backend::dispatcher::Dispatcher;
use backend::elevation::ConstantElevationOracle;
use backend::graph_store::{Edge, EdgeName, GraphStore, Node, RoadGraph};
use serde_json::Value;
use shared::BoundaryDescriptor;
use tokio::sync::mpsc;

fn square_graph() -> RoadGraph {
    let nodes = vec![
        Node { id: 0, lat: 45.0, lng: 4.0, elevation_m: Some(200.0) },
        Node { id: 1, lat: 45.0, lng: 4.002, elevation_m: Some(210.0) },
        Node { id: 2, lat: 45.002, lng: 4.002, elevation_m: Some(205.0) },
        Node { id: 3, lat: 45.002, lng: 4.0, elevation_m: Some(195.0) },
    ];
    let mut edges = Vec::new();
    for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 0)] {
        edges.push(Edge { from: a, to: b, length_m: 180.0, geometry: None, name: EdgeName::None, highway: None, osmid: None });
        edges.push(Edge { from: b, to: a, length_m: 180.0, geometry: None, name: EdgeName::None, highway: None, osmid: None });
    }
    RoadGraph { nodes, edges }
}

fn new_dispatcher(dir: &std::path::Path) -> Dispatcher {
    Dispatcher::new(GraphStore::new(dir), Arc::new(ConstantElevationOracle(200.0)), None, 3000.0)
}

async fn recv_all(rx: &mut mpsc::Receiver<shared::ServerMessage>) -> Vec<shared::ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn list_graphs_on_empty_store_reports_no_graphs() {
    let dir = tempfile::tempdir().unwrap();
    let mut dispatcher = new_dispatcher(dir.path());
    let (tx, mut rx) = mpsc::channel(8);

    dispatcher.send_initial_graphs_list(&tx).await;
    let messages = recv_all(&mut rx).await;
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        shared::ServerMessage::GraphsList { graphs, active, .. } => {
            assert!(graphs.is_empty());
            assert!(active.is_none());
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn switch_to_unknown_graph_reports_error_not_crash() {
    let dir = tempfile::tempdir().unwrap();
    let mut dispatcher = new_dispatcher(dir.path());
    let (tx, mut rx) = mpsc::channel(8);

    dispatcher.handle_text(r#"{"type":"SWITCH_GRAPH","name":"nope"}"#, &tx).await;
    let messages = recv_all(&mut rx).await;
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], shared::ServerMessage::GraphCreateError { .. }));
}

#[tokio::test]
async fn start_generation_round_trip_emits_pathset_then_paths_then_complete() {
    let dir = tempfile::tempdir().unwrap();
    let store = GraphStore::new(dir.path());
    let boundary = BoundaryDescriptor::Box {
        south: 45.0,
        west: 4.0,
        north: 45.002,
        east: 4.002,
        exclusion_zones: vec![],
    };
    store.save("square", &square_graph(), &boundary).unwrap();

    let mut dispatcher = new_dispatcher(dir.path());
    let (tx, mut rx) = mpsc::channel(64);

    dispatcher.handle_text(r#"{"type":"SWITCH_GRAPH","name":"square"}"#, &tx).await;
    let switched = recv_all(&mut rx).await;
    assert!(matches!(switched.last(), Some(shared::ServerMessage::GraphSwitched { .. })));

    let request = serde_json::json!({
        "type": "START_GENERATION",
        "lat": 45.0,
        "lng": 4.0,
        "min_path_len": 0.01,
        "max_path_len": 5.0,
        "loop_ratio": 0.3,
        "num_paths": 3,
    });
    dispatcher.handle_text(&request.to_string(), &tx).await;

    let mut saw_pathset = false;
    let mut saw_path = false;
    let mut saw_complete = false;
    while let Ok(msg) = rx.try_recv() {
        match msg {
            shared::ServerMessage::PathsetCreated { .. } => saw_pathset = true,
            shared::ServerMessage::PathReceived { path, .. } => {
                saw_path = true;
                assert!(matches!(path, Value::Object(_)));
            }
            shared::ServerMessage::GenerationComplete { .. } => saw_complete = true,
            _ => {}
        }
    }
    assert!(saw_pathset, "expected a PATHSET_CREATED message");
    assert!(saw_path, "expected at least one PATH_RECEIVED message");
    assert!(saw_complete, "expected a GENERATION_COMPLETE message");
}

#[tokio::test]
async fn malformed_message_is_logged_and_session_keeps_working() {
    let dir = tempfile::tempdir().unwrap();
    let mut dispatcher = new_dispatcher(dir.path());
    let (tx, mut rx) = mpsc::channel(8);

    dispatcher.handle_text("not json at all", &tx).await;
    dispatcher.handle_text(r#"{"type":"LIST_GRAPHS"}"#, &tx).await;
    let messages = recv_all(&mut rx).await;
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], shared::ServerMessage::GraphsList { .. }));
}
