//! Integration tests for node, port and graph events.

use nodeweave::messages::{WorkerMessage, forward_events};
use nodeweave::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn doubler() -> Arc<NodeDefinition> {
    NodeDefinition::builder("double")
        .describe("Doubles its input")
        .signature("x: int -> y: int")
        .compute(|inputs| async move {
            let x = inputs.require("x")?.as_int().unwrap_or_default();
            Ok::<_, ComputeError>(Outputs::new().with("y", x * 2))
        })
        .build()
        .unwrap()
}

fn record(events: &SignalManager, name: &str) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.on(name, listener(move |event| sink.lock().unwrap().push(event.clone())));
    seen
}

#[tokio::test]
async fn test_node_and_port_events() {
    let graph = Graph::new();
    let (node, _) = graph.add_node(doubler()).unwrap();

    let node_events = graph.node_events(node).unwrap();
    let triggers = record(&node_events, events::TRIGGER);
    let done = record(&node_events, events::TRIGGER_DONE);
    let changes = record(&graph.port_events(node, "y").unwrap(), events::VALUE_CHANGED);
    let before = record(&graph.port_events(node, "x").unwrap(), "before_set_value");
    let after = record(&graph.port_events(node, "x").unwrap(), "after_set_value");

    graph.set_input(node, "x", 21).unwrap().wait().await.unwrap();

    assert_eq!(triggers.lock().unwrap().len(), 1);
    let done = done.lock().unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].src, Source::Node(node));
    assert_eq!(done[0].get("state"), Some(&Value::from("done")));

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].get("old"), Some(&Value::Null));
    assert_eq!(changes[0].get("new"), Some(&Value::Int(42)));

    assert_eq!(before.lock().unwrap()[0].get("value"), Some(&Value::Int(21)));
    assert_eq!(after.lock().unwrap()[0].get("result"), Some(&Value::Int(21)));
}

#[tokio::test]
async fn test_graph_relays_node_events() {
    let graph = Graph::new();
    let added = record(graph.events(), events::NODE_ADDED);
    let relayed = record(graph.events(), events::VALUE_CHANGED);
    let removed = record(graph.events(), events::NODE_REMOVED);

    let (node, _) = graph.add_node(doubler()).unwrap();
    graph.set_input(node, "x", 1).unwrap().wait().await.unwrap();
    graph.remove_node(node).unwrap();

    let added = added.lock().unwrap();
    assert_eq!(added[0].get("class"), Some(&Value::from("double")));
    assert_eq!(added[0].src, Source::Graph(graph.id().to_string()));

    let relayed = relayed.lock().unwrap();
    let ports: Vec<_> = relayed.iter().filter_map(|e| e.get("port")).collect();
    assert_eq!(ports, vec![&Value::from("x"), &Value::from("y")]);
    assert!(relayed.iter().all(|e| e.get("node") == Some(&Value::from(node.to_string()))));

    assert_eq!(removed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_node_signals() {
    let graph = Graph::new();
    let (node, _) = graph.add_node(doubler()).unwrap();
    let node_events = graph.node_events(node).unwrap();
    assert!(node_events.is_set(events::IDLE));
    assert!(graph.events().is_set(events::IDLE));

    let stack = graph.set_input(node, "x", 1).unwrap();
    assert!(!node_events.is_set(events::IDLE));
    assert!(!graph.events().is_set(events::IDLE));

    stack.wait().await.unwrap();
    node_events.wait(events::IDLE).await.unwrap();
    graph.wait_idle().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_triggered_pulse_and_delay() {
    let graph = Graph::builder()
        .config(
            GraphConfig::default()
                .with_trigger_delay(Duration::from_millis(50))
                .with_pulse_width(Duration::from_millis(20)),
        )
        .build();
    let (node, _) = graph.add_node(doubler()).unwrap();
    let node_events = graph.node_events(node).unwrap();

    let pulse = {
        let node_events = node_events.clone();
        tokio::spawn(async move { node_events.wait(events::TRIGGERED).await })
    };
    let stack = graph.set_input(node, "x", 2).unwrap();
    let err = stack.wait_timeout(Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Execution(nodeweave::error::ExecutionError::Timeout(_))
    ));

    graph.wait_idle().await.unwrap();
    pulse.await.unwrap().unwrap();
    assert_eq!(graph.output_value(node, "y").unwrap(), Some(Value::Int(4)));
}

#[tokio::test]
async fn test_removed_node_drops_listeners() {
    let graph = Graph::new();
    let (node, _) = graph.add_node(doubler()).unwrap();
    let node_events = graph.node_events(node).unwrap();
    let removed = record(&node_events, events::REMOVE);

    graph.remove_node(node).unwrap();
    assert_eq!(removed.lock().unwrap().len(), 1);
    assert!(!node_events.has_listeners(events::REMOVE));
}

#[tokio::test]
async fn test_worker_messages_from_graph_events() {
    let graph = Graph::new();
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    forward_events(graph.events(), move |msg| sink.lock().unwrap().push(msg));

    let (node, _) = graph.add_node(doubler()).unwrap();
    graph.set_input(node, "x", 5).unwrap().wait().await.unwrap();

    let messages = messages.lock().unwrap();
    let done = messages
        .iter()
        .find_map(|m| match m {
            WorkerMessage::WorkerEvent { event, data } if event == events::TRIGGER_DONE => Some(data),
            _ => None,
        })
        .unwrap();
    assert_eq!(done["node"], json!(node.to_string()));
    assert_eq!(done["state"], json!("done"));

    let wire: serde_json::Value =
        serde_json::from_str(&messages[0].to_json_string().unwrap()).unwrap();
    assert_eq!(wire["type"], json!("workerevent"));
    assert_eq!(wire["event"], json!(events::NODE_ADDED));
}
