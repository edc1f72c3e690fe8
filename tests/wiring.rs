//! Integration tests for connections, defaults, validation and telemetry.

use nodeweave::error::{GraphError, TypeError};
use nodeweave::graph::ValueConstraint;
use nodeweave::prelude::*;
use nodeweave::telemetry::{MemoryTelemetry, Telemetry, TraceEntry};
use nodeweave::value::ValueKind;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn source(type_id: &str) -> Arc<NodeDefinition> {
    NodeDefinition::builder("source")
        .output("out", type_id)
        .trigger_on_create(false)
        .compute_sync(|_| Ok(Outputs::new()))
        .build()
        .unwrap()
}

fn sink(type_id: &str) -> Arc<NodeDefinition> {
    NodeDefinition::builder("sink")
        .input("x", type_id)
        .compute_sync(|_| Ok(Outputs::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_connect_pushes_existing_output_value() {
    let graph = Graph::new();
    let (src, _) = graph.add_node(source("int")).unwrap();
    let (dst, _) = graph.add_node(sink("float")).unwrap();
    graph.set_output(src, "out", 2).unwrap();

    // Argument order does not matter.
    let outcomes = graph.connect(dst, "x", src, "out").unwrap().wait().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(graph.input_value(dst, "x").unwrap(), Some(Value::Float(2.0)));
    assert_eq!(graph.connections().len(), 1);
    assert_eq!(graph.connections()[0].from, PortRef::new(src, "out"));
}

#[tokio::test]
async fn test_single_source_input_rejects_second_connection() {
    let graph = Graph::new();
    let (a, _) = graph.add_node(source("int")).unwrap();
    let (b, _) = graph.add_node(source("int")).unwrap();
    let (dst, _) = graph.add_node(sink("int")).unwrap();

    graph.connect(a, "out", dst, "x").unwrap();
    // Connecting the same pair again is a no-op.
    graph.connect(a, "out", dst, "x").unwrap();
    let err = graph.connect(b, "out", dst, "x").unwrap_err();
    assert!(matches!(err, Error::Graph(GraphError::AlreadyConnected(_))));

    graph
        .connect_with(b, "out", dst, "x", ConnectOptions::replace())
        .unwrap();
    let connections = graph.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].from, PortRef::new(b, "out"));
}

#[tokio::test]
async fn test_multi_source_input_is_last_writer_wins() {
    let graph = Graph::new();
    let (a, _) = graph.add_node(source("int")).unwrap();
    let (b, _) = graph.add_node(source("int")).unwrap();
    let merge = NodeDefinition::builder("merge")
        .port(PortSpec::input("x", "int").allow_multiple(true))
        .compute_sync(|_| Ok(Outputs::new()))
        .build()
        .unwrap();
    let (dst, _) = graph.add_node(merge).unwrap();

    graph.connect(a, "out", dst, "x").unwrap();
    graph.connect(b, "out", dst, "x").unwrap();
    graph.set_output(a, "out", 1).unwrap().wait().await.unwrap();
    graph.set_output(b, "out", 2).unwrap().wait().await.unwrap();
    assert_eq!(graph.input_value(dst, "x").unwrap(), Some(Value::Int(2)));
}

#[tokio::test]
async fn test_invalid_connections() {
    let types = TypeRegistry::new();
    types.register_type(TypeDescriptor::new("int").accepts(ValueKind::Int));
    types.register_type(TypeDescriptor::new("str").accepts(ValueKind::Str));
    let graph = Graph::builder().types(Arc::new(types)).build();
    let (src, _) = graph.add_node(source("str")).unwrap();
    let (dst, _) = graph.add_node(sink("int")).unwrap();

    let err = graph.connect(src, "out", dst, "x").unwrap_err();
    assert!(matches!(
        err,
        Error::Graph(GraphError::IncompatibleTypes {
            source: TypeError::NoCastingPath { .. },
            ..
        })
    ));

    let (other, _) = graph.add_node(source("str")).unwrap();
    let err = graph.connect(src, "out", other, "out").unwrap_err();
    assert!(matches!(err, Error::Graph(GraphError::InvalidDirection { .. })));

    let err = graph.connect(src, "missing", dst, "x").unwrap_err();
    assert!(matches!(err, Error::Graph(GraphError::UnknownPort(_))));

    let err = graph.disconnect(src, "out", dst, "x").unwrap_err();
    assert!(matches!(err, Error::Graph(GraphError::NotConnected { .. })));
}

#[tokio::test]
async fn test_unknown_port_type_is_rejected() {
    let graph = Graph::builder().types(Arc::new(TypeRegistry::new())).build();
    let err = graph.add_node(sink("int")).unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::UnknownType(ref id)) if id == "int"));
    assert!(graph.nodes().is_empty());
}

#[tokio::test]
async fn test_disconnect_restores_default_without_triggering() {
    let graph = Graph::new();
    let (src, _) = graph.add_node(source("int")).unwrap();
    let def = NodeDefinition::builder("with_default")
        .port(PortSpec::input("x", "int").with_default(5))
        .trigger_on_create(false)
        .compute_sync(|_| Ok(Outputs::new()))
        .build()
        .unwrap();
    let (dst, _) = graph.add_node(def).unwrap();
    assert_eq!(graph.input_value(dst, "x").unwrap(), Some(Value::Int(5)));

    graph.connect(src, "out", dst, "x").unwrap();
    graph.set_output(src, "out", 7).unwrap().wait().await.unwrap();
    assert_eq!(graph.input_value(dst, "x").unwrap(), Some(Value::Int(7)));

    graph.disconnect(src, "out", dst, "x").unwrap();
    assert_eq!(graph.input_value(dst, "x").unwrap(), Some(Value::Int(5)));
    assert_eq!(graph.node_state(dst).unwrap(), NodeState::Idle);
    assert!(graph.connections().is_empty());
}

#[tokio::test]
async fn test_direct_set_reports_type_errors() {
    let graph = Graph::new();
    let def = NodeDefinition::builder("bounded")
        .port(PortSpec::input("x", "int").with_constraint(ValueConstraint::range(0.0, 10.0)))
        .port(PortSpec::input("when", "datetime").optional().with_trigger(false))
        .compute_sync(|_| Ok(Outputs::new()))
        .build()
        .unwrap();
    let (node, _) = graph.add_node(def).unwrap();

    let err = graph.set_input(node, "x", 11).unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::ConstraintViolation { .. })));
    assert_eq!(graph.input_value(node, "x").unwrap(), None);

    let err = graph.set_input(node, "when", "not a date").unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::CastFailed { .. })));

    // Values are cast to the port type before they are stored.
    graph.set_input(node, "x", 3.0).unwrap().wait().await.unwrap();
    assert_eq!(graph.input_value(node, "x").unwrap(), Some(Value::Int(3)));
}

#[tokio::test]
async fn test_null_passes_constrained_ports() {
    let graph = Graph::new();
    let def = NodeDefinition::builder("choice")
        .port(
            PortSpec::input("x", "int")
                .with_constraint(ValueConstraint::one_of([Value::Int(1), Value::Int(2)])),
        )
        .compute_sync(|_| Ok(Outputs::new()))
        .build()
        .unwrap();
    let (node, _) = graph.add_node(def).unwrap();

    let err = graph.set_input(node, "x", 3).unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::ConstraintViolation { .. })));

    graph.set_input(node, "x", ()).unwrap().wait().await.unwrap();
    assert_eq!(graph.input_value(node, "x").unwrap(), Some(Value::Null));
}

#[tokio::test]
async fn test_validate_reports_errors_and_warnings() {
    let graph = Graph::new();
    let (src, _) = graph.add_node(source("datetime")).unwrap();
    let (dst, _) = graph.add_node(sink("int")).unwrap();
    let (lonely, _) = graph.add_node(sink("int")).unwrap();
    graph.connect(src, "out", dst, "x").unwrap();
    graph.disable(dst).unwrap();

    let result = graph.validate();
    assert!(!result.is_safe());
    let errors: Vec<&str> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains(&lonely.to_string()));

    let warnings: Vec<&str> = result.warnings().collect();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.contains("disabled")));
    assert!(warnings.iter().any(|w| w.contains("datetime -> float -> int")));
}

#[tokio::test]
async fn test_telemetry_records_each_run() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let graph = Graph::builder().telemetry(telemetry.clone()).build();
    let add = NodeDefinition::builder("add")
        .signature("a: int, b: int -> sum: int")
        .compute_sync(|inputs| {
            let a = inputs.require("a")?.as_int().unwrap_or_default();
            let b = inputs.require("b")?.as_int().unwrap_or_default();
            Ok(Outputs::new().with("sum", a + b))
        })
        .build()
        .unwrap();
    let (node, _) = graph.add_node(add).unwrap();
    graph.set_input(node, "a", 1).unwrap();
    graph.set_input(node, "b", 2).unwrap().wait().await.unwrap();

    let traces = telemetry.traces_for(node);
    assert_eq!(traces.len(), 1);
    let trace = &traces[0];
    assert!(trace.succeeded());
    assert_eq!(trace.class, "add");
    assert_eq!(trace.inputs, json!({"a": 1, "b": 2}));
    assert_eq!(trace.outputs, json!({"sum": 3}));
    assert_eq!(trace.error, None);
}

#[tokio::test]
async fn test_nodes_by_class_from_library() {
    let graph = Graph::new();
    graph.library().register(sink("int"));

    let (node, _) = graph.add_node_by_class("sink").unwrap();
    assert_eq!(graph.definition(node).unwrap().class(), "sink");
    let err = graph.add_node_by_class("nope").unwrap_err();
    assert!(matches!(err, Error::Graph(GraphError::UnknownNodeClass(_))));
}

#[derive(Default)]
struct CountingTelemetry {
    records: AtomicUsize,
    flushes: AtomicUsize,
}

impl Telemetry for CountingTelemetry {
    fn record(&self, _entry: TraceEntry) {
        self.records.fetch_add(1, Ordering::SeqCst);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_wait_idle_flushes_telemetry() {
    let telemetry = Arc::new(CountingTelemetry::default());
    let graph = Graph::builder().telemetry(telemetry.clone()).build();
    let (node, _) = graph.add_node(sink("int")).unwrap();

    graph.set_input(node, "x", 1).unwrap();
    assert_eq!(telemetry.flushes.load(Ordering::SeqCst), 0);
    graph.wait_idle().await.unwrap();
    assert_eq!(telemetry.records.load(Ordering::SeqCst), 1);
    assert_eq!(telemetry.flushes.load(Ordering::SeqCst), 1);
}
