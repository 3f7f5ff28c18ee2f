use graph::{Graph, GraphError};
use models::{Expr, FieldRef, Part, ResourceName};
use schema::{Registry, Shape};
use serde_json::json;
use test_support::Widget;

fn add_widget(graph: &mut Graph, name: &str, add: &str) -> graph::ResourceId {
    let mut widget = Widget::default();
    widget.add = add.to_string();
    graph
        .add_resource(ResourceName::new(name), Box::new(widget))
        .unwrap()
}

#[test]
fn duplicate_identities_are_rejected() {
    let mut graph = Graph::new();
    add_widget(&mut graph, "a", "a");

    let err = graph
        .add_resource(ResourceName::new("a"), Box::new(Widget::default()))
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateResource { .. }));
}

#[test]
fn dependencies_fail_on_missing_nodes() {
    let mut graph = Graph::new();
    add_widget(&mut graph, "a", "a");

    // Missing target.
    let err = graph
        .add_dependency(
            FieldRef::new("widget", "zz", "input"),
            Expr::reference("widget", "a", "out"),
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::MissingTarget { .. }));

    // Missing producer.
    let err = graph
        .add_dependency(
            FieldRef::new("widget", "a", "input"),
            Expr::reference("widget", "zz", "out"),
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::MissingProducer { .. }));
}

#[test]
fn fan_in_registers_each_distinct_producer_once() {
    let mut graph = Graph::new();
    let a = add_widget(&mut graph, "a", "a");
    let b = add_widget(&mut graph, "b", "b");
    let x = add_widget(&mut graph, "x", "x");

    // `a.out` appears twice; the producer set stays distinct.
    graph
        .add_dependency(
            FieldRef::new("widget", "x", "input"),
            Expr::template(vec![
                Part::Ref(FieldRef::new("widget", "a", "out")),
                Part::Ref(FieldRef::new("widget", "b", "out")),
                Part::Ref(FieldRef::new("widget", "a", "out")),
            ]),
        )
        .unwrap();

    let deps: Vec<_> = graph.dependencies(x).collect();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].producers(), &[a, b]);
    assert_eq!(graph.dependents(a).count(), 1);
    assert_eq!(graph.dependents(b).count(), 1);
    assert_eq!(graph.sinks(), vec![x]);
}

#[test]
fn topological_order_puts_producers_first() {
    let mut graph = Graph::new();
    let a = add_widget(&mut graph, "a", "a");
    let b = add_widget(&mut graph, "b", "b");
    let c = add_widget(&mut graph, "c", "c");

    graph
        .add_dependency(
            FieldRef::new("widget", "c", "input"),
            Expr::reference("widget", "b", "out"),
        )
        .unwrap();
    graph
        .add_dependency(
            FieldRef::new("widget", "b", "input"),
            Expr::reference("widget", "a", "out"),
        )
        .unwrap();

    assert_eq!(graph.topological().unwrap(), vec![a, b, c]);
    assert!(graph.reaches(a, c));
    assert!(!graph.reaches(c, a));
}

#[test]
fn cycles_are_detected() {
    let mut graph = Graph::new();
    add_widget(&mut graph, "a", "a");
    add_widget(&mut graph, "b", "b");

    graph
        .add_dependency(
            FieldRef::new("widget", "b", "input"),
            Expr::reference("widget", "a", "out"),
        )
        .unwrap();
    graph
        .add_dependency(
            FieldRef::new("widget", "a", "input"),
            Expr::reference("widget", "b", "out"),
        )
        .unwrap();

    assert!(matches!(graph.topological(), Err(GraphError::Cycle)));
}

#[test]
fn snapshots_round_trip_through_a_registry() {
    let registry = Registry::new().register::<Widget>();

    let mut graph = Graph::new();
    let a = add_widget(&mut graph, "a", "a");
    add_widget(&mut graph, "b", "b");
    graph.add_source(a, "ff:c2FsdA==:deadbeef".parse().unwrap());
    graph
        .add_dependency(
            FieldRef::new("widget", "b", "input"),
            Expr::reference("widget", "a", "out"),
        )
        .unwrap();

    let snapshot = graph.snapshot();
    let mut restored = Graph::restore(&snapshot, &registry).unwrap();

    // Resources, sources, and edges all survive, up to node identity.
    assert_eq!(restored.snapshot(), snapshot);
    let a2 = restored.lookup("widget", "a").unwrap();
    assert_eq!(restored.handler_mut(a2).get("add").unwrap(), json!("a"));
    assert_eq!(restored.sources(a2).count(), 1);
    let b2 = restored.lookup("widget", "b").unwrap();
    assert_eq!(restored.dependency_ids(b2).len(), 1);

    // And the snapshot itself serializes.
    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: graph::Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, snapshot);
}

#[test]
fn unknown_snapshot_types_fail_restore() {
    let mut graph = Graph::new();
    add_widget(&mut graph, "a", "a");
    let snapshot = graph.snapshot();

    let empty = Registry::new();
    assert!(Graph::restore(&snapshot, &empty).is_err());
}
