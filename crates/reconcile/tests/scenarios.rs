use graph::Graph;
use models::{Block, Body, Expr, FieldRef, Part, ResourceName};
use reconcile::{Cancelled, Config, ExponentialBackoff, Reconciler};
use schema::{Registry, SourceRef};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use store::{RecordedResource, StateStore};
use test_support::{
    events_tagged, Event, Flaky, MemoryBlobStore, MemoryStateStore, Op, Sleeper, StaticAuth,
    Widget,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    registry: Arc<Registry>,
    store: Arc<MemoryStateStore>,
    blobs: Arc<MemoryBlobStore>,
    reconciler: Reconciler<ExponentialBackoff>,
}

fn harness(concurrency: usize) -> Harness {
    let registry = Arc::new(
        Registry::new()
            .register::<Widget>()
            .register::<Sleeper>()
            .register::<Flaky>(),
    );
    let store = Arc::new(MemoryStateStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());

    let reconciler = Reconciler::new(
        registry.clone(),
        store.clone(),
        blobs.clone(),
        Arc::new(StaticAuth),
        Config {
            concurrency,
            persist_timeout: Duration::from_secs(5),
        },
        ExponentialBackoff::new(5)
            .with_min(Duration::from_millis(1))
            .with_max(Duration::from_millis(2)),
    );
    Harness {
        registry,
        store,
        blobs,
        reconciler,
    }
}

impl Harness {
    fn decode(&self, blocks: Vec<Block>) -> Graph {
        let ctx = decode::DecodeContext::new(&self.registry);
        let (_, graph, diags) = decode::decode(&Body::with_blocks(blocks), &ctx);
        assert!(!diags.is_fatal(), "unexpected diagnostics: {diags}");
        graph
    }

    async fn reconcile(&self, project: &str, graph: Graph) -> anyhow::Result<()> {
        self.reconciler
            .reconcile(&CancellationToken::new(), "test", project, graph)
            .await
    }

    async fn seed(&self, project: &str, record: RecordedResource) {
        self.store.put("test", project, &record).await.unwrap();
    }

    fn record(&self, project: &str, name: &str) -> RecordedResource {
        self.store
            .dump("test", project)
            .into_iter()
            .find(|r| r.name.as_str() == name)
            .unwrap_or_else(|| panic!("no record for {name}"))
    }
}

fn widget(name: &str, add: &str) -> Block {
    Block::new("resource")
        .label("widget")
        .label(name)
        .attr("add", Expr::lit(add))
}

fn recorded_widget(name: &str, input: &str, add: &str, out: &str, deps: &[&str]) -> RecordedResource {
    RecordedResource {
        type_: "widget".into(),
        name: name.into(),
        inputs: BTreeMap::from([
            ("input".to_string(), json!(input)),
            ("add".to_string(), json!(add)),
        ]),
        outputs: BTreeMap::from([("out".to_string(), json!(out))]),
        dependencies: deps.iter().map(|d| ResourceName::new(*d)).collect(),
        source_digests: Vec::new(),
    }
}

fn ops(events: &[Event]) -> Vec<(Op, &str)> {
    events.iter().map(|e| (e.op, e.tag.as_str())).collect()
}

#[tokio::test]
async fn fresh_create_runs_the_chain_in_order() {
    let h = harness(4);
    let graph = h.decode(vec![
        widget("s1-a", "s1a").attr("input", Expr::lit("")),
        widget("s1-b", "s1b").attr("input", Expr::reference("widget", "s1-a", "out")),
        widget("s1-c", "s1c").attr("input", Expr::reference("widget", "s1-b", "out")),
    ]);
    h.reconcile("s1", graph).await.unwrap();

    let events = events_tagged(&["s1a", "s1b", "s1c"]);
    assert_eq!(
        ops(&events),
        vec![(Op::Create, "s1a"), (Op::Create, "s1b"), (Op::Create, "s1c")]
    );

    assert_eq!(h.store.dump("test", "s1").len(), 3);
    let b = h.record("s1", "s1-b");
    assert_eq!(b.outputs.get("out").unwrap(), &json!("s1as1b"));
    assert_eq!(b.dependencies, vec![ResourceName::new("s1-a")]);
    let c = h.record("s1", "s1-c");
    assert_eq!(c.outputs.get("out").unwrap(), &json!("s1as1bs1c"));
    assert_eq!(c.dependencies, vec![ResourceName::new("s1-b")]);
}

#[tokio::test]
async fn identical_desired_state_is_a_no_op() {
    let h = harness(4);
    h.seed("s2", recorded_widget("s2-foo", "bar", "s2n", "bars2n", &[]))
        .await;

    let graph = h.decode(vec![widget("s2-foo", "s2n").attr("input", Expr::lit("bar"))]);
    h.reconcile("s2", graph).await.unwrap();

    assert_eq!(events_tagged(&["s2n"]), vec![]);
    // The record is untouched, outputs included.
    let foo = h.record("s2", "s2-foo");
    assert_eq!(foo.outputs.get("out").unwrap(), &json!("bars2n"));
}

#[tokio::test]
async fn updating_a_parent_cascades_to_its_dependents() {
    let h = harness(4);
    h.seed("s3", recorded_widget("s3-a", "", "s3a", "s3a", &[]))
        .await;
    h.seed(
        "s3",
        recorded_widget("s3-b", "s3a", "s3b", "s3as3b", &["s3-a"]),
    )
    .await;

    // Only `a.add` changes in configuration; `b` is dragged along
    // because its input is fed by `a.out`.
    let graph = h.decode(vec![
        widget("s3-a", "s3x").attr("input", Expr::lit("")),
        widget("s3-b", "s3b").attr("input", Expr::reference("widget", "s3-a", "out")),
    ]);
    h.reconcile("s3", graph).await.unwrap();

    let events = events_tagged(&["s3x", "s3b"]);
    assert_eq!(ops(&events), vec![(Op::Update, "s3x"), (Op::Update, "s3b")]);
    assert_eq!(
        h.record("s3", "s3-b").outputs.get("out").unwrap(),
        &json!("s3xs3b")
    );
}

#[tokio::test]
async fn template_fan_in_waits_for_all_producers() {
    let h = harness(4);
    let fan_in = Expr::template(vec![
        Part::Ref(FieldRef::new("widget", "s4-a", "out")),
        Part::Lit(json!("-")),
        Part::Ref(FieldRef::new("widget", "s4-b", "out")),
        Part::Lit(json!("-")),
        Part::Ref(FieldRef::new("widget", "s4-c", "out")),
    ]);
    let graph = h.decode(vec![
        widget("s4-a", "s4a").attr("input", Expr::lit("")),
        widget("s4-b", "s4b").attr("input", Expr::lit("")),
        widget("s4-c", "s4c").attr("input", Expr::lit("")),
        widget("s4-x", "s4x").attr("input", fan_in),
    ]);
    h.reconcile("s4", graph).await.unwrap();

    let events = events_tagged(&["s4a", "s4b", "s4c", "s4x"]);
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.op == Op::Create));
    // Producers land in any order; the consumer is strictly last.
    assert_eq!(events.last().unwrap().tag, "s4x");

    let x = h.record("s4", "s4-x");
    assert_eq!(x.inputs.get("input").unwrap(), &json!("s4a-s4b-s4c"));
    assert_eq!(x.outputs.get("out").unwrap(), &json!("s4a-s4b-s4cs4x"));
}

#[tokio::test]
async fn pruning_deletes_children_before_parents() {
    let h = harness(4);
    h.seed("s5", recorded_widget("s5-a", "", "s5a", "s5a", &[]))
        .await;
    h.seed("s5", recorded_widget("s5-b", "", "s5b", "s5b", &["s5-a"]))
        .await;
    h.seed("s5", recorded_widget("s5-c", "", "s5c", "s5c", &["s5-b"]))
        .await;

    h.reconcile("s5", Graph::new()).await.unwrap();

    let events = events_tagged(&["s5a", "s5b", "s5c"]);
    assert_eq!(
        ops(&events),
        vec![(Op::Delete, "s5c"), (Op::Delete, "s5b"), (Op::Delete, "s5a")]
    );
    assert!(h.store.dump("test", "s5").is_empty());
}

#[tokio::test]
async fn cancellation_stops_in_flight_and_queued_work() {
    let h = harness(1);
    let graph = h.decode(vec![
        Block::new("resource")
            .label("sleeper")
            .label("s6-one")
            .attr("tag", Expr::lit("s6one"))
            .attr("sleep_ms", Expr::lit(5_000)),
        Block::new("resource")
            .label("sleeper")
            .label("s6-two")
            .attr("tag", Expr::lit("s6two"))
            .attr("sleep_ms", Expr::lit(5_000)),
    ]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let err = h
        .reconciler
        .reconcile(&cancel, "test", "s6", graph)
        .await
        .unwrap_err();
    assert!(
        err.chain()
            .any(|cause| cause.downcast_ref::<Cancelled>().is_some()),
        "unexpected error: {err:?}"
    );

    // With one slot, exactly one sleeper got in flight before the
    // cancellation; its sibling never acquired the semaphore. Nothing
    // completed, so nothing was persisted.
    let events = events_tagged(&["s6one", "s6two"]);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].op, Op::Create);
    assert!(h.store.dump("test", "s6").is_empty());
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let h = harness(4);
    let blocks = || {
        vec![
            widget("s7-a", "s7a").attr("input", Expr::lit("")),
            widget("s7-b", "s7b").attr("input", Expr::reference("widget", "s7-a", "out")),
        ]
    };

    h.reconcile("s7", h.decode(blocks())).await.unwrap();
    let after_first = events_tagged(&["s7a", "s7b"]).len();
    assert_eq!(after_first, 2);

    h.reconcile("s7", h.decode(blocks())).await.unwrap();
    assert_eq!(events_tagged(&["s7a", "s7b"]).len(), after_first);
}

#[tokio::test]
async fn shared_parents_are_processed_exactly_once() {
    let h = harness(4);
    // Diamond: b and c both feed on a; x fans both in.
    let graph = h.decode(vec![
        widget("s8-a", "s8a").attr("input", Expr::lit("")),
        widget("s8-b", "s8b").attr("input", Expr::reference("widget", "s8-a", "out")),
        widget("s8-c", "s8c").attr("input", Expr::reference("widget", "s8-a", "out")),
        widget("s8-x", "s8x").attr(
            "input",
            Expr::template(vec![
                Part::Ref(FieldRef::new("widget", "s8-b", "out")),
                Part::Ref(FieldRef::new("widget", "s8-c", "out")),
            ]),
        ),
    ]);
    h.reconcile("s8", graph).await.unwrap();

    let creates_of_a = events_tagged(&["s8a"]);
    assert_eq!(creates_of_a.len(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let h = harness(4);
    test_support::reset_flaky("s9-key");
    let graph = h.decode(vec![Block::new("resource")
        .label("flaky")
        .label("s9-f")
        .attr("key", Expr::lit("s9-key"))
        .attr("succeed_after", Expr::lit(2))]);

    h.reconcile("s9", graph).await.unwrap();

    // Retries of a single call count as one logical invocation.
    assert_eq!(ops(&events_tagged(&["s9-key"])), vec![(Op::Create, "s9-key")]);
    assert_eq!(
        h.record("s9", "s9-f").outputs.get("out").unwrap(),
        &json!("ok")
    );
}

#[tokio::test]
async fn a_failed_parent_short_circuits_its_dependents_only() {
    let h = harness(4);
    test_support::reset_flaky("s10-key");
    let graph = h.decode(vec![
        // Exhausts the retry budget and stays failed.
        Block::new("resource")
            .label("flaky")
            .label("s10-f")
            .attr("key", Expr::lit("s10-key"))
            .attr("succeed_after", Expr::lit(1_000)),
        widget("s10-child", "s10c").attr("input", Expr::reference("flaky", "s10-f", "out")),
        widget("s10-lone", "s10l").attr("input", Expr::lit("")),
    ]);

    let err = h.reconcile("s10", graph).await.unwrap_err();
    assert!(err.to_string().contains("s10-child") || format!("{err:?}").contains("dependency"));

    // The unrelated sibling still converged; the child never ran.
    assert_eq!(ops(&events_tagged(&["s10l"])), vec![(Op::Create, "s10l")]);
    assert_eq!(events_tagged(&["s10c"]), vec![]);
    let names: Vec<_> = h
        .store
        .dump("test", "s10")
        .into_iter()
        .map(|r| r.name.to_string())
        .collect();
    assert_eq!(names, vec!["s10-lone"]);
}

#[tokio::test]
async fn changed_sources_trigger_an_update() {
    let h = harness(4);
    let first = h.decode(vec![
        widget("s11-a", "s11a")
            .attr("input", Expr::lit(""))
            .attr("source", Expr::lit("ff:c2FsdA==:deadbeef")),
    ]);
    h.reconcile("s11", first).await.unwrap();
    assert_eq!(
        h.record("s11", "s11-a").source_digests,
        vec!["deadbeef".to_string()]
    );

    // Same configuration, different archive digest.
    let second = h.decode(vec![
        widget("s11-a", "s11a")
            .attr("input", Expr::lit(""))
            .attr("source", Expr::lit("ff:c2FsdA==:cafe")),
    ]);
    h.reconcile("s11", second).await.unwrap();

    assert_eq!(
        ops(&events_tagged(&["s11a"])),
        vec![(Op::Create, "s11a"), (Op::Update, "s11a")]
    );
    assert_eq!(
        h.record("s11", "s11-a").source_digests,
        vec!["cafe".to_string()]
    );
}

#[tokio::test]
async fn source_refs_read_lazily_from_blob_storage() {
    use tokio::io::AsyncReadExt;

    let h = harness(4);
    h.blobs.put("deadbeef", b"archive bytes".to_vec());

    let descriptor: models::SourceDescriptor = "d:c2FsdA==:deadbeef".parse().unwrap();
    let source = SourceRef::new(descriptor, h.blobs.clone());
    assert_eq!(source.digest(), "deadbeef");
    assert_eq!(source.size(), 13);

    let mut bytes = Vec::new();
    source
        .reader()
        .await
        .unwrap()
        .read_to_end(&mut bytes)
        .await
        .unwrap();
    assert_eq!(bytes, b"archive bytes");
}

#[tokio::test]
async fn bounded_concurrency_serializes_excess_work() {
    let h = harness(2);
    let mut blocks = Vec::new();
    for i in 0..6 {
        blocks.push(
            Block::new("resource")
                .label("sleeper")
                .label(format!("s12-{i}"))
                .attr("tag", Expr::lit(format!("s12t{i}")))
                .attr("sleep_ms", Expr::lit(50)),
        );
    }
    let graph = h.decode(blocks);

    let started = std::time::Instant::now();
    h.reconcile("s12", graph).await.unwrap();
    // Six 50ms sleeps through two slots cannot beat three rounds.
    assert!(started.elapsed() >= Duration::from_millis(140));

    let tags: Vec<String> = (0..6).map(|i| format!("s12t{i}")).collect();
    let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
    assert_eq!(events_tagged(&tag_refs).len(), 6);
}
