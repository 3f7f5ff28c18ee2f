use lazy_static::lazy_static;
use schema::{resource, CreateRequest, DeleteRequest, Resource, Transient, UpdateRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Update,
    Delete,
}

/// One observed lifecycle call. Tests filter the shared log by the
/// tags they minted, so suites can run in parallel within one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub op: Op,
    pub tag: String,
}

lazy_static! {
    static ref EVENTS: Mutex<Vec<Event>> = Mutex::new(Vec::new());
    static ref FLAKY_ATTEMPTS: Mutex<BTreeMap<String, u64>> = Mutex::new(BTreeMap::new());
}

fn record(op: Op, tag: &str) {
    EVENTS.lock().unwrap().push(Event {
        op,
        tag: tag.to_string(),
    });
}

/// Lifecycle events whose tag is among `tags`, in observed order.
pub fn events_tagged(tags: &[&str]) -> Vec<Event> {
    EVENTS
        .lock()
        .unwrap()
        .iter()
        .filter(|e| tags.contains(&e.tag.as_str()))
        .cloned()
        .collect()
}

/// Clears the attempt counter of one [`Flaky`] key.
pub fn reset_flaky(key: &str) {
    FLAKY_ATTEMPTS.lock().unwrap().remove(key);
}

resource! {
    /// Widget computes `out = input + add`. With `input` fed from a
    /// parent's `out`, chains of widgets concatenate their `add`
    /// fields, which makes execution order observable in the result.
    pub struct Widget ("widget") {
        input input: String { optional },
        input add: String {},
        output out: Option<String> {},
    }
}

#[async_trait::async_trait]
impl Resource for Widget {
    async fn create(&mut self, _req: CreateRequest) -> anyhow::Result<()> {
        self.out = Some(format!("{}{}", self.input, self.add));
        record(Op::Create, &self.add);
        Ok(())
    }

    async fn update(&mut self, _req: UpdateRequest) -> anyhow::Result<()> {
        self.out = Some(format!("{}{}", self.input, self.add));
        record(Op::Update, &self.add);
        Ok(())
    }

    async fn delete(&mut self, _req: DeleteRequest) -> anyhow::Result<()> {
        record(Op::Delete, &self.add);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

resource! {
    /// Endpoint exercises validation predicates and nested blocks.
    pub struct Endpoint ("endpoint") {
        input region: String { one_of: ["eu-west-1", "us-east-1"] },
        input port: u64 { range: 1..=65535 },
        input comment: Option<String> { optional },
        input headers: Vec<Header> { optional, blocks },
        output url: Option<String> {},
    }
}

#[async_trait::async_trait]
impl Resource for Endpoint {
    async fn create(&mut self, _req: CreateRequest) -> anyhow::Result<()> {
        self.url = Some(format!("https://{}:{}", self.region, self.port));
        Ok(())
    }

    async fn update(&mut self, _req: UpdateRequest) -> anyhow::Result<()> {
        self.url = Some(format!("https://{}:{}", self.region, self.port));
        Ok(())
    }

    async fn delete(&mut self, _req: DeleteRequest) -> anyhow::Result<()> {
        Ok(())
    }
}

resource! {
    /// Sleeper stalls inside `create`, long enough for a test to
    /// cancel it mid-flight.
    pub struct Sleeper ("sleeper") {
        input tag: String {},
        input sleep_ms: u64 { optional },
        output done: Option<bool> {},
    }
}

#[async_trait::async_trait]
impl Resource for Sleeper {
    async fn create(&mut self, _req: CreateRequest) -> anyhow::Result<()> {
        record(Op::Create, &self.tag);
        tokio::time::sleep(std::time::Duration::from_millis(self.sleep_ms)).await;
        self.done = Some(true);
        Ok(())
    }

    async fn update(&mut self, _req: UpdateRequest) -> anyhow::Result<()> {
        record(Op::Update, &self.tag);
        tokio::time::sleep(std::time::Duration::from_millis(self.sleep_ms)).await;
        self.done = Some(true);
        Ok(())
    }

    async fn delete(&mut self, _req: DeleteRequest) -> anyhow::Result<()> {
        record(Op::Delete, &self.tag);
        Ok(())
    }
}

resource! {
    /// Flaky fails its first `succeed_after` create attempts with a
    /// transient error, then succeeds.
    pub struct Flaky ("flaky") {
        input key: String {},
        input succeed_after: u64 { optional },
        output out: Option<String> {},
    }
}

#[async_trait::async_trait]
impl Resource for Flaky {
    async fn create(&mut self, _req: CreateRequest) -> anyhow::Result<()> {
        let attempt = {
            let mut attempts = FLAKY_ATTEMPTS.lock().unwrap();
            let n = attempts.entry(self.key.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= self.succeed_after {
            return Err(Transient::because(anyhow::anyhow!(
                "attempt {attempt} of {:?} failed",
                self.key
            )));
        }
        self.out = Some("ok".to_string());
        record(Op::Create, &self.key);
        Ok(())
    }

    async fn update(&mut self, _req: UpdateRequest) -> anyhow::Result<()> {
        self.out = Some("ok".to_string());
        record(Op::Update, &self.key);
        Ok(())
    }

    async fn delete(&mut self, _req: DeleteRequest) -> anyhow::Result<()> {
        record(Op::Delete, &self.key);
        Ok(())
    }
}
