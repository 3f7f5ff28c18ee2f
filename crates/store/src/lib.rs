mod recorded;

pub use recorded::{RecordedCycle, RecordedGraph, RecordedId};

use models::{ResourceName, TypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The persisted form of a resource, as written after a successful
/// lifecycle call and read back at the start of the next
/// reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResource {
    #[serde(rename = "type")]
    pub type_: TypeName,
    pub name: ResourceName,
    /// Input field values by external name, as last applied.
    pub inputs: BTreeMap<String, Value>,
    /// Output field values by external name, as last computed.
    pub outputs: BTreeMap<String, Value>,
    /// Names of the resources this resource depended on when persisted.
    /// Deletion order is reconstructed from these.
    #[serde(default)]
    pub dependencies: Vec<ResourceName>,
    /// Digests of the source archives attached when persisted.
    #[serde(default)]
    pub source_digests: Vec<String>,
}

/// StateStore records deployed resources per `(namespace, project)`.
/// Implementations (file, database, object storage) live with the
/// embedding application; the core only requires these three
/// operations.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Upserts a resource, keyed by its `(type, name)` identity.
    async fn put(
        &self,
        namespace: &str,
        project: &str,
        resource: &RecordedResource,
    ) -> anyhow::Result<()>;

    async fn delete(
        &self,
        namespace: &str,
        project: &str,
        type_: &str,
        name: &str,
    ) -> anyhow::Result<()>;

    /// Lists all recorded resources of a project. Order is unspecified.
    async fn list(&self, namespace: &str, project: &str) -> anyhow::Result<Vec<RecordedResource>>;
}
