use schema::{AuthProvider, BlobStore};
use store::{RecordedResource, StateStore};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::io::AsyncRead;

type Key = (String, String, String, String); // (namespace, project, type, name)

/// An in-memory [`StateStore`].
#[derive(Default)]
pub struct MemoryStateStore {
    items: Mutex<BTreeMap<Key, RecordedResource>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous view of a project's records, sorted by name, for
    /// test assertions.
    pub fn dump(&self, namespace: &str, project: &str) -> Vec<RecordedResource> {
        let items = self.items.lock().unwrap();
        items
            .iter()
            .filter(|((ns, p, _, _), _)| ns == namespace && p == project)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn put(
        &self,
        namespace: &str,
        project: &str,
        resource: &RecordedResource,
    ) -> anyhow::Result<()> {
        let key = (
            namespace.to_string(),
            project.to_string(),
            resource.type_.to_string(),
            resource.name.to_string(),
        );
        self.items.lock().unwrap().insert(key, resource.clone());
        Ok(())
    }

    async fn delete(
        &self,
        namespace: &str,
        project: &str,
        type_: &str,
        name: &str,
    ) -> anyhow::Result<()> {
        let key = (
            namespace.to_string(),
            project.to_string(),
            type_.to_string(),
            name.to_string(),
        );
        self.items.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn list(&self, namespace: &str, project: &str) -> anyhow::Result<Vec<RecordedResource>> {
        Ok(self.dump(namespace, project))
    }
}

/// An in-memory [`BlobStore`] of keyed byte blobs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.lock().unwrap().insert(key.into(), bytes.into());
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let bytes = self
            .blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no blob for key {key:?}"))?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }
}

/// An [`AuthProvider`] that hands out a fixed token.
#[derive(Default)]
pub struct StaticAuth;

#[async_trait::async_trait]
impl AuthProvider for StaticAuth {
    async fn token(&self, _scopes: &[&str]) -> anyhow::Result<String> {
        Ok("test-token".to_string())
    }
}
