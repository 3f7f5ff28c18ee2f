use crate::{Resource, SourceRef};
use std::sync::Arc;

/// AuthProvider supplies credentials to lifecycle operations. Concrete
/// providers (service accounts, instance metadata, ...) live with the
/// embedding application.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns a bearer credential for the given scopes.
    async fn token(&self, scopes: &[&str]) -> anyhow::Result<String>;
}

pub struct CreateRequest {
    pub auth: Arc<dyn AuthProvider>,
    /// Source archives attached to the resource, opened lazily.
    pub sources: Vec<SourceRef>,
}

pub struct UpdateRequest {
    pub auth: Arc<dyn AuthProvider>,
    pub sources: Vec<SourceRef>,
    /// The handler as last recorded, with its persisted inputs and outputs.
    pub previous: Box<dyn Resource>,
    /// True when the hash of declared inputs differs from the record.
    pub config_changed: bool,
    /// True when the attached source digests differ from the record.
    pub source_changed: bool,
}

pub struct DeleteRequest {
    pub auth: Arc<dyn AuthProvider>,
}
