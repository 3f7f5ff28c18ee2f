//! The concurrent execution core: drives recorded state toward the
//! desired graph by invoking per-resource lifecycle operations in
//! dependency order, bounded by a semaphore, with resolved output
//! values propagated to downstream inputs between operations.

mod retry;
mod run;

pub use retry::{Backoff, ExponentialBackoff, NoRetry, Retry};

use graph::Graph;
use schema::{AuthProvider, BlobStore, Registry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use store::{RecordedGraph, StateStore};
use tokio_util::sync::CancellationToken;

/// The reconciliation was cancelled before this operation could run.
#[derive(thiserror::Error, Debug, Clone, Copy)]
#[error("reconciliation was cancelled")]
pub struct Cancelled;

/// A cloneable error, so that one resource's failure can be observed by
/// every dependent awaiting its completion.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl From<anyhow::Error> for SharedError {
    fn from(error: anyhow::Error) -> Self {
        SharedError(Arc::new(error))
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum concurrently executing lifecycle operations.
    pub concurrency: usize,
    /// Budget for recording a committed side effect in the state
    /// store. Counted against a fresh context, so that a cancelled
    /// reconciliation still records what already happened.
    #[serde(with = "humantime_serde")]
    pub persist_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            concurrency: 2 * cpus,
            persist_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconciler compares desired against recorded state and drives the
/// deployed world toward the desired one.
pub struct Reconciler<R: Retry = ExponentialBackoff> {
    registry: Arc<Registry>,
    store: Arc<dyn StateStore>,
    blobs: Arc<dyn BlobStore>,
    auth: Arc<dyn AuthProvider>,
    config: Config,
    retry: R,
}

impl<R: Retry> Reconciler<R> {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn StateStore>,
        blobs: Arc<dyn BlobStore>,
        auth: Arc<dyn AuthProvider>,
        config: Config,
        retry: R,
    ) -> Self {
        Self {
            registry,
            store,
            blobs,
            auth,
            config,
            retry,
        }
    }

    /// Runs one reconciliation of `desired` against the recorded state
    /// of `(namespace, project)`: the create/update pass over the
    /// desired graph, then the prune pass over recorded resources that
    /// no longer appear in it.
    pub async fn reconcile(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        project: &str,
        desired: Graph,
    ) -> anyhow::Result<()> {
        use anyhow::Context;

        let listed = self
            .store
            .list(namespace, project)
            .await
            .context("listing recorded resources")?;
        let recorded = RecordedGraph::build(listed)?;

        tracing::info!(
            namespace,
            project,
            desired = desired.len(),
            recorded = recorded.len(),
            "starting reconciliation",
        );

        let run = Arc::new(run::Run {
            desired,
            recorded,
            registry: self.registry.clone(),
            store: self.store.clone(),
            blobs: self.blobs.clone(),
            auth: self.auth.clone(),
            retry: self.retry.clone(),
            semaphore: Arc::new(tokio::sync::Semaphore::new(self.config.concurrency)),
            persist_timeout: self.config.persist_timeout,
            namespace: namespace.to_string(),
            project: project.to_string(),
            cancel: cancel.clone(),
            done: Default::default(),
        });

        // Create/update pass: one processor task per sink; each
        // recursively completes its dependencies first. Every task is
        // awaited so siblings of a failed subtree run to their own
        // conclusion before the error surfaces.
        let handles: Vec<_> = run
            .desired
            .sinks()
            .into_iter()
            .map(|id| (id, tokio::spawn(run::Run::process(&run, id))))
            .collect();

        let mut first_error = None;
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result.map_err(anyhow::Error::new),
                Err(join_err) => Err(anyhow::Error::new(join_err)),
            };
            if let Err(err) = result {
                let node = run.desired.resource(id);
                tracing::warn!(
                    type_ = %node.type_name(),
                    name = %node.name(),
                    err = %err,
                    "resource failed",
                );
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        run.prune().await
    }
}
