use crate::{retry::Retry, Cancelled, SharedError};
use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use graph::{Graph, ResourceId};
use models::{FieldRef, ResourceName, TypeName};
use schema::{
    config_hash, AuthProvider, BlobStore, CreateRequest, DeleteRequest, Registry, Resource,
    Shape, SourceRef, UpdateRequest,
};
use serde_json::Value;
use std::collections::{hash_map::Entry, BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use store::{RecordedGraph, RecordedId, RecordedResource, StateStore};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

type Completion = Result<(), SharedError>;

// What the desired/recorded comparison decided for one resource.
enum Action {
    Create,
    Update {
        rid: RecordedId,
        config_changed: bool,
        source_changed: bool,
    },
}

/// The state of one reconciliation job, shared by every processor task.
pub(crate) struct Run<R: Retry> {
    pub(crate) desired: Graph,
    pub(crate) recorded: RecordedGraph,
    pub(crate) registry: Arc<Registry>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) retry: R,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) persist_timeout: Duration,
    pub(crate) namespace: String,
    pub(crate) project: String,
    pub(crate) cancel: CancellationToken,
    /// Per-resource completion channels. Each resource is processed
    /// exactly once; later arrivals wait on the channel stored by the
    /// first.
    pub(crate) done: std::sync::Mutex<HashMap<ResourceId, watch::Receiver<Option<Completion>>>>,
}

enum Role {
    Processor(watch::Sender<Option<Completion>>),
    Waiter(watch::Receiver<Option<Completion>>),
}

impl<R: Retry> Run<R> {
    /// Processes `id`, or waits for whichever task already is. The
    /// returned future is spawnable and re-entrant from parent waits.
    pub(crate) fn process(run: &Arc<Self>, id: ResourceId) -> BoxFuture<'static, Completion> {
        let run = run.clone();
        async move {
            let role = {
                let mut done = run.done.lock().unwrap();
                match done.entry(id) {
                    Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
                    Entry::Vacant(slot) => {
                        let (tx, rx) = watch::channel(None);
                        slot.insert(rx);
                        Role::Processor(tx)
                    }
                }
            };

            let tx = match role {
                Role::Waiter(mut rx) => return await_completion(&mut rx).await,
                Role::Processor(tx) => tx,
            };

            let result = Self::execute(&run, id).await.map_err(|err| {
                let node = run.desired.resource(id);
                SharedError::from(
                    err.context(format!("resource {}.{}", node.type_name(), node.name())),
                )
            });

            // Value writes into dependents (inside execute) strictly
            // precede this send: a waiter that observes completion may
            // freely read the handler afterward.
            let _ = tx.send(Some(result.clone()));
            result
        }
        .boxed()
    }

    async fn execute(run: &Arc<Self>, id: ResourceId) -> anyhow::Result<()> {
        let node = run.desired.resource(id);
        let (type_, name) = (node.type_name().clone(), node.name().clone());

        // Every producer completes before this resource's handler is
        // touched. Parents run in parallel; any failure fails this
        // resource without invoking it.
        let mut parents: Vec<ResourceId> = Vec::new();
        for dep in run.desired.dependencies(id) {
            for producer in dep.producers() {
                if !parents.contains(producer) {
                    parents.push(*producer);
                }
            }
        }
        let handles: Vec<_> = parents
            .iter()
            .map(|p| (*p, tokio::spawn(Self::process(run, *p))))
            .collect();
        for (pid, handle) in handles {
            let completion = handle
                .await
                .map_err(|err| anyhow::Error::new(err).context("dependency processor panicked"))?;
            if let Err(err) = completion {
                let parent = run.desired.resource(pid);
                return Err(anyhow::Error::new(err).context(format!(
                    "dependency {}.{} failed",
                    parent.type_name(),
                    parent.name(),
                )));
            }
        }

        if run.cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        // Concurrency gate: bounds in-flight handler invocations.
        let _permit = run.acquire_slot(&type_, &name).await?;

        // Lazy readers for attached source archives.
        let sources: Vec<SourceRef> = run
            .desired
            .sources(id)
            .map(|s| SourceRef::new(s.descriptor().clone(), run.blobs.clone()))
            .collect();
        let source_digests: Vec<String> =
            sources.iter().map(|s| s.digest().to_string()).collect();

        let recorded = run.recorded.find(&type_, &name);
        if let Some(rid) = recorded {
            run.recorded.mark_kept(rid);
        }

        let mut handler = node.handler().lock().await;
        let schema = node.schema();
        let desired_hash = config_hash(&type_, &name, schema, |field| handler.get(field));

        let action = match recorded {
            None => Action::Create,
            Some(rid) => {
                let rec = run.recorded.get(rid);
                let recorded_hash = config_hash(&type_, &name, schema, |field| {
                    rec.inputs.get(field).cloned()
                });
                let config_changed = desired_hash != recorded_hash;
                let source_changed = rec.source_digests.iter().collect::<BTreeSet<_>>()
                    != source_digests.iter().collect::<BTreeSet<_>>();

                if !config_changed && !source_changed {
                    // No drift. Swap in the recorded handler so that
                    // dependents read the previously computed outputs.
                    // The swap is safe: this processor owns the handler
                    // until its completion channel closes.
                    *handler = run.revive(rec)?;
                    tracing::debug!(type_ = %type_, name = %name, "no changes");
                    run.notify_dependents(id, handler.as_ref()).await?;
                    return Ok(());
                }

                // Carry recorded outputs forward so consumers observe
                // them until `update` overwrites them. Inputs set by
                // the desired configuration are left alone.
                for (field, value) in &rec.outputs {
                    if schema.outputs().any(|f| f.name.as_str() == field) {
                        if let Err(err) = handler.set(field, value.clone()) {
                            tracing::debug!(%err, field = %field, "skipping stale recorded output");
                        }
                    }
                }
                Action::Update {
                    rid,
                    config_changed,
                    source_changed,
                }
            }
        };

        // Invoke the lifecycle under the retry policy. The handler call
        // itself races cancellation; retries never outlive it.
        let mut retry = run.retry.clone();
        retry.reset();
        loop {
            let attempt = async {
                match &action {
                    Action::Create => {
                        tracing::info!(type_ = %type_, name = %name, "creating resource");
                        handler
                            .create(CreateRequest {
                                auth: run.auth.clone(),
                                sources: sources.clone(),
                            })
                            .await
                    }
                    Action::Update {
                        rid,
                        config_changed,
                        source_changed,
                    } => {
                        tracing::info!(
                            type_ = %type_,
                            name = %name,
                            config_changed,
                            source_changed,
                            "updating resource",
                        );
                        let previous = run.revive(run.recorded.get(*rid))?;
                        handler
                            .update(UpdateRequest {
                                auth: run.auth.clone(),
                                sources: sources.clone(),
                                previous,
                                config_changed: *config_changed,
                                source_changed: *source_changed,
                            })
                            .await
                    }
                }
            };
            let result = tokio::select! {
                result = attempt => result,
                () = run.cancel.cancelled() => return Err(Cancelled.into()),
            };

            match result {
                Ok(()) => break,
                Err(err) => match retry.next_backoff(&err) {
                    Some(delay) => {
                        tracing::warn!(
                            type_ = %type_,
                            name = %name,
                            %err,
                            delay_ms = delay.as_millis() as u64,
                            "lifecycle call failed; retrying",
                        );
                        tokio::select! {
                            () = tokio::time::sleep(delay) => (),
                            () = run.cancel.cancelled() => return Err(Cancelled.into()),
                        }
                    }
                    None => return Err(err),
                },
            }
        }

        // Record the committed result. A fresh timeout bounds this
        // write so a cancelled caller still gets its side effects
        // recorded.
        let record = RecordedResource {
            type_: type_.clone(),
            name: name.clone(),
            inputs: collect_fields(schema.inputs(), handler.as_ref()),
            outputs: collect_fields(schema.outputs(), handler.as_ref()),
            dependencies: parents
                .iter()
                .map(|p| run.desired.resource(*p).name().clone())
                .collect(),
            source_digests,
        };
        tokio::time::timeout(
            run.persist_timeout,
            run.store.put(&run.namespace, &run.project, &record),
        )
        .await
        .map_err(|_| anyhow::anyhow!("persisting {}.{} timed out", type_, name))?
        .with_context(|| format!("persisting {}.{}", type_, name))?;

        run.notify_dependents(id, handler.as_ref()).await?;
        Ok(())
    }

    /// Forwards this resource's resolved fields into the expressions of
    /// its outbound dependency edges. Whichever producer completes an
    /// edge last evaluates it and assigns the consumer's input.
    async fn notify_dependents(&self, id: ResourceId, handler: &dyn Resource) -> anyhow::Result<()> {
        let node = self.desired.resource(id);
        let (type_, name) = (node.type_name(), node.name());

        for dep_id in self.desired.dependent_ids(id) {
            let dep = self.desired.dependency(*dep_id);

            let resolved = {
                let mut expr = dep.expr().lock().unwrap();
                let mine: Vec<FieldRef> = expr
                    .fields()
                    .into_iter()
                    .filter(|f| f.type_ == *type_ && f.name == *name)
                    .cloned()
                    .collect();
                for reference in mine {
                    let value = handler.get(reference.field.as_str()).unwrap_or(Value::Null);
                    expr.set_ref(&reference, &value)
                        .with_context(|| format!("substituting {reference}"))?;
                }
                if expr.is_static() {
                    Some(expr.evaluate(&BTreeMap::new())?)
                } else {
                    None
                }
            };

            if let Some(value) = resolved {
                let consumer = self.desired.resource(dep.consumer());
                let mut child = consumer.handler().lock().await;
                child
                    .set(dep.target_field().as_str(), value)
                    .with_context(|| {
                        format!(
                            "assigning {}.{}.{} from {}.{}",
                            consumer.type_name(),
                            consumer.name(),
                            dep.target_field(),
                            type_,
                            name,
                        )
                    })?;
            }
        }
        Ok(())
    }

    // Waits for a semaphore slot, emitting a periodic progress note
    // with exponential backoff capped at five seconds.
    async fn acquire_slot(
        &self,
        type_: &TypeName,
        name: &ResourceName,
    ) -> anyhow::Result<OwnedSemaphorePermit> {
        let acquire = self.semaphore.clone().acquire_owned();
        tokio::pin!(acquire);
        let mut wait = Duration::from_millis(100);
        loop {
            tokio::select! {
                permit = &mut acquire => {
                    return permit.map_err(|_| anyhow::anyhow!("execution semaphore closed"));
                }
                () = self.cancel.cancelled() => return Err(Cancelled.into()),
                () = tokio::time::sleep(wait) => {
                    tracing::debug!(type_ = %type_, name = %name, "waiting for an execution slot");
                    wait = (wait * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    // Rebuilds a live handler from its persisted inputs and outputs.
    fn revive(&self, rec: &RecordedResource) -> anyhow::Result<Box<dyn Resource>> {
        let mut handler = self.registry.new_resource(&rec.type_)?;
        for (field, value) in rec.inputs.iter().chain(rec.outputs.iter()) {
            handler
                .set(field, value.clone())
                .with_context(|| format!("restoring recorded {}.{}", rec.type_, rec.name))?;
        }
        Ok(handler)
    }

    /// Deletes recorded resources with no desired counterpart, children
    /// before parents. A delete failure ends the pass.
    pub(crate) async fn prune(&self) -> anyhow::Result<()> {
        for rec in self.recorded.remaining() {
            if self.cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            tracing::info!(type_ = %rec.type_, name = %rec.name, "deleting unused resource");

            let mut handler = self.revive(rec)?;
            let result = tokio::select! {
                result = handler.delete(DeleteRequest { auth: self.auth.clone() }) => result,
                () = self.cancel.cancelled() => return Err(Cancelled.into()),
            };
            result.with_context(|| format!("deleting {}.{}", rec.type_, rec.name))?;

            tokio::time::timeout(
                self.persist_timeout,
                self.store
                    .delete(&self.namespace, &self.project, &rec.type_, &rec.name),
            )
            .await
            .map_err(|_| anyhow::anyhow!("removing record of {}.{} timed out", rec.type_, rec.name))?
            .with_context(|| format!("removing record of {}.{}", rec.type_, rec.name))?;
        }
        Ok(())
    }
}

async fn await_completion(rx: &mut watch::Receiver<Option<Completion>>) -> Completion {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value)
            .clone()
            .unwrap_or_else(|| Err(SharedError::from(anyhow::Error::new(Cancelled)))),
        Err(_closed) => Err(SharedError::from(anyhow::Error::new(Cancelled))),
    }
}

fn collect_fields<'s>(
    fields: impl Iterator<Item = &'s schema::Field>,
    handler: &dyn Resource,
) -> BTreeMap<String, Value> {
    fields
        .filter_map(|field| match handler.get(field.name.as_str()) {
            Some(value) if !value.is_null() => Some((field.name.to_string(), value)),
            _ => None,
        })
        .collect()
}
