mod snapshot;

pub use snapshot::{DependencySnapshot, ResourceSnapshot, RestoreError, Snapshot};

use models::{Expr, FieldName, FieldRef, ResourceName, SourceDescriptor, TypeName};
use schema::{Resource, Schema, Shape};
use std::collections::{BTreeMap, BTreeSet};

/// Index of a resource node within its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(usize);

/// Index of a source node within its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(usize);

/// Index of a dependency node within its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyId(usize);

#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("resource {type_}.{name} is already defined")]
    DuplicateResource {
        type_: TypeName,
        name: ResourceName,
    },
    #[error("dependency target {target} is not in the graph")]
    MissingTarget { target: FieldRef },
    #[error("dependency producer {producer} is not in the graph")]
    MissingProducer { producer: FieldRef },
    #[error("the graph contains a dependency cycle")]
    Cycle,
}

/// A resource node: identity, the handler instance it exclusively owns,
/// and adjacency. The handler sits behind an async mutex because during
/// reconciliation producers briefly write resolved values into their
/// consumers' handlers; the schema is captured at insertion so that
/// introspection never takes the lock.
pub struct ResourceNode {
    type_: TypeName,
    name: ResourceName,
    schema: Schema,
    handler: tokio::sync::Mutex<Box<dyn Resource>>,
    inbound: Vec<DependencyId>,
    outbound: Vec<DependencyId>,
    sources: Vec<SourceId>,
}

impl ResourceNode {
    pub fn type_name(&self) -> &TypeName {
        &self.type_
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn handler(&self) -> &tokio::sync::Mutex<Box<dyn Resource>> {
        &self.handler
    }
}

/// A source node: one content-addressed archive attached to exactly one
/// resource.
pub struct SourceNode {
    resource: ResourceId,
    descriptor: SourceDescriptor,
}

impl SourceNode {
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

/// A dependency edge-node. A plain producer→consumer arrow cannot carry
/// this structure: one consumer input may fan in several producers
/// under a single expression, and the node owns that expression. The
/// expression is interiorly mutable because producers substitute their
/// resolved outputs into it as they complete.
pub struct DependencyNode {
    producers: Vec<ResourceId>,
    consumer: ResourceId,
    target_field: FieldName,
    expr: std::sync::Mutex<Expr>,
}

impl DependencyNode {
    pub fn producers(&self) -> &[ResourceId] {
        &self.producers
    }

    pub fn consumer(&self) -> ResourceId {
        self.consumer
    }

    pub fn target_field(&self) -> &FieldName {
        &self.target_field
    }

    pub fn expr(&self) -> &std::sync::Mutex<Expr> {
        &self.expr
    }
}

/// The desired dependency graph of one project: resource nodes, their
/// attached sources, and labeled dependency edges. Topology is fixed
/// once decoding completes; reconciliation only mutates handler state
/// and edge expressions.
#[derive(Default)]
pub struct Graph {
    resources: Vec<ResourceNode>,
    sources: Vec<SourceNode>,
    dependencies: Vec<DependencyNode>,
    by_name: BTreeMap<(TypeName, ResourceName), ResourceId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource node owning `handler`. No two resources may
    /// share a `(type, name)` identity.
    pub fn add_resource(
        &mut self,
        name: ResourceName,
        handler: Box<dyn Resource>,
    ) -> Result<ResourceId, GraphError> {
        let type_ = TypeName::new(handler.type_name());
        let key = (type_.clone(), name.clone());
        if self.by_name.contains_key(&key) {
            return Err(GraphError::DuplicateResource { type_, name });
        }

        let id = ResourceId(self.resources.len());
        self.resources.push(ResourceNode {
            schema: handler.schema(),
            type_,
            name,
            handler: tokio::sync::Mutex::new(handler),
            inbound: Vec::new(),
            outbound: Vec::new(),
            sources: Vec::new(),
        });
        self.by_name.insert(key, id);
        Ok(id)
    }

    /// Attaches a source archive to `resource`.
    pub fn add_source(&mut self, resource: ResourceId, descriptor: SourceDescriptor) -> SourceId {
        let id = SourceId(self.sources.len());
        self.sources.push(SourceNode {
            resource,
            descriptor,
        });
        self.resources[resource.0].sources.push(id);
        id
    }

    /// Adds a dependency node targeting the input field named by
    /// `target`, labeled with `expr`. Edges are drawn from every
    /// distinct producer the expression references. Fails if the target
    /// or any producer is not in the graph.
    pub fn add_dependency(
        &mut self,
        target: FieldRef,
        expr: Expr,
    ) -> Result<DependencyId, GraphError> {
        let consumer = self
            .lookup(&target.type_, &target.name)
            .ok_or_else(|| GraphError::MissingTarget {
                target: target.clone(),
            })?;

        let mut producers = Vec::new();
        for field in expr.fields() {
            let producer = self.lookup(&field.type_, &field.name).ok_or_else(|| {
                GraphError::MissingProducer {
                    producer: field.clone(),
                }
            })?;
            if !producers.contains(&producer) {
                producers.push(producer);
            }
        }

        let id = DependencyId(self.dependencies.len());
        for producer in &producers {
            self.resources[producer.0].outbound.push(id);
        }
        self.resources[consumer.0].inbound.push(id);
        self.dependencies.push(DependencyNode {
            producers,
            consumer,
            target_field: target.field,
            expr: std::sync::Mutex::new(expr),
        });
        Ok(id)
    }

    pub fn lookup(&self, type_: &str, name: &str) -> Option<ResourceId> {
        self.by_name
            .get(&(TypeName::new(type_), ResourceName::new(name)))
            .copied()
    }

    pub fn resource(&self, id: ResourceId) -> &ResourceNode {
        &self.resources[id.0]
    }

    /// Exclusive handler access for the decode phase, before the graph
    /// is shared.
    pub fn handler_mut(&mut self, id: ResourceId) -> &mut Box<dyn Resource> {
        self.resources[id.0].handler.get_mut()
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &ResourceNode)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, node)| (ResourceId(i), node))
    }

    pub fn dependency(&self, id: DependencyId) -> &DependencyNode {
        &self.dependencies[id.0]
    }

    /// Inbound dependency nodes of `id`: the edges it consumes.
    pub fn dependencies(&self, id: ResourceId) -> impl Iterator<Item = &DependencyNode> {
        self.resources[id.0]
            .inbound
            .iter()
            .map(|d| &self.dependencies[d.0])
    }

    pub fn dependency_ids(&self, id: ResourceId) -> &[DependencyId] {
        &self.resources[id.0].inbound
    }

    /// Outbound dependency nodes of `id`: the edges it feeds.
    pub fn dependents(&self, id: ResourceId) -> impl Iterator<Item = &DependencyNode> {
        self.resources[id.0]
            .outbound
            .iter()
            .map(|d| &self.dependencies[d.0])
    }

    pub fn dependent_ids(&self, id: ResourceId) -> &[DependencyId] {
        &self.resources[id.0].outbound
    }

    pub fn sources(&self, id: ResourceId) -> impl Iterator<Item = &SourceNode> {
        self.resources[id.0]
            .sources
            .iter()
            .map(|s| &self.sources[s.0])
    }

    /// Resource ids with no dependents: the sinks where reconciliation
    /// starts.
    pub fn sinks(&self) -> Vec<ResourceId> {
        self.resources()
            .filter(|(_, node)| node.outbound.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Deterministic topological order: producers before consumers,
    /// ties broken by insertion order.
    pub fn topological(&self) -> Result<Vec<ResourceId>, GraphError> {
        let mut indegree = vec![0usize; self.resources.len()];
        for dep in &self.dependencies {
            indegree[dep.consumer.0] += dep.producers.len();
        }

        let mut ready: BTreeSet<ResourceId> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| ResourceId(i))
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(&id) = ready.iter().next() {
            ready.remove(&id);
            order.push(id);

            for dep in &self.resources[id.0].outbound {
                let consumer = self.dependencies[dep.0].consumer;
                indegree[consumer.0] -= 1;
                if indegree[consumer.0] == 0 {
                    ready.insert(consumer);
                }
            }
        }

        if order.len() != self.resources.len() {
            return Err(GraphError::Cycle);
        }
        Ok(order)
    }

    /// True when a directed dependency path leads from `src` to `dst`.
    pub fn reaches(&self, src: ResourceId, dst: ResourceId) -> bool {
        pathfinding::directed::bfs::bfs(
            &src,
            |id| {
                self.resources[id.0]
                    .outbound
                    .iter()
                    .map(|d| self.dependencies[d.0].consumer)
                    .collect::<Vec<_>>()
            },
            |id| *id == dst,
        )
        .is_some()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field(
                "resources",
                &self
                    .resources
                    .iter()
                    .map(|r| format!("{}.{}", r.type_, r.name))
                    .collect::<Vec<_>>(),
            )
            .field("sources", &self.sources.len())
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}
