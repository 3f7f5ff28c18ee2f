use crate::{Graph, GraphError};
use models::{Expr, FieldRef, ResourceName, SourceDescriptor, TypeName};
use schema::{Registry, Shape};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A serializable image of a desired graph: resources with their
/// current field values and attached sources, plus dependency edges.
/// Restoring requires a registry, because handlers are living instances
/// rather than data.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub resources: Vec<ResourceSnapshot>,
    pub dependencies: Vec<DependencySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(rename = "type")]
    pub type_: TypeName,
    pub name: ResourceName,
    /// Set fields of the handler, inputs and outputs alike, by external
    /// name. Unset optionals are omitted.
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    /// The consumer input field this edge targets.
    pub target: FieldRef,
    pub expr: Expr,
}

#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
    #[error(transparent)]
    NotSupported(#[from] schema::NotSupported),
    #[error("restoring {type_}.{name}")]
    Field {
        type_: TypeName,
        name: ResourceName,
        #[source]
        source: schema::SetFieldError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl Graph {
    /// Captures a serializable image of this graph. Exclusive access is
    /// required because handler state is read outside of any lock.
    pub fn snapshot(&mut self) -> Snapshot {
        let mut resources = Vec::new();

        let ids: Vec<_> = self.resources().map(|(id, _)| id).collect();
        for id in ids {
            let node = self.resource(id);
            let (type_, name, schema) =
                (node.type_name().clone(), node.name().clone(), node.schema().clone());
            let sources = self
                .sources(id)
                .map(|s| s.descriptor().clone())
                .collect::<Vec<_>>();

            let handler = self.handler_mut(id);
            let mut fields = BTreeMap::new();
            for field in &schema.fields {
                match handler.get(field.name.as_str()) {
                    Some(value) if !value.is_null() => {
                        fields.insert(field.name.to_string(), value);
                    }
                    _ => (),
                }
            }

            resources.push(ResourceSnapshot {
                type_,
                name,
                fields,
                sources,
            });
        }

        let dependencies = self
            .resources()
            .flat_map(|(id, node)| {
                self.dependency_ids(id)
                    .iter()
                    .map(|d| self.dependency(*d))
                    .map(move |dep| DependencySnapshot {
                        target: FieldRef {
                            type_: node.type_name().clone(),
                            name: node.name().clone(),
                            field: dep.target_field().clone(),
                        },
                        expr: dep.expr().lock().unwrap().clone(),
                    })
            })
            .collect();

        Snapshot {
            resources,
            dependencies,
        }
    }

    /// Rebuilds a graph from a snapshot, instantiating handlers through
    /// `registry`. The result preserves resources, sources, and
    /// dependency edges up to node identity.
    pub fn restore(snapshot: &Snapshot, registry: &Registry) -> Result<Self, RestoreError> {
        let mut graph = Graph::new();

        for resource in &snapshot.resources {
            let mut handler = registry.new_resource(&resource.type_)?;
            for (field, value) in &resource.fields {
                handler
                    .set(field, value.clone())
                    .map_err(|source| RestoreError::Field {
                        type_: resource.type_.clone(),
                        name: resource.name.clone(),
                        source,
                    })?;
            }

            let id = graph.add_resource(resource.name.clone(), handler)?;
            for descriptor in &resource.sources {
                graph.add_source(id, descriptor.clone());
            }
        }

        for dep in &snapshot.dependencies {
            graph.add_dependency(dep.target.clone(), dep.expr.clone())?;
        }
        Ok(graph)
    }
}
