use crate::{Resource, Schema, Shape};
use std::collections::BTreeMap;

// Suggestions are offered for names within this OSA edit distance.
const SUGGEST_DISTANCE: usize = 5;

#[derive(thiserror::Error, Debug)]
#[error("resource type {type_name:?} is not supported")]
pub struct NotSupported {
    pub type_name: String,
    /// Closest registered type name by edit distance, if any is close.
    pub suggest: Option<String>,
}

struct Entry {
    factory: Box<dyn Fn() -> Box<dyn Resource> + Send + Sync>,
    schema: Schema,
}

/// Registry maps resource type tags to handler factories, with the
/// handler's schema precomputed at registration so that lookups never
/// need an instance.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<&'static str, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler type under its type tag.
    pub fn register<R: Resource + Default + 'static>(mut self) -> Self {
        let probe = R::default();
        let (type_name, schema) = (probe.type_name(), probe.schema());

        if self.entries.contains_key(type_name) {
            panic!("a resource type {type_name:?} is already registered");
        }
        self.entries.insert(
            type_name,
            Entry {
                factory: Box::new(|| Box::new(R::default())),
                schema,
            },
        );
        self
    }

    /// Returns a fresh, zero-initialized handler for the type tag.
    pub fn new_resource(&self, type_name: &str) -> Result<Box<dyn Resource>, NotSupported> {
        match self.entries.get(type_name) {
            Some(entry) => Ok((entry.factory)()),
            None => Err(NotSupported {
                type_name: type_name.to_string(),
                suggest: self.suggest(type_name).map(str::to_string),
            }),
        }
    }

    pub fn schema(&self, type_name: &str) -> Option<&Schema> {
        self.entries.get(type_name).map(|e| &e.schema)
    }

    /// The closest registered type name by edit distance, or `None`
    /// when nothing registered is close enough to be worth suggesting.
    pub fn suggest(&self, type_name: &str) -> Option<&'static str> {
        self.entries
            .keys()
            .filter_map(|&name| {
                let dist = strsim::osa_distance(type_name, name);
                (dist <= SUGGEST_DISTANCE).then_some((dist, name))
            })
            .min()
            .map(|(_, name)| name)
    }

    /// Registered type tags, in lexicographic order.
    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}
