use crate::RecordedResource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Index of a recorded resource within its [`RecordedGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordedId(usize);

#[derive(thiserror::Error, Debug)]
#[error("recorded resources contain a dependency cycle")]
pub struct RecordedCycle;

/// The recorded graph of one project: recorded resources wired together
/// by their persisted dependency names. It exists to answer two
/// questions during reconciliation: which recorded resource matches a
/// desired one, and in what order must the unmatched rest be deleted.
///
/// It is built even when the desired graph is empty, because pruning a
/// torn-down project still requires the recorded deletion order.
pub struct RecordedGraph {
    resources: Vec<RecordedResource>,
    /// Parents-first topological order over `resources`.
    order: Vec<usize>,
    /// Indices of recorded resources matched to a desired resource.
    kept: Mutex<BTreeSet<usize>>,
}

impl RecordedGraph {
    /// Arranges the state store's listing into a graph. The listing
    /// order is unspecified, so resources are first sorted by name to
    /// make the derived deletion order deterministic. Dependency names
    /// that no longer resolve are ignored; they refer to resources
    /// already deleted.
    pub fn build(mut resources: Vec<RecordedResource>) -> Result<Self, RecordedCycle> {
        resources.sort_by(|a, b| a.name.cmp(&b.name));

        let by_name: BTreeMap<&str, usize> = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.as_str(), i))
            .collect();

        // Kahn's algorithm, parents first, smallest index breaking ties.
        let mut children = vec![Vec::new(); resources.len()];
        let mut indegree = vec![0usize; resources.len()];
        for (i, resource) in resources.iter().enumerate() {
            for dep in &resource.dependencies {
                if let Some(&parent) = by_name.get(dep.as_str()) {
                    children[parent].push(i);
                    indegree[i] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(resources.len());

        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(next);
            for &child in &children[next] {
                indegree[child] -= 1;
                if indegree[child] == 0 {
                    ready.insert(child);
                }
            }
        }
        if order.len() != resources.len() {
            return Err(RecordedCycle);
        }

        Ok(Self {
            resources,
            order,
            kept: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn find(&self, type_: &str, name: &str) -> Option<RecordedId> {
        self.resources
            .iter()
            .position(|r| r.type_.as_str() == type_ && r.name.as_str() == name)
            .map(RecordedId)
    }

    pub fn get(&self, id: RecordedId) -> &RecordedResource {
        &self.resources[id.0]
    }

    /// Marks a recorded resource as matched to a desired resource,
    /// excluding it from the prune pass. Processors of distinct
    /// resources call this concurrently.
    pub fn mark_kept(&self, id: RecordedId) {
        self.kept.lock().unwrap().insert(id.0);
    }

    pub fn is_kept(&self, id: RecordedId) -> bool {
        self.kept.lock().unwrap().contains(&id.0)
    }

    /// Unkept recorded resources in reverse topological order, so that
    /// each resource is returned before every resource it depends on.
    pub fn remaining(&self) -> Vec<&RecordedResource> {
        let kept = self.kept.lock().unwrap();
        self.order
            .iter()
            .rev()
            .filter(|&&i| !kept.contains(&i))
            .map(|&i| &self.resources[i])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
