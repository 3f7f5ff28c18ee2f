//! Shared fixtures for integration tests: in-memory store doubles and
//! a small bestiary of resource types with observable lifecycles.

mod resources;
mod stores;

pub use resources::{
    events_tagged, reset_flaky, Endpoint, Event, Flaky, Header, Op, Sleeper, Widget,
};
pub use stores::{MemoryBlobStore, MemoryStateStore, StaticAuth};
