mod field;
mod hash;
#[macro_use]
mod macros;
mod registry;
mod request;
mod source;

pub use field::{Field, FieldDir, FieldKind, Schema, Validate, ValidationError};
pub use hash::config_hash;
pub use registry::{NotSupported, Registry};
pub use request::{AuthProvider, CreateRequest, DeleteRequest, UpdateRequest};
pub use source::{BlobStore, SourceRef};

// Re-exported for the `resource!` macro expansion.
pub use models::FieldName;

use serde_json::Value;

/// Transient marks a lifecycle failure as retryable. Handlers wrap
/// errors they consider temporary (rate limits, eventual consistency);
/// anything unwrapped is terminal.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Transient(pub anyhow::Error);

impl Transient {
    pub fn because(err: impl Into<anyhow::Error>) -> anyhow::Error {
        anyhow::Error::new(Self(err.into()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SetFieldError {
    #[error("{type_name} has no field {field:?}")]
    NoSuchField {
        type_name: &'static str,
        field: String,
    },
    #[error("cannot assign {value} to field {field:?}")]
    Convert {
        field: String,
        value: Value,
        #[source]
        source: serde_json::Error,
    },
}

/// Shape is the object-safe schema surface of a resource handler:
/// its type tag, introspected field schema, and by-name field access
/// over `serde_json::Value`. Implementations are generated by the
/// [`resource!`] macro.
pub trait Shape: Send + Sync {
    /// The short type tag used in configuration and registry lookup.
    fn type_name(&self) -> &'static str;

    /// The introspected input/output field schema, in declaration order.
    fn schema(&self) -> Schema;

    /// Reads a field by external name. Returns `None` only for names
    /// absent from the schema; an unset optional field reads as
    /// `Value::Null`.
    fn get(&self, field: &str) -> Option<Value>;

    /// Writes a field by external name, converting from its JSON form.
    fn set(&mut self, field: &str, value: Value) -> Result<(), SetFieldError>;
}

/// Resource is the full handler contract: the schema surface plus the
/// three lifecycle operations. Lifecycle calls receive exclusive access
/// and record their results by mutating output fields in place.
#[async_trait::async_trait]
pub trait Resource: Shape {
    async fn create(&mut self, req: CreateRequest) -> anyhow::Result<()>;
    async fn update(&mut self, req: UpdateRequest) -> anyhow::Result<()>;
    async fn delete(&mut self, req: DeleteRequest) -> anyhow::Result<()>;
}
