mod archive;
mod diagnostics;
mod expr;
mod references;
mod source;

pub use archive::{ArchiveKind, ParseDescriptorError, SourceDescriptor};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use expr::{Expr, ExprError, FieldRef, Part};
pub use references::{FieldName, ProjectName, ResourceName, TypeName};
pub use source::{Attribute, Block, Body, Pos, Range};

use serde::{Deserialize, Serialize};

/// Project groups the resources of one configuration under a name.
/// Together with a namespace it keys all recorded state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: ProjectName,
}
