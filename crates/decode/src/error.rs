use models::{Diagnostic, Diagnostics, FieldRef, Range, ResourceName, TypeName};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("a project block is already defined at {first}")]
    DuplicateProject { first: Range },
    #[error("a project block takes exactly one label, its name")]
    ProjectLabels,
    #[error("the project name cannot be empty")]
    ProjectNameEmpty,
    #[error("{block_type:?} blocks are not expected here")]
    UnsupportedBlock { block_type: String },
    #[error("an argument named {name:?} is not expected here")]
    UnsupportedArgument { name: String },
    #[error("a resource block takes two labels, its type and its name")]
    ResourceLabels,
    #[error("the resource type cannot be empty")]
    ResourceTypeEmpty,
    #[error("the resource name cannot be empty")]
    ResourceNameEmpty,
    #[error("a resource named {name} is already defined at {first}")]
    DuplicateResource { name: ResourceName, first: Range },
    #[error("the resource type {type_name:?} is not supported{}", suggest_clause(.suggest))]
    NotSupported {
        type_name: String,
        suggest: Option<String>,
    },
    #[error("an argument named {name:?} was already given at {first}")]
    DuplicateArgument { name: String, first: Range },
    #[error("{name:?} is an output and cannot be assigned")]
    AssignsOutput { name: String },
    #[error("{name:?} is a block and must use block syntax")]
    BlockAsArgument { name: String },
    #[error("the argument {name:?} is required, but no definition was found")]
    MissingArgument { name: String },
    #[error("a block named {name:?} is already defined at {first}")]
    DuplicateBlock { name: String, first: Range },
    #[error("variables may not be used here")]
    VariablesNotAllowed,
    #[error("the source string must be a string value")]
    SourceNotAString,
    #[error(transparent)]
    InvalidSource(#[from] models::ParseDescriptorError),
    #[error(transparent)]
    Conversion(#[from] schema::SetFieldError),
    #[error(transparent)]
    Validation(#[from] schema::ValidationError),
    #[error(transparent)]
    MalformedRef(#[from] models::ExprError),
    #[error("object {type_}.{name} is not defined")]
    RefNotFound {
        type_: TypeName,
        name: ResourceName,
    },
    #[error("object {type_}.{name} does not have a field {field:?}")]
    RefFieldNotFound {
        type_: TypeName,
        name: ResourceName,
        field: String,
    },
    #[error("resolving {field} loops back into itself")]
    ReferenceCycle { field: FieldRef },
    #[error(transparent)]
    Graph(#[from] graph::GraphError),
}

fn suggest_clause(suggest: &Option<String>) -> String {
    match suggest {
        Some(s) => format!("; did you mean {s:?}?"),
        None => String::new(),
    }
}

impl Error {
    /// The short problem statement used as a diagnostic summary.
    pub fn summary(&self) -> &'static str {
        use Error::*;
        match self {
            DuplicateProject { .. } => "Duplicate project block",
            ProjectLabels | ProjectNameEmpty => "Invalid project block",
            UnsupportedBlock { .. } | DuplicateBlock { .. } => "Unsupported block",
            UnsupportedArgument { .. } | AssignsOutput { .. } | BlockAsArgument { .. } => {
                "Unsupported argument"
            }
            ResourceLabels | ResourceTypeEmpty | ResourceNameEmpty => "Invalid resource block",
            DuplicateResource { .. } => "Duplicate resource",
            DuplicateArgument { .. } => "Duplicate argument",
            NotSupported { .. } => "Resource not supported",
            MissingArgument { .. } => "Missing required argument",
            VariablesNotAllowed => "Variables not allowed",
            SourceNotAString | InvalidSource(_) => "Invalid source string",
            Conversion(_) | Validation(_) => "Invalid value",
            MalformedRef(_) => "Invalid reference",
            RefNotFound { .. } | RefFieldNotFound { .. } => "Referenced value not found",
            ReferenceCycle { .. } => "Reference cycle",
            Graph(_) => "Invalid configuration",
        }
    }

    /// The diagnostic detail: this error's message followed by the
    /// messages of its causes.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        detail
    }
}

/// Renders `err` as an error diagnostic anchored at `subject`.
pub(crate) fn push(
    diagnostics: &mut Diagnostics,
    subject: Range,
    context: Option<Range>,
    err: Error,
) {
    let mut diagnostic = Diagnostic::error(err.summary(), err.detail()).with_subject(subject);
    if let Some(context) = context {
        diagnostic = diagnostic.with_context(context);
    }
    diagnostics.push(diagnostic);
}
