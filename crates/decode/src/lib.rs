//! Decodes a parsed configuration body into a desired dependency graph
//! and a project descriptor. References between resources are resolved
//! statically where the chain bottoms out in known values; anything
//! still dynamic becomes a labeled dependency edge.

mod error;
mod resolve;

pub use error::Error;

use graph::{Graph, ResourceId};
use models::{
    Attribute, Block, Body, Diagnostics, Expr, Project, ProjectName, Range, ResourceName,
    SourceDescriptor,
};
use schema::{Field, FieldDir, FieldKind, Registry, Resource, Shape};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Context threaded through one decode: the resource registry that
/// maps configured type tags to handler factories.
pub struct DecodeContext<'a> {
    pub registry: &'a Registry,
}

impl<'a> DecodeContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }
}

// An input whose expression could not be evaluated during body
// decoding. The static-resolution pass either reduces it to a value or
// registers it as a dependency edge.
pub(crate) struct Pending {
    consumer: ResourceId,
    field: Field,
    expr: Expr,
    range: Range,
}

/// Decodes the root `body`. Diagnostics accumulate across all blocks;
/// when any is fatal the returned graph is populated as far as decoding
/// got, but callers must not use it.
pub fn decode(body: &Body, ctx: &DecodeContext) -> (Option<Project>, Graph, Diagnostics) {
    let mut graph = Graph::new();
    let mut diagnostics = Diagnostics::new();
    let mut project: Option<(Project, Range)> = None;
    let mut seen_names: BTreeMap<ResourceName, Range> = BTreeMap::new();
    let mut pending: Vec<Pending> = Vec::new();

    for attr in &body.attributes {
        error::push(
            &mut diagnostics,
            attr.range,
            None,
            Error::UnsupportedArgument {
                name: attr.name.clone(),
            },
        );
    }

    for block in &body.blocks {
        match block.type_.as_str() {
            "project" => decode_project(block, &mut project, &mut diagnostics),
            "resource" => decode_resource(
                block,
                ctx,
                &mut graph,
                &mut seen_names,
                &mut pending,
                &mut diagnostics,
            ),
            other => error::push(
                &mut diagnostics,
                block.range,
                None,
                Error::UnsupportedBlock {
                    block_type: other.to_string(),
                },
            ),
        }
    }

    resolve::resolve(&mut graph, pending, &mut diagnostics);

    tracing::debug!(
        resources = graph.len(),
        diagnostics = diagnostics.len(),
        fatal = diagnostics.is_fatal(),
        "decoded configuration",
    );
    (project.map(|(project, _)| project), graph, diagnostics)
}

fn decode_project(
    block: &Block,
    project: &mut Option<(Project, Range)>,
    diagnostics: &mut Diagnostics,
) {
    if let Some((_, first)) = project {
        error::push(
            diagnostics,
            block.range,
            None,
            Error::DuplicateProject { first: *first },
        );
        return;
    }

    let name = match block.labels.as_slice() {
        [name] if !name.is_empty() => name.clone(),
        [_] => {
            error::push(diagnostics, block.range, None, Error::ProjectNameEmpty);
            return;
        }
        _ => {
            error::push(diagnostics, block.range, None, Error::ProjectLabels);
            return;
        }
    };

    for attr in &block.body.attributes {
        error::push(
            diagnostics,
            attr.range,
            Some(block.range),
            Error::UnsupportedArgument {
                name: attr.name.clone(),
            },
        );
    }
    for nested in &block.body.blocks {
        error::push(
            diagnostics,
            nested.range,
            Some(block.range),
            Error::UnsupportedBlock {
                block_type: nested.type_.clone(),
            },
        );
    }

    *project = Some((
        Project {
            name: ProjectName::new(name),
        },
        block.range,
    ));
}

fn decode_resource(
    block: &Block,
    ctx: &DecodeContext,
    graph: &mut Graph,
    seen_names: &mut BTreeMap<ResourceName, Range>,
    pending: &mut Vec<Pending>,
    diagnostics: &mut Diagnostics,
) {
    let (type_, name) = match block.labels.as_slice() {
        [type_, name] => {
            let mut ok = true;
            if type_.is_empty() {
                error::push(diagnostics, block.range, None, Error::ResourceTypeEmpty);
                ok = false;
            }
            if name.is_empty() {
                error::push(diagnostics, block.range, None, Error::ResourceNameEmpty);
                ok = false;
            }
            if !ok {
                return;
            }
            (type_.clone(), ResourceName::new(name.clone()))
        }
        _ => {
            error::push(diagnostics, block.range, None, Error::ResourceLabels);
            return;
        }
    };

    // Names are unique project-wide, across types: recorded dependency
    // lists refer to resources by name alone.
    if let Some(first) = seen_names.get(&name) {
        error::push(
            diagnostics,
            block.range,
            None,
            Error::DuplicateResource {
                name,
                first: *first,
            },
        );
        return;
    }
    seen_names.insert(name.clone(), block.range);

    let mut handler = match ctx.registry.new_resource(&type_) {
        Ok(handler) => handler,
        Err(schema::NotSupported { type_name, suggest }) => {
            error::push(
                diagnostics,
                block.range,
                None,
                Error::NotSupported { type_name, suggest },
            );
            return;
        }
    };
    let schema = handler.schema();

    let mut sources: Vec<SourceDescriptor> = Vec::new();
    let mut assigned: BTreeSet<String> = BTreeSet::new();
    let mut seen_attrs: BTreeMap<&str, Range> = BTreeMap::new();
    let mut local_pending: Vec<(Field, Expr, Range)> = Vec::new();

    for attr in &block.body.attributes {
        // `source` is reserved on every resource: an opaque descriptor
        // emitted by the source packer, accumulated per occurrence.
        if attr.name == "source" {
            decode_source_attr(attr, &mut sources, diagnostics);
            continue;
        }

        // An input takes a single inbound assignment.
        if let Some(first) = seen_attrs.insert(attr.name.as_str(), attr.range) {
            error::push(
                diagnostics,
                attr.range,
                Some(block.range),
                Error::DuplicateArgument {
                    name: attr.name.clone(),
                    first,
                },
            );
            continue;
        }

        let Some(field) = schema.field(&attr.name) else {
            error::push(
                diagnostics,
                attr.range,
                Some(block.range),
                Error::UnsupportedArgument {
                    name: attr.name.clone(),
                },
            );
            continue;
        };
        if field.dir == FieldDir::Output {
            error::push(
                diagnostics,
                attr.range,
                Some(block.range),
                Error::AssignsOutput {
                    name: attr.name.clone(),
                },
            );
            continue;
        }
        if field.kind != FieldKind::Attr {
            error::push(
                diagnostics,
                attr.range,
                Some(block.range),
                Error::BlockAsArgument {
                    name: attr.name.clone(),
                },
            );
            continue;
        }
        if let Err(err) = attr.expr.validate() {
            error::push(diagnostics, attr.range, None, Error::MalformedRef(err));
            continue;
        }

        // Defined counts even when the value is bad: one diagnostic
        // per problem, not a trailing "missing argument" as well.
        assigned.insert(field.name.to_string());

        if attr.expr.is_static() {
            match attr.expr.evaluate(&BTreeMap::new()) {
                Ok(value) => {
                    assign_static(handler.as_mut(), field, value, attr.range, diagnostics);
                }
                Err(err) => {
                    error::push(diagnostics, attr.range, None, Error::MalformedRef(err))
                }
            }
        } else {
            local_pending.push((field.clone(), attr.expr.clone(), attr.range));
        }
    }

    decode_nested_blocks(
        block,
        &schema,
        handler.as_mut(),
        &mut assigned,
        diagnostics,
    );

    for field in schema.inputs() {
        if field.required && !assigned.contains(field.name.as_str()) {
            error::push(
                diagnostics,
                block.range,
                None,
                Error::MissingArgument {
                    name: field.name.to_string(),
                },
            );
        }
    }

    let id = match graph.add_resource(name, handler) {
        Ok(id) => id,
        Err(err) => {
            error::push(diagnostics, block.range, None, Error::Graph(err));
            return;
        }
    };
    for descriptor in sources {
        graph.add_source(id, descriptor);
    }
    for (field, expr, range) in local_pending {
        pending.push(Pending {
            consumer: id,
            field,
            expr,
            range,
        });
    }
}

fn decode_source_attr(
    attr: &Attribute,
    sources: &mut Vec<SourceDescriptor>,
    diagnostics: &mut Diagnostics,
) {
    if !attr.expr.is_static() {
        error::push(diagnostics, attr.range, None, Error::VariablesNotAllowed);
        return;
    }
    let value = match attr.expr.evaluate(&BTreeMap::new()) {
        Ok(value) => value,
        Err(err) => {
            error::push(diagnostics, attr.range, None, Error::MalformedRef(err));
            return;
        }
    };
    let Value::String(wire) = value else {
        error::push(diagnostics, attr.range, None, Error::SourceNotAString);
        return;
    };
    match wire.parse::<SourceDescriptor>() {
        Ok(descriptor) => sources.push(descriptor),
        Err(err) => error::push(diagnostics, attr.range, None, Error::InvalidSource(err)),
    }
}

fn decode_nested_blocks(
    block: &Block,
    schema: &schema::Schema,
    handler: &mut dyn Resource,
    assigned: &mut BTreeSet<String>,
    diagnostics: &mut Diagnostics,
) {
    // Group nested blocks by type, preserving declaration order.
    let mut grouped: Vec<(Field, Vec<Value>, Range)> = Vec::new();

    for nested in &block.body.blocks {
        let Some(field) = schema.field(&nested.type_) else {
            error::push(
                diagnostics,
                nested.range,
                Some(block.range),
                Error::UnsupportedBlock {
                    block_type: nested.type_.clone(),
                },
            );
            continue;
        };
        if field.kind == FieldKind::Attr || field.dir == FieldDir::Output {
            error::push(
                diagnostics,
                nested.range,
                Some(block.range),
                Error::UnsupportedBlock {
                    block_type: nested.type_.clone(),
                },
            );
            continue;
        }
        let Some(value) = decode_static_body(&nested.body, diagnostics) else {
            assigned.insert(field.name.to_string());
            continue;
        };

        match grouped.iter_mut().find(|(f, _, _)| f.name == field.name) {
            Some((f, values, first)) => {
                if f.kind == FieldKind::Block {
                    error::push(
                        diagnostics,
                        nested.range,
                        Some(block.range),
                        Error::DuplicateBlock {
                            name: nested.type_.clone(),
                            first: *first,
                        },
                    );
                    continue;
                }
                values.push(value);
            }
            None => grouped.push((field.clone(), vec![value], nested.range)),
        }
    }

    for (field, mut values, range) in grouped {
        let value = match field.kind {
            FieldKind::Block => values.remove(0),
            _ => Value::Array(values),
        };
        assigned.insert(field.name.to_string());
        assign_static(handler, &field, value, range, diagnostics);
    }
}

// Decodes a nested block body to its JSON object form. Nested blocks
// hold static values only; references inside them are rejected.
fn decode_static_body(body: &Body, diagnostics: &mut Diagnostics) -> Option<Value> {
    let mut object = serde_json::Map::new();
    let mut ok = true;

    for attr in &body.attributes {
        if !attr.expr.is_static() {
            error::push(diagnostics, attr.range, None, Error::VariablesNotAllowed);
            ok = false;
            continue;
        }
        match attr.expr.evaluate(&BTreeMap::new()) {
            Ok(value) => {
                object.insert(attr.name.clone(), value);
            }
            Err(err) => {
                error::push(diagnostics, attr.range, None, Error::MalformedRef(err));
                ok = false;
            }
        }
    }

    let mut children: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for nested in &body.blocks {
        match decode_static_body(&nested.body, diagnostics) {
            Some(value) => children.entry(nested.type_.clone()).or_default().push(value),
            None => ok = false,
        }
    }
    for (name, mut values) in children {
        // A single block reads as an object, repetition as an array.
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        object.insert(name, value);
    }

    ok.then(|| Value::Object(object))
}

// Converts, assigns, and validates a fully evaluated input value.
// Returns whether the field now holds the value.
fn assign_static(
    handler: &mut dyn Resource,
    field: &Field,
    value: Value,
    range: Range,
    diagnostics: &mut Diagnostics,
) -> bool {
    if let Err(err) = handler.set(field.name.as_str(), value.clone()) {
        error::push(diagnostics, range, None, Error::Conversion(err));
        return false;
    }
    if let Some(validate) = &field.validate {
        if let Err(err) = validate.check(&field.name, &value) {
            error::push(diagnostics, range, None, Error::Validation(err));
            return false;
        }
    }
    true
}
