use crate::{assign_static, error, Error, Pending};
use graph::{Graph, ResourceId};
use models::{Diagnostics, Expr, FieldRef};
use schema::{FieldDir, Shape};
use serde_json::Value;
use std::collections::BTreeMap;

// The static-resolution pass. For every pending input, each reference
// is chased: references to outputs stay dynamic, references to inputs
// are followed through the chain of intermediate inputs until a known
// value or a dynamic ancestor is found. Fully reduced expressions are
// assigned as ordinary static inputs; everything else becomes one
// dependency edge per distinct remaining producer.
pub(crate) fn resolve(graph: &mut Graph, pending: Vec<Pending>, diagnostics: &mut Diagnostics) {
    let by_target: BTreeMap<(ResourceId, String), Expr> = pending
        .iter()
        .map(|p| ((p.consumer, p.field.name.to_string()), p.expr.clone()))
        .collect();

    for item in pending {
        let mut reduced = item.expr.clone();
        let mut failed = false;

        for reference in item.expr.fields().into_iter().cloned().collect::<Vec<_>>() {
            let mut stack = Vec::new();
            match chase(graph, &by_target, &reference, &mut stack) {
                Chase::Static(value) => {
                    if let Err(err) = reduced.set_ref(&reference, &value) {
                        error::push(diagnostics, item.range, None, Error::MalformedRef(err));
                        failed = true;
                    }
                }
                Chase::Dynamic => (),
                Chase::Fail(err) => {
                    error::push(diagnostics, item.range, None, err);
                    failed = true;
                }
            }
        }
        if failed {
            continue;
        }

        if reduced.is_static() {
            match reduced.evaluate(&BTreeMap::new()) {
                Ok(value) => {
                    assign_static(
                        graph.handler_mut(item.consumer).as_mut(),
                        &item.field,
                        value,
                        item.range,
                        diagnostics,
                    );
                }
                Err(err) => error::push(diagnostics, item.range, None, Error::MalformedRef(err)),
            }
        } else {
            let node = graph.resource(item.consumer);
            let target = FieldRef {
                type_: node.type_name().clone(),
                name: node.name().clone(),
                field: item.field.name.clone(),
            };
            if let Err(err) = graph.add_dependency(target, reduced) {
                error::push(diagnostics, item.range, None, Error::Graph(err));
            }
        }
    }
}

enum Chase {
    /// The reference bottoms out in a known value.
    Static(Value),
    /// The reference depends on an output, or on an input that does:
    /// it stays in the expression as a dependency edge.
    Dynamic,
    Fail(Error),
}

fn chase(
    graph: &mut Graph,
    pending: &BTreeMap<(ResourceId, String), Expr>,
    reference: &FieldRef,
    stack: &mut Vec<FieldRef>,
) -> Chase {
    if stack.contains(reference) {
        return Chase::Fail(Error::ReferenceCycle {
            field: reference.clone(),
        });
    }

    let Some(id) = graph.lookup(&reference.type_, &reference.name) else {
        return Chase::Fail(Error::RefNotFound {
            type_: reference.type_.clone(),
            name: reference.name.clone(),
        });
    };
    let Some(field) = graph.resource(id).schema().field(&reference.field).cloned() else {
        return Chase::Fail(Error::RefFieldNotFound {
            type_: reference.type_.clone(),
            name: reference.name.clone(),
            field: reference.field.to_string(),
        });
    };

    // Chains never resolve through an output: the first output
    // reference ends the chase and the value flows at execution time.
    if field.dir == FieldDir::Output {
        return Chase::Dynamic;
    }

    if let Some(expr) = pending.get(&(id, field.name.to_string())) {
        // The referenced input is itself an expression. Reduce a copy;
        // if any part of it remains dynamic, so does this reference.
        stack.push(reference.clone());
        let mut reduced = expr.clone();
        for sub in expr.fields().into_iter().cloned().collect::<Vec<_>>() {
            match chase(graph, pending, &sub, stack) {
                Chase::Static(value) => {
                    if let Err(err) = reduced.set_ref(&sub, &value) {
                        stack.pop();
                        return Chase::Fail(Error::MalformedRef(err));
                    }
                }
                Chase::Dynamic => {
                    stack.pop();
                    return Chase::Dynamic;
                }
                fail @ Chase::Fail(_) => {
                    stack.pop();
                    return fail;
                }
            }
        }
        stack.pop();

        return match reduced.evaluate(&BTreeMap::new()) {
            Ok(value) => Chase::Static(value),
            Err(err) => Chase::Fail(Error::MalformedRef(err)),
        };
    }

    // A statically decoded input: read its present value. Unset
    // optionals read as their defaults, exactly as the handler holds
    // them.
    let value = graph
        .handler_mut(id)
        .get(field.name.as_str())
        .unwrap_or(Value::Null);
    Chase::Static(value)
}
