use crate::{FieldName, ResourceName, TypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// FieldRef is a fully qualified reference to a field of a resource,
/// written `{type}.{name}.{field}` in configuration.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FieldRef {
    #[serde(rename = "type")]
    pub type_: TypeName,
    pub name: ResourceName,
    pub field: FieldName,
}

impl FieldRef {
    pub fn new(
        type_: impl Into<TypeName>,
        name: impl Into<ResourceName>,
        field: impl Into<FieldName>,
    ) -> Self {
        Self {
            type_: type_.into(),
            name: name.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.type_, self.name, self.field)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExprError {
    #[error("malformed reference {reference:?}: expected the shape {{type}}.{{name}}.{{field}}")]
    MalformedRef { reference: String },
    #[error("expression does not reference {field}")]
    NoSuchField { field: FieldRef },
    #[error("expression references {field}, which has no resolved value")]
    Unresolved { field: FieldRef },
}

/// Part is one segment of a template expression: either a literal
/// value, or a reference awaiting substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Lit(Value),
    Ref(FieldRef),
}

/// Expr is an evaluable scalar attribute value. It may be fully static
/// (a pure literal), dynamic (a single unresolved reference), or a
/// template interleaving literal segments with references. There is one
/// representation for all three cases so that consumers never branch on
/// "is it a literal": an Expr with no free fields evaluates directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Lit(Value),
    Ref(FieldRef),
    Template(Vec<Part>),
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Lit(value.into())
    }

    pub fn reference(
        type_: impl Into<TypeName>,
        name: impl Into<ResourceName>,
        field: impl Into<FieldName>,
    ) -> Self {
        Self::Ref(FieldRef::new(type_, name, field))
    }

    pub fn template(parts: Vec<Part>) -> Self {
        Self::Template(parts)
    }

    /// Free field references of this expression.
    /// Empty if and only if the expression is fully static.
    pub fn fields(&self) -> BTreeSet<&FieldRef> {
        let mut out = BTreeSet::new();
        match self {
            Self::Lit(_) => {}
            Self::Ref(field) => {
                out.insert(field);
            }
            Self::Template(parts) => {
                for part in parts {
                    if let Part::Ref(field) = part {
                        out.insert(field);
                    }
                }
            }
        }
        out
    }

    pub fn is_static(&self) -> bool {
        self.fields().is_empty()
    }

    /// Checks that every reference has the three-part
    /// `{type}.{name}.{field}` shape, with no empty component.
    /// Must pass before any other operation is attempted.
    pub fn validate(&self) -> Result<(), ExprError> {
        for field in self.fields() {
            if field.type_.is_empty() || field.name.is_empty() || field.field.is_empty() {
                return Err(ExprError::MalformedRef {
                    reference: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Replaces every occurrence of `field` with the literal `value`.
    /// The structure of the expression is preserved: template head and
    /// tail literals remain in place, and a substituted single-part
    /// template still evaluates to the value with its type intact.
    pub fn set_ref(&mut self, field: &FieldRef, value: &Value) -> Result<(), ExprError> {
        match self {
            Self::Lit(_) => Err(ExprError::NoSuchField {
                field: field.clone(),
            }),
            Self::Ref(this) if this == field => {
                *self = Self::Lit(value.clone());
                Ok(())
            }
            Self::Ref(_) => Err(ExprError::NoSuchField {
                field: field.clone(),
            }),
            Self::Template(parts) => {
                let mut found = false;
                for part in parts.iter_mut() {
                    if matches!(part, Part::Ref(this) if this == field) {
                        *part = Part::Lit(value.clone());
                        found = true;
                    }
                }
                if found {
                    Ok(())
                } else {
                    Err(ExprError::NoSuchField {
                        field: field.clone(),
                    })
                }
            }
        }
    }

    /// Substitutes `resolved` values for remaining references and
    /// reduces to a concrete value. A single-segment expression yields
    /// the underlying value unchanged; a multi-segment template renders
    /// to a string, with string segments verbatim and all other values
    /// in their compact JSON form.
    pub fn evaluate(&self, resolved: &BTreeMap<FieldRef, Value>) -> Result<Value, ExprError> {
        let lookup = |field: &FieldRef| -> Result<Value, ExprError> {
            resolved
                .get(field)
                .cloned()
                .ok_or_else(|| ExprError::Unresolved {
                    field: field.clone(),
                })
        };

        match self {
            Self::Lit(value) => Ok(value.clone()),
            Self::Ref(field) => lookup(field),
            Self::Template(parts) => {
                let mut values = Vec::with_capacity(parts.len());
                for part in parts {
                    values.push(match part {
                        Part::Lit(value) => value.clone(),
                        Part::Ref(field) => lookup(field)?,
                    });
                }
                match values.len() {
                    0 => Ok(Value::String(String::new())),
                    1 => Ok(values.pop().unwrap()),
                    _ => Ok(Value::String(values.iter().map(render).collect())),
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Lit(value) => write!(f, "{value}"),
            Self::Ref(field) => write!(f, "${{{field}}}"),
            Self::Template(parts) => {
                for part in parts {
                    match part {
                        Part::Lit(Value::String(s)) => f.write_str(s)?,
                        Part::Lit(value) => write!(f, "{value}")?,
                        Part::Ref(field) => write!(f, "${{{field}}}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

// Renders a value as a template string segment.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn out(name: &str) -> FieldRef {
        FieldRef::new("widget", name, "out")
    }

    #[test]
    fn static_literal_has_no_fields_and_evaluates() {
        let expr = Expr::lit("hello");
        assert!(expr.is_static());
        assert_eq!(expr.evaluate(&BTreeMap::new()).unwrap(), json!("hello"));
    }

    #[test]
    fn pure_reference_forwards_its_value_with_type_intact() {
        let expr = Expr::Ref(out("a"));
        assert_eq!(
            expr.fields().into_iter().collect::<Vec<_>>(),
            vec![&out("a")]
        );

        let resolved = BTreeMap::from([(out("a"), json!(42))]);
        assert_eq!(expr.evaluate(&resolved).unwrap(), json!(42));
    }

    #[test]
    fn template_fans_in_multiple_references() {
        let expr = Expr::Template(vec![
            Part::Ref(out("a")),
            Part::Lit(json!("-")),
            Part::Ref(out("b")),
            Part::Lit(json!("-")),
            Part::Ref(out("c")),
        ]);
        assert_eq!(expr.fields().len(), 3);

        let resolved = BTreeMap::from([
            (out("a"), json!("A")),
            (out("b"), json!("B")),
            (out("c"), json!("C")),
        ]);
        assert_eq!(expr.evaluate(&resolved).unwrap(), json!("A-B-C"));
    }

    #[test]
    fn template_renders_non_strings_as_json() {
        let expr = Expr::Template(vec![Part::Lit(json!("n=")), Part::Ref(out("a"))]);
        let resolved = BTreeMap::from([(out("a"), json!(7))]);
        assert_eq!(expr.evaluate(&resolved).unwrap(), json!("n=7"));
    }

    #[test]
    fn set_ref_rewrites_all_occurrences_and_preserves_structure() {
        let mut expr = Expr::Template(vec![
            Part::Lit(json!("pre-")),
            Part::Ref(out("a")),
            Part::Lit(json!("-mid-")),
            Part::Ref(out("a")),
        ]);
        expr.set_ref(&out("a"), &json!("X")).unwrap();

        assert!(expr.is_static());
        assert_eq!(
            expr,
            Expr::Template(vec![
                Part::Lit(json!("pre-")),
                Part::Lit(json!("X")),
                Part::Lit(json!("-mid-")),
                Part::Lit(json!("X")),
            ])
        );
        assert_eq!(
            expr.evaluate(&BTreeMap::new()).unwrap(),
            json!("pre-X-mid-X")
        );
    }

    #[test]
    fn set_ref_of_absent_field_is_an_error() {
        let mut expr = Expr::Ref(out("a"));
        let err = expr.set_ref(&out("b"), &json!("X")).unwrap_err();
        assert!(matches!(err, ExprError::NoSuchField { .. }));
        // The expression is unchanged.
        assert_eq!(expr, Expr::Ref(out("a")));
    }

    #[test]
    fn single_part_template_keeps_value_type_through_substitution() {
        let mut expr = Expr::Template(vec![Part::Ref(out("a"))]);
        expr.set_ref(&out("a"), &json!(true)).unwrap();
        assert_eq!(expr.evaluate(&BTreeMap::new()).unwrap(), json!(true));
    }

    #[test]
    fn evaluate_names_the_first_missing_reference() {
        let expr = Expr::Template(vec![Part::Ref(out("a")), Part::Ref(out("b"))]);
        let resolved = BTreeMap::from([(out("a"), json!("A"))]);

        let err = expr.evaluate(&resolved).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expression references widget.b.out, which has no resolved value"
        );
    }

    #[test]
    fn validate_rejects_empty_reference_components() {
        let expr = Expr::Ref(FieldRef::new("widget", "", "out"));
        let err = expr.validate().unwrap_err();
        assert!(matches!(err, ExprError::MalformedRef { .. }));

        let expr = Expr::Ref(out("a"));
        expr.validate().unwrap();
    }
}
