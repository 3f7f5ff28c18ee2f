use models::FieldName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction of a field: inputs are declared in configuration and
/// hashed for change detection; outputs are produced by lifecycle calls
/// and flow to downstream resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldDir {
    Input,
    Output,
}

/// Syntactic kind of a field. An `Attr` is a scalar attribute. A field
/// is a nested block (`Block`, or `BlockSeq` for a repeated block) when
/// its type is a structured record or a sequence of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Attr,
    Block,
    BlockSeq,
}

/// A validation predicate attached to a field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Validate {
    /// The value must be one of an allowed set of strings.
    OneOf(Vec<String>),
    /// The value must be a number within the inclusive range.
    Range { min: f64, max: f64 },
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("field {field:?} must be one of {allowed:?}, not {value}")]
    NotOneOf {
        field: FieldName,
        allowed: Vec<String>,
        value: Value,
    },
    #[error("field {field:?} must be within {min}..={max}, not {value}")]
    OutOfRange {
        field: FieldName,
        min: f64,
        max: f64,
        value: Value,
    },
    #[error("field {field:?} must be a number to satisfy its range, not {value}")]
    NotANumber { field: FieldName, value: Value },
}

impl Validate {
    /// Evaluates the predicate against a decoded value.
    pub fn check(&self, field: &FieldName, value: &Value) -> Result<(), ValidationError> {
        match self {
            Self::OneOf(allowed) => {
                let ok = matches!(value, Value::String(s) if allowed.iter().any(|a| a == s));
                if ok {
                    Ok(())
                } else {
                    Err(ValidationError::NotOneOf {
                        field: field.clone(),
                        allowed: allowed.clone(),
                        value: value.clone(),
                    })
                }
            }
            Self::Range { min, max } => {
                let Some(n) = value.as_f64() else {
                    return Err(ValidationError::NotANumber {
                        field: field.clone(),
                        value: value.clone(),
                    });
                };
                if n >= *min && n <= *max {
                    Ok(())
                } else {
                    Err(ValidationError::OutOfRange {
                        field: field.clone(),
                        min: *min,
                        max: *max,
                        value: value.clone(),
                    })
                }
            }
        }
    }
}

/// One declared field of a resource schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: FieldName,
    /// Stable position of the field within its declaration,
    /// which fixes hashing and iteration order.
    pub ordinal: u32,
    pub dir: FieldDir,
    pub kind: FieldKind,
    pub required: bool,
    pub validate: Option<Validate>,
}

/// The introspected schema of a resource handler type: its declared
/// input and output fields, in declaration order. Schemas are
/// precomputed at registration time rather than reflected at runtime.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.as_str() == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.dir == FieldDir::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.dir == FieldDir::Output)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_of_accepts_members_and_rejects_others() {
        let v = Validate::OneOf(vec!["eu".to_string(), "us".to_string()]);
        let field = FieldName::new("region");

        v.check(&field, &json!("eu")).unwrap();
        let err = v.check(&field, &json!("mars")).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"field "region" must be one of ["eu", "us"], not "mars""#
        );
    }

    #[test]
    fn range_checks_numeric_bounds() {
        let v = Validate::Range { min: 1.0, max: 5.0 };
        let field = FieldName::new("replicas");

        v.check(&field, &json!(3)).unwrap();
        v.check(&field, &json!(5)).unwrap();
        assert!(v.check(&field, &json!(6)).is_err());
        assert!(matches!(
            v.check(&field, &json!("three")),
            Err(ValidationError::NotANumber { .. })
        ));
    }
}
