use crate::Schema;
use serde_json::Value;
use xxhash_rust::xxh3::Xxh3;

// Separates hashed components, and marks absent optional inputs.
const SEP: &[u8] = &[0x00];
const ABSENT: &[u8] = &[0xff];

/// Computes the deterministic content hash of a resource's declared
/// inputs: the type tag, the resource name, and every input field in
/// schema order as its name plus the canonical JSON serialization of
/// its value. Output fields never participate. Nested blocks hash
/// through their JSON form, whose object keys are sorted, so the hash
/// is independent of construction order.
///
/// `lookup` reads the current value of an input field by name; `None`
/// or `Null` both hash as the absent sentinel.
pub fn config_hash<F>(type_name: &str, name: &str, schema: &Schema, lookup: F) -> u64
where
    F: Fn(&str) -> Option<Value>,
{
    let mut hasher = Xxh3::new();
    hasher.update(type_name.as_bytes());
    hasher.update(SEP);
    hasher.update(name.as_bytes());
    hasher.update(SEP);

    for field in schema.inputs() {
        hasher.update(field.name.as_bytes());
        hasher.update(SEP);

        match lookup(field.name.as_str()) {
            Some(value) if !value.is_null() => {
                // serde_json objects are keyed by a BTreeMap, so this
                // serialization is canonical.
                hasher.update(value.to_string().as_bytes());
            }
            _ => hasher.update(ABSENT),
        }
        hasher.update(SEP);
    }
    hasher.digest()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Field, FieldDir, FieldKind};
    use models::FieldName;
    use serde_json::json;

    fn schema_of(fields: &[(&str, FieldDir)]) -> Schema {
        Schema {
            fields: fields
                .iter()
                .enumerate()
                .map(|(ordinal, (name, dir))| Field {
                    name: FieldName::new(*name),
                    ordinal: ordinal as u32,
                    dir: *dir,
                    kind: FieldKind::Attr,
                    required: false,
                    validate: None,
                })
                .collect(),
        }
    }

    #[test]
    fn inputs_only_and_deterministic() {
        let schema = schema_of(&[
            ("in", FieldDir::Input),
            ("add", FieldDir::Input),
            ("out", FieldDir::Output),
        ]);

        let a = config_hash("widget", "w1", &schema, |f| match f {
            "in" => Some(json!("x")),
            "add" => Some(json!("y")),
            "out" => Some(json!("computed")),
            _ => None,
        });
        let b = config_hash("widget", "w1", &schema, |f| match f {
            "in" => Some(json!("x")),
            "add" => Some(json!("y")),
            "out" => Some(json!("different output")),
            _ => None,
        });
        assert_eq!(a, b);

        let c = config_hash("widget", "w1", &schema, |f| match f {
            "in" => Some(json!("x")),
            "add" => Some(json!("z")),
            _ => None,
        });
        assert_ne!(a, c);
    }

    #[test]
    fn identity_participates() {
        let schema = schema_of(&[("in", FieldDir::Input)]);
        let lookup = |_: &str| Some(json!("v"));

        let a = config_hash("widget", "w1", &schema, lookup);
        let b = config_hash("widget", "w2", &schema, lookup);
        let c = config_hash("gadget", "w1", &schema, lookup);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn absent_and_null_hash_alike() {
        let schema = schema_of(&[("note", FieldDir::Input)]);

        let absent = config_hash("widget", "w", &schema, |_| None);
        let null = config_hash("widget", "w", &schema, |_| Some(Value::Null));
        assert_eq!(absent, null);

        let present = config_hash("widget", "w", &schema, |_| Some(json!("")));
        assert_ne!(absent, present);
    }

    #[test]
    fn object_values_hash_independent_of_key_order() {
        let schema = schema_of(&[("tags", FieldDir::Input)]);

        let a = config_hash("widget", "w", &schema, |_| {
            Some(json!({"a": 1, "b": 2}))
        });
        let b = config_hash("widget", "w", &schema, |_| {
            Some(json!({"b": 2, "a": 1}))
        });
        assert_eq!(a, b);
    }
}
