/// Defines resource handler types: the struct itself plus its generated
/// [`Shape`](crate::Shape) implementation (type tag, introspected
/// schema, and by-name field access). Lifecycle operations are written
/// by hand as a [`Resource`](crate::Resource) impl for the type.
///
/// Inputs default to required attributes; `optional` marks fields with
/// an `Option` (or otherwise defaultable) type, `block` / `blocks`
/// mark fields whose type is a record or a sequence of records, and
/// `one_of` / `range` attach validation predicates.
///
/// ```ignore
/// resource! {
///     /// An object storage bucket.
///     pub struct Bucket ("bucket") {
///         input region: String { one_of: ["eu-west-1", "us-east-1"] },
///         input name: String {},
///         input lifecycle: Vec<LifecycleRule> { optional, blocks },
///         output url: Option<String> {},
///     }
/// }
/// ```
#[macro_export]
macro_rules! resource {
    ($(
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident ($tag:literal) {
            $(
                $(#[$fmeta:meta])*
                $dir:ident $fname:ident : $fty:ty { $($opts:tt)* }
            ),* $(,)?
        }
    )*) => { $(
        $(#[$meta])*
        #[derive(Debug, Default, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $Name {
            $(
                $(#[$fmeta])*
                pub $fname: $fty,
            )*
        }

        impl $crate::Shape for $Name {
            fn type_name(&self) -> &'static str {
                $tag
            }

            fn schema(&self) -> $crate::Schema {
                let mut fields = Vec::new();
                $(
                {
                    #[allow(unused_mut)]
                    let mut field = $crate::Field {
                        name: $crate::FieldName::new(stringify!($fname)),
                        ordinal: fields.len() as u32,
                        dir: $crate::resource_field_dir!($dir),
                        kind: $crate::FieldKind::Attr,
                        required: matches!(
                            $crate::resource_field_dir!($dir),
                            $crate::FieldDir::Input
                        ),
                        validate: None,
                    };
                    $crate::resource_field_opts!(field { $($opts)* });
                    fields.push(field);
                }
                )*
                $crate::Schema { fields }
            }

            fn get(&self, field: &str) -> Option<::serde_json::Value> {
                match field {
                    $( stringify!($fname) => ::serde_json::to_value(&self.$fname).ok(), )*
                    _ => None,
                }
            }

            fn set(
                &mut self,
                field: &str,
                value: ::serde_json::Value,
            ) -> Result<(), $crate::SetFieldError> {
                match field {
                    $( stringify!($fname) => {
                        self.$fname = ::serde_json::from_value(value.clone())
                            .map_err(|source| $crate::SetFieldError::Convert {
                                field: field.to_string(),
                                value,
                                source,
                            })?;
                        Ok(())
                    } )*
                    _ => Err($crate::SetFieldError::NoSuchField {
                        type_name: $tag,
                        field: field.to_string(),
                    }),
                }
            }
        }
    )* };
}

#[doc(hidden)]
#[macro_export]
macro_rules! resource_field_dir {
    (input) => {
        $crate::FieldDir::Input
    };
    (output) => {
        $crate::FieldDir::Output
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! resource_field_opts {
    ($field:ident {}) => {};
    ($field:ident { optional $(, $($rest:tt)*)? }) => {
        $field.required = false;
        $( $crate::resource_field_opts!($field { $($rest)* }); )?
    };
    ($field:ident { block $(, $($rest:tt)*)? }) => {
        $field.kind = $crate::FieldKind::Block;
        $( $crate::resource_field_opts!($field { $($rest)* }); )?
    };
    ($field:ident { blocks $(, $($rest:tt)*)? }) => {
        $field.kind = $crate::FieldKind::BlockSeq;
        $( $crate::resource_field_opts!($field { $($rest)* }); )?
    };
    ($field:ident { one_of: [$($allowed:literal),* $(,)?] $(, $($rest:tt)*)? }) => {
        $field.validate = Some($crate::Validate::OneOf(vec![$($allowed.to_string()),*]));
        $( $crate::resource_field_opts!($field { $($rest)* }); )?
    };
    ($field:ident { range: $min:literal ..= $max:literal $(, $($rest:tt)*)? }) => {
        $field.validate = Some($crate::Validate::Range {
            min: $min as f64,
            max: $max as f64,
        });
        $( $crate::resource_field_opts!($field { $($rest)* }); )?
    };
}
