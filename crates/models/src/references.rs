use serde::{Deserialize, Serialize};
use std::fmt;

// This module contains types which name entities of a configuration.
// They use the newtype pattern for strong type safety.

macro_rules! string_reference_types {
    (
        $(
        $(#[$outer:meta])*
        $vis:vis struct $Wrapper:ident;
        )*
    ) => {
        $(

        $(#[$outer])*
        #[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $Wrapper(String);

        impl $Wrapper {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $Wrapper {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $Wrapper {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$Wrapper> for String {
            fn from(w: $Wrapper) -> String {
                w.0
            }
        }

        impl From<&str> for $Wrapper {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_ref())
            }
        }

        impl std::cmp::PartialEq<str> for $Wrapper {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        )*
    };
}

string_reference_types! {
    /// TypeName is the short type tag of a resource handler,
    /// as written in configuration and registered with the registry.
    pub struct TypeName;

    /// ResourceName names a single resource. Names are unique within a
    /// project, across all resource types.
    pub struct ResourceName;

    /// FieldName names an input or output field of a resource schema.
    pub struct FieldName;

    /// ProjectName names a project, the unit of reconciliation.
    pub struct ProjectName;
}
