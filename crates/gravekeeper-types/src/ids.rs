//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Graves are keyed by a strongly-typed ID so they cannot be confused with
//! owner, killer, or entity UUIDs that travel alongside them.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_e| ParseError::Uuid(s.to_owned()))
            }
        }
    };
}

define_id! {
    /// Unique identifier for a grave. Immutable once the grave exists.
    GraveId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = GraveId::new();
        let parsed: Result<GraveId, _> = id.to_string().parse();
        assert_eq!(parsed, Ok(id));
    }

    #[test]
    fn parse_rejects_garbage() {
        let parsed: Result<GraveId, _> = "not-a-uuid".parse();
        assert_eq!(parsed, Err(ParseError::Uuid("not-a-uuid".to_owned())));
    }
}
