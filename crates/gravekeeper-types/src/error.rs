//! Errors raised while parsing wire-format strings into domain types.

/// A stored string could not be parsed into a domain value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A location string did not have the `world|x|y|z` shape.
    #[error("malformed location `{0}`")]
    Location(String),

    /// A UUID column held something that is not a UUID.
    #[error("malformed uuid `{0}`")]
    Uuid(String),

    /// An entity table or kind tag is not one this crate knows.
    #[error("unknown entity kind `{0}`")]
    EntityKind(String),

    /// A grave column name does not accept updates.
    #[error("column `{0}` cannot be updated")]
    Column(String),

    /// The value supplied for a column has the wrong shape.
    #[error("invalid value `{value}` for column `{column}`")]
    Value {
        /// Column being updated.
        column: String,
        /// The rejected raw value.
        value: String,
    },
}
