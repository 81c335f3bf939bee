//! Error types for the persistence layer.
//!
//! Only startup, reload, and migration surface errors to callers. Write-path
//! failures happen on background lanes and are logged there instead.

use gravekeeper_types::{GraveId, ParseError};

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A backend operation failed.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A filesystem operation on the embedded store failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configured backend identifier is not one of the supported families.
    #[error("unknown database backend `{0}`")]
    UnknownBackend(String),

    /// The one-shot connectivity test against a freshly opened pool failed.
    #[error("could not reach {backend}: {source}")]
    Connectivity {
        /// Display name of the backend family.
        backend: &'static str,
        /// The underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A schema statement failed with an error that is not an
    /// "already exists" condition.
    #[error("schema setup failed on `{table}`: {source}")]
    Schema {
        /// Table being created or altered.
        table: String,
        /// The underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The legacy store could not be migrated.
    #[error("migration failed: {0}")]
    Migration(String),

    /// A stored row could not be turned into a domain value.
    #[error("row mapping failed: {0}")]
    RowMapping(#[from] ParseError),

    /// A grave without a death location cannot be persisted.
    #[error("grave {0} has no death location")]
    MissingLocation(GraveId),

    /// The persistence stack has been shut down.
    #[error("persistence is shut down")]
    ShutDown,
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}
