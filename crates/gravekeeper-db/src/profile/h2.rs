//! H2 in server mode, reached through its `PostgreSQL` listener (`-pg`).
//!
//! H2 folds unquoted identifiers to upper case, so existence checks compare
//! names case-insensitively.

use super::postgres::pg_wire_url;
use super::{dollar_placeholder, effective_pool, BackendKind, BackendProfile, ColumnType, ServerVersion};
use crate::config::{PoolConfig, ServerConfig};
use crate::statement::Statement;

/// H2 server-mode backend.
#[derive(Debug, Clone)]
pub struct H2Profile {
    url: String,
    pool: PoolConfig,
}

impl H2Profile {
    /// Build the profile. Defaults: user `sa`, port 5435.
    pub fn new(server: &ServerConfig, shared_pool: &PoolConfig) -> Self {
        Self {
            url: pg_wire_url(server, "sa", 5435),
            pool: effective_pool(server.pool.as_ref(), shared_pool),
        }
    }
}

impl BackendProfile for H2Profile {
    fn kind(&self) -> BackendKind {
        BackendKind::H2
    }

    fn connection_url(&self) -> String {
        self.url.clone()
    }

    fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    fn placeholder(&self, index: usize) -> String {
        dollar_placeholder(index)
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Uuid => "VARCHAR(36)",
            ColumnType::Text => "VARCHAR(255)",
            ColumnType::LongText => "VARCHAR",
            ColumnType::Blob => "BINARY LARGE OBJECT",
            ColumnType::Int => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Double => "DOUBLE PRECISION",
        }
    }

    fn native_bool(&self) -> bool {
        true
    }

    fn version_sql(&self) -> &'static str {
        "SELECT H2VERSION()"
    }

    fn table_exists(&self, table: &str) -> Statement {
        Statement::new(
            "schema.table_exists",
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE UPPER(TABLE_NAME) = UPPER($1)",
        )
        .arg(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> Statement {
        Statement::new(
            "schema.column_exists",
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE UPPER(TABLE_NAME) = UPPER($1) AND UPPER(COLUMN_NAME) = UPPER($2)",
        )
        .arg(table)
        .arg(column)
    }

    fn supports_add_column_if_not_exists(&self, _version: ServerVersion) -> bool {
        true
    }

    fn already_exists_codes(&self) -> &'static [&'static str] {
        &["42S01", "42S21", "42101", "42121"]
    }

    fn already_exists_messages(&self) -> &'static [&'static str] {
        &["already exists", "duplicate column name"]
    }

    fn lock_codes(&self) -> &'static [&'static str] {
        &["HYT00", "40001"]
    }

    fn lock_messages(&self) -> &'static [&'static str] {
        &["timeout trying to lock", "deadlock"]
    }
}
