//! `CockroachDB` profile. Speaks the `PostgreSQL` wire protocol.

use super::postgres::{
    information_schema_column, information_schema_table, pg_wire_url, PG_ALREADY_EXISTS,
};
use super::{dollar_placeholder, effective_pool, BackendKind, BackendProfile, ColumnType, ServerVersion};
use crate::config::{PoolConfig, ServerConfig};
use crate::statement::Statement;

/// `CockroachDB` client/server backend.
#[derive(Debug, Clone)]
pub struct CockroachProfile {
    url: String,
    pool: PoolConfig,
}

impl CockroachProfile {
    /// Build the profile. Defaults: user `root`, port 26257.
    pub fn new(server: &ServerConfig, shared_pool: &PoolConfig) -> Self {
        Self {
            url: pg_wire_url(server, "root", 26257),
            pool: effective_pool(server.pool.as_ref(), shared_pool),
        }
    }
}

impl BackendProfile for CockroachProfile {
    fn kind(&self) -> BackendKind {
        BackendKind::CockroachDb
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
            ColumnType::Text | ColumnType::LongText => "STRING",
            ColumnType::Blob => "BYTES",
            ColumnType::Int => "INT4",
            ColumnType::BigInt => "INT8",
            ColumnType::Bool => "BOOL",
            ColumnType::Double => "FLOAT8",
        }
    }

    fn native_bool(&self) -> bool {
        true
    }

    fn table_exists(&self, table: &str) -> Statement {
        information_schema_table(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> Statement {
        information_schema_column(table, column)
    }

    fn supports_add_column_if_not_exists(&self, _version: ServerVersion) -> bool {
        true
    }

    fn already_exists_codes(&self) -> &'static [&'static str] {
        PG_ALREADY_EXISTS
    }

    fn lock_codes(&self) -> &'static [&'static str] {
        // 40001 is the retryable serialization failure raised on contention.
        &["55P03", "40P01", "57P03", "40001"]
    }

    fn lock_messages(&self) -> &'static [&'static str] {
        &["restart transaction", "deadlock detected"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_cockroach_types_and_defaults() {
        let profile = CockroachProfile::new(&ServerConfig::default(), &PoolConfig::default());
        assert_eq!(
            profile.connection_url(),
            "postgres://root@localhost:26257/gravekeeper?sslmode=prefer"
        );
        assert_eq!(profile.column_type(ColumnType::Blob), "BYTES");
        assert_eq!(profile.column_type(ColumnType::LongText), "STRING");
    }
}
