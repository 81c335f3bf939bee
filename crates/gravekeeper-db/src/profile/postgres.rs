//! `PostgreSQL` profile and helpers shared by the other PG-wire families.

use super::{
    dollar_placeholder, effective_pool, server_url, BackendKind, BackendProfile, ColumnType,
    ServerVersion,
};
use crate::config::{PoolConfig, ServerConfig};
use crate::statement::Statement;

/// "Already exists" SQLSTATEs: duplicate table, column, object, unique key.
pub(super) const PG_ALREADY_EXISTS: &[&str] = &["42P07", "42701", "42710", "23505"];

/// `postgres://` URL with an `sslmode` parameter.
pub(super) fn pg_wire_url(server: &ServerConfig, default_user: &str, default_port: u16) -> String {
    let sslmode = if server.ssl { "require" } else { "prefer" };
    format!(
        "{}?sslmode={sslmode}",
        server_url("postgres", server, default_user, default_port)
    )
}

pub(super) fn information_schema_table(table: &str) -> Statement {
    Statement::new(
        "schema.table_exists",
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1",
    )
    .arg(table)
}

pub(super) fn information_schema_column(table: &str, column: &str) -> Statement {
    Statement::new(
        "schema.column_exists",
        "SELECT COUNT(*) FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
    )
    .arg(table)
    .arg(column)
}

/// `PostgreSQL` client/server backend.
#[derive(Debug, Clone)]
pub struct PostgresProfile {
    url: String,
    pool: PoolConfig,
}

impl PostgresProfile {
    /// Build the profile. Defaults: user `postgres`, port 5432.
    pub fn new(server: &ServerConfig, shared_pool: &PoolConfig) -> Self {
        Self {
            url: pg_wire_url(server, "postgres", 5432),
            pool: effective_pool(server.pool.as_ref(), shared_pool),
        }
    }
}

impl BackendProfile for PostgresProfile {
    fn kind(&self) -> BackendKind {
        BackendKind::PostgreSql
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
            ColumnType::LongText => "TEXT",
            ColumnType::Blob => "BYTEA",
            ColumnType::Int => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Double => "DOUBLE PRECISION",
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

    fn supports_add_column_if_not_exists(&self, version: ServerVersion) -> bool {
        version >= ServerVersion::new(9, 6, 0)
    }

    fn already_exists_codes(&self) -> &'static [&'static str] {
        PG_ALREADY_EXISTS
    }

    fn lock_codes(&self) -> &'static [&'static str] {
        // lock_not_available, deadlock_detected, cannot_connect_now
        &["55P03", "40P01", "57P03"]
    }

    fn lock_messages(&self) -> &'static [&'static str] {
        &["could not obtain lock", "deadlock detected"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_family_defaults() {
        let profile = PostgresProfile::new(&ServerConfig::default(), &PoolConfig::default());
        assert_eq!(
            profile.connection_url(),
            "postgres://postgres@localhost:5432/gravekeeper?sslmode=prefer"
        );
        assert_eq!(profile.placeholder(2), "$2");
    }

    #[test]
    fn ssl_requires_tls() {
        let server = ServerConfig {
            ssl: true,
            port: Some(6432),
            ..ServerConfig::default()
        };
        let profile = PostgresProfile::new(&server, &PoolConfig::default());
        assert!(profile.connection_url().ends_with(":6432/gravekeeper?sslmode=require"));
    }
}
