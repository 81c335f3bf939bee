//! `MariaDB` profile. Shares the `MySQL` wire protocol and existence checks.

use super::mysql::{
    backtick, mysql_column_exists, mysql_init, mysql_table_exists, mysql_url,
    MYSQL_ALREADY_EXISTS_CODES, MYSQL_ALREADY_EXISTS_MESSAGES, MYSQL_LOCK_CODES,
    MYSQL_LOCK_MESSAGES,
};
use super::{effective_pool, BackendKind, BackendProfile, ColumnType, ServerVersion};
use crate::config::{PoolConfig, ServerConfig};
use crate::statement::Statement;

/// `MariaDB` client/server backend.
#[derive(Debug, Clone)]
pub struct MariaDbProfile {
    url: String,
    pool: PoolConfig,
}

impl MariaDbProfile {
    /// Build the profile. Defaults: user `root`, port 3306.
    pub fn new(server: &ServerConfig, shared_pool: &PoolConfig) -> Self {
        Self {
            url: mysql_url(server),
            pool: effective_pool(server.pool.as_ref(), shared_pool),
        }
    }
}

impl BackendProfile for MariaDbProfile {
    fn kind(&self) -> BackendKind {
        BackendKind::MariaDb
    }

    fn connection_url(&self) -> String {
        self.url.clone()
    }

    fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    fn quote_ident(&self, name: &str) -> String {
        backtick(name)
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Uuid => "VARCHAR(36)",
            ColumnType::Text => "VARCHAR(255)",
            ColumnType::LongText => "LONGTEXT",
            ColumnType::Blob => "LONGBLOB",
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Double => "DOUBLE",
        }
    }

    fn native_bool(&self) -> bool {
        false
    }

    fn connection_init(&self) -> Vec<String> {
        mysql_init()
    }

    fn version_sql(&self) -> &'static str {
        "SELECT VERSION()"
    }

    fn table_exists(&self, table: &str) -> Statement {
        mysql_table_exists(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> Statement {
        mysql_column_exists(table, column)
    }

    fn supports_add_column_if_not_exists(&self, version: ServerVersion) -> bool {
        version >= ServerVersion::new(10, 0, 0)
    }

    fn already_exists_codes(&self) -> &'static [&'static str] {
        MYSQL_ALREADY_EXISTS_CODES
    }

    fn already_exists_messages(&self) -> &'static [&'static str] {
        MYSQL_ALREADY_EXISTS_MESSAGES
    }

    fn lock_codes(&self) -> &'static [&'static str] {
        MYSQL_LOCK_CODES
    }

    fn lock_messages(&self) -> &'static [&'static str] {
        MYSQL_LOCK_MESSAGES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differs_from_mysql_only_in_types_and_capabilities() {
        let profile = MariaDbProfile::new(&ServerConfig::default(), &PoolConfig::default());
        assert_eq!(profile.column_type(ColumnType::LongText), "LONGTEXT");
        assert_eq!(profile.column_type(ColumnType::Bool), "BOOLEAN");
        assert!(profile.supports_add_column_if_not_exists(ServerVersion::new(10, 3, 0)));
        assert!(!profile.supports_add_column_if_not_exists(ServerVersion::new(5, 5, 68)));
    }
}
