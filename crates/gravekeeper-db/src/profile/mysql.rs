//! `MySQL` profile and helpers shared with `MariaDB`.

use super::{effective_pool, is_plain_ident, server_url, BackendKind, BackendProfile, ColumnType, ServerVersion};
use crate::config::{PoolConfig, ServerConfig};
use crate::statement::Statement;

pub(super) const MYSQL_ALREADY_EXISTS_CODES: &[&str] = &["42S01", "42S21"];
pub(super) const MYSQL_ALREADY_EXISTS_MESSAGES: &[&str] =
    &["already exists", "duplicate column name", "duplicate key name"];
pub(super) const MYSQL_LOCK_CODES: &[&str] = &["40001"];
pub(super) const MYSQL_LOCK_MESSAGES: &[&str] = &["lock wait timeout", "deadlock found"];

/// `mysql://` URL with an `ssl-mode` parameter.
pub(super) fn mysql_url(server: &ServerConfig) -> String {
    let ssl_mode = if server.ssl { "REQUIRED" } else { "PREFERRED" };
    format!(
        "{}?ssl-mode={ssl_mode}",
        server_url("mysql", server, "root", 3306)
    )
}

pub(super) fn backtick(name: &str) -> String {
    if is_plain_ident(name) {
        name.to_owned()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

pub(super) fn mysql_init() -> Vec<String> {
    vec![
        "SET NAMES utf8mb4".to_owned(),
        "SET SESSION sql_mode = 'STRICT_TRANS_TABLES,NO_ENGINE_SUBSTITUTION'".to_owned(),
    ]
}

pub(super) fn mysql_table_exists(table: &str) -> Statement {
    Statement::new(
        "schema.table_exists",
        "SELECT COUNT(*) FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
    )
    .arg(table)
}

pub(super) fn mysql_column_exists(table: &str, column: &str) -> Statement {
    Statement::new(
        "schema.column_exists",
        "SELECT COUNT(*) FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
    )
    .arg(table)
    .arg(column)
}

/// `MySQL` client/server backend.
#[derive(Debug, Clone)]
pub struct MySqlProfile {
    url: String,
    pool: PoolConfig,
}

impl MySqlProfile {
    /// Build the profile. Defaults: user `root`, port 3306.
    pub fn new(server: &ServerConfig, shared_pool: &PoolConfig) -> Self {
        Self {
            url: mysql_url(server),
            pool: effective_pool(server.pool.as_ref(), shared_pool),
        }
    }
}

impl BackendProfile for MySqlProfile {
    fn kind(&self) -> BackendKind {
        BackendKind::MySql
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
            ColumnType::LongText => "TEXT",
            ColumnType::Blob => "LONGBLOB",
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Bool => "TINYINT(1)",
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

    fn supports_add_column_if_not_exists(&self, _version: ServerVersion) -> bool {
        false
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
    fn url_and_types() {
        let server = ServerConfig {
            ssl: true,
            ..ServerConfig::default()
        };
        let profile = MySqlProfile::new(&server, &PoolConfig::default());
        assert_eq!(
            profile.connection_url(),
            "mysql://root@localhost:3306/gravekeeper?ssl-mode=REQUIRED"
        );
        assert_eq!(profile.column_type(ColumnType::Bool), "TINYINT(1)");
        assert_eq!(profile.placeholder(1), "?");
        assert_eq!(profile.connection_init().len(), 2);
        assert!(
            profile
                .connection_init()
                .get(1)
                .is_some_and(|sql| sql.contains("sql_mode"))
        );
    }
}
