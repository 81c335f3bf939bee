//! Embedded single-file profile.

use std::path::{Path, PathBuf};

use tracing::warn;

use super::{
    effective_pool, BackendKind, BackendProfile, ColumnType, RecoveryPlan, ServerVersion,
    COMMIT_THEN_ROLLBACK,
};
use crate::config::{PoolConfig, SqliteConfig};
use crate::layout;
use crate::statement::Statement;

const JOURNAL_MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
const SYNCHRONOUS_MODES: [&str; 4] = ["OFF", "NORMAL", "FULL", "EXTRA"];

/// `SQLite` stored under the versioned layout directory.
#[derive(Debug, Clone)]
pub struct SqliteProfile {
    path: PathBuf,
    journal_mode: &'static str,
    synchronous: &'static str,
    busy_timeout_ms: u64,
    pool: PoolConfig,
}

impl SqliteProfile {
    /// Build the profile. Unknown pragma values fall back to `WAL` / `NORMAL`.
    pub fn new(config: &SqliteConfig, shared_pool: &PoolConfig, data_dir: &Path) -> Self {
        Self {
            path: layout::database_path(data_dir, &config.file),
            journal_mode: pick_pragma("journal_mode", &config.journal_mode, &JOURNAL_MODES, "WAL"),
            synchronous: pick_pragma("synchronous", &config.synchronous, &SYNCHRONOUS_MODES, "NORMAL"),
            busy_timeout_ms: config.busy_timeout_ms,
            pool: effective_pool(config.pool.as_ref(), shared_pool),
        }
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn pick_pragma(
    name: &str,
    raw: &str,
    allowed: &[&'static str],
    fallback: &'static str,
) -> &'static str {
    let wanted = raw.trim().to_ascii_uppercase();
    allowed.iter().copied().find(|m| *m == wanted).unwrap_or_else(|| {
        warn!(pragma = name, value = raw, fallback, "Unsupported SQLite pragma value");
        fallback
    })
}

impl BackendProfile for SqliteProfile {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connection_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }

    fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    fn is_embedded(&self) -> bool {
        true
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Uuid | ColumnType::Text | ColumnType::LongText => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Int | ColumnType::BigInt | ColumnType::Bool => "INTEGER",
            ColumnType::Double => "REAL",
        }
    }

    fn native_bool(&self) -> bool {
        false
    }

    fn connection_init(&self) -> Vec<String> {
        vec![
            format!("PRAGMA journal_mode = {}", self.journal_mode),
            format!("PRAGMA synchronous = {}", self.synchronous),
            format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        ]
    }

    fn version_sql(&self) -> &'static str {
        "SELECT sqlite_version()"
    }

    fn table_exists(&self, table: &str) -> Statement {
        Statement::new(
            "schema.table_exists",
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .arg(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> Statement {
        Statement::new(
            "schema.column_exists",
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
        )
        .arg(table)
        .arg(column)
    }

    fn supports_add_column_if_not_exists(&self, _version: ServerVersion) -> bool {
        false
    }

    fn already_exists_codes(&self) -> &'static [&'static str] {
        &[]
    }

    fn already_exists_messages(&self) -> &'static [&'static str] {
        &["already exists", "duplicate column name"]
    }

    fn lock_codes(&self) -> &'static [&'static str] {
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
        &["5", "6", "261", "262", "517"]
    }

    fn lock_messages(&self) -> &'static [&'static str] {
        &["database is locked", "database table is locked"]
    }

    fn recovery_plan(&self) -> RecoveryPlan {
        // A fresh connection never owns the stuck transaction; folding the
        // WAL back into the main file releases what readers still pin.
        RecoveryPlan {
            checkpoint: Some("PRAGMA wal_checkpoint(TRUNCATE)"),
            ..COMMIT_THEN_ROLLBACK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_points_into_versioned_layout() {
        let profile = SqliteProfile::new(
            &SqliteConfig::default(),
            &PoolConfig::default(),
            Path::new("/srv/data"),
        );
        assert_eq!(
            profile.connection_url(),
            "sqlite:///srv/data/sqlite/v1/graves.db?mode=rwc"
        );
        assert!(profile.is_embedded());
        assert_eq!(profile.placeholder(3), "?");
        assert_eq!(
            profile.recovery_plan().checkpoint,
            Some("PRAGMA wal_checkpoint(TRUNCATE)")
        );
    }

    #[test]
    fn invalid_pragmas_fall_back() {
        let config = SqliteConfig {
            journal_mode: "wal".to_owned(),
            synchronous: "sometimes".to_owned(),
            busy_timeout_ms: 250,
            ..SqliteConfig::default()
        };
        let profile = SqliteProfile::new(&config, &PoolConfig::default(), Path::new("data"));
        assert_eq!(
            profile.connection_init(),
            vec![
                "PRAGMA journal_mode = WAL".to_owned(),
                "PRAGMA synchronous = NORMAL".to_owned(),
                "PRAGMA busy_timeout = 250".to_owned(),
            ]
        );
    }

    #[test]
    fn family_pool_override_wins() {
        let config = SqliteConfig {
            pool: Some(PoolConfig {
                max_pool_size: 1,
                ..PoolConfig::default()
            }),
            ..SqliteConfig::default()
        };
        let profile = SqliteProfile::new(&config, &PoolConfig::default(), Path::new("data"));
        assert_eq!(profile.pool_config().max_pool_size, 1);
    }
}
