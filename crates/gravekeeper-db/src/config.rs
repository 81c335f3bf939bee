//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `gravekeeper.yaml`. Every field has a
//! default, so an empty file yields a working embedded `SQLite` setup. Each
//! server family has its own connection block; only the block matching
//! `database.backend` is read.
//!
//! ```yaml
//! data_dir: data
//! database:
//!   backend: postgresql
//!   postgresql:
//!     host: db.internal
//!     password: secret
//!     ssl: true
//!   pool:
//!     max_pool_size: 8
//! logging:
//!   level: debug
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, DbError};

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GravekeeperConfig {
    /// Directory holding embedded database files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Backend selection and connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GravekeeperConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GravekeeperConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override file values:
    /// - `GRAVEKEEPER_DATA_DIR` overrides `data_dir`
    /// - `GRAVEKEEPER_DB_BACKEND` overrides `database.backend`
    /// - `GRAVEKEEPER_DB_PASSWORD` overrides the selected family's password
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse_yaml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_yaml(yaml)
    }

    fn parse_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml reads an empty document as unit, not as an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override file values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GRAVEKEEPER_DATA_DIR") {
            self.data_dir = val;
        }
        self.database.apply_env_overrides();
    }
}

/// Backend selection and connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Backend family identifier. Validated when persistence starts.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Embedded single-file store settings.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// H2 server-mode connection settings.
    #[serde(default)]
    pub h2: ServerConfig,

    /// `PostgreSQL` connection settings.
    #[serde(default)]
    pub postgresql: ServerConfig,

    /// `MySQL` connection settings.
    #[serde(default)]
    pub mysql: ServerConfig,

    /// `MariaDB` connection settings.
    #[serde(default)]
    pub mariadb: ServerConfig,

    /// `CockroachDB` connection settings.
    #[serde(default)]
    pub cockroachdb: ServerConfig,

    /// Pool settings shared by every family unless overridden per family.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Seconds between lock-recovery checks.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,

    /// Number of background write lanes.
    #[serde(default = "default_writer_lanes")]
    pub writer_lanes: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite: SqliteConfig::default(),
            h2: ServerConfig::default(),
            postgresql: ServerConfig::default(),
            mysql: ServerConfig::default(),
            mariadb: ServerConfig::default(),
            cockroachdb: ServerConfig::default(),
            pool: PoolConfig::default(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            writer_lanes: default_writer_lanes(),
        }
    }
}

impl DatabaseConfig {
    /// Override the backend and the selected family's password from the
    /// environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GRAVEKEEPER_DB_BACKEND") {
            self.backend = val;
        }
        if let Ok(val) = std::env::var("GRAVEKEEPER_DB_PASSWORD") {
            let backend = self.backend.clone();
            if let Some(server) = self.server_mut(&backend) {
                server.password = val;
            }
        }
    }

    fn server_mut(&mut self, backend: &str) -> Option<&mut ServerConfig> {
        match crate::profile::BackendKind::parse(backend).ok()? {
            crate::profile::BackendKind::Sqlite => None,
            crate::profile::BackendKind::H2 => Some(&mut self.h2),
            crate::profile::BackendKind::PostgreSql => Some(&mut self.postgresql),
            crate::profile::BackendKind::MySql => Some(&mut self.mysql),
            crate::profile::BackendKind::MariaDb => Some(&mut self.mariadb),
            crate::profile::BackendKind::CockroachDb => Some(&mut self.cockroachdb),
        }
    }

    /// Interval between lock-recovery checks.
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Reject values persistence cannot start with.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.writer_lanes == 0 {
            return Err(DbError::Config("database.writer_lanes must be at least 1".to_owned()));
        }
        let file = self.sqlite.file.trim();
        if file.is_empty() || file.contains(['/', '\\']) {
            return Err(DbError::Config(format!(
                "database.sqlite.file must be a plain file name, got `{}`",
                self.sqlite.file
            )));
        }
        let pools = [
            ("database.pool", Some(&self.pool)),
            ("database.sqlite.pool", self.sqlite.pool.as_ref()),
            ("database.h2.pool", self.h2.pool.as_ref()),
            ("database.postgresql.pool", self.postgresql.pool.as_ref()),
            ("database.mysql.pool", self.mysql.pool.as_ref()),
            ("database.mariadb.pool", self.mariadb.pool.as_ref()),
            ("database.cockroachdb.pool", self.cockroachdb.pool.as_ref()),
        ];
        for (field, pool) in pools {
            if pool.is_some_and(|p| p.max_pool_size == 0) {
                return Err(DbError::Config(format!("{field}.max_pool_size must be at least 1")));
            }
        }
        Ok(())
    }
}

/// Embedded single-file store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteConfig {
    /// Database file name, relative to the versioned layout directory.
    #[serde(default = "default_sqlite_file")]
    pub file: String,

    /// `PRAGMA journal_mode` applied to every connection.
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,

    /// `PRAGMA synchronous` applied to every connection.
    #[serde(default = "default_synchronous")]
    pub synchronous: String,

    /// `PRAGMA busy_timeout` in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Pool override for the embedded store.
    #[serde(default)]
    pub pool: Option<PoolConfig>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            file: default_sqlite_file(),
            journal_mode: default_journal_mode(),
            synchronous: default_synchronous(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool: None,
        }
    }
}

/// Connection settings for a client/server family.
///
/// Port and username fall back to the family's conventional defaults when
/// unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Server hostname.
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port; the family default when `None`.
    #[serde(default)]
    pub port: Option<u16>,

    /// Login user; the family default when `None`.
    #[serde(default)]
    pub username: Option<String>,

    /// Login password.
    #[serde(default)]
    pub password: String,

    /// Database (schema) name.
    #[serde(default = "default_database_name")]
    pub database: String,

    /// Require TLS on the connection.
    #[serde(default)]
    pub ssl: bool,

    /// Pool override for this family.
    #[serde(default)]
    pub pool: Option<PoolConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            username: None,
            password: String::new(),
            database: default_database_name(),
            ssl: false,
            pool: None,
        }
    }
}

/// Connection pool sizing and lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    /// Maximum open connections.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Connections kept open while idle.
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,

    /// How long acquiring a connection may wait, in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Idle time after which a connection is closed, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Age after which a connection is recycled, in milliseconds.
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,

    /// Hold time after which a checked-out connection is reported as a
    /// possible leak, in milliseconds. Zero disables the check.
    #[serde(default = "default_leak_detection_threshold_ms")]
    pub leak_detection_threshold_ms: u64,

    /// Seconds between keep-alive pings.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            min_idle: default_min_idle(),
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
            leak_detection_threshold_ms: default_leak_detection_threshold_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl PoolConfig {
    /// Acquire timeout.
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Idle timeout.
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Maximum connection lifetime.
    pub const fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Leak detection threshold, if enabled.
    pub const fn leak_detection_threshold(&self) -> Option<Duration> {
        if self.leak_detection_threshold_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.leak_detection_threshold_ms))
        }
    }

    /// Keep-alive ping interval.
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_data_dir() -> String {
    "data".to_owned()
}

fn default_backend() -> String {
    "sqlite".to_owned()
}

fn default_sqlite_file() -> String {
    "graves.db".to_owned()
}

fn default_journal_mode() -> String {
    "WAL".to_owned()
}

fn default_synchronous() -> String {
    "NORMAL".to_owned()
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_database_name() -> String {
    "gravekeeper".to_owned()
}

const fn default_max_pool_size() -> u32 {
    10
}

const fn default_min_idle() -> u32 {
    2
}

const fn default_connection_timeout_ms() -> u64 {
    5_000
}

const fn default_idle_timeout_ms() -> u64 {
    600_000
}

const fn default_max_lifetime_ms() -> u64 {
    1_800_000
}

const fn default_leak_detection_threshold_ms() -> u64 {
    10_000
}

const fn default_keepalive_interval_secs() -> u64 {
    60
}

const fn default_watchdog_interval_secs() -> u64 {
    25
}

const fn default_writer_lanes() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_embedded_sqlite() {
        let config = GravekeeperConfig::parse("").unwrap_or_default();
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.database.backend, "sqlite");
        assert_eq!(config.database.sqlite.file, "graves.db");
        assert_eq!(config.database.watchdog_interval_secs, 25);
        assert_eq!(config.database.pool.max_pool_size, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
data_dir: "/srv/graves"
database:
  backend: "postgresql"
  postgresql:
    host: "db.internal"
    port: 6432
    username: "graves"
    password: "hunter2"
    database: "graves_prod"
    ssl: true
    pool:
      max_pool_size: 20
  pool:
    max_pool_size: 8
    min_idle: 1
    leak_detection_threshold_ms: 0
  watchdog_interval_secs: 10
  writer_lanes: 2
logging:
  level: "debug"
  json: true
"#;
        let config = GravekeeperConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.unwrap_or_default();

        assert_eq!(config.data_dir, "/srv/graves");
        assert_eq!(config.database.backend, "postgresql");
        assert_eq!(config.database.postgresql.host, "db.internal");
        assert_eq!(config.database.postgresql.port, Some(6432));
        assert!(config.database.postgresql.ssl);
        assert_eq!(
            config.database.postgresql.pool.as_ref().map(|p| p.max_pool_size),
            Some(20)
        );
        assert_eq!(config.database.pool.max_pool_size, 8);
        assert_eq!(config.database.pool.leak_detection_threshold(), None);
        assert_eq!(config.database.watchdog_interval(), Duration::from_secs(10));
        assert_eq!(config.database.writer_lanes, 2);
        assert!(config.logging.json);

        // Untouched families keep their defaults.
        assert_eq!(config.database.mysql.port, None);
        assert_eq!(config.database.mysql.host, "localhost");
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = GravekeeperConfig::parse("database:\n  backend: mariadb\n");
        assert!(config.is_ok());
        let config = config.unwrap_or_default();
        assert_eq!(config.database.backend, "mariadb");
        assert_eq!(config.database.sqlite.journal_mode, "WAL");
        assert_eq!(config.database.pool.connection_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        assert!(DatabaseConfig::default().validate().is_ok());

        let no_lanes = DatabaseConfig {
            writer_lanes: 0,
            ..DatabaseConfig::default()
        };
        assert!(matches!(no_lanes.validate(), Err(DbError::Config(msg)) if msg.contains("writer_lanes")));

        let mut nested = DatabaseConfig::default();
        nested.sqlite.file = "../graves.db".to_owned();
        assert!(matches!(nested.validate(), Err(DbError::Config(msg)) if msg.contains("sqlite.file")));

        let mut empty_pool = DatabaseConfig::default();
        empty_pool.mysql.pool = Some(PoolConfig {
            max_pool_size: 0,
            ..PoolConfig::default()
        });
        assert!(
            matches!(empty_pool.validate(), Err(DbError::Config(msg)) if msg.contains("mysql.pool"))
        );
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let config = GravekeeperConfig::parse("database: [unclosed");
        assert!(matches!(config, Err(ConfigError::Yaml { .. })));
    }
}
