//! Grave persistence for gravekeeper: a write-through cache in front of one
//! of six relational backends.
//!
//! The host talks to [`DataManager`] synchronously. Reads are served from the
//! [`CacheManager`]; writes update the cache first and are then executed on
//! ordered background lanes against the active backend.
//!
//! # Architecture
//!
//! ```text
//! Host call (sync)
//!     |
//!     +-- CacheManager ----------> answers reads immediately
//!     |
//!     +-- WriteQueue (lane by grave UUID)
//!             |
//!             +-- ConnectionPool --> BackendProfile (SQLite, H2, PostgreSQL,
//!                                    MySQL, MariaDB, CockroachDB)
//!
//! Background: LockWatchdog (ping + recover), pool keep-alive
//! Startup:    layout move -> connect -> legacy import -> schema -> bulk load
//! ```
//!
//! # Modules
//!
//! - [`manager`] -- The [`DataManager`] façade and startup sequence
//! - [`cache`] -- In-memory graves and chunk-indexed visual records
//! - [`profile`] -- Per-backend dialect, URLs, and error classification
//! - [`pool`] -- Connection pool with leak warnings and keep-alive
//! - [`schema`] -- Table definitions and idempotent schema setup
//! - [`mapping`] -- Row decoding and statement builders
//! - [`writer`] -- Ordered asynchronous write lanes
//! - [`watchdog`] -- Lock detection and recovery
//! - [`migration`] -- Legacy embedded store import
//! - [`layout`] -- On-disk placement of embedded database files
//! - [`statement`] -- Owned SQL statements with typed parameters
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Shared error types

pub mod cache;
pub mod config;
pub mod error;
pub mod layout;
pub mod manager;
pub mod mapping;
pub mod migration;
pub mod pool;
pub mod profile;
pub mod schema;
pub mod statement;
pub mod watchdog;
pub mod writer;

// Re-export primary types for convenience.
pub use cache::{CacheManager, ChunkData};
pub use config::{
    DatabaseConfig, GravekeeperConfig, LoggingConfig, PoolConfig, ServerConfig, SqliteConfig,
};
pub use error::{ConfigError, DbError};
pub use manager::{DataManager, LoadReport};
pub use migration::{MigrationEngine, MigrationReport, TableMigration};
pub use pool::ConnectionPool;
pub use profile::{BackendKind, BackendProfile, Capabilities, SchemaOutcome, ServerVersion};
pub use schema::{SchemaManager, SchemaReport};
pub use statement::{BindValue, Statement};
pub use watchdog::{LockWatchdog, WatchdogOutcome};
pub use writer::WriteQueue;
