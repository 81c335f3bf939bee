//! Standalone host for gravekeeper persistence.
//!
//! Runs the persistence layer outside a game server: useful for importing a
//! legacy store into a server backend, warming a new database, or checking
//! that a configuration connects.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `gravekeeper.yaml` (or the path given as the
//!    first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Start the data manager (layout move, connect, legacy import, schema,
//!    cache load, background tasks)
//! 4. Wait for Ctrl-C; on Unix, `SIGHUP` switches to the backend named in
//!    the re-read configuration
//! 5. Flush pending writes and shut down

mod error;

use std::path::{Path, PathBuf};

use gravekeeper_db::{DataManager, GravekeeperConfig, LoggingConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG: &str = "gravekeeper.yaml";

/// Daemon entry point.
///
/// # Errors
///
/// Returns an error if configuration, logging, or persistence startup fails.
#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!(
        config = %config_path.display(),
        backend = %config.database.backend,
        data_dir = %config.data_dir,
        "gravekeeper starting"
    );

    // 3. Start persistence.
    let manager = match DataManager::start(config.database.clone(), &config.data_dir).await {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Persistence failed to start");
            return Err(e.into());
        }
    };
    log_status(&manager);

    // 4. Run until interrupted.
    wait_for_shutdown(&manager, &config_path).await?;

    // 5. Shut down.
    manager.flush().await;
    manager.shutdown().await;
    info!("gravekeeper shutdown complete");
    Ok(())
}

/// Load configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> Result<GravekeeperConfig, DaemonError> {
    if path.exists() {
        Ok(GravekeeperConfig::from_file(path)?)
    } else {
        let mut config = GravekeeperConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) -> Result<(), DaemonError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| DaemonError::Logging {
        message: e.to_string(),
    })
}

fn log_status(manager: &DataManager) {
    let load = manager.load_report();
    let schema = manager.schema_report();
    info!(
        backend = %manager.backend(),
        version = %manager.database_version(),
        tables_created = schema.tables_created,
        columns_added = schema.columns_added,
        graves = load.graves,
        blocks = load.blocks,
        entities = load.entities,
        skipped = load.skipped,
        "Persistence ready"
    );
    if let Some(migration) = manager.migration_report() {
        info!(
            source = %migration.source.display(),
            tables = migration.tables.len(),
            rows = migration.total_rows(),
            complete = migration.succeeded(),
            "Legacy store imported"
        );
    }
}

/// Switch to the backend named in the configuration file.
#[cfg(unix)]
async fn reload_from(manager: &DataManager, config_path: &Path) {
    let kind = match load_config(config_path)
        .map_err(|e| e.to_string())
        .and_then(|c| gravekeeper_db::BackendKind::parse(&c.database.backend).map_err(|e| e.to_string()))
    {
        Ok(kind) => kind,
        Err(e) => {
            warn!(error = %e, "Reload skipped: configuration is unusable");
            return;
        }
    };
    match manager.reload(kind).await {
        Ok(Ok(())) => log_status(manager),
        Ok(Err(e)) => error!(backend = %kind, error = %e, "Reload failed; keeping current backend"),
        Err(e) => error!(backend = %kind, error = %e, "Reload task ended abnormally"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(manager: &DataManager, config_path: &Path) -> Result<(), DaemonError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup =
        signal(SignalKind::hangup()).map_err(|source| DaemonError::Signal { source })?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|source| DaemonError::Signal { source })?;
                info!("Shutdown signal received");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("Reload signal received");
                reload_from(manager, config_path).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_manager: &DataManager, _config_path: &Path) -> Result<(), DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| DaemonError::Signal { source })?;
    info!("Shutdown signal received");
    Ok(())
}
