//! Connection pooling over the sqlx `Any` driver.
//!
//! One [`ConnectionPool`] per running persistence stack. Sizing, timeouts,
//! and per-connection init statements come from the active
//! [`BackendProfile`]; nothing here branches on the family.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::any::AnyPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Row};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DbError;
use crate::profile::BackendProfile;

/// Statement used for connectivity tests, keep-alives, and the lock watchdog.
pub const HEALTH_CHECK_SQL: &str = "SELECT 1";

/// Checkout accounting shared by every clone of a pool.
#[derive(Debug, Default)]
struct CheckoutStats {
    checkouts: AtomicU64,
    leaks: AtomicU64,
}

/// Pool handle for the active backend.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: AnyPool,
    profile: Arc<dyn BackendProfile>,
    stats: Arc<CheckoutStats>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.profile.kind())
            .field("size", &self.pool.size())
            .field("checkouts", &self.checkouts())
            .field("leaks", &self.leaked_checkouts())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Open a pool for `profile`.
    ///
    /// Opening establishes at least one connection, so an unreachable
    /// backend fails here.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connectivity`] if no connection can be opened.
    pub async fn connect(profile: Arc<dyn BackendProfile>) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();

        let settings = profile.pool_config().clone();
        let init = Arc::new(profile.connection_init());
        let kind = profile.kind();

        let pool = AnyPoolOptions::new()
            .max_connections(settings.max_pool_size.max(1))
            .min_connections(settings.min_idle.min(settings.max_pool_size))
            .acquire_timeout(settings.connection_timeout())
            .idle_timeout(settings.idle_timeout())
            .max_lifetime(settings.max_lifetime())
            .after_connect(move |conn, _meta| {
                let init = Arc::clone(&init);
                Box::pin(async move {
                    for sql in init.iter() {
                        sqlx::query(sql).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect(&profile.connection_url())
            .await
            .map_err(|source| DbError::Connectivity {
                backend: kind.display_name(),
                source,
            })?;

        info!(
            backend = %kind,
            max_connections = settings.max_pool_size,
            min_idle = settings.min_idle,
            "Opened connection pool"
        );

        Ok(Self {
            pool,
            profile,
            stats: Arc::new(CheckoutStats::default()),
        })
    }

    /// The active backend profile.
    pub const fn profile(&self) -> &Arc<dyn BackendProfile> {
        &self.profile
    }

    /// Return a reference to the underlying [`AnyPool`].
    pub const fn inner(&self) -> &AnyPool {
        &self.pool
    }

    /// Check out a connection. Holding it past the configured leak
    /// threshold logs a warning when it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if acquisition times out or fails.
    pub async fn acquire(&self, purpose: &'static str) -> Result<PooledConnection, DbError> {
        let conn = self.pool.acquire().await?;
        self.stats.checkouts.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            inner: conn,
            purpose,
            acquired_at: Instant::now(),
            leak_threshold: self.profile.pool_config().leak_detection_threshold(),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Connections handed out by [`acquire`](Self::acquire) so far.
    pub fn checkouts(&self) -> u64 {
        self.stats.checkouts.load(Ordering::Relaxed)
    }

    /// Checkouts held past the leak detection threshold so far.
    pub fn leaked_checkouts(&self) -> u64 {
        self.stats.leaks.load(Ordering::Relaxed)
    }

    /// One-shot connectivity check.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connectivity`] if the check fails.
    pub async fn test_connectivity(&self) -> Result<(), DbError> {
        sqlx::query(HEALTH_CHECK_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| DbError::Connectivity {
                backend: self.profile.kind().display_name(),
                source,
            })?;
        debug!(backend = %self.profile.kind(), "Connectivity test passed");
        Ok(())
    }

    /// Version banner reported by the server.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the query fails or returns no text.
    pub async fn server_version(&self) -> Result<String, DbError> {
        let row = sqlx::query(self.profile.version_sql())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<String, _>(0)?)
    }

    /// Ping the pool every keep-alive interval until `shutdown` flips.
    pub fn spawn_keepalive(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let kind = self.profile.kind();
        let period = self.profile.pool_config().keepalive_interval();
        tokio::spawn(async move {
            if period.is_zero() {
                return;
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sqlx::query(HEALTH_CHECK_SQL).execute(&pool).await {
                            Ok(_) => debug!(backend = %kind, "Keep-alive ok"),
                            Err(e) => warn!(backend = %kind, error = %e, "Keep-alive ping failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(backend = %kind, "Keep-alive stopped");
        })
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(backend = %self.profile.kind(), "Connection pool closed");
    }
}

/// A checked-out connection with leak detection.
pub struct PooledConnection {
    inner: PoolConnection<Any>,
    purpose: &'static str,
    acquired_at: Instant,
    leak_threshold: Option<Duration>,
    stats: Arc<CheckoutStats>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("purpose", &self.purpose)
            .field("held_for", &self.held_for())
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// How long the connection has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Deref for PooledConnection {
    type Target = AnyConnection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let held = self.held_for();
        let Some(threshold) = self.leak_threshold else {
            return;
        };
        if held > threshold {
            self.stats.leaks.fetch_add(1, Ordering::Relaxed);
            warn!(
                purpose = self.purpose,
                held_ms = u64::try_from(held.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
                "Connection held past leak detection threshold"
            );
        }
    }
}
