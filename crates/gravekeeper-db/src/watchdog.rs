//! Lock recovery watchdog.
//!
//! Periodically pings the pool. When the ping fails with an error the
//! profile classifies as a lock, a fresh connection outside the pool tries to
//! release it: commit first, roll back if the commit fails, and finally run
//! the family's checkpoint statement if it has one. Everything here is
//! best-effort and only logs.

use std::time::Duration;

use sqlx::{AnyConnection, Connection};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pool::{ConnectionPool, HEALTH_CHECK_SQL};
use crate::profile::BackendKind;

/// Result of one watchdog pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The ping succeeded.
    Healthy,
    /// The ping failed for a reason other than a lock.
    Unavailable,
    /// A lock was detected and the commit statement succeeded.
    Committed,
    /// A lock was detected, the commit failed, and the rollback succeeded.
    RolledBack,
    /// A lock was detected, neither transaction statement applied, and the
    /// family's checkpoint statement succeeded.
    Checkpointed,
    /// A lock was detected and no recovery statement succeeded.
    RecoveryFailed,
}

/// Periodic lock check for one pool.
#[derive(Debug, Clone)]
pub struct LockWatchdog {
    pool: ConnectionPool,
}

impl LockWatchdog {
    /// Watch `pool`.
    pub const fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run one ping and, if it reports a lock, one recovery attempt.
    pub async fn tick(&self) -> WatchdogOutcome {
        let kind = self.pool.profile().kind();
        match sqlx::query(HEALTH_CHECK_SQL).execute(self.pool.inner()).await {
            Ok(_) => {
                debug!(backend = %kind, "Watchdog ping ok");
                WatchdogOutcome::Healthy
            }
            Err(e) if self.pool.profile().is_lock_error(&e) => {
                warn!(backend = %kind, error = %e, "Backend appears locked; attempting recovery");
                self.recover().await
            }
            Err(e) => {
                warn!(backend = %kind, error = %e, "Watchdog ping failed");
                WatchdogOutcome::Unavailable
            }
        }
    }

    /// Open a connection outside the pool and run the profile's recovery
    /// statements.
    pub async fn recover(&self) -> WatchdogOutcome {
        let profile = self.pool.profile();
        let kind = profile.kind();
        let plan = profile.recovery_plan();

        let mut conn = match AnyConnection::connect(&profile.connection_url()).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(backend = %kind, error = %e, "Recovery connection failed");
                return WatchdogOutcome::RecoveryFailed;
            }
        };

        let outcome = match sqlx::query(plan.commit).execute(&mut conn).await {
            Ok(_) => {
                info!(backend = %kind, statement = plan.commit, "Lock recovery succeeded");
                WatchdogOutcome::Committed
            }
            Err(commit_err) => {
                debug!(backend = %kind, statement = plan.commit, error = %commit_err, "Lock recovery attempt failed");
                match sqlx::query(plan.rollback).execute(&mut conn).await {
                    Ok(_) => {
                        info!(backend = %kind, statement = plan.rollback, "Lock recovery succeeded");
                        WatchdogOutcome::RolledBack
                    }
                    Err(rollback_err) => {
                        debug!(
                            backend = %kind,
                            statement = plan.rollback,
                            error = %rollback_err,
                            "Lock recovery attempt failed"
                        );
                        Self::checkpoint(&mut conn, plan.checkpoint, kind).await
                    }
                }
            }
        };

        if let Err(e) = conn.close().await {
            debug!(backend = %kind, error = %e, "Recovery connection did not close cleanly");
        }
        outcome
    }

    async fn checkpoint(
        conn: &mut AnyConnection,
        statement: Option<&'static str>,
        kind: BackendKind,
    ) -> WatchdogOutcome {
        let Some(statement) = statement else {
            error!(backend = %kind, "Lock recovery failed");
            return WatchdogOutcome::RecoveryFailed;
        };
        match sqlx::query(statement).execute(conn).await {
            Ok(_) => {
                info!(backend = %kind, statement, "Lock recovery succeeded");
                WatchdogOutcome::Checkpointed
            }
            Err(e) => {
                error!(backend = %kind, statement, error = %e, "Lock recovery failed");
                WatchdogOutcome::RecoveryFailed
            }
        }
    }

    /// Run [`tick`](Self::tick) every `interval` until `shutdown` flips.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if interval.is_zero() {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Lock watchdog stopped");
        })
    }
}
