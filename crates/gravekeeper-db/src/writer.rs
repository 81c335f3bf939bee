//! Background write lanes.
//!
//! Writes are submitted from the caller's thread without waiting and run on
//! a fixed set of tokio tasks ("lanes"). A statement's ordering key picks its
//! lane, so every statement for one grave runs in submission order while
//! different graves proceed concurrently. Failures are logged and dropped:
//! the cache stays authoritative until the next reload.

use std::sync::{Mutex, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::pool::ConnectionPool;
use crate::statement::Statement;

#[derive(Debug)]
enum LaneMessage {
    Execute(Statement),
    Barrier(oneshot::Sender<()>),
}

/// Ordered, asynchronous statement executor.
#[derive(Debug)]
pub struct WriteQueue {
    senders: RwLock<Vec<mpsc::UnboundedSender<LaneMessage>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Spawn `lanes` workers executing against `pool`. At least one lane is
    /// always started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(pool: &ConnectionPool, lanes: usize, native_bool: bool) -> Self {
        let lanes = lanes.max(1);
        let mut senders = Vec::with_capacity(lanes);
        let mut handles = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            handles.push(tokio::spawn(run_lane(lane, pool.clone(), rx, native_bool)));
        }
        debug!(lanes, "Write lanes started");
        Self {
            senders: RwLock::new(senders),
            handles: Mutex::new(handles),
        }
    }

    /// Number of running lanes; zero after shutdown.
    pub fn lanes(&self) -> usize {
        self.senders.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn lane_for(key: Uuid, lanes: usize) -> usize {
        let lanes_u128 = u128::try_from(lanes).unwrap_or(1).max(1);
        key.as_u128()
            .checked_rem(lanes_u128)
            .and_then(|lane| usize::try_from(lane).ok())
            .unwrap_or(0)
    }

    /// Queue one statement behind everything already queued for `key`.
    pub fn submit(&self, key: Uuid, statement: Statement) {
        self.submit_all(key, std::iter::once(statement));
    }

    /// Queue several statements for `key`, preserving their order.
    pub fn submit_all(&self, key: Uuid, statements: impl IntoIterator<Item = Statement>) {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = senders.get(Self::lane_for(key, senders.len())) else {
            for statement in statements {
                warn!(label = statement.label, "Write dropped: persistence is shut down");
            }
            return;
        };
        for statement in statements {
            if let Err(mpsc::error::SendError(LaneMessage::Execute(statement))) =
                sender.send(LaneMessage::Execute(statement))
            {
                warn!(label = statement.label, "Write dropped: lane has stopped");
            }
        }
    }

    /// Wait until every statement submitted before this call has run.
    pub async fn flush(&self) {
        let waiters: Vec<oneshot::Receiver<()>> = {
            let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
            senders
                .iter()
                .filter_map(|sender| {
                    let (tx, rx) = oneshot::channel();
                    sender.send(LaneMessage::Barrier(tx)).ok().map(|()| rx)
                })
                .collect()
        };
        for waiter in waiters {
            // A lane that stopped has nothing left to flush.
            let _ = waiter.await;
        }
    }

    /// Drain every lane and stop the workers. Later submissions are dropped
    /// with a warning.
    pub async fn shutdown(&self) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Write lane panicked");
            }
        }
        debug!("Write lanes stopped");
    }
}

async fn run_lane(
    lane: usize,
    pool: ConnectionPool,
    mut rx: mpsc::UnboundedReceiver<LaneMessage>,
    native_bool: bool,
) {
    while let Some(message) = rx.recv().await {
        match message {
            LaneMessage::Execute(statement) => execute(lane, &pool, &statement, native_bool).await,
            LaneMessage::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Run one statement on a checked-out connection. Failures are logged.
async fn execute(lane: usize, pool: &ConnectionPool, statement: &Statement, native_bool: bool) {
    let mut conn = match pool.acquire(statement.label).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(lane, label = statement.label, error = %e, "Write dropped: no connection");
            return;
        }
    };
    match statement.query(native_bool).execute(&mut *conn).await {
        Ok(result) => debug!(
            lane,
            label = statement.label,
            rows = result.rows_affected(),
            "Write applied"
        ),
        Err(e) => error!(
            lane,
            label = statement.label,
            sql = %statement.sql,
            error = %e,
            "Write failed"
        ),
    }
}
