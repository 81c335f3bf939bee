//! The persistence façade used by the host.
//!
//! [`DataManager`] owns the cache and one running persistence stack (pool,
//! write lanes, watchdog, keep-alive). Every collaborator call is
//! synchronous: it updates the cache and queues the matching statement.
//! Backend I/O only happens on tokio tasks.
//!
//! Start sequence:
//!
//! 1. resolve the backend profile (unknown identifiers are fatal)
//! 2. move an embedded store into the versioned layout
//! 3. open the pool and run the connectivity test (fatal on failure)
//! 4. resolve capabilities from the server version
//! 5. import a legacy embedded store into a server backend
//! 6. create or upgrade the schema
//! 7. bulk-load graves, blocks, and entities into the cache
//! 8. start write lanes, lock watchdog, and keep-alive
//!
//! While a reload is switching stacks, collaborator writes still reach the
//! cache at once but their statements are held in a journal. The journal is
//! replayed onto the freshly loaded cache and into the new stack in the same
//! step that swaps the stacks, so nothing written during the switch is lost.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::TryStreamExt;
use gravekeeper_types::{BlockData, BlockLocation, EntityData, EntityKind, Grave, GraveId, GraveUpdate};
use sqlx::any::AnyRow;
use sqlx::AnyConnection;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::config::DatabaseConfig;
use crate::error::DbError;
use crate::layout;
use crate::mapping;
use crate::migration::{MigrationEngine, MigrationReport};
use crate::pool::ConnectionPool;
use crate::profile::{BackendKind, BackendProfile, Capabilities};
use crate::schema::{entity_table, SchemaManager, SchemaReport, BLOCK_TABLE, GRAVE_TABLE};
use crate::statement::Statement;
use crate::watchdog::LockWatchdog;
use crate::writer::WriteQueue;

/// What the bulk load put into the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Graves loaded.
    pub graves: usize,
    /// Block records loaded.
    pub blocks: usize,
    /// Entity records loaded, across all kinds.
    pub entities: usize,
    /// Rows skipped as unreadable or orphaned.
    pub skipped: usize,
}

/// A collaborator write, kept in a form that can be rendered for any family.
#[derive(Debug, Clone)]
enum WriteOp {
    AddGrave(GraveId, Box<Grave>),
    RemoveGrave(GraveId),
    UpdateGrave(GraveId, GraveUpdate),
    AddBlock(BlockData),
    RemoveBlock(BlockData),
    AddEntity(EntityData),
    RemoveEntity(EntityData),
}

impl WriteOp {
    /// Ordering key: every statement for one grave shares a lane.
    const fn key(&self) -> Uuid {
        match self {
            Self::AddGrave(id, _) | Self::RemoveGrave(id) | Self::UpdateGrave(id, _) => {
                id.into_inner()
            }
            Self::AddBlock(block) | Self::RemoveBlock(block) => block.grave_id.into_inner(),
            Self::AddEntity(entity) | Self::RemoveEntity(entity) => entity.grave_id.into_inner(),
        }
    }

    /// Apply to `cache`. Returns `false` when there is nothing to persist.
    fn apply(&self, cache: &CacheManager) -> bool {
        match self {
            Self::AddGrave(_, grave) => {
                cache.add_grave(grave.as_ref().clone());
                true
            }
            Self::RemoveGrave(id) => {
                cache.remove_grave(*id);
                true
            }
            Self::UpdateGrave(id, update) => cache.update_grave(*id, update),
            Self::AddBlock(block) => {
                cache.add_block_data(block.clone());
                true
            }
            Self::RemoveBlock(block) => {
                cache.remove_block_data(&block.location);
                true
            }
            Self::AddEntity(entity) => {
                cache.add_entity_data(entity.clone());
                true
            }
            Self::RemoveEntity(entity) => {
                cache.remove_entity_data(entity);
                true
            }
        }
    }

    fn statement(&self, profile: &dyn BackendProfile) -> Result<Statement, DbError> {
        Ok(match self {
            Self::AddGrave(_, grave) => mapping::grave_insert(profile, grave)?,
            Self::RemoveGrave(id) => mapping::grave_delete(profile, *id),
            Self::UpdateGrave(id, update) => mapping::grave_update(profile, *id, update),
            Self::AddBlock(block) => mapping::block_insert(profile, block),
            Self::RemoveBlock(block) => mapping::block_delete(profile, &block.location),
            Self::AddEntity(entity) => mapping::entity_insert(profile, entity),
            Self::RemoveEntity(entity) => {
                mapping::entity_delete(profile, entity.kind, entity.entity_id)
            }
        })
    }
}

/// One running backend: pool, lanes, and background tasks.
struct PersistenceStack {
    profile: Arc<dyn BackendProfile>,
    pool: ConnectionPool,
    capabilities: Capabilities,
    writer: WriteQueue,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    schema: SchemaReport,
    migration: Option<MigrationReport>,
}

impl PersistenceStack {
    async fn open(
        kind: BackendKind,
        config: &DatabaseConfig,
        data_dir: &Path,
    ) -> Result<(Self, CacheManager, LoadReport), DbError> {
        let profile = kind.profile(config, data_dir);
        info!(backend = %kind, "Starting persistence");

        if profile.is_embedded() {
            layout::migrate_layout(data_dir, &config.sqlite.file)?;
        }

        let pool = ConnectionPool::connect(Arc::clone(&profile)).await?;
        pool.test_connectivity().await?;

        let banner = pool.server_version().await?;
        let capabilities = Capabilities::resolve(profile.as_ref(), &banner);
        info!(
            backend = %kind,
            version = %capabilities.server_version,
            add_column_if_not_exists = capabilities.add_column_if_not_exists,
            "Backend capabilities resolved"
        );

        let migration = if profile.is_embedded() {
            None
        } else if let Some(legacy) = layout::find_legacy_store(data_dir, &config.sqlite.file) {
            let engine = MigrationEngine::new(&pool, capabilities.native_bool);
            match Box::pin(engine.migrate(&legacy)).await {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(source = %legacy.display(), error = %e, "Legacy migration failed");
                    None
                }
            }
        } else {
            None
        };

        let schema = SchemaManager::new(&pool, &capabilities).setup_tables().await?;

        let cache = CacheManager::new();
        let loaded = load_into(&pool, &cache).await?;

        let writer = WriteQueue::start(&pool, config.writer_lanes, capabilities.native_bool);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            LockWatchdog::new(pool.clone()).spawn(config.watchdog_interval(), shutdown_rx.clone()),
            pool.spawn_keepalive(shutdown_rx),
        ];

        Ok((
            Self {
                profile,
                pool,
                capabilities,
                writer,
                shutdown,
                tasks: Mutex::new(tasks),
                schema,
                migration,
            },
            cache,
            loaded,
        ))
    }

    fn persist(&self, op: &WriteOp) {
        match op.statement(self.profile.as_ref()) {
            Ok(statement) => self.writer.submit(op.key(), statement),
            Err(e) => warn!(error = %e, "Write dropped: statement could not be built"),
        }
    }

    async fn close(&self) {
        self.writer.flush().await;
        self.writer.shutdown().await;
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.pool.close().await;
    }
}

/// Stream the rows of `sql`, decode each one, and hand it to `keep`.
/// Returns how many rows were kept and how many were skipped. Unreadable
/// rows are skipped with a warning; `keep` logs its own rejections.
async fn load_rows<T>(
    conn: &mut AnyConnection,
    sql: &str,
    table: &str,
    decode: impl Fn(&AnyRow) -> Result<T, DbError>,
    mut keep: impl FnMut(T) -> bool,
) -> Result<(usize, usize), DbError> {
    let (mut kept, mut skipped) = (0_usize, 0_usize);
    let mut rows = sqlx::query(sql).fetch(conn);
    while let Some(row) = rows.try_next().await? {
        let accepted = match decode(&row) {
            Ok(record) => keep(record),
            Err(e) => {
                warn!(table, error = %e, "Skipping unreadable row");
                false
            }
        };
        if accepted {
            kept = kept.saturating_add(1);
        } else {
            skipped = skipped.saturating_add(1);
        }
    }
    Ok((kept, skipped))
}

/// Read every table into `cache`. Unreadable rows and rows whose grave is
/// not loaded are skipped with a warning.
async fn load_into(pool: &ConnectionPool, cache: &CacheManager) -> Result<LoadReport, DbError> {
    let profile = pool.profile().as_ref();
    let mut conn = pool.acquire("cache.load").await?;

    let (graves, skipped_graves) = load_rows(
        &mut conn,
        &mapping::select_sql(profile, &GRAVE_TABLE),
        GRAVE_TABLE.name,
        mapping::grave_from_row,
        |grave| {
            if grave.location_death.is_none() {
                warn!(grave = %grave.id, "Skipping grave without a death location");
                return false;
            }
            cache.add_grave(grave);
            true
        },
    )
    .await?;

    let (blocks, skipped_blocks) = load_rows(
        &mut conn,
        &mapping::select_sql(profile, &BLOCK_TABLE),
        BLOCK_TABLE.name,
        mapping::block_from_row,
        |block| {
            if !cache.contains_grave(block.grave_id) {
                warn!(grave = %block.grave_id, location = %block.location, "Skipping orphan block");
                return false;
            }
            cache.add_block_data(block);
            true
        },
    )
    .await?;

    let mut report = LoadReport {
        graves,
        blocks,
        entities: 0,
        skipped: skipped_graves.saturating_add(skipped_blocks),
    };
    for kind in EntityKind::ALL {
        let table = entity_table(kind);
        let (entities, skipped) = load_rows(
            &mut conn,
            &mapping::select_sql(profile, &table),
            table.name,
            |row| mapping::entity_from_row(kind, row),
            |entity| {
                if !cache.contains_grave(entity.grave_id) {
                    warn!(grave = %entity.grave_id, kind = %kind, "Skipping orphan entity");
                    return false;
                }
                cache.add_entity_data(entity);
                true
            },
        )
        .await?;
        report.entities = report.entities.saturating_add(entities);
        report.skipped = report.skipped.saturating_add(skipped);
    }

    info!(
        graves = report.graves,
        blocks = report.blocks,
        entities = report.entities,
        skipped = report.skipped,
        "Cache loaded"
    );
    Ok(report)
}

struct Inner {
    config: DatabaseConfig,
    data_dir: PathBuf,
    cache: CacheManager,
    stack: RwLock<Arc<PersistenceStack>>,
    load: RwLock<LoadReport>,
    runtime: Handle,
    reload_lock: tokio::sync::Mutex<()>,
    /// Write gate. `Some` while a reload holds statements back.
    journal: Mutex<Option<Vec<WriteOp>>>,
    closed: AtomicBool,
}

/// Cache-first persistence façade. Cheap to clone.
#[derive(Clone)]
pub struct DataManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("backend", &self.backend())
            .field("graves", &self.inner.cache.grave_count())
            .finish_non_exhaustive()
    }
}

impl DataManager {
    /// Start persistence for the configured backend and load the cache.
    ///
    /// Must be called from within a tokio runtime; the runtime is kept for
    /// later [`reload`](Self::reload) calls.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] for unusable settings,
    /// [`DbError::UnknownBackend`] for an unrecognized backend,
    /// [`DbError::Connectivity`] if the backend cannot be reached, and
    /// [`DbError::Schema`] if the schema cannot be set up.
    pub async fn start(config: DatabaseConfig, data_dir: impl Into<PathBuf>) -> Result<Self, DbError> {
        let data_dir = data_dir.into();
        config.validate()?;
        let kind = BackendKind::parse(&config.backend)?;
        let (stack, cache, load) = Box::pin(PersistenceStack::open(kind, &config, &data_dir)).await?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                data_dir,
                cache,
                stack: RwLock::new(Arc::new(stack)),
                load: RwLock::new(load),
                runtime: Handle::current(),
                reload_lock: tokio::sync::Mutex::new(()),
                journal: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn stack(&self) -> Arc<PersistenceStack> {
        Arc::clone(&self.inner.stack.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn journal(&self) -> MutexGuard<'_, Option<Vec<WriteOp>>> {
        self.inner.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `op` to the cache with `apply`, then persist it or, during a
    /// reload, journal it. Both happen under the write gate. Returns what
    /// `apply` returned; `false` persists nothing.
    fn write_with(&self, op: WriteOp, apply: impl FnOnce(&WriteOp, &CacheManager) -> bool) -> bool {
        let mut journal = self.journal();
        if !apply(&op, &self.inner.cache) {
            return false;
        }
        let Some(pending) = journal.as_mut() else {
            self.stack().persist(&op);
            return true;
        };
        pending.push(op);
        true
    }

    fn write(&self, op: WriteOp) -> bool {
        self.write_with(op, WriteOp::apply)
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(DbError::ShutDown)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Graves
    // =========================================================================

    /// Cache a new grave and queue its insert.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingLocation`] if the grave has no death
    /// location (the cache is left untouched), or [`DbError::ShutDown`] after
    /// [`shutdown`](Self::shutdown).
    pub fn add_grave(&self, grave: Grave) -> Result<(), DbError> {
        self.ensure_open()?;
        if grave.location_death.is_none() {
            return Err(DbError::MissingLocation(grave.id));
        }
        self.write(WriteOp::AddGrave(grave.id, Box::new(grave)));
        Ok(())
    }

    /// Evict a grave and queue its delete. Returns the evicted record.
    pub fn remove_grave(&self, id: GraveId) -> Option<Grave> {
        let mut removed = None;
        self.write_with(WriteOp::RemoveGrave(id), |_, cache| {
            removed = cache.remove_grave(id);
            true
        });
        removed
    }

    /// Update one column of a cached grave and queue the change. Returns
    /// `false`, and writes nothing, if the grave is not cached.
    pub fn update_grave(&self, id: GraveId, update: GraveUpdate) -> bool {
        self.write(WriteOp::UpdateGrave(id, update))
    }

    /// The oldest grave owned by `owner`.
    pub fn get_oldest_grave(&self, owner: Uuid) -> Option<Grave> {
        self.inner.cache.get_oldest_grave(owner)
    }

    /// Snapshot of every cached grave.
    pub fn grave_map(&self) -> std::collections::HashMap<GraveId, Grave> {
        self.inner.cache.grave_map()
    }

    /// A cached grave.
    pub fn get_grave(&self, id: GraveId) -> Option<Grave> {
        self.inner.cache.get_grave(id)
    }

    // =========================================================================
    // Visual records
    // =========================================================================

    /// Cache block records and queue their inserts.
    pub fn add_block_data(&self, blocks: Vec<BlockData>) {
        for block in blocks {
            self.write(WriteOp::AddBlock(block));
        }
    }

    /// Forget block records and queue their deletes, keyed by location.
    pub fn remove_block_data(&self, blocks: &[BlockData]) {
        for block in blocks {
            self.write(WriteOp::RemoveBlock(block.clone()));
        }
    }

    /// Cache entity records and queue their inserts.
    pub fn add_entity_data(&self, entities: Vec<EntityData>) {
        for entity in entities {
            self.write(WriteOp::AddEntity(entity));
        }
    }

    /// Forget entity records and queue their deletes, keyed by entity UUID.
    pub fn remove_entity_data(&self, entities: &[EntityData]) {
        for entity in entities {
            self.write(WriteOp::RemoveEntity(entity.clone()));
        }
    }

    /// Whether a cached grave owns the block at `location`.
    pub fn has_grave_at_location(&self, location: &BlockLocation) -> bool {
        self.inner.cache.has_grave_at_location(location)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// The active backend family.
    pub fn backend(&self) -> BackendKind {
        self.stack().profile.kind()
    }

    /// Version banner reported by the active backend.
    pub fn database_version(&self) -> String {
        self.stack().capabilities.version_banner.clone()
    }

    /// Capabilities of the active backend.
    pub fn capabilities(&self) -> Capabilities {
        self.stack().capabilities.clone()
    }

    /// What schema setup changed when the active backend started.
    pub fn schema_report(&self) -> SchemaReport {
        self.stack().schema
    }

    /// Legacy import performed when the active backend started, if any.
    pub fn migration_report(&self) -> Option<MigrationReport> {
        self.stack().migration.clone()
    }

    /// What the last bulk load put into the cache.
    pub fn load_report(&self) -> LoadReport {
        *self.inner.load.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cache, for read paths and scratch state.
    pub fn cache(&self) -> &CacheManager {
        &self.inner.cache
    }

    /// Directory holding embedded database files.
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Switch to `kind` in the background.
    ///
    /// Pending writes are flushed to the current backend, a new stack is
    /// started (running any legacy import), the cache is replaced with what
    /// the new backend holds, and the old stack is shut down. Writes made
    /// while the switch runs are replayed onto the new cache and backend. If
    /// the new backend fails to start the current one stays active and
    /// receives those writes instead.
    pub fn reload(&self, kind: BackendKind) -> JoinHandle<Result<(), DbError>> {
        let manager = self.clone();
        self.inner.runtime.spawn(async move { manager.reload_now(kind).await })
    }

    async fn reload_now(&self, kind: BackendKind) -> Result<(), DbError> {
        self.ensure_open()?;
        let _guard = self.inner.reload_lock.lock().await;

        let old = self.stack();
        *self.journal() = Some(Vec::new());
        old.writer.flush().await;

        let opened = Box::pin(PersistenceStack::open(kind, &self.inner.config, &self.inner.data_dir)).await;
        let (stack, cache, load) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let held = self.journal().take().unwrap_or_default();
                for op in &held {
                    old.persist(op);
                }
                warn!(backend = %kind, error = %e, held = held.len(), "Reload failed; keeping current backend");
                return Err(e);
            }
        };
        let stack = Arc::new(stack);

        let replayed = {
            let mut journal = self.journal();
            let held = journal.take().unwrap_or_default();
            self.inner.cache.replace_with(cache);
            for op in &held {
                if op.apply(&self.inner.cache) {
                    stack.persist(op);
                }
            }
            *self.inner.load.write().unwrap_or_else(PoisonError::into_inner) = load;
            *self.inner.stack.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&stack);
            held.len()
        };

        old.close().await;
        info!(from = %old.profile.kind(), to = %kind, replayed, "Persistence reloaded");
        Ok(())
    }

    /// Wait until every write queued so far has been executed.
    pub async fn flush(&self) {
        self.stack().writer.flush().await;
    }

    /// Flush pending writes and stop every background task. Later writes
    /// are rejected or dropped.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.inner.reload_lock.lock().await;
        self.stack().close().await;
        info!("Persistence shut down");
    }
}
