//! End-to-end tests for the embedded `SQLite` backend.
//!
//! Every test runs against a fresh temporary data directory, so no external
//! services are needed.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::float_cmp
)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gravekeeper_db::schema::all_tables;
use gravekeeper_db::{BackendKind, DataManager, DatabaseConfig, DbError, SchemaReport};
use gravekeeper_types::{BlockData, BlockLocation, EntityData, Grave, GraveId, GraveUpdate, Location};
use sqlx::{AnyConnection, Connection};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helpers
// =============================================================================

fn sqlite_config() -> DatabaseConfig {
    let mut config = DatabaseConfig {
        watchdog_interval_secs: 0,
        ..DatabaseConfig::default()
    };
    config.pool.keepalive_interval_secs = 0;
    config
}

async fn start(dir: &Path) -> DataManager {
    DataManager::start(sqlite_config(), dir)
        .await
        .expect("Failed to start SQLite persistence")
}

async fn restart(manager: DataManager, dir: &Path) -> DataManager {
    manager.flush().await;
    manager.shutdown().await;
    start(dir).await
}

fn grave_for(owner: Uuid, created: i64) -> Grave {
    let mut grave = Grave::new("PLAYER", Location::new("world", 10.5, 64.0, -3.25));
    grave.owner_uuid = Some(owner);
    grave.owner_name = Some("Steve".to_owned());
    grave.time_creation = created;
    grave
}

fn full_grave() -> Grave {
    let mut grave = grave_for(Uuid::new_v4(), 1_700_000_000_000);
    grave.owner_name_display = Some("§aSteve".to_owned());
    grave.owner_texture = Some("texture".to_owned());
    grave.owner_texture_signature = Some("signature".to_owned());
    grave.killer_type = Some("ZOMBIE".to_owned());
    grave.killer_name = Some("Zombie".to_owned());
    grave.killer_uuid = Some(Uuid::new_v4());
    grave.yaw = 90.5;
    grave.pitch = -12.0;
    grave.inventory = vec![1, 2, 3, 0, 255];
    grave.equipment = vec![9, 8, 7];
    grave.experience = 1_234;
    grave.protection = true;
    grave.time_protection = 300_000;
    grave.time_alive = 3_600_000;
    grave.permissions = vec!["graves.vip".to_owned(), "graves.default".to_owned()];
    grave
}

async fn raw_connection(dir: &Path) -> AnyConnection {
    sqlx::any::install_default_drivers();
    let path = gravekeeper_db::layout::database_path(dir, "graves.db");
    AnyConnection::connect(&format!("sqlite://{}", path.display()))
        .await
        .expect("Failed to open store directly")
}

// =============================================================================
// Graves
// =============================================================================

#[tokio::test]
async fn graves_survive_restart() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let grave = full_grave();
    let id = grave.id;
    manager.add_grave(grave.clone()).unwrap();
    let mut plain = grave_for(Uuid::new_v4(), 5);
    plain.owner_name = None;
    let plain_id = plain.id;
    manager.add_grave(plain.clone()).unwrap();

    let manager = restart(manager, dir.path()).await;
    assert_eq!(manager.load_report().graves, 2);
    assert_eq!(manager.get_grave(id), Some(grave));
    assert_eq!(manager.get_grave(plain_id), Some(plain));

    manager.shutdown().await;
}

#[tokio::test]
async fn grave_without_location_is_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let mut grave = grave_for(Uuid::new_v4(), 1);
    grave.location_death = None;
    let id = grave.id;

    let err = manager.add_grave(grave).unwrap_err();
    assert!(matches!(err, DbError::MissingLocation(missing) if missing == id));
    assert!(manager.get_grave(id).is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn removed_grave_is_gone_and_stays_gone() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let grave = grave_for(Uuid::new_v4(), 1);
    let id = grave.id;
    manager.add_grave(grave).unwrap();
    assert!(manager.remove_grave(id).is_some());
    assert!(manager.get_grave(id).is_none());
    assert!(!manager.grave_map().contains_key(&id));

    let manager = restart(manager, dir.path()).await;
    assert!(manager.get_grave(id).is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn oldest_grave_is_found_after_restart() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let owner = Uuid::new_v4();
    let mut oldest = GraveId::new();
    for created in [100, 50, 200] {
        let grave = grave_for(owner, created);
        if created == 50 {
            oldest = grave.id;
        }
        manager.add_grave(grave).unwrap();
    }
    manager.add_grave(grave_for(Uuid::new_v4(), 1)).unwrap();

    assert_eq!(manager.get_oldest_grave(owner).map(|g| g.id), Some(oldest));
    let manager = restart(manager, dir.path()).await;
    assert_eq!(manager.get_oldest_grave(owner).map(|g| g.id), Some(oldest));
    assert!(manager.get_oldest_grave(Uuid::new_v4()).is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn experience_update_persists() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let mut grave = grave_for(Uuid::new_v4(), 1);
    grave.experience = 50;
    let id = grave.id;
    manager.add_grave(grave).unwrap();
    assert!(manager.update_grave(id, GraveUpdate::Experience(75)));
    assert_eq!(manager.get_grave(id).map(|g| g.experience), Some(75));

    let manager = restart(manager, dir.path()).await;
    assert_eq!(manager.get_grave(id).map(|g| g.experience), Some(75));

    assert!(!manager.update_grave(GraveId::new(), GraveUpdate::Experience(1)));
    manager.shutdown().await;
}

#[tokio::test]
async fn updates_for_one_grave_apply_in_order() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let grave = grave_for(Uuid::new_v4(), 1);
    let id = grave.id;
    manager.add_grave(grave).unwrap();
    for experience in 1..=50 {
        manager.update_grave(id, GraveUpdate::Experience(experience));
    }
    manager.update_grave(id, GraveUpdate::Abandoned(true));
    manager.update_grave(id, GraveUpdate::OwnerName(None));

    let manager = restart(manager, dir.path()).await;
    let loaded = manager.get_grave(id).unwrap();
    assert_eq!(loaded.experience, 50);
    assert!(loaded.abandoned);
    assert_eq!(loaded.owner_name, None);

    manager.shutdown().await;
}

// =============================================================================
// Blocks and entities
// =============================================================================

#[tokio::test]
async fn visual_records_survive_restart() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;

    let grave = grave_for(Uuid::new_v4(), 1);
    let id = grave.id;
    manager.add_grave(grave).unwrap();

    let at = BlockLocation::new("world", 10, 64, -4);
    manager.add_block_data(vec![BlockData::new(
        at.clone(),
        id,
        Some("GRASS_BLOCK".to_owned()),
        Some("snowy=false".to_owned()),
    )]);
    let line = EntityData::hologram(Location::new("world", 10.5, 65.5, -3.5), Uuid::new_v4(), id, 2);
    manager.add_entity_data(vec![line.clone()]);
    assert!(manager.has_grave_at_location(&at));

    let manager = restart(manager, dir.path()).await;
    assert!(manager.has_grave_at_location(&at));
    let block = manager.cache().block_data_at(&at).unwrap();
    assert_eq!(block.replace_material, "GRASS_BLOCK");
    assert_eq!(block.replace_data, "snowy=false");
    assert_eq!(manager.cache().entities_for_grave(id), vec![line.clone()]);

    manager.remove_entity_data(&[line]);
    manager.remove_block_data(&[block]);
    let manager = restart(manager, dir.path()).await;
    assert!(!manager.has_grave_at_location(&at));
    assert!(manager.cache().entities_for_grave(id).is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn null_material_loads_as_air_and_orphans_are_skipped() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    let grave = grave_for(Uuid::new_v4(), 1);
    let id = grave.id;
    manager.add_grave(grave).unwrap();
    manager.flush().await;
    manager.shutdown().await;

    let mut conn = raw_connection(dir.path()).await;
    sqlx::query(
        "INSERT INTO block (location, uuid_grave, replace_material, replace_data) \
         VALUES (?, ?, NULL, NULL)",
    )
    .bind("world|1|2|3")
    .bind(id.to_string())
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO block (location, uuid_grave, replace_material, replace_data) \
         VALUES (?, ?, 'STONE', '')",
    )
    .bind("world|4|5|6")
    .bind(Uuid::new_v4().to_string())
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query("INSERT INTO grave (uuid, owner_type) VALUES ('not-a-uuid', 'PLAYER')")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    let manager = start(dir.path()).await;
    let report = manager.load_report();
    assert_eq!(report.graves, 1);
    assert_eq!(report.blocks, 1);
    assert_eq!(report.skipped, 2);

    let block = manager
        .cache()
        .block_data_at(&BlockLocation::new("world", 1, 2, 3))
        .unwrap();
    assert_eq!(block.replace_material, "air");
    assert_eq!(block.replace_data, "");
    assert!(!manager.has_grave_at_location(&BlockLocation::new("world", 4, 5, 6)));

    manager.shutdown().await;
}

// =============================================================================
// Schema and lifecycle
// =============================================================================

#[tokio::test]
async fn schema_setup_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    assert_eq!(manager.schema_report().tables_created, all_tables().len());
    assert_eq!(manager.backend(), BackendKind::Sqlite);
    assert!(manager.capabilities().server_version.major >= 3);
    assert!(!manager.database_version().is_empty());

    let manager = restart(manager, dir.path()).await;
    assert_eq!(manager.schema_report(), SchemaReport::default());

    manager.shutdown().await;
}

#[tokio::test]
async fn missing_columns_are_added_to_old_tables() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    manager.shutdown().await;

    let mut conn = raw_connection(dir.path()).await;
    sqlx::query("DROP TABLE hologram").execute(&mut conn).await.unwrap();
    sqlx::query("CREATE TABLE hologram (uuid_entity TEXT PRIMARY KEY, uuid_grave TEXT)")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    let manager = start(dir.path()).await;
    assert_eq!(
        manager.schema_report(),
        SchemaReport {
            tables_created: 0,
            columns_added: 2,
        }
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn reload_keeps_flushed_graves() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    let grave = grave_for(Uuid::new_v4(), 1);
    let id = grave.id;
    manager.add_grave(grave).unwrap();

    manager.reload(BackendKind::Sqlite).await.unwrap().unwrap();
    assert!(manager.get_grave(id).is_some());
    assert_eq!(manager.load_report().graves, 1);

    manager.update_grave(id, GraveUpdate::Experience(9));
    let manager = restart(manager, dir.path()).await;
    assert_eq!(manager.get_grave(id).map(|g| g.experience), Some(9));
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_during_reload_are_kept() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    let seeded = grave_for(Uuid::new_v4(), 1);
    let seeded_id = seeded.id;
    manager.add_grave(seeded).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let manager = manager.clone();
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || {
            let mut added = Vec::new();
            while !stop.load(Ordering::Acquire) {
                let grave = grave_for(Uuid::new_v4(), 2);
                added.push(grave.id);
                manager.add_grave(grave).unwrap();
                let experience = i32::try_from(added.len()).unwrap_or(i32::MAX);
                assert!(manager.update_grave(seeded_id, GraveUpdate::Experience(experience)));
                std::thread::sleep(Duration::from_millis(1));
            }
            added
        })
    };

    for _ in 0..3 {
        manager.reload(BackendKind::Sqlite).await.unwrap().unwrap();
    }
    stop.store(true, Ordering::Release);
    let added = writer.await.unwrap();
    assert!(!added.is_empty());

    let cached = manager.grave_map();
    let missing = added.iter().filter(|id| !cached.contains_key(id)).count();
    assert_eq!(missing, 0, "{missing} of {} graves missing after reload", added.len());
    let experience = manager.get_grave(seeded_id).map(|g| g.experience);
    assert_eq!(experience, Some(i32::try_from(added.len()).unwrap_or(i32::MAX)));

    // Every write also reached the store, in order.
    let manager = restart(manager, dir.path()).await;
    let stored = manager.grave_map();
    assert_eq!(stored.len(), added.len().saturating_add(1));
    assert!(added.iter().all(|id| stored.contains_key(id)));
    assert_eq!(manager.get_grave(seeded_id).map(|g| g.experience), experience);

    manager.shutdown().await;
}

#[tokio::test]
async fn failed_reload_keeps_current_backend() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    let grave = grave_for(Uuid::new_v4(), 1);
    let id = grave.id;
    manager.add_grave(grave).unwrap();

    // Nothing listens on the default MySQL port in the test environment.
    let result = manager.reload(BackendKind::MySql).await.unwrap();
    assert!(matches!(result, Err(DbError::Connectivity { .. })), "{result:?}");
    assert_eq!(manager.backend(), BackendKind::Sqlite);

    manager.update_grave(id, GraveUpdate::Experience(3));
    let manager = restart(manager, dir.path()).await;
    assert_eq!(manager.get_grave(id).map(|g| g.experience), Some(3));
    manager.shutdown().await;
}

#[tokio::test]
async fn writes_after_shutdown_are_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = start(dir.path()).await;
    manager.shutdown().await;

    let err = manager.add_grave(grave_for(Uuid::new_v4(), 1)).unwrap_err();
    assert!(matches!(err, DbError::ShutDown));
    // A second shutdown is a no-op.
    manager.shutdown().await;
}

#[tokio::test]
async fn unknown_backend_fails_to_start() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        backend: "oracle".to_owned(),
        ..sqlite_config()
    };
    let err = DataManager::start(config, dir.path()).await.unwrap_err();
    assert!(matches!(err, DbError::UnknownBackend(_)));
}

#[tokio::test]
async fn unusable_config_fails_to_start() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        writer_lanes: 0,
        ..sqlite_config()
    };
    let err = DataManager::start(config, dir.path()).await.unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}
