//! Integration tests against client/server backends.
//!
//! These tests require live database servers. Run with:
//!
//! ```bash
//! docker run -d -p 5432:5432 -e POSTGRES_USER=gravekeeper \
//!     -e POSTGRES_PASSWORD=gravekeeper_dev -e POSTGRES_DB=gravekeeper postgres:16
//! docker run -d -p 3306:3306 -e MYSQL_ROOT_PASSWORD=gravekeeper_dev \
//!     -e MYSQL_DATABASE=gravekeeper mysql:8
//! docker run -d -p 3307:3306 -e MARIADB_ROOT_PASSWORD=gravekeeper_dev \
//!     -e MARIADB_DATABASE=gravekeeper mariadb:11
//! docker run -d -p 26257:26257 cockroachdb/cockroach:latest start-single-node --insecure
//! cargo test -p gravekeeper-db --test live_servers -- --ignored
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use gravekeeper_db::{BackendKind, DataManager, DatabaseConfig, ServerConfig};
use gravekeeper_types::{BlockData, BlockLocation, EntityData, EntityKind, Grave, GraveUpdate, Location};
use tempfile::TempDir;
use uuid::Uuid;

/// Password shared by the local Docker instances.
const PASSWORD: &str = "gravekeeper_dev";

fn server(port: u16, username: &str) -> ServerConfig {
    ServerConfig {
        host: "localhost".to_owned(),
        port: Some(port),
        username: Some(username.to_owned()),
        password: PASSWORD.to_owned(),
        database: "gravekeeper".to_owned(),
        ssl: false,
        pool: None,
    }
}

fn live_config(kind: BackendKind) -> DatabaseConfig {
    let mut config = DatabaseConfig {
        backend: kind.id().to_owned(),
        watchdog_interval_secs: 0,
        postgresql: server(5432, "gravekeeper"),
        mysql: server(3306, "root"),
        mariadb: server(3307, "root"),
        cockroachdb: ServerConfig {
            password: String::new(),
            database: "defaultdb".to_owned(),
            ..server(26257, "root")
        },
        ..DatabaseConfig::default()
    };
    config.pool.keepalive_interval_secs = 0;
    config
}

/// Write a grave with visuals, restart, and check everything came back.
async fn round_trip(kind: BackendKind) {
    let dir = TempDir::new().unwrap();
    let manager = DataManager::start(live_config(kind), dir.path())
        .await
        .expect("Failed to start -- is the server running?");
    assert_eq!(manager.backend(), kind);
    assert!(!manager.database_version().is_empty());

    let mut grave = Grave::new("PLAYER", Location::new("world", 1.5, 70.0, -8.0));
    grave.owner_uuid = Some(Uuid::new_v4());
    grave.inventory = vec![0, 1, 2, 254, 255];
    grave.protection = true;
    grave.permissions = vec!["graves.a".to_owned(), "graves.b".to_owned()];
    let id = grave.id;
    manager.add_grave(grave.clone()).unwrap();

    let at = BlockLocation::new("world", 1, 70, -8);
    manager.add_block_data(vec![BlockData::new(at.clone(), id, None, None)]);
    let stand = EntityData::new(
        Location::new("world", 1.5, 70.0, -7.5),
        Uuid::new_v4(),
        id,
        EntityKind::ArmorStand,
    );
    manager.add_entity_data(vec![stand.clone()]);
    manager.update_grave(id, GraveUpdate::Abandoned(true));
    manager.flush().await;
    manager.shutdown().await;

    let manager = DataManager::start(live_config(kind), dir.path()).await.unwrap();
    let mut expected = grave;
    expected.abandoned = true;
    assert_eq!(manager.get_grave(id), Some(expected));
    assert!(manager.has_grave_at_location(&at));
    assert_eq!(manager.cache().entities_for_grave(id), vec![stand.clone()]);
    // Nothing new to create on a second start.
    assert_eq!(manager.schema_report().tables_created, 0);

    manager.remove_entity_data(&[stand]);
    if let Some(block) = manager.cache().block_data_at(&at) {
        manager.remove_block_data(&[block]);
    }
    manager.remove_grave(id);
    manager.flush().await;
    manager.shutdown().await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn postgresql_round_trip() {
    round_trip(BackendKind::PostgreSql).await;
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn mysql_round_trip() {
    round_trip(BackendKind::MySql).await;
}

#[tokio::test]
#[ignore = "requires live MariaDB instance"]
async fn mariadb_round_trip() {
    round_trip(BackendKind::MariaDb).await;
}

#[tokio::test]
#[ignore = "requires live CockroachDB instance"]
async fn cockroachdb_round_trip() {
    round_trip(BackendKind::CockroachDb).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn legacy_store_is_imported_into_postgresql() {
    let dir = TempDir::new().unwrap();
    let manager = DataManager::start(live_config(BackendKind::Sqlite), dir.path())
        .await
        .unwrap();
    let grave = Grave::new("ZOMBIE", Location::new("world_nether", 0.0, 32.0, 0.0));
    let id = grave.id;
    manager.add_grave(grave).unwrap();
    manager.flush().await;

    manager.reload(BackendKind::PostgreSql).await.unwrap().unwrap();
    let report = manager.migration_report().expect("legacy store should be imported");
    assert!(report.succeeded());
    assert!(report.archived.is_some());
    assert!(manager.get_grave(id).is_some());

    manager.remove_grave(id);
    manager.flush().await;
    manager.shutdown().await;
}
