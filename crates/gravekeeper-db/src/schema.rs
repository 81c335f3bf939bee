//! Logical schema and idempotent setup.
//!
//! Tables are described once in portable terms ([`TableDef`]) and rendered
//! per family through the active profile. Setup is safe to repeat: missing
//! tables are created, missing columns are added, and "already exists"
//! errors from concurrent or repeated runs count as success.

use gravekeeper_types::EntityKind;
use sqlx::any::AnyRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::error::DbError;
use crate::pool::ConnectionPool;
use crate::profile::{BackendProfile, Capabilities, ColumnType, SchemaOutcome};
use crate::statement::Statement;

/// One column of a logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Portable type.
    pub ty: ColumnType,
    /// Part of the primary key.
    pub primary_key: bool,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        primary_key: false,
    }
}

const fn key(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        primary_key: true,
    }
}

/// A logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnDef],
}

impl TableDef {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Render `name TYPE [PRIMARY KEY]` for one column.
    pub fn column_sql(profile: &dyn BackendProfile, column: &ColumnDef) -> String {
        let mut sql = format!("{} {}", profile.quote_ident(column.name), profile.column_type(column.ty));
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        sql
    }

    /// Render `CREATE TABLE IF NOT EXISTS` for this table.
    pub fn create_sql(&self, profile: &dyn BackendProfile) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| Self::column_sql(profile, c))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            profile.quote_ident(self.name),
            columns.join(", ")
        )
    }
}

/// The `grave` table.
pub const GRAVE_TABLE: TableDef = TableDef {
    name: "grave",
    columns: &[
        key("uuid", ColumnType::Uuid),
        col("owner_type", ColumnType::Text),
        col("owner_name", ColumnType::Text),
        col("owner_name_display", ColumnType::LongText),
        col("owner_uuid", ColumnType::Uuid),
        col("owner_texture", ColumnType::LongText),
        col("owner_texture_signature", ColumnType::LongText),
        col("killer_type", ColumnType::Text),
        col("killer_name", ColumnType::Text),
        col("killer_name_display", ColumnType::LongText),
        col("killer_uuid", ColumnType::Uuid),
        col("location_death", ColumnType::Text),
        col("yaw", ColumnType::Double),
        col("pitch", ColumnType::Double),
        col("inventory", ColumnType::Blob),
        col("equipment", ColumnType::Blob),
        col("experience", ColumnType::Int),
        col("protection", ColumnType::Bool),
        col("is_abandoned", ColumnType::Bool),
        col("time_alive", ColumnType::BigInt),
        col("time_protection", ColumnType::BigInt),
        col("time_creation", ColumnType::BigInt),
        col("permissions", ColumnType::LongText),
    ],
};

/// The `block` table.
pub const BLOCK_TABLE: TableDef = TableDef {
    name: "block",
    columns: &[
        col("location", ColumnType::Text),
        col("uuid_grave", ColumnType::Uuid),
        col("replace_material", ColumnType::Text),
        col("replace_data", ColumnType::LongText),
    ],
};

/// The `hologram` table.
pub const HOLOGRAM_TABLE: TableDef = TableDef {
    name: "hologram",
    columns: &[
        key("uuid_entity", ColumnType::Uuid),
        col("uuid_grave", ColumnType::Uuid),
        col("line", ColumnType::Int),
        col("location", ColumnType::Text),
    ],
};

const MARKER_COLUMNS: &[ColumnDef] = &[
    col("location", ColumnType::Text),
    key("uuid_entity", ColumnType::Uuid),
    col("uuid_grave", ColumnType::Uuid),
];

/// Table holding records of `kind`.
pub const fn entity_table(kind: EntityKind) -> TableDef {
    match kind {
        EntityKind::Hologram => HOLOGRAM_TABLE,
        other => TableDef {
            name: other.table(),
            columns: MARKER_COLUMNS,
        },
    }
}

/// Tables already copied out of a legacy store, kept so an interrupted
/// import resumes instead of copying them twice.
pub const IMPORT_LEDGER_TABLE: TableDef = TableDef {
    name: "legacy_import",
    columns: &[
        key("table_name", ColumnType::Text),
        col("row_count", ColumnType::BigInt),
    ],
};

/// Every table, in creation order.
pub fn all_tables() -> Vec<TableDef> {
    let mut tables = vec![GRAVE_TABLE, BLOCK_TABLE];
    tables.extend(EntityKind::ALL.into_iter().map(entity_table));
    tables
}

/// Known definition for a table name, if any.
pub fn known_table(name: &str) -> Option<TableDef> {
    all_tables()
        .into_iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
}

/// What a setup run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Tables that did not exist before.
    pub tables_created: usize,
    /// Columns added to existing tables.
    pub columns_added: usize,
}

/// Read a `COUNT(*)` result, whatever integer width the driver reports.
pub(crate) fn read_count(row: &AnyRow) -> Result<i64, sqlx::Error> {
    row.try_get::<i64, _>(0)
        .or_else(|_| row.try_get::<i32, _>(0).map(i64::from))
}

/// Creates and upgrades the schema on the active backend.
#[derive(Debug)]
pub struct SchemaManager<'a> {
    pool: &'a ConnectionPool,
    capabilities: &'a Capabilities,
}

impl<'a> SchemaManager<'a> {
    /// Bind the manager to a pool and its resolved capabilities.
    pub const fn new(pool: &'a ConnectionPool, capabilities: &'a Capabilities) -> Self {
        Self { pool, capabilities }
    }

    /// Create every missing table and column.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Schema`] for any failure the profile does not
    /// classify as "already exists", or [`DbError::Sqlx`] if an existence check fails.
    pub async fn setup_tables(&self) -> Result<SchemaReport, DbError> {
        let mut report = SchemaReport::default();
        for table in all_tables() {
            self.setup_table(&table, &mut report).await?;
        }
        info!(
            backend = %self.pool.profile().kind(),
            tables_created = report.tables_created,
            columns_added = report.columns_added,
            "Schema ready"
        );
        Ok(report)
    }

    async fn setup_table(&self, table: &TableDef, report: &mut SchemaReport) -> Result<(), DbError> {
        let profile = self.pool.profile().as_ref();

        if !self.exists(profile.table_exists(table.name)).await? {
            if self.apply(table.name, &table.create_sql(profile)).await? == SchemaOutcome::Applied {
                report.tables_created = report.tables_created.saturating_add(1);
                debug!(table = table.name, "Created table");
            }
            return Ok(());
        }

        for column in table.columns.iter().filter(|c| !c.primary_key) {
            if self.exists(profile.column_exists(table.name, column.name)).await? {
                continue;
            }
            let sql = profile.add_column_sql(
                &profile.quote_ident(table.name),
                &TableDef::column_sql(profile, column),
                self.capabilities.add_column_if_not_exists,
            );
            if self.apply(table.name, &sql).await? == SchemaOutcome::Applied {
                report.columns_added = report.columns_added.saturating_add(1);
                debug!(table = table.name, column = column.name, "Added column");
            }
        }
        Ok(())
    }

    async fn exists(&self, statement: Statement) -> Result<bool, DbError> {
        let row = statement
            .query(self.capabilities.native_bool)
            .fetch_one(self.pool.inner())
            .await?;
        Ok(read_count(&row)? > 0)
    }

    async fn apply(&self, table: &str, sql: &str) -> Result<SchemaOutcome, DbError> {
        match sqlx::query(sql).execute(self.pool.inner()).await {
            Ok(_) => Ok(SchemaOutcome::Applied),
            Err(source) => match self.pool.profile().classify_schema_error(&source) {
                SchemaOutcome::AlreadyExists => {
                    debug!(table, sql, "Schema object already exists");
                    Ok(SchemaOutcome::AlreadyExists)
                }
                SchemaOutcome::Applied | SchemaOutcome::Failed => Err(DbError::Schema {
                    table: table.to_owned(),
                    source,
                }),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::DatabaseConfig;
    use crate::profile::BackendKind;

    #[test]
    fn every_entity_kind_has_a_table() {
        let names: Vec<_> = all_tables().iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 2 + EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            assert!(names.contains(&kind.table()));
        }
        assert!(entity_table(EntityKind::Hologram).column("line").is_some());
        assert!(entity_table(EntityKind::ArmorStand).column("line").is_none());
    }

    #[test]
    fn create_sql_uses_family_types() {
        let config = DatabaseConfig::default();
        let mysql = BackendKind::MySql.profile(&config, Path::new("data"));
        let sql = BLOCK_TABLE.create_sql(mysql.as_ref());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS block (location VARCHAR(255), uuid_grave VARCHAR(36), \
             replace_material VARCHAR(255), replace_data TEXT)"
        );

        let pg = BackendKind::PostgreSql.profile(&config, Path::new("data"));
        let sql = GRAVE_TABLE.create_sql(pg.as_ref());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS grave (uuid VARCHAR(36) PRIMARY KEY,"));
        assert!(sql.contains("inventory BYTEA"));
        assert!(sql.contains("protection BOOLEAN"));
    }

    #[test]
    fn known_table_is_case_insensitive() {
        assert_eq!(known_table("GRAVE").map(|t| t.name), Some("grave"));
        assert!(known_table("unrelated").is_none());
    }
}
