//! One-time import of the legacy embedded store into a server backend.
//!
//! The legacy file is opened read-only, every table it contains is created on
//! the target and its rows are copied inside one transaction per table.
//! A failing table is logged and skipped; the others still migrate. The
//! legacy file is archived only when every table made it across, so a
//! partial import is retried on the next start.
//!
//! Each copied table is recorded in the `legacy_import` ledger inside the
//! same transaction as its rows. A retry skips ledgered tables, so no table
//! is ever copied twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{error, info, warn};

use crate::error::DbError;
use crate::layout;
use crate::mapping::{insert_sql, opt_bytes, opt_f64, opt_i64, opt_text};
use crate::pool::ConnectionPool;
use crate::profile::{BackendProfile, ColumnType};
use crate::schema::{known_table, IMPORT_LEDGER_TABLE};
use crate::statement::{bind_params, BindValue};

/// Outcome for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMigration {
    /// Table name.
    pub name: String,
    /// Rows copied. Zero when the table failed.
    pub rows: u64,
    /// Failure message, if the table did not migrate.
    pub error: Option<String>,
    /// Copied by an earlier, incomplete run and skipped this time.
    pub resumed: bool,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// The legacy store that was read.
    pub source: PathBuf,
    /// Per-table results, in migration order.
    pub tables: Vec<TableMigration>,
    /// Where the legacy store was moved, if every table succeeded.
    pub archived: Option<PathBuf>,
}

impl MigrationReport {
    /// Whether every table migrated.
    pub fn succeeded(&self) -> bool {
        self.tables.iter().all(|t| t.error.is_none())
    }

    /// Total rows copied.
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().fold(0_u64, |total, t| total.saturating_add(t.rows))
    }

    /// Rows copied for one table.
    pub fn rows_for(&self, table: &str) -> Option<u64> {
        self.tables.iter().find(|t| t.name == table).map(|t| t.rows)
    }
}

/// A legacy column and the logical type used on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceColumn {
    name: String,
    ty: ColumnType,
    primary_key: bool,
}

/// Map a declared `SQLite` type to a logical type using the engine's type
/// affinity rules.
pub fn affinity(declared: &str) -> ColumnType {
    let declared = declared.to_ascii_uppercase();
    if declared.contains("INT") {
        ColumnType::BigInt
    } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| declared.contains(t)) {
        ColumnType::LongText
    } else if declared.is_empty() || declared.contains("BLOB") {
        ColumnType::Blob
    } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| declared.contains(t)) {
        ColumnType::Double
    } else if declared.contains("BOOL") {
        ColumnType::Bool
    } else {
        ColumnType::LongText
    }
}

fn read_value(row: &AnyRow, column: &SourceColumn) -> Result<BindValue, sqlx::Error> {
    let name = column.name.as_str();
    Ok(match column.ty {
        ColumnType::Uuid | ColumnType::Text | ColumnType::LongText => {
            BindValue::NullableText(opt_text(row, name)?)
        }
        ColumnType::Blob => BindValue::NullableBlob(opt_bytes(row, name)?),
        ColumnType::Int => BindValue::NullableInt(
            opt_i64(row, name)?
                .map(|v| i32::try_from(v).unwrap_or(if v < 0 { i32::MIN } else { i32::MAX })),
        ),
        ColumnType::BigInt => BindValue::NullableBigInt(opt_i64(row, name)?),
        ColumnType::Double => BindValue::NullableDouble(opt_f64(row, name)?),
        ColumnType::Bool => BindValue::NullableFlag(opt_i64(row, name)?.map(|v| v != 0)),
    })
}

/// Copies a legacy store into the active backend.
#[derive(Debug)]
pub struct MigrationEngine<'a> {
    target: &'a ConnectionPool,
    native_bool: bool,
}

impl<'a> MigrationEngine<'a> {
    /// Migrate into `target`.
    pub const fn new(target: &'a ConnectionPool, native_bool: bool) -> Self {
        Self { target, native_bool }
    }

    /// Copy every table of the store at `legacy`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if the legacy store cannot be opened or
    /// listed, or [`DbError::Io`] if archiving it fails. Per-table failures
    /// are reported in the [`MigrationReport`] instead.
    pub async fn migrate(&self, legacy: &Path) -> Result<MigrationReport, DbError> {
        sqlx::any::install_default_drivers();
        let url = format!("sqlite://{}?mode=ro", legacy.display());
        let source = AnyPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(|e| DbError::Migration(format!("cannot open {}: {e}", legacy.display())))?;

        info!(
            source = %legacy.display(),
            target = %self.target.profile().kind(),
            "Migrating legacy store"
        );

        let result = self.migrate_tables(&source).await;
        source.close().await;
        let tables = result?;

        let mut report = MigrationReport {
            source: legacy.to_path_buf(),
            tables,
            archived: None,
        };
        if report.succeeded() {
            report.archived = Some(layout::archive_legacy_store(legacy)?);
            info!(
                tables = report.tables.len(),
                rows = report.total_rows(),
                "Legacy migration complete"
            );
        } else {
            warn!(
                source = %legacy.display(),
                "Legacy migration incomplete; store kept for the next attempt"
            );
        }
        Ok(report)
    }

    async fn migrate_tables(&self, source: &AnyPool) -> Result<Vec<TableMigration>, DbError> {
        let names: Vec<String> = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(source)
        .await
        .map_err(|e| DbError::Migration(format!("cannot list tables: {e}")))?
        .iter()
        .map(|row| row.try_get::<String, _>(0))
        .collect::<Result<_, _>>()?;

        let imported = self.imported_tables().await?;

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            if name.eq_ignore_ascii_case(IMPORT_LEDGER_TABLE.name) {
                continue;
            }
            if let Some(&rows) = imported.get(&name) {
                info!(table = %name, rows, "Table already imported; skipping");
                results.push(TableMigration {
                    name,
                    rows,
                    error: None,
                    resumed: true,
                });
                continue;
            }
            let outcome = match self.migrate_table(source, &name).await {
                Ok(rows) => {
                    info!(table = %name, rows, "Migrated table");
                    TableMigration {
                        name,
                        rows,
                        error: None,
                        resumed: false,
                    }
                }
                Err(e) => {
                    error!(table = %name, error = %e, "Table migration failed");
                    TableMigration {
                        name,
                        rows: 0,
                        error: Some(e.to_string()),
                        resumed: false,
                    }
                }
            };
            results.push(outcome);
        }
        Ok(results)
    }

    /// Create the ledger if needed and read which tables it records.
    async fn imported_tables(&self) -> Result<HashMap<String, u64>, DbError> {
        let profile = self.target.profile().as_ref();
        sqlx::query(&IMPORT_LEDGER_TABLE.create_sql(profile))
            .execute(self.target.inner())
            .await
            .map_err(|e| DbError::Migration(format!("cannot create import ledger: {e}")))?;

        let sql = format!(
            "SELECT {}, {} FROM {}",
            profile.quote_ident("table_name"),
            profile.quote_ident("row_count"),
            profile.quote_ident(IMPORT_LEDGER_TABLE.name)
        );
        let rows = sqlx::query(&sql).fetch_all(self.target.inner()).await?;
        let mut imported = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some(name) = opt_text(row, "table_name")? {
                let count = opt_i64(row, "row_count")?.unwrap_or(0);
                imported.insert(name, u64::try_from(count).unwrap_or(0));
            }
        }
        Ok(imported)
    }

    async fn source_columns(source: &AnyPool, table: &str) -> Result<Vec<SourceColumn>, DbError> {
        let known = known_table(table);
        let rows = sqlx::query("SELECT name, type, pk FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(source)
            .await?;
        rows.iter()
            .map(|row| -> Result<SourceColumn, DbError> {
                let name: String = row.try_get("name")?;
                let declared = opt_text(row, "type")?.unwrap_or_default();
                let pk = opt_i64(row, "pk")?.unwrap_or(0) > 0;
                let defined = known.as_ref().and_then(|t| t.column(&name).copied());
                Ok(SourceColumn {
                    ty: defined.map_or_else(|| affinity(&declared), |c| c.ty),
                    primary_key: defined.map_or(pk, |c| c.primary_key),
                    name,
                })
            })
            .collect()
    }

    fn create_sql(profile: &dyn BackendProfile, table: &str, columns: &[SourceColumn]) -> String {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", profile.quote_ident(&c.name), profile.column_type(c.ty));
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            profile.quote_ident(table),
            defs.join(", ")
        )
    }

    async fn migrate_table(&self, source: &AnyPool, table: &str) -> Result<u64, DbError> {
        let profile = self.target.profile().as_ref();
        let mut columns = Self::source_columns(source, table).await?;
        if columns.is_empty() {
            return Ok(0);
        }
        // Composite keys cannot be expressed column by column.
        if columns.iter().filter(|c| c.primary_key).count() > 1 {
            for column in &mut columns {
                column.primary_key = false;
            }
        }

        sqlx::query(&Self::create_sql(profile, table, &columns))
            .execute(self.target.inner())
            .await?;

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let insert = insert_sql(profile, table, &names);
        let select = format!(
            "SELECT {} FROM \"{}\"",
            names
                .iter()
                .map(|n| format!("\"{}\"", n.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(", "),
            table.replace('"', "\"\"")
        );

        let ledger_insert = insert_sql(profile, IMPORT_LEDGER_TABLE.name, &["table_name", "row_count"]);

        let mut tx = self.target.inner().begin().await?;
        let mut rows = sqlx::query(&select).fetch(source);
        let mut copied = 0_u64;
        while let Some(row) = rows.try_next().await? {
            let values = columns
                .iter()
                .map(|c| read_value(&row, c))
                .collect::<Result<Vec<_>, _>>()?;
            bind_params(sqlx::query(&insert), &values, self.native_bool)
                .execute(&mut *tx)
                .await?;
            copied = copied.saturating_add(1);
        }
        drop(rows);

        let ledger = [
            BindValue::Text(table.to_owned()),
            BindValue::BigInt(i64::try_from(copied).unwrap_or(i64::MAX)),
        ];
        bind_params(sqlx::query(&ledger_insert), &ledger, self.native_bool)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(copied)
    }
}
