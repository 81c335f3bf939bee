//! Row ↔ domain mapping and statement builders.
//!
//! Decoding is tolerant: drivers disagree on integer widths and on whether a
//! flag column comes back as a boolean or an integer, so every read walks a
//! short chain of candidate types. Encoding goes through [`Statement`] so the
//! same builders serve every family.

use gravekeeper_types::{
    join_permissions, split_permissions, BlockData, BlockLocation, EntityData, EntityKind, Grave,
    GraveId, GraveUpdate, Location, ParseError,
};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::DbError;
use crate::profile::BackendProfile;
use crate::schema::{entity_table, TableDef, BLOCK_TABLE, GRAVE_TABLE};
use crate::statement::{BindValue, Statement};

// =============================================================================
// Decoding helpers
// =============================================================================

/// Nullable text.
pub fn opt_text(row: &AnyRow, column: &str) -> Result<Option<String>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column).or_else(|_| {
        opt_bytes(row, column).map(|v| v.map(|b| String::from_utf8_lossy(&b).into_owned()))
    })
}

/// Nullable integer of any width, or a boolean read as 0/1.
pub fn opt_i64(row: &AnyRow, column: &str) -> Result<Option<i64>, sqlx::Error> {
    row.try_get::<Option<i64>, _>(column)
        .or_else(|_| row.try_get::<Option<i32>, _>(column).map(|v| v.map(i64::from)))
        .or_else(|_| row.try_get::<Option<i16>, _>(column).map(|v| v.map(i64::from)))
        .or_else(|_| row.try_get::<Option<bool>, _>(column).map(|v| v.map(i64::from)))
}

/// Nullable float, or an integer widened to one.
#[allow(clippy::cast_precision_loss)]
pub fn opt_f64(row: &AnyRow, column: &str) -> Result<Option<f64>, sqlx::Error> {
    row.try_get::<Option<f64>, _>(column)
        .or_else(|_| row.try_get::<Option<f32>, _>(column).map(|v| v.map(f64::from)))
        .or_else(|_| opt_i64(row, column).map(|v| v.map(|i| i as f64)))
}

/// Flag stored either as a native boolean or as an integer. NULL is false.
pub fn flag(row: &AnyRow, column: &str) -> Result<bool, sqlx::Error> {
    match row.try_get::<Option<bool>, _>(column) {
        Ok(v) => Ok(v.unwrap_or(false)),
        Err(_) => Ok(opt_i64(row, column)?.is_some_and(|v| v != 0)),
    }
}

/// Nullable bytes; legacy text columns are read as their UTF-8 bytes.
pub fn opt_bytes(row: &AnyRow, column: &str) -> Result<Option<Vec<u8>>, sqlx::Error> {
    row.try_get::<Option<Vec<u8>>, _>(column)
        .or_else(|_| row.try_get::<Option<String>, _>(column).map(|v| v.map(String::into_bytes)))
}

fn int32(row: &AnyRow, column: &str) -> Result<i32, sqlx::Error> {
    let value = opt_i64(row, column)?.unwrap_or(0);
    Ok(i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX }))
}

#[allow(clippy::cast_possible_truncation)]
fn float32(row: &AnyRow, column: &str) -> Result<f32, sqlx::Error> {
    Ok(opt_f64(row, column)?.unwrap_or(0.0) as f32)
}

/// Secondary UUIDs that fail to parse read as absent.
fn opt_uuid(row: &AnyRow, column: &str) -> Result<Option<Uuid>, sqlx::Error> {
    Ok(opt_text(row, column)?.and_then(|raw| Uuid::parse_str(raw.trim()).ok()))
}

fn required_text(row: &AnyRow, column: &str) -> Result<String, DbError> {
    opt_text(row, column)?.ok_or_else(|| {
        DbError::RowMapping(ParseError::Value {
            column: column.to_owned(),
            value: "NULL".to_owned(),
        })
    })
}

fn grave_id(row: &AnyRow, column: &str) -> Result<GraveId, DbError> {
    Ok(required_text(row, column)?.parse::<GraveId>()?)
}

// =============================================================================
// Row → domain
// =============================================================================

/// Decode a `grave` row.
///
/// # Errors
///
/// Returns [`DbError::RowMapping`] if the primary UUID or the death location
/// is unreadable, or [`DbError::Sqlx`] if a column is missing.
pub fn grave_from_row(row: &AnyRow) -> Result<Grave, DbError> {
    let id = grave_id(row, "uuid")?;
    let location_death = opt_text(row, "location_death")?
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| raw.parse::<Location>())
        .transpose()?;

    Ok(Grave {
        id,
        owner_type: opt_text(row, "owner_type")?.unwrap_or_default(),
        owner_name: opt_text(row, "owner_name")?,
        owner_name_display: opt_text(row, "owner_name_display")?,
        owner_uuid: opt_uuid(row, "owner_uuid")?,
        owner_texture: opt_text(row, "owner_texture")?,
        owner_texture_signature: opt_text(row, "owner_texture_signature")?,
        killer_type: opt_text(row, "killer_type")?,
        killer_name: opt_text(row, "killer_name")?,
        killer_name_display: opt_text(row, "killer_name_display")?,
        killer_uuid: opt_uuid(row, "killer_uuid")?,
        location_death,
        yaw: float32(row, "yaw")?,
        pitch: float32(row, "pitch")?,
        inventory: opt_bytes(row, "inventory")?.unwrap_or_default(),
        equipment: opt_bytes(row, "equipment")?.unwrap_or_default(),
        experience: int32(row, "experience")?.max(0),
        protection: flag(row, "protection")?,
        time_protection: opt_i64(row, "time_protection")?.unwrap_or(0),
        abandoned: flag(row, "is_abandoned")?,
        time_alive: opt_i64(row, "time_alive")?.unwrap_or(-1),
        time_creation: opt_i64(row, "time_creation")?.unwrap_or(0),
        permissions: opt_text(row, "permissions")?
            .map(|raw| split_permissions(&raw))
            .unwrap_or_default(),
    })
}

/// Decode a `block` row. Missing replacement state defaults to air.
///
/// # Errors
///
/// Returns [`DbError::RowMapping`] if the location or grave UUID is
/// unreadable.
pub fn block_from_row(row: &AnyRow) -> Result<BlockData, DbError> {
    let location = required_text(row, "location")?.parse::<BlockLocation>()?;
    Ok(BlockData::new(
        location,
        grave_id(row, "uuid_grave")?,
        opt_text(row, "replace_material")?,
        opt_text(row, "replace_data")?,
    ))
}

/// Decode a row from the table of `kind`.
///
/// # Errors
///
/// Returns [`DbError::RowMapping`] if the location or either UUID is
/// unreadable.
pub fn entity_from_row(kind: EntityKind, row: &AnyRow) -> Result<EntityData, DbError> {
    let location = required_text(row, "location")?.parse::<Location>()?;
    let raw_entity = required_text(row, "uuid_entity")?;
    let entity_id = Uuid::parse_str(raw_entity.trim()).map_err(|_e| ParseError::Uuid(raw_entity.clone()))?;
    let grave_id = grave_id(row, "uuid_grave")?;
    let mut entity = EntityData::new(location, entity_id, grave_id, kind);
    if kind.has_line() {
        entity.line = Some(int32(row, "line")?);
    }
    Ok(entity)
}

// =============================================================================
// Domain → statements
// =============================================================================

/// Comma-separated placeholders `start..start + count` for `profile`.
pub fn placeholders(profile: &dyn BackendProfile, start: usize, count: usize) -> String {
    (start..start.saturating_add(count))
        .map(|i| profile.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO table (columns) VALUES (placeholders)`.
pub fn insert_sql(profile: &dyn BackendProfile, table: &str, columns: &[&str]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| profile.quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        profile.quote_ident(table),
        quoted.join(", "),
        placeholders(profile, 1, columns.len())
    )
}

/// `SELECT columns FROM table` for a known table.
pub fn select_sql(profile: &dyn BackendProfile, table: &TableDef) -> String {
    let quoted: Vec<String> = table.column_names().map(|c| profile.quote_ident(c)).collect();
    format!("SELECT {} FROM {}", quoted.join(", "), profile.quote_ident(table.name))
}

fn delete_sql(profile: &dyn BackendProfile, table: &str, key: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = {}",
        profile.quote_ident(table),
        profile.quote_ident(key),
        profile.placeholder(1)
    )
}

fn table_insert(profile: &dyn BackendProfile, label: &'static str, table: &TableDef) -> Statement {
    let columns: Vec<&str> = table.column_names().collect();
    Statement::new(label, insert_sql(profile, table.name, &columns))
}

/// Insert a grave.
///
/// # Errors
///
/// Returns [`DbError::MissingLocation`] if the grave has no death location.
pub fn grave_insert(profile: &dyn BackendProfile, grave: &Grave) -> Result<Statement, DbError> {
    let location = grave
        .location_death
        .as_ref()
        .ok_or(DbError::MissingLocation(grave.id))?;

    // Bound in GRAVE_TABLE column order.
    Ok(table_insert(profile, "grave.insert", &GRAVE_TABLE)
        .arg(grave.id.into_inner())
        .arg(grave.owner_type.as_str())
        .arg(grave.owner_name.clone())
        .arg(grave.owner_name_display.clone())
        .arg(grave.owner_uuid)
        .arg(grave.owner_texture.clone())
        .arg(grave.owner_texture_signature.clone())
        .arg(grave.killer_type.clone())
        .arg(grave.killer_name.clone())
        .arg(grave.killer_name_display.clone())
        .arg(grave.killer_uuid)
        .arg(location.to_string())
        .arg(grave.yaw)
        .arg(grave.pitch)
        .arg(grave.inventory.clone())
        .arg(grave.equipment.clone())
        .arg(grave.experience.max(0))
        .arg(grave.protection)
        .arg(grave.abandoned)
        .arg(grave.time_alive)
        .arg(grave.time_protection)
        .arg(grave.time_creation)
        .arg(join_permissions(&grave.permissions)))
}

/// Delete a grave by UUID.
pub fn grave_delete(profile: &dyn BackendProfile, id: GraveId) -> Statement {
    Statement::new("grave.delete", delete_sql(profile, GRAVE_TABLE.name, "uuid")).arg(id.into_inner())
}

/// Value bound for an update, matching what [`Grave::apply`] stores.
pub fn update_value(update: &GraveUpdate) -> BindValue {
    match update {
        GraveUpdate::OwnerName(v)
        | GraveUpdate::OwnerNameDisplay(v)
        | GraveUpdate::OwnerTexture(v)
        | GraveUpdate::OwnerTextureSignature(v)
        | GraveUpdate::KillerName(v)
        | GraveUpdate::KillerNameDisplay(v) => BindValue::NullableText(v.clone()),
        GraveUpdate::LocationDeath(v) => BindValue::Text(v.to_string()),
        GraveUpdate::Yaw(v) | GraveUpdate::Pitch(v) => BindValue::from(*v),
        GraveUpdate::Inventory(v) | GraveUpdate::Equipment(v) => BindValue::Blob(v.clone()),
        GraveUpdate::Experience(v) => BindValue::Int((*v).max(0)),
        GraveUpdate::Protection(v) | GraveUpdate::Abandoned(v) => BindValue::Flag(*v),
        GraveUpdate::TimeProtection(v) | GraveUpdate::TimeAlive(v) => BindValue::BigInt(*v),
        GraveUpdate::Permissions(v) => BindValue::Text(join_permissions(v)),
    }
}

/// Update one column of a grave.
pub fn grave_update(profile: &dyn BackendProfile, id: GraveId, update: &GraveUpdate) -> Statement {
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        profile.quote_ident(GRAVE_TABLE.name),
        profile.quote_ident(update.column()),
        profile.placeholder(1),
        profile.quote_ident("uuid"),
        profile.placeholder(2)
    );
    let mut statement = Statement::new("grave.update", sql);
    statement.params.push(update_value(update));
    statement.arg(id.into_inner())
}

/// Insert a block record.
pub fn block_insert(profile: &dyn BackendProfile, block: &BlockData) -> Statement {
    table_insert(profile, "block.insert", &BLOCK_TABLE)
        .arg(block.location.to_string())
        .arg(block.grave_id.into_inner())
        .arg(block.replace_material.as_str())
        .arg(block.replace_data.as_str())
}

/// Delete block records at a location.
pub fn block_delete(profile: &dyn BackendProfile, location: &BlockLocation) -> Statement {
    Statement::new("block.delete", delete_sql(profile, BLOCK_TABLE.name, "location"))
        .arg(location.to_string())
}

/// Insert an entity record into its kind's table.
pub fn entity_insert(profile: &dyn BackendProfile, entity: &EntityData) -> Statement {
    let table = entity_table(entity.kind);
    let statement = table_insert(profile, "entity.insert", &table);
    if entity.kind.has_line() {
        // uuid_entity, uuid_grave, line, location
        statement
            .arg(entity.entity_id)
            .arg(entity.grave_id.into_inner())
            .arg(entity.line.unwrap_or(0))
            .arg(entity.location.to_string())
    } else {
        // location, uuid_entity, uuid_grave
        statement
            .arg(entity.location.to_string())
            .arg(entity.entity_id)
            .arg(entity.grave_id.into_inner())
    }
}

/// Delete an entity record from its kind's table.
pub fn entity_delete(profile: &dyn BackendProfile, kind: EntityKind, entity_id: Uuid) -> Statement {
    Statement::new("entity.delete", delete_sql(profile, kind.table(), "uuid_entity")).arg(entity_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::DatabaseConfig;
    use crate::profile::BackendKind;

    fn profile(kind: BackendKind) -> std::sync::Arc<dyn BackendProfile> {
        kind.profile(&DatabaseConfig::default(), Path::new("data"))
    }

    #[test]
    fn grave_insert_binds_every_column() {
        let grave = Grave::new("PLAYER", Location::new("world", 1.0, 64.0, -3.5));
        let stmt = grave_insert(profile(BackendKind::Sqlite).as_ref(), &grave).unwrap();
        assert_eq!(stmt.params.len(), GRAVE_TABLE.columns.len());
        assert_eq!(stmt.params[0], BindValue::Text(grave.id.to_string()));
        assert_eq!(stmt.params[11], BindValue::Text("world|1|64|-3.5".to_owned()));
        assert!(stmt.sql.starts_with("INSERT INTO grave (uuid, owner_type,"));
        assert!(stmt.sql.ends_with("?, ?)"));
    }

    #[test]
    fn grave_without_location_is_rejected() {
        let mut grave = Grave::new("ZOMBIE", Location::new("world", 0.0, 0.0, 0.0));
        grave.location_death = None;
        let result = grave_insert(profile(BackendKind::PostgreSql).as_ref(), &grave);
        assert!(matches!(result, Err(DbError::MissingLocation(id)) if id == grave.id));
    }

    #[test]
    fn update_uses_column_and_family_placeholders() {
        let id = GraveId::new();
        let stmt = grave_update(profile(BackendKind::PostgreSql).as_ref(), id, &GraveUpdate::Experience(75));
        assert_eq!(stmt.sql, "UPDATE grave SET experience = $1 WHERE uuid = $2");
        assert_eq!(stmt.params, vec![BindValue::Int(75), BindValue::Text(id.to_string())]);

        let stmt = grave_update(profile(BackendKind::MySql).as_ref(), id, &GraveUpdate::Abandoned(true));
        assert_eq!(stmt.sql, "UPDATE grave SET is_abandoned = ? WHERE uuid = ?");
        assert_eq!(stmt.params[0], BindValue::Flag(true));
    }

    #[test]
    fn negative_experience_is_clamped_on_the_wire() {
        assert_eq!(update_value(&GraveUpdate::Experience(-5)), BindValue::Int(0));
    }

    #[test]
    fn deletes_key_by_location_and_entity() {
        let pg = profile(BackendKind::PostgreSql);
        let stmt = block_delete(pg.as_ref(), &BlockLocation::new("world", 1, 2, 3));
        assert_eq!(stmt.sql, "DELETE FROM block WHERE location = $1");
        assert_eq!(stmt.params, vec![BindValue::Text("world|1|2|3".to_owned())]);

        let entity = Uuid::new_v4();
        let stmt = entity_delete(pg.as_ref(), EntityKind::Nexo, entity);
        assert_eq!(stmt.sql, "DELETE FROM nexo WHERE uuid_entity = $1");
        assert_eq!(stmt.params, vec![BindValue::Text(entity.to_string())]);
    }

    #[test]
    fn hologram_insert_carries_line() {
        let sqlite = profile(BackendKind::Sqlite);
        let holo = EntityData::hologram(Location::new("w", 0.5, 1.0, 0.5), Uuid::new_v4(), GraveId::new(), 3);
        let stmt = entity_insert(sqlite.as_ref(), &holo);
        assert_eq!(
            stmt.sql,
            "INSERT INTO hologram (uuid_entity, uuid_grave, line, location) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(stmt.params[2], BindValue::Int(3));
    }

    #[test]
    fn select_lists_known_columns() {
        let sqlite = profile(BackendKind::Sqlite);
        assert_eq!(
            select_sql(sqlite.as_ref(), &BLOCK_TABLE),
            "SELECT location, uuid_grave, replace_material, replace_data FROM block"
        );
    }
}
