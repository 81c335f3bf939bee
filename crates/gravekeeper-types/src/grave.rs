//! The grave record and its typed column updates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::ids::GraveId;
use crate::location::Location;

/// Separator used when a permission list is stored as a single column.
const PERMISSION_SEPARATOR: char = '|';

/// A snapshot of everything a creature carried when it died, plus the
/// metadata needed to protect, expire, and eventually remove it.
///
/// Inventory and equipment are opaque blobs owned by the serialization
/// collaborator; nothing in this workspace looks inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grave {
    /// Primary key.
    pub id: GraveId,

    /// Creature kind of the owner (e.g. `PLAYER`, `ZOMBIE`).
    pub owner_type: String,
    /// Owner name. Missing on rows written by old releases.
    pub owner_name: Option<String>,
    /// Owner display name, possibly formatted.
    pub owner_name_display: Option<String>,
    /// Owner UUID.
    pub owner_uuid: Option<Uuid>,
    /// Skin texture reference for head rendering.
    pub owner_texture: Option<String>,
    /// Signature for [`Grave::owner_texture`].
    pub owner_texture_signature: Option<String>,

    /// Creature kind of the killer; `None` for environmental deaths.
    pub killer_type: Option<String>,
    /// Killer name.
    pub killer_name: Option<String>,
    /// Killer display name.
    pub killer_name_display: Option<String>,
    /// Killer UUID.
    pub killer_uuid: Option<Uuid>,

    /// Where the owner died. Only `None` while the grave is being built.
    pub location_death: Option<Location>,
    /// Facing yaw at death.
    pub yaw: f32,
    /// Facing pitch at death.
    pub pitch: f32,

    /// Serialized inventory contents.
    pub inventory: Vec<u8>,
    /// Serialized worn equipment.
    pub equipment: Vec<u8>,

    /// Stored experience points. Never negative.
    pub experience: i32,
    /// Whether only the owner may open the grave.
    pub protection: bool,
    /// How long protection lasts, in milliseconds. Negative means forever.
    pub time_protection: i64,
    /// Whether the owner gave up the grave.
    pub abandoned: bool,
    /// How long the grave lives, in milliseconds. Negative means forever.
    pub time_alive: i64,
    /// Creation time, milliseconds since the Unix epoch.
    pub time_creation: i64,
    /// Permission tags that were active for the owner at death, in order.
    pub permissions: Vec<String>,
}

impl Grave {
    /// Start a new grave for `owner_type` at `location_death`, stamped with
    /// the current time. Every other field takes its empty default.
    pub fn new(owner_type: impl Into<String>, location_death: Location) -> Self {
        Self {
            id: GraveId::new(),
            owner_type: owner_type.into(),
            owner_name: None,
            owner_name_display: None,
            owner_uuid: None,
            owner_texture: None,
            owner_texture_signature: None,
            killer_type: None,
            killer_name: None,
            killer_name_display: None,
            killer_uuid: None,
            location_death: Some(location_death),
            yaw: 0.0,
            pitch: 0.0,
            inventory: Vec::new(),
            equipment: Vec::new(),
            experience: 0,
            protection: false,
            time_protection: 0,
            abandoned: false,
            time_alive: -1,
            time_creation: chrono::Utc::now().timestamp_millis(),
            permissions: Vec::new(),
        }
    }

    /// Whether `owner` is this grave's owner.
    pub fn is_owned_by(&self, owner: Uuid) -> bool {
        self.owner_uuid == Some(owner)
    }

    /// Milliseconds elapsed between creation and `now_ms`.
    pub const fn age_at(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.time_creation)
    }

    /// Whether protection is still in force at `now_ms`.
    pub const fn is_protected_at(&self, now_ms: i64) -> bool {
        self.protection && (self.time_protection < 0 || self.age_at(now_ms) < self.time_protection)
    }

    /// Whether the grave has outlived its time-alive budget at `now_ms`.
    pub const fn is_expired_at(&self, now_ms: i64) -> bool {
        self.time_alive >= 0 && self.age_at(now_ms) >= self.time_alive
    }

    /// Apply a typed column update to this record.
    pub fn apply(&mut self, update: &GraveUpdate) {
        match update {
            GraveUpdate::OwnerName(v) => self.owner_name.clone_from(v),
            GraveUpdate::OwnerNameDisplay(v) => self.owner_name_display.clone_from(v),
            GraveUpdate::OwnerTexture(v) => self.owner_texture.clone_from(v),
            GraveUpdate::OwnerTextureSignature(v) => self.owner_texture_signature.clone_from(v),
            GraveUpdate::KillerName(v) => self.killer_name.clone_from(v),
            GraveUpdate::KillerNameDisplay(v) => self.killer_name_display.clone_from(v),
            GraveUpdate::LocationDeath(v) => self.location_death = Some(v.clone()),
            GraveUpdate::Yaw(v) => self.yaw = *v,
            GraveUpdate::Pitch(v) => self.pitch = *v,
            GraveUpdate::Inventory(v) => self.inventory.clone_from(v),
            GraveUpdate::Equipment(v) => self.equipment.clone_from(v),
            GraveUpdate::Experience(v) => self.experience = (*v).max(0),
            GraveUpdate::Protection(v) => self.protection = *v,
            GraveUpdate::TimeProtection(v) => self.time_protection = *v,
            GraveUpdate::Abandoned(v) => self.abandoned = *v,
            GraveUpdate::TimeAlive(v) => self.time_alive = *v,
            GraveUpdate::Permissions(v) => self.permissions.clone_from(v),
        }
    }
}

/// Join permission tags into their stored form.
pub fn join_permissions(permissions: &[String]) -> String {
    permissions.join(&PERMISSION_SEPARATOR.to_string())
}

/// Split a stored permission column back into tags, dropping empty entries.
pub fn split_permissions(raw: &str) -> Vec<String> {
    raw.split(PERMISSION_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A change to one mutable column of a grave.
///
/// The same value drives both the cache mutation ([`Grave::apply`]) and the
/// persisted `UPDATE`, so the two can never disagree about what changed.
/// The primary key, owner identity, and creation time are not updatable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraveUpdate {
    /// `owner_name`
    OwnerName(Option<String>),
    /// `owner_name_display`
    OwnerNameDisplay(Option<String>),
    /// `owner_texture`
    OwnerTexture(Option<String>),
    /// `owner_texture_signature`
    OwnerTextureSignature(Option<String>),
    /// `killer_name`
    KillerName(Option<String>),
    /// `killer_name_display`
    KillerNameDisplay(Option<String>),
    /// `location_death`
    LocationDeath(Location),
    /// `yaw`
    Yaw(f32),
    /// `pitch`
    Pitch(f32),
    /// `inventory`
    Inventory(Vec<u8>),
    /// `equipment`
    Equipment(Vec<u8>),
    /// `experience`
    Experience(i32),
    /// `protection`
    Protection(bool),
    /// `time_protection`
    TimeProtection(i64),
    /// `is_abandoned`
    Abandoned(bool),
    /// `time_alive`
    TimeAlive(i64),
    /// `permissions`
    Permissions(Vec<String>),
}

impl GraveUpdate {
    /// The column this update writes.
    pub const fn column(&self) -> &'static str {
        match self {
            Self::OwnerName(_) => "owner_name",
            Self::OwnerNameDisplay(_) => "owner_name_display",
            Self::OwnerTexture(_) => "owner_texture",
            Self::OwnerTextureSignature(_) => "owner_texture_signature",
            Self::KillerName(_) => "killer_name",
            Self::KillerNameDisplay(_) => "killer_name_display",
            Self::LocationDeath(_) => "location_death",
            Self::Yaw(_) => "yaw",
            Self::Pitch(_) => "pitch",
            Self::Inventory(_) => "inventory",
            Self::Equipment(_) => "equipment",
            Self::Experience(_) => "experience",
            Self::Protection(_) => "protection",
            Self::TimeProtection(_) => "time_protection",
            Self::Abandoned(_) => "is_abandoned",
            Self::TimeAlive(_) => "time_alive",
            Self::Permissions(_) => "permissions",
        }
    }

    /// Build an update from a column name and its textual value.
    ///
    /// Empty strings clear nullable text columns. Flags accept
    /// `true`/`false`/`1`/`0`.
    pub fn parse(column: &str, raw: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::Value {
            column: column.to_owned(),
            value: raw.to_owned(),
        };
        let text = || (!raw.is_empty()).then(|| raw.to_owned());
        let flag = || match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid()),
        };
        let long = || raw.trim().parse::<i64>().map_err(|_e| invalid());
        let float = || raw.trim().parse::<f32>().map_err(|_e| invalid());

        let update = match column {
            "owner_name" => Self::OwnerName(text()),
            "owner_name_display" => Self::OwnerNameDisplay(text()),
            "owner_texture" => Self::OwnerTexture(text()),
            "owner_texture_signature" => Self::OwnerTextureSignature(text()),
            "killer_name" => Self::KillerName(text()),
            "killer_name_display" => Self::KillerNameDisplay(text()),
            "location_death" => Self::LocationDeath(raw.parse().map_err(|_e| invalid())?),
            "yaw" => Self::Yaw(float()?),
            "pitch" => Self::Pitch(float()?),
            "inventory" => Self::Inventory(raw.as_bytes().to_vec()),
            "equipment" => Self::Equipment(raw.as_bytes().to_vec()),
            "experience" => {
                let xp = raw.trim().parse::<i32>().map_err(|_e| invalid())?;
                if xp < 0 {
                    return Err(invalid());
                }
                Self::Experience(xp)
            }
            "protection" => Self::Protection(flag()?),
            "time_protection" => Self::TimeProtection(long()?),
            "is_abandoned" => Self::Abandoned(flag()?),
            "time_alive" => Self::TimeAlive(long()?),
            "permissions" => Self::Permissions(split_permissions(raw)),
            other => return Err(ParseError::Column(other.to_owned())),
        };
        Ok(update)
    }
}
