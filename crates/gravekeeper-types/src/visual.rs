//! Records describing how a grave appears in the world.
//!
//! A grave is rendered by substituting blocks ([`BlockData`]) and by
//! spawning marker entities or hologram lines ([`EntityData`]). Each entity
//! kind is persisted in its own table; see [`EntityKind::table`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::ids::GraveId;
use crate::location::{BlockLocation, ChunkKey, Location};

/// Material used when a stored block record has no replacement material.
pub const AIR: &str = "air";

/// A world block that was replaced to represent a grave.
///
/// Restoring the block means putting `replace_material` / `replace_data`
/// back at `location`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockData {
    /// The substituted block.
    pub location: BlockLocation,
    /// Owning grave. Not enforced by the backend.
    pub grave_id: GraveId,
    /// Material that was there before the grave.
    pub replace_material: String,
    /// Extra block state that was there before the grave.
    pub replace_data: String,
}

impl BlockData {
    /// Build a block record, defaulting missing replacement state to air.
    pub fn new(
        location: BlockLocation,
        grave_id: GraveId,
        replace_material: Option<String>,
        replace_data: Option<String>,
    ) -> Self {
        Self {
            location,
            grave_id,
            replace_material: replace_material
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| AIR.to_owned()),
            replace_data: replace_data.unwrap_or_default(),
        }
    }

    /// Chunk containing the block.
    pub fn chunk(&self) -> ChunkKey {
        self.location.chunk()
    }
}

/// The kind of marker entity, which also selects its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// Invisible armor stand carrying the grave head.
    ArmorStand,
    /// Item frame showing a grave icon.
    ItemFrame,
    /// One line of floating hologram text.
    Hologram,
    /// Custom furniture from the `ItemsAdder` integration.
    ItemsAdder,
    /// Custom furniture from the `Oraxen` integration.
    Oraxen,
    /// Custom furniture from the `Nexo` integration.
    Nexo,
    /// Corpse rendered by the `PlayerNPC` integration.
    PlayerNpc,
    /// Corpse rendered by the `Citizens` integration.
    CitizensNpc,
}

impl EntityKind {
    /// Every kind, in table-creation order.
    pub const ALL: [Self; 8] = [
        Self::ArmorStand,
        Self::ItemFrame,
        Self::Hologram,
        Self::ItemsAdder,
        Self::Oraxen,
        Self::Nexo,
        Self::PlayerNpc,
        Self::CitizensNpc,
    ];

    /// Name of the table holding records of this kind.
    pub const fn table(self) -> &'static str {
        match self {
            Self::ArmorStand => "armorstand",
            Self::ItemFrame => "itemframe",
            Self::Hologram => "hologram",
            Self::ItemsAdder => "itemsadder",
            Self::Oraxen => "oraxen",
            Self::Nexo => "nexo",
            Self::PlayerNpc => "playernpc",
            Self::CitizensNpc => "citizensnpc",
        }
    }

    /// Whether records of this kind carry a line index.
    pub const fn has_line(self) -> bool {
        matches!(self, Self::Hologram)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['_', '-'], "");
        Self::ALL
            .into_iter()
            .find(|kind| kind.table() == wanted)
            .ok_or_else(|| ParseError::EntityKind(s.to_owned()))
    }
}

/// A marker entity or hologram line belonging to a grave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Where the entity stands.
    pub location: Location,
    /// The entity's own UUID; delete key for its table.
    pub entity_id: Uuid,
    /// Owning grave.
    pub grave_id: GraveId,
    /// Which table the record lives in.
    pub kind: EntityKind,
    /// Hologram line index; `None` for every other kind.
    pub line: Option<i32>,
}

impl EntityData {
    /// A marker entity of a kind without line numbers.
    pub const fn new(location: Location, entity_id: Uuid, grave_id: GraveId, kind: EntityKind) -> Self {
        Self {
            location,
            entity_id,
            grave_id,
            kind,
            line: None,
        }
    }

    /// One hologram text line.
    pub const fn hologram(location: Location, entity_id: Uuid, grave_id: GraveId, line: i32) -> Self {
        Self {
            location,
            entity_id,
            grave_id,
            kind: EntityKind::Hologram,
            line: Some(line),
        }
    }

    /// Chunk containing the entity.
    pub fn chunk(&self) -> ChunkKey {
        self.location.chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_replacement_defaults_to_air() {
        let block = BlockData::new(BlockLocation::new("world", 1, 2, 3), GraveId::new(), None, None);
        assert_eq!(block.replace_material, AIR);
        assert_eq!(block.replace_data, "");

        let empty = BlockData::new(
            BlockLocation::new("world", 1, 2, 3),
            GraveId::new(),
            Some(String::new()),
            Some("facing=north".to_owned()),
        );
        assert_eq!(empty.replace_material, AIR);
        assert_eq!(empty.replace_data, "facing=north");
    }

    #[test]
    fn entity_kind_parses_table_names_and_aliases() {
        assert_eq!("armorstand".parse::<EntityKind>(), Ok(EntityKind::ArmorStand));
        assert_eq!("ARMOR_STAND".parse::<EntityKind>(), Ok(EntityKind::ArmorStand));
        assert_eq!("item-frame".parse::<EntityKind>(), Ok(EntityKind::ItemFrame));
        assert_eq!("citizensnpc".parse::<EntityKind>(), Ok(EntityKind::CitizensNpc));
        assert!("boat".parse::<EntityKind>().is_err());
    }

    #[test]
    fn every_kind_has_a_distinct_table() {
        let mut tables: Vec<_> = EntityKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), EntityKind::ALL.len());
    }

    #[test]
    fn only_holograms_have_lines() {
        let holo = EntityData::hologram(Location::new("w", 0.0, 0.0, 0.0), Uuid::new_v4(), GraveId::new(), 2);
        assert_eq!(holo.kind, EntityKind::Hologram);
        assert_eq!(holo.line, Some(2));
        assert!(EntityKind::Hologram.has_line());
        assert!(!EntityKind::ArmorStand.has_line());
    }
}
