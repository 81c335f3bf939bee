//! Authoritative in-memory view of graves and their visual records.
//!
//! The host reads and writes here synchronously; persistence follows on the
//! write lanes. All state sits behind one [`RwLock`] so a grave and the
//! chunk records that reference it are always observed together. A poisoned
//! lock is recovered rather than propagated: the maps stay structurally
//! valid even if a holder panicked.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gravekeeper_types::{
    BlockData, BlockLocation, ChunkKey, EntityData, Grave, GraveId, GraveUpdate, Location,
};
use uuid::Uuid;

/// Block and entity records that fall inside one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    key: ChunkKey,
    blocks: HashMap<BlockLocation, BlockData>,
    entities: HashMap<Uuid, EntityData>,
}

impl ChunkData {
    fn new(key: ChunkKey) -> Self {
        Self {
            key,
            blocks: HashMap::new(),
            entities: HashMap::new(),
        }
    }

    /// Which chunk this is.
    pub const fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Replaced blocks in this chunk, keyed by position.
    pub const fn block_data(&self) -> &HashMap<BlockLocation, BlockData> {
        &self.blocks
    }

    /// Marker entities in this chunk, keyed by entity UUID.
    pub const fn entity_data(&self) -> &HashMap<Uuid, EntityData> {
        &self.entities
    }

    /// Whether the chunk holds no records.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.entities.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    graves: HashMap<GraveId, Grave>,
    chunks: HashMap<ChunkKey, ChunkData>,
    /// Last solid position seen per entity.
    entity_locations: HashMap<Uuid, Location>,
    /// Right-click cooldown expiry (epoch ms) per player.
    right_click_cooldowns: HashMap<Uuid, i64>,
    /// Marker entity → owning grave.
    entity_graves: HashMap<Uuid, GraveId>,
}

impl CacheState {
    fn drop_chunk_if_empty(&mut self, key: &ChunkKey) {
        if self.chunks.get(key).is_some_and(ChunkData::is_empty) {
            self.chunks.remove(key);
        }
    }
}

/// Write-through cache owned by the data manager.
#[derive(Debug, Default)]
pub struct CacheManager {
    state: RwLock<CacheState>,
}

impl CacheManager {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Graves
    // =========================================================================

    /// Insert or replace a grave. Returns the previous record, if any.
    pub fn add_grave(&self, grave: Grave) -> Option<Grave> {
        self.write().graves.insert(grave.id, grave)
    }

    /// Evict a grave. Its chunk records are left for the caller to remove.
    pub fn remove_grave(&self, id: GraveId) -> Option<Grave> {
        self.write().graves.remove(&id)
    }

    /// A copy of one grave.
    pub fn get_grave(&self, id: GraveId) -> Option<Grave> {
        self.read().graves.get(&id).cloned()
    }

    /// Whether a grave is cached.
    pub fn contains_grave(&self, id: GraveId) -> bool {
        self.read().graves.contains_key(&id)
    }

    /// Snapshot of every grave.
    pub fn grave_map(&self) -> HashMap<GraveId, Grave> {
        self.read().graves.clone()
    }

    /// Number of cached graves.
    pub fn grave_count(&self) -> usize {
        self.read().graves.len()
    }

    /// Every grave owned by `owner`, oldest first.
    pub fn graves_for_owner(&self, owner: Uuid) -> Vec<Grave> {
        let mut graves: Vec<Grave> = self
            .read()
            .graves
            .values()
            .filter(|g| g.is_owned_by(owner))
            .cloned()
            .collect();
        graves.sort_by_key(|g| (g.time_creation, g.id));
        graves
    }

    /// The grave of `owner` with the smallest creation time. Ties go to the
    /// smaller grave ID so the answer is stable.
    pub fn get_oldest_grave(&self, owner: Uuid) -> Option<Grave> {
        self.read()
            .graves
            .values()
            .filter(|g| g.is_owned_by(owner))
            .min_by_key(|g| (g.time_creation, g.id))
            .cloned()
    }

    /// Apply an update to a cached grave. Returns `false` if it is unknown.
    pub fn update_grave(&self, id: GraveId, update: &GraveUpdate) -> bool {
        self.write().graves.get_mut(&id).is_some_and(|grave| {
            grave.apply(update);
            true
        })
    }

    // =========================================================================
    // Chunk records
    // =========================================================================

    /// Record a replaced block, creating its chunk on demand.
    pub fn add_block_data(&self, block: BlockData) {
        let key = block.chunk();
        self.write()
            .chunks
            .entry(key.clone())
            .or_insert_with(|| ChunkData::new(key))
            .blocks
            .insert(block.location.clone(), block);
    }

    /// Forget the block at `location`. Empty chunks are dropped.
    pub fn remove_block_data(&self, location: &BlockLocation) -> Option<BlockData> {
        let key = location.chunk();
        let mut state = self.write();
        let removed = state.chunks.get_mut(&key)?.blocks.remove(location);
        state.drop_chunk_if_empty(&key);
        removed
    }

    /// Record a marker entity, creating its chunk on demand.
    pub fn add_entity_data(&self, entity: EntityData) {
        let key = entity.chunk();
        let mut state = self.write();
        state.entity_graves.insert(entity.entity_id, entity.grave_id);
        state
            .chunks
            .entry(key.clone())
            .or_insert_with(|| ChunkData::new(key))
            .entities
            .insert(entity.entity_id, entity);
    }

    /// Forget a marker entity. Empty chunks are dropped.
    pub fn remove_entity_data(&self, entity: &EntityData) -> Option<EntityData> {
        let key = entity.chunk();
        let mut state = self.write();
        state.entity_graves.remove(&entity.entity_id);
        let removed = state.chunks.get_mut(&key)?.entities.remove(&entity.entity_id);
        state.drop_chunk_if_empty(&key);
        removed
    }

    /// Copy of one chunk's records.
    pub fn chunk(&self, key: &ChunkKey) -> Option<ChunkData> {
        self.read().chunks.get(key).cloned()
    }

    /// Number of chunks holding records.
    pub fn chunk_count(&self) -> usize {
        self.read().chunks.len()
    }

    /// Block record at `location`, if any.
    pub fn block_data_at(&self, location: &BlockLocation) -> Option<BlockData> {
        self.read()
            .chunks
            .get(&location.chunk())
            .and_then(|chunk| chunk.blocks.get(location))
            .cloned()
    }

    /// Whether a cached grave owns the block at `location`.
    pub fn has_grave_at_location(&self, location: &BlockLocation) -> bool {
        let state = self.read();
        state
            .chunks
            .get(&location.chunk())
            .and_then(|chunk| chunk.blocks.get(location))
            .is_some_and(|block| state.graves.contains_key(&block.grave_id))
    }

    /// Every block record belonging to `grave`.
    pub fn blocks_for_grave(&self, grave: GraveId) -> Vec<BlockData> {
        self.read()
            .chunks
            .values()
            .flat_map(|chunk| chunk.blocks.values())
            .filter(|block| block.grave_id == grave)
            .cloned()
            .collect()
    }

    /// Every marker entity belonging to `grave`.
    pub fn entities_for_grave(&self, grave: GraveId) -> Vec<EntityData> {
        self.read()
            .chunks
            .values()
            .flat_map(|chunk| chunk.entities.values())
            .filter(|entity| entity.grave_id == grave)
            .cloned()
            .collect()
    }

    /// Grave owning a marker entity.
    pub fn grave_for_entity(&self, entity: Uuid) -> Option<GraveId> {
        self.read().entity_graves.get(&entity).copied()
    }

    // =========================================================================
    // Scratch state
    // =========================================================================

    /// Remember the last solid position of an entity.
    pub fn set_entity_location(&self, entity: Uuid, location: Location) {
        self.write().entity_locations.insert(entity, location);
    }

    /// Last solid position of an entity.
    pub fn entity_location(&self, entity: Uuid) -> Option<Location> {
        self.read().entity_locations.get(&entity).cloned()
    }

    /// Forget an entity's last position.
    pub fn clear_entity_location(&self, entity: Uuid) {
        self.write().entity_locations.remove(&entity);
    }

    /// Start a right-click cooldown for `player` that expires at `until_ms`.
    pub fn set_right_click_cooldown(&self, player: Uuid, until_ms: i64) {
        self.write().right_click_cooldowns.insert(player, until_ms);
    }

    /// Whether `player` is still cooling down at `now_ms`. Expired entries
    /// are pruned.
    pub fn on_right_click_cooldown(&self, player: Uuid, now_ms: i64) -> bool {
        let mut state = self.write();
        match state.right_click_cooldowns.get(&player) {
            Some(until) if *until > now_ms => true,
            Some(_) => {
                state.right_click_cooldowns.remove(&player);
                false
            }
            None => false,
        }
    }

    /// Drop everything, including scratch state.
    pub fn clear(&self) {
        *self.write() = CacheState::default();
    }

    /// Take over the persisted records of `other` in one step. Scratch state
    /// (entity positions, cooldowns) is kept.
    pub fn replace_with(&self, other: Self) {
        let loaded = other.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.write();
        state.graves = loaded.graves;
        state.chunks = loaded.chunks;
        state.entity_graves = loaded.entity_graves;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gravekeeper_types::EntityKind;

    use super::*;

    fn grave_for(owner: Uuid, created: i64) -> Grave {
        let mut grave = Grave::new("PLAYER", Location::new("world", 0.0, 64.0, 0.0));
        grave.owner_uuid = Some(owner);
        grave.time_creation = created;
        grave
    }

    #[test]
    fn removed_grave_is_gone_immediately() {
        let cache = CacheManager::new();
        let grave = grave_for(Uuid::new_v4(), 1);
        let id = grave.id;
        cache.add_grave(grave);
        assert!(cache.contains_grave(id));
        assert!(cache.remove_grave(id).is_some());
        assert!(cache.get_grave(id).is_none());
        assert!(!cache.grave_map().contains_key(&id));
    }

    #[test]
    fn oldest_grave_uses_creation_time() {
        let cache = CacheManager::new();
        let owner = Uuid::new_v4();
        for created in [100, 50, 200] {
            cache.add_grave(grave_for(owner, created));
        }
        cache.add_grave(grave_for(Uuid::new_v4(), 1));

        let oldest = cache.get_oldest_grave(owner).unwrap();
        assert_eq!(oldest.time_creation, 50);
        assert_eq!(cache.graves_for_owner(owner).len(), 3);
        assert!(cache.get_oldest_grave(Uuid::new_v4()).is_none());
    }

    #[test]
    fn update_applies_in_place() {
        let cache = CacheManager::new();
        let grave = grave_for(Uuid::new_v4(), 1);
        let id = grave.id;
        cache.add_grave(grave);
        assert!(cache.update_grave(id, &GraveUpdate::Experience(75)));
        assert_eq!(cache.get_grave(id).unwrap().experience, 75);
        assert!(!cache.update_grave(GraveId::new(), &GraveUpdate::Experience(1)));
    }

    #[test]
    fn chunks_are_created_lazily_and_dropped_when_empty() {
        let cache = CacheManager::new();
        let grave = grave_for(Uuid::new_v4(), 1);
        let id = grave.id;
        cache.add_grave(grave);

        let at = BlockLocation::new("world", 17, 64, -1);
        cache.add_block_data(BlockData::new(at.clone(), id, Some("stone".to_owned()), None));
        let entity = EntityData::new(
            Location::new("world", 17.5, 65.0, -0.5),
            Uuid::new_v4(),
            id,
            EntityKind::ArmorStand,
        );
        cache.add_entity_data(entity.clone());

        let chunk = cache.chunk(&ChunkKey::new("world", 1, -1)).unwrap();
        assert_eq!(chunk.block_data().len(), 1);
        assert_eq!(chunk.entity_data().len(), 1);
        assert!(cache.has_grave_at_location(&at));
        assert_eq!(cache.grave_for_entity(entity.entity_id), Some(id));
        assert_eq!(cache.entities_for_grave(id).len(), 1);

        assert!(cache.remove_block_data(&at).is_some());
        assert_eq!(cache.chunk_count(), 1);
        assert!(cache.remove_entity_data(&entity).is_some());
        assert_eq!(cache.chunk_count(), 0);
        assert!(!cache.has_grave_at_location(&at));
        assert!(cache.grave_for_entity(entity.entity_id).is_none());
    }

    #[test]
    fn block_without_cached_grave_is_not_a_grave() {
        let cache = CacheManager::new();
        let at = BlockLocation::new("world", 0, 0, 0);
        cache.add_block_data(BlockData::new(at.clone(), GraveId::new(), None, None));
        assert!(cache.block_data_at(&at).is_some());
        assert!(!cache.has_grave_at_location(&at));
    }

    #[test]
    fn cooldowns_expire() {
        let cache = CacheManager::new();
        let player = Uuid::new_v4();
        cache.set_right_click_cooldown(player, 1_000);
        assert!(cache.on_right_click_cooldown(player, 999));
        assert!(!cache.on_right_click_cooldown(player, 1_000));
        assert!(!cache.on_right_click_cooldown(player, 0));
    }

    #[test]
    fn clear_drops_everything() {
        let cache = CacheManager::new();
        cache.add_grave(grave_for(Uuid::new_v4(), 1));
        cache.set_entity_location(Uuid::new_v4(), Location::new("w", 0.0, 0.0, 0.0));
        cache.clear();
        assert_eq!(cache.grave_count(), 0);
        assert_eq!(cache.chunk_count(), 0);
    }

    #[test]
    fn replace_keeps_scratch_state() {
        let cache = CacheManager::new();
        let stale = grave_for(Uuid::new_v4(), 1);
        let stale_id = stale.id;
        cache.add_grave(stale);
        let entity = Uuid::new_v4();
        cache.set_entity_location(entity, Location::new("w", 1.0, 2.0, 3.0));

        let fresh = CacheManager::new();
        let grave = grave_for(Uuid::new_v4(), 2);
        let id = grave.id;
        fresh.add_grave(grave);

        cache.replace_with(fresh);
        assert!(cache.contains_grave(id));
        assert!(!cache.contains_grave(stale_id));
        assert!(cache.entity_location(entity).is_some());
    }
}
