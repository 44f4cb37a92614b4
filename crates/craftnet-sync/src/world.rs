//! The seam between the sync layer and the embedding game's world.

use std::collections::HashMap;

use craftnet_protocol::{EndpointId, PlayerSnapshot};

/// What the sync layer needs from the game's world state.
///
/// Implemented by the embedding game over its actual voxel world. The
/// `remote_origin` flag on [`set_block`](Self::set_block) tells the
/// game whether a mutation came off the wire (apply silently, no
/// re-send) or from local play.
///
/// The chunk- and inventory-shaped hooks default to no-ops so a
/// minimal game can ignore bulk transfer entirely.
pub trait WorldBridge: Send + 'static {
    fn get_block(&self, x: i32, y: i32, z: i32) -> u8;
    fn set_block(&mut self, x: i32, y: i32, z: i32, block: u8, remote_origin: bool);

    /// Marks a chunk dirty so the game re-meshes it.
    fn bump_chunk_version(&mut self, chunk_x: i32, chunk_z: i32);

    fn add_player(&mut self, snapshot: &PlayerSnapshot);
    fn remove_player(&mut self, id: &EndpointId);
    /// Drops every remote player, used at session teardown.
    fn clear_players(&mut self);

    fn append_chat(&mut self, sender: &str, text: &str);

    fn spawn_entity(
        &mut self,
        kind: &str,
        id: &str,
        position: [f32; 3],
        velocity: [f32; 3],
        data: &serde_json::Value,
    );
    fn set_entity_velocity(&mut self, kind: &str, id: &str, velocity: [f32; 3]);
    fn remove_entity(&mut self, kind: &str, id: &str);

    fn seed(&self) -> i64;
    fn set_seed(&mut self, seed: i64);
    fn time_of_day(&self) -> u32;
    fn set_time_of_day(&mut self, time_of_day: u32);
    fn weather(&self) -> String;
    fn set_weather(&mut self, weather: &str);

    /// Applies a bulk chunk payload. Opaque to this layer.
    fn apply_chunk(&mut self, _chunk_x: i32, _chunk_z: i32, _data: &[u8]) {}

    /// A named world event (explosion, lightning, ...).
    fn world_event(
        &mut self,
        _event: &str,
        _position: Option<[f32; 3]>,
        _data: &serde_json::Value,
    ) {
    }

    /// Opaque inventory payload.
    fn apply_inventory(&mut self, _slots: &serde_json::Value) {}
}

/// In-memory [`WorldBridge`] used by tests and examples.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    blocks: HashMap<(i32, i32, i32), u8>,
    chunk_versions: HashMap<(i32, i32), u64>,
    players: HashMap<EndpointId, PlayerSnapshot>,
    chat: Vec<(String, String)>,
    entities: HashMap<(String, String), [f32; 3]>,
    seed: i64,
    time_of_day: u32,
    weather: String,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self {
            weather: "clear".to_string(),
            ..Self::default()
        }
    }

    pub fn chunk_version(&self, chunk_x: i32, chunk_z: i32) -> u64 {
        self.chunk_versions
            .get(&(chunk_x, chunk_z))
            .copied()
            .unwrap_or(0)
    }

    pub fn player(&self, id: &EndpointId) -> Option<&PlayerSnapshot> {
        self.players.get(id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn chat(&self) -> &[(String, String)] {
        &self.chat
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl WorldBridge for MemoryWorld {
    fn get_block(&self, x: i32, y: i32, z: i32) -> u8 {
        self.blocks.get(&(x, y, z)).copied().unwrap_or(0)
    }

    fn set_block(&mut self, x: i32, y: i32, z: i32, block: u8, _remote_origin: bool) {
        if block == 0 {
            self.blocks.remove(&(x, y, z));
        } else {
            self.blocks.insert((x, y, z), block);
        }
    }

    fn bump_chunk_version(&mut self, chunk_x: i32, chunk_z: i32) {
        *self.chunk_versions.entry((chunk_x, chunk_z)).or_insert(0) += 1;
    }

    fn add_player(&mut self, snapshot: &PlayerSnapshot) {
        self.players.insert(snapshot.id.clone(), snapshot.clone());
    }

    fn remove_player(&mut self, id: &EndpointId) {
        self.players.remove(id);
    }

    fn clear_players(&mut self) {
        self.players.clear();
    }

    fn append_chat(&mut self, sender: &str, text: &str) {
        self.chat.push((sender.to_string(), text.to_string()));
    }

    fn spawn_entity(
        &mut self,
        kind: &str,
        id: &str,
        position: [f32; 3],
        _velocity: [f32; 3],
        _data: &serde_json::Value,
    ) {
        self.entities
            .insert((kind.to_string(), id.to_string()), position);
    }

    fn set_entity_velocity(&mut self, _kind: &str, _id: &str, _velocity: [f32; 3]) {}

    fn remove_entity(&mut self, kind: &str, id: &str) {
        self.entities.remove(&(kind.to_string(), id.to_string()));
    }

    fn seed(&self) -> i64 {
        self.seed
    }

    fn set_seed(&mut self, seed: i64) {
        self.seed = seed;
    }

    fn time_of_day(&self) -> u32 {
        self.time_of_day
    }

    fn set_time_of_day(&mut self, time_of_day: u32) {
        self.time_of_day = time_of_day;
    }

    fn weather(&self) -> String {
        self.weather.clone()
    }

    fn set_weather(&mut self, weather: &str) {
        self.weather = weather.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use craftnet_protocol::NumericId;

    #[test]
    fn test_memory_world_block_round_trip() {
        let mut world = MemoryWorld::new();
        assert_eq!(world.get_block(1, 64, -3), 0);
        world.set_block(1, 64, -3, 7, true);
        assert_eq!(world.get_block(1, 64, -3), 7);
        // Setting air removes the entry.
        world.set_block(1, 64, -3, 0, true);
        assert_eq!(world.get_block(1, 64, -3), 0);
    }

    #[test]
    fn test_memory_world_chunk_versions_bump() {
        let mut world = MemoryWorld::new();
        assert_eq!(world.chunk_version(0, 0), 0);
        world.bump_chunk_version(0, 0);
        world.bump_chunk_version(0, 0);
        assert_eq!(world.chunk_version(0, 0), 2);
        assert_eq!(world.chunk_version(1, 0), 0);
    }

    #[test]
    fn test_memory_world_players_upsert_and_clear() {
        let mut world = MemoryWorld::new();
        let snapshot = PlayerSnapshot {
            id: EndpointId::from("peer-a"),
            nid: NumericId(1),
            name: "alice".into(),
            position: [0.0, 64.0, 0.0],
            yaw: 0.0,
            pitch: 0.0,
            health: 20,
            dimension: "overworld".into(),
        };
        world.add_player(&snapshot);
        let moved = PlayerSnapshot {
            position: [5.0, 64.0, 5.0],
            ..snapshot.clone()
        };
        world.add_player(&moved);
        assert_eq!(world.player_count(), 1);
        assert_eq!(
            world.player(&EndpointId::from("peer-a")).unwrap().position,
            [5.0, 64.0, 5.0]
        );
        world.clear_players();
        assert_eq!(world.player_count(), 0);
    }
}
