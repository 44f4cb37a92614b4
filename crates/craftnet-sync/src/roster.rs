//! The roster: every participant's last known state, including our own
//! synthetic entry.

use std::collections::HashMap;

use craftnet_protocol::{EndpointId, NumericId, PlayerSnapshot};

/// One participant's last known state.
#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub id: EndpointId,
    pub nid: NumericId,
    pub name: String,
    pub position: [f32; 3],
    pub yaw: f32,
    pub pitch: f32,
    pub health: u8,
    pub dimension: String,
    pub submerged: bool,
    /// Last discrete action seen (swing, crouch, ...), if any.
    pub last_action: Option<String>,
    pub latency_ms: u8,
}

impl PlayerInfo {
    pub fn new(id: EndpointId, nid: NumericId, name: impl Into<String>) -> Self {
        Self {
            id,
            nid,
            name: name.into(),
            position: [0.0, 0.0, 0.0],
            yaw: 0.0,
            pitch: 0.0,
            health: 20,
            dimension: "overworld".to_string(),
            submerged: false,
            last_action: None,
            latency_ms: 0,
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id.clone(),
            nid: self.nid,
            name: self.name.clone(),
            position: self.position,
            yaw: self.yaw,
            pitch: self.pitch,
            health: self.health,
            dimension: self.dimension.clone(),
        }
    }
}

/// All participants keyed by endpoint id, with a numeric-id index for
/// the binary fast path.
#[derive(Debug, Default)]
pub struct Roster {
    players: HashMap<EndpointId, PlayerInfo>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a participant.
    pub fn upsert(&mut self, info: PlayerInfo) {
        self.players.insert(info.id.clone(), info);
    }

    pub fn remove(&mut self, id: &EndpointId) -> Option<PlayerInfo> {
        self.players.remove(id)
    }

    pub fn get(&self, id: &EndpointId) -> Option<&PlayerInfo> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &EndpointId) -> Option<&mut PlayerInfo> {
        self.players.get_mut(id)
    }

    pub fn get_by_nid_mut(&mut self, nid: NumericId) -> Option<&mut PlayerInfo> {
        self.players.values_mut().find(|p| p.nid == nid)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.values()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Snapshot of everyone, as sent in a `welcome`.
    pub fn snapshot(&self) -> Vec<PlayerSnapshot> {
        self.players.values().map(PlayerInfo::snapshot).collect()
    }
}
