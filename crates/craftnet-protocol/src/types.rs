//! Core protocol types for craftnet's wire format.
//!
//! Everything in this module travels on the wire: these are the
//! structures that get serialized to bytes, sent to a peer, and
//! deserialized on the other side. The catalogue is shared by both
//! directions — a host and a client speak the same enum, they just
//! produce and consume different variants.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A peer's string identity within a session.
///
/// Endpoint ids are assigned at session creation and are the unit of
/// addressing everywhere: relay tunnel envelopes, the per-sender
/// sequence bookkeeping, and the migration election (which orders them
/// lexicographically). Newtype wrapper so an endpoint id can't be
/// confused with any other string in a signature.
///
/// `#[serde(transparent)]` makes it serialize as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// Returns the id as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A compact per-session `u16` alias for a peer.
///
/// Assigned by the host when a peer joins, used only by the binary
/// fast path to keep the per-player position broadcast small. The
/// mapping to [`EndpointId`] is bijective for the lifetime of a peer's
/// membership and may be reused after that peer leaves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NumericId(pub u16);

impl fmt::Display for NumericId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient — who should receive an outbound message?
// ---------------------------------------------------------------------------

/// Specifies who should receive an outbound message.
///
/// Routers return `(Recipient, WireMessage)` pairs; the session actor
/// resolves each recipient against the live peer table and picks the
/// best transport per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every registered peer.
    All,

    /// One specific peer.
    Peer(EndpointId),

    /// Everyone except the specified peer. Used for host rebroadcast,
    /// where the original sender must not see its own message echoed.
    AllExcept(EndpointId),
}

// ---------------------------------------------------------------------------
// PlayerSnapshot — roster entries carried in `welcome`
// ---------------------------------------------------------------------------

/// One participant's replicated state as carried in the join roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// The peer's string identity.
    pub id: EndpointId,
    /// The peer's compact numeric alias.
    pub nid: NumericId,
    /// Display name.
    pub name: String,
    /// World position.
    pub position: [f32; 3],
    /// Look yaw in radians.
    pub yaw: f32,
    /// Look pitch in radians.
    pub pitch: f32,
    /// Health, 0–255.
    pub health: u8,
    /// World-partition tag (e.g. `"overworld"`).
    pub dimension: String,
}

// ---------------------------------------------------------------------------
// MessageBody — the full wire catalogue
// ---------------------------------------------------------------------------

/// Every message kind that travels between peers.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON:
/// `{ "type": "chat", "text": "hi" }`. The tag names are snake_case and
/// are part of the wire contract.
///
/// The router matches this enum exhaustively, so adding a variant is a
/// compile-time-checked change — there is no silent "unknown type"
/// path inside the process. Unknown tags only exist at the decode
/// boundary, where they are rejected as a soft error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    // -- Session establishment --

    /// Client → host: request to join the session.
    ///
    /// Must be the *first* message a not-yet-registered peer sends;
    /// anything else closes the connection. Carries the joiner's own
    /// endpoint id (the host re-keys the accepted connection by it),
    /// the optional password, the advisory protocol version, and the
    /// best-effort identity token from the auth service.
    Join {
        id: EndpointId,
        name: String,
        password: Option<String>,
        protocol_version: u32,
        token: Option<String>,
        uuid: Option<String>,
    },

    /// Host → joining client: registration succeeded.
    ///
    /// Carries the assigned ids, the full current roster (including the
    /// host's own synthetic entry), and the world metadata needed to
    /// mirror the shared state.
    Welcome {
        player_id: EndpointId,
        nid: NumericId,
        players: Vec<PlayerSnapshot>,
        seed: i64,
        time_of_day: u32,
        weather: String,
    },

    /// Host → other peers: someone joined.
    PlayerJoin {
        id: EndpointId,
        nid: NumericId,
        name: String,
    },

    /// Host → remaining peers: someone left.
    PlayerLeave { id: EndpointId },

    // -- Movement (binary fast path) --

    /// Self-move report. Encoded with the binary fast path (tag `0x01`),
    /// never the envelope.
    Move {
        position: [f32; 3],
        yaw: f32,
        pitch: f32,
        health: u8,
    },

    /// Host's relayed per-player position broadcast (tag `0x02`).
    /// Addresses the mover by numeric id and carries the host's latency
    /// estimate for that peer, clamped to one byte.
    PlayerMove {
        nid: NumericId,
        position: [f32; 3],
        yaw: f32,
        pitch: f32,
        health: u8,
        latency_ms: u8,
    },

    // -- World mutation --

    /// Client → host: place a block.
    BlockPlace { x: i32, y: i32, z: i32, block: u8 },

    /// Client → host: break a block.
    BlockBreak { x: i32, y: i32, z: i32 },

    /// Host → peers: unified block mutation. Idempotent — reapplying
    /// the same coordinates and type is a no-op overwrite.
    BlockUpdate { x: i32, y: i32, z: i32, block: u8 },

    /// Host → joining client: world metadata snapshot.
    WorldData {
        seed: i64,
        time_of_day: u32,
        weather: String,
    },

    /// Host → peers: bulk chunk payload, opaque to this layer.
    ChunkData {
        chunk_x: i32,
        chunk_z: i32,
        data: Vec<u8>,
    },

    /// Host → peers: periodic world-clock/weather sync.
    WorldSync { time_of_day: u32, weather: String },

    // -- Chat & actions --

    /// Client → host: chat line.
    Chat { text: String },

    /// Host → peers: chat line tagged with the sender's display name.
    ChatBroadcast {
        sender: String,
        text: String,
        kind: String,
    },

    /// Client → host: a discrete player action (swing, crouch, ...).
    Action { action: String },

    /// Host → peers: relayed player action.
    PlayerAction { id: EndpointId, action: String },

    // -- Entities --

    /// Spawn/update a transient entity. Host rebroadcasts verbatim.
    EntitySync {
        kind: String,
        id: String,
        position: [f32; 3],
        velocity: [f32; 3],
        data: serde_json::Value,
    },

    /// Update a transient entity's velocity.
    EntityVelocity {
        kind: String,
        id: String,
        velocity: [f32; 3],
    },

    /// Remove a transient entity.
    EntityRemove { kind: String, id: String },

    /// A named world event (explosion, lightning, ...).
    WorldEvent {
        event: String,
        position: Option<[f32; 3]>,
        data: serde_json::Value,
    },

    /// Inventory synchronization, opaque slots payload.
    InventoryUpdate { slots: serde_json::Value },

    // -- Timing --

    /// Either direction: RTT probe. The echoed value is the envelope
    /// timestamp; any recipient answers immediately regardless of role.
    Ping,

    /// Answer to a `ping`, echoing the original timestamp.
    Pong { echo: u64 },

    /// Receipt acknowledgement for reliable delivery bookkeeping.
    Ack { seq: u64 },

    // -- Control & signaling --

    /// Advisory mod list exchanged at join.
    ModInfo { mods: Vec<String> },

    /// Relay-room signal: migration announcements and direct-channel
    /// dial-back offers travel as bare JSON over the relay (no
    /// envelope), decoded via [`decode_text`](crate::decode_text).
    RelaySignal {
        event: String,
        host: Option<EndpointId>,
        addr: Option<String>,
    },

    /// Dedicated-socket connection preamble.
    Handshake { protocol_version: u32 },

    /// Server acknowledgement of a `handshake`.
    HandshakeAck { protocol_version: u32 },

    /// Host answer enumerating current endpoint ids, for
    /// migration-aware clients.
    PeerList { peers: Vec<EndpointId> },

    // -- Errors --

    /// Terminal error for this connection attempt (bad password,
    /// malformed join, ...). The connection closes after a short flush
    /// grace.
    Error { code: u16, message: String },

    /// Advisory warning that does not end the connection (protocol
    /// version skew, identity verification soft-failure).
    ServerWarning { message: String },
}

impl MessageBody {
    /// Returns `true` if a host must apply-then-rebroadcast this kind
    /// to the other peers.
    pub fn is_broadcastable(&self) -> bool {
        matches!(
            self,
            Self::Move { .. }
                | Self::BlockPlace { .. }
                | Self::BlockBreak { .. }
                | Self::Chat { .. }
                | Self::Action { .. }
                | Self::EntitySync { .. }
                | Self::EntityVelocity { .. }
                | Self::EntityRemove { .. }
                | Self::WorldEvent { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// WireMessage — the top-level wire unit
// ---------------------------------------------------------------------------

/// The top-level wire unit: `{type, sequence, timestamp, payload}`.
///
/// `sequence` is per-sender and strictly increasing; the receiver drops
/// anything at or below its high-water mark for that sender. Messages
/// without a sequence number (the initial handshake exchange, relay
/// signals) are exempt from the check, which is why the field is
/// optional and omitted from JSON when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Per-sender monotonic counter. `None` for handshake-phase and
    /// signaling messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Sender wall-clock milliseconds. The binary fast path truncates
    /// this to 32 bits on the wire.
    pub timestamp: u64,

    /// The message content, flattened into the same JSON object.
    #[serde(flatten)]
    pub body: MessageBody,
}

impl WireMessage {
    /// Convenience constructor for unsequenced messages.
    pub fn unsequenced(timestamp: u64, body: MessageBody) -> Self {
        Self {
            sequence: None,
            timestamp,
            body,
        }
    }
}
