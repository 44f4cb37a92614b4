//! Local session identity and lifecycle state.

use craftnet_protocol::EndpointId;
use rand::Rng;

/// Which side of the session this endpoint is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Not in a session.
    None,
    /// Authoritative host: owns the world, admits peers, relays traffic.
    Host,
    /// Client of a remote host or dedicated server.
    Client,
}

/// Coarse lifecycle of the session, observable by the embedding game.
///
/// ```text
///   Disconnected ──(host/join)──→ Connecting ──(welcome / listening)──→ Connected
///        ↑                            │                                    │
///        └────────────(disconnect or failure)─────────────────────────────┘
/// ```
///
/// `Error` is terminal for one session attempt; a fresh `host_game` or
/// `join_game` starts over from `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session in progress.
    Disconnected,
    /// Dialing, handshaking, or waiting for the host's welcome.
    Connecting,
    /// In a live session.
    Connected,
    /// The last attempt failed; the message says why.
    Error(String),
}

/// The local endpoint's identity within one session.
///
/// The outbound sequence counter lives here and nowhere else: every
/// enveloped message this endpoint sends gets the next value, so
/// receivers can drop duplicates with a simple high-water check.
#[derive(Debug)]
pub struct SessionInfo {
    /// Our ephemeral endpoint id, fresh per process.
    pub id: EndpointId,
    /// Display name the player chose.
    pub name: String,
    out_seq: u64,
}

impl SessionInfo {
    /// Creates a fresh identity with a random `peer-` endpoint id.
    pub fn new(name: impl Into<String>) -> Self {
        let raw: u64 = rand::rng().random();
        Self {
            id: EndpointId(format!("peer-{raw:016x}")),
            name: name.into(),
            out_seq: 0,
        }
    }

    /// Next outbound sequence number. Monotonic, starts at 1.
    pub fn next_seq(&mut self) -> u64 {
        self.out_seq += 1;
        self.out_seq
    }
}
