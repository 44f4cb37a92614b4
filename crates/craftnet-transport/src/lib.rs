//! Transport channels for craftnet.
//!
//! Three interchangeable channel kinds sit behind one contract:
//!
//! - **Direct** — an end-to-end WebSocket between two peers, preferred
//!   whenever it opens within the configured bound.
//! - **Relay** — an always-available fallback socket to a shared relay
//!   service; frames addressed to a peer id are wrapped in a tunnel
//!   envelope and redelivered by the relay.
//! - **Dedicated** — a conventional client connection to an always-on
//!   server address.
//!
//! All of them deliver inbound traffic as [`InboundFrame`]s on one mpsc
//! channel owned by the session actor, and all expose the object-safe
//! [`Wire`] trait for outbound sends. `send` is best-effort: a frame
//! offered to a closed wire is dropped, never a panic or an error the
//! caller must handle — liveness is checked via [`Wire::is_open`].

mod direct;
mod error;
mod relay;

pub use direct::{DirectListener, SocketWire, dial_direct, dial_dedicated};
pub use error::TransportError;
pub use relay::{RelayConnection, RelayPeerWire};

use std::fmt;

use craftnet_protocol::EndpointId;

/// Which underlying channel a frame or wire belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// End-to-end peer WebSocket.
    Direct,
    /// Tunneled through the shared relay service.
    Relay,
    /// Persistent connection to an always-on server.
    Dedicated,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Relay => write!(f, "relay"),
            Self::Dedicated => write!(f, "dedicated"),
        }
    }
}

/// A remote endpoint as named by the caller of `join_game`.
///
/// A network address selects the dedicated-socket path; anything else
/// is an ephemeral peer id reached via direct channel or relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    /// An ephemeral peer id (relay room / direct negotiation).
    Peer(EndpointId),
    /// A `host:port` or `ws://` URL of an always-on server.
    Socket(String),
}

impl PeerAddr {
    /// Classifies a user-supplied remote identifier.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("ws://") || s.starts_with("wss://") {
            return Self::Socket(s.to_string());
        }
        if s.parse::<std::net::SocketAddr>().is_ok() {
            return Self::Socket(format!("ws://{s}"));
        }
        Self::Peer(EndpointId::from(s))
    }
}

/// The payload of an inbound frame.
///
/// Binary frames carry codec-encoded messages; text frames carry bare
/// JSON from the relay's signaling path and are decoded without the
/// envelope step. `Closed` is the reader task's final word — it fires
/// exactly once when the underlying channel ends, cleanly or not.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Codec-encoded bytes (binary fast path or envelope).
    Bytes(Vec<u8>),
    /// Bare JSON text from a natively-textual path.
    Text(String),
    /// The channel to this peer has closed.
    Closed,
}

/// One inbound unit delivered to the session actor.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Which peer (or provisional connection label) this came from.
    pub from: EndpointId,
    /// The channel it arrived on.
    pub kind: TransportKind,
    /// The frame content.
    pub payload: FramePayload,
}

/// Sender half of the session's inbound frame channel.
pub type InboundSender = tokio::sync::mpsc::Sender<InboundFrame>;

/// Outbound contract shared by all channel kinds.
///
/// Object-safe so the session can hold heterogeneous wires in one map.
/// Implementations queue to an internal writer task, so `send` never
/// blocks and never fails loudly — a closed wire drops the frame.
pub trait Wire: Send + Sync {
    /// The channel kind backing this wire.
    fn kind(&self) -> TransportKind;

    /// Queues a frame for delivery. Best-effort: dropped silently if
    /// the wire is closed. Callers that care check [`is_open`](Self::is_open) first.
    fn send(&self, data: Vec<u8>);

    /// Whether the underlying channel is still believed open.
    fn is_open(&self) -> bool;

    /// Closes the wire and releases its tasks. Idempotent — safe to
    /// call on an already-closed wire.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_addr_classifies_socket_addrs() {
        assert_eq!(
            PeerAddr::parse("127.0.0.1:9000"),
            PeerAddr::Socket("ws://127.0.0.1:9000".into())
        );
        assert_eq!(
            PeerAddr::parse("ws://example.org:9000"),
            PeerAddr::Socket("ws://example.org:9000".into())
        );
    }

    #[test]
    fn test_peer_addr_classifies_peer_ids() {
        assert_eq!(
            PeerAddr::parse("peer-ab12cd34"),
            PeerAddr::Peer(EndpointId::from("peer-ab12cd34"))
        );
        // A bare hostname without a port is not a socket address.
        assert_eq!(
            PeerAddr::parse("steves-game"),
            PeerAddr::Peer(EndpointId::from("steves-game"))
        );
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Direct.to_string(), "direct");
        assert_eq!(TransportKind::Relay.to_string(), "relay");
        assert_eq!(TransportKind::Dedicated.to_string(), "dedicated");
    }
}
