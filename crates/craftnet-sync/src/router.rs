//! The routing contract shared by the host and client sides.

use craftnet_protocol::{EndpointId, MessageBody, NumericId, Recipient, WireMessage};
use craftnet_session::{ClockSync, PeerTable, SessionConfig, SessionInfo};
use craftnet_transport::TransportKind;

use crate::{Roster, WorldBridge};

/// One message the router wants sent, with its addressing.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub message: WireMessage,
}

impl Outbound {
    pub fn to_peer(peer: EndpointId, message: WireMessage) -> Self {
        Self {
            to: Recipient::Peer(peer),
            message,
        }
    }

    pub fn to_all(message: WireMessage) -> Self {
        Self {
            to: Recipient::All,
            message,
        }
    }

    pub fn to_all_except(peer: EndpointId, message: WireMessage) -> Self {
        Self {
            to: Recipient::AllExcept(peer),
            message,
        }
    }
}

/// Side effects routing cannot perform itself, handed to the session
/// actor to act on (spawn a verify call, close a wire, start a
/// migration, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The host accepted our join; carries our assigned ids.
    Welcomed {
        player_id: EndpointId,
        nid: NumericId,
    },
    /// The host refused our join (or the connection attempt died).
    JoinRejected { code: u16, message: String },
    /// Advisory problem worth surfacing to the player.
    Warning(String),
    /// A peer completed its join and is now part of the session.
    PeerRegistered {
        id: EndpointId,
        nid: NumericId,
        name: String,
    },
    /// A peer must be dropped: flush the attached error frame, wait
    /// the grace, close its wire.
    RejectPeer {
        id: EndpointId,
        code: u16,
        message: String,
    },
    /// A joiner presented an identity token; verify it out of band.
    VerifyIdentity {
        id: EndpointId,
        name: String,
        token: String,
        uuid: Option<String>,
    },
    /// A migration announcement named a new host.
    MigrationSignal { host: EndpointId },
    /// The host offered a direct dial-back address.
    DirectAddrOffer { addr: String },
    /// A relay peer asked us (the host) for our direct address.
    DirectRequested { peer: EndpointId },
    /// The dedicated server acknowledged our handshake.
    HandshakeAcked { protocol_version: u32 },
    /// The host enumerated current peers for migration awareness.
    PeerListReceived(Vec<EndpointId>),
    /// A peer left the session.
    PeerLeft { id: EndpointId },
}

/// Everything a router may read or mutate while handling one message.
///
/// Borrowed fresh from the session actor per message, so the borrow
/// checker enforces that routing never overlaps with actor bookkeeping.
pub struct RouterCtx<'a> {
    pub world: &'a mut dyn WorldBridge,
    pub roster: &'a mut Roster,
    pub peers: &'a mut PeerTable,
    pub clock: &'a mut ClockSync,
    pub info: &'a mut SessionInfo,
    pub config: &'a SessionConfig,
    /// Local wall clock, milliseconds.
    pub now_ms: u64,
    /// Channel kind the message arrived on (or would leave on).
    pub frame_kind: TransportKind,
    pub events: &'a mut Vec<SyncEvent>,
}

impl RouterCtx<'_> {
    /// Builds a sequenced outbound message stamped with the local
    /// clock and the next outbound sequence number.
    pub fn stamp(&mut self, body: MessageBody) -> WireMessage {
        WireMessage {
            sequence: Some(self.info.next_seq()),
            timestamp: self.now_ms,
            body,
        }
    }

    /// Builds an unsequenced control message (handshake phase,
    /// ping/pong, errors).
    pub fn control(&self, body: MessageBody) -> WireMessage {
        WireMessage::unsequenced(self.now_ms, body)
    }

    pub fn event(&mut self, event: SyncEvent) {
        self.events.push(event);
    }
}

/// One side of the routing state machine.
pub trait Router {
    /// Handles one admitted inbound message, returning the messages to
    /// send in response.
    fn handle(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        sender: &EndpointId,
        msg: WireMessage,
    ) -> Vec<Outbound>;
}

/// Pre-dispatch admission gate, shared by both router sides.
///
/// Tracks senders we have not seen before (tunneled frames and fresh
/// sockets both arrive ahead of any explicit registration) and applies
/// the per-sender sequence high-water check. Returns `false` when the
/// message is a duplicate and must be dropped before any state
/// mutation.
pub fn admit(
    peers: &mut PeerTable,
    kind: TransportKind,
    sender: &EndpointId,
    msg: &WireMessage,
) -> bool {
    if !peers.contains(sender) {
        peers.track_provisional(sender.clone(), kind);
    }
    let accepted = peers.accept_seq(sender, msg.sequence);
    if !accepted {
        tracing::trace!(%sender, seq = ?msg.sequence, "dropping duplicate frame");
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use craftnet_protocol::MessageBody;

    fn chat(seq: Option<u64>) -> WireMessage {
        WireMessage {
            sequence: seq,
            timestamp: 0,
            body: MessageBody::Chat { text: "hi".into() },
        }
    }

    #[test]
    fn test_admit_drops_replayed_sequence() {
        let mut peers = PeerTable::new();
        let sender = EndpointId::from("peer-a");
        peers
            .register(sender.clone(), "alice", TransportKind::Direct)
            .unwrap();

        assert!(admit(&mut peers, TransportKind::Direct, &sender, &chat(Some(1))));
        assert!(admit(&mut peers, TransportKind::Direct, &sender, &chat(Some(2))));
        assert!(!admit(&mut peers, TransportKind::Direct, &sender, &chat(Some(2))));
        assert!(!admit(&mut peers, TransportKind::Direct, &sender, &chat(Some(1))));
    }

    #[test]
    fn test_admit_exempts_unsequenced_control() {
        let mut peers = PeerTable::new();
        let sender = EndpointId::from("peer-a");
        peers
            .register(sender.clone(), "alice", TransportKind::Direct)
            .unwrap();
        peers.accept_seq(&sender, Some(9));

        assert!(admit(&mut peers, TransportKind::Direct, &sender, &chat(None)));
        assert!(admit(&mut peers, TransportKind::Direct, &sender, &chat(None)));
    }

    #[test]
    fn test_admit_tracks_unknown_relay_sender() {
        let mut peers = PeerTable::new();
        let sender = EndpointId::from("peer-new");
        assert!(admit(&mut peers, TransportKind::Relay, &sender, &chat(Some(1))));
        assert!(peers.contains(&sender));
        assert!(!peers.is_registered(&sender), "tunneled traffic alone does not register");
        // The high-water established by the first frame holds.
        assert!(!admit(&mut peers, TransportKind::Relay, &sender, &chat(Some(1))));
    }
}
