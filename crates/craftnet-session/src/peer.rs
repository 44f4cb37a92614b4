//! Peer bookkeeping: who is in the session, over which channel, and
//! where their inbound sequence high-water sits.

use std::collections::HashMap;

use craftnet_protocol::{EndpointId, NumericId};
use craftnet_transport::TransportKind;

use crate::SessionError;

/// One remote participant as the local session sees it.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// The peer's ephemeral endpoint id.
    pub id: EndpointId,
    /// Compact id used by the binary fast path. `None` until the peer
    /// completes its join (tentative relay peers have no nid yet).
    pub nid: Option<NumericId>,
    /// Display name, once known.
    pub name: Option<String>,
    /// Which channel this peer's traffic rides on.
    pub kind: TransportKind,
    /// Highest sequence number seen from this peer.
    pub last_inbound_seq: u64,
    /// Last latency the peer reported (or we measured), milliseconds.
    pub latency_ms: u8,
}

/// The session's table of remote peers.
///
/// Numeric ids are allocated lowest-free starting from 1 (0 names the
/// host) and returned to the pool when a peer leaves, so the id-to-peer
/// mapping stays bijective for the binary fast path.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<EndpointId, PeerConnection>,
    nids: HashMap<NumericId, EndpointId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer and allocates its numeric id.
    ///
    /// Upgrades a tentative entry in place (keeping its sequence
    /// high-water) and is a no-op for a peer that already holds a nid.
    pub fn register(
        &mut self,
        id: EndpointId,
        name: impl Into<String>,
        kind: TransportKind,
    ) -> Result<NumericId, SessionError> {
        if let Some(existing) = self.peers.get(&id) {
            if let Some(nid) = existing.nid {
                return Ok(nid);
            }
        }
        let nid = self.lowest_free_nid()?;
        self.nids.insert(nid, id.clone());
        let entry = self.peers.entry(id.clone()).or_insert(PeerConnection {
            id,
            nid: None,
            name: None,
            kind,
            last_inbound_seq: 0,
            latency_ms: 0,
        });
        entry.nid = Some(nid);
        entry.name = Some(name.into());
        entry.kind = kind;
        Ok(nid)
    }

    /// Tracks a peer whose traffic arrived before any explicit
    /// registration (tunneled frames, or a freshly accepted socket
    /// still under its provisional label). It gets no numeric id until
    /// it properly joins, but its sequence high-water starts counting
    /// immediately.
    pub fn track_provisional(&mut self, id: EndpointId, kind: TransportKind) {
        self.peers.entry(id.clone()).or_insert(PeerConnection {
            id,
            nid: None,
            name: None,
            kind,
            last_inbound_seq: 0,
            latency_ms: 0,
        });
    }

    /// Applies the duplicate-suppression check for one inbound message.
    ///
    /// `None` (unsequenced control traffic) always passes. A sequenced
    /// message passes only if it is above the sender's high-water mark,
    /// which it then raises. Unknown senders pass; admission control is
    /// a separate concern.
    pub fn accept_seq(&mut self, id: &EndpointId, seq: Option<u64>) -> bool {
        let Some(seq) = seq else { return true };
        let Some(peer) = self.peers.get_mut(id) else {
            return true;
        };
        if seq <= peer.last_inbound_seq {
            return false;
        }
        peer.last_inbound_seq = seq;
        true
    }

    /// Removes a peer, returning its entry and freeing its numeric id.
    pub fn remove(&mut self, id: &EndpointId) -> Option<PeerConnection> {
        let peer = self.peers.remove(id)?;
        if let Some(nid) = peer.nid {
            self.nids.remove(&nid);
        }
        Some(peer)
    }

    pub fn get(&self, id: &EndpointId) -> Option<&PeerConnection> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &EndpointId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(id)
    }

    /// Resolves a numeric id back to its peer.
    pub fn by_nid(&self, nid: NumericId) -> Option<&PeerConnection> {
        self.nids.get(&nid).and_then(|id| self.peers.get(id))
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.peers.contains_key(id)
    }

    /// Whether this peer has completed its join (holds a numeric id).
    pub fn is_registered(&self, id: &EndpointId) -> bool {
        self.peers.get(id).is_some_and(|p| p.nid.is_some())
    }

    pub fn ids(&self) -> impl Iterator<Item = &EndpointId> {
        self.peers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drops every peer and frees all numeric ids.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.nids.clear();
    }

    fn lowest_free_nid(&self) -> Result<NumericId, SessionError> {
        // 0 is the host's own id, never allocated to a peer.
        (1..=u16::MAX)
            .map(NumericId)
            .find(|nid| !self.nids.contains_key(nid))
            .ok_or(SessionError::NumericIdsExhausted)
    }
}
