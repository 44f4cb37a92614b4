//! Relay tunneling: one shared WebSocket to the relay service that
//! multiplexes traffic for every peer in a room.
//!
//! The relay speaks a small JSON framing of its own. Peer payloads ride
//! inside `tunnel`/`tunneled` frames as codec bytes; room-wide
//! signaling (`signal`) carries bare JSON and is delivered to the
//! session as text frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use craftnet_protocol::EndpointId;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::{FramePayload, InboundFrame, InboundSender, TransportError, TransportKind, Wire};

/// The relay service's own framing, distinct from the game protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RelayFrame {
    /// Registers this socket under `id` in `room`.
    Hello { room: String, id: EndpointId },
    /// Asks the relay to deliver `payload` to `to`.
    Tunnel { to: EndpointId, payload: Vec<u8> },
    /// A payload redelivered from `from`.
    Tunneled { from: EndpointId, payload: Vec<u8> },
    /// Room-wide signaling, fanned out to every member.
    Signal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<EndpointId>,
        payload: serde_json::Value,
    },
}

struct RelayInner {
    tx: mpsc::UnboundedSender<Message>,
    open: AtomicBool,
}

/// The shared relay socket for one room.
///
/// Cheap to clone; all clones and every [`RelayPeerWire`] cut from it
/// share the same underlying connection.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<RelayInner>,
}

impl RelayConnection {
    /// Connects to the relay, registers in `room` as `local_id`, and
    /// starts pumping tunneled traffic into the session's channel.
    pub async fn connect(
        url: &str,
        room: &str,
        local_id: EndpointId,
        inbound: InboundSender,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = match tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async(url),
        )
        .await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::RelayUnavailable(e.to_string()));
            }
            Err(_) => return Err(TransportError::OpenTimedOut(timeout)),
        };
        let (mut sink, mut source) = stream.split();

        let hello = RelayFrame::Hello {
            room: room.to_string(),
            id: local_id.clone(),
        };
        let hello_text = serde_json::to_string(&hello)
            .map_err(|e| TransportError::RelayUnavailable(e.to_string()))?;
        sink.send(Message::Text(hello_text.into()))
            .await
            .map_err(|e| TransportError::RelayUnavailable(e.to_string()))?;
        tracing::debug!(url, room, id = %local_id, "registered with relay");

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let inner = Arc::new(RelayInner {
            tx,
            open: AtomicBool::new(true),
        });

        let writer_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            writer_inner.open.store(false, Ordering::Release);
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                let text = match source.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "relay read error");
                        break;
                    }
                };
                let frame: RelayFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "unreadable relay frame");
                        continue;
                    }
                };
                let (from, payload) = match frame {
                    RelayFrame::Tunneled { from, payload } => {
                        (from, FramePayload::Bytes(payload))
                    }
                    RelayFrame::Signal { from, payload } => (
                        from.unwrap_or_else(|| EndpointId::from("relay")),
                        FramePayload::Text(payload.to_string()),
                    ),
                    // Client-to-relay frames never come back our way.
                    RelayFrame::Hello { .. } | RelayFrame::Tunnel { .. } => continue,
                };
                if inbound
                    .send(InboundFrame {
                        from,
                        kind: TransportKind::Relay,
                        payload,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            reader_inner.open.store(false, Ordering::Release);
            let _ = inbound
                .send(InboundFrame {
                    from: EndpointId::from("relay"),
                    kind: TransportKind::Relay,
                    payload: FramePayload::Closed,
                })
                .await;
        });

        Ok(Self { inner })
    }

    /// Tunnels codec bytes to one room member.
    pub fn send_to(&self, peer: &EndpointId, data: Vec<u8>) {
        if !self.is_open() {
            tracing::trace!(%peer, "dropping frame for closed relay");
            return;
        }
        let frame = RelayFrame::Tunnel {
            to: peer.clone(),
            payload: data,
        };
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = self.inner.tx.send(Message::Text(text.into()));
        }
    }

    /// Fans a signaling payload out to every room member.
    pub fn broadcast_signal(&self, payload: serde_json::Value) {
        if !self.is_open() {
            return;
        }
        let frame = RelayFrame::Signal {
            from: None,
            payload,
        };
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = self.inner.tx.send(Message::Text(text.into()));
        }
    }

    /// Whether the relay socket is still believed open.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Closes the shared socket for everyone. Idempotent.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            let _ = self.inner.tx.send(Message::Close(None));
        }
    }

    /// Cuts a per-peer [`Wire`] view over this shared socket.
    pub fn wire_for(&self, peer: EndpointId) -> RelayPeerWire {
        RelayPeerWire {
            relay: self.clone(),
            peer,
        }
    }
}

/// A per-peer view over the shared relay socket.
///
/// [`Wire::close`] on this view is a no-op: the socket is shared, so
/// dropping one peer must not sever the room. The session closes the
/// relay itself via [`RelayConnection::close`] during teardown.
pub struct RelayPeerWire {
    relay: RelayConnection,
    peer: EndpointId,
}

impl Wire for RelayPeerWire {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn send(&self, data: Vec<u8>) {
        self.relay.send_to(&self.peer, data);
    }

    fn is_open(&self) -> bool {
        self.relay.is_open()
    }

    fn close(&self) {
        // Shared socket; per-peer close detaches nothing.
    }
}
