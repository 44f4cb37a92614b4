//! Direct and dedicated WebSocket channels via `tokio-tungstenite`.
//!
//! Both channel kinds are plain WebSockets and share one wire type;
//! the difference is only who is on the other end (an ephemeral peer
//! vs. an always-on server) and the [`TransportKind`] they report.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use craftnet_protocol::EndpointId;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::{FramePayload, InboundFrame, InboundSender, TransportError, TransportKind, Wire};

/// Counter for provisional labels on accepted connections whose peer
/// identity is not yet known (it arrives in their `join` message).
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A single peer-to-peer or peer-to-server WebSocket behind the
/// [`Wire`] contract.
///
/// Outbound frames are queued to a writer task; inbound frames are
/// pumped into the session's frame channel by a reader task, labeled
/// with the current peer id. Accepted connections start under a
/// provisional `conn-N` label and are [`rebind`](Self::rebind)-ed once
/// the peer identifies itself.
pub struct SocketWire {
    label: Arc<RwLock<EndpointId>>,
    kind: TransportKind,
    tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl SocketWire {
    /// Wraps an established WebSocket stream, spawning its reader and
    /// writer tasks.
    pub fn spawn<S>(
        stream: WebSocketStream<S>,
        label: EndpointId,
        kind: TransportKind,
        inbound: InboundSender,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let open = Arc::new(AtomicBool::new(true));
        let label = Arc::new(RwLock::new(label));

        // Writer: drain the queue until the wire closes.
        let writer_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            writer_open.store(false, Ordering::Release);
        });

        // Reader: pump frames into the session, then announce the close.
        let reader_open = Arc::clone(&open);
        let reader_label = Arc::clone(&label);
        tokio::spawn(async move {
            loop {
                let payload = match source.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        FramePayload::Bytes(data.into())
                    }
                    Some(Ok(Message::Text(text))) => {
                        FramePayload::Text(text.to_string())
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Skip ping/pong/raw frames.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket read error");
                        break;
                    }
                };
                let from = reader_label.read().expect("label lock").clone();
                if inbound
                    .send(InboundFrame {
                        from,
                        kind,
                        payload,
                    })
                    .await
                    .is_err()
                {
                    // Session actor is gone; nothing left to deliver to.
                    break;
                }
            }
            reader_open.store(false, Ordering::Release);
            let from = reader_label.read().expect("label lock").clone();
            let _ = inbound
                .send(InboundFrame {
                    from,
                    kind,
                    payload: FramePayload::Closed,
                })
                .await;
        });

        Self {
            label,
            kind,
            tx,
            open,
        }
    }

    /// The peer id (or provisional label) this wire currently reports.
    pub fn peer(&self) -> EndpointId {
        self.label.read().expect("label lock").clone()
    }

    /// Re-keys the wire once the remote's real endpoint id is known.
    /// Subsequent inbound frames carry the new id.
    pub fn rebind(&self, id: EndpointId) {
        *self.label.write().expect("label lock") = id;
    }
}

impl Wire for SocketWire {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&self, data: Vec<u8>) {
        if !self.is_open() {
            tracing::trace!(peer = %self.peer(), "dropping frame for closed wire");
            return;
        }
        let _ = self.tx.send(Message::Binary(data.into()));
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Message::Close(None));
        }
    }
}

async fn dial(
    url: &str,
    timeout: Duration,
) -> Result<
    WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    TransportError,
> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
    {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::ConnectFailed(std::io::Error::other(e))),
        Err(_) => Err(TransportError::OpenTimedOut(timeout)),
    }
}

/// Dials a direct peer channel, bounded by `timeout`.
pub async fn dial_direct(
    peer: EndpointId,
    url: &str,
    timeout: Duration,
    inbound: InboundSender,
) -> Result<SocketWire, TransportError> {
    let stream = dial(url, timeout).await?;
    tracing::debug!(%peer, url, "direct channel open");
    Ok(SocketWire::spawn(stream, peer, TransportKind::Direct, inbound))
}

/// Dials a dedicated server socket, bounded by `timeout`.
pub async fn dial_dedicated(
    server: EndpointId,
    url: &str,
    timeout: Duration,
    inbound: InboundSender,
) -> Result<SocketWire, TransportError> {
    let stream = dial(url, timeout).await?;
    tracing::debug!(%server, url, "dedicated channel open");
    Ok(SocketWire::spawn(
        stream,
        server,
        TransportKind::Dedicated,
        inbound,
    ))
}

/// Accepts inbound direct dials on the host side.
pub struct DirectListener {
    listener: TcpListener,
}

impl DirectListener {
    /// Binds the direct-channel listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "direct listener bound");
        Ok(Self { listener })
    }

    /// The actual bound address (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for and accepts the next inbound connection.
    ///
    /// The returned wire carries a provisional `conn-N` label until the
    /// peer's `join` identifies it.
    pub async fn accept(
        &mut self,
        inbound: InboundSender,
    ) -> Result<SocketWire, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::other(e))
        })?;

        let label = EndpointId(format!(
            "conn-{}",
            NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
        ));
        tracing::debug!(%label, %addr, "accepted direct connection");
        Ok(SocketWire::spawn(ws, label, TransportKind::Direct, inbound))
    }
}
