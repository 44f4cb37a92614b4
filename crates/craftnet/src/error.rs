//! Top-level error type.

use thiserror::Error;

/// Any failure surfaced by a [`Session`](crate::Session) operation.
///
/// The transparent variants delegate `Display` to the layer that
/// actually failed, so messages read the same whether the failure came
/// from the codec, a channel, or session bookkeeping.
#[derive(Debug, Error)]
pub enum CraftnetError {
    #[error(transparent)]
    Transport(#[from] craftnet_transport::TransportError),

    #[error(transparent)]
    Protocol(#[from] craftnet_protocol::ProtocolError),

    #[error(transparent)]
    Session(#[from] craftnet_session::SessionError),

    /// The host refused us (bad password, version, malformed join).
    #[error("join rejected ({code}): {message}")]
    JoinRejected { code: u16, message: String },

    /// A bounded wait elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The operation needs a live session and there is none.
    #[error("not connected")]
    NotConnected,

    /// The session actor has shut down.
    #[error("session closed")]
    Closed,
}
