//! Error types for the transport layer.

/// Errors that can occur while opening or tearing down channels.
///
/// Note that *sending* never produces one of these — sends are
/// best-effort by contract. Errors here are confined to channel
/// establishment, where the caller has a live decision to make
/// (fall back to the relay, surface a rejected join).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Dialing the remote failed outright.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The channel did not open within its bounded timeout.
    #[error("channel open timed out after {0:?}")]
    OpenTimedOut(std::time::Duration),

    /// Binding or accepting on the direct listener failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The relay rejected or dropped the control socket.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),
}
