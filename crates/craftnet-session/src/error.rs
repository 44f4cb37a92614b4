//! Error type for session-level operations.

use thiserror::Error;

/// Things that can go wrong inside the session layer itself.
///
/// Transport and codec failures have their own types; this covers the
/// bookkeeping and collaborator calls the session owns.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A peer id was used that is not registered in the peer table.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The numeric-id space (u16) is exhausted.
    #[error("no free numeric ids")]
    NumericIdsExhausted,

    /// A lobby or auth HTTP call failed outright.
    #[error("http call failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The identity service rejected a peer's claimed identity.
    #[error("identity verification failed for {name}")]
    IdentityRejected { name: String },
}
