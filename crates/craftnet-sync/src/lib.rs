//! Message routing and world bridging for craftnet.
//!
//! This crate is the session's brain and deliberately does no I/O: a
//! [`Router`] turns one inbound [`WireMessage`](craftnet_protocol::WireMessage)
//! into a list of [`Outbound`] replies plus [`SyncEvent`]s for the
//! session actor, and a [`WorldBridge`] is how routed traffic reaches
//! the embedding game's world state. Keeping it pure makes every
//! routing rule testable without sockets.

mod client;
mod host;
mod roster;
mod router;
mod world;

pub use client::ClientRouter;
pub use host::{
    ERR_BAD_FIRST_MESSAGE, ERR_BAD_PASSWORD, ERR_IDENTITY_REJECTED, ERR_VERSION_MISMATCH,
    HostRouter,
};
pub use roster::{PlayerInfo, Roster};
pub use router::{Outbound, Router, RouterCtx, SyncEvent, admit};
pub use world::{MemoryWorld, WorldBridge};
