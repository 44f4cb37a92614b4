//! Multiplayer session layer for voxel games.
//!
//! `craftnet` ties the protocol, transport, routing, and migration
//! crates together behind one handle. An embedding game builds a
//! [`Session`], points it at a [`WorldBridge`] implementation over its
//! own world state, and then either hosts or joins:
//!
//! ```no_run
//! use craftnet::Session;
//!
//! # async fn demo() -> Result<(), craftnet::CraftnetError> {
//! let session = Session::builder()
//!     .relay_url("wss://relay.example.org")
//!     .build();
//! let addr = session.host_game("alice", false, None).await?;
//! println!("hosting on {addr}");
//! # Ok(())
//! # }
//! ```
//!
//! Everything stateful lives in a single spawned actor task; the
//! handle only queues commands and never blocks on network I/O.

mod actor;
mod error;
mod handle;

pub use error::CraftnetError;
pub use handle::{Session, SessionBuilder};

pub use craftnet_protocol::{EndpointId, MessageBody, NumericId, PlayerSnapshot, WireMessage};
pub use craftnet_session::{EnforcementPolicy, SessionConfig, SessionStatus};
pub use craftnet_sync::{MemoryWorld, WorldBridge};
