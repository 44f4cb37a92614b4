//! Session state for craftnet: who we are, who we're connected to, and
//! the collaborators (lobby directory, identity service) a session
//! talks to over HTTP.
//!
//! Everything here is owned by the session actor in the `craftnet`
//! crate; nothing in this crate spawns tasks or touches sockets beyond
//! the `reqwest` collaborators.

mod auth;
mod clock;
mod config;
mod error;
mod lobby;
mod peer;
mod session;

pub use auth::{AuthClient, ClaimedIdentity, VerifyOutcome};
pub use clock::ClockSync;
pub use config::{EnforcementPolicy, PROTOCOL_VERSION, SessionConfig};
pub use error::SessionError;
pub use lobby::{LobbyClient, LobbyEntry};
pub use peer::{PeerConnection, PeerTable};
pub use session::{SessionInfo, SessionRole, SessionStatus};
