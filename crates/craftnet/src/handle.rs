//! The public session handle and its builder.
//!
//! A [`Session`] is a cheap handle over the session actor: operations
//! become commands on an mpsc channel, replies come back on oneshots,
//! and status is observed through a `watch` channel so the game's
//! render loop can poll it without locking anything.

use std::net::SocketAddr;

use craftnet_protocol::MessageBody;
use craftnet_session::{SessionConfig, SessionStatus};
use craftnet_sync::{MemoryWorld, WorldBridge};
use tokio::sync::{mpsc, oneshot, watch};

use crate::CraftnetError;
use crate::actor::Actor;

/// Commands from the handle to the actor.
pub(crate) enum Command {
    Host {
        name: String,
        public: bool,
        password: Option<String>,
        reply: oneshot::Sender<Result<SocketAddr, CraftnetError>>,
    },
    Join {
        remote: String,
        name: String,
        password: Option<String>,
        reply: oneshot::Sender<Result<(), CraftnetError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    LocalId {
        reply: oneshot::Sender<String>,
    },
    Intent(MessageBody),
}

/// Configures and spawns a [`Session`].
pub struct SessionBuilder {
    relay_url: Option<String>,
    lobby_url: Option<String>,
    auth_url: Option<String>,
    config: SessionConfig,
    world: Option<Box<dyn WorldBridge>>,
}

impl SessionBuilder {
    pub(crate) fn new() -> Self {
        Self {
            relay_url: None,
            lobby_url: None,
            auth_url: None,
            config: SessionConfig::default(),
            world: None,
        }
    }

    /// Relay service URL. Without one, only direct and dedicated
    /// channels are available.
    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    /// Lobby directory URL for advertising public games.
    pub fn lobby_url(mut self, url: impl Into<String>) -> Self {
        self.lobby_url = Some(url.into());
        self
    }

    /// Identity service URL. Without one, everyone plays offline.
    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// The world this session mirrors into and out of. Defaults to an
    /// in-memory world, which is only useful for tests.
    pub fn world(mut self, world: impl WorldBridge) -> Self {
        self.world = Some(Box::new(world));
        self
    }

    /// Spawns the session actor and returns its handle.
    pub fn build(self) -> Session {
        let world = self.world.unwrap_or_else(|| Box::new(MemoryWorld::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Disconnected);
        let (warn_tx, warn_rx) = mpsc::unbounded_channel();

        let actor = Actor::new(
            world,
            self.config,
            self.relay_url,
            self.lobby_url,
            self.auth_url,
            status_tx,
            warn_tx,
        );
        tokio::spawn(actor.run(cmd_rx));

        Session {
            cmd_tx,
            status_rx,
            warnings: Some(warn_rx),
        }
    }
}

/// Handle to one running session.
///
/// Dropping the handle shuts the session down: the actor exits when
/// its command channel closes.
pub struct Session {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
    warnings: Option<mpsc::UnboundedReceiver<String>>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Starts hosting. Returns the bound direct-channel address once
    /// the session is accepting peers.
    pub async fn host_game(
        &self,
        name: impl Into<String>,
        public: bool,
        password: Option<String>,
    ) -> Result<SocketAddr, CraftnetError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Host {
                name: name.into(),
                public,
                password,
                reply,
            })
            .await
            .map_err(|_| CraftnetError::Closed)?;
        rx.await.map_err(|_| CraftnetError::Closed)?
    }

    /// Joins a remote game. `remote` is either a peer id (relay/direct
    /// negotiation) or a `host:port` / `ws://` address (dedicated
    /// server). Resolves only once the host's welcome arrives.
    pub async fn join_game(
        &self,
        remote: impl Into<String>,
        name: impl Into<String>,
        password: Option<String>,
    ) -> Result<(), CraftnetError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Join {
                remote: remote.into(),
                name: name.into(),
                password,
                reply,
            })
            .await
            .map_err(|_| CraftnetError::Closed)?;
        rx.await.map_err(|_| CraftnetError::Closed)?
    }

    /// Tears the session down and returns once cleanup has finished.
    pub async fn disconnect(&self) -> Result<(), CraftnetError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Disconnect { reply })
            .await
            .map_err(|_| CraftnetError::Closed)?;
        rx.await.map_err(|_| CraftnetError::Closed)
    }

    /// Our ephemeral endpoint id: the code another player passes to
    /// [`join_game`](Self::join_game) to reach this session through
    /// the relay.
    pub async fn local_id(&self) -> Result<String, CraftnetError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::LocalId { reply })
            .await
            .map_err(|_| CraftnetError::Closed)?;
        rx.await.map_err(|_| CraftnetError::Closed)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    /// A watcher for status transitions.
    pub fn status_changes(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Takes the advisory-warning stream. Yields at most once.
    pub fn take_warnings(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.warnings.take()
    }

    async fn intent(&self, body: MessageBody) -> Result<(), CraftnetError> {
        self.cmd_tx
            .send(Command::Intent(body))
            .await
            .map_err(|_| CraftnetError::Closed)
    }

    /// Reports our position. Coalesced: only the latest report per
    /// position-sync interval goes on the wire.
    pub async fn send_move(
        &self,
        position: [f32; 3],
        yaw: f32,
        pitch: f32,
        health: u8,
    ) -> Result<(), CraftnetError> {
        self.intent(MessageBody::Move {
            position,
            yaw,
            pitch,
            health,
        })
        .await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), CraftnetError> {
        self.intent(MessageBody::Chat { text: text.into() }).await
    }

    pub async fn place_block(
        &self,
        x: i32,
        y: i32,
        z: i32,
        block: u8,
    ) -> Result<(), CraftnetError> {
        self.intent(MessageBody::BlockPlace { x, y, z, block }).await
    }

    pub async fn break_block(&self, x: i32, y: i32, z: i32) -> Result<(), CraftnetError> {
        self.intent(MessageBody::BlockBreak { x, y, z }).await
    }

    pub async fn send_action(&self, action: impl Into<String>) -> Result<(), CraftnetError> {
        self.intent(MessageBody::Action {
            action: action.into(),
        })
        .await
    }

    pub async fn send_world_event(
        &self,
        event: impl Into<String>,
        position: Option<[f32; 3]>,
        data: serde_json::Value,
    ) -> Result<(), CraftnetError> {
        self.intent(MessageBody::WorldEvent {
            event: event.into(),
            position,
            data,
        })
        .await
    }
}
