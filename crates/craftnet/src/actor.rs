//! The session actor: one task owning all session state.
//!
//! Commands from the [`Session`](crate::Session) handle, inbound
//! frames from every wire, interval timers, and internal notes from
//! spawned helpers all land in one `select!` loop, so no state here
//! ever needs a lock. The actor exits when the handle is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use craftnet_migration::{MigrationConfig, MigrationPlan, plan_migration};
use craftnet_protocol::{
    EndpointId, MessageBody, NumericId, Recipient, WireMessage, decode, decode_text, encode,
};
use craftnet_session::{
    AuthClient, ClaimedIdentity, ClockSync, EnforcementPolicy, LobbyClient, PeerTable,
    SessionConfig, SessionInfo, SessionRole, SessionStatus, VerifyOutcome,
};
use craftnet_sync::{
    ClientRouter, ERR_IDENTITY_REJECTED, HostRouter, Outbound, PlayerInfo, Router, RouterCtx,
    Roster, SyncEvent, WorldBridge, admit,
};
use craftnet_transport::{
    DirectListener, FramePayload, InboundFrame, PeerAddr, RelayConnection, RelayPeerWire,
    SocketWire, TransportError, TransportKind, Wire, dial_dedicated, dial_direct,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, Interval};

use crate::CraftnetError;
use crate::handle::Command;

/// Sender id the relay connection reports for its own frames.
const RELAY_PSEUDO_PEER: &str = "relay";

/// One peer's wire, either an owned socket or a view over the shared
/// relay connection.
enum PeerWire {
    Socket(SocketWire),
    Relay(RelayPeerWire),
}

impl PeerWire {
    fn as_wire(&self) -> &dyn Wire {
        match self {
            Self::Socket(w) => w,
            Self::Relay(w) => w,
        }
    }

    fn send(&self, data: Vec<u8>) {
        self.as_wire().send(data);
    }

    fn close(&self) {
        self.as_wire().close();
    }
}

/// Where a pending join currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinStage {
    /// Dedicated path: handshake sent, waiting for the ack.
    AwaitHandshake,
    /// Peer path: waiting for a direct dial-back offer, with a relay
    /// fallback deadline running.
    AwaitDirect,
    /// Join sent, waiting for the host's welcome.
    AwaitWelcome,
}

struct PendingJoin {
    reply: Option<oneshot::Sender<Result<(), CraftnetError>>>,
    stage: JoinStage,
    host: EndpointId,
    password: Option<String>,
    /// When the direct attempt gives way to relay-only.
    direct_deadline: Option<Instant>,
    /// When the whole join fails.
    deadline: Instant,
}

impl PendingJoin {
    fn resolve(&mut self, result: Result<(), CraftnetError>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Migration state after an unexpected host loss.
enum Migration {
    /// We won the election; promoting once the backoff elapses.
    Promoting { at: Instant },
    /// Someone else won; waiting for their announcement.
    Awaiting { until: Instant },
}

/// Notes from spawned helper tasks back into the loop.
enum Internal {
    VerifyResult {
        id: EndpointId,
        name: String,
        outcome: VerifyOutcome,
    },
    DirectDialed {
        host: EndpointId,
        result: Result<SocketWire, TransportError>,
    },
    /// Re-join a newly elected host announced by a migrate signal.
    Rejoin { remote: String },
}

enum Step {
    Cmd(Option<Command>),
    Frame(Option<InboundFrame>),
    Note(Option<Internal>),
    Accepted(Result<SocketWire, TransportError>),
    PositionTick,
    WorldTick,
    PingTick,
    LobbyTick,
    DeadlineFired,
}

pub(crate) struct Actor {
    world: Box<dyn WorldBridge>,
    roster: Roster,
    peers: PeerTable,
    clock: ClockSync,
    info: SessionInfo,
    config: SessionConfig,
    role: SessionRole,

    status_tx: watch::Sender<SessionStatus>,
    warn_tx: mpsc::UnboundedSender<String>,

    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: mpsc::Receiver<InboundFrame>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    wires: HashMap<EndpointId, PeerWire>,
    relay: Option<RelayConnection>,
    listener: Option<DirectListener>,
    listener_addr: Option<SocketAddr>,

    relay_url: Option<String>,
    lobby: Option<LobbyClient>,
    auth: Option<AuthClient>,
    identity: Option<ClaimedIdentity>,
    public: bool,

    host_router: HostRouter,
    client_router: ClientRouter,

    /// Client view of who hosts the session.
    host_id: Option<EndpointId>,
    /// Endpoint ids from the host's last `peer_list`, for elections.
    known_peers: Vec<EndpointId>,
    pending_join: Option<PendingJoin>,
    migration: Option<Migration>,
    /// Latest unsent move intent, flushed at the position interval.
    pending_move: Option<MessageBody>,

    position_timer: Option<Interval>,
    world_timer: Option<Interval>,
    ping_timer: Option<Interval>,
    lobby_timer: Option<Interval>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ticks an optional interval, pending forever when absent.
async fn maybe_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Accepts on an optional listener, pending forever when absent.
async fn maybe_accept(
    listener: &mut Option<DirectListener>,
    inbound: mpsc::Sender<InboundFrame>,
) -> Result<SocketWire, TransportError> {
    match listener {
        Some(listener) => listener.accept(inbound).await,
        None => std::future::pending().await,
    }
}

fn interval_after(period: Duration) -> Interval {
    tokio::time::interval_at(Instant::now() + period, period)
}

/// Fans a signaling message out to the relay room, shaped like any
/// other wire message so the receiving side's router can decode it.
fn broadcast_signal(
    relay: &RelayConnection,
    event: &str,
    host: Option<EndpointId>,
    addr: Option<String>,
) {
    let msg = WireMessage::unsequenced(
        now_ms(),
        MessageBody::RelaySignal {
            event: event.into(),
            host,
            addr,
        },
    );
    match serde_json::to_value(&msg) {
        Ok(payload) => relay.broadcast_signal(payload),
        Err(e) => tracing::error!(error = %e, "signal encode failed"),
    }
}

impl Actor {
    pub(crate) fn new(
        world: Box<dyn WorldBridge>,
        config: SessionConfig,
        relay_url: Option<String>,
        lobby_url: Option<String>,
        auth_url: Option<String>,
        status_tx: watch::Sender<SessionStatus>,
        warn_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            world,
            roster: Roster::new(),
            peers: PeerTable::new(),
            clock: ClockSync::new(),
            info: SessionInfo::new(""),
            config,
            role: SessionRole::None,
            status_tx,
            warn_tx,
            inbound_tx,
            inbound_rx,
            internal_tx,
            internal_rx,
            wires: HashMap::new(),
            relay: None,
            listener: None,
            listener_addr: None,
            relay_url,
            lobby: lobby_url.map(LobbyClient::new),
            auth: auth_url.map(AuthClient::new),
            identity: None,
            public: false,
            host_router: HostRouter::new(),
            client_router: ClientRouter::new(),
            host_id: None,
            known_peers: Vec::new(),
            pending_join: None,
            migration: None,
            pending_move: None,
            position_timer: None,
            world_timer: None,
            ping_timer: None,
            lobby_timer: None,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                cmd = cmd_rx.recv() => Step::Cmd(cmd),
                frame = self.inbound_rx.recv() => Step::Frame(frame),
                note = self.internal_rx.recv() => Step::Note(note),
                wire = maybe_accept(&mut self.listener, self.inbound_tx.clone()) => {
                    Step::Accepted(wire)
                }
                _ = maybe_tick(&mut self.position_timer) => Step::PositionTick,
                _ = maybe_tick(&mut self.world_timer) => Step::WorldTick,
                _ = maybe_tick(&mut self.ping_timer) => Step::PingTick,
                _ = maybe_tick(&mut self.lobby_timer) => Step::LobbyTick,
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
                ), if deadline.is_some() => Step::DeadlineFired,
            };

            match step {
                Step::Cmd(None) => {
                    self.teardown();
                    break;
                }
                Step::Cmd(Some(cmd)) => self.on_command(cmd).await,
                Step::Frame(Some(frame)) => self.on_frame(frame),
                Step::Frame(None) => {}
                Step::Note(Some(note)) => self.on_note(note).await,
                Step::Note(None) => {}
                Step::Accepted(Ok(wire)) => {
                    let label = wire.peer();
                    tracing::debug!(%label, "inbound direct connection");
                    self.wires.insert(label, PeerWire::Socket(wire));
                }
                Step::Accepted(Err(e)) => {
                    tracing::warn!(error = %e, "accept failed");
                }
                Step::PositionTick => self.flush_position(),
                Step::WorldTick => self.broadcast_world_sync(),
                Step::PingTick => self.send_ping(),
                Step::LobbyTick => self.report_to_lobby(),
                Step::DeadlineFired => self.on_deadline().await,
            }
        }
        tracing::debug!("session actor stopped");
    }

    fn set_status(&self, status: SessionStatus) {
        let _ = self.status_tx.send(status);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut consider = |d: Instant| {
            next = Some(match next {
                Some(n) if n <= d => n,
                _ => d,
            });
        };
        if let Some(pj) = &self.pending_join {
            consider(pj.deadline);
            if let Some(d) = pj.direct_deadline {
                consider(d);
            }
        }
        match &self.migration {
            Some(Migration::Promoting { at }) => consider(*at),
            Some(Migration::Awaiting { until }) => consider(*until),
            None => {}
        }
        next
    }

    // -- command handling --

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Host {
                name,
                public,
                password,
                reply,
            } => {
                let result = self.start_host(name, public, password).await;
                if result.is_err() {
                    self.teardown();
                    self.set_status(SessionStatus::Error("hosting failed".into()));
                }
                let _ = reply.send(result);
            }
            Command::Join {
                remote,
                name,
                password,
                reply,
            } => {
                self.start_join(remote, name, password, Some(reply)).await;
            }
            Command::Disconnect { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
            Command::LocalId { reply } => {
                let _ = reply.send(self.info.id.to_string());
            }
            Command::Intent(body) => self.on_intent(body),
        }
    }

    async fn start_host(
        &mut self,
        name: String,
        public: bool,
        password: Option<String>,
    ) -> Result<SocketAddr, CraftnetError> {
        if self.role != SessionRole::None {
            self.teardown();
        }
        self.set_status(SessionStatus::Connecting);

        self.info = SessionInfo::new(&name);
        self.config.password = password;
        self.public = public;
        if let Some(auth) = &self.auth {
            self.identity = Some(auth.claim(&name).await);
        }

        let listener = DirectListener::bind(&self.config.direct_bind_addr).await?;
        let addr = listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)?;
        self.listener = Some(listener);
        self.listener_addr = Some(addr);

        // The relay room is keyed by the host's endpoint id; peers
        // join it to reach us when no direct channel opens.
        if let Some(url) = self.relay_url.clone() {
            match RelayConnection::connect(
                &url,
                self.info.id.as_str(),
                self.info.id.clone(),
                self.inbound_tx.clone(),
                self.config.relay_register_wait,
            )
            .await
            {
                Ok(relay) => self.relay = Some(relay),
                Err(e) => {
                    tracing::warn!(error = %e, "hosting without relay fallback");
                    let _ = self
                        .warn_tx
                        .send("relay unavailable, direct connections only".into());
                }
            }
        }

        self.role = SessionRole::Host;
        let me = PlayerInfo::new(self.info.id.clone(), NumericId(0), name.clone());
        self.world.add_player(&me.snapshot());
        self.roster.upsert(me);

        if public {
            if let Some(lobby) = self.lobby.clone() {
                let id = self.info.id.clone();
                let has_password = self.config.password.is_some();
                tokio::spawn(async move {
                    lobby.register(&id, &name, has_password).await;
                });
                self.lobby_timer = Some(interval_after(self.config.lobby_heartbeat));
            }
        }

        self.position_timer = Some(interval_after(self.config.position_interval));
        self.world_timer = Some(interval_after(self.config.world_sync_interval));
        self.ping_timer = Some(interval_after(self.config.ping_interval));
        self.set_status(SessionStatus::Connected);
        tracing::info!(id = %self.info.id, %addr, "hosting session");
        Ok(addr)
    }

    async fn start_join(
        &mut self,
        remote: String,
        name: String,
        password: Option<String>,
        reply: Option<oneshot::Sender<Result<(), CraftnetError>>>,
    ) {
        if self.role == SessionRole::Host {
            self.teardown();
        }
        self.set_status(SessionStatus::Connecting);
        if self.info.name != name || self.role == SessionRole::None {
            self.info = SessionInfo::new(&name);
        }
        self.role = SessionRole::Client;
        if self.identity.is_none() {
            if let Some(auth) = &self.auth {
                self.identity = Some(auth.claim(&name).await);
            }
        }

        let deadline = Instant::now() + self.config.join_timeout;
        match PeerAddr::parse(&remote) {
            PeerAddr::Socket(url) => {
                let server = EndpointId::from("server");
                match dial_dedicated(
                    server.clone(),
                    &url,
                    self.config.direct_open_timeout,
                    self.inbound_tx.clone(),
                )
                .await
                {
                    Ok(wire) => {
                        self.wires.insert(server.clone(), PeerWire::Socket(wire));
                        self.host_id = Some(server.clone());
                        self.pending_join = Some(PendingJoin {
                            reply,
                            stage: JoinStage::AwaitHandshake,
                            host: server.clone(),
                            password,
                            direct_deadline: None,
                            deadline,
                        });
                        let handshake = WireMessage::unsequenced(
                            now_ms(),
                            MessageBody::Handshake {
                                protocol_version: self.config.protocol_version,
                            },
                        );
                        self.send_message(&server, &handshake);
                    }
                    Err(e) => {
                        self.fail_join(reply, e.into());
                    }
                }
            }
            PeerAddr::Peer(host) => {
                let Some(url) = self.relay_url.clone() else {
                    self.fail_join(
                        reply,
                        TransportError::RelayUnavailable(
                            "no relay configured for peer joins".into(),
                        )
                        .into(),
                    );
                    return;
                };
                if let Some(old) = self.relay.take() {
                    old.close();
                }
                match RelayConnection::connect(
                    &url,
                    host.as_str(),
                    self.info.id.clone(),
                    self.inbound_tx.clone(),
                    self.config.relay_register_wait,
                )
                .await
                {
                    Ok(relay) => {
                        // Ask the host to offer its direct address; if
                        // nothing comes back in time, relay-only it is.
                        broadcast_signal(&relay, "request_direct", None, None);
                        self.relay = Some(relay);
                        self.host_id = Some(host.clone());
                        self.pending_join = Some(PendingJoin {
                            reply,
                            stage: JoinStage::AwaitDirect,
                            host,
                            password,
                            direct_deadline: Some(
                                Instant::now() + self.config.direct_open_timeout,
                            ),
                            deadline,
                        });
                    }
                    Err(e) => {
                        self.fail_join(reply, e.into());
                    }
                }
            }
        }
    }

    fn fail_join(
        &mut self,
        reply: Option<oneshot::Sender<Result<(), CraftnetError>>>,
        error: CraftnetError,
    ) {
        tracing::warn!(error = %error, "join failed");
        let message = error.to_string();
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
        self.teardown();
        self.set_status(SessionStatus::Error(message));
    }

    fn send_join(&mut self, stage_to: JoinStage) {
        let Some(pj) = &mut self.pending_join else { return };
        pj.stage = stage_to;
        let host = pj.host.clone();
        let (token, uuid) = self
            .identity
            .as_ref()
            .map(|i| (i.token.clone(), i.uuid.clone()))
            .unwrap_or((None, None));
        let join = WireMessage::unsequenced(
            now_ms(),
            MessageBody::Join {
                id: self.info.id.clone(),
                name: self.info.name.clone(),
                password: pj.password.clone(),
                protocol_version: self.config.protocol_version,
                token,
                uuid,
            },
        );
        self.send_message(&host, &join);
    }

    // -- intents --

    fn on_intent(&mut self, body: MessageBody) {
        if self.role == SessionRole::None {
            tracing::trace!("dropping intent outside a session");
            return;
        }
        if matches!(body, MessageBody::Move { .. }) {
            // Coalesce: only the freshest position goes out per tick.
            self.pending_move = Some(body);
            return;
        }
        self.submit_intent(body);
    }

    fn submit_intent(&mut self, body: MessageBody) {
        match self.role {
            SessionRole::Host => {
                let mut events = Vec::new();
                let mut ctx = RouterCtx {
                    world: self.world.as_mut(),
                    roster: &mut self.roster,
                    peers: &mut self.peers,
                    clock: &mut self.clock,
                    info: &mut self.info,
                    config: &self.config,
                    now_ms: now_ms(),
                    frame_kind: TransportKind::Direct,
                    events: &mut events,
                };
                let outs = self.host_router.local_intent(&mut ctx, body);
                self.dispatch(outs);
                self.drain_events(None, events);
            }
            SessionRole::Client => {
                let Some(host) = self.host_id.clone() else { return };
                let msg = WireMessage {
                    sequence: Some(self.info.next_seq()),
                    timestamp: now_ms(),
                    body,
                };
                self.send_message(&host, &msg);
            }
            SessionRole::None => {}
        }
    }

    fn flush_position(&mut self) {
        if let Some(body) = self.pending_move.take() {
            self.submit_intent(body);
        }
    }

    fn broadcast_world_sync(&mut self) {
        if self.role != SessionRole::Host {
            return;
        }
        let mut events = Vec::new();
        let mut ctx = RouterCtx {
            world: self.world.as_mut(),
            roster: &mut self.roster,
            peers: &mut self.peers,
            clock: &mut self.clock,
            info: &mut self.info,
            config: &self.config,
            now_ms: now_ms(),
            frame_kind: TransportKind::Direct,
            events: &mut events,
        };
        let out = self.host_router.world_sync(&mut ctx);
        self.dispatch(vec![out]);
    }

    fn send_ping(&mut self) {
        let ping = WireMessage::unsequenced(now_ms(), MessageBody::Ping);
        match self.role {
            SessionRole::Client => {
                if let Some(host) = self.host_id.clone() {
                    self.send_message(&host, &ping);
                }
            }
            // Peers echo the timestamp back; the pong handler turns it
            // into the latency stamped onto relayed movement.
            SessionRole::Host => {
                if !self.peers.is_empty() {
                    self.dispatch(vec![Outbound::to_all(ping)]);
                }
            }
            SessionRole::None => {}
        }
    }

    fn report_to_lobby(&mut self) {
        if self.role != SessionRole::Host || !self.public {
            return;
        }
        if let Some(lobby) = self.lobby.clone() {
            let id = self.info.id.clone();
            let players = self.peers.len() as u32 + 1;
            tokio::spawn(async move {
                lobby.report(&id, players).await;
            });
        }
    }

    // -- inbound frames --

    fn on_frame(&mut self, frame: InboundFrame) {
        match frame.payload {
            FramePayload::Closed => self.on_wire_closed(frame.from, frame.kind),
            FramePayload::Bytes(data) => match decode(&data) {
                Ok(msg) => self.route(frame.from, frame.kind, msg),
                Err(e) => {
                    tracing::debug!(from = %frame.from, error = %e, "undecodable frame");
                }
            },
            FramePayload::Text(text) => match decode_text(&text) {
                Ok(msg) => self.route(frame.from, frame.kind, msg),
                Err(e) => {
                    tracing::debug!(from = %frame.from, error = %e, "undecodable signal");
                }
            },
        }
    }

    fn route(&mut self, sender: EndpointId, kind: TransportKind, msg: WireMessage) {
        if !admit(&mut self.peers, kind, &sender, &msg) {
            return;
        }
        let mut events = Vec::new();
        let mut ctx = RouterCtx {
            world: self.world.as_mut(),
            roster: &mut self.roster,
            peers: &mut self.peers,
            clock: &mut self.clock,
            info: &mut self.info,
            config: &self.config,
            now_ms: now_ms(),
            frame_kind: kind,
            events: &mut events,
        };
        let outs = match self.role {
            SessionRole::Host => self.host_router.handle(&mut ctx, &sender, msg),
            SessionRole::Client => self.client_router.handle(&mut ctx, &sender, msg),
            SessionRole::None => {
                tracing::trace!(from = %sender, "frame outside a session");
                Vec::new()
            }
        };
        // Re-key a provisionally-labeled wire before replies go out,
        // so a welcome addressed to the peer's real id finds it.
        for event in &events {
            if let SyncEvent::PeerRegistered { id, .. } = event {
                self.rebind_wire(&sender, id);
            }
        }
        self.dispatch(outs);
        self.drain_events(Some(&sender), events);
    }

    fn rebind_wire(&mut self, from: &EndpointId, to: &EndpointId) {
        if from == to {
            return;
        }
        if let Some(wire) = self.wires.remove(from) {
            if let PeerWire::Socket(socket) = &wire {
                socket.rebind(to.clone());
            }
            self.wires.insert(to.clone(), wire);
        }
    }

    fn on_wire_closed(&mut self, from: EndpointId, kind: TransportKind) {
        tracing::debug!(peer = %from, %kind, "wire closed");

        if from.as_str() == RELAY_PSEUDO_PEER {
            self.relay = None;
            // Relay loss only matters to a client whose host rode it.
            if self.role == SessionRole::Client
                && self
                    .host_id
                    .as_ref()
                    .is_some_and(|h| !self.wires.contains_key(h))
            {
                self.on_host_lost();
            }
            return;
        }

        self.wires.remove(&from);
        match self.role {
            SessionRole::Host => {
                let mut events = Vec::new();
                let mut ctx = RouterCtx {
                    world: self.world.as_mut(),
                    roster: &mut self.roster,
                    peers: &mut self.peers,
                    clock: &mut self.clock,
                    info: &mut self.info,
                    config: &self.config,
                    now_ms: now_ms(),
                    frame_kind: kind,
                    events: &mut events,
                };
                let outs = self.host_router.peer_closed(&mut ctx, &from);
                self.dispatch(outs);
                self.drain_events(Some(&from), events);
                self.report_to_lobby();
            }
            SessionRole::Client => {
                if self.host_id.as_ref() == Some(&from) {
                    if kind == TransportKind::Dedicated {
                        // Nobody migrates away from a lost server.
                        self.teardown();
                        self.set_status(SessionStatus::Error(
                            "server connection lost".into(),
                        ));
                    } else {
                        self.on_host_lost();
                    }
                }
            }
            SessionRole::None => {}
        }
    }

    fn on_host_lost(&mut self) {
        if let Some(mut pj) = self.pending_join.take() {
            pj.resolve(Err(CraftnetError::NotConnected));
            self.teardown();
            self.set_status(SessionStatus::Error("host connection lost".into()));
            return;
        }
        if self.migration.is_some() {
            return;
        }

        let dead = self.host_id.take();
        tracing::warn!(host = ?dead, "host lost, electing replacement");
        self.set_status(SessionStatus::Connecting);

        let candidates: Vec<EndpointId> = self
            .known_peers
            .iter()
            .filter(|id| Some(*id) != dead.as_ref() && **id != self.info.id)
            .cloned()
            .collect();
        let migration_config = MigrationConfig {
            signal_wait: self.config.migration_signal_wait,
            ..MigrationConfig::default()
        };
        match plan_migration(&self.info.id, &candidates, &migration_config) {
            MigrationPlan::Promote { backoff } => {
                self.migration = Some(Migration::Promoting {
                    at: Instant::now() + backoff,
                });
            }
            MigrationPlan::AwaitSignal { wait } => {
                self.migration = Some(Migration::Awaiting {
                    until: Instant::now() + wait,
                });
            }
        }
        if let Some(dead) = dead {
            self.roster.remove(&dead);
            self.world.remove_player(&dead);
        }
    }

    async fn promote_self(&mut self) {
        tracing::info!(id = %self.info.id, "promoting to session host");
        self.migration = None;
        self.role = SessionRole::Host;
        self.ping_timer = None;

        // Keep the world and roster we already mirror; peers must
        // re-join, so their bookkeeping starts fresh.
        self.peers.clear();
        let me = self.roster.get(&self.info.id).cloned().unwrap_or_else(|| {
            PlayerInfo::new(self.info.id.clone(), NumericId(0), self.info.name.clone())
        });
        self.roster.clear();
        let mut me = me;
        me.nid = NumericId(0);
        self.world.add_player(&me.snapshot());
        self.roster.upsert(me);

        match DirectListener::bind(&self.config.direct_bind_addr).await {
            Ok(listener) => {
                self.listener_addr = listener.local_addr().ok();
                self.listener = Some(listener);
            }
            Err(e) => tracing::warn!(error = %e, "promoted host has no direct listener"),
        }

        // Announce into the old session's relay room, then move our
        // relay registration to a room keyed by our own id.
        if let Some(old_relay) = self.relay.take() {
            broadcast_signal(&old_relay, "migrate", Some(self.info.id.clone()), None);
            old_relay.close();
        }
        if let Some(url) = self.relay_url.clone() {
            match RelayConnection::connect(
                &url,
                self.info.id.as_str(),
                self.info.id.clone(),
                self.inbound_tx.clone(),
                self.config.relay_register_wait,
            )
            .await
            {
                Ok(relay) => self.relay = Some(relay),
                Err(e) => tracing::warn!(error = %e, "promoted host has no relay"),
            }
        }

        self.position_timer = Some(interval_after(self.config.position_interval));
        self.world_timer = Some(interval_after(self.config.world_sync_interval));
        self.ping_timer = Some(interval_after(self.config.ping_interval));
        self.set_status(SessionStatus::Connected);
    }

    // -- internal notes --

    async fn on_note(&mut self, note: Internal) {
        match note {
            Internal::VerifyResult { id, name, outcome } => match outcome {
                VerifyOutcome::Verified => {
                    tracing::debug!(peer = %id, name, "identity verified");
                }
                VerifyOutcome::Unreachable => {
                    tracing::debug!(peer = %id, name, "identity service unreachable");
                }
                VerifyOutcome::Failed => {
                    let warning = format!("identity check failed for {name}");
                    match self.config.identity_policy {
                        EnforcementPolicy::Warn => {
                            tracing::warn!(peer = %id, "{warning}");
                            let _ = self.warn_tx.send(warning.clone());
                            let msg = WireMessage::unsequenced(
                                now_ms(),
                                MessageBody::ServerWarning { message: warning },
                            );
                            self.send_message(&id, &msg);
                        }
                        EnforcementPolicy::Reject => {
                            let msg = WireMessage::unsequenced(
                                now_ms(),
                                MessageBody::Error {
                                    code: ERR_IDENTITY_REJECTED,
                                    message: warning,
                                },
                            );
                            self.send_message(&id, &msg);
                            self.drop_peer_after_flush(&id);
                            let mut events = Vec::new();
                            let mut ctx = RouterCtx {
                                world: self.world.as_mut(),
                                roster: &mut self.roster,
                                peers: &mut self.peers,
                                clock: &mut self.clock,
                                info: &mut self.info,
                                config: &self.config,
                                now_ms: now_ms(),
                                frame_kind: TransportKind::Direct,
                                events: &mut events,
                            };
                            let outs = self.host_router.peer_closed(&mut ctx, &id);
                            self.dispatch(outs);
                            self.drain_events(Some(&id), events);
                        }
                    }
                }
            },
            Internal::DirectDialed { host, result } => {
                let Some(pj) = &self.pending_join else { return };
                if pj.host != host || pj.stage != JoinStage::AwaitDirect {
                    return;
                }
                match result {
                    Ok(wire) => {
                        tracing::debug!(%host, "direct channel to host open");
                        self.wires.insert(host, PeerWire::Socket(wire));
                    }
                    Err(e) => {
                        tracing::debug!(%host, error = %e, "direct dial failed, using relay");
                        if let Some(relay) = &self.relay {
                            self.wires
                                .insert(host.clone(), PeerWire::Relay(relay.wire_for(host)));
                        }
                    }
                }
                self.send_join(JoinStage::AwaitWelcome);
            }
            Internal::Rejoin { remote } => {
                let name = self.info.name.clone();
                let password = self.config.password.clone();
                self.start_join(remote, name, password, None).await;
            }
        }
    }

    // -- deadlines --

    async fn on_deadline(&mut self) {
        let now = Instant::now();

        let mut relay_fallback = false;
        let mut join_timed_out = false;
        if let Some(pj) = &mut self.pending_join {
            if pj.stage == JoinStage::AwaitDirect
                && pj.direct_deadline.is_some_and(|d| d <= now)
            {
                pj.direct_deadline = None;
                relay_fallback = true;
            }
            if pj.deadline <= now {
                join_timed_out = true;
            }
        }
        if relay_fallback && !join_timed_out {
            // No direct offer in time: join through the tunnel.
            let host = self
                .pending_join
                .as_ref()
                .map(|pj| pj.host.clone());
            if let (Some(host), Some(relay)) = (host, &self.relay) {
                tracing::debug!(%host, "no direct channel, joining via relay");
                self.wires
                    .insert(host.clone(), PeerWire::Relay(relay.wire_for(host)));
            }
            self.send_join(JoinStage::AwaitWelcome);
        }
        if join_timed_out {
            if let Some(mut pj) = self.pending_join.take() {
                pj.resolve(Err(CraftnetError::Timeout("welcome")));
            }
            self.teardown();
            self.set_status(SessionStatus::Error("join timed out".into()));
        }

        match &self.migration {
            Some(Migration::Promoting { at }) if *at <= now => {
                self.promote_self().await;
            }
            Some(Migration::Awaiting { until }) if *until <= now => {
                tracing::warn!("no migration signal arrived, giving up");
                self.teardown();
            }
            _ => {}
        }
    }

    // -- events from routing --

    fn drain_events(&mut self, sender: Option<&EndpointId>, events: Vec<SyncEvent>) {
        for event in events {
            match event {
                SyncEvent::Welcomed { player_id, nid } => {
                    tracing::info!(%player_id, %nid, "join complete");
                    if let Some(mut pj) = self.pending_join.take() {
                        pj.resolve(Ok(()));
                    }
                    self.migration = None;
                    self.position_timer =
                        Some(interval_after(self.config.position_interval));
                    self.ping_timer = Some(interval_after(self.config.ping_interval));
                    self.set_status(SessionStatus::Connected);
                }
                SyncEvent::JoinRejected { code, message } => {
                    tracing::warn!(code, message, "rejected by host");
                    if let Some(mut pj) = self.pending_join.take() {
                        pj.resolve(Err(CraftnetError::JoinRejected {
                            code,
                            message: message.clone(),
                        }));
                    }
                    self.teardown();
                    self.set_status(SessionStatus::Error(message));
                }
                SyncEvent::Warning(warning) => {
                    let _ = self.warn_tx.send(warning);
                }
                SyncEvent::PeerRegistered { id, .. } => {
                    if let Some(sender) = sender {
                        let sender = sender.clone();
                        self.rebind_wire(&sender, &id);
                    }
                    self.report_to_lobby();
                }
                SyncEvent::RejectPeer { id, code, message } => {
                    tracing::info!(peer = %id, code, message, "dropping peer");
                    let target = sender.unwrap_or(&id).clone();
                    self.drop_peer_after_flush(&target);
                    self.peers.remove(&target);
                }
                SyncEvent::VerifyIdentity {
                    id,
                    name,
                    token,
                    uuid,
                } => {
                    if let Some(auth) = self.auth.clone() {
                        let internal = self.internal_tx.clone();
                        tokio::spawn(async move {
                            let outcome =
                                auth.verify(&name, &token, uuid.as_deref()).await;
                            let _ = internal.send(Internal::VerifyResult {
                                id,
                                name,
                                outcome,
                            });
                        });
                    }
                }
                SyncEvent::MigrationSignal { host } => {
                    if host == self.info.id {
                        continue;
                    }
                    tracing::info!(new_host = %host, "following migration signal");
                    self.migration = None;
                    if let Some(old) = self.host_id.take() {
                        self.wires.remove(&old);
                    }
                    // Re-join the announced host on the next loop
                    // turn; nobody is awaiting a reply for it.
                    let _ = self.internal_tx.send(Internal::Rejoin {
                        remote: host.to_string(),
                    });
                }
                SyncEvent::DirectAddrOffer { addr } => {
                    let Some(pj) = &self.pending_join else { continue };
                    if pj.stage != JoinStage::AwaitDirect {
                        continue;
                    }
                    let host = pj.host.clone();
                    let timeout = self.config.direct_open_timeout;
                    let inbound = self.inbound_tx.clone();
                    let internal = self.internal_tx.clone();
                    tokio::spawn(async move {
                        let result =
                            dial_direct(host.clone(), &addr, timeout, inbound).await;
                        let _ = internal.send(Internal::DirectDialed { host, result });
                    });
                }
                SyncEvent::DirectRequested { peer } => {
                    if let (Some(addr), Some(relay)) = (self.listener_addr, &self.relay) {
                        tracing::debug!(%peer, "offering direct address");
                        broadcast_signal(
                            relay,
                            "direct_addr",
                            Some(self.info.id.clone()),
                            Some(format!("ws://{addr}")),
                        );
                    }
                }
                SyncEvent::HandshakeAcked { protocol_version } => {
                    if protocol_version != self.config.protocol_version {
                        let _ = self.warn_tx.send(format!(
                            "server speaks protocol {protocol_version}, we speak {}",
                            self.config.protocol_version
                        ));
                    }
                    if self
                        .pending_join
                        .as_ref()
                        .is_some_and(|pj| pj.stage == JoinStage::AwaitHandshake)
                    {
                        self.send_join(JoinStage::AwaitWelcome);
                    }
                }
                SyncEvent::PeerListReceived(peers) => {
                    self.known_peers = peers;
                }
                SyncEvent::PeerLeft { id } => {
                    tracing::debug!(peer = %id, "peer left session");
                }
            }
        }
    }

    /// Closes a peer's wire after the error-flush grace, so any queued
    /// error frame actually reaches them.
    fn drop_peer_after_flush(&mut self, id: &EndpointId) {
        let grace = self.config.error_flush_grace;
        if let Some(wire) = self.wires.remove(id) {
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                wire.close();
            });
        }
    }

    // -- outbound --

    fn send_message(&self, to: &EndpointId, msg: &WireMessage) {
        match encode(msg) {
            Ok(data) => self.send_bytes(to, data),
            Err(e) => tracing::error!(error = %e, "encode failed"),
        }
    }

    fn send_bytes(&self, to: &EndpointId, data: Vec<u8>) {
        if let Some(wire) = self.wires.get(to) {
            wire.send(data);
        } else if let Some(relay) = &self.relay {
            relay.send_to(to, data);
        } else {
            tracing::trace!(peer = %to, "no channel to peer");
        }
    }

    fn dispatch(&mut self, outs: Vec<Outbound>) {
        for out in outs {
            let data = match encode(&out.message) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(error = %e, "encode failed");
                    continue;
                }
            };
            let targets: Vec<EndpointId> = match (&out.to, self.role) {
                (Recipient::Peer(id), _) => vec![id.clone()],
                (Recipient::All, SessionRole::Host) => self
                    .peers
                    .iter()
                    .filter(|p| p.nid.is_some())
                    .map(|p| p.id.clone())
                    .collect(),
                (Recipient::AllExcept(except), SessionRole::Host) => self
                    .peers
                    .iter()
                    .filter(|p| p.nid.is_some() && p.id != *except)
                    .map(|p| p.id.clone())
                    .collect(),
                // A client's "broadcast" has exactly one recipient.
                (_, _) => self.host_id.iter().cloned().collect(),
            };
            for target in targets {
                self.send_bytes(&target, data.clone());
            }
        }
    }

    // -- teardown --

    /// Tears the session down in the documented order: timers first,
    /// then wires, then bookkeeping, and the world bridge last.
    fn teardown(&mut self) {
        self.position_timer = None;
        self.world_timer = None;
        self.ping_timer = None;
        self.lobby_timer = None;
        self.migration = None;
        self.pending_move = None;
        if let Some(mut pj) = self.pending_join.take() {
            pj.resolve(Err(CraftnetError::NotConnected));
        }

        for (_, wire) in self.wires.drain() {
            wire.close();
        }
        if let Some(relay) = self.relay.take() {
            relay.close();
        }
        self.listener = None;
        self.listener_addr = None;

        if self.role == SessionRole::Host && self.public {
            if let Some(lobby) = self.lobby.clone() {
                let id = self.info.id.clone();
                tokio::spawn(async move {
                    lobby.unregister(&id).await;
                });
            }
        }
        self.public = false;

        self.peers.clear();
        self.roster.clear();
        self.known_peers.clear();
        self.host_id = None;
        self.clock = ClockSync::new();
        self.role = SessionRole::None;

        self.world.clear_players();
        self.set_status(SessionStatus::Disconnected);
        tracing::debug!("session torn down");
    }
}
