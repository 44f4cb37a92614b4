//! Host-side routing: admission, relaying, and world authority.

use craftnet_protocol::{EndpointId, MessageBody, NumericId, WireMessage};
use craftnet_session::EnforcementPolicy;

use crate::{Outbound, PlayerInfo, Router, RouterCtx, SyncEvent};

/// Error codes carried by terminal `error` frames.
pub const ERR_BAD_FIRST_MESSAGE: u16 = 400;
pub const ERR_BAD_PASSWORD: u16 = 401;
pub const ERR_IDENTITY_REJECTED: u16 = 403;
pub const ERR_VERSION_MISMATCH: u16 = 426;

/// The authoritative side of the session.
///
/// Holds no state of its own; everything it decides over lives in the
/// [`RouterCtx`]. The host applies every mutation to its own world
/// first, then relays to the other peers, so the host's world is the
/// single source of truth.
#[derive(Debug, Default)]
pub struct HostRouter;

impl HostRouter {
    pub fn new() -> Self {
        Self
    }

    fn handle_join(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        sender: &EndpointId,
        id: EndpointId,
        name: String,
        password: Option<String>,
        protocol_version: u32,
        token: Option<String>,
        uuid: Option<String>,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();

        if ctx.config.password.is_some() && password != ctx.config.password {
            tracing::info!(peer = %id, "join refused: bad password");
            out.push(Outbound::to_peer(
                sender.clone(),
                ctx.control(MessageBody::Error {
                    code: ERR_BAD_PASSWORD,
                    message: "invalid password".to_string(),
                }),
            ));
            ctx.event(SyncEvent::RejectPeer {
                id: sender.clone(),
                code: ERR_BAD_PASSWORD,
                message: "invalid password".to_string(),
            });
            return out;
        }

        if protocol_version != ctx.config.protocol_version {
            match ctx.config.version_policy {
                EnforcementPolicy::Reject => {
                    tracing::info!(
                        peer = %id,
                        theirs = protocol_version,
                        ours = ctx.config.protocol_version,
                        "join refused: protocol version mismatch"
                    );
                    out.push(Outbound::to_peer(
                        sender.clone(),
                        ctx.control(MessageBody::Error {
                            code: ERR_VERSION_MISMATCH,
                            message: format!(
                                "protocol version {protocol_version} not supported"
                            ),
                        }),
                    ));
                    ctx.event(SyncEvent::RejectPeer {
                        id: sender.clone(),
                        code: ERR_VERSION_MISMATCH,
                        message: "protocol version mismatch".to_string(),
                    });
                    return out;
                }
                EnforcementPolicy::Warn => {
                    let warning = format!(
                        "peer {name} speaks protocol {protocol_version}, we speak {}",
                        ctx.config.protocol_version
                    );
                    tracing::warn!(peer = %id, "{warning}");
                    out.push(Outbound::to_peer(
                        sender.clone(),
                        ctx.control(MessageBody::ServerWarning {
                            message: warning.clone(),
                        }),
                    ));
                    ctx.event(SyncEvent::Warning(warning));
                }
            }
        }

        if let Some(token) = token {
            ctx.event(SyncEvent::VerifyIdentity {
                id: id.clone(),
                name: name.clone(),
                token,
                uuid,
            });
        }

        // A direct accept is tracked under its provisional socket label
        // until the join names the real endpoint; retire that entry.
        if sender != &id {
            ctx.peers.remove(sender);
        }
        let nid = match ctx.peers.register(id.clone(), name.clone(), ctx.frame_kind) {
            Ok(nid) => nid,
            Err(e) => {
                tracing::error!(peer = %id, error = %e, "cannot register peer");
                ctx.event(SyncEvent::RejectPeer {
                    id: sender.clone(),
                    code: ERR_BAD_FIRST_MESSAGE,
                    message: "session full".to_string(),
                });
                return out;
            }
        };

        let info = PlayerInfo::new(id.clone(), nid, name.clone());
        ctx.world.add_player(&info.snapshot());
        ctx.roster.upsert(info);
        tracing::info!(peer = %id, %nid, name, "peer joined");

        let welcome = MessageBody::Welcome {
            player_id: id.clone(),
            nid,
            players: ctx.roster.snapshot(),
            seed: ctx.world.seed(),
            time_of_day: ctx.world.time_of_day(),
            weather: ctx.world.weather(),
        };
        let welcome = ctx.stamp(welcome);
        out.push(Outbound::to_peer(id.clone(), welcome));

        let announce = ctx.stamp(MessageBody::PlayerJoin {
            id: id.clone(),
            nid,
            name: name.clone(),
        });
        out.push(Outbound::to_all_except(id.clone(), announce));

        out.push(Outbound::to_all(self.peer_list(ctx)));

        ctx.event(SyncEvent::PeerRegistered { id, nid, name });
        out
    }

    fn peer_list(&self, ctx: &mut RouterCtx<'_>) -> WireMessage {
        let mut peers: Vec<EndpointId> = vec![ctx.info.id.clone()];
        peers.extend(ctx.peers.ids().cloned());
        ctx.stamp(MessageBody::PeerList { peers })
    }

    /// Handles a peer's channel closing: free its ids, tell the rest.
    pub fn peer_closed(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        id: &EndpointId,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();
        // Provisionally tracked senders that never joined leave quietly.
        let known = ctx.peers.remove(id).is_some_and(|p| p.nid.is_some());
        ctx.roster.remove(id);
        ctx.world.remove_player(id);
        if known {
            tracing::info!(peer = %id, "peer left");
            let leave = ctx.stamp(MessageBody::PlayerLeave { id: id.clone() });
            out.push(Outbound::to_all(leave));
            out.push(Outbound::to_all(self.peer_list(ctx)));
            ctx.event(SyncEvent::PeerLeft { id: id.clone() });
        }
        out
    }

    /// Converts a local player intent straight into outbound broadcasts.
    ///
    /// The host's own traffic never crosses a transport: the world is
    /// already mutated here, so this is the apply-and-relay path minus
    /// the inbound hop.
    pub fn local_intent(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        body: MessageBody,
    ) -> Vec<Outbound> {
        match body {
            MessageBody::Move {
                position,
                yaw,
                pitch,
                health,
            } => {
                let id = ctx.info.id.clone();
                if let Some(me) = ctx.roster.get_mut(&id) {
                    me.position = position;
                    me.yaw = yaw;
                    me.pitch = pitch;
                    me.health = health;
                }
                let msg = ctx.stamp(MessageBody::PlayerMove {
                    nid: NumericId(0),
                    position,
                    yaw,
                    pitch,
                    health,
                    latency_ms: 0,
                });
                vec![Outbound::to_all(msg)]
            }
            MessageBody::BlockPlace { x, y, z, block } => {
                ctx.world.set_block(x, y, z, block, false);
                ctx.world.bump_chunk_version(x >> 4, z >> 4);
                let msg = ctx.stamp(MessageBody::BlockUpdate { x, y, z, block });
                vec![Outbound::to_all(msg)]
            }
            MessageBody::BlockBreak { x, y, z } => {
                ctx.world.set_block(x, y, z, 0, false);
                ctx.world.bump_chunk_version(x >> 4, z >> 4);
                let msg = ctx.stamp(MessageBody::BlockUpdate { x, y, z, block: 0 });
                vec![Outbound::to_all(msg)]
            }
            MessageBody::Chat { text } => {
                let sender = ctx.info.name.clone();
                ctx.world.append_chat(&sender, &text);
                let msg = ctx.stamp(MessageBody::ChatBroadcast {
                    sender,
                    text,
                    kind: "chat".to_string(),
                });
                vec![Outbound::to_all(msg)]
            }
            MessageBody::Action { action } => {
                let id = ctx.info.id.clone();
                let msg = ctx.stamp(MessageBody::PlayerAction { id, action });
                vec![Outbound::to_all(msg)]
            }
            MessageBody::EntitySync {
                ref kind,
                ref id,
                position,
                velocity,
                ref data,
            } => {
                ctx.world.spawn_entity(kind, id, position, velocity, data);
                let msg = ctx.stamp(body.clone());
                vec![Outbound::to_all(msg)]
            }
            MessageBody::EntityVelocity {
                ref kind,
                ref id,
                velocity,
            } => {
                ctx.world.set_entity_velocity(kind, id, velocity);
                let msg = ctx.stamp(body.clone());
                vec![Outbound::to_all(msg)]
            }
            MessageBody::EntityRemove { ref kind, ref id } => {
                ctx.world.remove_entity(kind, id);
                let msg = ctx.stamp(body.clone());
                vec![Outbound::to_all(msg)]
            }
            MessageBody::WorldEvent {
                ref event,
                position,
                ref data,
            } => {
                ctx.world.world_event(event, position, data);
                let msg = ctx.stamp(body.clone());
                vec![Outbound::to_all(msg)]
            }
            other => {
                tracing::debug!(kind = ?other, "ignoring non-broadcastable local intent");
                Vec::new()
            }
        }
    }

    /// Periodic world metadata broadcast.
    pub fn world_sync(&self, ctx: &mut RouterCtx<'_>) -> Outbound {
        let msg = ctx.stamp(MessageBody::WorldSync {
            time_of_day: ctx.world.time_of_day(),
            weather: ctx.world.weather(),
        });
        Outbound::to_all(msg)
    }
}

impl Router for HostRouter {
    fn handle(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        sender: &EndpointId,
        msg: WireMessage,
    ) -> Vec<Outbound> {
        let timestamp = msg.timestamp;

        // Admission: a peer we haven't registered may only open with a
        // join (or the connection-level preamble and signaling kinds).
        if !ctx.peers.is_registered(sender) {
            match &msg.body {
                MessageBody::Join { .. }
                | MessageBody::Handshake { .. }
                | MessageBody::RelaySignal { .. } => {}
                other => {
                    tracing::info!(peer = %sender, kind = ?other, "first message was not a join");
                    ctx.event(SyncEvent::RejectPeer {
                        id: sender.clone(),
                        code: ERR_BAD_FIRST_MESSAGE,
                        message: "expected join".to_string(),
                    });
                    return vec![Outbound::to_peer(
                        sender.clone(),
                        ctx.control(MessageBody::Error {
                            code: ERR_BAD_FIRST_MESSAGE,
                            message: "expected join".to_string(),
                        }),
                    )];
                }
            }
        }

        match msg.body {
            MessageBody::Join {
                id,
                name,
                password,
                protocol_version,
                token,
                uuid,
            } => self.handle_join(
                ctx,
                sender,
                id,
                name,
                password,
                protocol_version,
                token,
                uuid,
            ),

            MessageBody::Move {
                position,
                yaw,
                pitch,
                health,
            } => {
                let Some(player) = ctx.roster.get_mut(sender) else {
                    return Vec::new();
                };
                player.position = position;
                player.yaw = yaw;
                player.pitch = pitch;
                player.health = health;
                let nid = player.nid;
                let snapshot = player.snapshot();
                ctx.world.add_player(&snapshot);

                let latency_ms = ctx
                    .peers
                    .get(sender)
                    .map(|p| p.latency_ms)
                    .unwrap_or(0);
                let msg = ctx.stamp(MessageBody::PlayerMove {
                    nid,
                    position,
                    yaw,
                    pitch,
                    health,
                    latency_ms,
                });
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::BlockPlace { x, y, z, block } => {
                ctx.world.set_block(x, y, z, block, true);
                ctx.world.bump_chunk_version(x >> 4, z >> 4);
                let msg = ctx.stamp(MessageBody::BlockUpdate { x, y, z, block });
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::BlockBreak { x, y, z } => {
                ctx.world.set_block(x, y, z, 0, true);
                ctx.world.bump_chunk_version(x >> 4, z >> 4);
                let msg = ctx.stamp(MessageBody::BlockUpdate { x, y, z, block: 0 });
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::Chat { text } => {
                let name = ctx
                    .roster
                    .get(sender)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| sender.to_string());
                ctx.world.append_chat(&name, &text);
                let msg = ctx.stamp(MessageBody::ChatBroadcast {
                    sender: name,
                    text,
                    kind: "chat".to_string(),
                });
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::Action { action } => {
                if let Some(player) = ctx.roster.get_mut(sender) {
                    player.last_action = Some(action.clone());
                }
                let msg = ctx.stamp(MessageBody::PlayerAction {
                    id: sender.clone(),
                    action,
                });
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::EntitySync {
                ref kind,
                ref id,
                position,
                velocity,
                ref data,
            } => {
                ctx.world.spawn_entity(kind, id, position, velocity, data);
                let msg = ctx.stamp(msg.body.clone());
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::EntityVelocity {
                ref kind,
                ref id,
                velocity,
            } => {
                ctx.world.set_entity_velocity(kind, id, velocity);
                let msg = ctx.stamp(msg.body.clone());
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::EntityRemove { ref kind, ref id } => {
                ctx.world.remove_entity(kind, id);
                let msg = ctx.stamp(msg.body.clone());
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::WorldEvent {
                ref event,
                position,
                ref data,
            } => {
                ctx.world.world_event(event, position, data);
                let msg = ctx.stamp(msg.body.clone());
                vec![Outbound::to_all_except(sender.clone(), msg)]
            }

            MessageBody::InventoryUpdate { slots } => {
                ctx.world.apply_inventory(&slots);
                Vec::new()
            }

            MessageBody::Ping => {
                let pong = ctx.control(MessageBody::Pong { echo: timestamp });
                vec![Outbound::to_peer(sender.clone(), pong)]
            }

            MessageBody::Pong { echo } => {
                let rtt = ctx.now_ms.saturating_sub(echo).min(255) as u8;
                if let Some(peer) = ctx.peers.get_mut(sender) {
                    peer.latency_ms = rtt;
                }
                if let Some(player) = ctx.roster.get_mut(sender) {
                    player.latency_ms = rtt;
                }
                Vec::new()
            }

            MessageBody::Handshake { protocol_version } => {
                tracing::debug!(peer = %sender, theirs = protocol_version, "handshake");
                let ack = ctx.control(MessageBody::HandshakeAck {
                    protocol_version: ctx.config.protocol_version,
                });
                vec![Outbound::to_peer(sender.clone(), ack)]
            }

            MessageBody::RelaySignal { ref event, .. } => {
                if event == "request_direct" {
                    ctx.event(SyncEvent::DirectRequested {
                        peer: sender.clone(),
                    });
                }
                Vec::new()
            }

            MessageBody::ModInfo { mods } => {
                tracing::info!(peer = %sender, ?mods, "peer mod list");
                Vec::new()
            }

            MessageBody::Ack { .. } => Vec::new(),

            other => {
                tracing::debug!(peer = %sender, kind = ?other, "unexpected message for a host");
                Vec::new()
            }
        }
    }
}
