//! Client-side routing: mirroring the host's authoritative stream.

use craftnet_protocol::{EndpointId, MessageBody, PlayerSnapshot, WireMessage};

use crate::{Outbound, PlayerInfo, Router, RouterCtx, SyncEvent};

/// The mirroring side of the session.
///
/// A client applies what the host says and asks for nothing back,
/// with two exceptions: it answers pings (anyone may probe anyone) and
/// it reports its own intents upstream, which the session actor sends
/// directly rather than through this router.
#[derive(Debug, Default)]
pub struct ClientRouter;

impl ClientRouter {
    pub fn new() -> Self {
        Self
    }

    fn apply_snapshot(ctx: &mut RouterCtx<'_>, snapshot: &PlayerSnapshot) {
        let mut info = PlayerInfo::new(
            snapshot.id.clone(),
            snapshot.nid,
            snapshot.name.clone(),
        );
        info.position = snapshot.position;
        info.yaw = snapshot.yaw;
        info.pitch = snapshot.pitch;
        info.health = snapshot.health;
        info.dimension = snapshot.dimension.clone();
        ctx.world.add_player(snapshot);
        ctx.roster.upsert(info);
    }
}

impl Router for ClientRouter {
    fn handle(
        &mut self,
        ctx: &mut RouterCtx<'_>,
        sender: &EndpointId,
        msg: WireMessage,
    ) -> Vec<Outbound> {
        let timestamp = msg.timestamp;

        match msg.body {
            MessageBody::Welcome {
                player_id,
                nid,
                players,
                seed,
                time_of_day,
                weather,
            } => {
                ctx.world.set_seed(seed);
                ctx.world.set_time_of_day(time_of_day);
                ctx.world.set_weather(&weather);
                for snapshot in &players {
                    // Our own entry mirrors locally-known state; skip it.
                    if snapshot.id == player_id {
                        continue;
                    }
                    Self::apply_snapshot(ctx, snapshot);
                }
                tracing::info!(%player_id, %nid, peers = players.len(), "welcomed into session");
                ctx.event(SyncEvent::Welcomed { player_id, nid });
                Vec::new()
            }

            MessageBody::PlayerJoin { id, nid, name } => {
                if id == ctx.info.id {
                    return Vec::new();
                }
                tracing::info!(peer = %id, %nid, name, "peer joined");
                let info = PlayerInfo::new(id, nid, name);
                ctx.world.add_player(&info.snapshot());
                ctx.roster.upsert(info);
                Vec::new()
            }

            MessageBody::PlayerLeave { id } => {
                ctx.roster.remove(&id);
                ctx.world.remove_player(&id);
                ctx.event(SyncEvent::PeerLeft { id });
                Vec::new()
            }

            MessageBody::PlayerMove {
                nid,
                position,
                yaw,
                pitch,
                health,
                latency_ms,
            } => {
                if let Some(player) = ctx.roster.get_by_nid_mut(nid) {
                    player.position = position;
                    player.yaw = yaw;
                    player.pitch = pitch;
                    player.health = health;
                    player.latency_ms = latency_ms;
                    let snapshot = player.snapshot();
                    ctx.world.add_player(&snapshot);
                } else {
                    tracing::trace!(%nid, "move for unknown numeric id");
                }
                Vec::new()
            }

            MessageBody::BlockUpdate { x, y, z, block } => {
                // Idempotent: reapplying the same mutation is a no-op.
                ctx.world.set_block(x, y, z, block, true);
                ctx.world.bump_chunk_version(x >> 4, z >> 4);
                Vec::new()
            }

            MessageBody::WorldData {
                seed,
                time_of_day,
                weather,
            } => {
                ctx.world.set_seed(seed);
                ctx.world.set_time_of_day(time_of_day);
                ctx.world.set_weather(&weather);
                Vec::new()
            }

            MessageBody::WorldSync {
                time_of_day,
                weather,
            } => {
                ctx.world.set_time_of_day(time_of_day);
                ctx.world.set_weather(&weather);
                Vec::new()
            }

            MessageBody::ChunkData {
                chunk_x,
                chunk_z,
                data,
            } => {
                ctx.world.apply_chunk(chunk_x, chunk_z, &data);
                ctx.world.bump_chunk_version(chunk_x, chunk_z);
                Vec::new()
            }

            MessageBody::ChatBroadcast { sender, text, .. } => {
                ctx.world.append_chat(&sender, &text);
                Vec::new()
            }

            MessageBody::PlayerAction { id, action } => {
                if let Some(player) = ctx.roster.get_mut(&id) {
                    player.last_action = Some(action);
                }
                Vec::new()
            }

            MessageBody::EntitySync {
                kind,
                id,
                position,
                velocity,
                data,
            } => {
                ctx.world.spawn_entity(&kind, &id, position, velocity, &data);
                Vec::new()
            }

            MessageBody::EntityVelocity { kind, id, velocity } => {
                ctx.world.set_entity_velocity(&kind, &id, velocity);
                Vec::new()
            }

            MessageBody::EntityRemove { kind, id } => {
                ctx.world.remove_entity(&kind, &id);
                Vec::new()
            }

            MessageBody::WorldEvent {
                event,
                position,
                data,
            } => {
                ctx.world.world_event(&event, position, &data);
                Vec::new()
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
                ctx.clock.record_pong(echo, ctx.now_ms);
                Vec::new()
            }

            MessageBody::Error { code, message } => {
                tracing::warn!(code, message, "host refused us");
                ctx.event(SyncEvent::JoinRejected { code, message });
                Vec::new()
            }

            MessageBody::ServerWarning { message } => {
                tracing::warn!(message, "server warning");
                ctx.event(SyncEvent::Warning(message));
                Vec::new()
            }

            MessageBody::RelaySignal { event, host, addr } => {
                match event.as_str() {
                    "migrate" => {
                        if let Some(host) = host {
                            ctx.event(SyncEvent::MigrationSignal { host });
                        }
                    }
                    "direct_addr" => {
                        if let Some(addr) = addr {
                            ctx.event(SyncEvent::DirectAddrOffer { addr });
                        }
                    }
                    other => {
                        tracing::trace!(event = other, "ignoring relay signal");
                    }
                }
                Vec::new()
            }

            MessageBody::HandshakeAck { protocol_version } => {
                ctx.event(SyncEvent::HandshakeAcked { protocol_version });
                Vec::new()
            }

            MessageBody::PeerList { peers } => {
                ctx.event(SyncEvent::PeerListReceived(peers));
                Vec::new()
            }

            MessageBody::Ack { .. } | MessageBody::ModInfo { .. } => Vec::new(),

            other => {
                tracing::debug!(kind = ?other, "unexpected message for a client");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use craftnet_protocol::{NumericId, Recipient};
    use craftnet_session::{ClockSync, PeerTable, SessionConfig, SessionInfo};
    use craftnet_transport::TransportKind;

    use crate::{MemoryWorld, Roster, WorldBridge, admit};

    struct Harness {
        world: MemoryWorld,
        roster: Roster,
        peers: PeerTable,
        clock: ClockSync,
        info: SessionInfo,
        config: SessionConfig,
        events: Vec<SyncEvent>,
        router: ClientRouter,
        now_ms: u64,
    }

    impl Harness {
        fn new() -> Self {
            let mut info = SessionInfo::new("alice");
            info.id = EndpointId::from("peer-me");
            Self {
                world: MemoryWorld::new(),
                roster: Roster::new(),
                peers: PeerTable::new(),
                clock: ClockSync::new(),
                info,
                config: SessionConfig::default(),
                events: Vec::new(),
                router: ClientRouter::new(),
                now_ms: 1_000,
            }
        }

        fn feed(&mut self, msg: WireMessage) -> Vec<Outbound> {
            let host = EndpointId::from("peer-host");
            let mut ctx = RouterCtx {
                world: &mut self.world,
                roster: &mut self.roster,
                peers: &mut self.peers,
                clock: &mut self.clock,
                info: &mut self.info,
                config: &self.config,
                now_ms: self.now_ms,
                frame_kind: TransportKind::Direct,
                events: &mut self.events,
            };
            self.router.handle(&mut ctx, &host, msg)
        }

        fn welcome() -> WireMessage {
            WireMessage {
                sequence: Some(1),
                timestamp: 100,
                body: MessageBody::Welcome {
                    player_id: EndpointId::from("peer-me"),
                    nid: NumericId(1),
                    players: vec![
                        PlayerSnapshot {
                            id: EndpointId::from("peer-host"),
                            nid: NumericId(0),
                            name: "host-player".into(),
                            position: [0.0, 64.0, 0.0],
                            yaw: 0.0,
                            pitch: 0.0,
                            health: 20,
                            dimension: "overworld".into(),
                        },
                        PlayerSnapshot {
                            id: EndpointId::from("peer-me"),
                            nid: NumericId(1),
                            name: "alice".into(),
                            position: [0.0, 64.0, 0.0],
                            yaw: 0.0,
                            pitch: 0.0,
                            health: 20,
                            dimension: "overworld".into(),
                        },
                    ],
                    seed: 42,
                    time_of_day: 6_000,
                    weather: "rain".into(),
                },
            }
        }
    }

    #[test]
    fn test_welcome_mirrors_world_and_roster() {
        let mut h = Harness::new();
        h.feed(Harness::welcome());

        assert_eq!(h.world.seed(), 42);
        assert_eq!(h.world.time_of_day(), 6_000);
        assert_eq!(h.world.weather(), "rain");
        // The host's entry lands; our own is skipped.
        assert_eq!(h.roster.len(), 1);
        assert!(h.roster.get(&EndpointId::from("peer-host")).is_some());
        assert!(h.events.iter().any(|e| matches!(
            e,
            SyncEvent::Welcomed { nid, .. } if *nid == NumericId(1)
        )));
    }

    #[test]
    fn test_player_move_updates_by_numeric_id() {
        let mut h = Harness::new();
        h.feed(Harness::welcome());

        h.feed(WireMessage {
            sequence: Some(2),
            timestamp: 200,
            body: MessageBody::PlayerMove {
                nid: NumericId(0),
                position: [3.0, 70.0, -1.0],
                yaw: 1.0,
                pitch: 0.0,
                health: 19,
                latency_ms: 28,
            },
        });

        let host = h.roster.get(&EndpointId::from("peer-host")).unwrap();
        assert_eq!(host.position, [3.0, 70.0, -1.0]);
        assert_eq!(host.health, 19);
        assert_eq!(host.latency_ms, 28);
    }

    #[test]
    fn test_block_update_is_idempotent() {
        let mut h = Harness::new();
        let update = WireMessage {
            sequence: Some(2),
            timestamp: 200,
            body: MessageBody::BlockUpdate {
                x: 5,
                y: 64,
                z: 5,
                block: 7,
            },
        };
        h.feed(update.clone());
        assert_eq!(h.world.get_block(5, 64, 5), 7);
        // Same mutation again (new sequence): same final state.
        h.feed(WireMessage {
            sequence: Some(3),
            ..update
        });
        assert_eq!(h.world.get_block(5, 64, 5), 7);
    }

    #[test]
    fn test_ping_is_answered_regardless_of_role() {
        let mut h = Harness::new();
        let out = h.feed(WireMessage::unsequenced(555, MessageBody::Ping));
        assert_eq!(out[0].to, Recipient::Peer(EndpointId::from("peer-host")));
        match &out[0].message.body {
            MessageBody::Pong { echo } => assert_eq!(*echo, 555),
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[test]
    fn test_pong_feeds_clock_sync() {
        let mut h = Harness::new();
        h.now_ms = 1_100;
        h.feed(WireMessage::unsequenced(
            1_100,
            MessageBody::Pong { echo: 1_000 },
        ));
        assert_eq!(h.clock.rtt_ms(), 100);
        assert_eq!(h.clock.offset_ms(), -50);
    }

    #[test]
    fn test_error_surfaces_join_rejection() {
        let mut h = Harness::new();
        h.feed(WireMessage::unsequenced(
            0,
            MessageBody::Error {
                code: 401,
                message: "invalid password".into(),
            },
        ));
        assert!(h.events.iter().any(|e| matches!(
            e,
            SyncEvent::JoinRejected { code: 401, .. }
        )));
    }

    #[test]
    fn test_migrate_signal_names_new_host() {
        let mut h = Harness::new();
        h.feed(WireMessage::unsequenced(
            0,
            MessageBody::RelaySignal {
                event: "migrate".into(),
                host: Some(EndpointId::from("peer-b")),
                addr: None,
            },
        ));
        assert!(h.events.iter().any(|e| matches!(
            e,
            SyncEvent::MigrationSignal { host } if *host == EndpointId::from("peer-b")
        )));
    }

    #[test]
    fn test_player_leave_cleans_up() {
        let mut h = Harness::new();
        h.feed(Harness::welcome());
        h.feed(WireMessage {
            sequence: Some(2),
            timestamp: 300,
            body: MessageBody::PlayerLeave {
                id: EndpointId::from("peer-host"),
            },
        });
        assert!(h.roster.get(&EndpointId::from("peer-host")).is_none());
        assert_eq!(h.world.player_count(), 0);
    }

    #[test]
    fn test_world_sync_applies_metadata_idempotently() {
        let mut h = Harness::new();
        let sync = WireMessage {
            sequence: Some(2),
            timestamp: 300,
            body: MessageBody::WorldSync {
                time_of_day: 13_000,
                weather: "storm".into(),
            },
        };
        h.feed(sync.clone());
        h.feed(WireMessage {
            sequence: Some(3),
            ..sync
        });
        assert_eq!(h.world.time_of_day(), 13_000);
        assert_eq!(h.world.weather(), "storm");
    }

    #[test]
    fn test_stale_host_frame_is_dropped_before_application() {
        let mut h = Harness::new();
        let host = EndpointId::from("peer-host");
        let update = |seq: u64, block: u8| WireMessage {
            sequence: Some(seq),
            timestamp: 100,
            body: MessageBody::BlockUpdate {
                x: 5,
                y: 64,
                z: -3,
                block,
            },
        };

        let fresh = update(5, 7);
        assert!(admit(&mut h.peers, TransportKind::Direct, &host, &fresh));
        h.feed(fresh);
        assert_eq!(h.world.get_block(5, 64, -3), 7);

        // A replayed or reordered frame from the host must never reach
        // the world, even though the host was never formally registered
        // in the client's peer table.
        let stale = update(3, 2);
        assert!(!admit(&mut h.peers, TransportKind::Direct, &host, &stale));
        assert_eq!(h.world.get_block(5, 64, -3), 7);
    }
}
