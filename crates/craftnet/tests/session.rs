//! End-to-end session tests over real loopback sockets.
//!
//! Each test stands up full sessions (host and clients) and observes
//! state through a shared world bridge, the same way an embedding game
//! would. The relay tests run against an in-test relay stub speaking
//! the tunnel/signal wire shapes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use craftnet::{
    CraftnetError, EndpointId, MemoryWorld, MessageBody, NumericId, PlayerSnapshot, Session,
    SessionConfig, SessionStatus, WireMessage, WorldBridge,
};
use craftnet_protocol::{decode, encode};
use craftnet_session::PROTOCOL_VERSION;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A world bridge the test can inspect from outside the actor.
#[derive(Clone)]
struct SharedWorld(Arc<Mutex<MemoryWorld>>);

impl SharedWorld {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(MemoryWorld::new())))
    }

    fn with<R>(&self, f: impl FnOnce(&MemoryWorld) -> R) -> R {
        f(&self.0.lock().unwrap())
    }

    fn chat_contains(&self, sender: &str, text: &str) -> bool {
        self.with(|w| {
            w.chat()
                .iter()
                .any(|(s, t)| s == sender && t == text)
        })
    }
}

impl WorldBridge for SharedWorld {
    fn get_block(&self, x: i32, y: i32, z: i32) -> u8 {
        self.0.lock().unwrap().get_block(x, y, z)
    }

    fn set_block(&mut self, x: i32, y: i32, z: i32, block: u8, remote_origin: bool) {
        self.0.lock().unwrap().set_block(x, y, z, block, remote_origin);
    }

    fn bump_chunk_version(&mut self, chunk_x: i32, chunk_z: i32) {
        self.0.lock().unwrap().bump_chunk_version(chunk_x, chunk_z);
    }

    fn add_player(&mut self, snapshot: &PlayerSnapshot) {
        self.0.lock().unwrap().add_player(snapshot);
    }

    fn remove_player(&mut self, id: &EndpointId) {
        self.0.lock().unwrap().remove_player(id);
    }

    fn clear_players(&mut self) {
        self.0.lock().unwrap().clear_players();
    }

    fn append_chat(&mut self, sender: &str, text: &str) {
        self.0.lock().unwrap().append_chat(sender, text);
    }

    fn spawn_entity(
        &mut self,
        kind: &str,
        id: &str,
        position: [f32; 3],
        velocity: [f32; 3],
        data: &serde_json::Value,
    ) {
        self.0
            .lock()
            .unwrap()
            .spawn_entity(kind, id, position, velocity, data);
    }

    fn set_entity_velocity(&mut self, kind: &str, id: &str, velocity: [f32; 3]) {
        self.0.lock().unwrap().set_entity_velocity(kind, id, velocity);
    }

    fn remove_entity(&mut self, kind: &str, id: &str) {
        self.0.lock().unwrap().remove_entity(kind, id);
    }

    fn seed(&self) -> i64 {
        self.0.lock().unwrap().seed()
    }

    fn set_seed(&mut self, seed: i64) {
        self.0.lock().unwrap().set_seed(seed);
    }

    fn time_of_day(&self) -> u32 {
        self.0.lock().unwrap().time_of_day()
    }

    fn set_time_of_day(&mut self, time_of_day: u32) {
        self.0.lock().unwrap().set_time_of_day(time_of_day);
    }

    fn weather(&self) -> String {
        self.0.lock().unwrap().weather()
    }

    fn set_weather(&mut self, weather: &str) {
        self.0.lock().unwrap().set_weather(weather);
    }
}

/// Set `RUST_LOG=craftnet=debug` to watch a failing test negotiate.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default timeouts are tuned for real networks; shrink them so the
/// fallback paths resolve quickly under test.
fn quick_config() -> SessionConfig {
    SessionConfig {
        direct_open_timeout: Duration::from_millis(500),
        relay_register_wait: Duration::from_millis(200),
        migration_signal_wait: Duration::from_secs(5),
        error_flush_grace: Duration::from_millis(50),
        join_timeout: Duration::from_secs(3),
        position_interval: Duration::from_millis(25),
        world_sync_interval: Duration::from_millis(200),
        ping_interval: Duration::from_millis(200),
        direct_bind_addr: "127.0.0.1:0".to_string(),
        ..SessionConfig::default()
    }
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn build_session(world: SharedWorld) -> Session {
    init_tracing();
    Session::builder().config(quick_config()).world(world).build()
}

#[tokio::test]
async fn test_dedicated_join_syncs_world_and_players() {
    let host_world = SharedWorld::new();
    {
        let mut w = host_world.0.lock().unwrap();
        w.set_seed(77);
        w.set_weather("rain");
        w.set_time_of_day(6000);
    }
    let host = build_session(host_world.clone());
    let addr = host.host_game("alice", false, None).await.expect("should host");
    assert_eq!(host.status(), SessionStatus::Connected);

    let client_world = SharedWorld::new();
    let client = build_session(client_world.clone());
    client
        .join_game(addr.to_string(), "bob", None)
        .await
        .expect("join should succeed");
    assert_eq!(client.status(), SessionStatus::Connected);

    // The welcome carries the host's world metadata and roster.
    assert_eq!(client_world.with(|w| w.seed()), 77);
    assert_eq!(client_world.with(|w| w.weather()), "rain");
    wait_until("both sides see two players", || {
        host_world.with(|w| w.player_count()) == 2
            && client_world.with(|w| w.player_count()) == 2
    })
    .await;
}

#[tokio::test]
async fn test_chat_flows_host_and_client_both_ways() {
    let host_world = SharedWorld::new();
    let host = build_session(host_world.clone());
    let addr = host.host_game("alice", false, None).await.expect("should host");

    let client_world = SharedWorld::new();
    let client = build_session(client_world.clone());
    client
        .join_game(addr.to_string(), "bob", None)
        .await
        .expect("join should succeed");

    client.send_chat("hello").await.expect("chat should queue");
    wait_until("client chat reaches host world", || {
        host_world.chat_contains("bob", "hello")
    })
    .await;

    host.send_chat("welcome aboard").await.expect("chat should queue");
    wait_until("host chat reaches client world", || {
        client_world.chat_contains("alice", "welcome aboard")
    })
    .await;
}

#[tokio::test]
async fn test_blocks_and_moves_propagate_to_second_client() {
    let host_world = SharedWorld::new();
    let host = build_session(host_world.clone());
    let addr = host.host_game("alice", false, None).await.expect("should host");

    let world_b = SharedWorld::new();
    let client_b = build_session(world_b.clone());
    client_b
        .join_game(addr.to_string(), "bob", None)
        .await
        .expect("first join should succeed");

    let world_c = SharedWorld::new();
    let client_c = build_session(world_c.clone());
    client_c
        .join_game(addr.to_string(), "carol", None)
        .await
        .expect("second join should succeed");

    client_b
        .place_block(5, 64, -3, 42)
        .await
        .expect("place should queue");
    wait_until("block reaches host world", || {
        host_world.with(|w| w.get_block(5, 64, -3)) == 42
    })
    .await;
    wait_until("block reaches the other client", || {
        world_c.with(|w| w.get_block(5, 64, -3)) == 42
    })
    .await;

    let bob_id = EndpointId::from(
        client_b.local_id().await.expect("should have id").as_str(),
    );
    client_b
        .send_move([10.0, 65.0, -4.0], 1.0, 0.0, 18)
        .await
        .expect("move should queue");
    wait_until("position reaches the other client", || {
        world_c.with(|w| {
            w.player(&bob_id)
                .is_some_and(|p| p.position[0] == 10.0 && p.health == 18)
        })
    })
    .await;

    client_b.break_block(5, 64, -3).await.expect("break should queue");
    wait_until("removal reaches host world", || {
        host_world.with(|w| w.get_block(5, 64, -3)) == 0
    })
    .await;
}

#[tokio::test]
async fn test_join_with_wrong_password_rejected_then_retry_succeeds() {
    let host = build_session(SharedWorld::new());
    let addr = host
        .host_game("alice", false, Some("sekrit".into()))
        .await
        .expect("should host");

    let client = build_session(SharedWorld::new());
    let err = client
        .join_game(addr.to_string(), "mallory", Some("wrong".into()))
        .await
        .expect_err("wrong password must be refused");
    match err {
        CraftnetError::JoinRejected { code, .. } => assert_eq!(code, 401),
        other => panic!("unexpected error: {other}"),
    }

    client
        .join_game(addr.to_string(), "mallory", Some("sekrit".into()))
        .await
        .expect("correct password should succeed");
    assert_eq!(client.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_version_skew_warns_by_default() {
    let host = build_session(SharedWorld::new());
    let addr = host.host_game("alice", false, None).await.expect("should host");

    let mut config = quick_config();
    config.protocol_version = 2;
    let mut client = Session::builder()
        .config(config)
        .world(SharedWorld::new())
        .build();
    let mut warnings = client.take_warnings().expect("warnings stream");
    client
        .join_game(addr.to_string(), "old-bob", None)
        .await
        .expect("skewed version should still join under warn policy");

    let warning = tokio::time::timeout(Duration::from_secs(2), warnings.recv())
        .await
        .expect("warning should arrive")
        .expect("stream should stay open");
    assert!(warning.contains("protocol"), "got: {warning}");
}

#[tokio::test]
async fn test_peer_join_without_relay_fails_fast() {
    let client = build_session(SharedWorld::new());
    let err = client
        .join_game("some-peer-code", "bob", None)
        .await
        .expect_err("peer join needs a relay");
    assert!(matches!(err, CraftnetError::Transport(_)));
    assert!(matches!(client.status(), SessionStatus::Error(_)));
}

// -- relay-backed sessions --

/// Minimal relay speaking the hello/tunnel/signal shapes: tunnels are
/// forwarded to the addressee, signals fan out to everyone else.
async fn spawn_relay_stub() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let members: Arc<tokio::sync::Mutex<HashMap<String, mpsc::UnboundedSender<String>>>> =
        Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let members = Arc::clone(&members);
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();

                let hello: serde_json::Value = match source.next().await {
                    Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
                    _ => return,
                };
                let my_id = hello["id"].as_str().unwrap().to_string();

                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                members.lock().await.insert(my_id.clone(), tx.clone());

                tokio::spawn(async move {
                    while let Some(text) = rx.recv().await {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                });

                while let Some(Ok(Message::Text(text))) = source.next().await {
                    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                    match frame["type"].as_str() {
                        Some("tunnel") => {
                            let out = serde_json::json!({
                                "type": "tunneled",
                                "from": my_id,
                                "payload": frame["payload"],
                            });
                            if let Some(peer) = members
                                .lock()
                                .await
                                .get(frame["to"].as_str().unwrap_or(""))
                            {
                                let _ = peer.send(out.to_string());
                            }
                        }
                        Some("signal") => {
                            let out = serde_json::json!({
                                "type": "signal",
                                "from": my_id,
                                "payload": frame["payload"],
                            });
                            for (id, peer) in members.lock().await.iter() {
                                if *id != my_id {
                                    let _ = peer.send(out.to_string());
                                }
                            }
                        }
                        _ => {}
                    }
                }
                // A reconnecting member may have replaced this entry.
                let mut guard = members.lock().await;
                if guard.get(&my_id).is_some_and(|cur| cur.same_channel(&tx)) {
                    guard.remove(&my_id);
                }
            });
        }
    });

    addr
}

fn build_relay_session(world: SharedWorld, relay: std::net::SocketAddr) -> Session {
    init_tracing();
    Session::builder()
        .config(quick_config())
        .world(world)
        .relay_url(format!("ws://{relay}"))
        .build()
}

#[tokio::test]
async fn test_peer_join_negotiates_direct_channel_via_relay() {
    let relay = spawn_relay_stub().await;

    let host_world = SharedWorld::new();
    let host = build_relay_session(host_world.clone(), relay);
    host.host_game("ann", false, None).await.expect("should host");
    let code = host.local_id().await.expect("should have a session code");

    let client_world = SharedWorld::new();
    let client = build_relay_session(client_world.clone(), relay);
    client
        .join_game(code, "ben", None)
        .await
        .expect("peer join should succeed");
    assert_eq!(client.status(), SessionStatus::Connected);

    client.send_chat("over the wire").await.expect("chat should queue");
    wait_until("chat reaches host world", || {
        host_world.chat_contains("ben", "over the wire")
    })
    .await;
}

#[tokio::test]
async fn test_host_pings_registered_peers() {
    let host = build_session(SharedWorld::new());
    let addr = host.host_game("alice", false, None).await.expect("should host");

    // A bare socket peer: join, then just listen.
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("dial should succeed");
    let (mut sink, mut source) = ws.split();
    let join = WireMessage::unsequenced(
        1,
        MessageBody::Join {
            id: EndpointId::from("peer-walt"),
            name: "walt".into(),
            password: None,
            protocol_version: PROTOCOL_VERSION,
            token: None,
            uuid: None,
        },
    );
    sink.send(Message::Binary(encode(&join).unwrap().into()))
        .await
        .expect("join should send");

    let saw_ping = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(Ok(frame)) = source.next().await {
            if let Message::Binary(data) = frame {
                if matches!(decode(&data), Ok(msg) if msg.body == MessageBody::Ping) {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(saw_ping, "host should ping its peers to measure latency");
}

/// A relay-resident host that welcomes joins through the tunnel but
/// never offers a direct address.
async fn spawn_tunnel_only_host(relay: std::net::SocketAddr, host_id: &str) {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{relay}"))
        .await
        .expect("relay should accept the host");
    let (mut sink, mut source) = ws.split();
    let hello = serde_json::json!({"type": "hello", "room": host_id, "id": host_id});
    sink.send(Message::Text(hello.to_string().into()))
        .await
        .expect("hello should send");

    tokio::spawn(async move {
        while let Some(Ok(Message::Text(text))) = source.next().await {
            let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
            if frame["type"] != "tunneled" {
                // request_direct signals go unanswered
                continue;
            }
            let bytes: Vec<u8> = frame["payload"]
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|v| v as u8).collect())
                .unwrap_or_default();
            let Ok(msg) = decode(&bytes) else { continue };
            if let MessageBody::Join { id, name, .. } = msg.body {
                let welcome = WireMessage {
                    sequence: Some(1),
                    timestamp: 1,
                    body: MessageBody::Welcome {
                        player_id: id.clone(),
                        nid: NumericId(1),
                        players: vec![PlayerSnapshot {
                            id,
                            nid: NumericId(1),
                            name,
                            position: [0.0, 64.0, 0.0],
                            yaw: 0.0,
                            pitch: 0.0,
                            health: 20,
                            dimension: "overworld".into(),
                        }],
                        seed: 9,
                        time_of_day: 0,
                        weather: "clear".into(),
                    },
                };
                let out = serde_json::json!({
                    "type": "tunnel",
                    "to": frame["from"],
                    "payload": encode(&welcome).unwrap(),
                });
                let _ = sink.send(Message::Text(out.to_string().into())).await;
            }
        }
    });
}

#[tokio::test]
async fn test_direct_stall_falls_back_to_relay_only_join() {
    let relay = spawn_relay_stub().await;
    spawn_tunnel_only_host(relay, "relay-host-9").await;

    let client_world = SharedWorld::new();
    let client = build_relay_session(client_world.clone(), relay);
    client
        .join_game("relay-host-9", "ben", None)
        .await
        .expect("join should complete through the tunnel");
    assert_eq!(client.status(), SessionStatus::Connected);
    assert_eq!(client_world.with(|w| w.seed()), 9);
}

#[tokio::test]
async fn test_host_loss_elects_and_rejoins_surviving_peers() {
    let relay = spawn_relay_stub().await;

    let host = build_relay_session(SharedWorld::new(), relay);
    host.host_game("hostess", false, None).await.expect("should host");
    let code = host.local_id().await.expect("should have a session code");

    let world_a = SharedWorld::new();
    let a = build_relay_session(world_a.clone(), relay);
    a.join_game(code.clone(), "ann", None).await.expect("ann should join");

    let world_b = SharedWorld::new();
    let b = build_relay_session(world_b.clone(), relay);
    b.join_game(code, "ben", None).await.expect("ben should join");

    // Both clients need the roster broadcast before the host dies, or
    // they cannot agree on the electorate.
    wait_until("both clients know each other", || {
        world_a.with(|w| w.player_count()) == 3
            && world_b.with(|w| w.player_count()) == 3
    })
    .await;

    host.disconnect().await.expect("host should disconnect");

    // One of the two promotes itself, the other follows its migrate
    // signal into the new session.
    wait_until("both survivors reconnect", || {
        a.status() == SessionStatus::Connected && b.status() == SessionStatus::Connected
    })
    .await;

    a.send_chat("still here").await.expect("chat should queue");
    b.send_chat("me too").await.expect("chat should queue");
    wait_until("chat flows in the migrated session", || {
        world_a.chat_contains("ben", "me too") && world_b.chat_contains("ann", "still here")
    })
    .await;
}
