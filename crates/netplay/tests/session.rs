//! Integration tests for the session loop.
//!
//! Servers and clients run over a `MemoryNetwork` and are ticked by hand,
//! so every step of a round trip can be checked in between. The last few
//! tests spawn the loop on a paused Tokio clock.

use std::time::Duration;

use netplay::prelude::*;
use netplay::protocol::ProtocolError;
use netplay::MessageCodec;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// =========================================================================
// Game fixture
// =========================================================================

#[derive(Debug, Default)]
struct Game {
    joined: Vec<String>,
    teams: Vec<Team>,
    acks: u32,
    chat: Vec<String>,
}

/// Client → server. The server answers with the player's team.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Join {
    name: String,
}

impl Message for Join {
    const TYPE: u8 = 1;
}

impl Handler<Game> for Join {
    fn handle_server(
        self,
        cx: &mut HandlerContext<'_, Game>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        cx.context_mut().joined.push(self.name);
        cx.send_game_message_to(SetTeam { team: sender.team }, sender.address)
    }
}

/// Server → client. The client acknowledges.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SetTeam {
    team: Team,
}

impl Message for SetTeam {
    const TYPE: u8 = 2;

    fn important(&self) -> bool {
        true
    }
}

impl Handler<Game> for SetTeam {
    fn handle_client(self, cx: &mut HandlerContext<'_, Game>) -> Result<(), NetplayError> {
        cx.context_mut().teams.push(self.team);
        cx.send_game_message(Ack)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ack;

impl Message for Ack {
    const TYPE: u8 = 3;
}

impl Handler<Game> for Ack {
    fn handle_server(
        self,
        cx: &mut HandlerContext<'_, Game>,
        _sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        cx.context_mut().acks += 1;
        Ok(())
    }
}

/// Relayed by the server to everyone but the author.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Chat {
    text: String,
}

impl Message for Chat {
    const TYPE: u8 = 4;
}

impl Handler<Game> for Chat {
    fn handle_server(
        self,
        cx: &mut HandlerContext<'_, Game>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        cx.send_game_message_except(self, sender.address)
    }

    fn handle_client(self, cx: &mut HandlerContext<'_, Game>) -> Result<(), NetplayError> {
        cx.context_mut().chat.push(self.text);
        Ok(())
    }
}

/// Always rejected by the server.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Cheat;

impl Message for Cheat {
    const TYPE: u8 = 5;
}

impl Handler<Game> for Cheat {
    fn handle_server(
        self,
        _cx: &mut HandlerContext<'_, Game>,
        _sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        Err(NetplayError::handler("cheating detected"))
    }
}

// =========================================================================
// Helpers
// =========================================================================

type Session = SessionLoop<MemoryTransport, Game>;

const SERVER_PORT: u16 = 1;

fn addr(port: u16) -> PeerAddress {
    PeerAddress::from(std::net::SocketAddr::from(([127, 0, 0, 1], port)))
}

fn builder() -> SessionBuilder<Game> {
    SessionBuilder::new()
        .log_stats(false)
        .register::<Join>()
        .register::<SetTeam>()
        .register::<Ack>()
        .register::<Chat>()
        .register::<Cheat>()
}

fn server(net: &MemoryNetwork) -> Session {
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    builder().server().build(transport, Game::default())
}

fn client(net: &MemoryNetwork, port: u16) -> Session {
    let transport = net.endpoint(addr(port)).unwrap();
    transport.connect(addr(SERVER_PORT)).unwrap();
    builder().client().build(transport, Game::default())
}

fn encode<M: Message>(message: M) -> Vec<u8> {
    MessageCodec::new().encode(&message).unwrap()
}

// =========================================================================
// Round trips
// =========================================================================

#[test]
fn test_connection_events_admit_players_in_order() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let mut clients: Vec<Session> = (10..14).map(|port| client(&net, port)).collect();

    let outcome = server.tick();
    assert_eq!(outcome.events, 4);

    let teams: Vec<Team> = server.registry().players().map(|p| p.team).collect();
    assert_eq!(teams, vec![Team::Team1, Team::Team2, Team::Team3, Team::Team4]);

    for client in &mut clients {
        assert_eq!(client.tick().events, 1, "ConnectionAccepted");
    }
}

#[test]
fn test_server_reply_is_sent_in_same_tick() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let mut ann = client(&net, 10);
    server.tick();
    ann.tick();

    // Application thread queues a join; the next client tick sends it.
    assert!(ann.outbound().enqueue(Join { name: "ann".into() }));
    assert_eq!(ann.tick().transmitted, 1);

    // The server handles it and replies synchronously.
    let outcome = server.tick();
    assert_eq!(outcome.packets, 1);
    assert_eq!(server.context().joined, vec!["ann".to_string()]);
    assert_eq!(net.pending(addr(10)), 1, "SetTeam already on the wire");
}

#[test]
fn test_client_reply_goes_through_queue() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let mut ann = client(&net, 10);
    server.tick();
    ann.tick();

    ann.outbound().enqueue(Join { name: "ann".into() });
    ann.tick();
    server.tick();

    // Client handles SetTeam; its Ack is queued, not sent.
    let outcome = ann.tick();
    assert_eq!(outcome.packets, 1);
    assert_eq!(ann.context().teams, vec![Team::Team1]);
    assert_eq!(ann.outbound().len(), 1);
    assert_eq!(net.pending(addr(SERVER_PORT)), 0);

    // Next drain sends it.
    assert_eq!(ann.tick().transmitted, 1);
    server.tick();
    assert_eq!(server.context().acks, 1);
}

#[test]
fn test_relay_except_skips_author() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let mut clients: Vec<Session> = (10..13).map(|port| client(&net, port)).collect();
    server.tick();

    clients[0].outbound().enqueue(Chat { text: "gg".into() });
    for client in &mut clients {
        client.tick();
    }
    server.tick();
    for client in &mut clients {
        client.tick();
    }

    assert!(clients[0].context().chat.is_empty());
    assert_eq!(clients[1].context().chat, vec!["gg".to_string()]);
    assert_eq!(clients[2].context().chat, vec!["gg".to_string()]);
}

#[test]
fn test_send_game_message_to_reaches_only_target() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let mut a = client(&net, 10);
    let mut b = client(&net, 11);
    server.tick();
    a.tick();
    b.tick();

    server
        .send_game_message_to(Chat { text: "psst".into() }, Target::Peer(addr(11)))
        .unwrap();
    a.tick();
    b.tick();

    assert!(a.context().chat.is_empty());
    assert_eq!(b.context().chat, vec!["psst".to_string()]);
    assert_eq!(server.stats().total_sent(), 1);
}

#[test]
fn test_queued_message_to_gone_peer_is_dropped() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    server
        .outbound()
        .enqueue_for(Chat { text: "hello?".into() }, addr(99));

    let outcome = server.tick();
    assert_eq!(outcome.transmitted, 0);
    assert!(server.outbound().is_empty());
}

// =========================================================================
// Capacity and connection loss
// =========================================================================

#[test]
fn test_fifth_connection_refused() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let mut clients: Vec<Session> = (10..15).map(|port| client(&net, port)).collect();

    server.tick();
    assert_eq!(server.registry().len(), 4);
    assert!(server.registry().lookup(addr(14)).is_none());
    assert!(!net.is_linked(addr(SERVER_PORT), addr(14)));
    assert!(net.is_linked(addr(SERVER_PORT), addr(13)));

    // The refused client sees accepted, then disconnected.
    let refused = clients.last_mut().unwrap();
    assert_eq!(refused.tick().events, 2);
}

#[test]
fn test_max_players_limits_registry() {
    let net = MemoryNetwork::new();
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    let mut server = builder().max_players(2).build(transport, Game::default());
    let _clients: Vec<Session> = (10..13).map(|port| client(&net, port)).collect();

    server.tick();
    assert_eq!(server.registry().len(), 2);
    assert!(!net.is_linked(addr(SERVER_PORT), addr(12)));
}

#[test]
fn test_connection_lost_removes_only_that_player() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let _clients: Vec<Session> = (10..13).map(|port| client(&net, port)).collect();
    server.tick();

    assert!(net.sever(addr(SERVER_PORT), addr(11)));
    server.tick();

    let registry = server.registry();
    assert!(registry.lookup(addr(11)).is_none());
    assert_eq!(registry.lookup(addr(10)).unwrap().team, Team::Team1);
    assert_eq!(registry.lookup(addr(12)).unwrap().team, Team::Team3);

    // The freed slot goes to the next newcomer.
    let _late = client(&net, 20);
    server.tick();
    assert_eq!(server.registry().lookup(addr(20)).unwrap().team, Team::Team2);
}

#[test]
fn test_client_drop_frees_slot() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let ann = client(&net, 10);
    server.tick();
    assert_eq!(server.registry().len(), 1);

    drop(ann);
    server.tick();
    assert!(server.registry().is_empty());
}

// =========================================================================
// Bad input never stops the loop
// =========================================================================

#[test]
fn test_bad_packets_are_dropped_and_loop_continues() {
    let net = MemoryNetwork::new();
    let mut server = server(&net);
    let _ann = client(&net, 10);
    server.tick();

    let from = addr(10);
    let to = addr(SERVER_PORT);
    // Unknown message id.
    net.inject(to, from, vec![200, 0, 0, 0, 0]);
    // Declared length far over the limit.
    let mut oversized = vec![Join::TYPE];
    oversized.extend_from_slice(&1_000_000u32.to_le_bytes());
    net.inject(to, from, oversized);
    // Truncated header.
    net.inject(to, from, vec![Join::TYPE, 4]);
    // Garbage after a valid payload.
    let mut trailing = encode(Join { name: "x".into() });
    trailing.push(0xFF);
    net.inject(to, from, trailing);
    // Rejected by its handler.
    net.inject(to, from, encode(Cheat));
    // Finally a good one.
    net.inject(to, from, encode(Join { name: "ann".into() }));

    let outcome = server.tick();
    assert_eq!(outcome.packets, 6);
    assert_eq!(server.context().joined, vec!["ann".to_string()]);
    assert_eq!(server.stats().total_received(), 6);
}

#[test]
fn test_oversized_outgoing_message_is_not_sent() {
    let net = MemoryNetwork::new();
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    let mut server = builder().max_payload(8).build(transport, Game::default());
    let _ann = client(&net, 10);
    server.tick();

    let result = server.send_game_message(Chat {
        text: "this does not fit".into(),
    });
    assert!(matches!(
        result,
        Err(NetplayError::Protocol(ProtocolError::MessageTooLarge { max: 8, .. }))
    ));
    assert_eq!(net.pending(addr(10)), 1, "only ConnectionAccepted");
}

// =========================================================================
// Stats
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_tick_reports_stats_each_window() {
    let net = MemoryNetwork::new();
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    let mut server = builder()
        .stats_window(Duration::from_millis(100))
        .build(transport, Game::default());

    assert!(server.tick().stats.is_none());
    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(server.tick().stats.is_none());
    tokio::time::advance(Duration::from_millis(50)).await;

    let report = server.tick().stats.expect("window closed");
    assert_eq!(report.window, Duration::from_millis(100));
    assert!((report.ticks_per_sec - 30.0).abs() < 1e-9);
}

#[test]
fn test_default_stats_window_is_one_second() {
    let config = SessionConfig::default();
    assert_eq!(config.stats_window, Duration::from_secs(1));
    assert!(config.log_stats);
}

// =========================================================================
// Spawned loop lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_spawned_loop_runs_and_stops() {
    let net = MemoryNetwork::new();
    let server = server(&net);
    let mut ann = client(&net, 10);
    assert_eq!(server.state(), LoopState::Idle);

    let mut states = server.subscribe();
    let handle = server.spawn();
    states
        .wait_for(|s| *s == LoopState::Running)
        .await
        .expect("loop alive");

    // Let the server admit the client, then talk to it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    ann.tick();
    ann.outbound().enqueue(Join { name: "ann".into() });
    ann.tick();
    tokio::time::sleep(Duration::from_millis(20)).await;
    ann.tick();
    assert_eq!(ann.context().teams, vec![Team::Team1]);

    let queue = handle.outbound();
    handle.stop();
    let server = handle.join().await.expect("loop task");

    assert_eq!(server.state(), LoopState::Stopped);
    assert_eq!(server.context().joined, vec!["ann".to_string()]);
    assert!(queue.is_closed());
    assert!(!queue.enqueue(Chat { text: "too late".into() }));
}

#[tokio::test(start_paused = true)]
async fn test_external_token_stops_loop() {
    let net = MemoryNetwork::new();
    let token = CancellationToken::new();
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    let server = builder()
        .cancel_token(token.clone())
        .build(transport, Game::default());

    let handle = server.spawn();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.state(), LoopState::Running);

    token.cancel();
    let mut server = handle.join().await.expect("loop task");
    assert_eq!(server.state(), LoopState::Stopped);

    // A stopped loop does not start again.
    server.run().await;
    assert_eq!(server.state(), LoopState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_messages_pending_at_stop_are_discarded() {
    let net = MemoryNetwork::new();
    let token = CancellationToken::new();
    token.cancel();
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    let mut server = builder()
        .cancel_token(token)
        .build(transport, Game::default());
    let _ann = client(&net, 10);

    server.outbound().enqueue(Chat { text: "never sent".into() });
    server.run().await;

    assert_eq!(server.state(), LoopState::Stopped);
    assert!(server.outbound().is_empty());
    assert_eq!(server.stats().total_sent(), 0);
    assert_eq!(net.pending(addr(10)), 1, "only ConnectionAccepted");
}

// =========================================================================
// Context types
// =========================================================================

fn bare_session<Ctx: Default + 'static>(net: &MemoryNetwork) -> SessionLoop<MemoryTransport, Ctx> {
    let transport = net.endpoint(addr(SERVER_PORT)).unwrap();
    SessionBuilder::new()
        .log_stats(false)
        .build(transport, Ctx::default())
}

#[test]
fn test_builder_accepts_any_owned_context() {
    let net = MemoryNetwork::new();
    let mut session = bare_session::<Vec<String>>(&net);
    let _ann = client(&net, 10);

    assert_eq!(session.tick().events, 1);
    session.context_mut().push("lobby".into());
    assert_eq!(session.context(), &vec!["lobby".to_string()]);
    assert_eq!(session.registry().len(), 1);
}
