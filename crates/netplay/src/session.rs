//! The session loop: the network side of a netplay process.
//!
//! One loop owns the transport and the [`PacketDispatcher`]. Each tick it:
//!
//! 1. drains the [`OutboundQueue`] and transmits every message,
//! 2. polls the transport until it is empty, dispatching packets and
//!    applying connection events to the registry,
//! 3. updates the throughput stats.
//!
//! ## Lifecycle
//!
//! ```text
//! build() ──→ [Idle] ──run()──→ [Running] ──cancel──→ [Stopping] ──→ [Stopped]
//!                                   │  ▲
//!                                   └──┘ tick every 1/tick_rate
//! ```
//!
//! Cancellation is checked at the top of every tick. A tick that has
//! started always finishes. Once the loop stops the queue is closed, so
//! anything enqueued afterwards is discarded.

use std::time::Duration;

use netplay_protocol::{Message, MessageCodec, DEFAULT_MAX_PAYLOAD};
use netplay_registry::{ConnectionRegistry, MAX_PLAYERS};
use netplay_tick::{TickConfig, TickScheduler};
use netplay_transport::{PeerAddress, Target, Transport, TransportEvent};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    Dispatched, Handler, MessageFactory, NetplayError, OutboundQueue,
    PacketDispatcher, Role, SessionStats, StatsReport,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for one session loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    /// Loop pacing.
    pub tick: TickConfig,
    /// Largest payload sent or accepted, in bytes.
    pub max_payload_len: usize,
    /// Concurrent players before new connections are refused.
    pub max_players: usize,
    /// Length of one stats window.
    pub stats_window: Duration,
    /// Log a stats line at the end of every window.
    pub log_stats: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            tick: TickConfig::default(),
            max_payload_len: DEFAULT_MAX_PAYLOAD,
            max_players: MAX_PLAYERS,
            stats_window: Duration::from_secs(1),
            log_stats: true,
        }
    }
}

impl SessionConfig {
    /// Clamps out-of-range values, warning about each one.
    pub fn validated(mut self) -> Self {
        if self.max_players == 0 || self.max_players > MAX_PLAYERS {
            let clamped = self.max_players.clamp(1, MAX_PLAYERS);
            tracing::warn!(
                requested = self.max_players,
                using = clamped,
                "max_players out of range"
            );
            self.max_players = clamped;
        }
        if self.max_payload_len == 0 {
            tracing::warn!("max_payload_len is 0, using default");
            self.max_payload_len = DEFAULT_MAX_PAYLOAD;
        }
        if self.stats_window.is_zero() {
            tracing::warn!("stats_window is 0, using 1s");
            self.stats_window = Duration::from_secs(1);
        }
        self.tick = self.tick.validated();
        self
    }
}

/// Where a session loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`SessionLoop`].
///
/// # Example
///
/// ```rust,ignore
/// let session = SessionBuilder::new()
///     .client()
///     .tick_rate(100)
///     .register::<Chat>()
///     .build(transport, Lobby::default());
/// let handle = session.spawn();
/// handle.outbound().enqueue(Chat { text: "hi".into() });
/// ```
pub struct SessionBuilder<Ctx> {
    config: SessionConfig,
    factory: MessageFactory<Ctx>,
    cancel: Option<CancellationToken>,
}

impl<Ctx: 'static> Default for SessionBuilder<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: 'static> SessionBuilder<Ctx> {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            factory: MessageFactory::new(),
            cancel: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    pub fn server(self) -> Self {
        self.role(Role::Server)
    }

    pub fn client(self) -> Self {
        self.role(Role::Client)
    }

    pub fn tick_rate(mut self, hz: u32) -> Self {
        self.config.tick.tick_rate_hz = hz;
        self
    }

    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.config.max_payload_len = bytes;
        self
    }

    pub fn max_players(mut self, players: usize) -> Self {
        self.config.max_players = players;
        self
    }

    pub fn stats_window(mut self, window: Duration) -> Self {
        self.config.stats_window = window;
        self
    }

    pub fn log_stats(mut self, enabled: bool) -> Self {
        self.config.log_stats = enabled;
        self
    }

    /// Stops the loop when `token` is cancelled. Without one the loop
    /// creates its own, reachable through [`SessionLoop::cancel_token`].
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Registers a message type the session can receive.
    pub fn register<M: Handler<Ctx> + Default>(mut self) -> Self {
        self.factory.register::<M>();
        self
    }

    /// Builds the loop around `transport`, with `context` as the state
    /// every handler sees.
    pub fn build<T: Transport>(self, transport: T, context: Ctx) -> SessionLoop<T, Ctx> {
        let config = self.config.validated();
        let queue = OutboundQueue::new();
        let dispatcher = PacketDispatcher::new(config.role, self.factory, context)
            .with_codec(MessageCodec::with_max_payload(config.max_payload_len))
            .with_registry(ConnectionRegistry::with_capacity(config.max_players))
            .with_queue(queue.clone())
            .with_stats(
                SessionStats::new(config.stats_window).with_logging(config.log_stats),
            );
        let (state, _) = watch::channel(LoopState::Idle);

        tracing::debug!(
            role = ?config.role,
            rate_hz = config.tick.tick_rate_hz,
            messages = dispatcher.factory().len(),
            "session built"
        );
        SessionLoop {
            transport,
            dispatcher,
            queue,
            config,
            cancel: self.cancel.unwrap_or_default(),
            state,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionLoop
// ---------------------------------------------------------------------------

/// What one call to [`SessionLoop::tick`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Queued messages sent this tick.
    pub transmitted: usize,
    /// Packets received and passed to the dispatcher.
    pub packets: usize,
    /// Connection events processed.
    pub events: usize,
    /// Set when this tick closed a stats window.
    pub stats: Option<StatsReport>,
}

/// The per-process network loop.
pub struct SessionLoop<T, Ctx> {
    transport: T,
    dispatcher: PacketDispatcher<Ctx>,
    queue: OutboundQueue,
    config: SessionConfig,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
}

impl<T: Transport, Ctx: 'static> SessionLoop<T, Ctx> {
    /// Handle for application code to queue messages on.
    pub fn outbound(&self) -> OutboundQueue {
        self.queue.clone()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn dispatcher(&self) -> &PacketDispatcher<Ctx> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut PacketDispatcher<Ctx> {
        &mut self.dispatcher
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        self.dispatcher.registry()
    }

    pub fn context(&self) -> &Ctx {
        self.dispatcher.context()
    }

    pub fn context_mut(&mut self) -> &mut Ctx {
        self.dispatcher.context_mut()
    }

    pub fn stats(&self) -> &SessionStats {
        self.dispatcher.stats()
    }

    /// Encodes and sends `message` to every peer now, bypassing the queue.
    ///
    /// For code already on the loop's side, e.g. between manual ticks.
    pub fn send_game_message<M: Message>(&mut self, message: M) -> Result<(), NetplayError> {
        self.send_game_message_to(message, Target::All)
    }

    /// Encodes and sends `message` to `target` now, bypassing the queue.
    pub fn send_game_message_to<M: Message>(
        &mut self,
        message: M,
        target: Target,
    ) -> Result<(), NetplayError> {
        self.dispatcher
            .send_game_message_to(&self.transport, &message, target)
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "session state changed");
        }
    }

    /// Runs one loop iteration. See the module docs for the steps.
    ///
    /// Never fails: bad packets and failed sends are logged and dropped.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for outgoing in self.queue.drain_all() {
            match self.dispatcher.send_game_message_to(
                &self.transport,
                outgoing.message.as_ref(),
                outgoing.target,
            ) {
                Ok(()) => outcome.transmitted += 1,
                Err(e) => tracing::debug!(
                    message_type = outgoing.message.message_type(),
                    target = ?outgoing.target,
                    error = %e,
                    "queued message undeliverable, dropped"
                ),
            }
        }

        while let Some(event) = self.transport.receive() {
            if matches!(event, TransportEvent::Packet { .. }) {
                outcome.packets += 1;
            } else {
                outcome.events += 1;
            }
            self.handle_event(event);
        }

        outcome.stats = self.dispatcher.stats_mut().on_tick(Instant::now());
        outcome
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Packet { from, data } => self.dispatch(&data, from),
            TransportEvent::NewIncomingConnection(peer) => {
                if self.config.role != Role::Server {
                    tracing::debug!(%peer, "incoming connection on a client");
                    return;
                }
                // Refusal is logged inside.
                if let Ok(resolved) = self.dispatcher.admit(&self.transport, peer) {
                    tracing::info!(player = %resolved.player(), "new incoming connection");
                }
            }
            TransportEvent::ConnectionAccepted(peer) => {
                tracing::info!(%peer, "connection accepted");
            }
            TransportEvent::NoFreeIncomingConnections(peer) => {
                tracing::warn!(%peer, "server is full");
            }
            TransportEvent::DisconnectionNotification(peer) => {
                self.player_left(peer, "disconnected");
            }
            TransportEvent::ConnectionLost(peer) => {
                self.player_left(peer, "connection lost");
            }
        }
    }

    fn dispatch(&mut self, data: &[u8], from: PeerAddress) {
        match self.dispatcher.handle(&self.transport, data, from) {
            Ok(Dispatched::Handled(_) | Dispatched::Ignored(_)) => {}
            Err(NetplayError::Protocol(e)) if e.is_malformed() => {
                tracing::warn!(%from, error = %e, "dropping malformed packet");
            }
            Err(NetplayError::Registry(e)) => {
                tracing::warn!(%from, error = %e, "dropping packet from refused peer");
            }
            Err(e) => {
                tracing::warn!(%from, error = %e, "message handler failed");
            }
        }
    }

    fn player_left(&mut self, peer: PeerAddress, reason: &str) {
        match self.dispatcher.drop_player(peer) {
            Some(player) => tracing::info!(%player, reason, "player left"),
            None => tracing::debug!(%peer, reason, "unknown peer left"),
        }
    }

    /// Runs the loop until the cancellation token fires.
    ///
    /// A loop runs once: calling this again after it stopped returns
    /// immediately.
    pub async fn run(&mut self) {
        if self.state() != LoopState::Idle {
            tracing::warn!(state = ?self.state(), "session loop already ran");
            return;
        }
        self.set_state(LoopState::Running);
        tracing::info!(role = ?self.config.role, "session loop running");

        let cancel = self.cancel.clone();
        let mut scheduler = TickScheduler::new(self.config.tick.clone());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = scheduler.wait_for_tick() => {}
            }
            self.tick();
            scheduler.record_tick_end();
        }

        self.set_state(LoopState::Stopping);
        let discarded = self.queue.close();
        if discarded > 0 {
            tracing::debug!(discarded, "pending messages discarded on shutdown");
        }
        self.set_state(LoopState::Stopped);
        tracing::info!(ticks = scheduler.tick_count(), "session loop stopped");
    }
}

impl<T, Ctx> SessionLoop<T, Ctx>
where
    T: Transport,
    Ctx: Send + 'static,
{
    /// Runs the loop on a Tokio task.
    pub fn spawn(mut self) -> SessionHandle<T, Ctx> {
        let state = self.subscribe();
        let cancel = self.cancel_token();
        let queue = self.outbound();
        let task = tokio::spawn(async move {
            self.run().await;
            self
        });
        SessionHandle {
            state,
            cancel,
            queue,
            task,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Control handle for a spawned [`SessionLoop`].
pub struct SessionHandle<T, Ctx> {
    state: watch::Receiver<LoopState>,
    cancel: CancellationToken,
    queue: OutboundQueue,
    task: JoinHandle<SessionLoop<T, Ctx>>,
}

impl<T, Ctx> SessionHandle<T, Ctx> {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Asks the loop to stop after its current tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn outbound(&self) -> OutboundQueue {
        self.queue.clone()
    }

    /// Waits for the loop to finish and takes it back.
    pub async fn join(self) -> Result<SessionLoop<T, Ctx>, JoinError> {
        self.task.await
    }
}
