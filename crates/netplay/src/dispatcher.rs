//! The packet dispatcher: raw packet in, handler call out.
//!
//! For every received packet the dispatcher:
//!
//! 1. reads the type byte and asks the [`MessageFactory`] for an instance.
//!    Unknown ids are logged and ignored.
//! 2. splits off the payload with the [`MessageCodec`] and decodes the
//!    fields into the instance.
//! 3. resolves the sending address to a player in the
//!    [`ConnectionRegistry`], admitting it on first contact.
//! 4. hands the message to its server-side or client-side handler.
//!
//! Nothing here panics on bad input. Every failure comes back as a
//! [`NetplayError`] for the session loop to log.

use netplay_protocol::{AnyMessage, MessageCodec, ProtocolError, HEADER_LEN};
use netplay_registry::{ConnectionRegistry, PlayerAddress, Resolved};
use netplay_transport::{
    Delivery, PeerAddress, Priority, Target, Transport,
};

use crate::{
    HandlerContext, MessageFactory, NetplayError, OutboundQueue, Role,
    SessionStats,
};

/// What happened to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Decoded and handled; carries the message type id.
    Handled(u8),
    /// Unrecognized type id; the packet was dropped.
    Ignored(u8),
}

/// The delivery a message is sent with: always reliable, immediate
/// priority when the message is important.
pub fn delivery_for(message: &dyn AnyMessage) -> Delivery {
    let priority = if message.is_important() {
        Priority::Immediate
    } else {
        Priority::High
    };
    Delivery::reliable(priority)
}

/// Encodes `message` and sends it to `target`, counting it in `stats`.
pub(crate) fn transmit(
    transport: &dyn Transport,
    codec: &MessageCodec,
    stats: &mut SessionStats,
    message: &dyn AnyMessage,
    target: Target,
) -> Result<(), NetplayError> {
    let packet = codec.encode(message)?;
    transport.send(&packet, delivery_for(message), target)?;
    stats.record_sent();
    tracing::trace!(
        message_type = message.message_type(),
        len = packet.len(),
        ?target,
        "message sent"
    );
    Ok(())
}

/// Turns received packets into handler calls.
///
/// Owns everything a handler can reach: the registry, the application
/// context, and the session stats. The transport is borrowed per call so
/// the session loop keeps ownership of it.
pub struct PacketDispatcher<Ctx> {
    role: Role,
    factory: MessageFactory<Ctx>,
    codec: MessageCodec,
    registry: ConnectionRegistry,
    queue: OutboundQueue,
    stats: SessionStats,
    context: Ctx,
}

impl<Ctx: 'static> PacketDispatcher<Ctx> {
    /// A dispatcher with default codec, registry, queue, and stats.
    pub fn new(role: Role, factory: MessageFactory<Ctx>, context: Ctx) -> Self {
        Self {
            role,
            factory,
            codec: MessageCodec::default(),
            registry: ConnectionRegistry::new(),
            queue: OutboundQueue::new(),
            stats: SessionStats::default(),
            context,
        }
    }

    pub fn with_codec(mut self, codec: MessageCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Uses `queue` for handler replies in the client role.
    pub fn with_queue(mut self, queue: OutboundQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_stats(mut self, stats: SessionStats) -> Self {
        self.stats = stats;
        self
    }

    /// Decodes `raw` from `from` and runs the matching handler.
    ///
    /// # Errors
    /// - [`NetplayError::Protocol`] for truncated, oversized, or
    ///   undecodable packets.
    /// - [`NetplayError::Registry`] if `from` is new and the server is
    ///   full. The connection is refused before returning.
    /// - Whatever the handler itself returns.
    pub fn handle(
        &mut self,
        transport: &dyn Transport,
        raw: &[u8],
        from: PeerAddress,
    ) -> Result<Dispatched, NetplayError> {
        self.stats.record_received();

        let Some(message_type) = MessageCodec::peek_type(raw) else {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                available: 0,
            }
            .into());
        };
        let Some(mut message) = self.factory.create(message_type) else {
            tracing::warn!(message_type, %from, "unrecognized message id");
            return Ok(Dispatched::Ignored(message_type));
        };

        let (_, payload) = self.codec.decode(raw)?;
        message.decode_fields(payload)?;

        let sender = match self.registry.resolve(from) {
            Ok(resolved) => resolved.player(),
            Err(e) => {
                refuse(transport, from);
                return Err(e.into());
            }
        };

        let mut cx = HandlerContext {
            role: self.role,
            sender,
            context: &mut self.context,
            registry: &self.registry,
            transport,
            codec: self.codec,
            queue: &self.queue,
            stats: &mut self.stats,
        };
        match self.role {
            Role::Server => message.dispatch_server(&mut cx, sender)?,
            Role::Client => message.dispatch_client(&mut cx)?,
        }
        tracing::trace!(message_type, %from, "message handled");
        Ok(Dispatched::Handled(message_type))
    }

    /// Gives a newly connected peer a slot.
    ///
    /// # Errors
    /// [`NetplayError::Registry`] if every slot is taken. The connection
    /// is refused through [`Transport::disconnect`] before returning.
    pub fn admit(
        &mut self,
        transport: &dyn Transport,
        address: PeerAddress,
    ) -> Result<Resolved, NetplayError> {
        self.registry.resolve(address).map_err(|e| {
            refuse(transport, address);
            e.into()
        })
    }

    /// Frees the slot of a peer that disconnected or was lost.
    pub fn drop_player(&mut self, address: PeerAddress) -> Option<PlayerAddress> {
        self.registry.drop_address(address)
    }

    /// Encodes and sends `message` to every peer right away.
    pub fn send_game_message(
        &mut self,
        transport: &dyn Transport,
        message: &dyn AnyMessage,
    ) -> Result<(), NetplayError> {
        self.send_game_message_to(transport, message, Target::All)
    }

    /// Encodes and sends `message` to `target` right away.
    pub fn send_game_message_to(
        &mut self,
        transport: &dyn Transport,
        message: &dyn AnyMessage,
        target: Target,
    ) -> Result<(), NetplayError> {
        transmit(transport, &self.codec, &mut self.stats, message, target)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &MessageFactory<Ctx> {
        &self.factory
    }

    pub fn codec(&self) -> MessageCodec {
        self.codec
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub fn context(&self) -> &Ctx {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Ctx {
        &mut self.context
    }
}

fn refuse(transport: &dyn Transport, address: PeerAddress) {
    tracing::warn!(%address, "no free player slot, refusing connection");
    if let Err(e) = transport.disconnect(address) {
        tracing::debug!(%address, error = %e, "refusal disconnect failed");
    }
}
