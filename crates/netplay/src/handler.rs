//! Message handling: what a message does when it arrives.
//!
//! A game message carries its own behaviour. Implement [`Handler`] for a
//! message type and the dispatcher calls `handle_server` when the message
//! reaches a server, or `handle_client` when it reaches a client:
//!
//! ```rust
//! use netplay::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default)]
//! struct Lobby {
//!     chat_log: Vec<String>,
//! }
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! impl Message for Chat {
//!     const TYPE: u8 = 1;
//! }
//!
//! impl Handler<Lobby> for Chat {
//!     fn handle_server(
//!         self,
//!         cx: &mut HandlerContext<'_, Lobby>,
//!         sender: PlayerAddress,
//!     ) -> Result<(), NetplayError> {
//!         // Relay to everyone else.
//!         cx.send_game_message_except(Chat { text: self.text }, sender.address)
//!     }
//!
//!     fn handle_client(
//!         self,
//!         cx: &mut HandlerContext<'_, Lobby>,
//!     ) -> Result<(), NetplayError> {
//!         cx.context_mut().chat_log.push(self.text);
//!         Ok(())
//!     }
//! }
//! ```
//!
//! `Ctx` is the application's own state, handed to every handler through
//! [`HandlerContext::context_mut`]. The message itself is consumed by the
//! handler and dropped when it returns.

use netplay_protocol::{AnyMessage, Message, MessageCodec, ProtocolError};
use netplay_registry::{ConnectionRegistry, PlayerAddress};
use netplay_transport::{PeerAddress, Target, Transport};

use crate::dispatcher::transmit;
use crate::{NetplayError, OutboundQueue, SessionStats};

/// Which end of the connection this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Authoritative end. Handlers send synchronously.
    #[default]
    Server,
    /// Connects to a server. Handlers' sends go through the outbound queue.
    Client,
}

/// Behaviour of a message on arrival.
///
/// Both methods default to doing nothing, so a message that only flows
/// one way implements just the side it arrives on.
pub trait Handler<Ctx>: Message {
    /// Called when this message arrives at a server from `sender`.
    fn handle_server(
        self,
        cx: &mut HandlerContext<'_, Ctx>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        let _ = cx;
        tracing::trace!(
            message_type = Self::TYPE,
            from = %sender.address,
            "no server-side handling"
        );
        Ok(())
    }

    /// Called when this message arrives at a client.
    fn handle_client(
        self,
        cx: &mut HandlerContext<'_, Ctx>,
    ) -> Result<(), NetplayError> {
        let _ = cx;
        tracing::trace!(message_type = Self::TYPE, "no client-side handling");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

/// Object-safe view of a [`Handler`], as produced by the
/// [`MessageFactory`](crate::MessageFactory).
///
/// Implemented for every `Handler + Default` type; there is no reason to
/// implement it by hand.
pub trait GameMessage<Ctx>: AnyMessage {
    /// Overwrites this message's fields with the decoded `payload`.
    fn decode_fields(&mut self, payload: &[u8]) -> Result<(), ProtocolError>;

    /// Consumes the message, running its server-side handler.
    fn dispatch_server(
        self: Box<Self>,
        cx: &mut HandlerContext<'_, Ctx>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError>;

    /// Consumes the message, running its client-side handler.
    fn dispatch_client(
        self: Box<Self>,
        cx: &mut HandlerContext<'_, Ctx>,
    ) -> Result<(), NetplayError>;
}

impl<Ctx, M: Handler<Ctx> + Default> GameMessage<Ctx> for M {
    fn decode_fields(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        *self = netplay_protocol::decode_fields(payload)?;
        Ok(())
    }

    fn dispatch_server(
        self: Box<Self>,
        cx: &mut HandlerContext<'_, Ctx>,
        sender: PlayerAddress,
    ) -> Result<(), NetplayError> {
        (*self).handle_server(cx, sender)
    }

    fn dispatch_client(
        self: Box<Self>,
        cx: &mut HandlerContext<'_, Ctx>,
    ) -> Result<(), NetplayError> {
        (*self).handle_client(cx)
    }
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Everything a handler can see and do while handling one message.
pub struct HandlerContext<'a, Ctx> {
    pub(crate) role: Role,
    pub(crate) sender: PlayerAddress,
    pub(crate) context: &'a mut Ctx,
    pub(crate) registry: &'a ConnectionRegistry,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) codec: MessageCodec,
    pub(crate) queue: &'a OutboundQueue,
    pub(crate) stats: &'a mut SessionStats,
}

impl<Ctx> HandlerContext<'_, Ctx> {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// The player whose packet is being handled.
    pub fn sender(&self) -> PlayerAddress {
        self.sender
    }

    pub fn context(&self) -> &Ctx {
        &*self.context
    }

    pub fn context_mut(&mut self) -> &mut Ctx {
        &mut *self.context
    }

    /// Players currently connected, read-only.
    pub fn registry(&self) -> &ConnectionRegistry {
        self.registry
    }

    /// Sends `message` to every connected peer.
    pub fn send_game_message<M: Message>(
        &mut self,
        message: M,
    ) -> Result<(), NetplayError> {
        self.send(message, Target::All)
    }

    /// Sends `message` to one peer.
    pub fn send_game_message_to<M: Message>(
        &mut self,
        message: M,
        peer: PeerAddress,
    ) -> Result<(), NetplayError> {
        self.send(message, Target::Peer(peer))
    }

    /// Sends `message` to every connected peer except `peer`.
    pub fn send_game_message_except<M: Message>(
        &mut self,
        message: M,
        peer: PeerAddress,
    ) -> Result<(), NetplayError> {
        self.send(message, Target::AllExcept(peer))
    }

    /// Servers encode and transmit right away. Clients enqueue, and the
    /// message goes out on the session loop's next drain.
    fn send<M: Message>(
        &mut self,
        message: M,
        target: Target,
    ) -> Result<(), NetplayError> {
        match self.role {
            Role::Server => {
                transmit(self.transport, &self.codec, &mut *self.stats, &message, target)
            }
            Role::Client => {
                if !self.queue.enqueue_to(message, target) {
                    tracing::trace!("session stopping, reply discarded");
                }
                Ok(())
            }
        }
    }
}
