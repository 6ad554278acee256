//! Transport abstraction layer for netplay.
//!
//! The protocol layers above never touch sockets. They talk to a
//! [`Transport`]: something that can push a datagram at one or more peers,
//! hand back whatever arrived since the last poll, and refuse a connection.
//! Connection lifecycle changes arrive through the same poll as data, as
//! [`TransportEvent`]s.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryTransport`]: in-process endpoints linked through a
//!   [`MemoryNetwork`]. Used by tests and single-process setups.
//! - [`WebSocketTransport`]: one binary frame per packet over
//!   `tokio-tungstenite` (feature `websocket`, on by default).
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryNetwork, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::fmt;
use std::net::SocketAddr;

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Network address of a remote endpoint.
///
/// One live connection per address: the registry above keys players on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(SocketAddr);

impl PeerAddress {
    /// Wraps a socket address.
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Returns the underlying socket address.
    pub fn socket_addr(self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a packet should be delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every connected peer.
    All,
    /// One specific peer.
    Peer(PeerAddress),
    /// Every connected peer except the given one.
    AllExcept(PeerAddress),
}

impl Target {
    /// Returns `true` if a packet sent to this target reaches `peer`.
    pub fn includes(&self, peer: PeerAddress) -> bool {
        match self {
            Target::All => true,
            Target::Peer(p) => *p == peer,
            Target::AllExcept(p) => *p != peer,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery guarantees
// ---------------------------------------------------------------------------

/// How urgently the transport should push a packet out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Sent right away, ahead of anything buffered.
    Immediate,
    /// Sent on the transport's next flush.
    #[default]
    High,
}

/// Retransmission/ordering guarantee requested for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reliability {
    /// Retransmitted until acknowledged, may arrive out of order.
    #[default]
    Reliable,
    /// Retransmitted and delivered in send order.
    ReliableOrdered,
    /// Fire and forget.
    Unreliable,
}

/// Priority and reliability requested for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub priority: Priority,
    pub reliability: Reliability,
}

impl Delivery {
    /// Reliable delivery at the given priority.
    pub fn reliable(priority: Priority) -> Self {
        Self {
            priority,
            reliability: Reliability::Reliable,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something the transport observed since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A datagram arrived.
    Packet { from: PeerAddress, data: Vec<u8> },
    /// A remote endpoint connected to us (server side).
    NewIncomingConnection(PeerAddress),
    /// Our outgoing connection was accepted (client side).
    ConnectionAccepted(PeerAddress),
    /// The remote refused our connection because it is full.
    NoFreeIncomingConnections(PeerAddress),
    /// The remote closed the connection on purpose.
    DisconnectionNotification(PeerAddress),
    /// The connection dropped without a goodbye.
    ConnectionLost(PeerAddress),
}

impl TransportEvent {
    /// The remote endpoint this event is about.
    pub fn peer(&self) -> PeerAddress {
        match self {
            TransportEvent::Packet { from, .. } => *from,
            TransportEvent::NewIncomingConnection(p)
            | TransportEvent::ConnectionAccepted(p)
            | TransportEvent::NoFreeIncomingConnections(p)
            | TransportEvent::DisconnectionNotification(p)
            | TransportEvent::ConnectionLost(p) => *p,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// A message-oriented, poll-driven network endpoint.
///
/// All methods are synchronous and must not block for long: `send` queues
/// the packet, `receive` returns `None` when nothing is pending. The trait is
/// object-safe so handlers can send through `&dyn Transport` without knowing
/// the concrete implementation.
pub trait Transport: Send + 'static {
    /// Queues `data` for delivery to `target`.
    ///
    /// Sending to [`Target::Peer`] fails with [`TransportError::UnknownPeer`]
    /// if that peer is not connected. Broadcasts to an empty peer set
    /// succeed and deliver nothing.
    fn send(
        &self,
        data: &[u8],
        delivery: Delivery,
        target: Target,
    ) -> Result<(), TransportError>;

    /// Returns the next pending event, or `None` if nothing has arrived.
    fn receive(&mut self) -> Option<TransportEvent>;

    /// Closes the connection to `peer`, notifying the remote side.
    fn disconnect(&self, peer: PeerAddress) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(
        &self,
        data: &[u8],
        delivery: Delivery,
        target: Target,
    ) -> Result<(), TransportError> {
        (**self).send(data, delivery, target)
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        (**self).receive()
    }

    fn disconnect(&self, peer: PeerAddress) -> Result<(), TransportError> {
        (**self).disconnect(peer)
    }
}
