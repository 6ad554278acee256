//! In-process transport: endpoints exchange packets through shared mailboxes.
//!
//! A [`MemoryNetwork`] is the "wire". Each [`MemoryTransport`] endpoint owns
//! one mailbox on it. Linking two endpoints produces the same connection
//! events a real transport would, so session code cannot tell the
//! difference. The network also exposes knobs a real wire does not: it can
//! sever a link (simulating a dropped connection) and inject raw bytes (for
//! feeding malformed packets to a receiver).

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    Delivery, PeerAddress, Target, Transport, TransportError, TransportEvent,
};

#[derive(Debug, Default)]
struct Wire {
    mailboxes: HashMap<PeerAddress, VecDeque<TransportEvent>>,
    /// Undirected links, stored as `(lower, higher)` so each appears once.
    links: BTreeSet<(PeerAddress, PeerAddress)>,
}

impl Wire {
    fn link_key(a: PeerAddress, b: PeerAddress) -> (PeerAddress, PeerAddress) {
        if a <= b { (a, b) } else { (b, a) }
    }

    fn is_linked(&self, a: PeerAddress, b: PeerAddress) -> bool {
        self.links.contains(&Self::link_key(a, b))
    }

    /// Peers linked to `of`, in address order.
    fn peers_of(&self, of: PeerAddress) -> Vec<PeerAddress> {
        self.links
            .iter()
            .filter_map(|&(a, b)| {
                if a == of {
                    Some(b)
                } else if b == of {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }

    fn push(&mut self, to: PeerAddress, event: TransportEvent) {
        match self.mailboxes.get_mut(&to) {
            Some(mailbox) => mailbox.push_back(event),
            None => tracing::trace!(%to, "no mailbox, event dropped"),
        }
    }
}

/// Shared in-memory "wire" that [`MemoryTransport`] endpoints attach to.
///
/// Cheap to clone; all clones see the same endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    wire: Arc<Mutex<Wire>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a new endpoint at `address`.
    ///
    /// # Errors
    /// Returns [`TransportError::AddressInUse`] if an endpoint already
    /// lives at that address.
    pub fn endpoint(
        &self,
        address: impl Into<PeerAddress>,
    ) -> Result<MemoryTransport, TransportError> {
        let address = address.into();
        let mut wire = self.lock();
        if wire.mailboxes.contains_key(&address) {
            return Err(TransportError::AddressInUse(address));
        }
        wire.mailboxes.insert(address, VecDeque::new());
        tracing::debug!(%address, "memory endpoint attached");
        Ok(MemoryTransport {
            address,
            network: self.clone(),
        })
    }

    /// Links `client` to `server`.
    ///
    /// The server sees `NewIncomingConnection(client)`, the client sees
    /// `ConnectionAccepted(server)`.
    pub fn connect(
        &self,
        client: PeerAddress,
        server: PeerAddress,
    ) -> Result<(), TransportError> {
        let mut wire = self.lock();
        for end in [client, server] {
            if !wire.mailboxes.contains_key(&end) {
                return Err(TransportError::UnknownPeer(end));
            }
        }
        if !wire.links.insert(Wire::link_key(client, server)) {
            return Err(TransportError::AlreadyConnected(server));
        }
        wire.push(server, TransportEvent::NewIncomingConnection(client));
        wire.push(client, TransportEvent::ConnectionAccepted(server));
        Ok(())
    }

    /// Drops the link between `a` and `b` without a goodbye.
    ///
    /// Both sides see `ConnectionLost`. Returns `false` if they were not
    /// linked.
    pub fn sever(&self, a: PeerAddress, b: PeerAddress) -> bool {
        let mut wire = self.lock();
        if !wire.links.remove(&Wire::link_key(a, b)) {
            return false;
        }
        wire.push(a, TransportEvent::ConnectionLost(b));
        wire.push(b, TransportEvent::ConnectionLost(a));
        true
    }

    /// Delivers raw bytes to `to` as if `from` had sent them.
    ///
    /// Bypasses link checks, so tests can feed arbitrary data to a receiver.
    pub fn inject(&self, to: PeerAddress, from: PeerAddress, data: Vec<u8>) {
        self.lock().push(to, TransportEvent::Packet { from, data });
    }

    /// Returns `true` if `a` and `b` are linked.
    pub fn is_linked(&self, a: PeerAddress, b: PeerAddress) -> bool {
        self.lock().is_linked(a, b)
    }

    /// Number of events waiting in `address`'s mailbox.
    pub fn pending(&self, address: PeerAddress) -> usize {
        self.lock().mailboxes.get(&address).map_or(0, VecDeque::len)
    }
}

/// One endpoint on a [`MemoryNetwork`].
///
/// Dropping the endpoint detaches it; every linked peer sees
/// `ConnectionLost`.
#[derive(Debug)]
pub struct MemoryTransport {
    address: PeerAddress,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// This endpoint's own address.
    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Connects this endpoint to `server`.
    pub fn connect(&self, server: PeerAddress) -> Result<(), TransportError> {
        self.network.connect(self.address, server)
    }

    /// The network this endpoint is attached to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn send(
        &self,
        data: &[u8],
        _delivery: Delivery,
        target: Target,
    ) -> Result<(), TransportError> {
        let mut wire = self.network.lock();
        if let Target::Peer(peer) = target {
            if !wire.is_linked(self.address, peer) {
                return Err(TransportError::UnknownPeer(peer));
            }
        }
        for peer in wire.peers_of(self.address) {
            if target.includes(peer) {
                wire.push(
                    peer,
                    TransportEvent::Packet {
                        from: self.address,
                        data: data.to_vec(),
                    },
                );
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        self.network
            .lock()
            .mailboxes
            .get_mut(&self.address)
            .and_then(VecDeque::pop_front)
    }

    fn disconnect(&self, peer: PeerAddress) -> Result<(), TransportError> {
        let mut wire = self.network.lock();
        if !wire.links.remove(&Wire::link_key(self.address, peer)) {
            return Err(TransportError::UnknownPeer(peer));
        }
        wire.push(peer, TransportEvent::DisconnectionNotification(self.address));
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut wire = self.network.lock();
        for peer in wire.peers_of(self.address) {
            wire.links.remove(&Wire::link_key(self.address, peer));
            wire.push(peer, TransportEvent::ConnectionLost(self.address));
        }
        wire.mailboxes.remove(&self.address);
    }
}
