use crate::PeerAddress;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The target peer is not connected to this endpoint.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerAddress),

    /// The two endpoints are already linked.
    #[error("already connected to {0}")]
    AlreadyConnected(PeerAddress),

    /// An endpoint is already registered under this address.
    #[error("address {0} is already in use")]
    AddressInUse(PeerAddress),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Establishing an outgoing connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}
