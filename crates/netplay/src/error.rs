//! Unified error type for netplay.

use netplay_protocol::ProtocolError;
use netplay_registry::RegistryError;
use netplay_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes generate `From` impls, so `?` converts
/// sub-crate errors automatically inside handlers and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum NetplayError {
    /// Sending or disconnecting failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A packet was malformed or a message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The sender could not be given a player slot.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A message handler rejected the message.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl NetplayError {
    /// Shorthand for a handler rejection.
    pub fn handler(reason: impl Into<String>) -> Self {
        NetplayError::Handler(reason.into())
    }
}
