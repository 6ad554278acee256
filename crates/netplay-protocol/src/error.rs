//! Error types for the protocol layer.
//!
//! Everything here describes a packet or message that could not be turned
//! into bytes or back. None of it is fatal: the session drops the packet
//! and keeps running.

/// Errors that can occur while framing or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Field serialization failed.
    #[error("encode failed: {0}")]
    Encode(bincode::Error),

    /// Field deserialization failed: wrong shape, bad enum tag, invalid
    /// UTF-8, or bytes left over after the last field.
    #[error("decode failed: {0}")]
    Decode(bincode::Error),

    /// The packet ends before its header or declared payload does.
    #[error("packet truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// An incoming packet declares a payload longer than the codec accepts.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// An outgoing message encodes to more than the codec may send.
    #[error("message of {size} bytes exceeds maximum payload {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The packet carries bytes past its declared payload.
    #[error("packet has {extra} bytes past its declared payload")]
    TrailingBytes { extra: usize },
}

impl ProtocolError {
    /// `true` for errors caused by a malformed incoming packet, as opposed
    /// to a message we failed to encode.
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            ProtocolError::Encode(_) | ProtocolError::MessageTooLarge { .. }
        )
    }
}
