//! Packet framing and the field codec.
//!
//! Every game packet has the same shape:
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────────────────────┐
//! │ type: u8 │ payload_len: u32 │ fields (payload_len)     │
//! │          │ little-endian    │ bincode, fixed-width ints│
//! └──────────┴──────────────────┴──────────────────────────┘
//! ```
//!
//! [`MessageCodec`] builds and splits this frame. The fields themselves go
//! through [`encode_fields`] / [`decode_fields`], which pin down one bincode
//! configuration so both ends agree on it: fixed-width little-endian
//! integers, and no bytes allowed after the last field.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::{AnyMessage, ProtocolError};

/// Size of the packet header: one type byte plus a `u32` length.
pub const HEADER_LEN: usize = 5;

/// Largest payload accepted by default.
///
/// Large enough for any game message; a declared length above it means the
/// packet is corrupt or hostile.
pub const DEFAULT_MAX_PAYLOAD: usize = 16_256;

fn field_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Serializes a value's fields with the wire configuration.
pub fn encode_fields<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Vec<u8>, ProtocolError> {
    field_options().serialize(value).map_err(ProtocolError::Encode)
}

/// Deserializes a payload into a value.
///
/// The payload must be consumed exactly: leftover bytes are an error.
pub fn decode_fields<T: DeserializeOwned>(
    payload: &[u8],
) -> Result<T, ProtocolError> {
    field_options()
        .deserialize(payload)
        .map_err(ProtocolError::Decode)
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The fixed-size prefix of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub message_type: u8,
    pub payload_len: u32,
}

impl PacketHeader {
    /// Appends the header's wire form to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.message_type);
        buf.extend_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Reads a header from the start of `raw`.
    pub fn read_from(raw: &[u8]) -> Result<Self, ProtocolError> {
        let Some(bytes) = raw.get(..HEADER_LEN) else {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                available: raw.len(),
            });
        };
        Ok(Self {
            message_type: bytes[0],
            payload_len: u32::from_le_bytes([
                bytes[1], bytes[2], bytes[3], bytes[4],
            ]),
        })
    }
}

// ---------------------------------------------------------------------------
// MessageCodec
// ---------------------------------------------------------------------------

/// Frames messages into packets and splits packets back apart.
///
/// The codec is stateless apart from its payload limit, so it is `Copy` and
/// can be handed to every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCodec {
    max_payload_len: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec with a custom payload limit. Capped at `u32::MAX` since the
    /// length field is four bytes.
    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self {
            max_payload_len: max_payload_len.min(u32::MAX as usize),
        }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Encodes `message` as `[type][payload_len][fields]`.
    ///
    /// # Errors
    /// [`ProtocolError::MessageTooLarge`] if the fields exceed the limit.
    /// Nothing is produced in that case.
    pub fn encode(
        &self,
        message: &dyn AnyMessage,
    ) -> Result<Vec<u8>, ProtocolError> {
        let fields = message.encode_fields()?;
        if fields.len() > self.max_payload_len {
            return Err(ProtocolError::MessageTooLarge {
                size: fields.len(),
                max: self.max_payload_len,
            });
        }

        let header = PacketHeader {
            message_type: message.message_type(),
            // Fits: max_payload_len is capped at u32::MAX.
            payload_len: fields.len() as u32,
        };
        let mut packet = Vec::with_capacity(HEADER_LEN + fields.len());
        header.write_to(&mut packet);
        packet.extend_from_slice(&fields);
        Ok(packet)
    }

    /// Splits a raw packet into its header and payload.
    ///
    /// The packet must be exactly `HEADER_LEN + payload_len` bytes long and
    /// the declared length must be within the limit.
    pub fn decode<'a>(
        &self,
        raw: &'a [u8],
    ) -> Result<(PacketHeader, &'a [u8]), ProtocolError> {
        let header = PacketHeader::read_from(raw)?;
        let size = header.payload_len as usize;
        if size > self.max_payload_len {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max_payload_len,
            });
        }

        let body = &raw[HEADER_LEN..];
        if body.len() < size {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN + size,
                available: raw.len(),
            });
        }
        if body.len() > size {
            return Err(ProtocolError::TrailingBytes {
                extra: body.len() - size,
            });
        }
        Ok((header, body))
    }

    /// The type byte of a raw packet, without validating anything else.
    pub fn peek_type(raw: &[u8]) -> Option<u8> {
        raw.first().copied()
    }
}
