//! Wire protocol for netplay.
//!
//! This crate defines what a game message looks like on the wire and how
//! it gets there:
//!
//! - **Messages** ([`Message`], [`AnyMessage`]): typed records with a
//!   numeric type id and an "important" flag.
//! - **Codec** ([`MessageCodec`], [`PacketHeader`]): framing a message as
//!   `[type:1][payload_len:4][fields]` and splitting it back apart.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! The protocol layer knows nothing about connections or players. It turns
//! messages into bytes and bytes back into payload slices.
//!
//! ```text
//! Transport (bytes) → Protocol (header + fields) → Dispatcher (handlers)
//! ```

mod codec;
mod error;
mod message;

pub use codec::{
    decode_fields, encode_fields, MessageCodec, PacketHeader,
    DEFAULT_MAX_PAYLOAD, HEADER_LEN,
};
pub use error::ProtocolError;
pub use message::{AnyMessage, Message};
