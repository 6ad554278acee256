//! The message traits.
//!
//! A game message is a plain Rust struct that derives `Serialize` and
//! `Deserialize` and implements [`Message`] to give itself a type id:
//!
//! ```rust
//! use netplay_protocol::Message;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! impl Message for Chat {
//!     const TYPE: u8 = 7;
//! }
//! ```
//!
//! Code that moves messages around without knowing their concrete type
//! (the outbound queue, the codec) works with `dyn AnyMessage` instead.
//! Every `Message` is an `AnyMessage` through a blanket impl.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A typed game message with a fixed wire type id.
///
/// ## Trait bounds explained
///
/// - `Serialize + DeserializeOwned` → the fields are the payload. The
///   codec writes them in declaration order.
/// - `Send + 'static` → messages are handed between threads through the
///   outbound queue, so they must own their data.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Wire type id. Unique among the messages registered in one factory.
    const TYPE: u8;

    /// Important messages are sent at immediate priority.
    fn important(&self) -> bool {
        false
    }
}

/// Object-safe view of a [`Message`].
pub trait AnyMessage: Send + 'static {
    /// The wire type id.
    fn message_type(&self) -> u8;

    /// Whether the message should jump the transport's send buffer.
    fn is_important(&self) -> bool;

    /// Serializes the message's fields (the payload, without header).
    fn encode_fields(&self) -> Result<Vec<u8>, ProtocolError>;
}

impl<M: Message> AnyMessage for M {
    fn message_type(&self) -> u8 {
        M::TYPE
    }

    fn is_important(&self) -> bool {
        self.important()
    }

    fn encode_fields(&self) -> Result<Vec<u8>, ProtocolError> {
        crate::codec::encode_fields(self)
    }
}
