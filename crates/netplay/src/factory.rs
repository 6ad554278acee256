//! The message factory: type id → fresh message instance.

use std::collections::HashMap;
use std::fmt;

use crate::{GameMessage, Handler};

type Constructor<Ctx> = fn() -> Box<dyn GameMessage<Ctx>>;

fn construct<Ctx: 'static, M: Handler<Ctx> + Default>() -> Box<dyn GameMessage<Ctx>> {
    Box::new(M::default())
}

/// Creates empty messages by wire type id, ready to decode into.
///
/// Every message type a session can receive must be registered here.
/// Packets with any other type id are ignored by the dispatcher.
pub struct MessageFactory<Ctx> {
    constructors: HashMap<u8, Constructor<Ctx>>,
}

impl<Ctx> Default for MessageFactory<Ctx> {
    fn default() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }
}

impl<Ctx> fmt::Debug for MessageFactory<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<u8> = self.constructors.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("MessageFactory")
            .field("message_types", &ids)
            .finish()
    }
}

impl<Ctx: 'static> MessageFactory<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `M` under `M::TYPE`.
    ///
    /// Registering a second type with the same id replaces the first.
    pub fn register<M: Handler<Ctx> + Default>(&mut self) -> &mut Self {
        let previous = self.constructors.insert(M::TYPE, construct::<Ctx, M>);
        if previous.is_some() {
            tracing::warn!(
                message_type = M::TYPE,
                "message type registered twice, replacing"
            );
        }
        self
    }

    /// A fresh default instance of the message registered under
    /// `message_type`, or `None` if the id is unknown.
    pub fn create(&self, message_type: u8) -> Option<Box<dyn GameMessage<Ctx>>> {
        self.constructors.get(&message_type).map(|construct| construct())
    }

    pub fn contains(&self, message_type: u8) -> bool {
        self.constructors.contains_key(&message_type)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
