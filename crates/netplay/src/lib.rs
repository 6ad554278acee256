//! # netplay
//!
//! Typed client/server message protocol for small multiplayer games.
//!
//! Game messages are plain serde structs with a type id. Each message
//! carries its own handling logic ([`Handler`]): what the server does when
//! a client sends it, and what a client does when the server sends it.
//! netplay moves those messages across a [`Transport`], resolves who sent
//! them, and calls the right handler.
//!
//! ```text
//! app thread ──→ OutboundQueue ──→ SessionLoop ──encode──→ Transport
//!                                      │
//! Transport ──packet──→ PacketDispatcher ──→ MessageFactory + decode
//!                          │                 ConnectionRegistry::resolve
//!                          ▼
//!                  Handler::handle_server / handle_client
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netplay::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Hello {
//!     name: String,
//! }
//!
//! impl Message for Hello {
//!     const TYPE: u8 = 1;
//! }
//!
//! impl Handler<()> for Hello {
//!     fn handle_server(
//!         self,
//!         _cx: &mut HandlerContext<'_, ()>,
//!         sender: PlayerAddress,
//!     ) -> Result<(), NetplayError> {
//!         println!("{} joined on {}", self.name, sender.team);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), NetplayError> {
//! let transport = WebSocketTransport::listen("0.0.0.0:9000").await?;
//! let session = SessionBuilder::new()
//!     .server()
//!     .register::<Hello>()
//!     .build(transport, ());
//! let handle = session.spawn();
//! // ... later
//! handle.stop();
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod error;
mod factory;
mod handler;
mod queue;
mod session;
mod stats;

pub use dispatcher::{delivery_for, Dispatched, PacketDispatcher};
pub use error::NetplayError;
pub use factory::MessageFactory;
pub use handler::{GameMessage, Handler, HandlerContext, Role};
pub use queue::{OutboundQueue, Outgoing};
pub use session::{
    LoopState, SessionBuilder, SessionConfig, SessionHandle, SessionLoop,
    TickOutcome,
};
pub use stats::{SessionStats, StatsReport};

pub use netplay_protocol as protocol;
pub use netplay_registry as registry;
pub use netplay_tick as tick;
pub use netplay_transport as transport;

pub use netplay_protocol::{AnyMessage, Message, MessageCodec};
pub use netplay_registry::{ConnectionRegistry, PlayerAddress, Team};
pub use netplay_transport::{PeerAddress, Target, Transport, TransportEvent};

/// Everything needed to define messages and run a session.
pub mod prelude {
    pub use crate::{
        Handler, HandlerContext, LoopState, Message, MessageFactory,
        NetplayError, OutboundQueue, PeerAddress, PlayerAddress, Role,
        SessionBuilder, SessionConfig, SessionHandle, SessionLoop, Target,
        Team, Transport,
    };
    pub use netplay_transport::{MemoryNetwork, MemoryTransport};
    #[cfg(feature = "websocket")]
    pub use netplay_transport::WebSocketTransport;
}
