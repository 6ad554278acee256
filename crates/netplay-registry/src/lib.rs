//! Connected-player tracking for netplay.
//!
//! Every remote endpoint that talks to us occupies a **slot**. The slot
//! index decides the player's [`Team`], so four players always land on
//! teams one through four in connection order.
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatcher (above)  ← resolves the sender of every packet here
//!     ↕
//! Registry (this crate)  ← address → slot → team
//!     ↕
//! Transport (below)  ← provides PeerAddress and connection events
//! ```

mod error;
mod player;
mod registry;

pub use error::RegistryError;
pub use player::{PlayerAddress, Team};
pub use registry::{ConnectionRegistry, Resolved, MAX_PLAYERS};
