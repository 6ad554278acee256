//! Error types for the registry.

/// Errors that can occur while admitting a player.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Every slot is taken. The new connection should be refused.
    #[error("all {capacity} player slots are taken")]
    CapacityExceeded { capacity: usize },
}
