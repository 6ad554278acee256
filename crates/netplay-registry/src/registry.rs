//! The connection registry: maps transport addresses to player slots.
//!
//! # Concurrency note
//!
//! `ConnectionRegistry` is NOT thread-safe and doesn't need to be. It is
//! owned by the packet dispatcher, which only the session loop drives.
//! Application code sees players through handler callbacks, never by
//! touching the registry directly.

use netplay_transport::PeerAddress;

use crate::{PlayerAddress, RegistryError, Team};

/// Most players a registry can hold: one per team.
pub const MAX_PLAYERS: usize = Team::COUNT;

/// Outcome of [`ConnectionRegistry::resolve`].
///
/// First contact is made explicit: callers can tell a newly admitted
/// player from one that was already connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The address already had a slot.
    Known(PlayerAddress),
    /// The address was unseen and has just been given a slot.
    Admitted(PlayerAddress),
}

impl Resolved {
    pub fn player(&self) -> PlayerAddress {
        match self {
            Resolved::Known(p) | Resolved::Admitted(p) => *p,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Resolved::Admitted(_))
    }
}

/// Tracks every connected player by slot.
///
/// ## Slot lifecycle
///
/// ```text
/// resolve(new addr) ──→ first empty slot (or a new one at the end)
///                              │
///                              ▼
///                       [occupied: address, team = for_slot(i)]
///                              │
///                              ▼ drop_address(addr)
///                       [empty] ──→ reused by the next resolve()
/// ```
///
/// Because slots are reused, a player who drops and reconnects may come
/// back on a different team if someone else connected in between.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    /// Slot table. `None` is a hole left by a disconnected player.
    slots: Vec<Option<PlayerAddress>>,
    capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// An empty registry with room for [`MAX_PLAYERS`].
    pub fn new() -> Self {
        Self::with_capacity(MAX_PLAYERS)
    }

    /// An empty registry holding at most `capacity` players.
    ///
    /// Clamped to `1..=MAX_PLAYERS`: there is no team for a fifth slot.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_PLAYERS);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the player bound to `address`, admitting it if unseen.
    ///
    /// New players take the first empty slot, or a fresh slot at the end
    /// if there are no holes. Their team is [`Team::for_slot`] of that slot.
    ///
    /// # Errors
    /// [`RegistryError::CapacityExceeded`] if `address` is new and every
    /// slot is taken. The registry is left unchanged.
    pub fn resolve(
        &mut self,
        address: PeerAddress,
    ) -> Result<Resolved, RegistryError> {
        if let Some(player) = self.lookup(address) {
            return Ok(Resolved::Known(*player));
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(hole) => hole,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => {
                tracing::debug!(
                    %address,
                    capacity = self.capacity,
                    "no free player slot"
                );
                return Err(RegistryError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
        };

        // slot < capacity <= MAX_PLAYERS, so there is always a team.
        let team = Team::for_slot(slot).unwrap_or_default();
        let player = PlayerAddress {
            address,
            team,
            slot,
        };
        self.slots[slot] = Some(player);
        tracing::info!(%address, slot, ?team, "player admitted");
        Ok(Resolved::Admitted(player))
    }

    /// Removes the player bound to `address` and frees their slot.
    ///
    /// Returns the removed player, or `None` if the address was unknown.
    /// Other players keep their slots.
    pub fn drop_address(&mut self, address: PeerAddress) -> Option<PlayerAddress> {
        let entry = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(p) if p.address == address))?;
        let player = entry.take()?;
        tracing::info!(
            %address,
            slot = player.slot,
            team = ?player.team,
            "player dropped"
        );
        Some(player)
    }

    /// The player bound to `address`, if any.
    pub fn lookup(&self, address: PeerAddress) -> Option<&PlayerAddress> {
        self.players().find(|p| p.address == address)
    }

    /// The player in `slot`, if occupied.
    pub fn get(&self, slot: usize) -> Option<&PlayerAddress> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Iterates connected players in slot order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerAddress> {
        self.slots.iter().flatten()
    }

    /// Number of connected players.
    pub fn len(&self) -> usize {
        self.players().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::from(SocketAddr::from(([10, 0, 0, 1], port)))
    }

    #[test]
    fn test_resolve_assigns_teams_in_connection_order() {
        let mut registry = ConnectionRegistry::new();
        let teams: Vec<Team> = (1..=4)
            .map(|port| registry.resolve(addr(port)).unwrap().player().team)
            .collect();
        assert_eq!(
            teams,
            vec![Team::Team1, Team::Team2, Team::Team3, Team::Team4]
        );
        assert!(registry.is_full());
    }

    #[test]
    fn test_resolve_known_address_returns_same_player() {
        let mut registry = ConnectionRegistry::new();
        let first = registry.resolve(addr(1)).unwrap();
        let second = registry.resolve(addr(1)).unwrap();
        assert!(first.is_admitted());
        assert_eq!(second, Resolved::Known(first.player()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_fifth_player_rejected() {
        let mut registry = ConnectionRegistry::new();
        for port in 1..=4 {
            registry.resolve(addr(port)).unwrap();
        }
        let err = registry.resolve(addr(5)).unwrap_err();
        assert_eq!(err, RegistryError::CapacityExceeded { capacity: 4 });
        assert_eq!(registry.len(), 4);
        assert!(registry.lookup(addr(5)).is_none());

        // Existing players still resolve while full.
        assert!(registry.resolve(addr(2)).is_ok());
    }

    #[test]
    fn test_resolve_reuses_first_empty_slot() {
        let mut registry = ConnectionRegistry::new();
        for port in 1..=3 {
            registry.resolve(addr(port)).unwrap();
        }
        registry.drop_address(addr(2));

        let player = registry.resolve(addr(9)).unwrap().player();
        assert_eq!(player.slot, 1);
        assert_eq!(player.team, Team::Team2);
    }

    #[test]
    fn test_resolve_reconnect_after_churn_changes_team() {
        let mut registry = ConnectionRegistry::new();
        registry.resolve(addr(1)).unwrap();
        registry.resolve(addr(2)).unwrap();
        registry.drop_address(addr(1));
        registry.drop_address(addr(2));

        // Player 2 comes back first and takes slot 0.
        assert_eq!(registry.resolve(addr(2)).unwrap().player().team, Team::Team1);
        assert_eq!(registry.resolve(addr(1)).unwrap().player().team, Team::Team2);
    }

    #[test]
    fn test_drop_address_removes_only_that_player() {
        let mut registry = ConnectionRegistry::new();
        for port in 1..=3 {
            registry.resolve(addr(port)).unwrap();
        }

        let dropped = registry.drop_address(addr(2)).unwrap();
        assert_eq!(dropped.slot, 1);
        assert!(registry.lookup(addr(2)).is_none());
        assert_eq!(registry.lookup(addr(1)).unwrap().slot, 0);
        assert_eq!(registry.lookup(addr(3)).unwrap().slot, 2);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_drop_address_unknown_returns_none() {
        let mut registry = ConnectionRegistry::new();
        registry.resolve(addr(1)).unwrap();
        assert!(registry.drop_address(addr(7)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_with_capacity_clamps_to_team_count() {
        assert_eq!(ConnectionRegistry::with_capacity(10).capacity(), MAX_PLAYERS);
        assert_eq!(ConnectionRegistry::with_capacity(0).capacity(), 1);

        let mut registry = ConnectionRegistry::with_capacity(2);
        registry.resolve(addr(1)).unwrap();
        registry.resolve(addr(2)).unwrap();
        assert!(registry.resolve(addr(3)).is_err());
    }

    #[test]
    fn test_players_iterates_in_slot_order() {
        let mut registry = ConnectionRegistry::new();
        for port in [30, 10, 20] {
            registry.resolve(addr(port)).unwrap();
        }
        registry.drop_address(addr(10));
        let slots: Vec<usize> = registry.players().map(|p| p.slot).collect();
        assert_eq!(slots, vec![0, 2]);
    }
}
