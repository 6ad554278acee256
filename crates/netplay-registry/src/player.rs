//! Player identity: address, slot, team.

use std::fmt;

use netplay_transport::PeerAddress;
use serde::{Deserialize, Serialize};

/// Coarse game role, derived from the slot index.
///
/// Serializable so game messages can carry it (e.g. "set team").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum Team {
    #[default]
    Unknown,
    Team1,
    Team2,
    Team3,
    Team4,
}

impl Team {
    /// Number of real teams (excluding `Unknown`).
    pub const COUNT: usize = 4;

    /// The team for a slot index: 0 → `Team1` … 3 → `Team4`.
    ///
    /// Returns `None` for slots past the last team.
    pub fn for_slot(slot: usize) -> Option<Team> {
        match slot {
            0 => Some(Team::Team1),
            1 => Some(Team::Team2),
            2 => Some(Team::Team3),
            3 => Some(Team::Team4),
            _ => None,
        }
    }

    /// Inverse of [`Team::for_slot`]. `Unknown` has no slot.
    pub fn slot(self) -> Option<usize> {
        match self {
            Team::Unknown => None,
            Team::Team1 => Some(0),
            Team::Team2 => Some(1),
            Team::Team3 => Some(2),
            Team::Team4 => Some(3),
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot() {
            Some(slot) => write!(f, "team {}", slot + 1),
            None => f.write_str("no team"),
        }
    }
}

/// A connected player: who they are on the network and where they sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerAddress {
    pub address: PeerAddress,
    pub team: Team,
    pub slot: usize,
}

impl fmt::Display for PlayerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (slot {}, {})", self.address, self.slot, self.team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_for_slot_maps_first_four() {
        assert_eq!(Team::for_slot(0), Some(Team::Team1));
        assert_eq!(Team::for_slot(1), Some(Team::Team2));
        assert_eq!(Team::for_slot(2), Some(Team::Team3));
        assert_eq!(Team::for_slot(3), Some(Team::Team4));
        assert_eq!(Team::for_slot(4), None);
    }

    #[test]
    fn test_team_slot_is_inverse_of_for_slot() {
        for slot in 0..Team::COUNT {
            let team = Team::for_slot(slot).unwrap();
            assert_eq!(team.slot(), Some(slot));
        }
        assert_eq!(Team::Unknown.slot(), None);
    }

    #[test]
    fn test_team_display() {
        assert_eq!(Team::Team3.to_string(), "team 3");
        assert_eq!(Team::Unknown.to_string(), "no team");
    }
}
