//! Authority-produced state changes
//!
//! Every change the authority makes to shared state is expressed as a
//! [`Notification`]. The replication channel stamps each one with a per-entity
//! sequence number and fans it out; mirrors apply them idempotently, so delivery
//! is at-least-once by contract.

use serde::{Deserialize, Serialize};

use crate::command::InvalidReason;
use crate::game::authority::EntityRef;
use crate::game::state::{CoinId, PlayerId};
use crate::game::team::Team;
use crate::util::vec3::Vec3;

/// Flag lifecycle state without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlagStatus {
    AtHome,
    Carried,
    Dropped,
}

/// Team buffs unlocked by score milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuffKind {
    Damage,
    Defense,
}

/// A replicated state change, produced only by the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// Flag lifecycle transition with a human-readable message
    FlagStateChanged {
        flag: Team,
        state: FlagStatus,
        carrier: Option<PlayerId>,
        position: Vec3,
        message: String,
    },
    /// Carried flag followed its carrier
    FlagMoved { flag: Team, position: Vec3 },
    TeamScoreChanged { team: Team, score: i64 },
    BuffUnlocked { team: Team, buff: BuffKind },
    CoinCountChanged { player: PlayerId, count: usize, value: i64 },
    CoinSpawned { coin: CoinId, faction: Team, position: Vec3 },
    CoinCollected { coin: CoinId, player: PlayerId },
    CoinDespawned { coin: CoinId },
    PlayerSpawned { player: PlayerId, team: Team, position: Vec3 },
    PlayerLeft { player: PlayerId },
    /// Both flags reached the winner's base; the match is frozen
    MatchOver { winner: Team, message: String },
    /// An invalid command was dropped; addressed to the requester only
    CommandRejected { peer: PlayerId, reason: InvalidReason },
}

impl Notification {
    /// The entity whose replicated fields this change belongs to.
    /// Changes for the same entity are delivered in order.
    pub fn entity(&self) -> EntityRef {
        match self {
            Notification::FlagStateChanged { flag, .. } | Notification::FlagMoved { flag, .. } => {
                EntityRef::Flag(*flag)
            }
            Notification::TeamScoreChanged { team, .. } | Notification::BuffUnlocked { team, .. } => {
                EntityRef::TeamLedger(*team)
            }
            Notification::CoinCountChanged { player, .. } => EntityRef::Custody(*player),
            Notification::CoinSpawned { coin, .. }
            | Notification::CoinCollected { coin, .. }
            | Notification::CoinDespawned { coin } => EntityRef::Coin(*coin),
            Notification::PlayerSpawned { .. }
            | Notification::PlayerLeft { .. }
            | Notification::MatchOver { .. } => EntityRef::Roster,
            Notification::CommandRejected { peer, .. } => EntityRef::Custody(*peer),
        }
    }

    /// Peer this notification is addressed to, if not broadcast
    pub fn recipient(&self) -> Option<PlayerId> {
        match self {
            Notification::CommandRejected { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    /// Display text for the notification layer, when there is one
    pub fn message(&self) -> Option<&str> {
        match self {
            Notification::FlagStateChanged { message, .. } | Notification::MatchOver { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_entity_mapping() {
        let moved = Notification::FlagMoved {
            flag: Team::TeamB,
            position: Vec3::ZERO,
        };
        assert_eq!(moved.entity(), EntityRef::Flag(Team::TeamB));

        let unlocked = Notification::BuffUnlocked {
            team: Team::TeamA,
            buff: BuffKind::Damage,
        };
        assert_eq!(unlocked.entity(), EntityRef::TeamLedger(Team::TeamA));

        let despawned = Notification::CoinDespawned { coin: 9 };
        assert_eq!(despawned.entity(), EntityRef::Coin(9));
    }

    #[test]
    fn test_recipient_only_for_rejections() {
        let peer = Uuid::new_v4();
        let rejected = Notification::CommandRejected {
            peer,
            reason: InvalidReason::MatchOver,
        };
        assert_eq!(rejected.recipient(), Some(peer));

        let score = Notification::TeamScoreChanged {
            team: Team::TeamA,
            score: 3,
        };
        assert_eq!(score.recipient(), None);
        assert_eq!(score.message(), None);
    }
}
