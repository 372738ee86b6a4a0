//! Peer command processing
//!
//! Commands arrive from untrusted peers, possibly duplicated or reordered. Before
//! anything reaches the world they pass validation, the idempotency guard and
//! (for spawns) the spawn registry.

pub mod buffer;
pub mod idempotency;
pub mod spawn_registry;
pub mod validator;

use serde::{Deserialize, Serialize};

use crate::game::authority::{AuthorityViolation, EntityRef};
use crate::game::state::{CoinId, PlayerId};
use crate::game::team::Team;

/// Identity of a connected peer. Each peer controls at most one player, and the
/// player shares the peer's id.
pub type PeerId = PlayerId;

/// What a pickup command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PickupTarget {
    Flag(Team),
    Coin(CoinId),
}

/// Peer → authority commands. Fire-and-forget: the effect is observed through
/// replicated state, never through a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerCommand {
    Pickup { target: PickupTarget },
    Drop { flag: Team },
    Return { flag: Team },
    Deposit,
    /// Join the match. The team hint is free text from the client.
    Spawn { preferred_team: Option<String> },
    Leave,
}

/// Command kind, part of the idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Pickup,
    Drop,
    Return,
    Deposit,
    Spawn,
    Leave,
}

impl PeerCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            PeerCommand::Pickup { .. } => CommandKind::Pickup,
            PeerCommand::Drop { .. } => CommandKind::Drop,
            PeerCommand::Return { .. } => CommandKind::Return,
            PeerCommand::Deposit => CommandKind::Deposit,
            PeerCommand::Spawn { .. } => CommandKind::Spawn,
            PeerCommand::Leave => CommandKind::Leave,
        }
    }

    /// The shared entity this command mutates when issued by `peer`
    pub fn target(&self, peer: PeerId) -> EntityRef {
        match self {
            PeerCommand::Pickup {
                target: PickupTarget::Flag(team),
            } => EntityRef::Flag(*team),
            PeerCommand::Pickup {
                target: PickupTarget::Coin(coin),
            } => EntityRef::Coin(*coin),
            PeerCommand::Drop { flag } | PeerCommand::Return { flag } => EntityRef::Flag(*flag),
            PeerCommand::Deposit => EntityRef::Custody(peer),
            PeerCommand::Spawn { .. } | PeerCommand::Leave => EntityRef::Roster,
        }
    }
}

/// A command together with the peer that sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub peer: PeerId,
    pub command: PeerCommand,
}

impl CommandEnvelope {
    pub fn new(peer: PeerId, command: PeerCommand) -> Self {
        Self { peer, command }
    }

    pub fn key(&self) -> CommandKey {
        CommandKey {
            peer: self.peer,
            target: self.command.target(self.peer),
            kind: self.command.kind(),
        }
    }
}

/// Idempotency key: (requesting peer, target entity, command kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub peer: PeerId,
    pub target: EntityRef,
    pub kind: CommandKind,
}

/// Why a well-formed, authority-checked command was still dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum InvalidReason {
    #[error("Unrecognized team name '{0}'")]
    UnknownTeam(String),
    #[error("Neutral faction cannot hold score or flags")]
    NeutralTeam,
    #[error("Peer has no spawned player")]
    NotSpawned,
    #[error("Peer already has a spawned player")]
    AlreadySpawned,
    #[error("Player is dead")]
    PlayerDead,
    #[error("Unknown coin")]
    UnknownCoin,
    #[error("Coin was already collected")]
    CoinAlreadyCollected,
    #[error("Target out of range: {distance:.2} > {max:.2}")]
    OutOfRange { distance: f32, max: f32 },
    #[error("Cannot pick up your own team's flag at its base")]
    SameTeamAtHome,
    #[error("Flag is already carried")]
    FlagAlreadyCarried,
    #[error("Flag is not carried")]
    FlagNotCarried,
    #[error("Only the carrier can drop the flag")]
    NotCarrier,
    #[error("Flag is already at home")]
    FlagAtHome,
    #[error("Only the owning team can return its flag")]
    NotOwningTeam,
    #[error("Match is over")]
    MatchOver,
    #[error("Position contains NaN or infinity")]
    NonFinitePosition,
    #[error("Position outside world bounds")]
    PositionOutOfBounds,
}

/// Outcome of a rejected command
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandRejection {
    #[error("Authority violation: {0}")]
    AuthorityViolation(#[from] AuthorityViolation),
    #[error("Invalid command: {0}")]
    Invalid(#[from] InvalidReason),
    #[error("Duplicate command")]
    Duplicate,
    #[error("Coin capacity exceeded ({held}/{capacity})")]
    CapacityExceeded { held: usize, capacity: usize },
}

impl CommandRejection {
    /// Duplicates look like success to the sender and are never reported back
    pub fn is_silent(&self) -> bool {
        matches!(self, CommandRejection::Duplicate)
    }
}
