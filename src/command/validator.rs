//! Command validation
//!
//! Structural checks that need no world state: team names parse, flag targets
//! name a competing team, reported positions are finite and inside the world.
//! Rule checks (ranges, ownership, lifecycle) happen in the world under the
//! authority token.

use crate::command::{CommandEnvelope, InvalidReason, PeerCommand, PeerId, PickupTarget};
use crate::game::constants::command::MAX_COORDINATE;
use crate::game::state::CoinId;
use crate::game::team::Team;
use crate::util::vec3::Vec3;

/// Configuration for command validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum absolute coordinate on any axis
    pub max_coordinate: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_coordinate: MAX_COORDINATE,
        }
    }
}

/// A command whose free-text fields have been parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidCommand {
    PickupFlag { flag: Team },
    PickupCoin { coin: CoinId },
    Drop { flag: Team },
    Return { flag: Team },
    Deposit,
    Spawn { preferred_team: Option<Team> },
    Leave,
}

/// Validated command with its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    pub peer: PeerId,
    pub command: ValidCommand,
}

/// Command validator
pub struct CommandValidator {
    config: ValidationConfig,
}

impl CommandValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a peer command and parse its free-text fields
    pub fn validate(&self, envelope: &CommandEnvelope) -> Result<ValidatedCommand, InvalidReason> {
        let command = match &envelope.command {
            PeerCommand::Pickup {
                target: PickupTarget::Flag(flag),
            } => ValidCommand::PickupFlag {
                flag: Self::competing(*flag)?,
            },
            PeerCommand::Pickup {
                target: PickupTarget::Coin(coin),
            } => ValidCommand::PickupCoin { coin: *coin },
            PeerCommand::Drop { flag } => ValidCommand::Drop {
                flag: Self::competing(*flag)?,
            },
            PeerCommand::Return { flag } => ValidCommand::Return {
                flag: Self::competing(*flag)?,
            },
            PeerCommand::Deposit => ValidCommand::Deposit,
            PeerCommand::Spawn { preferred_team } => ValidCommand::Spawn {
                preferred_team: preferred_team
                    .as_deref()
                    .map(Self::parse_team)
                    .transpose()?,
            },
            PeerCommand::Leave => ValidCommand::Leave,
        };

        Ok(ValidatedCommand {
            peer: envelope.peer,
            command,
        })
    }

    /// Validate a position reported by the movement collaborator
    pub fn validate_position(&self, position: &Vec3) -> Result<(), InvalidReason> {
        if !position.is_finite() {
            return Err(InvalidReason::NonFinitePosition);
        }
        let max = self.config.max_coordinate;
        if position.x.abs() > max || position.y.abs() > max || position.z.abs() > max {
            return Err(InvalidReason::PositionOutOfBounds);
        }
        Ok(())
    }

    fn competing(team: Team) -> Result<Team, InvalidReason> {
        if team.is_competing() {
            Ok(team)
        } else {
            Err(InvalidReason::NeutralTeam)
        }
    }

    fn parse_team(name: &str) -> Result<Team, InvalidReason> {
        Team::parse_competing(name).map_err(|e| InvalidReason::UnknownTeam(e.0))
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}
