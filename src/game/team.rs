//! Team identity
//!
//! External systems spell teams many ways ("Team1", "blue", " TEAMA "). They are
//! parsed exactly once at the boundary into [`Team`] and never compared as strings
//! afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the two competing teams, or the neutral/AI faction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    TeamA,
    TeamB,
    Neutral,
}

/// Both competing teams, in index order
pub const COMPETING_TEAMS: [Team; 2] = [Team::TeamA, Team::TeamB];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized team name: '{0}'")]
pub struct UnknownTeam(pub String);

impl Team {
    /// Whether this team competes for flags and score
    pub fn is_competing(&self) -> bool {
        !matches!(self, Team::Neutral)
    }

    /// The other competing team. Neutral has no opponent.
    pub fn opponent(&self) -> Option<Team> {
        match self {
            Team::TeamA => Some(Team::TeamB),
            Team::TeamB => Some(Team::TeamA),
            Team::Neutral => None,
        }
    }

    /// Slot index for per-team arrays. `None` for neutral.
    pub fn index(&self) -> Option<usize> {
        match self {
            Team::TeamA => Some(0),
            Team::TeamB => Some(1),
            Team::Neutral => None,
        }
    }

    /// Canonical id used in logs and wire-facing text
    pub fn canonical_id(&self) -> &'static str {
        match self {
            Team::TeamA => "Team1",
            Team::TeamB => "Team2",
            Team::Neutral => "Neutral",
        }
    }

    /// Display alias shown to players
    pub fn display_name(&self) -> &'static str {
        match self {
            Team::TeamA => "Blue",
            Team::TeamB => "Red",
            Team::Neutral => "Neutral",
        }
    }

    /// Parse a team spelling and require it to be a competing team
    pub fn parse_competing(name: &str) -> Result<Team, UnknownTeam> {
        match name.parse::<Team>()? {
            Team::Neutral => Err(UnknownTeam(name.to_string())),
            team => Ok(team),
        }
    }
}

impl FromStr for Team {
    type Err = UnknownTeam;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "team1" | "teama" | "team_a" | "a" | "blue" => Ok(Team::TeamA),
            "team2" | "teamb" | "team_b" | "b" | "red" => Ok(Team::TeamB),
            "neutral" | "ai" | "none" => Ok(Team::Neutral),
            _ => Err(UnknownTeam(s.to_string())),
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
