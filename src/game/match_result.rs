//! Match result and win condition
//!
//! A team wins the moment both flags sit within the capture radius of its base.
//! The result is latched by the world and never recomputed.

use serde::{Deserialize, Serialize};

use crate::game::flag::Flag;
use crate::game::team::{Team, COMPETING_TEAMS};

/// How the match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchEndReason {
    /// Both flags were brought to the winner's base
    FlagsCaptured,
}

/// Final match information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner: Team,
    pub reason: MatchEndReason,
    pub end_tick: u64,
    /// Final scores indexed by `Team::index`
    pub scores: [i64; 2],
}

impl MatchResult {
    pub fn message(&self) -> String {
        format!("{} team wins!", self.winner.display_name())
    }

    pub fn score_of(&self, team: Team) -> i64 {
        team.index().map(|i| self.scores[i]).unwrap_or(0)
    }
}

/// Team whose base holds both flags, if any.
///
/// Distances are measured on the ground plane so a carried flag riding above
/// its carrier still counts.
pub fn capture_winner(flags: &[Flag; 2], capture_radius: f32) -> Option<Team> {
    COMPETING_TEAMS.into_iter().find(|team| {
        let Some(index) = team.index() else {
            return false;
        };
        let base = flags[index].home();
        flags
            .iter()
            .all(|flag| flag.position().ground_distance_to(base) <= capture_radius)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::AuthorityToken;
    use crate::util::vec3::Vec3;
    use uuid::Uuid;

    fn flags() -> [Flag; 2] {
        [
            Flag::new(Team::TeamA, Vec3::ground(-50.0, 0.0)),
            Flag::new(Team::TeamB, Vec3::ground(50.0, 0.0)),
        ]
    }

    #[test]
    fn test_no_winner_at_start() {
        assert_eq!(capture_winner(&flags(), 2.0), None);
    }

    #[test]
    fn test_enemy_flag_carried_home() {
        let token = AuthorityToken::for_tests();
        let mut flags = flags();
        let carrier = Uuid::new_v4();

        // Team A carries the B flag onto its own base, flag riding 2 units up
        flags[1]
            .pickup(&token, carrier, Team::TeamA, Vec3::ground(49.0, 0.0), 2.0)
            .unwrap();
        assert_eq!(capture_winner(&flags, 2.0), None);

        flags[1].follow_carrier(&token, Vec3::ground(-49.0, 0.5), 2.0);
        assert_eq!(capture_winner(&flags, 2.0), Some(Team::TeamA));
    }

    #[test]
    fn test_own_flag_missing_blocks_win() {
        let token = AuthorityToken::for_tests();
        let mut flags = flags();

        flags[0]
            .pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ground(-50.0, 0.0), 2.0)
            .unwrap();
        flags[0].follow_carrier(&token, Vec3::ground(0.0, 0.0), 2.0);
        flags[1]
            .pickup(&token, Uuid::new_v4(), Team::TeamA, Vec3::ground(50.0, 0.0), 2.0)
            .unwrap();
        flags[1].follow_carrier(&token, Vec3::ground(-50.0, 0.0), 2.0);

        assert_eq!(capture_winner(&flags, 2.0), None);
    }

    #[test]
    fn test_result_message() {
        let result = MatchResult {
            winner: Team::TeamB,
            reason: MatchEndReason::FlagsCaptured,
            end_tick: 900,
            scores: [10, 40],
        };
        assert_eq!(result.message(), "Red team wins!");
        assert_eq!(result.score_of(Team::TeamB), 40);
        assert_eq!(result.score_of(Team::Neutral), 0);
    }
}
