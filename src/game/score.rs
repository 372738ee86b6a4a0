//! Team score and milestone buffs
//!
//! Each competing team has a score and two buffs that unlock once when the score
//! first reaches their thresholds. Unlocks are latched: later evaluation (or a
//! negative award) never re-locks a buff.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::command::{CommandRejection, InvalidReason};
use crate::game::authority::{AuthorityToken, EntityKind};
use crate::game::constants::score::{
    DAMAGE_BUFF_THRESHOLD, DEBUFF_MULTIPLIER, DEFENSE_BUFF_THRESHOLD, UNLOCKED_MULTIPLIER,
};
use crate::game::events::{BuffKind, Notification};
use crate::game::team::Team;

/// Multiplier for a buff given whether it is unlocked
pub fn buff_multiplier(unlocked: bool) -> f32 {
    if unlocked {
        UNLOCKED_MULTIPLIER
    } else {
        DEBUFF_MULTIPLIER
    }
}

/// Score thresholds for each buff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffThresholds {
    pub damage: i64,
    pub defense: i64,
}

impl Default for BuffThresholds {
    fn default() -> Self {
        Self {
            damage: DAMAGE_BUFF_THRESHOLD,
            defense: DEFENSE_BUFF_THRESHOLD,
        }
    }
}

/// Score and buff state of one team
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub score: i64,
    pub damage_buff: bool,
    pub defense_buff: bool,
    /// Score at the moment each buff unlocked
    pub damage_unlocked_at: Option<i64>,
    pub defense_unlocked_at: Option<i64>,
}

impl TeamRecord {
    pub fn is_unlocked(&self, buff: BuffKind) -> bool {
        match buff {
            BuffKind::Damage => self.damage_buff,
            BuffKind::Defense => self.defense_buff,
        }
    }
}

/// Result of an award
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub team: Team,
    pub score: i64,
    pub unlocked: SmallVec<[BuffKind; 2]>,
}

impl ScoreOutcome {
    /// Replicated changes: the new score, then each unlock
    pub fn notifications(&self) -> Vec<Notification> {
        let mut out = Vec::with_capacity(1 + self.unlocked.len());
        out.push(Notification::TeamScoreChanged {
            team: self.team,
            score: self.score,
        });
        out.extend(self.unlocked.iter().map(|&buff| Notification::BuffUnlocked {
            team: self.team,
            buff,
        }));
        out
    }
}

/// Score & buff ledger for both competing teams
#[derive(Debug, Clone)]
pub struct ScoreLedger {
    records: [TeamRecord; 2],
    thresholds: BuffThresholds,
}

impl ScoreLedger {
    pub fn new(thresholds: BuffThresholds) -> Self {
        Self {
            records: [TeamRecord::default(); 2],
            thresholds,
        }
    }

    pub fn thresholds(&self) -> BuffThresholds {
        self.thresholds
    }

    /// Add points to a team and evaluate both thresholds
    pub fn award_points(
        &mut self,
        token: &AuthorityToken,
        team: Team,
        points: i64,
    ) -> Result<ScoreOutcome, CommandRejection> {
        token.require(EntityKind::TeamLedger)?;

        let index = team.index().ok_or(InvalidReason::NeutralTeam)?;
        let thresholds = self.thresholds;
        let record = &mut self.records[index];
        record.score = record.score.saturating_add(points);

        let mut unlocked = SmallVec::new();
        if !record.damage_buff && record.score >= thresholds.damage {
            record.damage_buff = true;
            record.damage_unlocked_at = Some(record.score);
            unlocked.push(BuffKind::Damage);
        }
        if !record.defense_buff && record.score >= thresholds.defense {
            record.defense_buff = true;
            record.defense_unlocked_at = Some(record.score);
            unlocked.push(BuffKind::Defense);
        }

        debug!("Team {} awarded {} points (score {})", team, points, record.score);
        for buff in &unlocked {
            info!("Team {} unlocked {:?} buff at score {}", team, buff, record.score);
        }

        Ok(ScoreOutcome {
            team,
            score: record.score,
            unlocked,
        })
    }

    /// Award points to a team given by any external spelling
    pub fn award_points_named(
        &mut self,
        token: &AuthorityToken,
        team_name: &str,
        points: i64,
    ) -> Result<ScoreOutcome, CommandRejection> {
        let team = match Team::parse_competing(team_name) {
            Ok(team) => team,
            Err(e) => {
                warn!("Rejected point award: {}", e);
                return Err(InvalidReason::UnknownTeam(e.0).into());
            }
        };
        self.award_points(token, team, points)
    }

    pub fn record(&self, team: Team) -> Option<&TeamRecord> {
        team.index().map(|i| &self.records[i])
    }

    /// Score of a team (0 for neutral)
    pub fn score(&self, team: Team) -> i64 {
        self.record(team).map(|r| r.score).unwrap_or(0)
    }

    pub fn is_unlocked(&self, team: Team, buff: BuffKind) -> bool {
        self.record(team).map(|r| r.is_unlocked(buff)).unwrap_or(false)
    }

    /// 1.0 once the damage buff is unlocked, otherwise the debuff.
    /// The neutral faction is never debuffed.
    pub fn damage_multiplier(&self, team: Team) -> f32 {
        match self.record(team) {
            Some(record) => buff_multiplier(record.damage_buff),
            None => UNLOCKED_MULTIPLIER,
        }
    }

    /// 1.0 once the defense buff is unlocked, otherwise the debuff
    pub fn defense_multiplier(&self, team: Team) -> f32 {
        match self.record(team) {
            Some(record) => buff_multiplier(record.defense_buff),
            None => UNLOCKED_MULTIPLIER,
        }
    }
}

impl Default for ScoreLedger {
    fn default() -> Self {
        Self::new(BuffThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::{AuthorityResolver, EntityRef};
    use uuid::Uuid;

    #[test]
    fn test_initial_state() {
        let ledger = ScoreLedger::default();
        for team in [Team::TeamA, Team::TeamB] {
            assert_eq!(ledger.score(team), 0);
            assert!(!ledger.is_unlocked(team, BuffKind::Damage));
            assert!(!ledger.is_unlocked(team, BuffKind::Defense));
            assert_eq!(ledger.damage_multiplier(team), 0.5);
            assert_eq!(ledger.defense_multiplier(team), 0.5);
        }
    }

    #[test]
    fn test_milestone_scenario() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();

        let first = ledger.award_points_named(&token, "Team1", 50).unwrap();
        assert_eq!(first.score, 50);
        assert_eq!(first.unlocked.as_slice(), &[BuffKind::Damage]);
        assert!(ledger.is_unlocked(Team::TeamA, BuffKind::Damage));
        assert!(!ledger.is_unlocked(Team::TeamA, BuffKind::Defense));
        assert_eq!(ledger.damage_multiplier(Team::TeamA), 1.0);
        assert_eq!(ledger.defense_multiplier(Team::TeamA), 0.5);

        let second = ledger.award_points_named(&token, "Team1", 50).unwrap();
        assert_eq!(second.score, 100);
        assert_eq!(second.unlocked.as_slice(), &[BuffKind::Defense]);
        assert!(ledger.is_unlocked(Team::TeamA, BuffKind::Defense));

        // Other team untouched
        assert_eq!(ledger.score(Team::TeamB), 0);
    }

    #[test]
    fn test_unlock_is_exactly_once() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();

        let mut unlocks = 0;
        for _ in 0..20 {
            let outcome = ledger.award_points(&token, Team::TeamB, 10).unwrap();
            unlocks += outcome
                .unlocked
                .iter()
                .filter(|b| **b == BuffKind::Damage)
                .count();
        }
        assert_eq!(unlocks, 1);
    }

    #[test]
    fn test_both_buffs_in_one_award() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();

        let outcome = ledger.award_points(&token, Team::TeamA, 150).unwrap();
        assert_eq!(outcome.unlocked.as_slice(), &[BuffKind::Damage, BuffKind::Defense]);
        assert_eq!(outcome.notifications().len(), 3);
    }

    #[test]
    fn test_buff_never_reverts() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();

        ledger.award_points(&token, Team::TeamA, 60).unwrap();
        ledger.award_points(&token, Team::TeamA, -30).unwrap();

        let record = ledger.record(Team::TeamA).unwrap();
        assert_eq!(record.score, 30);
        assert!(record.damage_buff);
        assert_eq!(record.damage_unlocked_at, Some(60));
        assert!(record.damage_unlocked_at.unwrap() >= ledger.thresholds().damage);
    }

    #[test]
    fn test_unknown_team_rejected() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();

        assert_eq!(
            ledger.award_points_named(&token, "Team9", 10),
            Err(InvalidReason::UnknownTeam("Team9".to_string()).into())
        );
        assert_eq!(
            ledger.award_points(&token, Team::Neutral, 10),
            Err(InvalidReason::NeutralTeam.into())
        );
        assert_eq!(ledger.score(Team::TeamA), 0);
        assert_eq!(ledger.score(Team::TeamB), 0);
    }

    #[test]
    fn test_award_needs_ledger_authority() {
        let resolver = AuthorityResolver::local_authority(Uuid::new_v4());
        let flag_only = resolver.claim(&EntityRef::Flag(Team::TeamA)).unwrap();
        let mut ledger = ScoreLedger::default();

        assert!(matches!(
            ledger.award_points(&flag_only, Team::TeamA, 100),
            Err(CommandRejection::AuthorityViolation(_))
        ));
        assert_eq!(ledger.score(Team::TeamA), 0);
        assert!(!ledger.is_unlocked(Team::TeamA, BuffKind::Defense));
    }

    #[test]
    fn test_alias_normalization() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();

        ledger.award_points_named(&token, " blue ", 5).unwrap();
        ledger.award_points_named(&token, "TEAM1", 5).unwrap();
        assert_eq!(ledger.score(Team::TeamA), 10);
    }

    #[test]
    fn test_neutral_multiplier() {
        let ledger = ScoreLedger::default();
        assert_eq!(ledger.damage_multiplier(Team::Neutral), 1.0);
    }
}
