//! Coin custody ledger
//!
//! Players carry collected coins until they deposit them at their own base. A
//! deposit settles the held coins into points atomically; the caller forwards
//! the total into the score ledger.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::game::authority::{AuthorityToken, EntityKind};
use crate::game::constants::coins::{
    CAPACITY, NEUTRAL_VALUE, OPPOSITE_TEAM_VALUE, SAME_TEAM_VALUE,
};
use crate::game::events::Notification;
use crate::game::state::PlayerId;
use crate::game::team::Team;

/// Point value of a coin as a function of (coin faction, collecting team)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinValueTable {
    pub same_team: i64,
    pub opposite_team: i64,
    pub neutral: i64,
}

impl Default for CoinValueTable {
    fn default() -> Self {
        Self {
            same_team: SAME_TEAM_VALUE,
            opposite_team: OPPOSITE_TEAM_VALUE,
            neutral: NEUTRAL_VALUE,
        }
    }
}

impl CoinValueTable {
    pub fn value_for(&self, faction: Team, collector: Team) -> i64 {
        if faction == Team::Neutral || collector == Team::Neutral {
            self.neutral
        } else if faction == collector {
            self.same_team
        } else {
            self.opposite_team
        }
    }

    /// Value for externally named teams. Unknown names count as neutral.
    pub fn value_for_names(&self, faction: &str, collector: &str) -> i64 {
        let faction = faction.parse().unwrap_or(Team::Neutral);
        let collector = collector.parse().unwrap_or(Team::Neutral);
        self.value_for(faction, collector)
    }
}

/// A coin being carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldCoin {
    pub faction: Team,
}

/// Coins held by one player
#[derive(Debug, Clone)]
pub struct Custody {
    team: Team,
    held: SmallVec<[HeldCoin; 16]>,
}

impl Custody {
    fn new(team: Team) -> Self {
        Self {
            team,
            held: SmallVec::new(),
        }
    }

    pub fn team(&self) -> Team {
        self.team
    }

    pub fn held(&self) -> &[HeldCoin] {
        &self.held
    }
}

/// Per-player coin custody
#[derive(Debug, Clone)]
pub struct CoinLedger {
    custody: HashMap<PlayerId, Custody>,
    values: CoinValueTable,
    /// 0 = unbounded
    capacity: usize,
}

impl CoinLedger {
    pub fn new(values: CoinValueTable, capacity: usize) -> Self {
        Self {
            custody: HashMap::new(),
            values,
            capacity,
        }
    }

    pub fn values(&self) -> &CoinValueTable {
        &self.values
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every mutator refuses, without touching custody, when this is false
    fn in_scope(token: &AuthorityToken) -> bool {
        match token.require(EntityKind::Custody) {
            Ok(()) => true,
            Err(e) => {
                warn!("Refused custody mutation: {}", e);
                false
            }
        }
    }

    /// Open custody for a newly spawned player
    pub fn register(&mut self, token: &AuthorityToken, player: PlayerId, team: Team) -> bool {
        if !Self::in_scope(token) {
            return false;
        }
        self.custody.entry(player).or_insert_with(|| Custody::new(team));
        true
    }

    /// Remove a leaving player's custody. Held coins are lost.
    pub fn unregister(&mut self, token: &AuthorityToken, player: PlayerId) -> Option<Custody> {
        if !Self::in_scope(token) {
            return None;
        }
        self.custody.remove(&player)
    }

    pub fn is_registered(&self, player: PlayerId) -> bool {
        self.custody.contains_key(&player)
    }

    /// Append a coin. False, with no mutation, at capacity, for an unknown
    /// player or without custody authority.
    pub fn try_add_coin(&mut self, token: &AuthorityToken, player: PlayerId, faction: Team) -> bool {
        if !Self::in_scope(token) {
            return false;
        }

        let capacity = self.capacity;
        let Some(custody) = self.custody.get_mut(&player) else {
            return false;
        };
        if capacity > 0 && custody.held.len() >= capacity {
            debug!("Player {} at coin capacity ({})", player, capacity);
            return false;
        }
        custody.held.push(HeldCoin { faction });
        true
    }

    /// Sum the held coins' value and clear custody in one step.
    /// Returns 0 when nothing is held. Never retry: a second call yields 0.
    pub fn settle_deposit(&mut self, token: &AuthorityToken, player: PlayerId) -> i64 {
        if !Self::in_scope(token) {
            return 0;
        }

        let values = self.values;
        let Some(custody) = self.custody.get_mut(&player) else {
            return 0;
        };
        let team = custody.team;
        let total = custody
            .held
            .drain(..)
            .map(|coin| values.value_for(coin.faction, team))
            .sum();
        debug!("Player {} settled deposit worth {}", player, total);
        total
    }

    /// Drop everything held without scoring (death)
    pub fn clear(&mut self, token: &AuthorityToken, player: PlayerId) -> usize {
        if !Self::in_scope(token) {
            return 0;
        }
        self.custody
            .get_mut(&player)
            .map(|custody| {
                let lost = custody.held.len();
                custody.held.clear();
                lost
            })
            .unwrap_or(0)
    }

    pub fn held_count(&self, player: PlayerId) -> usize {
        self.custody.get(&player).map(|c| c.held.len()).unwrap_or(0)
    }

    /// What a deposit would be worth right now
    pub fn held_value(&self, player: PlayerId) -> i64 {
        self.custody
            .get(&player)
            .map(|c| {
                c.held
                    .iter()
                    .map(|coin| self.values.value_for(coin.faction, c.team))
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn custody(&self, player: PlayerId) -> Option<&Custody> {
        self.custody.get(&player)
    }

    /// Current count and value of a player's custody as a notification
    pub fn count_notification(&self, player: PlayerId) -> Notification {
        Notification::CoinCountChanged {
            player,
            count: self.held_count(player),
            value: self.held_value(player),
        }
    }
}

impl Default for CoinLedger {
    fn default() -> Self {
        Self::new(CoinValueTable::default(), CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::{AuthorityResolver, EntityRef};
    use crate::game::score::ScoreLedger;
    use uuid::Uuid;

    #[test]
    fn test_value_table() {
        let table = CoinValueTable::default();
        assert_eq!(table.value_for(Team::TeamA, Team::TeamA), 1);
        assert_eq!(table.value_for(Team::TeamB, Team::TeamA), 2);
        assert_eq!(table.value_for(Team::Neutral, Team::TeamB), 1);
        assert_eq!(table.value_for_names("red", "Team1"), 2);
        assert_eq!(table.value_for_names("AI", "blue"), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let token = AuthorityToken::for_tests();
        let mut ledger = CoinLedger::new(CoinValueTable::default(), 3);
        let player = Uuid::new_v4();
        ledger.register(&token, player, Team::TeamA);

        for _ in 0..3 {
            assert!(ledger.try_add_coin(&token, player, Team::Neutral));
        }
        assert!(!ledger.try_add_coin(&token, player, Team::Neutral));
        assert_eq!(ledger.held_count(player), 3);
    }

    #[test]
    fn test_unbounded_capacity() {
        let token = AuthorityToken::for_tests();
        let mut ledger = CoinLedger::new(CoinValueTable::default(), 0);
        let player = Uuid::new_v4();
        ledger.register(&token, player, Team::TeamB);

        for _ in 0..100 {
            assert!(ledger.try_add_coin(&token, player, Team::TeamA));
        }
        assert_eq!(ledger.held_count(player), 100);
    }

    #[test]
    fn test_unregistered_player() {
        let token = AuthorityToken::for_tests();
        let mut ledger = CoinLedger::default();
        let stranger = Uuid::new_v4();

        assert!(!ledger.try_add_coin(&token, stranger, Team::TeamA));
        assert_eq!(ledger.settle_deposit(&token, stranger), 0);
        assert_eq!(ledger.held_count(stranger), 0);
    }

    #[test]
    fn test_custody_needs_custody_authority() {
        let token = AuthorityToken::for_tests();
        let resolver = AuthorityResolver::local_authority(Uuid::new_v4());
        let flag_only = resolver.claim(&EntityRef::Flag(Team::TeamB)).unwrap();
        let mut coins = CoinLedger::default();
        let player = Uuid::new_v4();

        assert!(!coins.register(&flag_only, player, Team::TeamA));
        assert!(!coins.is_registered(player));

        coins.register(&token, player, Team::TeamA);
        coins.try_add_coin(&token, player, Team::TeamB);

        assert!(!coins.try_add_coin(&flag_only, player, Team::TeamB));
        assert_eq!(coins.settle_deposit(&flag_only, player), 0);
        assert_eq!(coins.clear(&flag_only, player), 0);
        assert!(coins.unregister(&flag_only, player).is_none());
        assert_eq!(coins.held_count(player), 1);
        assert_eq!(coins.held_value(player), 2);
    }

    #[test]
    fn test_settle_and_award_round_trip() {
        let token = AuthorityToken::for_tests();
        let mut coins = CoinLedger::default();
        let mut scores = ScoreLedger::default();
        let player = Uuid::new_v4();
        coins.register(&token, player, Team::TeamA);

        // 2 own (1 each) + 1 enemy (2) + 1 neutral (1)
        coins.try_add_coin(&token, player, Team::TeamA);
        coins.try_add_coin(&token, player, Team::TeamA);
        coins.try_add_coin(&token, player, Team::TeamB);
        coins.try_add_coin(&token, player, Team::Neutral);
        assert_eq!(coins.held_value(player), 5);

        let before = scores.score(Team::TeamA);
        let points = coins.settle_deposit(&token, player);
        scores.award_points(&token, Team::TeamA, points).unwrap();

        assert_eq!(points, 5);
        assert_eq!(scores.score(Team::TeamA), before + 5);
        assert_eq!(coins.held_count(player), 0);

        // Settling again yields nothing
        assert_eq!(coins.settle_deposit(&token, player), 0);
    }

    #[test]
    fn test_clear_does_not_score() {
        let token = AuthorityToken::for_tests();
        let mut ledger = CoinLedger::default();
        let player = Uuid::new_v4();
        ledger.register(&token, player, Team::TeamB);
        ledger.try_add_coin(&token, player, Team::TeamA);
        ledger.try_add_coin(&token, player, Team::TeamA);

        assert_eq!(ledger.clear(&token, player), 2);
        assert_eq!(ledger.settle_deposit(&token, player), 0);
    }

    #[test]
    fn test_count_notification() {
        let token = AuthorityToken::for_tests();
        let mut ledger = CoinLedger::default();
        let player = Uuid::new_v4();
        ledger.register(&token, player, Team::TeamB);
        ledger.try_add_coin(&token, player, Team::TeamA);

        assert_eq!(
            ledger.count_notification(player),
            Notification::CoinCountChanged {
                player,
                count: 1,
                value: 2
            }
        );
    }

    #[test]
    fn test_register_twice_keeps_coins() {
        let token = AuthorityToken::for_tests();
        let mut ledger = CoinLedger::default();
        let player = Uuid::new_v4();
        ledger.register(&token, player, Team::TeamA);
        ledger.try_add_coin(&token, player, Team::TeamA);
        ledger.register(&token, player, Team::TeamA);
        assert_eq!(ledger.held_count(player), 1);

        assert!(ledger.unregister(&token, player).is_some());
        assert!(!ledger.is_registered(player));
    }
}
