//! Coin spawning and world coin lifecycle
//!
//! Coins appear at fixed spawn points on a steady cadence, up to a cap of
//! uncollected coins. A collected coin lingers for a short despawn delay so a
//! late duplicate pickup resolves to "already collected".

use hashbrown::HashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{CommandRejection, InvalidReason};
use crate::game::authority::{AuthorityToken, EntityKind};
use crate::game::constants::coins::{DESPAWN_DELAY_SECS, MAX_ACTIVE, SPAWN_INTERVAL_SECS};
use crate::game::constants::tick;
use crate::game::events::Notification;
use crate::game::state::{CoinId, PlayerId};
use crate::game::team::Team;
use crate::game::timer::{Timer, TimerScheduler};
use crate::util::vec3::Vec3;

/// Factions a spawned coin may belong to
const SPAWN_FACTIONS: [Team; 3] = [Team::TeamA, Team::TeamB, Team::Neutral];

/// Spawner tuning in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnerConfig {
    pub interval_ticks: u64,
    pub despawn_delay_ticks: u64,
    pub max_active: usize,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            interval_ticks: tick::from_secs(SPAWN_INTERVAL_SECS),
            despawn_delay_ticks: tick::from_secs(DESPAWN_DELAY_SECS),
            max_active: MAX_ACTIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinState {
    Available,
    Collected { by: PlayerId },
}

/// A coin lying in the world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldCoin {
    pub id: CoinId,
    pub faction: Team,
    pub position: Vec3,
    pub state: CoinState,
}

impl WorldCoin {
    pub fn is_available(&self) -> bool {
        self.state == CoinState::Available
    }
}

/// Owns world coins, the spawn cadence and pending despawns
#[derive(Debug, Clone)]
pub struct CoinSpawner {
    config: SpawnerConfig,
    spawn_points: Vec<Vec3>,
    coins: HashMap<CoinId, WorldCoin>,
    cadence: Timer,
    despawns: TimerScheduler<CoinId>,
    next_id: CoinId,
}

impl CoinSpawner {
    pub fn new(config: SpawnerConfig, spawn_points: Vec<Vec3>) -> Self {
        Self {
            config,
            spawn_points,
            coins: HashMap::new(),
            cadence: Timer::IDLE,
            despawns: TimerScheduler::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &SpawnerConfig {
        &self.config
    }

    /// Advance the cadence and despawn timers
    pub fn update<R: Rng>(
        &mut self,
        token: &AuthorityToken,
        now: u64,
        rng: &mut R,
    ) -> Vec<Notification> {
        if !token.covers(EntityKind::Coin) {
            return Vec::new();
        }

        let mut events = Vec::new();

        for coin in self.despawns.drain_expired(now) {
            if self.coins.remove(&coin).is_some() {
                events.push(Notification::CoinDespawned { coin });
            }
        }

        if !self.cadence.is_armed() {
            self.cadence.arm(now, self.config.interval_ticks);
        } else if self.cadence.expired(now) {
            self.cadence.arm(now, self.config.interval_ticks);
            if self.available_count() < self.config.max_active {
                if let Some(event) = self.spawn(token, rng) {
                    events.push(event);
                }
            }
        }

        events
    }

    /// Place one coin at a random spawn point
    pub fn spawn<R: Rng>(&mut self, token: &AuthorityToken, rng: &mut R) -> Option<Notification> {
        if !token.covers(EntityKind::Coin) {
            return None;
        }

        let position = *self.spawn_points.choose(rng)?;
        let faction = *SPAWN_FACTIONS.choose(rng)?;
        let id = self.next_id;
        self.next_id += 1;

        self.coins.insert(
            id,
            WorldCoin {
                id,
                faction,
                position,
                state: CoinState::Available,
            },
        );
        debug!("Spawned {} coin {} at ({:.1}, {:.1})", faction, id, position.x, position.z);

        Some(Notification::CoinSpawned {
            coin: id,
            faction,
            position,
        })
    }

    /// An uncollected coin, or why it cannot be picked up
    pub fn available(&self, coin: CoinId) -> Result<&WorldCoin, InvalidReason> {
        match self.coins.get(&coin) {
            None => Err(InvalidReason::UnknownCoin),
            Some(c) if !c.is_available() => Err(InvalidReason::CoinAlreadyCollected),
            Some(c) => Ok(c),
        }
    }

    /// Mark a coin collected and schedule its despawn
    pub fn collect(
        &mut self,
        token: &AuthorityToken,
        coin: CoinId,
        player: PlayerId,
        now: u64,
    ) -> Result<Notification, CommandRejection> {
        token.require(EntityKind::Coin)?;

        let entry = self.coins.get_mut(&coin).ok_or(InvalidReason::UnknownCoin)?;
        if !entry.is_available() {
            return Err(InvalidReason::CoinAlreadyCollected.into());
        }
        entry.state = CoinState::Collected { by: player };
        self.despawns.arm(coin, now, self.config.despawn_delay_ticks);

        Ok(Notification::CoinCollected { coin, player })
    }

    pub fn get(&self, coin: CoinId) -> Option<&WorldCoin> {
        self.coins.get(&coin)
    }

    pub fn coins(&self) -> impl Iterator<Item = &WorldCoin> {
        self.coins.values()
    }

    pub fn available_count(&self) -> usize {
        self.coins.values().filter(|c| c.is_available()).count()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::{AuthorityResolver, EntityRef};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn spawner(interval: u64, max_active: usize) -> CoinSpawner {
        CoinSpawner::new(
            SpawnerConfig {
                interval_ticks: interval,
                despawn_delay_ticks: 5,
                max_active,
            },
            vec![Vec3::ground(0.0, 0.0), Vec3::ground(10.0, 10.0)],
        )
    }

    fn spawned(events: &[Notification]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Notification::CoinSpawned { .. }))
            .count()
    }

    #[test]
    fn test_spawner_needs_coin_authority() {
        let resolver = AuthorityResolver::local_authority(Uuid::new_v4());
        let roster_only = resolver.claim(&EntityRef::Roster).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut spawner = spawner(1, 10);

        for now in 0..20 {
            assert!(spawner.update(&roster_only, now, &mut rng).is_empty());
        }
        assert!(spawner.spawn(&roster_only, &mut rng).is_none());
        assert!(spawner.is_empty());

        let token = AuthorityToken::for_tests();
        spawner.spawn(&token, &mut rng).unwrap();
        let coin = spawner.coins().next().unwrap().id;
        assert!(matches!(
            spawner.collect(&roster_only, coin, Uuid::new_v4(), 0),
            Err(CommandRejection::AuthorityViolation(_))
        ));
        assert!(spawner.get(coin).unwrap().is_available());
    }

    #[test]
    fn test_spawn_cadence() {
        let token = AuthorityToken::for_tests();
        let mut rng = StdRng::seed_from_u64(7);
        let mut spawner = spawner(10, 100);

        let mut total = 0;
        for now in 0..=30 {
            total += spawned(&spawner.update(&token, now, &mut rng));
        }
        // Armed at tick 0, fires at 10, 20, 30
        assert_eq!(total, 3);
        assert_eq!(spawner.available_count(), 3);
    }

    #[test]
    fn test_max_active_respected() {
        let token = AuthorityToken::for_tests();
        let mut rng = StdRng::seed_from_u64(7);
        let mut spawner = spawner(1, 2);

        for now in 0..50 {
            spawner.update(&token, now, &mut rng);
        }
        assert_eq!(spawner.available_count(), 2);
    }

    #[test]
    fn test_no_spawn_points() {
        let token = AuthorityToken::for_tests();
        let mut rng = StdRng::seed_from_u64(1);
        let mut spawner = CoinSpawner::new(SpawnerConfig::default(), Vec::new());
        assert!(spawner.spawn(&token, &mut rng).is_none());
    }

    #[test]
    fn test_collect_then_despawn() {
        let token = AuthorityToken::for_tests();
        let mut rng = StdRng::seed_from_u64(3);
        let mut spawner = spawner(10, 10);
        let player = Uuid::new_v4();

        let coin = match spawner.spawn(&token, &mut rng) {
            Some(Notification::CoinSpawned { coin, .. }) => coin,
            other => panic!("expected spawn, got {:?}", other),
        };

        assert!(spawner.available(coin).is_ok());
        assert_eq!(
            spawner.collect(&token, coin, player, 100),
            Ok(Notification::CoinCollected { coin, player })
        );

        // Duplicate pickup during the despawn delay
        assert_eq!(
            spawner.collect(&token, coin, Uuid::new_v4(), 101),
            Err(InvalidReason::CoinAlreadyCollected.into())
        );
        assert_eq!(spawner.available(coin).err(), Some(InvalidReason::CoinAlreadyCollected));

        let events = spawner.update(&token, 104, &mut rng);
        assert!(!events.contains(&Notification::CoinDespawned { coin }));
        let events = spawner.update(&token, 105, &mut rng);
        assert!(events.contains(&Notification::CoinDespawned { coin }));

        assert_eq!(spawner.available(coin).err(), Some(InvalidReason::UnknownCoin));
    }

    #[test]
    fn test_ids_unique() {
        let token = AuthorityToken::for_tests();
        let mut rng = StdRng::seed_from_u64(11);
        let mut spawner = spawner(10, 10);

        for _ in 0..5 {
            spawner.spawn(&token, &mut rng);
        }
        assert_eq!(spawner.len(), 5);
    }
}
