use std::str::FromStr;

use crate::game::coins::CoinValueTable;
use crate::game::constants::{coins, flag, score, tick};
use crate::game::score::BuffThresholds;
use crate::game::spawner::SpawnerConfig;
use crate::game::state::{WorldBuilder, WorldRules};

/// Match configuration
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Seconds before a dropped flag returns home
    pub flag_auto_return_secs: f32,
    /// Ground distance for both flags to count as captured at a base
    pub capture_radius: f32,
    /// Ground distance within which a flag may be picked up or returned
    pub pickup_radius: f32,
    /// Ground distance from the own base for deposits
    pub deposit_radius: f32,
    pub damage_buff_threshold: i64,
    pub defense_buff_threshold: i64,
    /// Held coins per player (0 = unbounded)
    pub coin_capacity: usize,
    pub coin_spawn_interval_secs: f32,
    pub coin_despawn_delay_secs: f32,
    pub max_active_coins: usize,
    /// Lose held coins on death
    pub drop_coins_on_death: bool,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            flag_auto_return_secs: flag::AUTO_RETURN_SECS,
            capture_radius: flag::CAPTURE_RADIUS,
            pickup_radius: flag::PICKUP_RADIUS,
            deposit_radius: coins::DEPOSIT_RADIUS,
            damage_buff_threshold: score::DAMAGE_BUFF_THRESHOLD,
            defense_buff_threshold: score::DEFENSE_BUFF_THRESHOLD,
            coin_capacity: coins::CAPACITY,
            coin_spawn_interval_secs: coins::SPAWN_INTERVAL_SECS,
            coin_despawn_delay_secs: coins::DESPAWN_DELAY_SECS,
            max_active_coins: coins::MAX_ACTIVE,
            drop_coins_on_death: true,
            metrics_port: 9090,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("Damage buff threshold ({damage}) must not exceed defense buff threshold ({defense})")]
    ThresholdOrder { damage: i64, defense: i64 },
    #[error("METRICS_PORT cannot be 0")]
    ZeroPort,
}

/// Read and parse an environment variable, warning and keeping the default on
/// malformed or rejected values
fn env_override<T: FromStr>(key: &str, target: &mut T, accept: impl Fn(&T) -> bool) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} value '{}' out of range, using default", key, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}

fn positive(v: &f32) -> bool {
    v.is_finite() && *v > 0.0
}

impl MatchConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("FLAG_AUTO_RETURN_SECS", &mut config.flag_auto_return_secs, positive);
        env_override("CAPTURE_RADIUS", &mut config.capture_radius, positive);
        env_override("PICKUP_RADIUS", &mut config.pickup_radius, positive);
        env_override("DEPOSIT_RADIUS", &mut config.deposit_radius, positive);
        env_override("DAMAGE_BUFF_THRESHOLD", &mut config.damage_buff_threshold, |v| *v > 0);
        env_override("DEFENSE_BUFF_THRESHOLD", &mut config.defense_buff_threshold, |v| *v > 0);
        env_override("COIN_CAPACITY", &mut config.coin_capacity, |_| true);
        env_override("COIN_SPAWN_INTERVAL_SECS", &mut config.coin_spawn_interval_secs, positive);
        env_override("COIN_DESPAWN_DELAY_SECS", &mut config.coin_despawn_delay_secs, |v| {
            v.is_finite() && *v >= 0.0
        });
        env_override("MAX_ACTIVE_COINS", &mut config.max_active_coins, |v| *v > 0 && *v <= 10_000);
        env_override("DROP_COINS_ON_DEATH", &mut config.drop_coins_on_death, |_| true);
        env_override("METRICS_PORT", &mut config.metrics_port, |v| *v > 0);

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !positive(&self.flag_auto_return_secs) {
            return Err(ConfigError::NotPositive("flag_auto_return_secs"));
        }
        if !positive(&self.capture_radius) {
            return Err(ConfigError::NotPositive("capture_radius"));
        }
        if !positive(&self.pickup_radius) {
            return Err(ConfigError::NotPositive("pickup_radius"));
        }
        if !positive(&self.deposit_radius) {
            return Err(ConfigError::NotPositive("deposit_radius"));
        }
        if !positive(&self.coin_spawn_interval_secs) {
            return Err(ConfigError::NotPositive("coin_spawn_interval_secs"));
        }
        if self.max_active_coins == 0 {
            return Err(ConfigError::NotPositive("max_active_coins"));
        }
        if self.damage_buff_threshold > self.defense_buff_threshold {
            return Err(ConfigError::ThresholdOrder {
                damage: self.damage_buff_threshold,
                defense: self.defense_buff_threshold,
            });
        }
        if self.metrics_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        Ok(())
    }

    pub fn world_rules(&self) -> WorldRules {
        WorldRules {
            capture_radius: self.capture_radius,
            flag_pickup_radius: self.pickup_radius,
            coin_pickup_radius: coins::PICKUP_RADIUS,
            deposit_radius: self.deposit_radius,
            carry_height: flag::CARRY_HEIGHT,
            auto_return_ticks: tick::from_secs(self.flag_auto_return_secs),
            drop_coins_on_death: self.drop_coins_on_death,
        }
    }

    pub fn thresholds(&self) -> BuffThresholds {
        BuffThresholds {
            damage: self.damage_buff_threshold,
            defense: self.defense_buff_threshold,
        }
    }

    pub fn spawner(&self) -> SpawnerConfig {
        SpawnerConfig {
            interval_ticks: tick::from_secs(self.coin_spawn_interval_secs),
            despawn_delay_ticks: tick::from_secs(self.coin_despawn_delay_secs),
            max_active: self.max_active_coins,
        }
    }

    /// World builder carrying every tunable from this config. Bases and spawn
    /// points still have to be supplied.
    pub fn world_builder(&self) -> WorldBuilder {
        WorldBuilder::new()
            .rules(self.world_rules())
            .thresholds(self.thresholds())
            .coin_values(CoinValueTable::default())
            .coin_capacity(self.coin_capacity)
            .spawner(self.spawner())
    }
}
