//! Match constants. Tunable values are defaults for `MatchConfig`.

/// Simulation timing
pub mod tick {
    /// Authoritative tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;

    /// Convert a duration in seconds to a whole number of ticks (rounded up)
    pub fn from_secs(secs: f32) -> u64 {
        if secs <= 0.0 {
            return 0;
        }
        (secs * TICK_RATE as f32).ceil() as u64
    }

    /// Convert ticks back to seconds
    pub fn to_secs(ticks: u64) -> f32 {
        ticks as f32 / TICK_RATE as f32
    }
}

/// Flag lifecycle constants
pub mod flag {
    /// Seconds a dropped flag waits before returning home
    pub const AUTO_RETURN_SECS: f32 = 15.0;
    /// Height above the carrier's position at which a carried flag rides
    pub const CARRY_HEIGHT: f32 = 2.0;
    /// Ground distance within which both flags count as captured at a base
    pub const CAPTURE_RADIUS: f32 = 2.0;
    /// Ground distance within which a player may pick up a flag
    pub const PICKUP_RADIUS: f32 = 3.0;
}

/// Score and buff thresholds
pub mod score {
    /// Score at which the damage buff unlocks
    pub const DAMAGE_BUFF_THRESHOLD: i64 = 50;
    /// Score at which the defense buff unlocks
    pub const DEFENSE_BUFF_THRESHOLD: i64 = 100;
    /// Multiplier applied while a buff is still locked
    pub const DEBUFF_MULTIPLIER: f32 = 0.5;
    /// Multiplier once a buff is unlocked
    pub const UNLOCKED_MULTIPLIER: f32 = 1.0;
}

/// Coin economy
pub mod coins {
    /// Held coin capacity per player (0 = unbounded)
    pub const CAPACITY: usize = 10;
    /// Value of a coin whose faction matches the collector's team
    pub const SAME_TEAM_VALUE: i64 = 1;
    /// Value of a coin taken from the opposing faction
    pub const OPPOSITE_TEAM_VALUE: i64 = 2;
    /// Value of a neutral coin
    pub const NEUTRAL_VALUE: i64 = 1;
    /// Seconds between coin spawns
    pub const SPAWN_INTERVAL_SECS: f32 = 3.0;
    /// Seconds a collected coin lingers before despawning
    pub const DESPAWN_DELAY_SECS: f32 = 2.0;
    /// Maximum uncollected coins in the world at once
    pub const MAX_ACTIVE: usize = 24;
    /// Ground distance within which a player may pick up a coin
    pub const PICKUP_RADIUS: f32 = 2.5;
    /// Ground distance from the own base within which a deposit is accepted
    pub const DEPOSIT_RADIUS: f32 = 6.0;
}

/// Territorial damage modifiers
pub mod territory {
    /// Damage multiplier deep in enemy territory
    pub const MIN_MULTIPLIER: f32 = 0.5;
    /// Damage multiplier at the own base
    pub const MAX_MULTIPLIER: f32 = 1.5;
    /// Distances below this are treated as zero
    pub const DISTANCE_EPSILON: f32 = 1e-4;
}

/// Command processing
pub mod command {
    /// Ticks an admitted command may stay in flight before its key is released
    pub const IN_FLIGHT_TIMEOUT_TICKS: u64 = 90;
    /// Ticks a completed command's key keeps rejecting redeliveries
    pub const COMPLETED_RETENTION_TICKS: u64 = 15;
    /// Inbox capacity between connection handlers and the tick
    pub const INBOX_CAPACITY: usize = 1024;
    /// Maximum absolute coordinate accepted in a reported position
    pub const MAX_COORDINATE: f32 = 10_000.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_conversion() {
        assert_eq!(tick::from_secs(15.0), 450);
        assert_eq!(tick::from_secs(0.0), 0);
        assert_eq!(tick::from_secs(-1.0), 0);
        // Partial ticks round up so a timer never fires early
        assert_eq!(tick::from_secs(0.01), 1);
        assert!((tick::to_secs(450) - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_thresholds_ordered() {
        assert!(score::DAMAGE_BUFF_THRESHOLD < score::DEFENSE_BUFF_THRESHOLD);
        assert!(territory::MIN_MULTIPLIER < territory::MAX_MULTIPLIER);
    }
}
