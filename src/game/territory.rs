//! Territorial damage modifiers
//!
//! A player's advantage is +1 at their own base, -1 at the enemy base and 0
//! halfway between. Damage dealt scales up on home ground; damage received scales
//! down. Unlocked team buffs neutralize the penalty in enemy territory but never
//! turn it into a bonus.

use crate::game::constants::territory::{DISTANCE_EPSILON, MAX_MULTIPLIER, MIN_MULTIPLIER};

/// Advantage in [-1, +1] from the distances to each base
pub fn advantage(distance_to_own_base: f32, distance_to_enemy_base: f32) -> f32 {
    let own = distance_to_own_base.max(0.0);
    let enemy = distance_to_enemy_base.max(0.0);
    if enemy.is_infinite() && own.is_finite() {
        return 1.0;
    }
    if own.is_infinite() && enemy.is_finite() {
        return -1.0;
    }
    let total = own + enemy;
    if total < DISTANCE_EPSILON || !total.is_finite() {
        return 0.0;
    }
    (1.0 - 2.0 * own / total).clamp(-1.0, 1.0)
}

/// Multiplier curve between a min and max
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerritoryModifier {
    pub min_multiplier: f32,
    pub max_multiplier: f32,
}

impl Default for TerritoryModifier {
    fn default() -> Self {
        Self {
            min_multiplier: MIN_MULTIPLIER,
            max_multiplier: MAX_MULTIPLIER,
        }
    }
}

impl TerritoryModifier {
    pub fn new(min_multiplier: f32, max_multiplier: f32) -> Self {
        Self {
            min_multiplier,
            max_multiplier,
        }
    }

    fn curve(&self, advantage: f32) -> f32 {
        let t = (advantage.clamp(-1.0, 1.0) + 1.0) / 2.0;
        self.min_multiplier + (self.max_multiplier - self.min_multiplier) * t
    }

    /// Multiplier on damage the player deals.
    /// With the damage buff, enemy territory is floored at 1.0.
    pub fn damage_dealt(&self, advantage: f32, damage_buff: bool) -> f32 {
        let multiplier = self.curve(advantage);
        if damage_buff && advantage < 0.0 {
            multiplier.max(1.0)
        } else {
            multiplier
        }
    }

    /// Multiplier on damage the player receives; defenders are tankier at home.
    /// With the defense buff, enemy territory is capped at 1.0.
    pub fn damage_received(&self, advantage: f32, defense_buff: bool) -> f32 {
        let multiplier = self.curve(-advantage);
        if defense_buff && advantage < 0.0 {
            multiplier.min(1.0)
        } else {
            multiplier
        }
    }
}
