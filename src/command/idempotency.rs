//! Idempotency guard
//!
//! The transport may redeliver a command. A key is admitted once; while it is in
//! flight, and for a short retention window after it completes, every redelivery
//! is refused. Keys are released after the window (or an in-flight timeout) so a
//! later, genuinely new occurrence of the same action is admitted again.

use rustc_hash::FxHashMap;

use crate::command::{CommandKey, CommandKind, PeerId};
use crate::game::constants::command::{COMPLETED_RETENTION_TICKS, IN_FLIGHT_TIMEOUT_TICKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    InFlight { since: u64 },
    Completed { at: u64 },
}

/// Window configuration
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Ticks before an admitted-but-never-completed key is released
    pub in_flight_timeout: u64,
    /// Ticks a completed key keeps rejecting redeliveries
    pub completed_retention: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            in_flight_timeout: IN_FLIGHT_TIMEOUT_TICKS,
            completed_retention: COMPLETED_RETENTION_TICKS,
        }
    }
}

/// Counters for metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub expired: u64,
}

/// Rejects duplicate (peer, target, kind) commands
#[derive(Debug)]
pub struct IdempotencyGuard {
    keys: FxHashMap<CommandKey, KeyState>,
    config: GuardConfig,
    stats: GuardStats,
}

impl IdempotencyGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            keys: FxHashMap::default(),
            config,
            stats: GuardStats::default(),
        }
    }

    /// Admit a key. True the first time; false for any duplicate inside the window.
    pub fn admit(&mut self, key: CommandKey, now: u64) -> bool {
        if let Some(state) = self.keys.get(&key).copied() {
            if !self.is_released(state, now) {
                self.stats.duplicates += 1;
                return false;
            }
        }

        self.keys.insert(key, KeyState::InFlight { since: now });
        self.stats.admitted += 1;
        true
    }

    /// Mark an admitted key as completed; redeliveries stay refused for the
    /// retention window
    pub fn complete(&mut self, key: CommandKey, now: u64) {
        if let Some(state) = self.keys.get_mut(&key) {
            *state = KeyState::Completed { at: now };
        }
    }

    /// Forget a key immediately
    pub fn release(&mut self, key: &CommandKey) -> bool {
        self.keys.remove(key).is_some()
    }

    /// Whether the key is currently in flight
    pub fn is_in_flight(&self, key: &CommandKey) -> bool {
        matches!(self.keys.get(key), Some(KeyState::InFlight { .. }))
    }

    /// Drop every key whose window has elapsed. Returns the number released.
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.keys.len();
        let config = self.config;
        self.keys
            .retain(|_, state| !Self::window_elapsed(&config, *state, now));
        let released = before - self.keys.len();
        self.stats.expired += released as u64;
        released
    }

    /// Forget every key belonging to a peer that left, so a rejoin is admitted
    /// at once. The leave itself stays guarded against redelivery.
    pub fn forget_peer(&mut self, peer: PeerId) {
        self.keys
            .retain(|key, _| key.peer != peer || key.kind == CommandKind::Leave);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn stats(&self) -> GuardStats {
        self.stats
    }

    fn is_released(&self, state: KeyState, now: u64) -> bool {
        Self::window_elapsed(&self.config, state, now)
    }

    fn window_elapsed(config: &GuardConfig, state: KeyState, now: u64) -> bool {
        match state {
            KeyState::InFlight { since } => now >= since.saturating_add(config.in_flight_timeout),
            KeyState::Completed { at } => now >= at.saturating_add(config.completed_retention),
        }
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandEnvelope, PeerCommand, PickupTarget};
    use crate::game::team::Team;
    use uuid::Uuid;

    fn pickup_key(peer: Uuid) -> CommandKey {
        CommandEnvelope::new(
            peer,
            PeerCommand::Pickup {
                target: PickupTarget::Flag(Team::TeamB),
            },
        )
        .key()
    }

    fn guard() -> IdempotencyGuard {
        IdempotencyGuard::new(GuardConfig {
            in_flight_timeout: 10,
            completed_retention: 5,
        })
    }

    #[test]
    fn test_first_admit_then_duplicate() {
        let mut guard = guard();
        let key = pickup_key(Uuid::new_v4());

        assert!(guard.admit(key, 1));
        assert!(!guard.admit(key, 1));
        assert!(!guard.admit(key, 2));
        assert_eq!(guard.stats().admitted, 1);
        assert_eq!(guard.stats().duplicates, 2);
    }

    #[test]
    fn test_completed_window() {
        let mut guard = guard();
        let key = pickup_key(Uuid::new_v4());

        assert!(guard.admit(key, 1));
        guard.complete(key, 2);
        assert!(!guard.is_in_flight(&key));

        // Still inside retention
        assert!(!guard.admit(key, 6));
        // Retention elapsed: a new occurrence is admitted
        assert!(guard.admit(key, 7));
    }

    #[test]
    fn test_in_flight_timeout() {
        let mut guard = guard();
        let key = pickup_key(Uuid::new_v4());

        assert!(guard.admit(key, 0));
        assert!(guard.is_in_flight(&key));
        assert!(!guard.admit(key, 9));
        assert!(guard.admit(key, 10));
    }

    #[test]
    fn test_distinct_keys_independent() {
        let mut guard = guard();
        let a = pickup_key(Uuid::new_v4());
        let b = pickup_key(Uuid::new_v4());

        assert!(guard.admit(a, 0));
        assert!(guard.admit(b, 0));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_sweep_releases_elapsed() {
        let mut guard = guard();
        let a = pickup_key(Uuid::new_v4());
        let b = pickup_key(Uuid::new_v4());

        guard.admit(a, 0);
        guard.complete(a, 0);
        guard.admit(b, 0);

        assert_eq!(guard.sweep(5), 1);
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.sweep(10), 1);
        assert!(guard.is_empty());
        assert_eq!(guard.stats().expired, 2);
    }

    #[test]
    fn test_release_and_forget_peer() {
        let mut guard = guard();
        let peer = Uuid::new_v4();
        let key = pickup_key(peer);

        guard.admit(key, 0);
        assert!(guard.release(&key));
        assert!(guard.admit(key, 0));

        let deposit = CommandEnvelope::new(peer, PeerCommand::Deposit).key();
        guard.admit(deposit, 0);
        let leave = CommandEnvelope::new(peer, PeerCommand::Leave).key();
        guard.admit(leave, 0);
        guard.forget_peer(peer);
        assert_eq!(guard.len(), 1);
        assert!(!guard.admit(leave, 1));
        assert!(guard.admit(deposit, 1));
    }
}
