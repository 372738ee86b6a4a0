//! Tick-deadline timers
//!
//! Timers are plain data checked once per tick. Nothing sleeps: a flag whose
//! auto-return is due at tick N+k simply sees `expired(now)` become true at that
//! tick. Arming a timer replaces any prior deadline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single optional deadline owned by an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    deadline: Option<u64>,
}

impl Timer {
    pub const IDLE: Timer = Timer { deadline: None };

    /// A timer armed at `now` for `duration` ticks
    pub fn armed(now: u64, duration: u64) -> Self {
        Self {
            deadline: Some(now.saturating_add(duration)),
        }
    }

    /// Arm (or re-arm) the timer; the previous deadline is discarded
    pub fn arm(&mut self, now: u64, duration: u64) {
        self.deadline = Some(now.saturating_add(duration));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// Ticks until expiry; `None` when idle, `Some(0)` when due
    pub fn remaining(&self, now: u64) -> Option<u64> {
        self.deadline.map(|d| d.saturating_sub(now))
    }

    /// Whether the timer is armed and its deadline has been reached
    pub fn expired(&self, now: u64) -> bool {
        matches!(self.deadline, Some(d) if now >= d)
    }
}

/// Keyed deadlines for timers that are not naturally owned by one entity
/// (coin despawns, spawn cadence)
#[derive(Debug, Clone)]
pub struct TimerScheduler<K: Ord + Copy> {
    deadlines: BTreeMap<K, u64>,
}

impl<K: Ord + Copy> TimerScheduler<K> {
    pub fn new() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }

    /// Arm a timer; replaces any pending deadline for the same key
    pub fn arm(&mut self, key: K, now: u64, duration: u64) {
        self.deadlines.insert(key, now.saturating_add(duration));
    }

    /// Cancel a timer. Returns whether one was pending.
    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub fn remaining(&self, key: K, now: u64) -> Option<u64> {
        self.deadlines.get(&key).map(|d| d.saturating_sub(now))
    }

    /// Remove and return every key whose deadline has been reached,
    /// ordered by deadline then key
    pub fn drain_expired(&mut self, now: u64) -> Vec<K> {
        let mut expired: Vec<(u64, K)> = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(&key, &deadline)| (deadline, key))
            .collect();
        expired.sort();

        for (_, key) in &expired {
            self.deadlines.remove(key);
        }

        expired.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl<K: Ord + Copy> Default for TimerScheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_lifecycle() {
        let mut timer = Timer::default();
        assert!(!timer.is_armed());
        assert!(!timer.expired(100));

        timer.arm(10, 5);
        assert_eq!(timer.deadline(), Some(15));
        assert_eq!(timer.remaining(12), Some(3));
        assert!(!timer.expired(14));
        assert!(timer.expired(15));
        assert!(timer.expired(40));

        timer.cancel();
        assert!(!timer.expired(40));
        assert_eq!(timer.remaining(40), None);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut timer = Timer::armed(0, 10);
        timer.arm(8, 10);
        // The original deadline at 10 no longer applies
        assert!(!timer.expired(10));
        assert!(timer.expired(18));
    }

    #[test]
    fn test_scheduler_drain_order() {
        let mut scheduler: TimerScheduler<u32> = TimerScheduler::new();
        scheduler.arm(1, 0, 30);
        scheduler.arm(2, 0, 10);
        scheduler.arm(3, 0, 20);

        assert!(scheduler.drain_expired(5).is_empty());
        assert_eq!(scheduler.drain_expired(25), vec![2, 3]);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.drain_expired(30), vec![1]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_scheduler_cancel_and_rearm() {
        let mut scheduler: TimerScheduler<u32> = TimerScheduler::new();
        scheduler.arm(7, 0, 10);
        assert!(scheduler.cancel(7));
        assert!(!scheduler.cancel(7));
        assert!(scheduler.drain_expired(100).is_empty());

        scheduler.arm(7, 0, 10);
        scheduler.arm(7, 5, 10);
        assert_eq!(scheduler.remaining(7, 5), Some(10));
        assert!(scheduler.drain_expired(10).is_empty());
        assert_eq!(scheduler.drain_expired(15), vec![7]);
    }
}
