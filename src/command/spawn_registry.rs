//! Spawn-once-per-peer registry
//!
//! A join notification may be delivered any number of times; only the first one
//! for a peer produces a player.

use hashbrown::HashSet;

use crate::command::PeerId;

#[derive(Debug, Default)]
pub struct SpawnRegistry {
    spawned: HashSet<PeerId>,
}

impl SpawnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spawn. False if the peer already has a player.
    pub fn try_register(&mut self, peer: PeerId) -> bool {
        self.spawned.insert(peer)
    }

    /// Forget a peer so it may spawn again (after leaving)
    pub fn release(&mut self, peer: PeerId) -> bool {
        self.spawned.remove(&peer)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.spawned.contains(&peer)
    }

    pub fn len(&self) -> usize {
        self.spawned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty()
    }
}
