//! Replication channel and read-only mirrors
//!
//! The authority publishes each [`Notification`] once; the channel stamps it
//! with the next sequence number of its entity and fans it out to local
//! subscribers and the outbound queue. A [`Mirror`] applies updates
//! idempotently: anything not newer than the last applied sequence of that
//! entity is ignored, so duplicated delivery converges to the same state.

use std::collections::VecDeque;

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::command::InvalidReason;
use crate::game::authority::EntityRef;
use crate::game::events::{BuffKind, FlagStatus, Notification};
use crate::game::score::buff_multiplier;
use crate::game::state::{CoinId, PlayerId, World};
use crate::game::team::{Team, COMPETING_TEAMS};
use crate::net::protocol::{
    CoinSnapshot, CustodySnapshot, FlagSnapshot, PlayerSnapshot, ReplicatedUpdate, TeamSnapshot,
    WorldSnapshot,
};
use crate::util::vec3::Vec3;

/// Authority side of replication
#[derive(Debug, Default)]
pub struct ReplicationChannel {
    sequences: HashMap<EntityRef, u64>,
    subscribers: Vec<Sender<ReplicatedUpdate>>,
    outbound: Vec<ReplicatedUpdate>,
}

impl ReplicationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every update published from now on
    pub fn subscribe(&mut self) -> Receiver<ReplicatedUpdate> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Stamp and fan out notifications. Returns the stamped updates.
    pub fn publish<I>(&mut self, tick: u64, notifications: I) -> Vec<ReplicatedUpdate>
    where
        I: IntoIterator<Item = Notification>,
    {
        let mut published = Vec::new();
        for notification in notifications {
            let entity = notification.entity();
            let seq = self.sequences.entry(entity).or_insert(0);
            *seq += 1;

            let update = ReplicatedUpdate {
                entity,
                seq: *seq,
                tick,
                notification,
            };
            trace!("Publishing {:?} seq {}", entity, update.seq);
            published.push(update);
        }

        if published.is_empty() {
            return published;
        }

        // Drop subscribers whose receiver is gone
        self.subscribers
            .retain(|tx| published.iter().all(|u| tx.send(u.clone()).is_ok()));
        self.outbound.extend(published.iter().cloned());
        published
    }

    /// Take everything queued for the transport
    pub fn drain_outbound(&mut self) -> Vec<ReplicatedUpdate> {
        std::mem::take(&mut self.outbound)
    }

    pub fn last_seq(&self, entity: &EntityRef) -> u64 {
        self.sequences.get(entity).copied().unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Full state for a late-joining replica
    pub fn snapshot(&self, world: &World) -> WorldSnapshot {
        let flags = world
            .flags()
            .iter()
            .map(|flag| FlagSnapshot {
                team: flag.owner(),
                state: flag.status(),
                carrier: flag.carrier(),
                position: flag.position(),
            })
            .collect();

        let teams = COMPETING_TEAMS
            .iter()
            .filter_map(|&team| {
                world.scores().record(team).map(|record| TeamSnapshot {
                    team,
                    score: record.score,
                    damage_buff: record.damage_buff,
                    defense_buff: record.defense_buff,
                })
            })
            .collect();

        let custody = world
            .players()
            .map(|player| CustodySnapshot {
                player: player.id,
                count: world.coins().held_count(player.id),
                value: world.coins().held_value(player.id),
            })
            .collect();

        let coins = world
            .spawner()
            .coins()
            .map(|coin| CoinSnapshot {
                id: coin.id,
                faction: coin.faction,
                position: coin.position,
                collected: !coin.is_available(),
            })
            .collect();

        let players = world
            .players()
            .map(|player| PlayerSnapshot {
                id: player.id,
                team: player.team,
                position: player.position,
                alive: player.alive,
            })
            .collect();

        WorldSnapshot {
            tick: world.current_tick(),
            flags,
            teams,
            custody,
            coins,
            players,
            winner: world.result().map(|r| r.winner),
            sequences: self.sequences.iter().map(|(e, s)| (*e, *s)).collect(),
        }
    }
}

/// Replicated view of one flag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagView {
    pub state: FlagStatus,
    pub carrier: Option<PlayerId>,
    pub position: Vec3,
}

impl Default for FlagView {
    fn default() -> Self {
        Self {
            state: FlagStatus::AtHome,
            carrier: None,
            position: Vec3::ZERO,
        }
    }
}

/// Replicated view of one team's score record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeamView {
    pub score: i64,
    pub damage_buff: bool,
    pub defense_buff: bool,
}

/// Messages and rejections a mirror keeps, oldest dropped first
const MIRROR_LOG_LEN: usize = 64;

fn push_bounded<T>(log: &mut VecDeque<T>, item: T) {
    log.push_back(item);
    while log.len() > MIRROR_LOG_LEN {
        log.pop_front();
    }
}

/// Read-only local copy of the authoritative state
#[derive(Debug, Default)]
pub struct Mirror {
    tick: u64,
    sequences: HashMap<EntityRef, u64>,
    flags: [FlagView; 2],
    teams: [TeamView; 2],
    custody: HashMap<PlayerId, (usize, i64)>,
    coins: HashMap<CoinId, CoinSnapshot>,
    players: HashMap<PlayerId, PlayerSnapshot>,
    winner: Option<Team>,
    messages: VecDeque<String>,
    rejections: VecDeque<InvalidReason>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update. False when it was stale or a redelivery.
    pub fn apply(&mut self, update: &ReplicatedUpdate) -> bool {
        let last = self.sequences.entry(update.entity).or_insert(0);
        if update.seq <= *last {
            debug!("Ignoring stale update {:?} seq {} (have {})", update.entity, update.seq, *last);
            return false;
        }
        *last = update.seq;
        self.tick = self.tick.max(update.tick);
        self.apply_notification(&update.notification);
        true
    }

    /// Replace the whole view with a snapshot
    pub fn apply_snapshot(&mut self, snapshot: &WorldSnapshot) {
        *self = Mirror::new();
        self.tick = snapshot.tick;
        self.sequences = snapshot.sequences.iter().copied().collect();

        for flag in &snapshot.flags {
            if let Some(i) = flag.team.index() {
                self.flags[i] = FlagView {
                    state: flag.state,
                    carrier: flag.carrier,
                    position: flag.position,
                };
            }
        }
        for team in &snapshot.teams {
            if let Some(i) = team.team.index() {
                self.teams[i] = TeamView {
                    score: team.score,
                    damage_buff: team.damage_buff,
                    defense_buff: team.defense_buff,
                };
            }
        }
        self.custody = snapshot
            .custody
            .iter()
            .map(|c| (c.player, (c.count, c.value)))
            .collect();
        self.coins = snapshot.coins.iter().map(|c| (c.id, *c)).collect();
        self.players = snapshot.players.iter().map(|p| (p.id, *p)).collect();
        self.winner = snapshot.winner;
    }

    fn apply_notification(&mut self, notification: &Notification) {
        match notification {
            Notification::FlagStateChanged {
                flag,
                state,
                carrier,
                position,
                message,
            } => {
                if let Some(i) = flag.index() {
                    self.flags[i] = FlagView {
                        state: *state,
                        carrier: *carrier,
                        position: *position,
                    };
                }
                push_bounded(&mut self.messages, message.clone());
            }
            Notification::FlagMoved { flag, position } => {
                if let Some(i) = flag.index() {
                    self.flags[i].position = *position;
                }
            }
            Notification::TeamScoreChanged { team, score } => {
                if let Some(i) = team.index() {
                    self.teams[i].score = *score;
                }
            }
            Notification::BuffUnlocked { team, buff } => {
                if let Some(i) = team.index() {
                    match buff {
                        BuffKind::Damage => self.teams[i].damage_buff = true,
                        BuffKind::Defense => self.teams[i].defense_buff = true,
                    }
                }
            }
            Notification::CoinCountChanged { player, count, value } => {
                self.custody.insert(*player, (*count, *value));
            }
            Notification::CoinSpawned {
                coin,
                faction,
                position,
            } => {
                self.coins.insert(
                    *coin,
                    CoinSnapshot {
                        id: *coin,
                        faction: *faction,
                        position: *position,
                        collected: false,
                    },
                );
            }
            Notification::CoinCollected { coin, .. } => {
                if let Some(c) = self.coins.get_mut(coin) {
                    c.collected = true;
                }
            }
            Notification::CoinDespawned { coin } => {
                self.coins.remove(coin);
            }
            Notification::PlayerSpawned {
                player,
                team,
                position,
            } => {
                self.players.insert(
                    *player,
                    PlayerSnapshot {
                        id: *player,
                        team: *team,
                        position: *position,
                        alive: true,
                    },
                );
                self.custody.entry(*player).or_insert((0, 0));
            }
            Notification::PlayerLeft { player } => {
                self.players.remove(player);
                self.custody.remove(player);
            }
            Notification::MatchOver { winner, message } => {
                self.winner = Some(*winner);
                push_bounded(&mut self.messages, message.clone());
            }
            Notification::CommandRejected { reason, .. } => {
                push_bounded(&mut self.rejections, reason.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn flag_state(&self, flag: Team) -> Option<FlagStatus> {
        flag.index().map(|i| self.flags[i].state)
    }

    pub fn flag(&self, flag: Team) -> Option<&FlagView> {
        flag.index().map(|i| &self.flags[i])
    }

    pub fn team_score(&self, team: Team) -> i64 {
        team.index().map(|i| self.teams[i].score).unwrap_or(0)
    }

    pub fn is_unlocked(&self, team: Team, buff: BuffKind) -> bool {
        team.index()
            .map(|i| match buff {
                BuffKind::Damage => self.teams[i].damage_buff,
                BuffKind::Defense => self.teams[i].defense_buff,
            })
            .unwrap_or(false)
    }

    /// Same rule as the authority's ledger, evaluated on replicated fields
    pub fn damage_multiplier(&self, team: Team) -> f32 {
        match team.index() {
            Some(i) => buff_multiplier(self.teams[i].damage_buff),
            None => buff_multiplier(true),
        }
    }

    pub fn defense_multiplier(&self, team: Team) -> f32 {
        match team.index() {
            Some(i) => buff_multiplier(self.teams[i].defense_buff),
            None => buff_multiplier(true),
        }
    }

    pub fn held_coin_count(&self, player: PlayerId) -> usize {
        self.custody.get(&player).map(|(count, _)| *count).unwrap_or(0)
    }

    pub fn held_coin_value(&self, player: PlayerId) -> i64 {
        self.custody.get(&player).map(|(_, value)| *value).unwrap_or(0)
    }

    pub fn coin(&self, coin: CoinId) -> Option<&CoinSnapshot> {
        self.coins.get(&coin)
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }

    pub fn player_team(&self, player: PlayerId) -> Option<Team> {
        self.players.get(&player).map(|p| p.team)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    pub fn is_game_over(&self) -> bool {
        self.winner.is_some()
    }

    /// Most recent human-readable messages in arrival order
    pub fn messages(&self) -> &VecDeque<String> {
        &self.messages
    }

    /// Most recent rejections addressed to this mirror's peer
    pub fn rejections(&self) -> &VecDeque<InvalidReason> {
        &self.rejections
    }

    pub fn last_seq(&self, entity: &EntityRef) -> u64 {
        self.sequences.get(entity).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::AuthorityToken;
    use crate::game::score::ScoreLedger;
    use uuid::Uuid;

    #[test]
    fn test_sequences_per_entity() {
        let mut channel = ReplicationChannel::new();
        let updates = channel.publish(
            1,
            vec![
                Notification::TeamScoreChanged {
                    team: Team::TeamA,
                    score: 5,
                },
                Notification::TeamScoreChanged {
                    team: Team::TeamA,
                    score: 9,
                },
                Notification::TeamScoreChanged {
                    team: Team::TeamB,
                    score: 2,
                },
            ],
        );

        assert_eq!(updates[0].seq, 1);
        assert_eq!(updates[1].seq, 2);
        assert_eq!(updates[2].seq, 1);
        assert_eq!(channel.last_seq(&EntityRef::TeamLedger(Team::TeamA)), 2);
        assert_eq!(channel.drain_outbound().len(), 3);
        assert!(channel.drain_outbound().is_empty());
    }

    #[test]
    fn test_mirror_converges_under_duplication() {
        let token = AuthorityToken::for_tests();
        let mut ledger = ScoreLedger::default();
        let mut channel = ReplicationChannel::new();
        let rx = channel.subscribe();

        for _ in 0..6 {
            let outcome = ledger.award_points(&token, Team::TeamB, 20).unwrap();
            channel.publish(0, outcome.notifications());
        }

        let updates: Vec<ReplicatedUpdate> = rx.try_iter().collect();
        let mut mirror = Mirror::new();
        // Every update delivered twice, second copy out of order
        for update in &updates {
            mirror.apply(update);
        }
        for update in updates.iter().rev() {
            assert!(!mirror.apply(update));
        }

        assert_eq!(mirror.team_score(Team::TeamB), ledger.score(Team::TeamB));
        assert_eq!(mirror.damage_multiplier(Team::TeamB), ledger.damage_multiplier(Team::TeamB));
        assert_eq!(mirror.defense_multiplier(Team::TeamB), ledger.defense_multiplier(Team::TeamB));
        assert_eq!(mirror.damage_multiplier(Team::TeamA), 0.5);
    }

    #[test]
    fn test_mirror_logs_stay_bounded() {
        let mut channel = ReplicationChannel::new();
        let peer = Uuid::new_v4();
        let rejections: Vec<_> = (0..MIRROR_LOG_LEN + 10)
            .map(|i| Notification::CommandRejected {
                peer,
                reason: if i % 2 == 0 {
                    InvalidReason::NotSpawned
                } else {
                    InvalidReason::FlagAtHome
                },
            })
            .collect();
        let updates = channel.publish(1, rejections);

        let mut mirror = Mirror::new();
        for update in &updates {
            mirror.apply(update);
        }
        assert_eq!(mirror.rejections().len(), MIRROR_LOG_LEN);
        // MIRROR_LOG_LEN + 10 is even, so the newest entry is odd
        assert_eq!(mirror.rejections().back(), Some(&InvalidReason::FlagAtHome));
    }

    #[test]
    fn test_stale_flag_update_ignored() {
        let mut mirror = Mirror::new();
        let carrier = Uuid::new_v4();
        let carried = ReplicatedUpdate {
            entity: EntityRef::Flag(Team::TeamA),
            seq: 2,
            tick: 10,
            notification: Notification::FlagStateChanged {
                flag: Team::TeamA,
                state: FlagStatus::Carried,
                carrier: Some(carrier),
                position: Vec3::new(0.0, 2.0, 0.0),
                message: String::new(),
            },
        };
        let older = ReplicatedUpdate {
            entity: EntityRef::Flag(Team::TeamA),
            seq: 1,
            tick: 5,
            notification: Notification::FlagStateChanged {
                flag: Team::TeamA,
                state: FlagStatus::Dropped,
                carrier: None,
                position: Vec3::ZERO,
                message: String::new(),
            },
        };

        assert!(mirror.apply(&carried));
        assert!(!mirror.apply(&older));
        assert_eq!(mirror.flag_state(Team::TeamA), Some(FlagStatus::Carried));
        assert_eq!(mirror.flag(Team::TeamA).unwrap().carrier, Some(carrier));
    }

    #[test]
    fn test_coin_lifecycle_in_mirror() {
        let mut channel = ReplicationChannel::new();
        let player = Uuid::new_v4();
        let updates = channel.publish(
            3,
            vec![
                Notification::CoinSpawned {
                    coin: 1,
                    faction: Team::Neutral,
                    position: Vec3::ZERO,
                },
                Notification::CoinCollected { coin: 1, player },
                Notification::CoinCountChanged {
                    player,
                    count: 1,
                    value: 1,
                },
            ],
        );

        let mut mirror = Mirror::new();
        for update in &updates {
            mirror.apply(update);
        }
        assert!(mirror.coin(1).unwrap().collected);
        assert_eq!(mirror.held_coin_count(player), 1);

        let despawn = channel.publish(4, vec![Notification::CoinDespawned { coin: 1 }]);
        mirror.apply(&despawn[0]);
        assert!(mirror.coin(1).is_none());
    }

    #[test]
    fn test_dropped_subscriber_removed() {
        let mut channel = ReplicationChannel::new();
        let rx = channel.subscribe();
        drop(rx);
        let _kept = channel.subscribe();

        channel.publish(
            0,
            vec![Notification::PlayerLeft {
                player: Uuid::new_v4(),
            }],
        );
        assert_eq!(channel.subscriber_count(), 1);
    }
}
