//! Authoritative world state
//!
//! The [`World`] is the single context object holding every shared entity:
//! flags, the score and coin ledgers, players, world coins and the match
//! latch. All writes take an [`AuthorityToken`]; reads are free.

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::spawn_registry::SpawnRegistry;
use crate::command::validator::{ValidCommand, ValidatedCommand};
use crate::command::{CommandRejection, InvalidReason};
use crate::game::authority::{AuthorityToken, EntityKind};
use crate::game::coins::{CoinLedger, CoinValueTable};
use crate::game::constants::{coins, flag, tick};
use crate::game::events::{BuffKind, FlagStatus, Notification};
use crate::game::flag::{Flag, ReturnCause};
use crate::game::match_result::{self, MatchEndReason, MatchResult};
use crate::game::score::{BuffThresholds, ScoreLedger};
use crate::game::spawner::{CoinSpawner, SpawnerConfig};
use crate::game::team::{Team, COMPETING_TEAMS};
use crate::game::territory::{self, TerritoryModifier};
use crate::util::vec3::Vec3;

/// Unique player identifier
pub type PlayerId = Uuid;

/// World coin identifier
pub type CoinId = u64;

/// A spawned player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub team: Team,
    pub position: Vec3,
    pub alive: bool,
    /// Tick when the player spawned or last respawned
    pub spawn_tick: u64,
}

/// Distances and durations the world enforces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldRules {
    pub capture_radius: f32,
    pub flag_pickup_radius: f32,
    pub coin_pickup_radius: f32,
    pub deposit_radius: f32,
    pub carry_height: f32,
    pub auto_return_ticks: u64,
    pub drop_coins_on_death: bool,
}

impl Default for WorldRules {
    fn default() -> Self {
        Self {
            capture_radius: flag::CAPTURE_RADIUS,
            flag_pickup_radius: flag::PICKUP_RADIUS,
            coin_pickup_radius: coins::PICKUP_RADIUS,
            deposit_radius: coins::DEPOSIT_RADIUS,
            carry_height: flag::CARRY_HEIGHT,
            auto_return_ticks: tick::from_secs(flag::AUTO_RETURN_SECS),
            drop_coins_on_death: true,
        }
    }
}

/// World construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("Invalid position for {0}")]
    InvalidPosition(&'static str),
}

/// Builder for [`World`]. Fails fast when a required collaborator is absent.
#[derive(Debug, Clone, Default)]
pub struct WorldBuilder {
    rules: WorldRules,
    thresholds: BuffThresholds,
    coin_values: CoinValueTable,
    coin_capacity: Option<usize>,
    spawner: SpawnerConfig,
    bases: [Option<Vec3>; 2],
    spawn_points: [Vec<Vec3>; 2],
    coin_spawn_points: Vec<Vec3>,
    seed: Option<u64>,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(mut self, rules: WorldRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn thresholds(mut self, thresholds: BuffThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn coin_values(mut self, values: CoinValueTable) -> Self {
        self.coin_values = values;
        self
    }

    /// Held coin capacity per player (0 = unbounded)
    pub fn coin_capacity(mut self, capacity: usize) -> Self {
        self.coin_capacity = Some(capacity);
        self
    }

    pub fn spawner(mut self, config: SpawnerConfig) -> Self {
        self.spawner = config;
        self
    }

    /// Home base (and flag home) of a competing team
    pub fn base(mut self, team: Team, position: Vec3) -> Self {
        if let Some(i) = team.index() {
            self.bases[i] = Some(position);
        }
        self
    }

    pub fn spawn_point(mut self, team: Team, position: Vec3) -> Self {
        if let Some(i) = team.index() {
            self.spawn_points[i].push(position);
        }
        self
    }

    pub fn coin_spawn_point(mut self, position: Vec3) -> Self {
        self.coin_spawn_points.push(position);
        self
    }

    /// Fixed RNG seed for reproducible coin spawns
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<World, WorldError> {
        let base_a = self.bases[0].ok_or(WorldError::MissingCollaborator("Team A base"))?;
        let base_b = self.bases[1].ok_or(WorldError::MissingCollaborator("Team B base"))?;
        if self.spawn_points[0].is_empty() {
            return Err(WorldError::MissingCollaborator("Team A spawn points"));
        }
        if self.spawn_points[1].is_empty() {
            return Err(WorldError::MissingCollaborator("Team B spawn points"));
        }
        if !base_a.is_finite() || !base_b.is_finite() {
            return Err(WorldError::InvalidPosition("team base"));
        }
        if self
            .spawn_points
            .iter()
            .flatten()
            .chain(self.coin_spawn_points.iter())
            .any(|p| !p.is_finite())
        {
            return Err(WorldError::InvalidPosition("spawn point"));
        }
        if self.coin_spawn_points.is_empty() {
            warn!("No coin spawn points configured, coins will not spawn");
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(World {
            rules: self.rules,
            bases: [base_a, base_b],
            spawn_points: self.spawn_points,
            flags: [Flag::new(Team::TeamA, base_a), Flag::new(Team::TeamB, base_b)],
            scores: ScoreLedger::new(self.thresholds),
            coins: CoinLedger::new(
                self.coin_values,
                self.coin_capacity.unwrap_or(coins::CAPACITY),
            ),
            spawner: CoinSpawner::new(self.spawner, self.coin_spawn_points),
            players: HashMap::new(),
            roster: SpawnRegistry::new(),
            modifier: TerritoryModifier::default(),
            result: None,
            rng,
            tick: 0,
        })
    }
}

/// The authoritative match state
#[derive(Debug)]
pub struct World {
    rules: WorldRules,
    bases: [Vec3; 2],
    spawn_points: [Vec<Vec3>; 2],
    flags: [Flag; 2],
    scores: ScoreLedger,
    coins: CoinLedger,
    spawner: CoinSpawner,
    players: HashMap<PlayerId, Player>,
    roster: SpawnRegistry,
    modifier: TerritoryModifier,
    result: Option<MatchResult>,
    rng: StdRng,
    tick: u64,
}

impl World {
    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Apply a validated, de-duplicated peer command
    pub fn apply_command(
        &mut self,
        token: &AuthorityToken,
        command: &ValidatedCommand,
        now: u64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        token.require_all(command_scope(&command.command))?;
        let peer = command.peer;
        self.tick = self.tick.max(now);
        let frozen = self.is_game_over()
            && !matches!(command.command, ValidCommand::Spawn { .. } | ValidCommand::Leave);
        if frozen {
            return Err(InvalidReason::MatchOver.into());
        }

        match command.command {
            ValidCommand::PickupFlag { flag } => self.pickup_flag(token, peer, flag),
            ValidCommand::PickupCoin { coin } => self.pickup_coin(token, peer, coin, now),
            ValidCommand::Drop { flag } => self.drop_flag(token, peer, flag, now),
            ValidCommand::Return { flag } => self.return_flag(token, peer, flag),
            ValidCommand::Deposit => self.deposit(token, peer),
            ValidCommand::Spawn { preferred_team } => self.spawn(token, peer, preferred_team, now),
            ValidCommand::Leave => self.leave(token, peer),
        }
    }

    fn pickup_flag(
        &mut self,
        token: &AuthorityToken,
        peer: PlayerId,
        flag: Team,
    ) -> Result<Vec<Notification>, CommandRejection> {
        let player = self.alive_player(peer)?.clone();
        let index = flag.index().ok_or(InvalidReason::NeutralTeam)?;
        let target = &mut self.flags[index];

        if target.status() == FlagStatus::Carried {
            return Err(InvalidReason::FlagAlreadyCarried.into());
        }
        let distance = player.position.ground_distance_to(target.position());
        if distance > self.rules.flag_pickup_radius {
            return Err(InvalidReason::OutOfRange {
                distance,
                max: self.rules.flag_pickup_radius,
            }
            .into());
        }

        let event = target.pickup(
            token,
            player.id,
            player.team,
            player.position,
            self.rules.carry_height,
        )?;

        let mut events = vec![event];
        self.check_win(&mut events);
        Ok(events)
    }

    fn drop_flag(
        &mut self,
        token: &AuthorityToken,
        peer: PlayerId,
        flag: Team,
        now: u64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        self.player(peer).ok_or(InvalidReason::NotSpawned)?;
        let index = flag.index().ok_or(InvalidReason::NeutralTeam)?;
        let target = &mut self.flags[index];

        match target.carrier() {
            None => Err(InvalidReason::FlagNotCarried.into()),
            Some(carrier) if carrier != peer => Err(InvalidReason::NotCarrier.into()),
            Some(_) => Ok(vec![target.drop(token, now, self.rules.auto_return_ticks)?]),
        }
    }

    fn return_flag(
        &mut self,
        token: &AuthorityToken,
        peer: PlayerId,
        flag: Team,
    ) -> Result<Vec<Notification>, CommandRejection> {
        let player = self.alive_player(peer)?.clone();
        if player.team != flag {
            return Err(InvalidReason::NotOwningTeam.into());
        }
        let index = flag.index().ok_or(InvalidReason::NeutralTeam)?;
        let target = &mut self.flags[index];

        match target.status() {
            FlagStatus::AtHome => return Err(InvalidReason::FlagAtHome.into()),
            FlagStatus::Carried => return Err(InvalidReason::FlagAlreadyCarried.into()),
            FlagStatus::Dropped => {}
        }
        let distance = player.position.ground_distance_to(target.position());
        if distance > self.rules.flag_pickup_radius {
            return Err(InvalidReason::OutOfRange {
                distance,
                max: self.rules.flag_pickup_radius,
            }
            .into());
        }

        let mut events = vec![target.return_home(token, ReturnCause::Returned)?];
        self.check_win(&mut events);
        Ok(events)
    }

    fn pickup_coin(
        &mut self,
        token: &AuthorityToken,
        peer: PlayerId,
        coin: CoinId,
        now: u64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        let player = self.alive_player(peer)?.clone();
        let world_coin = *self.spawner.available(coin)?;

        let distance = player.position.ground_distance_to(world_coin.position);
        if distance > self.rules.coin_pickup_radius {
            return Err(InvalidReason::OutOfRange {
                distance,
                max: self.rules.coin_pickup_radius,
            }
            .into());
        }

        if !self.coins.try_add_coin(token, peer, world_coin.faction) {
            return Err(CommandRejection::CapacityExceeded {
                held: self.coins.held_count(peer),
                capacity: self.coins.capacity(),
            });
        }
        let collected = self.spawner.collect(token, coin, peer, now)?;

        Ok(vec![collected, self.coins.count_notification(peer)])
    }

    /// Settle held coins into the team score in one step
    fn deposit(&mut self, token: &AuthorityToken, peer: PlayerId) -> Result<Vec<Notification>, CommandRejection> {
        let player = self.alive_player(peer)?.clone();
        let base = self.base(player.team).ok_or(InvalidReason::NeutralTeam)?;

        let distance = player.position.ground_distance_to(base);
        if distance > self.rules.deposit_radius {
            return Err(InvalidReason::OutOfRange {
                distance,
                max: self.rules.deposit_radius,
            }
            .into());
        }
        if self.coins.held_count(peer) == 0 {
            return Ok(Vec::new());
        }

        let points = self.coins.settle_deposit(token, peer);
        let outcome = self.scores.award_points(token, player.team, points)?;
        info!("Player {} deposited coins worth {} for {}", peer, points, player.team);

        let mut events = vec![self.coins.count_notification(peer)];
        events.extend(outcome.notifications());
        Ok(events)
    }

    fn spawn(
        &mut self,
        token: &AuthorityToken,
        peer: PlayerId,
        preferred_team: Option<Team>,
        now: u64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        if !self.roster.try_register(peer) {
            return Err(InvalidReason::AlreadySpawned.into());
        }

        let team = preferred_team
            .filter(Team::is_competing)
            .unwrap_or_else(|| self.smaller_team());
        let position = self.spawn_point_for(team);

        self.players.insert(
            peer,
            Player {
                id: peer,
                team,
                position,
                alive: true,
                spawn_tick: now,
            },
        );
        self.coins.register(token, peer, team);
        info!("Player {} spawned on {}", peer, team);

        Ok(vec![Notification::PlayerSpawned {
            player: peer,
            team,
            position,
        }])
    }

    fn leave(&mut self, token: &AuthorityToken, peer: PlayerId) -> Result<Vec<Notification>, CommandRejection> {
        if !self.roster.release(peer) {
            return Err(InvalidReason::NotSpawned.into());
        }

        let mut events = Vec::new();
        if !self.is_game_over() {
            events.extend(self.drop_carried_flags(token, peer, self.tick));
        }
        self.coins.unregister(token, peer);
        self.players.remove(&peer);
        info!("Player {} left", peer);

        events.push(Notification::PlayerLeft { player: peer });
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Collaborator events
    // ------------------------------------------------------------------

    /// Movement report from the physics/input collaborator. Carried flags follow
    /// their carrier and the win condition is re-checked.
    pub fn player_moved(
        &mut self,
        token: &AuthorityToken,
        player: PlayerId,
        position: Vec3,
    ) -> Result<Vec<Notification>, CommandRejection> {
        token.require_all(&[EntityKind::Roster, EntityKind::Flag])?;
        if !position.is_finite() {
            return Err(InvalidReason::NonFinitePosition.into());
        }
        let entry = self.players.get_mut(&player).ok_or(InvalidReason::NotSpawned)?;
        entry.position = position;
        if !entry.alive || self.result.is_some() {
            return Ok(Vec::new());
        }

        let carry_height = self.rules.carry_height;
        let mut events: Vec<Notification> = self
            .flags
            .iter_mut()
            .filter(|f| f.carrier() == Some(player))
            .filter_map(|f| f.follow_carrier(token, position, carry_height))
            .collect();
        if !events.is_empty() {
            self.check_win(&mut events);
        }
        Ok(events)
    }

    /// Death event: carried flags drop where the player fell, held coins are lost
    /// when the rules say so
    pub fn player_died(
        &mut self,
        token: &AuthorityToken,
        player: PlayerId,
        now: u64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        token.require_all(&[EntityKind::Roster, EntityKind::Flag, EntityKind::Custody])?;
        let entry = self.players.get_mut(&player).ok_or(InvalidReason::NotSpawned)?;
        if !entry.alive {
            return Ok(Vec::new());
        }
        entry.alive = false;
        debug!("Player {} died", player);
        self.tick = self.tick.max(now);

        if self.is_game_over() {
            return Ok(Vec::new());
        }

        let mut events = self.drop_carried_flags(token, player, now);
        if self.rules.drop_coins_on_death && self.coins.clear(token, player) > 0 {
            events.push(self.coins.count_notification(player));
        }
        Ok(events)
    }

    /// Respawn event. Without an explicit position the player returns to a team
    /// spawn point.
    pub fn player_respawned(
        &mut self,
        token: &AuthorityToken,
        player: PlayerId,
        position: Option<Vec3>,
        now: u64,
    ) -> Result<(), CommandRejection> {
        token.require(EntityKind::Roster)?;
        if position.is_some_and(|p| !p.is_finite()) {
            return Err(InvalidReason::NonFinitePosition.into());
        }
        let team = self.player(player).ok_or(InvalidReason::NotSpawned)?.team;
        let position = position.unwrap_or_else(|| self.spawn_point_for(team));

        if let Some(entry) = self.players.get_mut(&player) {
            entry.alive = true;
            entry.position = position;
            entry.spawn_tick = now;
        }
        Ok(())
    }

    /// Per-tick timers: flag auto-return, coin cadence and despawns
    pub fn advance(&mut self, token: &AuthorityToken, now: u64) -> Vec<Notification> {
        self.tick = now;
        if self.is_game_over() {
            return Vec::new();
        }

        let mut events: Vec<Notification> = self
            .flags
            .iter_mut()
            .filter_map(|f| f.check_auto_return(token, now))
            .collect();
        if !events.is_empty() {
            self.check_win(&mut events);
        }

        events.extend(self.spawner.update(token, now, &mut self.rng));
        events
    }

    /// Administrative return of a flag from any non-home state
    pub fn force_return(&mut self, token: &AuthorityToken, flag: Team) -> Result<Vec<Notification>, CommandRejection> {
        token.require(EntityKind::Flag)?;
        if self.is_game_over() {
            return Err(InvalidReason::MatchOver.into());
        }
        let index = flag.index().ok_or(InvalidReason::NeutralTeam)?;
        let mut events = vec![self.flags[index].return_home(token, ReturnCause::Forced)?];
        self.check_win(&mut events);
        Ok(events)
    }

    /// Award points to a team given by any external spelling
    pub fn award_points_named(
        &mut self,
        token: &AuthorityToken,
        team: &str,
        points: i64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        token.require(EntityKind::TeamLedger)?;
        if self.is_game_over() {
            return Err(InvalidReason::MatchOver.into());
        }
        let outcome = self.scores.award_points_named(token, team, points)?;
        Ok(outcome.notifications())
    }

    fn drop_carried_flags(&mut self, token: &AuthorityToken, player: PlayerId, now: u64) -> Vec<Notification> {
        let auto_return = self.rules.auto_return_ticks;
        self.flags
            .iter_mut()
            .filter(|f| f.carrier() == Some(player))
            .filter_map(|f| f.drop(token, now, auto_return).ok())
            .collect()
    }

    fn check_win(&mut self, events: &mut Vec<Notification>) {
        if self.result.is_some() {
            return;
        }
        let Some(winner) = match_result::capture_winner(&self.flags, self.rules.capture_radius) else {
            return;
        };

        let result = MatchResult {
            winner,
            reason: MatchEndReason::FlagsCaptured,
            end_tick: self.tick,
            scores: [self.scores.score(Team::TeamA), self.scores.score(Team::TeamB)],
        };
        info!("Match over at tick {}: {}", self.tick, result.message());
        events.push(Notification::MatchOver {
            winner,
            message: result.message(),
        });
        self.result = Some(result);
    }

    fn smaller_team(&self) -> Team {
        let a = self.team_size(Team::TeamA);
        let b = self.team_size(Team::TeamB);
        if b < a {
            Team::TeamB
        } else {
            Team::TeamA
        }
    }

    fn spawn_point_for(&self, team: Team) -> Vec3 {
        let Some(index) = team.index() else {
            return Vec3::ZERO;
        };
        let points = &self.spawn_points[index];
        if points.is_empty() {
            return self.bases[index];
        }
        points[self.team_size(team) % points.len()]
    }

    fn alive_player(&self, peer: PlayerId) -> Result<&Player, InvalidReason> {
        let player = self.player(peer).ok_or(InvalidReason::NotSpawned)?;
        if !player.alive {
            return Err(InvalidReason::PlayerDead);
        }
        Ok(player)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn rules(&self) -> &WorldRules {
        &self.rules
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn flag(&self, team: Team) -> Option<&Flag> {
        team.index().map(|i| &self.flags[i])
    }

    pub fn flags(&self) -> &[Flag; 2] {
        &self.flags
    }

    pub fn base(&self, team: Team) -> Option<Vec3> {
        team.index().map(|i| self.bases[i])
    }

    pub fn scores(&self) -> &ScoreLedger {
        &self.scores
    }

    pub fn coins(&self) -> &CoinLedger {
        &self.coins
    }

    pub fn spawner(&self) -> &CoinSpawner {
        &self.spawner
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn team_size(&self, team: Team) -> usize {
        self.players.values().filter(|p| p.team == team).count()
    }

    pub fn is_spawned(&self, peer: PlayerId) -> bool {
        self.roster.contains(peer)
    }

    pub fn is_game_over(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    /// Territorial advantage of a player in [-1, 1]
    pub fn territorial_advantage(&self, player: PlayerId) -> Option<f32> {
        let player = self.player(player)?;
        let own = self.base(player.team)?;
        let enemy = self.base(player.team.opponent()?)?;
        Some(territory::advantage(
            player.position.ground_distance_to(own),
            player.position.ground_distance_to(enemy),
        ))
    }

    /// Territorial multiplier on damage the player deals
    pub fn damage_dealt_multiplier(&self, player: PlayerId) -> Option<f32> {
        let team = self.player(player)?.team;
        let advantage = self.territorial_advantage(player)?;
        let unlocked = self.scores.is_unlocked(team, BuffKind::Damage);
        Some(self.modifier.damage_dealt(advantage, unlocked))
    }

    /// Territorial multiplier on damage the player receives
    pub fn damage_received_multiplier(&self, player: PlayerId) -> Option<f32> {
        let team = self.player(player)?.team;
        let advantage = self.territorial_advantage(player)?;
        let unlocked = self.scores.is_unlocked(team, BuffKind::Defense);
        Some(self.modifier.damage_received(advantage, unlocked))
    }

    /// Competing teams in index order
    pub fn teams(&self) -> [Team; 2] {
        COMPETING_TEAMS
    }
}

/// Entity kinds a command may write. Checked before anything mutates.
fn command_scope(command: &ValidCommand) -> &'static [EntityKind] {
    match command {
        ValidCommand::PickupFlag { .. } | ValidCommand::Drop { .. } | ValidCommand::Return { .. } => {
            &[EntityKind::Flag]
        }
        ValidCommand::PickupCoin { .. } => &[EntityKind::Custody, EntityKind::Coin],
        ValidCommand::Deposit => &[EntityKind::Custody, EntityKind::TeamLedger],
        ValidCommand::Spawn { .. } => &[EntityKind::Roster, EntityKind::Custody],
        ValidCommand::Leave => &[EntityKind::Roster, EntityKind::Custody, EntityKind::Flag],
    }
}
