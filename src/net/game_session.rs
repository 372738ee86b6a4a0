//! Authority and replica hosts
//!
//! The [`AuthorityHost`] owns the world together with its authority token,
//! drains the command inbox once per tick and publishes every resulting change.
//! A [`ReplicaHost`] keeps a read-only [`Mirror`] and forwards its peer's
//! commands to the authority.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::command::buffer::{CommandInbox, CommandSender, InboxError};
use crate::command::idempotency::{GuardConfig, IdempotencyGuard};
use crate::command::validator::CommandValidator;
use crate::command::{
    CommandEnvelope, CommandRejection, PeerCommand, PeerId, PickupTarget,
};
use crate::game::authority::{Authoritative, AuthorityResolver, AuthorityViolation};
use crate::game::constants::tick;
use crate::game::events::Notification;
use crate::game::state::{World, WorldError};
use crate::game::team::Team;
use crate::metrics::Metrics;
use crate::net::protocol::{ClientMessage, ReplicatedUpdate, ServerMessage, WorldSnapshot};
use crate::net::replication::{Mirror, ReplicationChannel};
use crate::net::transport::{LoopbackTransport, PeerLink, TransportError};
use crate::util::vec3::Vec3;

/// Session-level errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Authority(#[from] AuthorityViolation),
    #[error(transparent)]
    Inbox(#[from] InboxError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fire-and-forget commands a player can issue. The effect is observed only
/// through replicated state.
pub trait CommandSurface {
    fn submit(&self, command: PeerCommand) -> Result<(), SessionError>;

    fn request_pickup(&self, target: PickupTarget) -> Result<(), SessionError> {
        self.submit(PeerCommand::Pickup { target })
    }

    fn request_drop(&self, flag: Team) -> Result<(), SessionError> {
        self.submit(PeerCommand::Drop { flag })
    }

    fn request_return(&self, flag: Team) -> Result<(), SessionError> {
        self.submit(PeerCommand::Return { flag })
    }

    fn request_deposit(&self) -> Result<(), SessionError> {
        self.submit(PeerCommand::Deposit)
    }

    fn request_spawn(&self, preferred_team: Option<&str>) -> Result<(), SessionError> {
        self.submit(PeerCommand::Spawn {
            preferred_team: preferred_team.map(str::to_string),
        })
    }

    fn request_leave(&self) -> Result<(), SessionError> {
        self.submit(PeerCommand::Leave)
    }
}

/// Command handle for a player hosted in the authority's own process
#[derive(Clone)]
pub struct LocalPeer {
    peer: PeerId,
    sender: CommandSender,
}

impl LocalPeer {
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl CommandSurface for LocalPeer {
    fn submit(&self, command: PeerCommand) -> Result<(), SessionError> {
        self.sender
            .try_send(CommandEnvelope::new(self.peer, command))
            .map_err(SessionError::from)
    }
}

/// What one authoritative tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub applied: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub updates: Vec<ReplicatedUpdate>,
}

/// The single writer of the shared world
pub struct AuthorityHost {
    world: Authoritative<World>,
    resolver: AuthorityResolver,
    inbox: CommandInbox,
    validator: CommandValidator,
    guard: IdempotencyGuard,
    replication: ReplicationChannel,
    transport: Option<LoopbackTransport>,
    metrics: Option<Arc<Metrics>>,
    tick: u64,
}

impl AuthorityHost {
    /// Fails unless the resolver makes this host the owner of every entity kind
    pub fn new(resolver: AuthorityResolver, world: World) -> Result<Self, SessionError> {
        let token = resolver.claim_all()?;
        info!("Host {} holds authority for the session", token.host());

        Ok(Self {
            world: Authoritative::new(token, world),
            resolver,
            inbox: CommandInbox::default(),
            validator: CommandValidator::default(),
            guard: IdempotencyGuard::default(),
            replication: ReplicationChannel::new(),
            transport: None,
            metrics: None,
            tick: 0,
        })
    }

    pub fn with_transport(mut self, transport: LoopbackTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_guard(mut self, config: GuardConfig) -> Self {
        self.guard = IdempotencyGuard::new(config);
        self
    }

    pub fn world(&self) -> &World {
        self.world.get()
    }

    pub fn resolver(&self) -> &AuthorityResolver {
        &self.resolver
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Command handle for a player living in this process
    pub fn local_peer(&self, peer: PeerId) -> LocalPeer {
        LocalPeer {
            peer,
            sender: self.inbox.sender(),
        }
    }

    /// Sender for connection handlers
    pub fn inbox_sender(&self) -> CommandSender {
        self.inbox.sender()
    }

    /// Local notification subscriber (display layer, tests)
    pub fn subscribe(&mut self) -> Receiver<ReplicatedUpdate> {
        self.replication.subscribe()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.replication.snapshot(self.world.get())
    }

    /// Connect a remote peer and send it the current snapshot
    pub fn connect_replica(&mut self, peer: PeerId) -> Result<PeerLink, SessionError> {
        let snapshot = self.snapshot();
        let transport = self
            .transport
            .as_mut()
            .ok_or(SessionError::MissingCollaborator("transport"))?;
        let link = transport.connect(peer);
        transport.send_to(peer, &ServerMessage::Snapshot(snapshot))?;
        info!("Replica {} joined at tick {}", peer, self.tick);
        Ok(link)
    }

    /// Run one authoritative tick: drain commands, advance timers, publish
    pub fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        self.tick += 1;
        let now = self.tick;
        self.pump_transport(now);

        let mut report = TickReport {
            tick: now,
            ..TickReport::default()
        };
        let mut notifications = Vec::new();

        for envelope in self.inbox.drain() {
            match self.process(&envelope, now) {
                Ok(events) => {
                    report.applied += 1;
                    notifications.extend(events);
                }
                Err(CommandRejection::Duplicate) => report.duplicates += 1,
                Err(CommandRejection::Invalid(reason)) => {
                    report.rejected += 1;
                    debug!("Rejected {:?} from {}: {}", envelope.command, envelope.peer, reason);
                    notifications.push(Notification::CommandRejected {
                        peer: envelope.peer,
                        reason,
                    });
                }
                Err(other) => {
                    report.rejected += 1;
                    debug!("Rejected {:?} from {}: {}", envelope.command, envelope.peer, other);
                }
            }
        }

        let (token, world) = self.world.split();
        notifications.extend(world.advance(token, now));

        report.updates = self.publish(notifications);
        self.guard.sweep(now);
        self.record_metrics(&report, started.elapsed());
        report
    }

    /// Validate, de-duplicate and apply one command
    fn process(
        &mut self,
        envelope: &CommandEnvelope,
        now: u64,
    ) -> Result<Vec<Notification>, CommandRejection> {
        let key = envelope.key();
        if !self.guard.admit(key, now) {
            return Err(CommandRejection::Duplicate);
        }

        let result = match self.validator.validate(envelope) {
            Ok(command) => {
                let (token, world) = self.world.split();
                world.apply_command(token, &command, now)
            }
            Err(reason) => Err(reason.into()),
        };

        // Only applied commands are remembered; a rejected key may be retried
        match &result {
            Ok(_) => {
                if envelope.command == PeerCommand::Leave {
                    self.guard.forget_peer(envelope.peer);
                }
                self.guard.complete(key, now);
            }
            Err(_) => {
                self.guard.release(&key);
            }
        }
        result
    }

    fn pump_transport(&mut self, now: u64) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        for (peer, message) in transport.receive() {
            if let Some(metrics) = &self.metrics {
                metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            }
            match message {
                ClientMessage::Command(command) => {
                    if !self.inbox.try_submit(peer, command) {
                        warn!("Command inbox full, dropping command from {}", peer);
                        if let Some(metrics) = &self.metrics {
                            metrics.inbox_overflow.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                ClientMessage::Ping { timestamp } => {
                    let pong = ServerMessage::Pong {
                        client_timestamp: timestamp,
                        server_timestamp: now,
                    };
                    if let Err(e) = transport.send_to(peer, &pong) {
                        debug!("Failed to answer ping from {}: {}", peer, e);
                    }
                }
            }
        }
    }

    fn publish(&mut self, notifications: Vec<Notification>) -> Vec<ReplicatedUpdate> {
        let updates = self.replication.publish(self.tick, notifications);
        let outbound = self.replication.drain_outbound();

        let Some(transport) = self.transport.as_mut() else {
            return updates;
        };
        for update in outbound {
            let recipient = update.notification.recipient();
            let message = ServerMessage::Update(update);
            let result = match recipient {
                Some(peer) => transport.send_to(peer, &message).map(|_| 1),
                None => transport.broadcast(&message),
            };
            match result {
                Ok(sent) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.messages_sent.fetch_add(sent as u64, Ordering::Relaxed);
                    }
                }
                Err(e) => debug!("Update not delivered: {}", e),
            }
        }
        updates
    }

    fn record_metrics(&self, report: &TickReport, elapsed: Duration) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let world = self.world.get();

        metrics.record_tick_time(elapsed);
        metrics.players.store(world.player_count() as u64, Ordering::Relaxed);
        metrics
            .players_alive
            .store(world.players().filter(|p| p.alive).count() as u64, Ordering::Relaxed);
        metrics.set_scores(
            world.scores().score(Team::TeamA),
            world.scores().score(Team::TeamB),
        );
        metrics
            .coins_active
            .store(world.spawner().available_count() as u64, Ordering::Relaxed);
        metrics
            .game_over
            .store(world.is_game_over() as u64, Ordering::Relaxed);

        let received = report.applied + report.rejected + report.duplicates;
        metrics.commands_received.fetch_add(received as u64, Ordering::Relaxed);
        metrics.commands_applied.fetch_add(report.applied as u64, Ordering::Relaxed);
        metrics.commands_rejected.fetch_add(report.rejected as u64, Ordering::Relaxed);
        metrics.commands_duplicate.fetch_add(report.duplicates as u64, Ordering::Relaxed);
        metrics
            .updates_published
            .fetch_add(report.updates.len() as u64, Ordering::Relaxed);

        if let Some(transport) = &self.transport {
            metrics.bytes_sent.store(transport.bytes_sent(), Ordering::Relaxed);
            metrics.bytes_received.store(transport.bytes_received(), Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Collaborator events, published immediately
    // ------------------------------------------------------------------

    pub fn player_moved(&mut self, player: PeerId, position: Vec3) -> Result<(), CommandRejection> {
        self.validator.validate_position(&position)?;
        let (token, world) = self.world.split();
        let events = world.player_moved(token, player, position)?;
        self.publish(events);
        Ok(())
    }

    pub fn player_died(&mut self, player: PeerId) -> Result<(), CommandRejection> {
        let now = self.tick;
        let (token, world) = self.world.split();
        let events = world.player_died(token, player, now)?;
        self.publish(events);
        Ok(())
    }

    pub fn player_respawned(&mut self, player: PeerId, position: Option<Vec3>) -> Result<(), CommandRejection> {
        if let Some(position) = &position {
            self.validator.validate_position(position)?;
        }
        let now = self.tick;
        let (token, world) = self.world.split();
        world.player_respawned(token, player, position, now)
    }

    pub fn award_points_named(&mut self, team: &str, points: i64) -> Result<(), CommandRejection> {
        let (token, world) = self.world.split();
        let events = world.award_points_named(token, team, points)?;
        self.publish(events);
        Ok(())
    }

    pub fn force_return(&mut self, flag: Team) -> Result<(), CommandRejection> {
        let (token, world) = self.world.split();
        let events = world.force_return(token, flag)?;
        self.publish(events);
        Ok(())
    }
}

/// A non-authoritative host: mirror plus command forwarding
pub struct ReplicaHost {
    peer: PeerId,
    resolver: AuthorityResolver,
    link: PeerLink,
    mirror: Mirror,
}

impl ReplicaHost {
    pub fn new(resolver: AuthorityResolver, link: PeerLink) -> Self {
        Self {
            peer: link.peer(),
            resolver,
            link,
            mirror: Mirror::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Apply everything received. Returns the number of changes applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        for message in self.link.receive() {
            match message {
                ServerMessage::Update(update) => {
                    if self.mirror.apply(&update) {
                        applied += 1;
                    }
                }
                ServerMessage::Snapshot(snapshot) => {
                    self.mirror.apply_snapshot(&snapshot);
                    applied += 1;
                }
                ServerMessage::Pong {
                    client_timestamp,
                    server_timestamp,
                } => debug!("Pong {} at server tick {}", client_timestamp, server_timestamp),
            }
        }
        applied
    }

    pub fn ping(&self, timestamp: u64) -> Result<(), SessionError> {
        self.link.send(&ClientMessage::Ping { timestamp })?;
        Ok(())
    }
}

impl CommandSurface for ReplicaHost {
    fn submit(&self, command: PeerCommand) -> Result<(), SessionError> {
        let target = command.target(self.peer);
        debug!(
            "Forwarding {:?} for {:?} to authority {}",
            command.kind(),
            target,
            self.resolver.owner_of(&target)
        );
        self.link.send(&ClientMessage::Command(command))?;
        Ok(())
    }
}

/// Drive the authority at the fixed tick rate until shutdown is signalled
pub async fn run_tick_loop(mut host: AuthorityHost, mut shutdown: watch::Receiver<bool>) -> AuthorityHost {
    let mut ticker = interval(Duration::from_millis(tick::TICK_DURATION_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Tick loop started at {} Hz", tick::TICK_RATE);
    let start = Instant::now();
    let stats_every = tick::TICK_RATE as u64 * 30;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let report = host.tick();
        for update in &report.updates {
            if let Some(message) = update.notification.message() {
                info!("{}", message);
            }
        }

        if report.tick % stats_every == 0 {
            let world = host.world();
            info!(
                "Match: {}s, tick {}, {} players | score {} - {} | coins {}",
                start.elapsed().as_secs(),
                report.tick,
                world.player_count(),
                world.scores().score(Team::TeamA),
                world.scores().score(Team::TeamB),
                world.spawner().available_count()
            );
        }
    }

    info!("Tick loop stopped at tick {}", host.current_tick());
    host
}
