//! Prometheus-compatible metrics endpoint
//!
//! Exposes authority metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Samples kept for tick-time percentiles
const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the authority host
#[derive(Debug)]
pub struct Metrics {
    // Roster
    pub players: AtomicU64,
    pub players_alive: AtomicU64,

    // Commands
    pub commands_received: AtomicU64,
    pub commands_applied: AtomicU64,
    pub commands_rejected: AtomicU64,
    pub commands_duplicate: AtomicU64,
    pub inbox_overflow: AtomicU64,

    // Replication
    pub updates_published: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    // Match state
    pub score_team_a: AtomicU64,
    pub score_team_b: AtomicU64,
    pub coins_active: AtomicU64,
    pub game_over: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation (VecDeque for O(1) pop_front)
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            players: AtomicU64::new(0),
            players_alive: AtomicU64::new(0),
            commands_received: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            commands_duplicate: AtomicU64::new(0),
            inbox_overflow: AtomicU64::new(0),
            updates_published: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            score_team_a: AtomicU64::new(0),
            score_team_b: AtomicU64::new(0),
            coins_active: AtomicU64::new(0),
            game_over: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Scores may go negative through admin awards; the gauge clamps at zero
    pub fn set_scores(&self, team_a: i64, team_b: i64) {
        self.score_team_a.store(team_a.max(0) as u64, Ordering::Relaxed);
        self.score_team_b.store(team_b.max(0) as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("capture_arena_players", "Number of spawned players", "gauge",
            self.players.load(Ordering::Relaxed));
        metric!("capture_arena_players_alive", "Number of alive players", "gauge",
            self.players_alive.load(Ordering::Relaxed));

        metric!("capture_arena_commands_received_total", "Commands drained from the inbox", "counter",
            self.commands_received.load(Ordering::Relaxed));
        metric!("capture_arena_commands_applied_total", "Commands applied to the world", "counter",
            self.commands_applied.load(Ordering::Relaxed));
        metric!("capture_arena_commands_rejected_total", "Commands rejected as invalid", "counter",
            self.commands_rejected.load(Ordering::Relaxed));
        metric!("capture_arena_commands_duplicate_total", "Redelivered commands dropped", "counter",
            self.commands_duplicate.load(Ordering::Relaxed));
        metric!("capture_arena_inbox_overflow_total", "Commands dropped on a full inbox", "counter",
            self.inbox_overflow.load(Ordering::Relaxed));

        metric!("capture_arena_updates_published_total", "Replicated updates published", "counter",
            self.updates_published.load(Ordering::Relaxed));
        metric!("capture_arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("capture_arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("capture_arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("capture_arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));

        for (team, gauge) in [("team1", &self.score_team_a), ("team2", &self.score_team_b)] {
            output.push_str(&format!(
                "# HELP capture_arena_team_score Team score\n# TYPE capture_arena_team_score gauge\ncapture_arena_team_score{{team=\"{}\"}} {}\n",
                team,
                gauge.load(Ordering::Relaxed)
            ));
        }
        metric!("capture_arena_coins_active", "Uncollected coins in the world", "gauge",
            self.coins_active.load(Ordering::Relaxed));
        metric!("capture_arena_game_over", "Match finished (0/1)", "gauge",
            self.game_over.load(Ordering::Relaxed));

        metric!("capture_arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("capture_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("capture_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("capture_arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("capture_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("capture_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "players": {
                "spawned": load(&self.players),
                "alive": load(&self.players_alive),
            },
            "commands": {
                "received": load(&self.commands_received),
                "applied": load(&self.commands_applied),
                "rejected": load(&self.commands_rejected),
                "duplicate": load(&self.commands_duplicate),
                "inbox_overflow": load(&self.inbox_overflow),
            },
            "replication": {
                "updates_published": load(&self.updates_published),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
            },
            "match": {
                "score_team1": load(&self.score_team_a),
                "score_team2": load(&self.score_team_b),
                "coins_active": load(&self.coins_active),
                "game_over": load(&self.game_over) != 0,
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
                "uptime_seconds": self.uptime_seconds(),
            },
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // Most specific path first
                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("200 OK", "application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("200 OK", "text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("200 OK", "text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
