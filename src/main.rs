use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use capture_arena_server::config::MatchConfig;
use capture_arena_server::game::authority::AuthorityResolver;
use capture_arena_server::game::team::Team;
use capture_arena_server::metrics::{self, Metrics};
use capture_arena_server::net::game_session::{run_tick_loop, AuthorityHost};
use capture_arena_server::net::transport::LoopbackTransport;
use capture_arena_server::util::vec3::Vec3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Capture Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = MatchConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: auto_return={}s, buffs at {}/{}, coin capacity {}",
        config.flag_auto_return_secs,
        config.damage_buff_threshold,
        config.defense_buff_threshold,
        config.coin_capacity
    );

    // Symmetric arena: bases on the x axis, coins spread across the middle
    let world = config
        .world_builder()
        .base(Team::TeamA, Vec3::ground(-60.0, 0.0))
        .base(Team::TeamB, Vec3::ground(60.0, 0.0))
        .spawn_point(Team::TeamA, Vec3::ground(-55.0, -5.0))
        .spawn_point(Team::TeamA, Vec3::ground(-55.0, 5.0))
        .spawn_point(Team::TeamB, Vec3::ground(55.0, -5.0))
        .spawn_point(Team::TeamB, Vec3::ground(55.0, 5.0))
        .coin_spawn_point(Vec3::ground(0.0, 0.0))
        .coin_spawn_point(Vec3::ground(-20.0, 15.0))
        .coin_spawn_point(Vec3::ground(20.0, -15.0))
        .coin_spawn_point(Vec3::ground(-20.0, -15.0))
        .coin_spawn_point(Vec3::ground(20.0, 15.0))
        .build()?;

    let metrics = Arc::new(Metrics::new());

    #[cfg(feature = "metrics_server")]
    {
        let metrics_clone = metrics.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let host_id = Uuid::new_v4();
    let host = AuthorityHost::new(AuthorityResolver::local_authority(host_id), world)?
        .with_transport(LoopbackTransport::new())
        .with_metrics(metrics);
    info!("Authority host {} ready", host_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tick_loop = tokio::spawn(run_tick_loop(host, shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    shutdown_tx.send(true)?;

    let host = tick_loop.await?;
    if let Some(result) = host.world().result() {
        info!("{}", result.message());
    }
    info!("Server stopped");

    Ok(())
}
