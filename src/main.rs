//! Portfolio Realtime Hub — Entry Point
//!
//! Initializes configuration and logging, wires the change feed into the
//! hub, and runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create Prometheus metrics (implements the HubObserver port)
//! 4. Create the change feed (in-memory or hosted WebSocket)
//! 5. Build the RealtimeHub
//! 6. Spawn the feed connection loop (hosted mode only)
//! 7. Spawn the probe/metrics server
//! 8. Start the price simulation with a logging listener (if enabled)
//! 9. Wait for SIGINT → graceful shutdown (teardown → stop tasks → exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use portfolio_realtime_hub::adapters::feeds::{InMemoryChangeFeed, SupabaseRealtimeFeed};
use portfolio_realtime_hub::adapters::metrics::{HealthServer, HealthState, HubMetrics};
use portfolio_realtime_hub::config::{self, AppConfig, FeedMode};
use portfolio_realtime_hub::domain::RealtimeMessage;
use portfolio_realtime_hub::ports::{ChangeFeed, HubObserver, NoopObserver};
use portfolio_realtime_hub::usecases::{RealtimeHub, SimulationSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_config(&config_path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.hub.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.hub.name,
        version = env!("CARGO_PKG_VERSION"),
        feed = ?config.feed.mode,
        simulation = config.simulation.enabled,
        "Starting realtime hub"
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // ── 3. Metrics (HubObserver port) ───────────────────────
    let metrics = if config.metrics.enabled {
        Some(Arc::new(HubMetrics::new().context("Failed to register metrics")?))
    } else {
        None
    };
    let observer: Arc<dyn HubObserver> = match &metrics {
        Some(m) => Arc::clone(m) as Arc<dyn HubObserver>,
        None => Arc::new(NoopObserver),
    };

    // ── 4. Change feed ──────────────────────────────────────
    let health = Arc::new(HealthState::new(config.feed.mode == FeedMode::Memory));
    let feed: Arc<dyn ChangeFeed> = match config.feed.mode {
        FeedMode::Memory => {
            info!("Using in-memory change feed");
            Arc::new(InMemoryChangeFeed::new()) as Arc<dyn ChangeFeed>
        }
        FeedMode::Supabase => {
            let api_key = config::loader::feed_api_key(&config)?;
            let supabase = Arc::new(SupabaseRealtimeFeed::new(&config.feed, &api_key));

            // ── 6. Feed connection loop with auto-reconnect ──
            tasks.push(spawn_feed(Arc::clone(&supabase), Arc::clone(&health), &shutdown_tx));
            supabase as Arc<dyn ChangeFeed>
        }
    };

    // ── 5. Hub ──────────────────────────────────────────────
    let hub = RealtimeHub::new(feed, observer, simulation_settings(&config));

    // ── 7. Probe / metrics server ───────────────────────────
    let server = HealthServer::new(Arc::clone(&health), metrics, config.metrics.bind_address.clone());
    let server_shutdown = shutdown_tx.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    }));

    // ── 8. Price simulation ─────────────────────────────────
    let _price_log = if config.simulation.enabled {
        let assets = config.simulation.asset_ids.clone();
        let handle = hub
            .subscribe_to_asset_prices(assets.as_slice(), log_price)
            .context("Failed to subscribe to simulated prices")?;
        hub.start_price_simulation(
            assets,
            Some(Duration::from_millis(config.simulation.interval_ms)),
        )
        .context("Failed to start price simulation")?;
        Some(handle)
    } else {
        None
    };

    info!("Realtime hub is running");

    // ── 9. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    health.set_feed_connected(false);
    let closed = hub.teardown_all();
    info!(channels = closed, "Channels closed");

    let _ = shutdown_tx.send(());
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    info!("Shutdown complete");
    Ok(())
}

fn simulation_settings(config: &AppConfig) -> SimulationSettings {
    SimulationSettings {
        base_price: config.simulation.base_price,
        max_move_pct: config.simulation.max_move_pct,
        seed: config.simulation.seed,
    }
}

/// Run the hosted feed and mirror its connection state into readiness.
fn spawn_feed(
    feed: Arc<SupabaseRealtimeFeed>,
    health: Arc<HealthState>,
    shutdown_tx: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let feed_shutdown = shutdown_tx.subscribe();
    let mut probe_shutdown = shutdown_tx.subscribe();

    let probe_feed = Arc::clone(&feed);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = probe_shutdown.recv() => break,
                _ = ticker.tick() => health.set_feed_connected(probe_feed.is_connected()),
            }
        }
    });

    tokio::spawn(async move {
        if let Err(e) = feed.run(feed_shutdown).await {
            error!(error = %e, "Change feed task failed");
        }
    })
}

fn log_price(message: &RealtimeMessage) {
    if let Some(update) = message.as_price() {
        info!(
            asset = %update.asset_id,
            price = update.price,
            change_pct = update.change_percentage,
            "Price update"
        );
    }
}
