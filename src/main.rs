//! tvcache - read-through cache for TV metadata
//!
//! Sits in front of the TMDB API and serves:
//! - Title and season detail, cached for a day
//! - Daily/weekly trending lists and a curated "new episodes" hero list
//! - Stale cached data when the upstream is down
//! - Prometheus metrics

mod api;
mod cache;
mod config;
mod error;
mod metrics;
mod services;
#[cfg(test)]
mod testing;
mod utils;

use crate::api::{create_router, AppState};
use crate::cache::{CacheAside, MemoryStore, MongoStore, SharedStore};
use crate::config::Config;
use crate::metrics::{create_metrics, SharedMetrics};
use crate::services::hero::HeroCurator;
use crate::services::tmdb::api::TmdbApi;
use crate::utils::ascii::print_startup_banner;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// tvcache - TV metadata cache
#[derive(Parser, Debug)]
#[command(name = "tvcache")]
#[command(author, version, about = "Read-through cache for TV metadata", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for upstream API requests
    #[arg(long)]
    debug_requests: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let boot_start = Instant::now();

    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    // Print banner after logging is initialized
    print_startup_banner();

    info!("Starting tvcache v{}", env!("CARGO_PKG_VERSION"));

    // Load config (CLI port overrides env var)
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.debug_requests = args.debug_requests;

    if args.debug_requests {
        info!("Request debugging enabled");
    }

    let metrics = create_metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (store, mut background) = init_store(&config, shutdown_rx.clone()).await;
    info!(backend = store.backend(), "Cache store ready");

    let upstream = Arc::new(TmdbApi::new(&config.tmdb));
    let resolver = Arc::new(CacheAside::new(
        store.clone(),
        upstream,
        metrics.clone(),
        config.cache.clone(),
    ));
    let hero = Arc::new(HeroCurator::new(resolver.clone(), config.hero.clone()));

    let metrics_updater = spawn_metrics_updater(metrics.clone(), store.clone(), boot_start);

    let app = create_router(AppState {
        resolver,
        hero,
        metrics,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        boot_ms = boot_start.elapsed().as_millis() as u64,
        "Listening on http://{} (API: /api, Metrics: /metrics, Health: /health)",
        addr
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
        info!("Shutdown signal received, initiating graceful shutdown...");

        // Stop heartbeat / sweeper tasks
        let _ = shutdown_tx.send(true);
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    metrics_updater.abort();
    for handle in background.drain(..) {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("tvcache shutdown complete");
    Ok(())
}

/// Pick the store backend. MongoDB when configured and the client can be
/// built, otherwise the process-local memory store.
async fn init_store(
    config: &Config,
    shutdown_rx: watch::Receiver<bool>,
) -> (SharedStore, Vec<JoinHandle<()>>) {
    if config.store.mongo_url.is_some() {
        match MongoStore::connect(&config.store).await {
            Ok(store) => {
                let store = Arc::new(store);
                if !store.ping().await {
                    warn!("MongoDB not reachable yet, serving without cache until it answers");
                }
                let heartbeat =
                    store.spawn_heartbeat(config.store.heartbeat_interval, shutdown_rx);
                return (store as SharedStore, vec![heartbeat]);
            }
            Err(e) => {
                error!(error = %e, "Failed to configure MongoDB client, falling back to memory store");
            }
        }
    } else {
        info!("MONGODB_URI not set, using in-memory cache store");
    }

    let store = Arc::new(MemoryStore::new());
    let sweeper = store.spawn_sweeper(config.store.sweep_interval, shutdown_rx);
    (store as SharedStore, vec![sweeper])
}

fn spawn_metrics_updater(
    metrics: SharedMetrics,
    store: SharedStore,
    boot_start: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            metrics.uptime_seconds.set(boot_start.elapsed().as_secs_f64());
            metrics.set_store_available(store.is_available());
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    })
}

fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Build filter: set tvcache to requested level, and optionally enable request debugging
    let filter = if debug_requests {
        EnvFilter::new(format!(
            "tvcache={},tvcache::services::tmdb::api=debug,tower_http=debug,hyper=warn",
            level
        ))
    } else {
        EnvFilter::new(format!("tvcache={},tower_http=info,hyper=warn", level))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
