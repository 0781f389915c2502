//! Folio server binary: wires config, logging, the lookup worker and the
//! HTTP router together.

use anyhow::Context;
use clap::Parser;
use folio::cache::MemoryStore;
use folio::config::Config;
use folio::http::{self, AppState};
use folio::lookup::{BookLookup, LookupSettings};
use folio::metrics::create_metrics;
use folio::services::assets::DiskAssetSink;
use folio::services::catalog::CatalogApi;
use folio::utils::ascii::print_startup_banner;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Folio - book metadata lookup service
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(author, version, about = "Book metadata lookup service", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for upstream catalog requests
    #[arg(long)]
    debug_requests: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    print_startup_banner();

    info!("Starting Folio v{}", env!("CARGO_PKG_VERSION"));

    // Load config (CLI port overrides env var)
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.debug_requests = args.debug_requests;

    if config.debug_requests {
        info!("Request debugging enabled");
    }

    let metrics = create_metrics().context("Failed to create metrics registry")?;

    let catalog = CatalogApi::new(
        &config.catalog.api_url,
        &config.catalog.api_key,
        config.catalog.timeout,
    )
    .with_metrics(metrics.clone());

    let assets = DiskAssetSink::new(&config.assets.image_dir);
    tokio::fs::create_dir_all(assets.dir())
        .await
        .with_context(|| format!("Failed to create image directory {}", assets.dir().display()))?;

    let cache = MemoryStore::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (lookup, worker_handle) = BookLookup::start(
        LookupSettings {
            capacity: config.catalog.queue_capacity,
            interval: config.catalog.interval,
        },
        Arc::new(cache.clone()),
        Arc::new(catalog),
        Arc::new(assets),
        shutdown_rx.clone(),
        Some(metrics.clone()),
    );

    let sweeper_handle = spawn_cache_sweeper(cache, config.cache.sweep_interval, shutdown_rx);

    let state = AppState {
        lookup,
        metrics: metrics.clone(),
    };
    let app = http::router(state, &config.assets.image_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        "Listening on http://{} (Lookup: /book/details, Metrics: /metrics, Health: /health)",
        addr
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
        info!("Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Let the worker finish the request it is on and fail the rest.
    if tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .is_err()
    {
        error!("Lookup worker did not stop in time");
    }
    sweeper_handle.abort();

    info!("Folio shutdown complete");
    Ok(())
}

/// Periodically drop expired cache entries until shutdown.
fn spawn_cache_sweeper(
    cache: MemoryStore,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    debug!(purged = purged, entries = cache.len(), "Cache sweep complete");
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    })
}

fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Build filter: set folio to requested level, and optionally enable request debugging
    let filter = if debug_requests {
        EnvFilter::new(format!(
            "folio={},folio::services::catalog=debug,tower_http=debug,hyper=warn",
            level
        ))
    } else {
        EnvFilter::new(format!("folio={},tower_http=info,hyper=warn", level))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
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
            .try_init()?;
    }

    Ok(())
}
