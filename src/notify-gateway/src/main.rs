//! Notify Gateway — burst-protecting notification front door.
//!
//! Main entry point that loads configuration, starts the notification
//! engine and serves the HTTP API until shutdown.

use clap::Parser;
use notify_api::ApiServer;
use notify_core::config::AppConfig;
use notify_core::CancellationToken;
use notify_delivery::{build_sender, NotificationEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "notify-gateway")]
#[command(about = "Coalesces bursts of notifications into time-windowed batches")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "NOTIFY_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Node identifier (overrides config)
    #[arg(long, env = "NOTIFY_GATEWAY__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "NOTIFY_GATEWAY__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Rolling admission window in milliseconds (overrides config)
    #[arg(long)]
    immediate_window_ms: Option<u64>,

    /// Requests allowed through per admission window (overrides config)
    #[arg(long)]
    max_immediate_calls: Option<u32>,

    /// Batch window length in milliseconds (overrides config)
    #[arg(long)]
    retention_period_ms: Option<u64>,

    /// Maximum items per flushed batch, 0 for unbounded (overrides config)
    #[arg(long)]
    max_batched_items: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "notify_gateway=info,notify_delivery=info,notify_api=info,notifications=info,tower_http=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Notify Gateway starting up");

    // Load configuration. An explicitly requested file must load.
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from(Some(path))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(window) = cli.immediate_window_ms {
        config.admission.immediate_window_ms = window;
    }
    if let Some(calls) = cli.max_immediate_calls {
        config.admission.max_immediate_calls = calls;
    }
    if let Some(period) = cli.retention_period_ms {
        config.batching.retention_period_ms = period;
    }
    if let Some(items) = cli.max_batched_items {
        config.batching.max_batched_items = items;
    }

    config.validate()?;

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        sender = ?config.sender.kind,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let sender = build_sender(&config.sender);
    let engine = Arc::new(NotificationEngine::start(
        config.admission.clone(),
        config.batching.clone(),
        sender,
        shutdown.clone(),
    )?);

    // Trigger the host shutdown signal on ctrl-c
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let api_server = ApiServer::new(config.clone(), engine.clone(), shutdown.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Notify Gateway is ready to accept notifications");

    // Start HTTP server (blocks until shutdown)
    let served = api_server.start_http().await;

    engine.dispose();
    info!("Notify Gateway stopped");

    served
}
