//! API server — HTTP entry point and Prometheus metrics exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use notify_core::config::AppConfig;
use notify_core::CancellationToken;
use notify_delivery::NotificationEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Main API server for the notification gateway.
pub struct ApiServer {
    config: AppConfig,
    engine: Arc<NotificationEngine>,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        engine: Arc<NotificationEngine>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            engine,
            shutdown,
        }
    }

    /// Build the REST router without binding a listener.
    pub fn router(&self) -> Router {
        build_router(AppState {
            engine: self.engine.clone(),
            shutdown: self.shutdown.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        })
    }

    /// Start the HTTP REST server. Returns once the shutdown signal fires
    /// and in-flight requests have drained.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/notifications", post(rest::handle_notification))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
