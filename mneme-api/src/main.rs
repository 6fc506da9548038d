//! MNEME API Server Entry Point
//!
//! Bootstraps configuration, builds the state graph, spawns the usage
//! reporter and retention sweep, and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use mneme_api::quota::{spawn_reporter, LoggingReporter};
use mneme_api::retention::spawn_retention;
use mneme_api::telemetry::{init_telemetry, TelemetryConfig};
use mneme_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use mneme_core::MnemeConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_telemetry(&telemetry_config)?;

    let api_config = ApiConfig::from_env();
    let config = MnemeConfig::from_env();
    if api_config.events_secret.is_none() {
        tracing::warn!("MNEME_EVENTS_SECRET unset; subscription events will be rejected");
    }

    let addr = resolve_bind_addr(&api_config)?;
    let state = AppState::build(api_config, config)?;

    let reporter = spawn_reporter(
        state.registry.clone(),
        state.config.quota.clone(),
        Arc::new(LoggingReporter),
    );
    let retention = spawn_retention(state.clone());

    let app = create_api_router(state.clone());

    tracing::info!(%addr, "Starting MNEME API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    reporter.abort();
    retention.abort();
    state.shutdown().await;

    Ok(())
}

fn resolve_bind_addr(config: &ApiConfig) -> ApiResult<SocketAddr> {
    let addr = format!("{}:{}", config.host, config.port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
