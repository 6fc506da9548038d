//! Telemetry initialisation
//!
//! Structured JSON logging via tracing-subscriber with env-filter.
//! Every request path logs with its request id attached.

use crate::error::{ApiError, ApiResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on log lines
    pub service_name: String,
    /// Emit JSON log lines (plain fmt when false)
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "mneme-api".to_string(),
            json: std::env::var("MNEME_LOG_JSON")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }
}

/// Initialise the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mneme_api=debug,mneme_engine=debug,tower_http=debug,info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(service_name = %config.service_name, "Telemetry initialized");
    Ok(())
}
