//! Health endpoint

use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

/// Health probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Resident adapter handles
    pub pool_handles: usize,
    /// Embedding cache residency and upstream call count
    pub embed_cache_entries: usize,
    pub embed_upstream_calls: u64,
}

/// GET /health - liveness and component probes
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service healthy", body = HealthResponse))
))]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        pool_handles: state.pool.len().await,
        embed_cache_entries: state.embed_cache.len(),
        embed_upstream_calls: state.embed_cache.upstream_calls(),
    })
}
