//! Context lifecycle REST API Routes
//!
//! Owner-scoped management of memory contexts: list, create, delete,
//! clear-memory, and stats. A context id returned by create is the
//! caller's bearer credential for the inference surface.

use crate::auth::OwnerAuth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mneme_core::{ContextId, MemoryContext, Session};
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPES
// ============================================================================

/// Request to create a new memory context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateContextRequest {
    /// Human-readable label
    pub name: String,
}

/// Response containing context details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ContextResponse {
    pub context: MemoryContext,
}

/// Response containing a list of contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListContextsResponse {
    pub contexts: Vec<MemoryContext>,
    pub total: i32,
}

/// Aggregate statistics for one context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ContextStatsResponse {
    pub context: MemoryContext,
    /// Chunks currently stored in the vector namespace
    pub chunk_count: i64,
    /// Sessions under this context
    pub sessions: Vec<Session>,
    /// Stored tokens across all sessions
    pub token_count: i64,
}

// ============================================================================
// HELPERS
// ============================================================================

async fn owned_context(
    state: &AppState,
    owner_id: mneme_core::OwnerId,
    context_id: &str,
) -> ApiResult<MemoryContext> {
    let context_id: ContextId = context_id
        .parse()
        .map_err(|_| ApiError::invalid_format("context_id", "mk_<32 hex>"))?;
    state
        .registry
        .context(&context_id)
        .await
        .filter(|c| c.owner_id == owner_id)
        .ok_or_else(|| ApiError::context_not_found(&context_id))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /v1/contexts - list contexts for the owner
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/contexts",
    tag = "Contexts",
    responses(
        (status = 200, description = "List of contexts", body = ListContextsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn list_contexts(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
) -> ApiResult<impl IntoResponse> {
    let contexts = state.registry.contexts_for(owner.id).await;
    let total = contexts.len() as i32;
    Ok(Json(ListContextsResponse { contexts, total }))
}

/// POST /v1/contexts - create a context
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/contexts",
    tag = "Contexts",
    request_body = CreateContextRequest,
    responses(
        (status = 201, description = "Context created", body = ContextResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn create_context(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
    Json(req): Json<CreateContextRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::missing_field("name"));
    }

    let context = state
        .registry
        .create_context(owner.id, req.name.trim())
        .await?;

    // Namespace creation is idempotent and allocation-free until the
    // first write.
    let handle = state.pool.get(&context.id).await?;
    handle.ensure(&context.id).await?;

    tracing::info!(owner_id = %owner.id, context = %context.id, "Context created");

    Ok((StatusCode::CREATED, Json(ContextResponse { context })))
}

/// DELETE /v1/contexts/{context_id} - delete a context and its namespace
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/v1/contexts/{context_id}",
    tag = "Contexts",
    params(("context_id" = String, Path, description = "Context id")),
    responses(
        (status = 204, description = "Context deleted"),
        (status = 404, description = "Context not found", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn delete_context(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
    Path(context_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let context = owned_context(&state, owner.id, &context_id).await?;

    let handle = state.pool.get(&context.id).await?;
    handle.drop_namespace(&context.id).await?;
    state.pool.invalidate(&context.id).await;
    state.registry.delete_context(&context.id).await;

    tracing::info!(owner_id = %owner.id, context = %context.id, "Context deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/contexts/{context_id}/clear - clear all stored memory
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/contexts/{context_id}/clear",
    tag = "Contexts",
    params(("context_id" = String, Path, description = "Context id")),
    responses(
        (status = 200, description = "Memory cleared"),
        (status = 404, description = "Context not found", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn clear_context(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
    Path(context_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let context = owned_context(&state, owner.id, &context_id).await?;

    let handle = state.pool.get(&context.id).await?;
    let removed = handle.clear(&context.id).await?;
    state.registry.clear_sessions(&context.id).await;

    tracing::info!(owner_id = %owner.id, context = %context.id, removed, "Context memory cleared");

    Ok(Json(serde_json::json!({ "cleared_chunks": removed })))
}

/// GET /v1/contexts/{context_id}/stats - aggregate statistics
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/contexts/{context_id}/stats",
    tag = "Contexts",
    params(("context_id" = String, Path, description = "Context id")),
    responses(
        (status = 200, description = "Context statistics", body = ContextStatsResponse),
        (status = 404, description = "Context not found", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn context_stats(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
    Path(context_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let context = owned_context(&state, owner.id, &context_id).await?;

    let handle = state.pool.get(&context.id).await?;
    let chunk_count = handle.count(&context.id).await? as i64;
    let sessions = state.registry.sessions_for(&context.id).await;
    let token_count = sessions.iter().map(|s| s.token_count).sum();

    Ok(Json(ContextStatsResponse {
        context,
        chunk_count,
        sessions,
        token_count,
    }))
}
