//! Session lifecycle REST API Routes
//!
//! Bearer-authenticated session management scoped to the caller's own
//! context: list, get, delete, and search. Stored material never leaves
//! the proxy: search returns chunk metadata and scores, not content.

use crate::auth::AuthExtractor;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use mneme_core::{ChunkId, ChunkRole, RecencyBias, Session, SessionId, TemporalWindow, Timestamp};
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPES
// ============================================================================

/// Response containing a list of sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
    pub total: i32,
}

/// Request to search within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchSessionRequest {
    /// Natural-language query
    pub query: String,
    /// Result cap; defaults to the configured context limit
    #[serde(default)]
    pub limit: Option<usize>,
    /// Recency bias; defaults to medium
    #[serde(default)]
    pub recency_bias: Option<RecencyBias>,
}

/// One search match. Content is withheld: stored material never leaves
/// the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchMatch {
    pub chunk_id: ChunkId,
    pub role: ChunkRole,
    pub window: TemporalWindow,
    pub score: f32,
    pub token_count: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Response for a session search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchSessionResponse {
    pub matches: Vec<SearchMatch>,
    pub total: i32,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /v1/sessions - list sessions under the authenticated context
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/sessions",
    tag = "Sessions",
    responses(
        (status = 200, description = "List of sessions", body = ListSessionsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let sessions = state.registry.sessions_for(&auth.context.id).await;
    let total = sessions.len() as i32;
    Ok(Json(ListSessionsResponse { sessions, total }))
}

/// GET /v1/sessions/{session_id} - fetch one session
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session details", body = Session),
        (status = 404, description = "Session not found", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn get_session(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_id = parse_session(&session_id)?;
    let session = state
        .registry
        .session(&auth.context.id, &session_id)
        .await
        .ok_or_else(|| ApiError::session_not_found(&session_id))?;
    Ok(Json(session))
}

/// DELETE /v1/sessions/{session_id} - delete a session and its chunks
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn delete_session(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_id = parse_session(&session_id)?;
    let ctx = &auth.context.id;

    if !state.registry.delete_session(ctx, &session_id).await {
        return Err(ApiError::session_not_found(&session_id));
    }

    // Remove the session's chunks from the namespace.
    let handle = state.pool.get(ctx).await?;
    let doomed: Vec<ChunkId> = handle
        .list_items(ctx)
        .await?
        .into_iter()
        .filter(|item| item.meta.session_id == session_id)
        .map(|item| item.id)
        .collect();
    let removed = handle.delete(ctx, &doomed).await?;

    tracing::info!(context = %ctx, session = %session_id, removed, "Session deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/sessions/{session_id}/search - search within a session
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/sessions/{session_id}/search",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = SearchSessionRequest,
    responses(
        (status = 200, description = "Search matches (metadata only)", body = SearchSessionResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn search_session(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
    Path(session_id): Path<String>,
    Json(req): Json<SearchSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.query.trim().is_empty() {
        return Err(ApiError::missing_field("query"));
    }
    let session_id = parse_session(&session_id)?;
    let ctx = &auth.context.id;

    let limit = req
        .limit
        .unwrap_or(state.engine.config().default_limit);
    let handle = state.pool.get(ctx).await?;
    let retrieved = state
        .engine
        .retrieve(
            handle.as_ref(),
            ctx,
            &session_id,
            &req.query,
            limit,
            req.recency_bias.unwrap_or_default(),
            Utc::now(),
        )
        .await
        .map_err(ApiError::from)?;

    let matches: Vec<SearchMatch> = retrieved
        .chunks
        .into_iter()
        .map(|chunk| SearchMatch {
            chunk_id: chunk.id,
            role: chunk.role,
            window: chunk.window,
            score: chunk.score,
            token_count: chunk.token_count,
            created_at: chunk.created_at,
        })
        .collect();
    let total = matches.len() as i32;

    Ok(Json(SearchSessionResponse { matches, total }))
}

fn parse_session(raw: &str) -> ApiResult<SessionId> {
    SessionId::new(raw).ok_or_else(|| ApiError::invalid_format("session_id", "1-128 characters"))
}
