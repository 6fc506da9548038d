//! Inference REST API Routes
//!
//! The two inbound inference surfaces: chat-style and messages-style.
//! Both authenticate with a Bearer context id, accept the memory-control
//! headers, and forward passthrough fields to the provider untouched.

use crate::auth::AuthExtractor;
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::{run_inference, Surface};
use crate::state::AppState;
use axum::{
    extract::State,
    http::HeaderMap,
    response::Response,
    Json,
};
use serde_json::Value;

/// POST /v1/chat/completions - chat-style inference
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "Inference",
    responses(
        (status = 200, description = "Provider response, streamed when requested"),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unknown or inactive context id", body = ApiError),
        (status = 402, description = "Free tier exhausted or account suspended", body = ApiError),
        (status = 422, description = "No provider credential for the model family", body = ApiError),
        (status = 429, description = "Rate limit exceeded", body = ApiError),
        (status = 502, description = "Provider unreachable", body = ApiError),
        (status = 504, description = "Provider deadline exceeded", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn chat_completions(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    run_inference(state, auth, headers, body, Surface::Chat).await
}

/// POST /v1/messages - messages-style inference
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/messages",
    tag = "Inference",
    responses(
        (status = 200, description = "Provider response, streamed when requested"),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unknown or inactive context id", body = ApiError),
        (status = 402, description = "Free tier exhausted or account suspended", body = ApiError),
        (status = 422, description = "No provider credential for the model family", body = ApiError),
        (status = 429, description = "Rate limit exceeded", body = ApiError),
        (status = 502, description = "Provider unreachable", body = ApiError),
        (status = 504, description = "Provider deadline exceeded", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn messages(
    State(state): State<AppState>,
    AuthExtractor(auth): AuthExtractor,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    run_inference(state, auth, headers, body, Surface::Messages).await
}
