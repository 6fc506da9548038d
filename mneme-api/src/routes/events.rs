//! Subscription-events intake route
//!
//! Unauthenticated path carrying a signature header over
//! (timestamp, body). Signature failures return 400; unknown event types
//! return 200 with no side effect; replays return 200 with
//! "already processed".

use crate::error::{ApiError, ApiResult};
use crate::events::{process_event, verify_signature, EventOutcome, EventSignature, InboundEvent};
use crate::state::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use mneme_core::EventError;
use serde::{Deserialize, Serialize};

/// Header carrying the event signature: `t=<unix>,v1=<hex-hmac>`.
pub const SIGNATURE_HEADER: &str = "x-event-signature";

/// Acknowledgement body for an event delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EventAck {
    /// "processed", "already_processed", or "ignored"
    pub status: String,
    pub event_id: String,
}

/// POST /v1/events - signed subscription-events intake
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/events",
    tag = "Events",
    request_body(content = String, description = "Raw signed event payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = EventAck),
        (status = 400, description = "Bad signature or malformed payload", body = ApiError),
        (status = 500, description = "Handler failure; event left retriable", body = ApiError),
    )
))]
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let secret = state
        .api_config
        .events_secret
        .as_deref()
        .ok_or_else(|| ApiError::invalid_signature())?;

    let signature_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::invalid_signature())?;

    let signature = EventSignature::parse(signature_header)
        .map_err(|_| ApiError::invalid_signature())?;
    verify_signature(secret, &signature, &body, crate::events::DEFAULT_SKEW)
        .map_err(|_| ApiError::invalid_signature())?;

    let event: InboundEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_input(format!("Invalid event payload: {}", e)))?;
    if event.id.trim().is_empty() {
        return Err(ApiError::missing_field("id"));
    }
    let event_id = event.id.clone();

    let outcome = process_event(&state.registry, state.quota.config(), event)
        .await
        .map_err(|e| match e {
            EventError::HandlerFailed { reason, .. } => {
                ApiError::internal_error(format!("Event handler failed: {}", reason))
            }
            other => ApiError::from(mneme_core::MnemeError::Event(other)),
        })?;

    let status = match outcome {
        EventOutcome::Processed => "processed",
        EventOutcome::AlreadyProcessed => "already_processed",
        EventOutcome::Ignored => "ignored",
    };

    Ok(Json(EventAck {
        status: status.to_string(),
        event_id,
    }))
}
