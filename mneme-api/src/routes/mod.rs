//! Route modules and router assembly

pub mod billing;
pub mod contexts;
pub mod credentials;
pub mod events;
pub mod health;
pub mod inference;
pub mod owners;
pub mod sessions;

use crate::auth::auth_middleware;
use crate::state::AppState;
use axum::{
    http::HeaderValue,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the complete API router.
///
/// Three surfaces:
/// - Bearer (context-id) auth: inference + session lifecycle
/// - Owner (`X-Owner-ID`) auth: context/billing/credential management
/// - Public: health and the signed subscription-events intake
pub fn create_api_router(state: AppState) -> Router {
    let bearer = Router::new()
        .route("/v1/chat/completions", post(inference::chat_completions))
        .route("/v1/messages", post(inference::messages))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route(
            "/v1/sessions/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/v1/sessions/:session_id/search", post(sessions::search_session))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let management = Router::new()
        .route("/v1/owners", post(owners::create_owner))
        .route(
            "/v1/contexts",
            get(contexts::list_contexts).post(contexts::create_context),
        )
        .route("/v1/contexts/:context_id", delete(contexts::delete_context))
        .route("/v1/contexts/:context_id/clear", post(contexts::clear_context))
        .route("/v1/contexts/:context_id/stats", get(contexts::context_stats))
        .route("/v1/billing/overview", get(billing::overview))
        .route("/v1/billing/usage", get(billing::usage))
        .route("/v1/billing/quota", get(billing::quota_status))
        .route("/v1/billing/payment-methods", get(billing::payment_methods))
        .route("/v1/billing/invoices", get(billing::invoices))
        .route("/v1/credentials", get(credentials::list_credentials))
        .route(
            "/v1/credentials/:family",
            put(credentials::set_credential).delete(credentials::delete_credential),
        );

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/v1/events", post(events::receive_event));

    Router::new()
        .merge(bearer)
        .merge(management)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state))
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.api_config.cors_origins;
    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
