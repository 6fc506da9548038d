//! Property-Based Tests for Admission Enforcement
//!
//! For any inference request: IF the request lacks a valid context id
//! THEN the API SHALL return 401; IF the owner is SUSPENDED THEN the API
//! SHALL return 402 until a payment-succeeded event is processed; IF the
//! owner is on the free tier with the allowance exhausted THEN the API
//! SHALL return 402 with code FREE_TIER_EXHAUSTED; IF the model family
//! has no credential THEN the API SHALL return 422.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mneme_api::{create_api_router, ApiConfig, AppState};
use mneme_core::{BillingState, EntityIdType, MnemeConfig, OwnerId, ProviderFamily};
use proptest::prelude::*;
use std::sync::atomic::Ordering;
use tower::ServiceExt;

// ============================================================================
// TEST HARNESS
// ============================================================================

fn test_state() -> AppState {
    let api_config = ApiConfig {
        rate_limit_enabled: false,
        ..ApiConfig::default()
    };
    AppState::build(api_config, MnemeConfig::default()).unwrap()
}

/// Seed an owner + context + openai credential; returns (state, app, token).
async fn seeded_app(billing_state: BillingState) -> (AppState, Router, String) {
    let state = test_state();
    let owner = state.registry.create_owner(OwnerId::now_v7()).await;
    owner.meta.write().await.billing_state = billing_state;
    state
        .registry
        .set_credential(owner.id, ProviderFamily::Openai, "sk-test")
        .await
        .unwrap();
    let context = state
        .registry
        .create_context(owner.id, "admission-tests")
        .await
        .unwrap();
    let token = context.id.to_string();
    let app = create_api_router(state.clone());
    (state, app, token)
}

fn inference_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"model": "openai/gpt-4", "messages": [{"role": "user", "content": "hi"}]}"#,
        ))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}

// ============================================================================
// AUTH ENFORCEMENT
// ============================================================================

#[tokio::test]
async fn test_missing_auth_is_401() {
    let (_, app, _) = seeded_app(BillingState::Free).await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model": "gpt-4", "messages": []}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_context_is_401() {
    let (_, app, _) = seeded_app(BillingState::Free).await;
    let token = mneme_core::ContextId::generate().to_string();

    let response = app.oneshot(inference_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Malformed bearer tokens never authenticate.
    #[test]
    fn prop_malformed_tokens_rejected(token in "[a-zA-Z0-9_]{0,40}") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (_, app, real_token) = seeded_app(BillingState::Free).await;
            prop_assume!(token != real_token);

            let response = app.oneshot(inference_request(&token)).await.unwrap();
            prop_assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            Ok(())
        })?;
    }
}

// ============================================================================
// ADMISSION LADDER
// ============================================================================

#[tokio::test]
async fn test_suspended_owner_denied_402() {
    let (_, app, token) = seeded_app(BillingState::Suspended).await;

    let response = app.oneshot(inference_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_string(response).await;
    assert!(body.contains("ACCOUNT_SUSPENDED"));
}

#[tokio::test]
async fn test_free_tier_exhausted_denied_402() {
    let (state, app, token) = seeded_app(BillingState::Free).await;
    let owner = state.registry.owners().await.pop().unwrap();
    owner.cumulative_tokens.store(
        state.quota.config().free_allowance_tokens,
        Ordering::Relaxed,
    );

    let response = app.oneshot(inference_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_string(response).await;
    assert!(body.contains("FREE_TIER_EXHAUSTED"));
}

#[tokio::test]
async fn test_missing_credential_is_422() {
    let state = test_state();
    let owner = state.registry.create_owner(OwnerId::now_v7()).await;
    // No anthropic credential seeded
    let context = state
        .registry
        .create_context(owner.id, "no-creds")
        .await
        .unwrap();
    let app = create_api_router(state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {}", context.id))
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"model": "anthropic/claude-3-opus", "messages": [{"role": "user", "content": "hi"}]}"#,
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_string(response).await;
    assert!(body.contains("PROVIDER_KEY_MISSING"));
}

// ============================================================================
// VALIDATION BEFORE PROVIDER
// ============================================================================

#[tokio::test]
async fn test_validation_errors_are_400() {
    let (_, app, token) = seeded_app(BillingState::Free).await;

    for body in [
        r#"{"messages": [{"role": "user", "content": "hi"}]}"#,
        r#"{"model": "gpt-4"}"#,
        r#"{"model": "gpt-4", "messages": []}"#,
        r#"{"model": "gpt-4", "messages": [{"role": "tool", "content": "x"}]}"#,
    ] {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
    }
}

#[tokio::test]
async fn test_messages_surface_requires_max_tokens() {
    let (_, app, token) = seeded_app(BillingState::Free).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"model": "anthropic/claude-3-opus", "messages": [{"role": "user", "content": "hi"}]}"#,
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("max_tokens"));
}

#[tokio::test]
async fn test_method_not_allowed_is_405() {
    let (_, app, token) = seeded_app(BillingState::Free).await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// RATE LIMITING
// ============================================================================

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let api_config = ApiConfig {
        rate_limit_enabled: true,
        rate_limit_per_minute: 2,
        ..ApiConfig::default()
    };
    let state = AppState::build(api_config, MnemeConfig::default()).unwrap();
    let owner = state.registry.create_owner(OwnerId::now_v7()).await;
    let context = state
        .registry
        .create_context(owner.id, "rate-limited")
        .await
        .unwrap();
    let app = create_api_router(state.clone());

    let mut saw_429 = false;
    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(inference_request(&context.id.to_string()))
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            saw_429 = true;
            break;
        }
    }
    assert!(saw_429);
}
