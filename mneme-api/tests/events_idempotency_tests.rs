//! Subscription-Events Intake Tests
//!
//! Validates the signed intake surface end to end: signature acceptance
//! and rejection, the billing state machine driven by event types, and
//! the at-most-once processing guarantee for a given event id.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use mneme_api::events::sign_payload;
use mneme_api::{create_api_router, ApiConfig, AppState};
use mneme_core::{BillingState, EntityIdType, MnemeConfig, OwnerId};
use tower::ServiceExt;

const SECRET: &str = "whsec_events_test_secret";

// ============================================================================
// TEST HARNESS
// ============================================================================

fn test_state() -> AppState {
    let api_config = ApiConfig {
        events_secret: Some(SECRET.to_string()),
        rate_limit_enabled: false,
        ..ApiConfig::default()
    };
    AppState::build(api_config, MnemeConfig::default()).unwrap()
}

fn signed_event_request(event_id: &str, event_type: &str, owner_id: OwnerId) -> Request<Body> {
    let body = serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": {"owner_id": owner_id.to_string()}
    })
    .to_string();
    let signature = sign_payload(SECRET, Utc::now().timestamp(), body.as_bytes());

    Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .header("x-event-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}

async fn app_with_owner(billing_state: BillingState) -> (AppState, Router, OwnerId) {
    let state = test_state();
    let owner = state.registry.create_owner(OwnerId::now_v7()).await;
    owner.meta.write().await.billing_state = billing_state;
    if billing_state == BillingState::Grace {
        owner.meta.write().await.grace_deadline =
            Some(Utc::now() + chrono::Duration::hours(24));
    }
    let owner_id = owner.id;
    let app = create_api_router(state.clone());
    (state, app, owner_id)
}

// ============================================================================
// SIGNATURE ENFORCEMENT
// ============================================================================

#[tokio::test]
async fn test_unsigned_event_rejected_400() {
    let (_, app, owner_id) = app_with_owner(BillingState::Free).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "id": "evt_unsigned",
                "type": "payment_failed",
                "data": {"owner_id": owner_id.to_string()}
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_secret_rejected_400() {
    let (_, app, owner_id) = app_with_owner(BillingState::Free).await;
    let body = serde_json::json!({
        "id": "evt_bad_sig",
        "type": "payment_failed",
        "data": {"owner_id": owner_id.to_string()}
    })
    .to_string();
    let signature = sign_payload("wrong_secret", Utc::now().timestamp(), body.as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .header("x-event-signature", signature)
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stale_timestamp_rejected_400() {
    let (_, app, owner_id) = app_with_owner(BillingState::Free).await;
    let body = serde_json::json!({
        "id": "evt_stale",
        "type": "payment_failed",
        "data": {"owner_id": owner_id.to_string()}
    })
    .to_string();
    // 10 minutes old, past the +-5 minute window
    let signature = sign_payload(SECRET, Utc::now().timestamp() - 600, body.as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .header("x-event-signature", signature)
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[tokio::test]
async fn test_payment_failed_starts_grace() {
    let (state, app, owner_id) = app_with_owner(BillingState::Active).await;

    let response = app
        .oneshot(signed_event_request("evt_pf", "payment_failed", owner_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let owner = state.registry.owner(owner_id).await.unwrap();
    let meta = owner.meta.read().await;
    assert_eq!(meta.billing_state, BillingState::Grace);
    assert!(meta.grace_deadline.is_some());
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let (state, app, owner_id) = app_with_owner(BillingState::Free).await;

    let response = app
        .clone()
        .oneshot(signed_event_request(
            "evt_sub_new",
            "subscription_created",
            owner_id,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    {
        let owner = state.registry.owner(owner_id).await.unwrap();
        assert_eq!(owner.meta.read().await.billing_state, BillingState::Active);
    }

    let response = app
        .oneshot(signed_event_request(
            "evt_sub_gone",
            "subscription_deleted",
            owner_id,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    {
        let owner = state.registry.owner(owner_id).await.unwrap();
        let meta = owner.meta.read().await;
        assert_eq!(meta.billing_state, BillingState::Free);
        assert!(meta.subscription_id.is_none());
    }
}

#[tokio::test]
async fn test_unknown_event_type_is_200_no_op() {
    let (state, app, owner_id) = app_with_owner(BillingState::Free).await;

    let response = app
        .oneshot(signed_event_request(
            "evt_unknown",
            "invoice_finalized",
            owner_id,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("ignored"));

    let owner = state.registry.owner(owner_id).await.unwrap();
    assert_eq!(owner.meta.read().await.billing_state, BillingState::Free);
}

// ============================================================================
// IDEMPOTENCY (spec scenario: event E delivered twice)
// ============================================================================

#[tokio::test]
async fn test_payment_succeeded_replay_is_idempotent() {
    let (state, app, owner_id) = app_with_owner(BillingState::Grace).await;

    // First delivery recovers the owner
    let response = app
        .clone()
        .oneshot(signed_event_request("evt_E", "payment_succeeded", owner_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("processed"));
    {
        let owner = state.registry.owner(owner_id).await.unwrap();
        assert_eq!(owner.meta.read().await.billing_state, BillingState::Active);
    }

    // Force a different state so a replayed side effect would be visible
    {
        let owner = state.registry.owner(owner_id).await.unwrap();
        owner.meta.write().await.billing_state = BillingState::Grace;
    }

    // Replay: HTTP success, "already processed", no state change
    let response = app
        .oneshot(signed_event_request("evt_E", "payment_succeeded", owner_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("already_processed"));
    {
        let owner = state.registry.owner(owner_id).await.unwrap();
        assert_eq!(owner.meta.read().await.billing_state, BillingState::Grace);
    }
}

#[tokio::test]
async fn test_failed_event_left_retriable() {
    let state = test_state();
    let app = create_api_router(state.clone());
    let ghost = OwnerId::now_v7();

    // Handler fails: the owner does not exist
    let response = app
        .clone()
        .oneshot(signed_event_request("evt_retry", "payment_failed", ghost))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let row = state.registry.event("evt_retry").await.unwrap();
    assert!(!row.processed);
    assert!(row.error.is_some());

    // Once the owner exists, the external retry succeeds
    state.registry.create_owner(ghost).await;
    let response = app
        .oneshot(signed_event_request("evt_retry", "payment_failed", ghost))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let row = state.registry.event("evt_retry").await.unwrap();
    assert!(row.processed);
    assert!(row.error.is_none());
}

// ============================================================================
// ADMISSION MONOTONICITY
// ============================================================================

/// Once SUSPENDED, no inference succeeds until a payment-succeeded event
/// is processed.
#[tokio::test]
async fn test_suspension_lifts_only_via_payment_succeeded() {
    let (state, app, owner_id) = app_with_owner(BillingState::Suspended).await;
    let context = state
        .registry
        .create_context(owner_id, "suspended-owner")
        .await
        .unwrap();

    let inference = |app: Router| {
        let token = context.id.to_string();
        async move {
            let request = Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("authorization", format!("Bearer {}", token))
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"model": "openai/gpt-4", "messages": [{"role": "user", "content": "hi"}]}"#,
                ))
                .unwrap();
            app.oneshot(request).await.unwrap()
        }
    };

    let response = inference(app.clone()).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let response = app
        .clone()
        .oneshot(signed_event_request(
            "evt_recover",
            "payment_succeeded",
            owner_id,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Admission passes now; the request proceeds to credential lookup
    // (422, since no credential was seeded) rather than 402.
    let response = inference(app).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
