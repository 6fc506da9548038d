//! Billing REST API Routes
//!
//! Owner-scoped billing overview, usage details, and quota status. All
//! figures come from the same QuotaConfig the admission gate reads, so
//! the overview can never disagree with the gate.

use crate::auth::OwnerAuth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use mneme_core::{BillingState, Timestamp, UsageRecord};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

// ============================================================================
// TYPES
// ============================================================================

/// Billing overview for an owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BillingOverview {
    pub billing_state: BillingState,
    pub has_instrument: bool,
    /// Cumulative billable memory tokens
    pub cumulative_tokens: i64,
    /// Tokens already reported to the subscription system
    pub cumulative_tokens_reported: i64,
    /// Free-tier allowance in tokens
    pub free_allowance_tokens: i64,
    /// Price per million billable tokens, USD
    pub price_per_million: f64,
    /// Accrued cost beyond the free allowance, USD
    pub accrued_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub grace_deadline: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

/// Usage detail listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UsageResponse {
    pub records: Vec<UsageRecord>,
    pub total: i32,
}

/// Quota status for an owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QuotaStatus {
    pub billing_state: BillingState,
    pub used_tokens: i64,
    pub allowance_tokens: i64,
    /// Remaining free-tier tokens, or "unlimited"
    pub remaining: String,
}

/// One attached payment method. The instrument itself lives in the
/// external subscription system; the core only knows it exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PaymentMethod {
    pub kind: String,
    pub attached: bool,
}

/// Payment-method listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PaymentMethodsResponse {
    pub payment_methods: Vec<PaymentMethod>,
}

/// One invoice line: a calendar month of billable usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InvoiceLine {
    /// Calendar month, "YYYY-MM"
    pub period: String,
    pub billable_tokens: i64,
    pub cost: f64,
    pub request_count: i64,
}

/// Invoice listing, newest period first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InvoicesResponse {
    pub invoices: Vec<InvoiceLine>,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /v1/billing/overview - billing overview for the owner
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/billing/overview",
    tag = "Billing",
    responses(
        (status = 200, description = "Billing overview", body = BillingOverview),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn overview(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
) -> ApiResult<impl IntoResponse> {
    let snapshot = owner.snapshot().await;
    let quota = state.quota.config();
    let over_allowance = (snapshot.cumulative_tokens - quota.free_allowance_tokens).max(0);

    Ok(Json(BillingOverview {
        billing_state: snapshot.billing_state,
        has_instrument: snapshot.has_instrument,
        cumulative_tokens: snapshot.cumulative_tokens,
        cumulative_tokens_reported: snapshot.cumulative_tokens_reported,
        free_allowance_tokens: quota.free_allowance_tokens,
        price_per_million: quota.price_per_million,
        accrued_cost: quota.cost_of(over_allowance),
        grace_deadline: snapshot.grace_deadline,
        subscription_id: snapshot.subscription_id,
    }))
}

/// GET /v1/billing/usage - usage records for the owner
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/billing/usage",
    tag = "Billing",
    responses(
        (status = 200, description = "Usage records", body = UsageResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn usage(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
) -> ApiResult<impl IntoResponse> {
    let records = state.registry.usage_for_owner(owner.id).await;
    let total = records.len() as i32;
    Ok(Json(UsageResponse { records, total }))
}

/// GET /v1/billing/quota - quota status for the owner
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/billing/quota",
    tag = "Billing",
    responses(
        (status = 200, description = "Quota status", body = QuotaStatus),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn quota_status(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
) -> ApiResult<impl IntoResponse> {
    let billing_state = owner.meta.read().await.billing_state;
    let used = owner.cumulative_tokens.load(Ordering::Relaxed);
    let quota = state.quota.config();

    let remaining = match billing_state {
        BillingState::Free => (quota.free_allowance_tokens - used).max(0).to_string(),
        _ => "unlimited".to_string(),
    };

    Ok(Json(QuotaStatus {
        billing_state,
        used_tokens: used,
        allowance_tokens: quota.free_allowance_tokens,
        remaining,
    }))
}

/// GET /v1/billing/payment-methods - attached payment instruments
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/billing/payment-methods",
    tag = "Billing",
    responses(
        (status = 200, description = "Payment methods", body = PaymentMethodsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn payment_methods(OwnerAuth(owner): OwnerAuth) -> ApiResult<impl IntoResponse> {
    let has_instrument = owner.meta.read().await.has_instrument;
    let payment_methods = if has_instrument {
        vec![PaymentMethod {
            kind: "card".to_string(),
            attached: true,
        }]
    } else {
        Vec::new()
    };
    Ok(Json(PaymentMethodsResponse { payment_methods }))
}

/// GET /v1/billing/invoices - monthly billable usage rollup
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/billing/invoices",
    tag = "Billing",
    responses(
        (status = 200, description = "Invoice lines", body = InvoicesResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn invoices(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
) -> ApiResult<impl IntoResponse> {
    let records = state.registry.usage_for_owner(owner.id).await;

    let mut by_period: std::collections::BTreeMap<String, InvoiceLine> =
        std::collections::BTreeMap::new();
    for record in records {
        let period = record.created_at.format("%Y-%m").to_string();
        let line = by_period.entry(period.clone()).or_insert(InvoiceLine {
            period,
            billable_tokens: 0,
            cost: 0.0,
            request_count: 0,
        });
        line.billable_tokens += record.stored_input_tokens + record.stored_output_tokens;
        line.cost += record.cost;
        line.request_count += 1;
    }

    let invoices: Vec<InvoiceLine> = by_period.into_values().rev().collect();
    Ok(Json(InvoicesResponse { invoices }))
}
