//! Entity structs for MNEME
//!
//! Plain data carried between the registry, the engine, and the API layer.
//! Chunks are immutable after creation: deletion is the only mutation.

use crate::{
    BillingState, ChunkId, ChunkRole, ContentHash, ContextId, OwnerId, ProviderFamily,
    RequestId, SessionId, Timestamp, UsageRecordId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// OWNER
// ============================================================================

/// The billed principal. Owns credentials, counters, and billing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Owner {
    pub id: OwnerId,
    pub billing_state: BillingState,
    /// Whether a payment instrument is attached
    pub has_instrument: bool,
    /// Cumulative billable memory tokens, monotonically non-decreasing
    pub cumulative_tokens: i64,
    /// Portion of cumulative tokens already reported to the external
    /// subscription system; advanced only on successful submission
    pub cumulative_tokens_reported: i64,
    /// Deadline for payment recovery while in GRACE
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub grace_deadline: Option<Timestamp>,
    /// External subscription identifier while subscribed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl Owner {
    /// Create a new owner on the free tier.
    pub fn new(id: OwnerId) -> Self {
        Self {
            id,
            billing_state: BillingState::Free,
            has_instrument: false,
            cumulative_tokens: 0,
            cumulative_tokens_reported: 0,
            grace_deadline: None,
            subscription_id: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// MEMORY CONTEXT
// ============================================================================

/// A memory context: one isolated vector namespace, owned by exactly one
/// Owner for its entire life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MemoryContext {
    pub id: ContextId,
    pub owner_id: OwnerId,
    /// Human-readable label, caller-chosen
    pub name: String,
    /// Inactive contexts fail authentication
    pub active: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_used_at: Timestamp,
}

impl MemoryContext {
    pub fn new(owner_id: OwnerId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ContextId::generate(),
            owner_id,
            name: name.into(),
            active: true,
            created_at: now,
            last_used_at: now,
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Sub-partition under a context id; the retrieval scope for a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Session {
    pub context_id: ContextId,
    pub session_id: SessionId,
    pub chunk_count: i64,
    pub token_count: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_used_at: Timestamp,
}

impl Session {
    pub fn new(context_id: ContextId, session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            context_id,
            session_id,
            chunk_count: 0,
            token_count: 0,
            created_at: now,
            last_used_at: now,
        }
    }
}

// ============================================================================
// CHUNK
// ============================================================================

/// Immutable unit of stored material.
///
/// A chunk belongs to exactly one (context, session) pair. It is created by
/// the storer and destroyed by retention sweeps, explicit clear, or context
/// deletion - never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Chunk {
    pub id: ChunkId,
    pub role: ChunkRole,
    pub content: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    /// Model identifier of the request that produced this chunk
    pub model: String,
    pub provider_family: ProviderFamily,
    pub token_count: i64,
    /// SHA-256 of the content, for dedup and integrity checks
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    pub content_hash: Option<ContentHash>,
}

// ============================================================================
// USAGE RECORD
// ============================================================================

/// Append-only log entry per billable request.
///
/// `retrieved_tokens` and `ephemeral_tokens` are informational, not billed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UsageRecord {
    pub id: UsageRecordId,
    pub owner_id: OwnerId,
    pub context_id: ContextId,
    pub request_id: RequestId,
    pub stored_input_tokens: i64,
    pub stored_output_tokens: i64,
    pub retrieved_tokens: i64,
    pub ephemeral_tokens: i64,
    pub model: String,
    pub provider_family: ProviderFamily,
    /// Cost in the billing currency, derived from the quota config
    pub cost: f64,
    /// Set when storage failed after the response completed; the request
    /// was served but its stored counts are partial
    pub storage_deferred: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

// ============================================================================
// PROVIDER CREDENTIAL
// ============================================================================

/// Per-owner, per-family provider credential.
///
/// The credential string is opaque ciphertext; encryption at rest belongs
/// to an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProviderCredential {
    pub owner_id: OwnerId,
    pub family: ProviderFamily,
    /// Opaque credential, never logged
    #[serde(skip_serializing)]
    pub ciphertext: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_used_at: Option<Timestamp>,
}

// ============================================================================
// SUBSCRIPTION EVENT
// ============================================================================

/// An external subscription/payment event row.
///
/// At most one successful processing per event id; failed events keep
/// their error string and stay unprocessed so the source may retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubscriptionEvent {
    /// Opaque identifier assigned by the external system
    pub event_id: String,
    pub event_type: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub processed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub received_at: Timestamp,
}

impl SubscriptionEvent {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            payload,
            processed: false,
            processed_at: None,
            error: None,
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
