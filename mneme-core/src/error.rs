//! Error types for MNEME operations

use crate::ProviderFamily;
use thiserror::Error;

/// Vector operation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },
}

/// Index adapter errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    #[error("Namespace not found for context {context}")]
    NamespaceNotFound { context: String },

    #[error("Insert failed: {reason}")]
    InsertFailed { reason: String },

    #[error("Search failed: {reason}")]
    SearchFailed { reason: String },

    #[error("Index lock poisoned")]
    LockPoisoned,
}

/// Retrieval engine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Embedding failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("Retrieval budget of {budget_ms}ms exceeded")]
    BudgetExceeded { budget_ms: u64 },
}

/// Upstream provider errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("No {family} credential configured for this owner")]
    MissingCredential { family: ProviderFamily },

    #[error("Request to {family} failed with status {status}")]
    RequestFailed {
        family: ProviderFamily,
        status: u16,
        /// Provider-assigned error body, passed through verbatim.
        body: String,
    },

    #[error("Provider {family} unreachable: {reason}")]
    Unreachable {
        family: ProviderFamily,
        reason: String,
    },

    #[error("Provider {family} missed the wall-clock deadline")]
    DeadlineExceeded { family: ProviderFamily },

    #[error("Malformed stream from {family}: {reason}")]
    MalformedStream {
        family: ProviderFamily,
        reason: String,
    },
}

/// Quota and admission errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QuotaError {
    #[error("Free tier exhausted: {used} of {allowance} tokens used")]
    FreeTierExhausted { used: i64, allowance: i64 },

    #[error("Account suspended")]
    AccountSuspended,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unsupported message role: {role}")]
    UnsupportedRole { role: String },
}

/// Subscription-event intake errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EventError {
    #[error("Event signature verification failed")]
    SignatureInvalid,

    #[error("Event timestamp outside the accepted skew window ({skew_secs}s)")]
    TimestampSkew { skew_secs: i64 },

    #[error("Malformed event payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Handler for event {event_id} failed: {reason}")]
    HandlerFailed { event_id: String, reason: String },
}

/// Master error type for all MNEME errors.
#[derive(Debug, Clone, Error)]
pub enum MnemeError {
    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

/// Result type alias for MNEME operations.
pub type MnemeResult<T> = Result<T, MnemeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_into_master() {
        let err: MnemeError = IndexError::LockPoisoned.into();
        assert!(matches!(err, MnemeError::Index(IndexError::LockPoisoned)));

        let err: MnemeError = QuotaError::AccountSuspended.into();
        assert!(matches!(
            err,
            MnemeError::Quota(QuotaError::AccountSuspended)
        ));
    }

    #[test]
    fn test_provider_error_display_names_family() {
        let err = ProviderError::MissingCredential {
            family: ProviderFamily::Anthropic,
        };
        assert!(err.to_string().contains("anthropic"));
    }
}
