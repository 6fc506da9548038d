//! Error Types for the MNEME API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! Upstream provider errors are NOT represented here: the orchestrator
//! passes provider status and body through verbatim.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mneme_core::{EngineError, EventError, MnemeError, ProviderError, QuotaError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code. Codes serialize
/// in SCREAMING_SNAKE_CASE; `FREE_TIER_EXHAUSTED`, `ACCOUNT_SUSPENDED`,
/// and `PROVIDER_KEY_MISSING` are part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request lacks a valid context id
    Unauthorized,

    /// Context id is malformed
    InvalidToken,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field format is incorrect
    InvalidFormat,

    /// Message role is not supported
    UnsupportedRole,

    /// Event signature verification failed
    InvalidSignature,

    // ========================================================================
    // Payment Errors (402)
    // ========================================================================
    /// Free allowance exhausted and no payment instrument attached
    FreeTierExhausted,

    /// Account suspended after an unrecovered payment failure
    AccountSuspended,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    /// Requested memory context does not exist
    ContextNotFound,

    /// Requested session does not exist
    SessionNotFound,

    /// Requested owner does not exist
    OwnerNotFound,

    // ========================================================================
    // Method Errors (405)
    // ========================================================================
    /// HTTP method not allowed on this path
    MethodNotAllowed,

    // ========================================================================
    // Credential Errors (422)
    // ========================================================================
    /// The resolved provider family has no credential for this owner
    ProviderKeyMissing,

    // ========================================================================
    // Rate Errors (429)
    // ========================================================================
    /// Request rate limit exceeded
    QuotaExceeded,

    // ========================================================================
    // Upstream Errors (502, 504)
    // ========================================================================
    /// Provider could not be reached
    ProviderUnreachable,

    /// Provider (or the engine) missed its deadline
    ProviderTimeout,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidFormat
            | ErrorCode::UnsupportedRole
            | ErrorCode::InvalidSignature => StatusCode::BAD_REQUEST,

            ErrorCode::FreeTierExhausted | ErrorCode::AccountSuspended => {
                StatusCode::PAYMENT_REQUIRED
            }

            ErrorCode::EntityNotFound
            | ErrorCode::ContextNotFound
            | ErrorCode::SessionNotFound
            | ErrorCode::OwnerNotFound => StatusCode::NOT_FOUND,

            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            ErrorCode::ProviderKeyMissing => StatusCode::UNPROCESSABLE_ENTITY,

            ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::ProviderUnreachable => StatusCode::BAD_GATEWAY,
            ErrorCode::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::InvalidToken => "Invalid context id",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::UnsupportedRole => "Unsupported message role",
            ErrorCode::InvalidSignature => "Event signature verification failed",
            ErrorCode::FreeTierExhausted => "Free tier exhausted",
            ErrorCode::AccountSuspended => "Account suspended",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::ContextNotFound => "Memory context not found",
            ErrorCode::SessionNotFound => "Session not found",
            ErrorCode::OwnerNotFound => "Owner not found",
            ErrorCode::MethodNotAllowed => "Method not allowed",
            ErrorCode::ProviderKeyMissing => "No provider credential for this model family",
            ErrorCode::QuotaExceeded => "Rate limit exceeded",
            ErrorCode::ProviderUnreachable => "Provider unreachable",
            ErrorCode::ProviderTimeout => "Provider deadline exceeded",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn unsupported_role(role: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedRole,
            format!("Message role '{}' is not supported", role),
        )
    }

    pub fn free_tier_exhausted(used: i64, allowance: i64) -> Self {
        Self::new(
            ErrorCode::FreeTierExhausted,
            format!(
                "Free tier exhausted: {} of {} tokens used. Attach a payment method to continue.",
                used, allowance
            ),
        )
    }

    pub fn account_suspended() -> Self {
        Self::new(
            ErrorCode::AccountSuspended,
            "Account suspended after an unrecovered payment failure. Update your payment method to continue.",
        )
    }

    pub fn context_not_found(context_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ContextNotFound,
            format!("Memory context {} not found", context_id),
        )
    }

    pub fn session_not_found(session_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SessionNotFound,
            format!("Session {} not found", session_id),
        )
    }

    pub fn owner_not_found(owner_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OwnerNotFound,
            format!("Owner {} not found", owner_id),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn provider_key_missing(family: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ProviderKeyMissing,
            format!("No {} credential configured for this owner", family),
        )
    }

    pub fn quota_exceeded(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Rate limit exceeded. Retry after {} seconds", secs),
            None => "Rate limit exceeded".to_string(),
        };
        Self::new(ErrorCode::QuotaExceeded, message)
    }

    pub fn provider_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderUnreachable, message)
    }

    pub fn provider_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderTimeout, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn invalid_signature() -> Self {
        Self::from_code(ErrorCode::InvalidSignature)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Implement IntoResponse for ApiError to enable automatic error handling
/// in Axum handlers.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<MnemeError> for ApiError {
    fn from(err: MnemeError) -> Self {
        match err {
            MnemeError::Quota(QuotaError::FreeTierExhausted { used, allowance }) => {
                ApiError::free_tier_exhausted(used, allowance)
            }
            MnemeError::Quota(QuotaError::AccountSuspended) => ApiError::account_suspended(),
            MnemeError::Quota(QuotaError::RateLimited { retry_after_secs }) => {
                ApiError::quota_exceeded(retry_after_secs)
            }
            MnemeError::Provider(ProviderError::MissingCredential { family }) => {
                ApiError::provider_key_missing(family)
            }
            MnemeError::Provider(ProviderError::DeadlineExceeded { family }) => {
                ApiError::provider_timeout(format!("Provider {} missed its deadline", family))
            }
            MnemeError::Provider(ProviderError::Unreachable { family, reason }) => {
                ApiError::provider_unreachable(format!(
                    "Provider {} unreachable: {}",
                    family, reason
                ))
            }
            MnemeError::Provider(ProviderError::RequestFailed { family, status, .. }) => {
                // Normally passed through verbatim by the orchestrator;
                // this fallback covers non-inference paths.
                ApiError::internal_error(format!(
                    "Provider {} returned status {}",
                    family, status
                ))
            }
            MnemeError::Provider(ProviderError::MalformedStream { family, reason }) => {
                ApiError::internal_error(format!("Malformed {} stream: {}", family, reason))
            }
            MnemeError::Validation(ValidationError::RequiredFieldMissing { field }) => {
                ApiError::missing_field(&field)
            }
            MnemeError::Validation(ValidationError::InvalidValue { field, reason }) => {
                ApiError::invalid_input(format!("Invalid value for {}: {}", field, reason))
            }
            MnemeError::Validation(ValidationError::UnsupportedRole { role }) => {
                ApiError::unsupported_role(&role)
            }
            MnemeError::Engine(EngineError::BudgetExceeded { budget_ms }) => {
                ApiError::provider_timeout(format!("Engine budget of {}ms exceeded", budget_ms))
            }
            MnemeError::Event(EventError::SignatureInvalid)
            | MnemeError::Event(EventError::TimestampSkew { .. }) => ApiError::invalid_signature(),
            other => {
                tracing::error!(error = %other, "Unmapped internal error");
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
