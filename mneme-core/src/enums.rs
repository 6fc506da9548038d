//! Enum types for MNEME entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// BILLING
// ============================================================================

/// Billing state of an Owner.
///
/// Drives the admission gate; see the quota service for the transition
/// table applied by subscription events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    /// No subscription; admission bounded by the free allowance
    #[default]
    Free,
    /// Paying subscriber in good standing
    Active,
    /// Payment failed, dunning not yet started
    PastDue,
    /// Payment failed; admitted with a warning until the grace deadline
    Grace,
    /// Grace elapsed without recovery; all inference denied
    Suspended,
    /// Administratively unmetered
    Enterprise,
}

impl BillingState {
    /// Convert to wire string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingState::Free => "free",
            BillingState::Active => "active",
            BillingState::PastDue => "past_due",
            BillingState::Grace => "grace",
            BillingState::Suspended => "suspended",
            BillingState::Enterprise => "enterprise",
        }
    }

    /// Parse from wire string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "free" => Some(BillingState::Free),
            "active" => Some(BillingState::Active),
            "past_due" => Some(BillingState::PastDue),
            "grace" => Some(BillingState::Grace),
            "suspended" => Some(BillingState::Suspended),
            "enterprise" => Some(BillingState::Enterprise),
            _ => None,
        }
    }
}

impl fmt::Display for BillingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY CONTROL
// ============================================================================

/// Memory mode for a single inference request.
///
/// Parsed once at the request boundary; never carried as a string past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Retrieve and store
    #[default]
    Auto,
    /// Retrieve only
    Read,
    /// Store only
    Write,
    /// Neither
    Off,
}

impl MemoryMode {
    /// Whether this mode retrieves stored material into the preamble.
    pub fn reads(&self) -> bool {
        matches!(self, MemoryMode::Auto | MemoryMode::Read)
    }

    /// Whether this mode persists newly observed material.
    pub fn writes(&self) -> bool {
        matches!(self, MemoryMode::Auto | MemoryMode::Write)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryMode::Auto => "auto",
            MemoryMode::Read => "read",
            MemoryMode::Write => "write",
            MemoryMode::Off => "off",
        }
    }
}

impl FromStr for MemoryMode {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(MemoryMode::Auto),
            "read" => Ok(MemoryMode::Read),
            "write" => Ok(MemoryMode::Write),
            "off" => Ok(MemoryMode::Off),
            _ => Err(EnumParseError {
                enum_name: "MemoryMode",
                input: s.to_string(),
            }),
        }
    }
}

/// Recency bias selecting the decay weight applied to candidate scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum RecencyBias {
    Low,
    #[default]
    Medium,
    High,
}

impl RecencyBias {
    /// Decay weight beta: effective = (1 - beta) + beta * exp(-age_hours / 24).
    pub fn beta(&self) -> f32 {
        match self {
            RecencyBias::Low => 0.1,
            RecencyBias::Medium => 0.3,
            RecencyBias::High => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecencyBias::Low => "low",
            RecencyBias::Medium => "medium",
            RecencyBias::High => "high",
        }
    }
}

impl FromStr for RecencyBias {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RecencyBias::Low),
            "medium" => Ok(RecencyBias::Medium),
            "high" => Ok(RecencyBias::High),
            _ => Err(EnumParseError {
                enum_name: "RecencyBias",
                input: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CHUNKS AND WINDOWS
// ============================================================================

/// Role of a stored chunk. System messages are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChunkRole {
    User,
    Assistant,
}

impl ChunkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkRole::User => "user",
            ChunkRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChunkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived age-based classification of a chunk at query time.
///
/// Never persisted: classification depends only on (now - created_at) and
/// the configured thresholds, so chunks stay immutable as they age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TemporalWindow {
    Hot,
    Working,
    LongTerm,
    Archive,
}

impl TemporalWindow {
    /// Tag rendered into formatted preambles.
    pub fn label(&self) -> &'static str {
        match self {
            TemporalWindow::Hot => "recent",
            TemporalWindow::Working => "working",
            TemporalWindow::LongTerm => "long-term",
            TemporalWindow::Archive => "archive",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalWindow::Hot => "hot",
            TemporalWindow::Working => "working",
            TemporalWindow::LongTerm => "long_term",
            TemporalWindow::Archive => "archive",
        }
    }
}

impl fmt::Display for TemporalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PROVIDERS
// ============================================================================

/// Upstream provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    Openai,
    Anthropic,
    Google,
    Openrouter,
    MetaLlama,
    Mistral,
}

impl ProviderFamily {
    /// All recognised families, in model-prefix matching order.
    pub const ALL: [ProviderFamily; 6] = [
        ProviderFamily::Openai,
        ProviderFamily::Anthropic,
        ProviderFamily::Google,
        ProviderFamily::Openrouter,
        ProviderFamily::MetaLlama,
        ProviderFamily::Mistral,
    ];

    /// The `family/` prefix accepted on model identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Openai => "openai",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Google => "google",
            ProviderFamily::Openrouter => "openrouter",
            ProviderFamily::MetaLlama => "meta-llama",
            ProviderFamily::Mistral => "mistral",
        }
    }

    /// Parse from a `family/` prefix string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderFamily::Openai),
            "anthropic" => Some(ProviderFamily::Anthropic),
            "google" => Some(ProviderFamily::Google),
            "openrouter" => Some(ProviderFamily::Openrouter),
            "meta-llama" => Some(ProviderFamily::MetaLlama),
            "mistral" => Some(ProviderFamily::Mistral),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SUBSCRIPTION EVENTS
// ============================================================================

/// Known subscription-event types from the external billing system.
///
/// Unknown types are preserved verbatim and acknowledged without effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionDeleted,
    PaymentFailed,
    PaymentSucceeded,
    InstrumentAttached,
    InstrumentDetached,
    #[serde(untagged)]
    Unknown(String),
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "subscription_created" => EventKind::SubscriptionCreated,
            "subscription_deleted" => EventKind::SubscriptionDeleted,
            "payment_failed" => EventKind::PaymentFailed,
            "payment_succeeded" => EventKind::PaymentSucceeded,
            "payment_instrument_attached" => EventKind::InstrumentAttached,
            "payment_instrument_detached" => EventKind::InstrumentDetached,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::SubscriptionCreated => "subscription_created",
            EventKind::SubscriptionDeleted => "subscription_deleted",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::PaymentSucceeded => "payment_succeeded",
            EventKind::InstrumentAttached => "payment_instrument_attached",
            EventKind::InstrumentDetached => "payment_instrument_detached",
            EventKind::Unknown(s) => s,
        }
    }
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Error type for enum parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub enum_name: &'static str,
    pub input: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {} value: '{}'", self.enum_name, self.input)
    }
}

impl std::error::Error for EnumParseError {}

// ============================================================================
// TESTS
// ============================================================================
