//! MNEME Configuration Module
//!
//! Configuration is loaded from environment variables with sensible
//! defaults for development. Every tunable named in the request pipeline
//! (window thresholds, oversample factor, score floor, deadlines, free
//! allowance) lives here so admission, billing, and the engine all read
//! the same values.

use crate::TemporalWindow;
use std::time::Duration;

// ============================================================================
// TEMPORAL WINDOWS
// ============================================================================

/// One window in a temporal configuration: the window label and its
/// exclusive upper age bound. `None` means unbounded (the last window
/// of the standard shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub window: TemporalWindow,
    pub upper: Option<Duration>,
}

/// Ordered set of temporal windows.
///
/// Two shapes ship by default; both are accepted anywhere a window
/// configuration is taken. Classification is derived purely from
/// (now - created_at), so chunks never mutate as they age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    specs: Vec<WindowSpec>,
}

impl WindowConfig {
    /// Standard four-window shape:
    /// HOT [0, 15 min), WORKING [15 min, 4 h), LONG_TERM [4 h, 3 d),
    /// ARCHIVE [3 d, inf).
    pub fn standard() -> Self {
        Self {
            specs: vec![
                WindowSpec {
                    window: TemporalWindow::Hot,
                    upper: Some(Duration::from_secs(15 * 60)),
                },
                WindowSpec {
                    window: TemporalWindow::Working,
                    upper: Some(Duration::from_secs(4 * 3600)),
                },
                WindowSpec {
                    window: TemporalWindow::LongTerm,
                    upper: Some(Duration::from_secs(3 * 24 * 3600)),
                },
                WindowSpec {
                    window: TemporalWindow::Archive,
                    upper: None,
                },
            ],
        }
    }

    /// Extended three-window shape for larger deployments:
    /// HOT [0, 4 h), WORKING [4 h, 3 d), LONG_TERM [3 d, 90 d);
    /// chunks older than 90 days fall outside every window.
    pub fn extended() -> Self {
        Self {
            specs: vec![
                WindowSpec {
                    window: TemporalWindow::Hot,
                    upper: Some(Duration::from_secs(4 * 3600)),
                },
                WindowSpec {
                    window: TemporalWindow::Working,
                    upper: Some(Duration::from_secs(3 * 24 * 3600)),
                },
                WindowSpec {
                    window: TemporalWindow::LongTerm,
                    upper: Some(Duration::from_secs(90 * 24 * 3600)),
                },
            ],
        }
    }

    /// Build from explicit specs. Specs must be in ascending bound order;
    /// at most the last may be unbounded.
    pub fn custom(specs: Vec<WindowSpec>) -> Option<Self> {
        if specs.is_empty() {
            return None;
        }
        let mut prev: Option<Duration> = None;
        for (i, spec) in specs.iter().enumerate() {
            match (spec.upper, prev) {
                (None, _) if i + 1 != specs.len() => return None,
                (Some(upper), Some(p)) if upper <= p => return None,
                (Some(upper), _) => prev = Some(upper),
                (None, _) => {}
            }
        }
        Some(Self { specs })
    }

    /// Number of configured windows.
    pub fn count(&self) -> usize {
        self.specs.len()
    }

    /// The configured windows, in age order.
    pub fn windows(&self) -> impl Iterator<Item = TemporalWindow> + '_ {
        self.specs.iter().map(|s| s.window)
    }

    /// Classify an age into a window, or None if the age falls past the
    /// last bounded window.
    pub fn classify(&self, age: Duration) -> Option<TemporalWindow> {
        for spec in &self.specs {
            match spec.upper {
                Some(upper) if age < upper => return Some(spec.window),
                None => return Some(spec.window),
                _ => {}
            }
        }
        None
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Retrieval engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Temporal window shape
    pub windows: WindowConfig,
    /// Candidate oversample factor applied to the retrieve limit (>= 2)
    pub oversample: usize,
    /// Minimum effective score; lower entries are dropped unless that
    /// would empty a non-empty candidate set
    pub score_floor: f32,
    /// e-folding time of the recency decay, in hours
    pub decay_hours: f32,
    /// Wall-clock budget for a retrieve call, embedding included;
    /// overruns degrade to an empty preamble
    pub budget: Duration,
    /// Default retrieve cap when the caller sends no context limit
    pub default_limit: usize,
    /// Hard ceiling on caller-supplied context limits
    pub max_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            windows: WindowConfig::standard(),
            oversample: 2,
            score_floor: 0.1,
            decay_hours: 24.0,
            budget: Duration::from_millis(500),
            default_limit: 12,
            max_limit: 64,
        }
    }
}

// ============================================================================
// STORER
// ============================================================================

/// Storer configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Soft chunk size in estimated tokens; longer text is split at
    /// paragraph, then sentence, then hard boundaries
    pub soft_limit_tokens: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            soft_limit_tokens: 4_000,
        }
    }
}

// ============================================================================
// QUOTA
// ============================================================================

/// Quota and billing configuration.
///
/// The single source for the free allowance and the unit price: both the
/// admission gate and the billing overview read this struct.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Free-tier allowance in memory tokens
    pub free_allowance_tokens: i64,
    /// Price per million billable memory tokens, in USD
    pub price_per_million: f64,
    /// How long a GRACE owner may recover before suspension
    pub grace_window: Duration,
    /// Interval between usage-reporter sweeps
    pub report_interval: Duration,
}

impl QuotaConfig {
    /// Cost of a billable token count under this config.
    pub fn cost_of(&self, tokens: i64) -> f64 {
        tokens.max(0) as f64 / 1_000_000.0 * self.price_per_million
    }

    /// External billing units for a token count: ceil(tokens / 1e6),
    /// rounding up so usage is never under-reported.
    pub fn billing_units(&self, tokens: i64) -> i64 {
        if tokens <= 0 {
            0
        } else {
            (tokens + 999_999) / 1_000_000
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_allowance_tokens: 1_000_000,
            price_per_million: 0.20,
            grace_window: Duration::from_secs(72 * 3600),
            report_interval: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// CAPTURE TEE
// ============================================================================

/// Capture tee configuration.
#[derive(Debug, Clone)]
pub struct TeeConfig {
    /// Bound on bytes buffered for the capture branch before capture is
    /// abandoned; the client branch is never throttled by capture
    pub capture_buffer_bytes: usize,
    /// Channel capacity, in frames, for both branches
    pub channel_capacity: usize,
    /// Grace window for the capture branch after client disconnect
    pub disconnect_grace: Duration,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            capture_buffer_bytes: 256 * 1024,
            channel_capacity: 64,
            disconnect_grace: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// DEADLINES
// ============================================================================

/// Wall-clock deadlines for the request pipeline.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Provider call deadline
    pub provider_deadline: Duration,
    /// Deadline for the off-path store + meter step; retried once
    pub persist_deadline: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_deadline: Duration::from_secs(120),
            persist_deadline: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// RETENTION
// ============================================================================

/// Retention sweep configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Interval between sweeps
    pub interval: Duration,
    /// Maximum chunk age; None disables the sweep
    pub horizon: Option<Duration>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            horizon: None,
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Complete MNEME configuration.
#[derive(Debug, Clone, Default)]
pub struct MnemeConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub quota: QuotaConfig,
    pub tee: TeeConfig,
    pub timeouts: TimeoutConfig,
    pub retention: RetentionConfig,
}

impl MnemeConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MNEME_WINDOW_SHAPE`: "standard" or "extended" (default: standard)
    /// - `MNEME_OVERSAMPLE`: candidate oversample factor (default: 2, min 2)
    /// - `MNEME_SCORE_FLOOR`: minimum effective score (default: 0.1)
    /// - `MNEME_ENGINE_BUDGET_MS`: retrieve budget (default: 500)
    /// - `MNEME_CONTEXT_LIMIT`: default retrieve cap (default: 12)
    /// - `MNEME_CHUNK_SOFT_LIMIT`: storer split threshold (default: 4000)
    /// - `MNEME_FREE_ALLOWANCE`: free-tier tokens (default: 1000000)
    /// - `MNEME_PRICE_PER_MILLION`: USD per million tokens (default: 0.20)
    /// - `MNEME_GRACE_HOURS`: grace window (default: 72)
    /// - `MNEME_REPORT_INTERVAL_SECS`: reporter interval (default: 60)
    /// - `MNEME_CAPTURE_BUFFER_BYTES`: tee capture bound (default: 262144)
    /// - `MNEME_DISCONNECT_GRACE_MS`: capture grace (default: 2000)
    /// - `MNEME_PROVIDER_DEADLINE_SECS`: provider deadline (default: 120)
    /// - `MNEME_PERSIST_DEADLINE_SECS`: store/meter deadline (default: 10)
    /// - `MNEME_RETENTION_HORIZON_DAYS`: sweep horizon (default: disabled)
    /// - `MNEME_RETENTION_INTERVAL_SECS`: sweep interval (default: 3600)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(shape) = std::env::var("MNEME_WINDOW_SHAPE") {
            if shape.eq_ignore_ascii_case("extended") {
                config.engine.windows = WindowConfig::extended();
            }
        }
        if let Some(v) = env_parse::<usize>("MNEME_OVERSAMPLE") {
            config.engine.oversample = v.max(2);
        }
        if let Some(v) = env_parse::<f32>("MNEME_SCORE_FLOOR") {
            config.engine.score_floor = v;
        }
        if let Some(v) = env_parse::<u64>("MNEME_ENGINE_BUDGET_MS") {
            config.engine.budget = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("MNEME_CONTEXT_LIMIT") {
            config.engine.default_limit = v;
        }
        if let Some(v) = env_parse::<i64>("MNEME_CHUNK_SOFT_LIMIT") {
            config.store.soft_limit_tokens = v;
        }
        if let Some(v) = env_parse::<i64>("MNEME_FREE_ALLOWANCE") {
            config.quota.free_allowance_tokens = v;
        }
        if let Some(v) = env_parse::<f64>("MNEME_PRICE_PER_MILLION") {
            config.quota.price_per_million = v;
        }
        if let Some(v) = env_parse::<u64>("MNEME_GRACE_HOURS") {
            config.quota.grace_window = Duration::from_secs(v * 3600);
        }
        if let Some(v) = env_parse::<u64>("MNEME_REPORT_INTERVAL_SECS") {
            config.quota.report_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("MNEME_CAPTURE_BUFFER_BYTES") {
            config.tee.capture_buffer_bytes = v;
        }
        if let Some(v) = env_parse::<u64>("MNEME_DISCONNECT_GRACE_MS") {
            config.tee.disconnect_grace = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("MNEME_PROVIDER_DEADLINE_SECS") {
            config.timeouts.provider_deadline = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("MNEME_PERSIST_DEADLINE_SECS") {
            config.timeouts.persist_deadline = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("MNEME_RETENTION_HORIZON_DAYS") {
            config.retention.horizon = Some(Duration::from_secs(v * 24 * 3600));
        }
        if let Some(v) = env_parse::<u64>("MNEME_RETENTION_INTERVAL_SECS") {
            config.retention.interval = Duration::from_secs(v);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// TESTS
// ============================================================================
