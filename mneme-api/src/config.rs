//! API Configuration Module
//!
//! Surface-level configuration: bind address, CORS, per-context rate
//! limiting, the events-intake secret, and the embedding backend.
//! Loaded from environment variables with development defaults; the
//! pipeline tunables live in [`mneme_core::MnemeConfig`].

use std::time::Duration;

/// Which embedding backend to construct at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderKind {
    /// OpenAI text-embedding-3-small (requires an API key)
    OpenAi { api_key: String },
    /// Deterministic local embedder; tests and keyless development
    Hash,
}

/// API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,

    /// Allowed CORS origins (empty = allow all, dev mode)
    pub cors_origins: Vec<String>,

    /// Whether per-context rate limiting is enabled
    pub rate_limit_enabled: bool,
    /// Inference requests per minute per context id
    pub rate_limit_per_minute: u32,

    /// Shared secret for the subscription-events signature.
    /// Intake rejects all events when unset.
    pub events_secret: Option<String>,

    /// Embedding backend
    pub embedder: EmbedderKind,
    /// Embedding dimensions (hash backend; OpenAI fixes its own)
    pub embed_dimensions: i32,
    /// Embedding cache TTL
    pub embed_cache_ttl: Duration,

    /// Adapter pool capacity (live context handles)
    pub pool_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            rate_limit_enabled: true,
            rate_limit_per_minute: 300,
            events_secret: None,
            embedder: EmbedderKind::Hash,
            embed_dimensions: 256,
            embed_cache_ttl: Duration::from_secs(3600),
            pool_capacity: 1024,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MNEME_API_BIND`: bind host (default: 0.0.0.0)
    /// - `PORT` / `MNEME_API_PORT`: bind port (default: 8080)
    /// - `MNEME_CORS_ORIGINS`: comma-separated origins (empty = allow all)
    /// - `MNEME_RATE_LIMIT_ENABLED`: "true"/"false" (default: true)
    /// - `MNEME_RATE_LIMIT_PER_MINUTE`: per-context rate (default: 300)
    /// - `MNEME_EVENTS_SECRET`: events signature secret (no default)
    /// - `MNEME_EMBEDDER`: "openai" or "hash" (default: openai when a key
    ///   is present, else hash)
    /// - `OPENAI_API_KEY`: embedding key for the openai backend
    /// - `MNEME_EMBED_DIMENSIONS`: hash-backend dimensions (default: 256)
    /// - `MNEME_EMBED_CACHE_TTL_SECS`: cache TTL (default: 3600)
    /// - `MNEME_POOL_CAPACITY`: adapter pool capacity (default: 1024)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MNEME_API_BIND") {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("MNEME_API_PORT").ok())
            .and_then(|s| s.parse().ok())
        {
            config.port = port;
        }
        if let Ok(origins) = std::env::var("MNEME_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Ok(enabled) = std::env::var("MNEME_RATE_LIMIT_ENABLED") {
            config.rate_limit_enabled = enabled.to_lowercase() != "false";
        }
        if let Some(rate) = std::env::var("MNEME_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.rate_limit_per_minute = rate;
        }
        config.events_secret = std::env::var("MNEME_EVENTS_SECRET").ok();

        let openai_key = std::env::var("OPENAI_API_KEY").ok();
        let embedder_choice = std::env::var("MNEME_EMBEDDER").unwrap_or_default();
        config.embedder = match (embedder_choice.as_str(), openai_key) {
            ("hash", _) | ("", None) => EmbedderKind::Hash,
            (_, Some(api_key)) => EmbedderKind::OpenAi { api_key },
            ("openai", None) => {
                tracing::warn!(
                    "MNEME_EMBEDDER=openai but OPENAI_API_KEY is unset; using hash embedder"
                );
                EmbedderKind::Hash
            }
            _ => EmbedderKind::Hash,
        };

        if let Some(dims) = std::env::var("MNEME_EMBED_DIMENSIONS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.embed_dimensions = dims;
        }
        if let Some(ttl) = std::env::var("MNEME_EMBED_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.embed_cache_ttl = Duration::from_secs(ttl);
        }
        if let Some(capacity) = std::env::var("MNEME_POOL_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.pool_capacity = capacity;
        }

        config
    }
}
