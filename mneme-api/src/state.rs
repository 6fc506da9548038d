//! Shared application state for Axum routers.
//!
//! The process-wide singletons (embedding cache, adapter pool, credential
//! registry) are explicit infrastructure constructed once here and passed
//! into the orchestrator - never implicit globals - so any test can build
//! a private state.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use mneme_core::{ContextId, MnemeConfig};
use mneme_engine::{EmbeddingCache, RetrievalEngine, Storer};
use mneme_index::{FlatIndex, IndexHandle, IndexPool};
use mneme_llm::{EmbeddingProvider, HashEmbedder, OpenAiEmbeddingProvider, ProviderClient};

use crate::config::{ApiConfig, EmbedderKind};
use crate::error::{ApiError, ApiResult};
use crate::quota::QuotaService;
use crate::registry::Registry;

// ============================================================================
// RATE LIMITER
// ============================================================================

type KeyedLimiter = RateLimiter<ContextId, DefaultKeyedStateStore<ContextId>, DefaultClock>;

/// Per-context-id request rate limiter.
pub struct ContextRateLimiter {
    limiter: Option<KeyedLimiter>,
}

impl ContextRateLimiter {
    pub fn new(enabled: bool, per_minute: u32) -> Self {
        let limiter = if enabled {
            NonZeroU32::new(per_minute.max(1)).map(|rate| RateLimiter::keyed(Quota::per_minute(rate)))
        } else {
            None
        };
        Self { limiter }
    }

    /// Check the rate for one context id.
    pub fn check(&self, ctx: &ContextId) -> ApiResult<()> {
        match &self.limiter {
            Some(limiter) => limiter
                .check_key(ctx)
                .map_err(|_| ApiError::quota_exceeded(None)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// APP STATE
// ============================================================================

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub pool: Arc<IndexPool>,
    pub engine: Arc<RetrievalEngine>,
    pub storer: Arc<Storer>,
    pub embed_cache: Arc<EmbeddingCache>,
    pub provider_client: ProviderClient,
    pub quota: Arc<QuotaService>,
    pub config: Arc<MnemeConfig>,
    pub api_config: Arc<ApiConfig>,
    pub limiter: Arc<ContextRateLimiter>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the full state graph from configuration.
    pub fn build(api_config: ApiConfig, config: MnemeConfig) -> ApiResult<Self> {
        let registry = Arc::new(Registry::new());

        let embedder: Arc<dyn EmbeddingProvider> = match &api_config.embedder {
            EmbedderKind::OpenAi { api_key } => {
                Arc::new(OpenAiEmbeddingProvider::with_default_model(api_key.clone()))
            }
            EmbedderKind::Hash => Arc::new(HashEmbedder::new(api_config.embed_dimensions)),
        };

        let embed_cache = Arc::new(EmbeddingCache::new(embedder, api_config.embed_cache_ttl));

        // One exact index shared by every context; namespacing is keyed
        // by context id inside it. The pool still coalesces handle
        // initialisation and bounds residency per the adapter contract.
        let flat = Arc::new(FlatIndex::new());
        let pool_flat = flat.clone();
        let pool = Arc::new(IndexPool::new(
            api_config.pool_capacity,
            Arc::new(move |_ctx: ContextId| {
                let handle: IndexHandle = pool_flat.clone();
                async move { Ok::<_, mneme_core::MnemeError>(handle) }
            }),
        ));

        let engine = Arc::new(RetrievalEngine::new(
            embed_cache.clone(),
            config.engine.clone(),
        ));
        let storer = Arc::new(Storer::new(embed_cache.clone(), config.store.clone()));
        let provider_client = ProviderClient::new(config.timeouts.provider_deadline)
            .map_err(|e| ApiError::internal_error(format!("Failed to build HTTP client: {}", e)))?;
        let quota = Arc::new(QuotaService::new(registry.clone(), config.quota.clone()));
        let limiter = Arc::new(ContextRateLimiter::new(
            api_config.rate_limit_enabled,
            api_config.rate_limit_per_minute,
        ));

        Ok(Self {
            registry,
            pool,
            engine,
            storer,
            embed_cache,
            provider_client,
            quota,
            config: Arc::new(config),
            api_config: Arc::new(api_config),
            limiter,
            start_time: Instant::now(),
        })
    }

    /// Teardown: flush and close the adapter pool.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Arc<Registry>, registry);
crate::impl_from_ref!(Arc<IndexPool>, pool);
crate::impl_from_ref!(Arc<QuotaService>, quota);
crate::impl_from_ref!(Arc<ContextRateLimiter>, limiter);
