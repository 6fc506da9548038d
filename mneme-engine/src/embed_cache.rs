//! Embedding cache
//!
//! Fingerprint -> unit vector with TTL and in-flight coalescing.
//! Concurrent requests for the same fingerprint issue a single upstream
//! embedding call and share the result; the coalescing is a correctness
//! requirement, not just an optimisation, to avoid stampedes on hot
//! queries.

use dashmap::DashMap;
use mneme_core::{compute_content_hash, ContentHash, EmbeddingVector, MnemeResult};
use mneme_llm::EmbeddingProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

#[derive(Clone)]
struct Slot {
    cell: Arc<OnceCell<EmbeddingVector>>,
    inserted_at: Instant,
}

/// Process-wide embedding cache.
///
/// Constructed once and passed into the orchestrator explicitly; any test
/// may construct a private one.
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    ttl: Duration,
    slots: DashMap<ContentHash, Slot>,
    upstream_calls: AtomicU64,
    hits: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            slots: DashMap::new(),
            upstream_calls: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Embed text through the cache.
    ///
    /// Identical content always maps to the same fingerprint (SHA-256 of
    /// the text), so no invalidation is ever needed on store.
    pub async fn embed(&self, text: &str) -> MnemeResult<EmbeddingVector> {
        let fingerprint = compute_content_hash(text.as_bytes());

        let slot = {
            let entry = self.slots.entry(fingerprint).or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                inserted_at: Instant::now(),
            });
            let slot = entry.value().clone();
            drop(entry);

            // Replace expired slots; an in-flight fill is never expired
            // because inserted_at is set at slot creation.
            if slot.cell.initialized() && slot.inserted_at.elapsed() >= self.ttl {
                let fresh = Slot {
                    cell: Arc::new(OnceCell::new()),
                    inserted_at: Instant::now(),
                };
                self.slots.insert(fingerprint, fresh.clone());
                fresh
            } else {
                slot
            }
        };

        if slot.cell.initialized() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        let vector = slot
            .cell
            .get_or_try_init(|| async {
                self.upstream_calls.fetch_add(1, Ordering::Relaxed);
                self.provider.embed(text).await
            })
            .await?;

        Ok(vector.clone())
    }

    /// Embedding dimensions of the backing provider.
    pub fn dimensions(&self) -> i32 {
        self.provider.dimensions()
    }

    /// Number of upstream embedding calls issued so far.
    pub fn upstream_calls(&self) -> u64 {
        self.upstream_calls.load(Ordering::Relaxed)
    }

    /// Number of cache hits served so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of resident fingerprints.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mneme_core::EngineError;

    /// Counting provider with an optional artificial delay.
    struct SlowProvider {
        calls: AtomicU64,
        delay: Duration,
        fail: bool,
    }

    impl SlowProvider {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU64::new(0),
                delay,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed(&self, text: &str) -> MnemeResult<EmbeddingVector> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(EngineError::EmbeddingFailed {
                    reason: "synthetic".to_string(),
                }
                .into());
            }
            let seed = text.len() as f32 + 1.0;
            Ok(EmbeddingVector::new(vec![seed, 1.0], "slow".to_string()).normalized())
        }

        async fn embed_batch(&self, texts: &[&str]) -> MnemeResult<Vec<EmbeddingVector>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> i32 {
            2
        }

        fn model_id(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_concurrent_embeds_coalesce_to_one_call() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(20)));
        let cache = Arc::new(EmbeddingCache::new(
            provider.clone(),
            Duration::from_secs(60),
        ));

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(
                async move { cache.embed("same text").await },
            ));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.upstream_calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_texts_embed_separately() {
        let provider = Arc::new(SlowProvider::new(Duration::ZERO));
        let cache = EmbeddingCache::new(provider.clone(), Duration::from_secs(60));

        cache.embed("alpha").await.unwrap();
        cache.embed("beta").await.unwrap();
        cache.embed("alpha").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let provider = Arc::new(SlowProvider::new(Duration::ZERO));
        let cache = EmbeddingCache::new(provider.clone(), Duration::from_millis(10));

        cache.embed("short lived").await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.embed("short lived").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fill_does_not_poison_slot() {
        let mut provider = SlowProvider::new(Duration::ZERO);
        provider.fail = true;
        let provider = Arc::new(provider);
        let cache = EmbeddingCache::new(provider.clone(), Duration::from_secs(60));

        assert!(cache.embed("doomed").await.is_err());
        // OnceCell does not cache the failure; a later call retries
        assert!(cache.embed("doomed").await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
