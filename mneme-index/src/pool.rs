//! Bounded adapter pool
//!
//! Maps context ids to live index handles with LRU eviction. Concurrent
//! lookups for the same context coalesce into a single initialisation:
//! one caller runs the factory, the rest await the same cell.

use crate::VectorIndex;
use async_trait::async_trait;
use mneme_core::{ContextId, MnemeResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// A live adapter handle for one context.
pub type IndexHandle = Arc<dyn VectorIndex>;

/// Factory producing an adapter handle for a context.
#[async_trait]
pub trait IndexFactory: Send + Sync {
    async fn open(&self, ctx: &ContextId) -> MnemeResult<IndexHandle>;
}

#[async_trait]
impl<F, Fut> IndexFactory for F
where
    F: Fn(ContextId) -> Fut + Send + Sync,
    Fut: Future<Output = MnemeResult<IndexHandle>> + Send,
{
    async fn open(&self, ctx: &ContextId) -> MnemeResult<IndexHandle> {
        self(ctx.clone()).await
    }
}

type Slot = Arc<OnceCell<IndexHandle>>;

struct PoolInner {
    slots: HashMap<ContextId, Slot>,
    /// Recency order, least-recent first
    order: Vec<ContextId>,
}

/// Bounded ctx -> handle pool with LRU eviction and single-flight init.
///
/// Evicting a slot drops the pool's reference only; in-flight requests
/// holding the handle keep it alive until they finish.
pub struct IndexPool {
    capacity: usize,
    factory: Arc<dyn IndexFactory>,
    inner: Mutex<PoolInner>,
}

impl IndexPool {
    pub fn new(capacity: usize, factory: Arc<dyn IndexFactory>) -> Self {
        Self {
            capacity: capacity.max(1),
            factory,
            inner: Mutex::new(PoolInner {
                slots: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Get the handle for a context, initialising it if needed.
    pub async fn get(&self, ctx: &ContextId) -> MnemeResult<IndexHandle> {
        let slot = {
            let mut inner = self.inner.lock().await;
            if let Some(slot) = inner.slots.get(ctx).cloned() {
                touch(&mut inner.order, ctx);
                slot
            } else {
                let slot: Slot = Arc::new(OnceCell::new());
                inner.slots.insert(ctx.clone(), slot.clone());
                inner.order.push(ctx.clone());
                while inner.order.len() > self.capacity {
                    let evicted = inner.order.remove(0);
                    inner.slots.remove(&evicted);
                    tracing::debug!(context = %evicted, "Evicted index handle from pool");
                }
                slot
            }
        };

        let handle = slot
            .get_or_try_init(|| self.factory.open(ctx))
            .await?
            .clone();
        Ok(handle)
    }

    /// Drop a context's handle, e.g. after context deletion.
    pub async fn invalidate(&self, ctx: &ContextId) {
        let mut inner = self.inner.lock().await;
        inner.slots.remove(ctx);
        inner.order.retain(|c| c != ctx);
    }

    /// Number of resident handles.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every resident handle. Called at teardown.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.slots.clear();
        inner.order.clear();
    }
}

fn touch(order: &mut Vec<ContextId>, ctx: &ContextId) {
    if let Some(pos) = order.iter().position(|c| c == ctx) {
        let entry = order.remove(pos);
        order.push(entry);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlatIndex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_factory(counter: Arc<AtomicUsize>) -> Arc<dyn IndexFactory> {
        Arc::new(move |_ctx: ContextId| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Simulate slow adapter initialisation
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok::<_, mneme_core::MnemeError>(Arc::new(FlatIndex::new()) as IndexHandle)
            }
        })
    }

    #[tokio::test]
    async fn test_concurrent_lookups_coalesce_init() {
        let inits = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(IndexPool::new(8, counting_factory(inits.clone())));
        let ctx = ContextId::generate();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move { pool.get(&ctx).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_capacity() {
        let inits = Arc::new(AtomicUsize::new(0));
        let pool = IndexPool::new(2, counting_factory(inits.clone()));

        let a = ContextId::generate();
        let b = ContextId::generate();
        let c = ContextId::generate();

        pool.get(&a).await.unwrap();
        pool.get(&b).await.unwrap();
        // Touch a so b becomes least-recent
        pool.get(&a).await.unwrap();
        pool.get(&c).await.unwrap();

        assert_eq!(pool.len().await, 2);
        assert_eq!(inits.load(Ordering::SeqCst), 3);

        // b was evicted; fetching it initialises again
        pool.get(&b).await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_invalidate_removes_handle() {
        let inits = Arc::new(AtomicUsize::new(0));
        let pool = IndexPool::new(4, counting_factory(inits.clone()));
        let ctx = ContextId::generate();

        pool.get(&ctx).await.unwrap();
        pool.invalidate(&ctx).await;
        assert!(pool.is_empty().await);

        pool.get(&ctx).await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }
}
