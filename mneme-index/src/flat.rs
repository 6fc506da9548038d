//! Exact flat vector index
//!
//! Brute-force inner product over L2-normalized vectors, one flat array
//! per context namespace. Suitable up to a few thousand entries per
//! context; larger deployments swap in an approximate implementation of
//! the same contract.

use crate::{IndexItem, SearchFilter, SearchHit, VectorIndex};
use async_trait::async_trait;
use mneme_core::{ChunkId, ContextId, EmbeddingVector, MnemeResult};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process exact index.
///
/// Namespaces are lazily materialized: `ensure` records nothing until the
/// first `add`, so empty contexts cost no storage.
#[derive(Default)]
pub struct FlatIndex {
    namespaces: RwLock<HashMap<ContextId, Vec<IndexItem>>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn ensure(&self, _ctx: &ContextId) -> MnemeResult<()> {
        // Lazy namespaces: creation is free until the first write.
        Ok(())
    }

    async fn add(&self, ctx: &ContextId, mut item: IndexItem) -> MnemeResult<()> {
        item.vector.normalize();
        let mut namespaces = self.namespaces.write().await;
        namespaces.entry(ctx.clone()).or_default().push(item);
        Ok(())
    }

    async fn search(
        &self,
        ctx: &ContextId,
        query: &EmbeddingVector,
        k: usize,
        filter: &SearchFilter,
    ) -> MnemeResult<Vec<SearchHit>> {
        let namespaces = self.namespaces.read().await;
        let Some(items) = namespaces.get(ctx) else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for item in items {
            if !filter.matches(&item.meta) {
                continue;
            }
            let score = item.vector.dot(query)?;
            hits.push(SearchHit {
                id: item.id,
                score,
                meta: item.meta.clone(),
                content: item.content.clone(),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.meta.created_at.cmp(&a.meta.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, ctx: &ContextId, ids: &[ChunkId]) -> MnemeResult<usize> {
        let mut namespaces = self.namespaces.write().await;
        let Some(items) = namespaces.get_mut(ctx) else {
            return Ok(0);
        };
        let before = items.len();
        items.retain(|item| !ids.contains(&item.id));
        Ok(before - items.len())
    }

    async fn clear(&self, ctx: &ContextId) -> MnemeResult<usize> {
        let mut namespaces = self.namespaces.write().await;
        match namespaces.get_mut(ctx) {
            Some(items) => {
                let removed = items.len();
                items.clear();
                Ok(removed)
            }
            None => Ok(0),
        }
    }

    async fn drop_namespace(&self, ctx: &ContextId) -> MnemeResult<()> {
        let mut namespaces = self.namespaces.write().await;
        namespaces.remove(ctx);
        Ok(())
    }

    async fn list_items(&self, ctx: &ContextId) -> MnemeResult<Vec<IndexItem>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(ctx).cloned().unwrap_or_default())
    }

    async fn count(&self, ctx: &ContextId) -> MnemeResult<usize> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(ctx).map(|items| items.len()).unwrap_or(0))
    }
}

// ============================================================================
// TESTS
// ============================================================================
