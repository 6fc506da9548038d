//! MNEME Index - Vector Index Contract
//!
//! Implementation-neutral contract to a vector-similarity store, keyed by
//! memory context. Implementations may be exact (the bundled [`FlatIndex`],
//! a brute-force dot product over unit vectors, suitable up to a few
//! thousand entries per context) or approximate; callers must not assume
//! approximate results are ordered.
//!
//! Isolation invariant: two distinct context ids have fully disjoint
//! namespaces - no search ever returns an entry from another context.

mod flat;
mod pool;

pub use flat::FlatIndex;
pub use pool::{IndexHandle, IndexPool};

use async_trait::async_trait;
use mneme_core::{
    ChunkId, ChunkRole, ContextId, EmbeddingVector, MnemeResult, ProviderFamily, RequestId,
    SessionId, Timestamp,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// ITEM TYPES
// ============================================================================

/// Metadata attached to every indexed vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub session_id: SessionId,
    pub role: ChunkRole,
    pub created_at: Timestamp,
    pub model: String,
    pub provider_family: ProviderFamily,
    pub request_id: RequestId,
    pub token_count: i64,
}

/// A stored index entry: id, unit vector, metadata, and the chunk text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub id: ChunkId,
    pub vector: EmbeddingVector,
    pub meta: IndexMeta,
    pub content: String,
}

/// One search result with its inner-product similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub meta: IndexMeta,
    pub content: String,
}

// ============================================================================
// SEARCH FILTER
// ============================================================================

/// Metadata predicate evaluated during search.
///
/// A plain struct rather than a closure so implementations can push the
/// filter down into their own query machinery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Restrict to a single session
    pub session_id: Option<SessionId>,
    /// Only entries created at or after this instant
    pub created_after: Option<Timestamp>,
    /// Only entries created strictly before this instant
    pub created_before: Option<Timestamp>,
}

impl SearchFilter {
    /// Filter scoped to one session.
    pub fn session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    /// Whether the given metadata passes this filter.
    pub fn matches(&self, meta: &IndexMeta) -> bool {
        if let Some(session) = &self.session_id {
            if &meta.session_id != session {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if meta.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if meta.created_at >= before {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// INDEX CONTRACT
// ============================================================================

/// Contract a vector store must satisfy.
///
/// All operations are namespace-scoped by context id. Implementations must
/// be safe for concurrent readers and writers; a search racing a write may
/// or may not observe it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent namespace creation. Cheap when the namespace holds no
    /// content; no storage is allocated until the first write.
    async fn ensure(&self, ctx: &ContextId) -> MnemeResult<()>;

    /// Append a vector with attached metadata. The vector is
    /// L2-normalized on insert.
    async fn add(&self, ctx: &ContextId, item: IndexItem) -> MnemeResult<()>;

    /// Top-k entries in ctx passing the filter, by inner-product
    /// similarity on unit vectors (equivalent to cosine). Tied scores
    /// break by descending `created_at`, then ascending id.
    async fn search(
        &self,
        ctx: &ContextId,
        query: &EmbeddingVector,
        k: usize,
        filter: &SearchFilter,
    ) -> MnemeResult<Vec<SearchHit>>;

    /// Delete the given entries. Missing ids are ignored.
    async fn delete(&self, ctx: &ContextId, ids: &[ChunkId]) -> MnemeResult<usize>;

    /// Remove every entry in the namespace, keeping the namespace itself.
    async fn clear(&self, ctx: &ContextId) -> MnemeResult<usize>;

    /// Drop the namespace entirely.
    async fn drop_namespace(&self, ctx: &ContextId) -> MnemeResult<()>;

    /// Snapshot of stored items, for maintenance and retention sweeps.
    async fn list_items(&self, ctx: &ContextId) -> MnemeResult<Vec<IndexItem>>;

    /// Number of entries currently stored for ctx.
    async fn count(&self, ctx: &ContextId) -> MnemeResult<usize>;
}
