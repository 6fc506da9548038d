//! Temporal-window retrieval
//!
//! Retrieval pipeline: embed the query (through the cache), oversample
//! candidates from the index, classify each by age window, apply recency
//! decay, allocate equally across windows with deficit backfill, dedupe
//! by normalised content, enforce the score floor, and return in
//! descending effective-score order.
//!
//! Given a fixed clock, fixed index contents, and fixed configuration the
//! whole pipeline is a pure function of the query.

use crate::embed_cache::EmbeddingCache;
use mneme_core::{
    ChunkId, ChunkRole, ContextId, EngineConfig, EngineError, MnemeResult, RecencyBias,
    SessionId, TemporalWindow, Timestamp,
};
use mneme_index::{SearchFilter, SearchHit, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// One retrieved chunk with its effective (decayed) score.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub role: ChunkRole,
    pub content: String,
    pub window: TemporalWindow,
    pub score: f32,
    pub created_at: Timestamp,
    pub token_count: i64,
}

/// The ordered result of a retrieve call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedSet {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievedSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Total estimated tokens across the retrieved chunks.
    pub fn total_tokens(&self) -> i64 {
        self.chunks.iter().map(|c| c.token_count).sum()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The temporal retrieval engine.
pub struct RetrievalEngine {
    cache: Arc<EmbeddingCache>,
    config: EngineConfig,
}

impl RetrievalEngine {
    pub fn new(cache: Arc<EmbeddingCache>, config: EngineConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Retrieve up to `limit` chunks for a query, scoped to one session.
    ///
    /// Runs under the configured wall-clock budget (embedding included);
    /// overruns surface as [`EngineError::BudgetExceeded`], which callers
    /// degrade to an empty preamble.
    pub async fn retrieve(
        &self,
        index: &dyn VectorIndex,
        ctx: &ContextId,
        session: &SessionId,
        query: &str,
        limit: usize,
        recency_bias: RecencyBias,
        now: Timestamp,
    ) -> MnemeResult<RetrievedSet> {
        let limit = limit.min(self.config.max_limit);
        if limit == 0 || query.trim().is_empty() {
            return Ok(RetrievedSet::empty());
        }

        let budget = self.config.budget;
        match tokio::time::timeout(
            budget,
            self.retrieve_inner(index, ctx, session, query, limit, recency_bias, now),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    context = %ctx,
                    budget_ms = budget.as_millis() as u64,
                    "Retrieval budget exceeded"
                );
                Err(EngineError::BudgetExceeded {
                    budget_ms: budget.as_millis() as u64,
                }
                .into())
            }
        }
    }

    async fn retrieve_inner(
        &self,
        index: &dyn VectorIndex,
        ctx: &ContextId,
        session: &SessionId,
        query: &str,
        limit: usize,
        recency_bias: RecencyBias,
        now: Timestamp,
    ) -> MnemeResult<RetrievedSet> {
        // 1. Query embedding, coalesced by the cache.
        let query_vector = self.cache.embed(query).await?;

        // 2. Oversampled candidate search, scoped to the session.
        let oversample = self.config.oversample.max(2);
        let filter = SearchFilter::session(session.clone());
        let hits = index
            .search(ctx, &query_vector, limit * oversample, &filter)
            .await?;

        // 3-4. Window classification and recency decay.
        let beta = recency_bias.beta();
        let mut candidates: Vec<RetrievedChunk> = Vec::with_capacity(hits.len());
        for hit in hits {
            let age = age_of(&hit, now);
            let Some(window) = self.config.windows.classify(age) else {
                // Older than the last bounded window: out of scope.
                continue;
            };
            let age_hours = age.as_secs_f32() / 3600.0;
            let decay = (1.0 - beta) + beta * (-age_hours / self.config.decay_hours).exp();
            candidates.push(RetrievedChunk {
                id: hit.id,
                role: hit.meta.role,
                content: hit.content,
                window,
                score: hit.score * decay,
                created_at: hit.meta.created_at,
                token_count: hit.meta.token_count,
            });
        }

        if candidates.is_empty() {
            return Ok(RetrievedSet::empty());
        }

        // 5. Equal allocation with backfill.
        let mut selected = allocate(&candidates, limit, self.config.windows.count());

        // 6. Deduplication by normalised content, keeping the higher score,
        // then topping back up so the limit stays honoured.
        selected = dedupe(selected);
        if selected.len() < limit {
            top_up(&mut selected, &candidates, limit);
        }

        // 7. Minimum score floor with recency fallback.
        let floored: Vec<RetrievedChunk> = selected
            .iter()
            .filter(|c| c.score >= self.config.score_floor)
            .cloned()
            .collect();
        let mut result = if floored.is_empty() && !candidates.is_empty() {
            // A genuine thread exists but the query scored weakly: fall
            // back to the most recent chunks rather than returning none.
            let mut by_recency = dedupe(candidates.clone());
            by_recency.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            by_recency.truncate(limit);
            by_recency
        } else {
            floored
        };

        // 8. Final ordering: descending effective score.
        sort_by_score(&mut result);
        result.truncate(limit);

        Ok(RetrievedSet { chunks: result })
    }
}

// ============================================================================
// PIPELINE STEPS
// ============================================================================

fn age_of(hit: &SearchHit, now: Timestamp) -> Duration {
    (now - hit.meta.created_at).to_std().unwrap_or(Duration::ZERO)
}

fn sort_by_score(chunks: &mut [RetrievedChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Equal allocation: each window gets ceil(limit / window_count) slots;
/// unfilled quota is redistributed to the best remaining candidates of
/// any window, up to the overall limit.
fn allocate(
    candidates: &[RetrievedChunk],
    limit: usize,
    window_count: usize,
) -> Vec<RetrievedChunk> {
    let quota = limit.div_ceil(window_count.max(1));

    let mut by_window: HashMap<TemporalWindow, Vec<RetrievedChunk>> = HashMap::new();
    for candidate in candidates {
        by_window
            .entry(candidate.window)
            .or_default()
            .push(candidate.clone());
    }

    let mut selected: Vec<RetrievedChunk> = Vec::with_capacity(limit);
    let mut leftovers: Vec<RetrievedChunk> = Vec::new();
    for (_, mut chunks) in by_window {
        sort_by_score(&mut chunks);
        let take = quota.min(chunks.len());
        let rest = chunks.split_off(take);
        selected.extend(chunks);
        leftovers.extend(rest);
    }

    // Backfill the summed deficit from the best remaining candidates.
    sort_by_score(&mut leftovers);
    for chunk in leftovers {
        if selected.len() >= limit {
            break;
        }
        selected.push(chunk);
    }

    sort_by_score(&mut selected);
    selected.truncate(limit);
    selected
}

/// Drop duplicates identified by normalised content, keeping the entry
/// with the higher effective score.
fn dedupe(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut best: HashMap<String, RetrievedChunk> = HashMap::new();
    for chunk in chunks {
        let key = normalise(&chunk.content);
        match best.get(&key) {
            Some(existing) if existing.score >= chunk.score => {}
            _ => {
                best.insert(key, chunk);
            }
        }
    }
    let mut out: Vec<RetrievedChunk> = best.into_values().collect();
    sort_by_score(&mut out);
    out
}

/// Refill a deduped selection from unused candidates, skipping content
/// already present.
fn top_up(selected: &mut Vec<RetrievedChunk>, candidates: &[RetrievedChunk], limit: usize) {
    let mut present: std::collections::HashSet<String> =
        selected.iter().map(|c| normalise(&c.content)).collect();

    let mut pool: Vec<RetrievedChunk> = candidates
        .iter()
        .filter(|c| !present.contains(&normalise(&c.content)))
        .cloned()
        .collect();
    pool = dedupe(pool);

    for chunk in pool {
        if selected.len() >= limit {
            break;
        }
        present.insert(normalise(&chunk.content));
        selected.push(chunk);
    }
}

/// Lowercase with whitespace collapsed to single spaces.
fn normalise(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
