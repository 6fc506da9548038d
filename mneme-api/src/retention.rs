//! Retention sweep
//!
//! Periodic background job deleting chunks older than the configured
//! horizon. Windows are derived at query time, so the sweep is the only
//! machinery that ever ages chunks out; it is disabled unless a horizon
//! is configured.

use crate::registry::Registry;
use crate::state::AppState;
use chrono::Utc;
use mneme_core::RetentionConfig;
use mneme_index::IndexPool;
use std::collections::HashMap;

/// One sweep across all contexts. Returns the number of deleted chunks.
pub async fn sweep_once(
    registry: &Registry,
    pool: &IndexPool,
    config: &RetentionConfig,
) -> usize {
    let Some(horizon) = config.horizon else {
        return 0;
    };
    let cutoff = Utc::now() - chrono::Duration::from_std(horizon).unwrap_or_default();

    let mut total_removed = 0;
    for owner in registry.owners().await {
        for context in registry.contexts_for(owner.id).await {
            let handle = match pool.get(&context.id).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(context = %context.id, error = %e, "Retention sweep skipped context");
                    continue;
                }
            };

            let items = match handle.list_items(&context.id).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(context = %context.id, error = %e, "Retention sweep failed to list items");
                    continue;
                }
            };

            let expired: Vec<_> = items
                .iter()
                .filter(|item| item.meta.created_at < cutoff)
                .collect();
            if expired.is_empty() {
                continue;
            }

            // Session counters shrink by what the sweep removes.
            let mut per_session: HashMap<_, (i64, i64)> = HashMap::new();
            for item in &expired {
                let entry = per_session
                    .entry(item.meta.session_id.clone())
                    .or_insert((0, 0));
                entry.0 += 1;
                entry.1 += item.meta.token_count;
            }

            let ids: Vec<_> = expired.iter().map(|item| item.id).collect();
            match handle.delete(&context.id, &ids).await {
                Ok(removed) => {
                    total_removed += removed;
                    for (session_id, (chunks, tokens)) in per_session {
                        registry
                            .shrink_session(&context.id, &session_id, chunks, tokens)
                            .await;
                    }
                    tracing::info!(
                        context = %context.id,
                        removed,
                        "Retention sweep removed expired chunks"
                    );
                }
                Err(e) => {
                    tracing::warn!(context = %context.id, error = %e, "Retention sweep delete failed");
                }
            }
        }
    }
    total_removed
}

/// Spawn the periodic retention task.
pub fn spawn_retention(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = state.config.retention.clone();
        if config.horizon.is_none() {
            tracing::debug!("Retention sweep disabled: no horizon configured");
            return;
        }
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once(&state.registry, &state.pool, &config).await;
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use mneme_core::{
        ChunkId, ChunkRole, EmbeddingVector, EntityIdType, MnemeConfig, OwnerId, ProviderFamily,
        RequestId, SessionId,
    };
    use mneme_index::{IndexItem, IndexMeta};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let state = AppState::build(ApiConfig::default(), MnemeConfig::default()).unwrap();
        let owner = state.registry.create_owner(OwnerId::now_v7()).await;
        let context = state
            .registry
            .create_context(owner.id, "test")
            .await
            .unwrap();
        let session = SessionId::for_context(&context.id);

        let handle = state.pool.get(&context.id).await.unwrap();
        for (content, age_days) in [("old chunk", 30), ("new chunk", 1)] {
            handle
                .add(
                    &context.id,
                    IndexItem {
                        id: ChunkId::now_v7(),
                        vector: EmbeddingVector::new(vec![1.0, 0.0], "test".to_string()),
                        meta: IndexMeta {
                            session_id: session.clone(),
                            role: ChunkRole::User,
                            created_at: Utc::now() - chrono::Duration::days(age_days),
                            model: "gpt-4".to_string(),
                            provider_family: ProviderFamily::Openai,
                            request_id: RequestId::now_v7(),
                            token_count: 3,
                        },
                        content: content.to_string(),
                    },
                )
                .await
                .unwrap();
        }
        state.registry.touch_session(&context.id, &session, 2, 6).await;

        let config = RetentionConfig {
            interval: Duration::from_secs(3600),
            horizon: Some(Duration::from_secs(7 * 24 * 3600)),
        };
        let removed = sweep_once(&state.registry, &state.pool, &config).await;
        assert_eq!(removed, 1);

        let items = handle.list_items(&context.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "new chunk");

        let session_row = state.registry.session(&context.id, &session).await.unwrap();
        assert_eq!(session_row.chunk_count, 1);
        assert_eq!(session_row.token_count, 3);
    }

    #[tokio::test]
    async fn test_sweep_disabled_without_horizon() {
        let state = AppState::build(ApiConfig::default(), MnemeConfig::default()).unwrap();
        let config = RetentionConfig::default();
        assert_eq!(sweep_once(&state.registry, &state.pool, &config).await, 0);
    }
}
