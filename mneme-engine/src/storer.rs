//! Selective persistence
//!
//! Applies the storage rules to a completed request: system messages and
//! ephemeral (`memory: false`) messages are never stored, the caller's
//! store flags gate inputs and output separately, and oversized text is
//! split at paragraph, then sentence, then hard boundaries. Storage runs
//! after the response has been fully captured and must never fail the
//! client request; callers record failures as a partial-usage flag.

use crate::embed_cache::EmbeddingCache;
use chrono::Utc;
use mneme_core::{
    estimate_tokens, ChatMessage, ChunkId, ChunkRole, ContextId, EntityIdType, ProviderFamily,
    RequestId, SessionId, StoreConfig,
};
use mneme_core::{MnemeResult, CHARS_PER_TOKEN};
use mneme_index::{IndexItem, IndexMeta, VectorIndex};
use std::sync::Arc;

// ============================================================================
// REQUEST / OUTCOME
// ============================================================================

/// Everything the storer needs from a completed request.
#[derive(Debug, Clone)]
pub struct StoreRequest<'a> {
    pub ctx: &'a ContextId,
    pub session: &'a SessionId,
    pub model: &'a str,
    pub provider_family: ProviderFamily,
    pub request_id: RequestId,
    pub input_messages: &'a [ChatMessage],
    pub assistant_output: &'a str,
    pub store_input: bool,
    pub store_response: bool,
}

/// Counts returned by a store pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub stored_input_tokens: i64,
    pub stored_output_tokens: i64,
    pub ephemeral_tokens: i64,
    pub stored_chunk_count: i64,
}

// ============================================================================
// STORER
// ============================================================================

/// The selective storer.
pub struct Storer {
    cache: Arc<EmbeddingCache>,
    config: StoreConfig,
}

impl Storer {
    pub fn new(cache: Arc<EmbeddingCache>, config: StoreConfig) -> Self {
        Self { cache, config }
    }

    /// Persist the accepted parts of a completed request.
    pub async fn store(
        &self,
        index: &dyn VectorIndex,
        req: StoreRequest<'_>,
    ) -> MnemeResult<StoreOutcome> {
        let mut outcome = StoreOutcome::default();
        index.ensure(req.ctx).await?;

        if req.store_input {
            for message in req.input_messages {
                let role = match message.role.as_str() {
                    "user" => ChunkRole::User,
                    "assistant" => ChunkRole::Assistant,
                    // System messages are never stored
                    _ => continue,
                };

                let text = message.text();
                if text.trim().is_empty() {
                    continue;
                }

                if !message.is_memorable() {
                    outcome.ephemeral_tokens += estimate_tokens(&text);
                    continue;
                }

                outcome.stored_input_tokens += self
                    .persist_text(index, &req, role, &text, &mut outcome.stored_chunk_count)
                    .await?;
            }
        }

        if req.store_response && !req.assistant_output.trim().is_empty() {
            outcome.stored_output_tokens += self
                .persist_text(
                    index,
                    &req,
                    ChunkRole::Assistant,
                    req.assistant_output,
                    &mut outcome.stored_chunk_count,
                )
                .await?;
        }

        tracing::debug!(
            context = %req.ctx,
            session = %req.session,
            request_id = %req.request_id,
            chunks = outcome.stored_chunk_count,
            input_tokens = outcome.stored_input_tokens,
            output_tokens = outcome.stored_output_tokens,
            ephemeral_tokens = outcome.ephemeral_tokens,
            "Stored request material"
        );

        Ok(outcome)
    }

    async fn persist_text(
        &self,
        index: &dyn VectorIndex,
        req: &StoreRequest<'_>,
        role: ChunkRole,
        text: &str,
        chunk_count: &mut i64,
    ) -> MnemeResult<i64> {
        let mut stored_tokens = 0;
        for piece in split_text(text, self.config.soft_limit_tokens) {
            let vector = self.cache.embed(&piece).await?;
            let tokens = estimate_tokens(&piece);
            let item = IndexItem {
                id: ChunkId::now_v7(),
                vector,
                meta: IndexMeta {
                    session_id: req.session.clone(),
                    role,
                    created_at: Utc::now(),
                    model: req.model.to_string(),
                    provider_family: req.provider_family,
                    request_id: req.request_id,
                    token_count: tokens,
                },
                content: piece,
            };
            index.add(req.ctx, item).await?;
            stored_tokens += tokens;
            *chunk_count += 1;
        }
        Ok(stored_tokens)
    }
}

// ============================================================================
// SPLITTING
// ============================================================================

/// Split text into pieces of at most `soft_limit_tokens` estimated tokens.
///
/// Boundaries are tried in order: paragraph (`\n\n`), sentence (`. `),
/// then a hard cut at the character equivalent of the limit.
pub fn split_text(text: &str, soft_limit_tokens: i64) -> Vec<String> {
    if estimate_tokens(text) <= soft_limit_tokens {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    for paragraph_group in pack(text.split("\n\n"), soft_limit_tokens, "\n\n") {
        if estimate_tokens(&paragraph_group) <= soft_limit_tokens {
            pieces.push(paragraph_group);
            continue;
        }
        for sentence_group in pack(paragraph_group.split_inclusive(". "), soft_limit_tokens, "")
        {
            if estimate_tokens(&sentence_group) <= soft_limit_tokens {
                pieces.push(sentence_group);
            } else {
                pieces.extend(hard_split(&sentence_group, soft_limit_tokens));
            }
        }
    }
    pieces.retain(|p| !p.trim().is_empty());
    pieces
}

/// Greedily pack fragments into groups under the token limit.
fn pack<'a>(
    fragments: impl Iterator<Item = &'a str>,
    limit: i64,
    joiner: &str,
) -> Vec<String> {
    let max_chars = limit.max(1) as usize * CHARS_PER_TOKEN;
    let mut groups: Vec<String> = Vec::new();
    let mut current = String::new();

    for fragment in fragments {
        let candidate_len = if current.is_empty() {
            fragment.len()
        } else {
            current.len() + joiner.len() + fragment.len()
        };
        if !current.is_empty() && candidate_len > max_chars {
            groups.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(joiner);
        }
        current.push_str(fragment);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Hard length cut on character boundaries.
fn hard_split(text: &str, limit_tokens: i64) -> Vec<String> {
    let max_chars = (limit_tokens as usize).saturating_mul(CHARS_PER_TOKEN).max(1);
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = max_chars.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head.to_string());
        rest = tail;
    }
    pieces
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mneme_core::MessageContent;
    use mneme_index::FlatIndex;
    use mneme_llm::HashEmbedder;
    use std::time::Duration;

    fn storer() -> Storer {
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(HashEmbedder::new(8)),
            Duration::from_secs(60),
        ));
        Storer::new(cache, StoreConfig::default())
    }

    fn msg(role: &str, content: &str, memory: Option<bool>) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Text(content.to_string()),
            memory,
        }
    }

    fn request<'a>(
        ctx: &'a ContextId,
        session: &'a SessionId,
        messages: &'a [ChatMessage],
        output: &'a str,
    ) -> StoreRequest<'a> {
        StoreRequest {
            ctx,
            session,
            model: "gpt-4",
            provider_family: ProviderFamily::Openai,
            request_id: RequestId::now_v7(),
            input_messages: messages,
            assistant_output: output,
            store_input: true,
            store_response: true,
        }
    }

    #[tokio::test]
    async fn test_system_messages_never_stored() {
        let storer = storer();
        let index = FlatIndex::new();
        let ctx = ContextId::generate();
        let session = SessionId::for_context(&ctx);
        let messages = vec![
            msg("system", "you are a helpful assistant", None),
            msg("user", "remember my codename", None),
        ];

        let outcome = storer
            .store(&index, request(&ctx, &session, &messages, ""))
            .await
            .unwrap();

        assert_eq!(outcome.stored_chunk_count, 1);
        let items = index.list_items(&ctx).await.unwrap();
        assert!(items.iter().all(|i| !i.content.contains("helpful assistant")));
    }

    #[tokio::test]
    async fn test_ephemeral_messages_counted_not_stored() {
        let storer = storer();
        let index = FlatIndex::new();
        let ctx = ContextId::generate();
        let session = SessionId::for_context(&ctx);
        let messages = vec![
            msg("user", "Here are reference docs: DOC-BODY", Some(false)),
            msg("user", "Summarise them", None),
        ];

        let outcome = storer
            .store(&index, request(&ctx, &session, &messages, "Summary."))
            .await
            .unwrap();

        assert!(outcome.ephemeral_tokens > 0);
        let items = index.list_items(&ctx).await.unwrap();
        assert!(items.iter().all(|i| !i.content.contains("DOC-BODY")));
        assert!(items.iter().any(|i| i.content.contains("Summarise them")));
    }

    #[tokio::test]
    async fn test_store_flags_gate_everything() {
        let storer = storer();
        let index = FlatIndex::new();
        let ctx = ContextId::generate();
        let session = SessionId::for_context(&ctx);
        let messages = vec![msg("user", "hello", None)];

        let mut req = request(&ctx, &session, &messages, "world");
        req.store_input = false;
        req.store_response = false;

        let outcome = storer.store(&index, req).await.unwrap();
        assert_eq!(outcome, StoreOutcome::default());
        assert_eq!(index.count(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_output_skipped() {
        let storer = storer();
        let index = FlatIndex::new();
        let ctx = ContextId::generate();
        let session = SessionId::for_context(&ctx);

        let outcome = storer
            .store(&index, request(&ctx, &session, &[], "   \n "))
            .await
            .unwrap();
        assert_eq!(outcome.stored_output_tokens, 0);
        assert_eq!(index.count(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_assistant_output_stored_with_role() {
        let storer = storer();
        let index = FlatIndex::new();
        let ctx = ContextId::generate();
        let session = SessionId::for_context(&ctx);

        let outcome = storer
            .store(&index, request(&ctx, &session, &[], "Hello, world."))
            .await
            .unwrap();

        assert_eq!(outcome.stored_chunk_count, 1);
        let items = index.list_items(&ctx).await.unwrap();
        assert_eq!(items[0].meta.role, ChunkRole::Assistant);
        assert_eq!(items[0].content, "Hello, world.");
    }

    #[tokio::test]
    async fn test_oversized_text_is_split() {
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(HashEmbedder::new(8)),
            Duration::from_secs(60),
        ));
        let storer = Storer::new(cache, StoreConfig { soft_limit_tokens: 10 });
        let index = FlatIndex::new();
        let ctx = ContextId::generate();
        let session = SessionId::for_context(&ctx);

        let long = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let outcome = storer
            .store(&index, request(&ctx, &session, &[], long))
            .await
            .unwrap();
        assert!(outcome.stored_chunk_count > 1);
    }

    #[test]
    fn test_split_text_short_passthrough() {
        let pieces = split_text("short", 100);
        assert_eq!(pieces, vec!["short"]);
    }

    #[test]
    fn test_split_text_prefers_paragraphs() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let pieces = split_text(&text, 10);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].chars().all(|c| c == 'a'));
        assert!(pieces[1].chars().all(|c| c == 'b'));
    }

    #[test]
    fn test_split_text_falls_back_to_sentences() {
        let text = format!("{}. {}. {}", "a".repeat(30), "b".repeat(30), "c".repeat(30));
        let pieces = split_text(&text, 10);
        assert!(pieces.len() >= 3);
        for piece in &pieces {
            assert!(estimate_tokens(piece) <= 10);
        }
    }

    #[test]
    fn test_split_text_hard_cut_as_last_resort() {
        let text = "x".repeat(200);
        let pieces = split_text(&text, 10);
        assert_eq!(pieces.len(), 5);
        for piece in &pieces {
            assert!(piece.len() <= 40);
        }
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_split_preserves_all_content_on_paragraphs() {
        let text = format!("{}\n\n{}", "alpha ".repeat(10), "beta ".repeat(10));
        let pieces = split_text(&text, 8);
        let rejoined = pieces.join("\n\n");
        assert!(rejoined.contains("alpha"));
        assert!(rejoined.contains("beta"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Splitting never produces blank pieces, and single-block
            /// text (no paragraph or sentence boundaries) always lands
            /// within the limit.
            #[test]
            fn prop_split_pieces_are_nonblank(
                text in "[a-zA-Z ]{0,400}",
                limit in 1i64..64,
            ) {
                // The storer never splits blank text
                prop_assume!(!text.trim().is_empty());
                for piece in split_text(&text, limit) {
                    prop_assert!(!piece.trim().is_empty());
                }
            }

            #[test]
            fn prop_unbreakable_text_respects_hard_limit(
                text in "[a-z]{1,400}",
                limit in 1i64..32,
            ) {
                let pieces = split_text(&text, limit);
                for piece in &pieces {
                    prop_assert!(estimate_tokens(piece) <= limit);
                }
                // A hard cut loses nothing
                prop_assert_eq!(pieces.concat(), text);
            }
        }
    }
}
