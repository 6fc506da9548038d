//! Persistent-state registry
//!
//! In-process store for Owners, contexts, sessions, usage records,
//! provider credentials, and subscription events. The durable
//! representation is an external concern; this registry keeps the same
//! read/write surface a database-backed implementation would expose.
//!
//! Concurrency notes: owner token counters are plain atomics so advisory
//! reads never lock; event rows get single-writer semantics through an
//! insert-once map guarded by one lock.

use crate::error::{ApiError, ApiResult};
use chrono::Utc;
use mneme_core::{
    BillingState, ContextId, MemoryContext, Owner, OwnerId, ProviderCredential, ProviderFamily,
    Session, SessionId, SubscriptionEvent, Timestamp, UsageRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// OWNER STATE
// ============================================================================

/// Mutable owner fields behind one lock.
#[derive(Debug, Clone)]
pub struct OwnerMeta {
    pub billing_state: BillingState,
    pub has_instrument: bool,
    pub grace_deadline: Option<Timestamp>,
    pub subscription_id: Option<String>,
    pub created_at: Timestamp,
}

/// Live owner state: metadata under a lock, token counters as atomics so
/// the admission gate can read them without locking.
pub struct OwnerState {
    pub id: OwnerId,
    pub meta: RwLock<OwnerMeta>,
    pub cumulative_tokens: AtomicI64,
    pub cumulative_tokens_reported: AtomicI64,
}

impl OwnerState {
    fn new(id: OwnerId) -> Self {
        Self {
            id,
            meta: RwLock::new(OwnerMeta {
                billing_state: BillingState::Free,
                has_instrument: false,
                grace_deadline: None,
                subscription_id: None,
                created_at: Utc::now(),
            }),
            cumulative_tokens: AtomicI64::new(0),
            cumulative_tokens_reported: AtomicI64::new(0),
        }
    }

    /// Point-in-time snapshot as the wire entity.
    pub async fn snapshot(&self) -> Owner {
        let meta = self.meta.read().await;
        Owner {
            id: self.id,
            billing_state: meta.billing_state,
            has_instrument: meta.has_instrument,
            cumulative_tokens: self.cumulative_tokens.load(Ordering::Relaxed),
            cumulative_tokens_reported: self.cumulative_tokens_reported.load(Ordering::Relaxed),
            grace_deadline: meta.grace_deadline,
            subscription_id: meta.subscription_id.clone(),
            created_at: meta.created_at,
        }
    }
}

// ============================================================================
// EVENT SLOT
// ============================================================================

/// Result of claiming an event id for processing.
pub enum EventClaim {
    /// New row inserted; the caller runs the handler
    New,
    /// Already processed successfully; respond idempotently
    AlreadyProcessed(SubscriptionEvent),
    /// Seen before but failed; the caller may retry the handler
    Retry(SubscriptionEvent),
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The in-process registry.
pub struct Registry {
    owners: RwLock<HashMap<OwnerId, Arc<OwnerState>>>,
    contexts: RwLock<HashMap<ContextId, MemoryContext>>,
    sessions: RwLock<HashMap<(ContextId, SessionId), Session>>,
    usage: RwLock<Vec<UsageRecord>>,
    credentials: RwLock<HashMap<(OwnerId, ProviderFamily), ProviderCredential>>,
    events: RwLock<HashMap<String, SubscriptionEvent>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            usage: RwLock::new(Vec::new()),
            credentials: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Owners
    // ========================================================================

    pub async fn create_owner(&self, id: OwnerId) -> Arc<OwnerState> {
        let mut owners = self.owners.write().await;
        owners
            .entry(id)
            .or_insert_with(|| Arc::new(OwnerState::new(id)))
            .clone()
    }

    pub async fn owner(&self, id: OwnerId) -> Option<Arc<OwnerState>> {
        self.owners.read().await.get(&id).cloned()
    }

    pub async fn require_owner(&self, id: OwnerId) -> ApiResult<Arc<OwnerState>> {
        self.owner(id)
            .await
            .ok_or_else(|| ApiError::owner_not_found(id))
    }

    pub async fn owners(&self) -> Vec<Arc<OwnerState>> {
        self.owners.read().await.values().cloned().collect()
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    pub async fn create_context(
        &self,
        owner_id: OwnerId,
        name: impl Into<String>,
    ) -> ApiResult<MemoryContext> {
        self.require_owner(owner_id).await?;
        let context = MemoryContext::new(owner_id, name);
        self.contexts
            .write()
            .await
            .insert(context.id.clone(), context.clone());
        Ok(context)
    }

    /// Resolve an active context by its token; the authentication path.
    pub async fn resolve_context(
        &self,
        id: &ContextId,
    ) -> Option<(MemoryContext, Arc<OwnerState>)> {
        let context = {
            let contexts = self.contexts.read().await;
            contexts.get(id).filter(|c| c.active).cloned()
        }?;
        let owner = self.owner(context.owner_id).await?;
        Some((context, owner))
    }

    pub async fn context(&self, id: &ContextId) -> Option<MemoryContext> {
        self.contexts.read().await.get(id).cloned()
    }

    pub async fn contexts_for(&self, owner_id: OwnerId) -> Vec<MemoryContext> {
        let mut list: Vec<MemoryContext> = self
            .contexts
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub async fn touch_context(&self, id: &ContextId) {
        if let Some(context) = self.contexts.write().await.get_mut(id) {
            context.last_used_at = Utc::now();
        }
    }

    pub async fn delete_context(&self, id: &ContextId) -> bool {
        let removed = self.contexts.write().await.remove(id).is_some();
        if removed {
            self.sessions
                .write()
                .await
                .retain(|(ctx, _), _| ctx != id);
        }
        removed
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Record activity on a session, creating it on first touch.
    pub async fn touch_session(
        &self,
        ctx: &ContextId,
        session_id: &SessionId,
        added_chunks: i64,
        added_tokens: i64,
    ) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry((ctx.clone(), session_id.clone()))
            .or_insert_with(|| Session::new(ctx.clone(), session_id.clone()));
        session.chunk_count += added_chunks;
        session.token_count += added_tokens;
        session.last_used_at = Utc::now();
    }

    /// Subtract swept chunks from a session's counters.
    pub async fn shrink_session(
        &self,
        ctx: &ContextId,
        session_id: &SessionId,
        removed_chunks: i64,
        removed_tokens: i64,
    ) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&(ctx.clone(), session_id.clone())) {
            session.chunk_count = (session.chunk_count - removed_chunks).max(0);
            session.token_count = (session.token_count - removed_tokens).max(0);
        }
    }

    pub async fn session(&self, ctx: &ContextId, session_id: &SessionId) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(&(ctx.clone(), session_id.clone()))
            .cloned()
    }

    pub async fn sessions_for(&self, ctx: &ContextId) -> Vec<Session> {
        let mut list: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| &s.context_id == ctx)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        list
    }

    pub async fn delete_session(&self, ctx: &ContextId, session_id: &SessionId) -> bool {
        self.sessions
            .write()
            .await
            .remove(&(ctx.clone(), session_id.clone()))
            .is_some()
    }

    pub async fn clear_sessions(&self, ctx: &ContextId) {
        self.sessions.write().await.retain(|(c, _), _| c != ctx);
    }

    // ========================================================================
    // Usage records
    // ========================================================================

    pub async fn append_usage(&self, record: UsageRecord) {
        self.usage.write().await.push(record);
    }

    pub async fn usage_for_owner(&self, owner_id: OwnerId) -> Vec<UsageRecord> {
        self.usage
            .read()
            .await
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub async fn usage_for_context(&self, ctx: &ContextId) -> Vec<UsageRecord> {
        self.usage
            .read()
            .await
            .iter()
            .filter(|r| &r.context_id == ctx)
            .cloned()
            .collect()
    }

    // ========================================================================
    // Provider credentials
    // ========================================================================

    pub async fn set_credential(
        &self,
        owner_id: OwnerId,
        family: ProviderFamily,
        ciphertext: impl Into<String>,
    ) -> ApiResult<()> {
        self.require_owner(owner_id).await?;
        self.credentials.write().await.insert(
            (owner_id, family),
            ProviderCredential {
                owner_id,
                family,
                ciphertext: ciphertext.into(),
                active: true,
                last_used_at: None,
            },
        );
        Ok(())
    }

    /// Fetch the active credential for a family, touching last_used_at.
    pub async fn use_credential(
        &self,
        owner_id: OwnerId,
        family: ProviderFamily,
    ) -> Option<String> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials.get_mut(&(owner_id, family))?;
        if !credential.active {
            return None;
        }
        credential.last_used_at = Some(Utc::now());
        Some(credential.ciphertext.clone())
    }

    pub async fn delete_credential(&self, owner_id: OwnerId, family: ProviderFamily) -> bool {
        self.credentials
            .write()
            .await
            .remove(&(owner_id, family))
            .is_some()
    }

    pub async fn credentials_for(&self, owner_id: OwnerId) -> Vec<ProviderCredential> {
        self.credentials
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect()
    }

    // ========================================================================
    // Subscription events
    // ========================================================================

    /// Claim an event id. Insert-once semantics: exactly one caller ever
    /// sees `New` for a given id.
    pub async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> EventClaim {
        let mut events = self.events.write().await;
        match events.get(event_id) {
            Some(row) if row.processed => EventClaim::AlreadyProcessed(row.clone()),
            Some(row) => EventClaim::Retry(row.clone()),
            None => {
                events.insert(
                    event_id.to_string(),
                    SubscriptionEvent::new(event_id, event_type, payload),
                );
                EventClaim::New
            }
        }
    }

    pub async fn mark_event_processed(&self, event_id: &str) {
        let mut events = self.events.write().await;
        if let Some(row) = events.get_mut(event_id) {
            row.processed = true;
            row.processed_at = Some(Utc::now());
            row.error = None;
        }
    }

    pub async fn mark_event_failed(&self, event_id: &str, error: impl Into<String>) {
        let mut events = self.events.write().await;
        if let Some(row) = events.get_mut(event_id) {
            row.processed = false;
            row.error = Some(error.into());
        }
    }

    pub async fn event(&self, event_id: &str) -> Option<SubscriptionEvent> {
        self.events.read().await.get(event_id).cloned()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mneme_core::EntityIdType;

    #[tokio::test]
    async fn test_resolve_context_requires_active() {
        let registry = Registry::new();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        let context = registry.create_context(owner.id, "test").await.unwrap();

        assert!(registry.resolve_context(&context.id).await.is_some());

        // Deactivate and re-check
        {
            let mut contexts = registry.contexts.write().await;
            contexts.get_mut(&context.id).unwrap().active = false;
        }
        assert!(registry.resolve_context(&context.id).await.is_none());
    }

    #[tokio::test]
    async fn test_context_requires_owner() {
        let registry = Registry::new();
        let result = registry.create_context(OwnerId::now_v7(), "orphan").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_touch_accumulates() {
        let registry = Registry::new();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        let context = registry.create_context(owner.id, "test").await.unwrap();
        let session = SessionId::for_context(&context.id);

        registry.touch_session(&context.id, &session, 2, 40).await;
        registry.touch_session(&context.id, &session, 1, 10).await;

        let stored = registry.session(&context.id, &session).await.unwrap();
        assert_eq!(stored.chunk_count, 3);
        assert_eq!(stored.token_count, 50);
    }

    #[tokio::test]
    async fn test_event_claim_insert_once() {
        let registry = Registry::new();

        let first = registry
            .claim_event("evt_1", "payment_failed", serde_json::json!({}))
            .await;
        assert!(matches!(first, EventClaim::New));

        // Unprocessed rows come back as Retry
        let second = registry
            .claim_event("evt_1", "payment_failed", serde_json::json!({}))
            .await;
        assert!(matches!(second, EventClaim::Retry(_)));

        registry.mark_event_processed("evt_1").await;
        let third = registry
            .claim_event("evt_1", "payment_failed", serde_json::json!({}))
            .await;
        assert!(matches!(third, EventClaim::AlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn test_inactive_credential_not_returned() {
        let registry = Registry::new();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        registry
            .set_credential(owner.id, ProviderFamily::Openai, "sk-test")
            .await
            .unwrap();

        assert_eq!(
            registry
                .use_credential(owner.id, ProviderFamily::Openai)
                .await
                .as_deref(),
            Some("sk-test")
        );
        assert!(registry
            .use_credential(owner.id, ProviderFamily::Anthropic)
            .await
            .is_none());

        {
            let mut credentials = registry.credentials.write().await;
            credentials
                .get_mut(&(owner.id, ProviderFamily::Openai))
                .unwrap()
                .active = false;
        }
        assert!(registry
            .use_credential(owner.id, ProviderFamily::Openai)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_context_drops_sessions() {
        let registry = Registry::new();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        let context = registry.create_context(owner.id, "test").await.unwrap();
        let session = SessionId::for_context(&context.id);
        registry.touch_session(&context.id, &session, 1, 5).await;

        assert!(registry.delete_context(&context.id).await);
        assert!(registry.session(&context.id, &session).await.is_none());
    }
}
