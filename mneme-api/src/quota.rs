//! Quota and metering
//!
//! Admission gate, post-response metering, and the periodic usage
//! reporter. Admission and the counter increment are deliberately not one
//! transaction: admission reads the current cumulative value, increments
//! are atomic, and concurrent in-flight requests may overshoot the free
//! allowance by at most (max_in_flight x typical_request_tokens). The
//! allowance is coarse enough to absorb that.

use crate::error::{ApiError, ApiResult};
use crate::registry::{OwnerState, Registry};
use async_trait::async_trait;
use chrono::Utc;
use mneme_core::{
    BillingState, ContextId, EntityIdType, OwnerId, ProviderFamily, QuotaConfig, RequestId,
    SessionId, Timestamp, UsageRecord, UsageRecordId,
};
use mneme_engine::StoreOutcome;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// ============================================================================
// ADMISSION
// ============================================================================

/// The outcome of a successful admission check, carried into response
/// headers.
#[derive(Debug, Clone)]
pub struct Admission {
    pub billing_state: BillingState,
    /// Cumulative billable tokens at admission time
    pub used_tokens: i64,
    /// Remaining free-tier tokens; None means unlimited
    pub remaining_tokens: Option<i64>,
    /// Warning text for GRACE owners
    pub billing_warning: Option<String>,
    /// Grace deadline for GRACE owners
    pub grace_ends: Option<Timestamp>,
}

// ============================================================================
// QUOTA SERVICE
// ============================================================================

/// Admission gate plus metering.
pub struct QuotaService {
    registry: Arc<Registry>,
    config: QuotaConfig,
}

impl QuotaService {
    pub fn new(registry: Arc<Registry>, config: QuotaConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Admission check, applied before any work begins.
    ///
    /// - ENTERPRISE: always admitted, no counter checks.
    /// - SUSPENDED: denied with ACCOUNT_SUSPENDED.
    /// - GRACE: admitted with warning and grace-deadline headers; lapses
    ///   to SUSPENDED when the deadline has passed.
    /// - ACTIVE / PAST_DUE with instrument: admitted, counters advisory.
    /// - FREE: admitted iff cumulative < allowance.
    pub async fn admit(&self, owner: &Arc<OwnerState>) -> ApiResult<Admission> {
        let used = owner.cumulative_tokens.load(Ordering::Relaxed);

        let (state, grace_deadline) = {
            let meta = owner.meta.read().await;
            (meta.billing_state, meta.grace_deadline)
        };

        match state {
            BillingState::Enterprise => Ok(Admission {
                billing_state: state,
                used_tokens: used,
                remaining_tokens: None,
                billing_warning: None,
                grace_ends: None,
            }),

            BillingState::Suspended => Err(ApiError::account_suspended()),

            BillingState::Grace => {
                let now = Utc::now();
                if grace_deadline.is_some_and(|deadline| deadline <= now) {
                    // Deadline elapsed without recovery
                    let mut meta = owner.meta.write().await;
                    meta.billing_state = BillingState::Suspended;
                    tracing::warn!(owner_id = %owner.id, "Grace deadline elapsed; owner suspended");
                    return Err(ApiError::account_suspended());
                }
                Ok(Admission {
                    billing_state: state,
                    used_tokens: used,
                    remaining_tokens: None,
                    billing_warning: Some(
                        "Payment failed; service continues until the grace deadline".to_string(),
                    ),
                    grace_ends: grace_deadline,
                })
            }

            BillingState::Active | BillingState::PastDue => Ok(Admission {
                billing_state: state,
                used_tokens: used,
                remaining_tokens: None,
                billing_warning: None,
                grace_ends: None,
            }),

            BillingState::Free => {
                let allowance = self.config.free_allowance_tokens;
                if used >= allowance {
                    return Err(ApiError::free_tier_exhausted(used, allowance));
                }
                Ok(Admission {
                    billing_state: state,
                    used_tokens: used,
                    remaining_tokens: Some(allowance - used),
                    billing_warning: None,
                    grace_ends: None,
                })
            }
        }
    }

    /// Post-response metering: billable = stored_input + stored_output.
    /// Retrieved and ephemeral tokens are recorded but never billed.
    #[allow(clippy::too_many_arguments)]
    pub async fn meter(
        &self,
        owner: &Arc<OwnerState>,
        ctx: &ContextId,
        session: &SessionId,
        request_id: RequestId,
        model: &str,
        family: ProviderFamily,
        outcome: StoreOutcome,
        retrieved_tokens: i64,
        storage_deferred: bool,
    ) {
        let billable = outcome.stored_input_tokens + outcome.stored_output_tokens;
        owner.cumulative_tokens.fetch_add(billable, Ordering::Relaxed);

        self.registry
            .append_usage(UsageRecord {
                id: UsageRecordId::now_v7(),
                owner_id: owner.id,
                context_id: ctx.clone(),
                request_id,
                stored_input_tokens: outcome.stored_input_tokens,
                stored_output_tokens: outcome.stored_output_tokens,
                retrieved_tokens,
                ephemeral_tokens: outcome.ephemeral_tokens,
                model: model.to_string(),
                provider_family: family,
                cost: self.config.cost_of(billable),
                storage_deferred,
                created_at: Utc::now(),
            })
            .await;

        self.registry
            .touch_session(ctx, session, outcome.stored_chunk_count, billable)
            .await;

        tracing::debug!(
            owner_id = %owner.id,
            request_id = %request_id,
            billable_tokens = billable,
            retrieved_tokens,
            storage_deferred,
            "Metered request"
        );
    }
}

// ============================================================================
// USAGE REPORTER
// ============================================================================

/// Submission seam to the external subscription system.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    /// Submit billed units for an owner. Must be idempotent on the
    /// receiving side; the caller only advances counters on Ok.
    async fn submit(&self, owner_id: OwnerId, units: i64) -> Result<(), String>;
}

/// Reporter that logs submissions; the default when no subscription
/// system is wired up.
pub struct LoggingReporter;

#[async_trait]
impl UsageReporter for LoggingReporter {
    async fn submit(&self, owner_id: OwnerId, units: i64) -> Result<(), String> {
        tracing::info!(owner_id = %owner_id, units, "Usage report submitted");
        Ok(())
    }
}

/// One reporter sweep across all owners.
///
/// For each ACTIVE or ENTERPRISE owner computes
/// `billable_to_report = max(0, (cumulative - allowance) - reported)`,
/// converts to external units rounding up, and advances the reported
/// counter only when submission succeeds.
pub async fn report_once(
    registry: &Registry,
    config: &QuotaConfig,
    reporter: &dyn UsageReporter,
) {
    for owner in registry.owners().await {
        let state = owner.meta.read().await.billing_state;
        if !matches!(state, BillingState::Active | BillingState::Enterprise) {
            continue;
        }

        let cumulative = owner.cumulative_tokens.load(Ordering::Relaxed);
        let reported = owner.cumulative_tokens_reported.load(Ordering::Relaxed);
        let billable_to_report =
            ((cumulative - config.free_allowance_tokens) - reported).max(0);
        if billable_to_report == 0 {
            continue;
        }

        let units = config.billing_units(billable_to_report);
        match reporter.submit(owner.id, units).await {
            Ok(()) => {
                owner
                    .cumulative_tokens_reported
                    .fetch_add(billable_to_report, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(
                    owner_id = %owner.id,
                    error = %e,
                    "Usage report submission failed; will retry next sweep"
                );
            }
        }
    }
}

/// Spawn the periodic reporter task.
pub fn spawn_reporter(
    registry: Arc<Registry>,
    config: QuotaConfig,
    reporter: Arc<dyn UsageReporter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.report_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            report_once(&registry, &config, reporter.as_ref()).await;
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::AtomicI64;

    async fn owner_in_state(registry: &Registry, state: BillingState) -> Arc<OwnerState> {
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        owner.meta.write().await.billing_state = state;
        owner
    }

    fn service(registry: &Arc<Registry>) -> QuotaService {
        QuotaService::new(registry.clone(), QuotaConfig::default())
    }

    #[tokio::test]
    async fn test_enterprise_always_admitted() {
        let registry = Arc::new(Registry::new());
        let quota = service(&registry);
        let owner = owner_in_state(&registry, BillingState::Enterprise).await;
        owner.cumulative_tokens.store(i64::MAX / 2, Ordering::Relaxed);

        let admission = quota.admit(&owner).await.unwrap();
        assert_eq!(admission.remaining_tokens, None);
    }

    #[tokio::test]
    async fn test_suspended_denied() {
        let registry = Arc::new(Registry::new());
        let quota = service(&registry);
        let owner = owner_in_state(&registry, BillingState::Suspended).await;

        let err = quota.admit(&owner).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AccountSuspended);
    }

    #[tokio::test]
    async fn test_grace_admitted_with_warning() {
        let registry = Arc::new(Registry::new());
        let quota = service(&registry);
        let owner = owner_in_state(&registry, BillingState::Grace).await;
        let deadline = Utc::now() + chrono::Duration::hours(24);
        owner.meta.write().await.grace_deadline = Some(deadline);

        let admission = quota.admit(&owner).await.unwrap();
        assert!(admission.billing_warning.is_some());
        assert_eq!(admission.grace_ends, Some(deadline));
    }

    #[tokio::test]
    async fn test_grace_lapses_to_suspended() {
        let registry = Arc::new(Registry::new());
        let quota = service(&registry);
        let owner = owner_in_state(&registry, BillingState::Grace).await;
        owner.meta.write().await.grace_deadline =
            Some(Utc::now() - chrono::Duration::minutes(1));

        let err = quota.admit(&owner).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AccountSuspended);
        assert_eq!(
            owner.meta.read().await.billing_state,
            BillingState::Suspended
        );
    }

    #[tokio::test]
    async fn test_free_tier_boundary() {
        let registry = Arc::new(Registry::new());
        let quota = service(&registry);
        let allowance = quota.config().free_allowance_tokens;

        let owner = owner_in_state(&registry, BillingState::Free).await;
        owner
            .cumulative_tokens
            .store(allowance - 10, Ordering::Relaxed);

        // One token short of the line: admitted
        let admission = quota.admit(&owner).await.unwrap();
        assert_eq!(admission.remaining_tokens, Some(10));

        // Simulate the in-flight request pushing past the allowance
        owner.cumulative_tokens.fetch_add(12, Ordering::Relaxed);
        let err = quota.admit(&owner).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FreeTierExhausted);
    }

    #[tokio::test]
    async fn test_meter_increments_and_records() {
        let registry = Arc::new(Registry::new());
        let quota = service(&registry);
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        let context = registry.create_context(owner.id, "test").await.unwrap();
        let session = SessionId::for_context(&context.id);

        let outcome = StoreOutcome {
            stored_input_tokens: 30,
            stored_output_tokens: 20,
            ephemeral_tokens: 100,
            stored_chunk_count: 2,
        };
        quota
            .meter(
                &owner,
                &context.id,
                &session,
                RequestId::now_v7(),
                "gpt-4",
                ProviderFamily::Openai,
                outcome,
                15,
                false,
            )
            .await;

        // Billable excludes retrieved and ephemeral
        assert_eq!(owner.cumulative_tokens.load(Ordering::Relaxed), 50);

        let records = registry.usage_for_owner(owner.id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].retrieved_tokens, 15);
        assert_eq!(records[0].ephemeral_tokens, 100);
        assert!(!records[0].storage_deferred);

        let session = registry.session(&context.id, &session).await.unwrap();
        assert_eq!(session.chunk_count, 2);
        assert_eq!(session.token_count, 50);
    }

    struct FlakyReporter {
        fail_next: std::sync::atomic::AtomicBool,
        submitted: AtomicI64,
    }

    #[async_trait]
    impl UsageReporter for FlakyReporter {
        async fn submit(&self, _owner_id: OwnerId, units: i64) -> Result<(), String> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err("synthetic outage".to_string());
            }
            self.submitted.fetch_add(units, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reporter_advances_only_on_success() {
        let registry = Arc::new(Registry::new());
        let config = QuotaConfig::default();
        let owner = owner_in_state(&registry, BillingState::Active).await;
        owner.cumulative_tokens.store(
            config.free_allowance_tokens + 2_500_000,
            Ordering::Relaxed,
        );

        let reporter = FlakyReporter {
            fail_next: std::sync::atomic::AtomicBool::new(true),
            submitted: AtomicI64::new(0),
        };

        // First sweep fails; nothing advances
        report_once(&registry, &config, &reporter).await;
        assert_eq!(
            owner.cumulative_tokens_reported.load(Ordering::Relaxed),
            0
        );

        // Second sweep succeeds; rounded-up units, token counter advanced
        report_once(&registry, &config, &reporter).await;
        assert_eq!(reporter.submitted.load(Ordering::SeqCst), 3);
        assert_eq!(
            owner.cumulative_tokens_reported.load(Ordering::Relaxed),
            2_500_000
        );

        // Third sweep has nothing left to report
        report_once(&registry, &config, &reporter).await;
        assert_eq!(reporter.submitted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reporter_skips_free_owners() {
        let registry = Arc::new(Registry::new());
        let config = QuotaConfig::default();
        let owner = owner_in_state(&registry, BillingState::Free).await;
        owner.cumulative_tokens.store(
            config.free_allowance_tokens + 5_000_000,
            Ordering::Relaxed,
        );

        report_once(&registry, &config, &LoggingReporter).await;
        assert_eq!(
            owner.cumulative_tokens_reported.load(Ordering::Relaxed),
            0
        );
    }
}
