//! Subscription events intake
//!
//! Processes external subscription/payment events idempotently:
//! signature verification (HMAC-SHA-256 over `<timestamp>.<raw_body>`,
//! constant-time compare, bounded timestamp skew), insert-once event
//! rows, and per-type handlers driving the owner billing state machine.
//!
//! Replays of a processed event id succeed without re-executing side
//! effects. Handler failures record the error on the row and leave it
//! unprocessed so the source may retry.

use crate::registry::{EventClaim, Registry};
use chrono::Utc;
use hmac::{Hmac, Mac};
use mneme_core::{BillingState, EventError, EventKind, OwnerId, QuotaConfig};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted clock skew between the event timestamp and now.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// SIGNATURE VERIFICATION
// ============================================================================

/// A parsed `X-Event-Signature` header: `t=<unix-secs>,v1=<hex-hmac>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

impl EventSignature {
    /// Parse the signature header.
    pub fn parse(header: &str) -> Result<Self, EventError> {
        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = i64::from_str(value).ok();
                }
                Some(("v1", value)) => {
                    signature = hex::decode(value).ok();
                }
                _ => {}
            }
        }
        match (timestamp, signature) {
            (Some(timestamp), Some(signature)) => Ok(Self {
                timestamp,
                signature,
            }),
            _ => Err(EventError::MalformedPayload {
                reason: "Signature header must be 't=<unix>,v1=<hex>'".to_string(),
            }),
        }
    }
}

/// Verify an event signature against the shared secret.
///
/// The signed message is `<timestamp>.<raw_body>`; comparison is
/// constant-time; the timestamp must fall within `skew` of now.
pub fn verify_signature(
    secret: &str,
    signature: &EventSignature,
    body: &[u8],
    skew: Duration,
) -> Result<(), EventError> {
    let now = Utc::now().timestamp();
    let drift = (now - signature.timestamp).unsigned_abs();
    if drift > skew.as_secs() {
        return Err(EventError::TimestampSkew {
            skew_secs: skew.as_secs() as i64,
        });
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EventError::SignatureInvalid)?;
    mac.update(signature.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(signature.signature.as_slice()).into() {
        Ok(())
    } else {
        Err(EventError::SignatureInvalid)
    }
}

/// Sign a payload the way the external system does. Test and tooling
/// helper; the proxy itself only verifies.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ============================================================================
// EVENT PROCESSING
// ============================================================================

/// Wire shape of an inbound event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct InboundEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Outcome of processing one event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Handler ran; side effects applied exactly once
    Processed,
    /// Event id was already processed; no side effects
    AlreadyProcessed,
    /// Unknown event type; acknowledged without effect
    Ignored,
}

/// Process one verified event.
pub async fn process_event(
    registry: &Registry,
    quota: &QuotaConfig,
    event: InboundEvent,
) -> Result<EventOutcome, EventError> {
    match registry
        .claim_event(&event.id, &event.event_type, event.data.clone())
        .await
    {
        EventClaim::AlreadyProcessed(_) => {
            tracing::debug!(event_id = %event.id, "Event replayed; already processed");
            return Ok(EventOutcome::AlreadyProcessed);
        }
        EventClaim::New | EventClaim::Retry(_) => {}
    }

    let kind = EventKind::parse(&event.event_type);
    if matches!(kind, EventKind::Unknown(_)) {
        // Unknown types succeed without effect and without locking the
        // row, so a later proxy version may still handle them.
        registry.mark_event_processed(&event.id).await;
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring unknown event type");
        return Ok(EventOutcome::Ignored);
    }

    match dispatch(registry, quota, &kind, &event.data).await {
        Ok(()) => {
            registry.mark_event_processed(&event.id).await;
            tracing::info!(event_id = %event.id, event_type = %event.event_type, "Event processed");
            Ok(EventOutcome::Processed)
        }
        Err(e) => {
            registry.mark_event_failed(&event.id, e.to_string()).await;
            Err(EventError::HandlerFailed {
                event_id: event.id,
                reason: e.to_string(),
            })
        }
    }
}

async fn dispatch(
    registry: &Registry,
    quota: &QuotaConfig,
    kind: &EventKind,
    data: &serde_json::Value,
) -> Result<(), EventError> {
    let owner_id = owner_id_from(data)?;
    let owner = registry
        .owner(owner_id)
        .await
        .ok_or_else(|| EventError::MalformedPayload {
            reason: format!("Unknown owner {}", owner_id),
        })?;

    let mut meta = owner.meta.write().await;
    match kind {
        EventKind::SubscriptionCreated => {
            meta.billing_state = BillingState::Active;
            meta.subscription_id = data
                .get("subscription_id")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string());
            meta.grace_deadline = None;
        }
        EventKind::SubscriptionDeleted => {
            meta.billing_state = BillingState::Free;
            meta.subscription_id = None;
            meta.grace_deadline = None;
        }
        EventKind::PaymentFailed => {
            meta.billing_state = BillingState::Grace;
            meta.grace_deadline = Some(
                Utc::now()
                    + chrono::Duration::from_std(quota.grace_window)
                        .unwrap_or_else(|_| chrono::Duration::hours(72)),
            );
        }
        EventKind::PaymentSucceeded => {
            if matches!(
                meta.billing_state,
                BillingState::Grace | BillingState::Suspended | BillingState::PastDue
            ) {
                meta.billing_state = BillingState::Active;
            }
            meta.grace_deadline = None;
        }
        EventKind::InstrumentAttached => {
            meta.has_instrument = true;
        }
        EventKind::InstrumentDetached => {
            meta.has_instrument = false;
        }
        EventKind::Unknown(_) => {}
    }

    Ok(())
}

fn owner_id_from(data: &serde_json::Value) -> Result<OwnerId, EventError> {
    data.get("owner_id")
        .and_then(|o| o.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EventError::MalformedPayload {
            reason: "Missing or invalid owner_id in event data".to_string(),
        })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mneme_core::EntityIdType;
    use std::sync::Arc;

    fn event(id: &str, event_type: &str, owner_id: OwnerId) -> InboundEvent {
        InboundEvent {
            id: id.to_string(),
            event_type: event_type.to_string(),
            data: serde_json::json!({"owner_id": owner_id.to_string()}),
        }
    }

    #[test]
    fn test_signature_roundtrip() {
        let secret = "whsec_test_secret";
        let body = br#"{"id":"evt_1","type":"payment_failed"}"#;
        let now = Utc::now().timestamp();

        let header = sign_payload(secret, now, body);
        let parsed = EventSignature::parse(&header).unwrap();
        assert!(verify_signature(secret, &parsed, body, DEFAULT_SKEW).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let secret = "whsec_test_secret";
        let now = Utc::now().timestamp();
        let header = sign_payload(secret, now, b"original");
        let parsed = EventSignature::parse(&header).unwrap();

        let err = verify_signature(secret, &parsed, b"tampered", DEFAULT_SKEW).unwrap_err();
        assert_eq!(err, EventError::SignatureInvalid);
    }

    #[test]
    fn test_signature_rejects_wrong_secret() {
        let now = Utc::now().timestamp();
        let header = sign_payload("secret_a", now, b"body");
        let parsed = EventSignature::parse(&header).unwrap();

        assert!(verify_signature("secret_b", &parsed, b"body", DEFAULT_SKEW).is_err());
    }

    #[test]
    fn test_signature_rejects_stale_timestamp() {
        let secret = "whsec_test_secret";
        let stale = Utc::now().timestamp() - 600;
        let header = sign_payload(secret, stale, b"body");
        let parsed = EventSignature::parse(&header).unwrap();

        let err = verify_signature(secret, &parsed, b"body", DEFAULT_SKEW).unwrap_err();
        assert!(matches!(err, EventError::TimestampSkew { .. }));
    }

    #[test]
    fn test_signature_parse_rejects_garbage() {
        assert!(EventSignature::parse("not-a-signature").is_err());
        assert!(EventSignature::parse("t=abc,v1=00").is_err());
        assert!(EventSignature::parse("t=123,v1=zz").is_err());
    }

    #[tokio::test]
    async fn test_payment_failed_begins_grace() {
        let registry = Arc::new(Registry::new());
        let quota = QuotaConfig::default();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        owner.meta.write().await.billing_state = BillingState::Active;

        let outcome = process_event(&registry, &quota, event("evt_1", "payment_failed", owner.id))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Processed);

        let meta = owner.meta.read().await;
        assert_eq!(meta.billing_state, BillingState::Grace);
        assert!(meta.grace_deadline.is_some());
    }

    #[tokio::test]
    async fn test_payment_succeeded_recovers_grace() {
        let registry = Arc::new(Registry::new());
        let quota = QuotaConfig::default();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        {
            let mut meta = owner.meta.write().await;
            meta.billing_state = BillingState::Grace;
            meta.grace_deadline = Some(Utc::now() + chrono::Duration::hours(1));
        }

        process_event(&registry, &quota, event("evt_2", "payment_succeeded", owner.id))
            .await
            .unwrap();

        let meta = owner.meta.read().await;
        assert_eq!(meta.billing_state, BillingState::Active);
        assert!(meta.grace_deadline.is_none());
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let quota = QuotaConfig::default();
        let owner = registry.create_owner(OwnerId::now_v7()).await;
        owner.meta.write().await.billing_state = BillingState::Grace;

        let first = process_event(
            &registry,
            &quota,
            event("evt_3", "payment_succeeded", owner.id),
        )
        .await
        .unwrap();
        assert_eq!(first, EventOutcome::Processed);
        assert_eq!(owner.meta.read().await.billing_state, BillingState::Active);

        // Push the owner back into grace out-of-band; a replay of the
        // same event id must NOT flip it again.
        owner.meta.write().await.billing_state = BillingState::Grace;
        let second = process_event(
            &registry,
            &quota,
            event("evt_3", "payment_succeeded", owner.id),
        )
        .await
        .unwrap();
        assert_eq!(second, EventOutcome::AlreadyProcessed);
        assert_eq!(owner.meta.read().await.billing_state, BillingState::Grace);
    }

    #[tokio::test]
    async fn test_unknown_type_acknowledged_without_effect() {
        let registry = Arc::new(Registry::new());
        let quota = QuotaConfig::default();
        let owner = registry.create_owner(OwnerId::now_v7()).await;

        let outcome = process_event(
            &registry,
            &quota,
            event("evt_4", "invoice_finalized", owner.id),
        )
        .await
        .unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(owner.meta.read().await.billing_state, BillingState::Free);
    }

    #[tokio::test]
    async fn test_handler_failure_leaves_row_retriable() {
        let registry = Arc::new(Registry::new());
        let quota = QuotaConfig::default();

        // Unknown owner makes the handler fail
        let bogus = InboundEvent {
            id: "evt_5".to_string(),
            event_type: "payment_failed".to_string(),
            data: serde_json::json!({"owner_id": OwnerId::now_v7().to_string()}),
        };
        assert!(process_event(&registry, &quota, bogus.clone()).await.is_err());

        let row = registry.event("evt_5").await.unwrap();
        assert!(!row.processed);
        assert!(row.error.is_some());

        // After the owner appears, the retry succeeds
        let owner_id: OwnerId = bogus.data["owner_id"].as_str().unwrap().parse().unwrap();
        registry.create_owner(owner_id).await;
        let outcome = process_event(&registry, &quota, bogus).await.unwrap();
        assert_eq!(outcome, EventOutcome::Processed);
    }

    #[tokio::test]
    async fn test_instrument_events_toggle_flag() {
        let registry = Arc::new(Registry::new());
        let quota = QuotaConfig::default();
        let owner = registry.create_owner(OwnerId::now_v7()).await;

        process_event(
            &registry,
            &quota,
            event("evt_6", "payment_instrument_attached", owner.id),
        )
        .await
        .unwrap();
        assert!(owner.meta.read().await.has_instrument);

        process_event(
            &registry,
            &quota,
            event("evt_7", "payment_instrument_detached", owner.id),
        )
        .await
        .unwrap();
        assert!(!owner.meta.read().await.has_instrument);
    }
}
