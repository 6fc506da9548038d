//! Capture tee
//!
//! Fans a provider byte stream into two independent consumers: one
//! forwarded byte-for-byte to the client, one parsed by the family delta
//! parser into the accumulated assistant text for the storer.
//!
//! Backpressure rules: the client branch never blocks on the capture
//! branch. Capture bytes are buffered up to a bounded cap; past it,
//! capture is abandoned with a flag (the client still receives the full
//! response; storage for it is skipped and recorded as such). If the
//! client disconnects mid-stream, capture continues up to a short grace
//! deadline so what the provider actually produced can still be stored.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use mneme_core::{ProviderError, TeeConfig};
use mneme_llm::{DeltaParser, StreamEvent};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the capture branch saw by the time the stream closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Accumulated assistant text
    pub text: String,
    /// Terminal marker seen, or the upstream ended cleanly
    pub completed: bool,
    /// Capture buffer overflowed; storage must be skipped and flagged
    pub abandoned: bool,
}

/// The two ends of a running tee.
pub struct Tee {
    /// Client branch: forward byte-for-byte
    pub client_rx: mpsc::Receiver<Result<Bytes, io::Error>>,
    /// Resolves when the capture branch finishes
    pub capture: JoinHandle<CaptureOutcome>,
}

type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Spawn the tee over a provider stream.
pub fn spawn_tee(
    mut upstream: UpstreamStream,
    mut parser: Box<dyn DeltaParser>,
    config: TeeConfig,
) -> Tee {
    let (client_tx, client_rx) = mpsc::channel::<Result<Bytes, io::Error>>(config.channel_capacity);
    let (capture_tx, mut capture_rx) = mpsc::channel::<Bytes>(config.channel_capacity);

    let inflight = Arc::new(AtomicUsize::new(0));
    let abandoned = Arc::new(AtomicBool::new(false));
    let clean_end = Arc::new(AtomicBool::new(false));

    // Producer: reads upstream once, feeds both branches.
    let producer_inflight = inflight.clone();
    let producer_abandoned = abandoned.clone();
    let producer_clean_end = clean_end.clone();
    tokio::spawn(async move {
        let mut capture_tx = Some(capture_tx);
        let mut client_open = true;
        let mut disconnected_at: Option<Instant> = None;

        loop {
            // After a client disconnect the grace window bounds how long
            // the capture branch keeps draining the provider.
            let item = match disconnected_at {
                None => upstream.next().await,
                Some(at) => {
                    let remaining = config
                        .disconnect_grace
                        .checked_sub(at.elapsed())
                        .unwrap_or_default();
                    match tokio::time::timeout(remaining, upstream.next()).await {
                        Ok(item) => item,
                        Err(_) => {
                            tracing::debug!("Capture grace window elapsed after client disconnect");
                            break;
                        }
                    }
                }
            };

            let Some(item) = item else {
                producer_clean_end.store(true, Ordering::SeqCst);
                break;
            };

            match item {
                Ok(chunk) => {
                    if client_open {
                        if client_tx.send(Ok(chunk.clone())).await.is_err() {
                            client_open = false;
                            disconnected_at = Some(Instant::now());
                        }
                    }

                    if let Some(tx) = &capture_tx {
                        let len = chunk.len();
                        let buffered = producer_inflight.load(Ordering::SeqCst);
                        let overflow = buffered + len > config.capture_buffer_bytes;
                        let sent = !overflow && tx.try_send(chunk).is_ok();
                        if sent {
                            producer_inflight.fetch_add(len, Ordering::SeqCst);
                        } else {
                            producer_abandoned.store(true, Ordering::SeqCst);
                            capture_tx = None;
                            tracing::warn!(
                                buffered,
                                cap = config.capture_buffer_bytes,
                                "Capture branch fell behind; abandoning capture"
                            );
                        }
                    }

                    if !client_open && capture_tx.is_none() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Provider stream error mid-flight");
                    if client_open {
                        // Terminate the forward branch; no trailing JSON
                        // is injected into a stream that already produced
                        // deltas.
                        let _ = client_tx.send(Err(io::Error::other(e))).await;
                    }
                    break;
                }
            }
        }
    });

    // Capture consumer: parse deltas into the accumulated text.
    let capture = tokio::spawn(async move {
        let mut text = String::new();
        let mut done = false;
        while let Some(chunk) = capture_rx.recv().await {
            inflight.fetch_sub(chunk.len(), Ordering::SeqCst);
            for event in parser.feed(&chunk) {
                match event {
                    StreamEvent::Delta(delta) => text.push_str(&delta),
                    StreamEvent::Done => done = true,
                }
            }
        }
        CaptureOutcome {
            text,
            completed: done || clean_end.load(Ordering::SeqCst),
            abandoned: abandoned.load(Ordering::SeqCst),
        }
    });

    Tee { client_rx, capture }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mneme_llm::providers::{adapter_for, ProviderAdapter};
    use mneme_core::ProviderFamily;
    use std::time::Duration;

    fn sse_frames(payloads: &[&str]) -> Vec<Result<Bytes, ProviderError>> {
        payloads
            .iter()
            .map(|p| Ok(Bytes::from(format!("data: {}\n\n", p))))
            .collect()
    }

    fn openai_parser() -> Box<dyn DeltaParser> {
        adapter_for(ProviderFamily::Openai).delta_parser()
    }

    fn config() -> TeeConfig {
        TeeConfig {
            capture_buffer_bytes: 4096,
            channel_capacity: 8,
            disconnect_grace: Duration::from_millis(200),
        }
    }

    fn delta_frame(text: &str) -> String {
        format!(r#"{{"choices":[{{"delta":{{"content":"{}"}}}}]}}"#, text)
    }

    #[tokio::test]
    async fn test_client_receives_bytes_in_order() {
        let frames = sse_frames(&[
            &delta_frame("Hello, "),
            &delta_frame("world"),
            &delta_frame("."),
            "[DONE]",
        ]);
        let upstream = Box::pin(futures_util::stream::iter(frames));
        let mut tee = spawn_tee(upstream, openai_parser(), config());

        let mut received = Vec::new();
        while let Some(chunk) = tee.client_rx.recv().await {
            received.push(chunk.unwrap());
        }
        let all = received.concat();
        let text = String::from_utf8(all).unwrap();

        let hello = text.find("Hello, ").unwrap();
        let world = text.find("world").unwrap();
        let period = text.find(r#""."#).unwrap();
        assert!(hello < world && world < period);

        let outcome = tee.capture.await.unwrap();
        assert_eq!(outcome.text, "Hello, world.");
        assert!(outcome.completed);
        assert!(!outcome.abandoned);
    }

    #[tokio::test]
    async fn test_capture_continues_after_client_disconnect() {
        let frames = sse_frames(&[&delta_frame("early "), &delta_frame("late"), "[DONE]"]);
        let upstream = Box::pin(futures_util::stream::iter(frames));
        let tee = spawn_tee(upstream, openai_parser(), config());

        // Drop the client immediately
        drop(tee.client_rx);

        let outcome = tee.capture.await.unwrap();
        assert_eq!(outcome.text, "early late");
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn test_disconnect_grace_bounds_capture() {
        // A stream that yields one frame then stalls forever
        let first = sse_frames(&[&delta_frame("partial ")]);
        let upstream = Box::pin(
            futures_util::stream::iter(first).chain(futures_util::stream::pending()),
        );
        let tee = spawn_tee(upstream, openai_parser(), config());
        drop(tee.client_rx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), tee.capture)
            .await
            .expect("capture must end within the grace window")
            .unwrap();
        assert_eq!(outcome.text, "partial ");
        assert!(!outcome.completed);
        assert!(!outcome.abandoned);
    }

    #[tokio::test]
    async fn test_capture_overflow_abandons_without_blocking_client() {
        // Tiny capture budget; client keeps reading everything
        let tee_config = TeeConfig {
            capture_buffer_bytes: 16,
            channel_capacity: 2,
            disconnect_grace: Duration::from_millis(100),
        };
        let mut frames = Vec::new();
        for i in 0..50 {
            frames.push(delta_frame(&format!("chunk number {} ", i)));
        }
        frames.push("[DONE]".to_string());
        let frame_refs: Vec<&str> = frames.iter().map(|s| s.as_str()).collect();
        let upstream = Box::pin(futures_util::stream::iter(sse_frames(&frame_refs)));

        let mut tee = spawn_tee(upstream, openai_parser(), tee_config);

        let mut total = 0;
        while let Some(chunk) = tee.client_rx.recv().await {
            total += chunk.unwrap().len();
        }
        // Client got the whole response
        assert!(total > 1000);

        let outcome = tee.capture.await.unwrap();
        assert!(outcome.abandoned);
    }

    #[tokio::test]
    async fn test_provider_error_terminates_forward_branch() {
        let frames: Vec<Result<Bytes, ProviderError>> = vec![
            Ok(Bytes::from(format!("data: {}\n\n", delta_frame("begin ")))),
            Err(ProviderError::MalformedStream {
                family: ProviderFamily::Openai,
                reason: "connection reset".to_string(),
            }),
        ];
        let upstream = Box::pin(futures_util::stream::iter(frames));
        let mut tee = spawn_tee(upstream, openai_parser(), config());

        let first = tee.client_rx.recv().await.unwrap();
        assert!(first.is_ok());
        let second = tee.client_rx.recv().await.unwrap();
        assert!(second.is_err());
        assert!(tee.client_rx.recv().await.is_none());

        let outcome = tee.capture.await.unwrap();
        assert_eq!(outcome.text, "begin ");
        assert!(!outcome.completed);
    }
}
