//! Outbound provider client
//!
//! Forwards a transformed request body to the family endpoint and hands
//! back the response byte stream untouched. Non-success statuses surface
//! the provider's body verbatim as a typed error. The proxy never
//! retries a provider call; the client controls that.

use crate::providers::ProviderAdapter;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use mneme_core::{MnemeResult, ProviderError};
use std::pin::Pin;
use std::time::Duration;

/// A streaming provider response.
pub struct ProviderResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Raw response bytes, exactly as the provider sent them
    pub stream: Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>,
}

/// Outbound HTTP client with a wall-clock deadline per call.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    deadline: Duration,
}

impl ProviderClient {
    /// Create a client with the given per-call deadline.
    pub fn new(deadline: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, deadline })
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Forward a transformed body to the provider.
    ///
    /// The body must already be in the family's wire shape; `model` is
    /// the trimmed model identifier used for endpoint construction.
    pub async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        credential: &str,
        model: &str,
        body: &serde_json::Value,
        stream: bool,
    ) -> MnemeResult<ProviderResponse> {
        let family = adapter.family();
        let url = adapter.endpoint(model, stream);

        let request = adapter
            .apply_credential(self.http.post(&url), credential)
            .header("Content-Type", "application/json")
            .json(body);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::DeadlineExceeded { family }
            } else {
                ProviderError::Unreachable {
                    family,
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                family = %family,
                status = status.as_u16(),
                "Provider returned non-success status"
            );
            return Err(ProviderError::RequestFailed {
                family,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let byte_stream = response.bytes_stream().map(move |result| {
            result.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::DeadlineExceeded { family }
                } else {
                    ProviderError::MalformedStream {
                        family,
                        reason: e.to_string(),
                    }
                }
            })
        });

        Ok(ProviderResponse {
            status: status.as_u16(),
            content_type,
            stream: Box::pin(byte_stream),
        })
    }
}
