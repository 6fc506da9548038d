//! Request orchestrator
//!
//! Owns the per-request lifecycle of an inference call: admission,
//! memory-control parsing, retrieval and preamble splicing, credential
//! selection, provider forwarding, the capture tee, and the off-path
//! store + meter step. The client response never waits on storage or
//! metering.

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::tee::{spawn_tee, CaptureOutcome};
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::StreamExt;
use mneme_core::{
    estimate_content_tokens, ChatMessage, ContextId, EntityIdType, MemoryMode, MnemeError,
    ProviderError, ProviderFamily, RecencyBias, RequestId, SessionId,
};
use mneme_engine::{render_preamble, PreambleEntry, RetrievedSet, StoreOutcome, StoreRequest};
use mneme_llm::{adapter_for, parse_model};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

// ============================================================================
// REQUEST SHAPE
// ============================================================================

/// Which inbound surface the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Chat-style: `{model, messages[, session_id, stream, ...]}`
    Chat,
    /// Messages-style: adds required `max_tokens` and optional `system`
    Messages,
}

/// Parsed memory-control inputs for one request.
#[derive(Debug, Clone)]
pub struct MemoryControls {
    pub session: SessionId,
    pub mode: MemoryMode,
    pub store_input: bool,
    pub store_response: bool,
    pub context_limit: usize,
    pub recency_bias: RecencyBias,
}

/// Parse the memory-control headers and body fields.
///
/// Session precedence: `X-Session-ID` header, then body `session_id`,
/// then the context id itself.
pub fn parse_controls(
    headers: &HeaderMap,
    body: &Value,
    ctx: &ContextId,
    default_limit: usize,
) -> ApiResult<MemoryControls> {
    let header_str = |name: &str| -> Option<&str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    };

    let session = header_str("x-session-id")
        .map(|s| s.to_string())
        .or_else(|| {
            body.get("session_id")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
        })
        .map(|s| {
            SessionId::new(s)
                .ok_or_else(|| ApiError::invalid_format("session_id", "1-128 characters"))
        })
        .transpose()?
        .unwrap_or_else(|| SessionId::for_context(ctx));

    let mode = header_str("x-memory-mode")
        .map(|s| {
            s.parse::<MemoryMode>()
                .map_err(|_| ApiError::invalid_format("X-Memory-Mode", "auto|read|write|off"))
        })
        .transpose()?
        .unwrap_or_default();

    let parse_bool = |name: &str| -> ApiResult<Option<bool>> {
        header_str(name)
            .map(|s| match s.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ApiError::invalid_format(name, "true|false")),
            })
            .transpose()
    };

    let store_input = parse_bool("x-memory-store")?.unwrap_or(true);
    let store_response = parse_bool("x-memory-store-response")?.unwrap_or(true);

    let context_limit = header_str("x-memory-context-limit")
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| ApiError::invalid_format("X-Memory-Context-Limit", "integer"))
        })
        .transpose()?
        .unwrap_or(default_limit);

    let recency_bias = header_str("x-memory-recency-bias")
        .map(|s| {
            s.parse::<RecencyBias>()
                .map_err(|_| ApiError::invalid_format("X-Memory-Recency-Bias", "low|medium|high"))
        })
        .transpose()?
        .unwrap_or_default();

    Ok(MemoryControls {
        session,
        mode,
        store_input,
        store_response,
        context_limit,
        recency_bias,
    })
}

/// Validate the request body for its surface; returns (model, messages).
pub fn validate_body(surface: Surface, body: &Value) -> ApiResult<(String, Vec<ChatMessage>)> {
    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("model"))?
        .to_string();

    let raw_messages = body
        .get("messages")
        .and_then(|m| m.as_array())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::missing_field("messages"))?;

    for message in raw_messages {
        let role = message
            .get("role")
            .and_then(|r| r.as_str())
            .ok_or_else(|| ApiError::missing_field("messages[].role"))?;
        if !matches!(role, "system" | "user" | "assistant") {
            return Err(ApiError::unsupported_role(role));
        }
    }

    let messages: Vec<ChatMessage> = serde_json::from_value(Value::Array(raw_messages.clone()))
        .map_err(|e| ApiError::validation_failed(format!("Invalid messages: {}", e)))?;

    if surface == Surface::Messages {
        body.get("max_tokens")
            .and_then(|m| m.as_i64())
            .filter(|m| *m > 0)
            .ok_or_else(|| ApiError::missing_field("max_tokens"))?;
    }

    Ok((model, messages))
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run one inference call end to end.
pub async fn run_inference(
    state: AppState,
    auth: AuthContext,
    headers: HeaderMap,
    mut body: Value,
    surface: Surface,
) -> ApiResult<Response> {
    let request_id = RequestId::now_v7();
    let ctx = auth.context.id.clone();

    // Admission before any work.
    let admission = state.quota.admit(&auth.owner).await?;

    let (model, messages) = validate_body(surface, &body)?;
    let controls = parse_controls(
        &headers,
        &body,
        &ctx,
        state.engine.config().default_limit,
    )?;
    let route = parse_model(&model);
    let stream = body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);

    tracing::info!(
        request_id = %request_id,
        context = %ctx,
        session = %controls.session,
        model = %model,
        family = %route.family,
        mode = controls.mode.as_str(),
        stream,
        "Inference request"
    );

    // Retrieval; engine failures degrade to an empty preamble.
    let retrieved = if controls.mode.reads() {
        retrieve_for(&state, &ctx, &controls, &messages, request_id).await
    } else {
        RetrievedSet::empty()
    };
    let retrieved_tokens = retrieved.total_tokens();

    if !retrieved.is_empty() {
        let entries: Vec<PreambleEntry> = retrieved
            .chunks
            .iter()
            .map(|chunk| PreambleEntry {
                role: chunk.role,
                window: Some(chunk.window),
                content: chunk.content.clone(),
            })
            .collect();
        let preamble = render_preamble(&model, &entries);
        if !preamble.is_empty() {
            splice_preamble(&mut body, surface, &preamble);
        }
    }

    // Credential by family; BYOK, the proxy never pays the provider.
    let credential = state
        .registry
        .use_credential(auth.owner.id, route.family)
        .await
        .ok_or_else(|| {
            MnemeError::from(ProviderError::MissingCredential {
                family: route.family,
            })
        })?;

    // Forward.
    let adapter = adapter_for(route.family);
    let mut forward_body = body.clone();
    if let Some(obj) = forward_body.as_object_mut() {
        obj.remove("session_id");
    }
    adapter.transform_request(&mut forward_body, &route.model, stream);

    let provider_response = match state
        .provider_client
        .dispatch(adapter, &credential, &route.model, &forward_body, stream)
        .await
    {
        Ok(response) => response,
        Err(MnemeError::Provider(ProviderError::RequestFailed {
            family,
            status,
            body,
        })) => {
            // Pass provider status and body through verbatim.
            return Ok(passthrough_error(request_id, family, status, body));
        }
        Err(e) => return Err(e.into()),
    };

    let stored_estimate = stored_tokens_estimate(&controls, &messages);
    let response_headers = memory_headers(
        request_id,
        &controls,
        retrieved_tokens,
        stored_estimate,
        &admission,
    );

    // Serve the response; capture and persist off the critical path.
    let response = if stream {
        let tee = spawn_tee(
            provider_response.stream,
            adapter.delta_parser(),
            state.config.tee.clone(),
        );

        spawn_persist_after_capture(
            state.clone(),
            auth.clone(),
            controls.clone(),
            model.clone(),
            route.family,
            request_id,
            messages,
            retrieved_tokens,
            tee.capture,
        );

        build_response(
            StatusCode::OK,
            provider_response
                .content_type
                .as_deref()
                .unwrap_or("text/event-stream"),
            response_headers,
            Body::from_stream(ReceiverStream::new(tee.client_rx)),
        )
    } else {
        let mut collected: Vec<u8> = Vec::new();
        let mut upstream = provider_response.stream;
        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(MnemeError::from).map_err(ApiError::from)?;
            collected.extend_from_slice(&chunk);
        }

        let text = serde_json::from_slice::<Value>(&collected)
            .map(|v| adapter.extract_text(&v))
            .unwrap_or_default();

        spawn_persist(
            state.clone(),
            auth.clone(),
            controls.clone(),
            model.clone(),
            route.family,
            request_id,
            messages,
            retrieved_tokens,
            CaptureOutcome {
                text,
                completed: true,
                abandoned: false,
            },
        );

        build_response(
            StatusCode::from_u16(provider_response.status)
                .unwrap_or(StatusCode::OK),
            provider_response
                .content_type
                .as_deref()
                .unwrap_or("application/json"),
            response_headers,
            Body::from(collected),
        )
    };

    Ok(response)
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// Query extraction: the most recent user message carries the intent.
fn extract_query(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.text())
        .unwrap_or_default()
}

async fn retrieve_for(
    state: &AppState,
    ctx: &ContextId,
    controls: &MemoryControls,
    messages: &[ChatMessage],
    request_id: RequestId,
) -> RetrievedSet {
    let query = extract_query(messages);
    if query.trim().is_empty() {
        return RetrievedSet::empty();
    }

    let result = async {
        let index = state.pool.get(ctx).await?;
        state
            .engine
            .retrieve(
                index.as_ref(),
                ctx,
                &controls.session,
                &query,
                controls.context_limit,
                controls.recency_bias,
                Utc::now(),
            )
            .await
    }
    .await;

    match result {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                context = %ctx,
                error = %e,
                "Retrieval failed; continuing with empty preamble"
            );
            RetrievedSet::empty()
        }
    }
}

/// Splice the preamble into the outbound request: prepend to an existing
/// system entry, or insert a new one at the head.
fn splice_preamble(body: &mut Value, surface: Surface, preamble: &str) {
    match surface {
        Surface::Messages => {
            let existing = body.get("system").and_then(|s| s.as_str());
            let combined = match existing {
                Some(existing) if !existing.is_empty() => {
                    format!("{}\n\n{}", preamble, existing)
                }
                _ => preamble.to_string(),
            };
            if let Some(obj) = body.as_object_mut() {
                obj.insert("system".to_string(), Value::from(combined));
            }
        }
        Surface::Chat => {
            if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
                let leading_system = messages
                    .first_mut()
                    .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("system"));
                match leading_system {
                    Some(message) => {
                        let existing = message
                            .get("content")
                            .and_then(|c| c.as_str())
                            .unwrap_or_default();
                        let combined = format!("{}\n\n{}", preamble, existing);
                        if let Some(obj) = message.as_object_mut() {
                            obj.insert("content".to_string(), Value::from(combined));
                        }
                    }
                    None => {
                        messages.insert(
                            0,
                            serde_json::json!({"role": "system", "content": preamble}),
                        );
                    }
                }
            }
        }
    }
}

// ============================================================================
// RESPONSE ASSEMBLY
// ============================================================================

/// Approximate stored-token count advertised in headers; the async store
/// settles the exact figure afterwards.
fn stored_tokens_estimate(controls: &MemoryControls, messages: &[ChatMessage]) -> i64 {
    if !controls.mode.writes() || !controls.store_input {
        return 0;
    }
    messages
        .iter()
        .filter(|m| m.role != "system" && m.is_memorable())
        .map(|m| estimate_content_tokens(&m.content))
        .sum()
}

fn memory_headers(
    request_id: RequestId,
    controls: &MemoryControls,
    retrieved_tokens: i64,
    stored_estimate: i64,
    admission: &crate::quota::Admission,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let insert = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };

    insert(&mut headers, "x-request-id", request_id.to_string());
    insert(
        &mut headers,
        "x-memory-session",
        controls.session.to_string(),
    );
    insert(
        &mut headers,
        "x-memory-tokens-retrieved",
        retrieved_tokens.to_string(),
    );
    insert(
        &mut headers,
        "x-memory-tokens-stored",
        stored_estimate.to_string(),
    );
    insert(
        &mut headers,
        "x-quota-used",
        admission.used_tokens.to_string(),
    );
    insert(
        &mut headers,
        "x-quota-remaining",
        admission
            .remaining_tokens
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unlimited".to_string()),
    );
    if let Some(warning) = &admission.billing_warning {
        insert(&mut headers, "x-billing-warning", warning.clone());
    }
    if let Some(grace_ends) = admission.grace_ends {
        insert(&mut headers, "x-grace-period-ends", grace_ends.to_rfc3339());
    }

    headers
}

fn build_response(
    status: StatusCode,
    content_type: &str,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let mut response = Response::builder().status(status);
    if let Some(map) = response.headers_mut() {
        map.extend(headers);
        if let Ok(value) = HeaderValue::from_str(content_type) {
            map.insert(header::CONTENT_TYPE, value);
        }
    }
    response.body(body).unwrap_or_else(|_| {
        ApiError::internal_error("Failed to build response").into_response()
    })
}

fn passthrough_error(
    request_id: RequestId,
    family: ProviderFamily,
    status: u16,
    body: String,
) -> Response {
    tracing::warn!(
        request_id = %request_id,
        family = %family,
        status,
        "Passing provider error through verbatim"
    );
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert("x-request-id", value);
    }
    build_response(
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
        "application/json",
        headers,
        Body::from(body),
    )
}

// ============================================================================
// OFF-PATH PERSISTENCE
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn spawn_persist_after_capture(
    state: AppState,
    auth: AuthContext,
    controls: MemoryControls,
    model: String,
    family: ProviderFamily,
    request_id: RequestId,
    messages: Vec<ChatMessage>,
    retrieved_tokens: i64,
    capture: tokio::task::JoinHandle<CaptureOutcome>,
) {
    tokio::spawn(async move {
        let outcome = match capture.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Capture task failed");
                CaptureOutcome {
                    text: String::new(),
                    completed: false,
                    abandoned: true,
                }
            }
        };
        persist(
            state,
            auth,
            controls,
            model,
            family,
            request_id,
            messages,
            retrieved_tokens,
            outcome,
        )
        .await;
    });
}

#[allow(clippy::too_many_arguments)]
fn spawn_persist(
    state: AppState,
    auth: AuthContext,
    controls: MemoryControls,
    model: String,
    family: ProviderFamily,
    request_id: RequestId,
    messages: Vec<ChatMessage>,
    retrieved_tokens: i64,
    capture: CaptureOutcome,
) {
    tokio::spawn(async move {
        persist(
            state,
            auth,
            controls,
            model,
            family,
            request_id,
            messages,
            retrieved_tokens,
            capture,
        )
        .await;
    });
}

/// The off-path store + meter step: bounded by its own deadline and
/// retried once on failure. Storage failures never fail the client
/// request; they set the partial-usage flag on the usage record.
#[allow(clippy::too_many_arguments)]
async fn persist(
    state: AppState,
    auth: AuthContext,
    controls: MemoryControls,
    model: String,
    family: ProviderFamily,
    request_id: RequestId,
    messages: Vec<ChatMessage>,
    retrieved_tokens: i64,
    capture: CaptureOutcome,
) {
    let ctx = auth.context.id.clone();
    let mut outcome = StoreOutcome::default();
    let mut storage_deferred = false;

    if controls.mode.writes() {
        let store_response = controls.store_response && !capture.abandoned;
        storage_deferred |= capture.abandoned && controls.store_response;

        let deadline = state.config.timeouts.persist_deadline;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let attempt = tokio::time::timeout(deadline, async {
                let index = state.pool.get(&ctx).await?;
                state
                    .storer
                    .store(
                        index.as_ref(),
                        StoreRequest {
                            ctx: &ctx,
                            session: &controls.session,
                            model: &model,
                            provider_family: family,
                            request_id,
                            input_messages: &messages,
                            assistant_output: &capture.text,
                            store_input: controls.store_input,
                            store_response,
                        },
                    )
                    .await
            })
            .await;

            match attempt {
                Ok(Ok(result)) => {
                    outcome = result;
                    break;
                }
                Ok(Err(e)) if attempts < 2 => {
                    tracing::warn!(request_id = %request_id, error = %e, "Store failed; retrying once");
                }
                Err(_) if attempts < 2 => {
                    tracing::warn!(request_id = %request_id, "Store deadline exceeded; retrying once");
                }
                Ok(Err(e)) => {
                    tracing::error!(request_id = %request_id, error = %e, "Store failed; flagging partial usage");
                    storage_deferred = true;
                    break;
                }
                Err(_) => {
                    tracing::error!(request_id = %request_id, "Store deadline exceeded; flagging partial usage");
                    storage_deferred = true;
                    break;
                }
            }
        }
    }

    state
        .quota
        .meter(
            &auth.owner,
            &ctx,
            &controls.session,
            request_id,
            &model,
            family,
            outcome,
            retrieved_tokens,
            storage_deferred,
        )
        .await;
}

// ============================================================================
// TESTS
// ============================================================================
