//! Anthropic messages-API adapter

use super::{strip_memory_flags, ProviderAdapter};
use crate::stream::{AnthropicDeltaParser, DeltaParser};
use mneme_core::ProviderFamily;
use serde_json::Value;

const BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Fallback when the caller supplied no maximum-output-tokens value;
/// the anthropic API rejects requests without one.
const DEFAULT_MAX_TOKENS: i64 = 4096;

pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub const fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn endpoint(&self, _model: &str, _stream: bool) -> String {
        let base = super::base_url_override(ProviderFamily::Anthropic)
            .unwrap_or_else(|| BASE_URL.to_string());
        format!("{}/messages", base)
    }

    fn apply_credential(
        &self,
        req: reqwest::RequestBuilder,
        credential: &str,
    ) -> reqwest::RequestBuilder {
        req.header("x-api-key", credential)
            .header("anthropic-version", API_VERSION)
    }

    fn transform_request(&self, body: &mut Value, model: &str, stream: bool) {
        strip_memory_flags(body);

        // Lift system-role entries out of the message list into the
        // top-level `system` field, preserving any value already there.
        let mut system_parts: Vec<String> = Vec::new();
        if let Some(existing) = body.get("system").and_then(|s| s.as_str()) {
            system_parts.push(existing.to_string());
        }
        if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
            messages.retain(|message| {
                let is_system = message.get("role").and_then(|r| r.as_str()) == Some("system");
                if is_system {
                    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
                        system_parts.push(text.to_string());
                    }
                }
                !is_system
            });
        }

        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::from(model));
            obj.insert("stream".to_string(), Value::from(stream));
            if !system_parts.is_empty() {
                obj.insert(
                    "system".to_string(),
                    Value::from(system_parts.join("\n\n")),
                );
            }
            // Required by the API
            if !obj.contains_key("max_tokens") {
                obj.insert("max_tokens".to_string(), Value::from(DEFAULT_MAX_TOKENS));
            }
        }
    }

    fn delta_parser(&self) -> Box<dyn DeltaParser> {
        Box::new(AnthropicDeltaParser::new())
    }

    fn extract_text(&self, body: &Value) -> String {
        body.get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}
