//! Google generative-language adapter

use super::{strip_memory_flags, ProviderAdapter};
use crate::stream::{DeltaParser, GoogleDeltaParser};
use mneme_core::ProviderFamily;
use serde_json::Value;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleAdapter;

impl GoogleAdapter {
    pub const fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Google
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let base = super::base_url_override(ProviderFamily::Google)
            .unwrap_or_else(|| BASE_URL.to_string());
        if stream {
            format!("{}/models/{}:streamGenerateContent?alt=sse", base, model)
        } else {
            format!("{}/models/{}:generateContent", base, model)
        }
    }

    fn apply_credential(
        &self,
        req: reqwest::RequestBuilder,
        credential: &str,
    ) -> reqwest::RequestBuilder {
        req.header("x-goog-api-key", credential)
    }

    fn transform_request(&self, body: &mut Value, _model: &str, _stream: bool) {
        strip_memory_flags(body);

        // Rebuild into the gemini shape: messages -> contents, system ->
        // systemInstruction, max_tokens -> generationConfig.
        let mut contents = Vec::new();
        let mut system_parts: Vec<String> = Vec::new();

        if let Some(existing) = body.get("system").and_then(|s| s.as_str()) {
            system_parts.push(existing.to_string());
        }

        if let Some(messages) = body.get("messages").and_then(|m| m.as_array()) {
            for message in messages {
                let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("user");
                let text = flatten_content(message.get("content"));
                if role == "system" {
                    system_parts.push(text);
                    continue;
                }
                let gemini_role = if role == "assistant" { "model" } else { "user" };
                contents.push(serde_json::json!({
                    "role": gemini_role,
                    "parts": [{"text": text}]
                }));
            }
        }

        let max_tokens = body.get("max_tokens").and_then(|m| m.as_i64());

        if let Some(obj) = body.as_object_mut() {
            obj.remove("messages");
            obj.remove("system");
            obj.remove("max_tokens");
            obj.remove("model");
            obj.remove("stream");

            obj.insert("contents".to_string(), Value::from(contents));
            if !system_parts.is_empty() {
                obj.insert(
                    "systemInstruction".to_string(),
                    serde_json::json!({"parts": [{"text": system_parts.join("\n\n")}]}),
                );
            }
            if let Some(max_tokens) = max_tokens {
                obj.insert(
                    "generationConfig".to_string(),
                    serde_json::json!({"maxOutputTokens": max_tokens}),
                );
            }
        }
    }

    fn delta_parser(&self) -> Box<dyn DeltaParser> {
        Box::new(GoogleDeltaParser::new())
    }

    fn extract_text(&self, body: &Value) -> String {
        body.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

/// Flatten string-or-parts content into plain text.
fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
