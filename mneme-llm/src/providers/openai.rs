//! OpenAI-compatible chat-completions adapter
//!
//! One adapter covers every family speaking the OpenAI dialect: openai
//! itself, openrouter, mistral, and meta-llama (served through
//! openrouter's catalog, which expects the full `meta-llama/...` slug).

use super::{strip_memory_flags, ProviderAdapter};
use crate::stream::{DeltaParser, OpenAiDeltaParser};
use mneme_core::ProviderFamily;
use serde_json::Value;

pub struct OpenAiCompatAdapter {
    family: ProviderFamily,
    base_url: &'static str,
    /// Slug prefix re-applied to the trimmed model id, when the upstream
    /// catalog is namespaced (meta-llama via openrouter)
    model_prefix: Option<&'static str>,
}

impl OpenAiCompatAdapter {
    pub const fn openai() -> Self {
        Self {
            family: ProviderFamily::Openai,
            base_url: "https://api.openai.com/v1",
            model_prefix: None,
        }
    }

    pub const fn openrouter() -> Self {
        Self {
            family: ProviderFamily::Openrouter,
            base_url: "https://openrouter.ai/api/v1",
            model_prefix: None,
        }
    }

    pub const fn mistral() -> Self {
        Self {
            family: ProviderFamily::Mistral,
            base_url: "https://api.mistral.ai/v1",
            model_prefix: None,
        }
    }

    pub const fn meta_llama() -> Self {
        Self {
            family: ProviderFamily::MetaLlama,
            base_url: "https://openrouter.ai/api/v1",
            model_prefix: Some("meta-llama/"),
        }
    }

    fn upstream_model(&self, model: &str) -> String {
        match self.model_prefix {
            Some(prefix) => format!("{}{}", prefix, model),
            None => model.to_string(),
        }
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    fn endpoint(&self, _model: &str, _stream: bool) -> String {
        let base = super::base_url_override(self.family)
            .unwrap_or_else(|| self.base_url.to_string());
        format!("{}/chat/completions", base)
    }

    fn apply_credential(
        &self,
        req: reqwest::RequestBuilder,
        credential: &str,
    ) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", credential))
    }

    fn transform_request(&self, body: &mut Value, model: &str, stream: bool) {
        strip_memory_flags(body);

        // Messages-style input carries a top-level `system` field; the
        // chat dialect wants it as the leading system message.
        let system = body
            .as_object_mut()
            .and_then(|obj| obj.remove("system"))
            .and_then(|s| s.as_str().map(|s| s.to_string()));

        if let Some(system) = system {
            if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
                messages.insert(
                    0,
                    serde_json::json!({"role": "system", "content": system}),
                );
            }
        }

        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::from(self.upstream_model(model)));
            obj.insert("stream".to_string(), Value::from(stream));
        }
    }

    fn delta_parser(&self) -> Box<dyn DeltaParser> {
        Box::new(OpenAiDeltaParser::new())
    }

    fn extract_text(&self, body: &Value) -> String {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string()
    }
}
