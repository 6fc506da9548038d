//! Per-family provider adapters
//!
//! Each adapter owns three duties: the endpoint and credential header,
//! the request-shape transform, and the streaming delta parser for its
//! wire dialect.

mod anthropic;
mod google;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiCompatAdapter;

use crate::stream::DeltaParser;
use mneme_core::ProviderFamily;

/// Adapter contract for one provider family.
pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    /// Full URL for an inference call against `model`.
    fn endpoint(&self, model: &str, stream: bool) -> String;

    /// Attach the owner's credential to an outbound request.
    fn apply_credential(
        &self,
        req: reqwest::RequestBuilder,
        credential: &str,
    ) -> reqwest::RequestBuilder;

    /// Rewrite the request body into this family's wire shape.
    ///
    /// All adapters strip the per-message `memory` flag (a proxy-internal
    /// field) before forwarding.
    fn transform_request(&self, body: &mut serde_json::Value, model: &str, stream: bool);

    /// A fresh delta parser for this family's streaming dialect.
    fn delta_parser(&self) -> Box<dyn DeltaParser>;

    /// Extract the assistant text from a complete (non-streaming)
    /// response body.
    fn extract_text(&self, body: &serde_json::Value) -> String;
}

/// Look up the adapter for a family.
pub fn adapter_for(family: ProviderFamily) -> &'static dyn ProviderAdapter {
    static ANTHROPIC: AnthropicAdapter = AnthropicAdapter::new();
    static GOOGLE: GoogleAdapter = GoogleAdapter::new();
    static OPENAI: OpenAiCompatAdapter = OpenAiCompatAdapter::openai();
    static OPENROUTER: OpenAiCompatAdapter = OpenAiCompatAdapter::openrouter();
    static MISTRAL: OpenAiCompatAdapter = OpenAiCompatAdapter::mistral();
    static META_LLAMA: OpenAiCompatAdapter = OpenAiCompatAdapter::meta_llama();

    match family {
        ProviderFamily::Anthropic => &ANTHROPIC,
        ProviderFamily::Google => &GOOGLE,
        ProviderFamily::Openai => &OPENAI,
        ProviderFamily::Openrouter => &OPENROUTER,
        ProviderFamily::Mistral => &MISTRAL,
        ProviderFamily::MetaLlama => &META_LLAMA,
    }
}

/// Base-URL override for a family, read from
/// `MNEME_<FAMILY>_BASE_URL` (dashes become underscores). Lets
/// deployments route through internal gateways and lets tests stand in
/// a scripted provider.
pub(crate) fn base_url_override(family: ProviderFamily) -> Option<String> {
    let var = format!(
        "MNEME_{}_BASE_URL",
        family.as_str().to_uppercase().replace('-', "_")
    );
    std::env::var(var)
        .ok()
        .map(|url| url.trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
}

/// Strip the proxy-internal `memory` flag from every message in a body.
pub(crate) fn strip_memory_flags(body: &mut serde_json::Value) {
    if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for message in messages {
            if let Some(obj) = message.as_object_mut() {
                obj.remove("memory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_for_covers_all_families() {
        for family in ProviderFamily::ALL {
            assert_eq!(adapter_for(family).family(), family);
        }
    }

    #[test]
    fn test_strip_memory_flags() {
        let mut body = serde_json::json!({
            "messages": [
                {"role": "user", "content": "hi", "memory": false},
                {"role": "user", "content": "there"}
            ]
        });
        strip_memory_flags(&mut body);
        assert!(body["messages"][0].get("memory").is_none());
    }
}
