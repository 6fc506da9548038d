//! Model identifier routing
//!
//! Model identifiers arrive either as `family/name` or as a bare name.
//! Explicit prefixes win; bare names are classified by substring.

use mneme_core::ProviderFamily;

/// A parsed model route: the provider family and the model identifier
/// with the family prefix trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub family: ProviderFamily,
    pub model: String,
}

/// Parse a model identifier into a provider route.
///
/// Recognised prefixes: `openai`, `anthropic`, `google`, `openrouter`,
/// `meta-llama`, `mistral`. Without a prefix the family is inferred:
/// `claude` -> anthropic, `gpt`/`o1`/`o3`/`o4` -> openai,
/// `gemini` -> google, anything else -> openrouter.
pub fn parse_model(model: &str) -> ProviderRoute {
    let model = model.trim();

    if let Some((prefix, rest)) = model.split_once('/') {
        if let Some(family) = ProviderFamily::parse(prefix) {
            if !rest.is_empty() {
                return ProviderRoute {
                    family,
                    model: rest.to_string(),
                };
            }
        }
    }

    ProviderRoute {
        family: infer_family(model),
        model: model.to_string(),
    }
}

fn infer_family(model: &str) -> ProviderFamily {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        ProviderFamily::Anthropic
    } else if lower.contains("gpt")
        || lower.contains("o1")
        || lower.contains("o3")
        || lower.contains("o4")
    {
        ProviderFamily::Openai
    } else if lower.contains("gemini") {
        ProviderFamily::Google
    } else {
        ProviderFamily::Openrouter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_prefixes() {
        let route = parse_model("anthropic/claude-3-opus");
        assert_eq!(route.family, ProviderFamily::Anthropic);
        assert_eq!(route.model, "claude-3-opus");

        let route = parse_model("openai/gpt-4");
        assert_eq!(route.family, ProviderFamily::Openai);
        assert_eq!(route.model, "gpt-4");

        let route = parse_model("meta-llama/llama-3.1-70b-instruct");
        assert_eq!(route.family, ProviderFamily::MetaLlama);
        assert_eq!(route.model, "llama-3.1-70b-instruct");

        let route = parse_model("mistral/mistral-large-latest");
        assert_eq!(route.family, ProviderFamily::Mistral);
        assert_eq!(route.model, "mistral-large-latest");
    }

    #[test]
    fn test_openrouter_keeps_nested_slug() {
        // Only the openrouter/ prefix is trimmed; the nested slug is the model
        let route = parse_model("openrouter/anthropic/claude-3-haiku");
        assert_eq!(route.family, ProviderFamily::Openrouter);
        assert_eq!(route.model, "anthropic/claude-3-haiku");
    }

    #[test]
    fn test_substring_inference() {
        assert_eq!(parse_model("claude-3-sonnet").family, ProviderFamily::Anthropic);
        assert_eq!(parse_model("gpt-4-turbo").family, ProviderFamily::Openai);
        assert_eq!(parse_model("o1-preview").family, ProviderFamily::Openai);
        assert_eq!(parse_model("o3-mini").family, ProviderFamily::Openai);
        assert_eq!(parse_model("gemini-1.5-pro").family, ProviderFamily::Google);
        assert_eq!(
            parse_model("qwen-2.5-72b").family,
            ProviderFamily::Openrouter
        );
    }

    #[test]
    fn test_unknown_prefix_falls_through_to_inference() {
        // "azure/gpt-4" has no recognised prefix; the whole id is classified
        let route = parse_model("azure/gpt-4");
        assert_eq!(route.family, ProviderFamily::Openai);
        assert_eq!(route.model, "azure/gpt-4");
    }

    #[test]
    fn test_inference_is_case_insensitive() {
        assert_eq!(parse_model("Claude-3-Opus").family, ProviderFamily::Anthropic);
        assert_eq!(parse_model("GPT-4o").family, ProviderFamily::Openai);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every model identifier routes somewhere, and an explicit
            /// recognised prefix always wins over substring inference.
            #[test]
            fn prop_routing_is_total_and_prefix_wins(
                name in "[a-z0-9.-]{1,24}",
                family_idx in 0usize..6,
            ) {
                let family = ProviderFamily::ALL[family_idx];
                let prefixed = format!("{}/{}", family.as_str(), name);

                let route = parse_model(&prefixed);
                prop_assert_eq!(route.family, family);
                prop_assert_eq!(route.model, name.clone());

                // Bare names never panic and never keep a recognised prefix
                let bare = parse_model(&name);
                prop_assert!(!bare.model.is_empty());
            }
        }
    }
}
