//! Token estimation contract
//!
//! Billing, budget limits, and quota returns all use the same fixed
//! character-to-token approximation. The ratio is part of the external
//! contract of the system, not an implementation detail: the proxy never
//! attempts exactness against any particular provider's tokenizer.

use crate::message::MessageContent;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Flat token cost attributed to each image content part.
pub const IMAGE_TOKEN_COST: i64 = 85;

/// Estimate the token count of a text string: ceil(chars / 4).
///
/// Deterministic and pure.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 + CHARS_PER_TOKEN as i64 - 1) / CHARS_PER_TOKEN as i64
}

/// Estimate the token count of message content.
///
/// Structured content contributes the sum of its text parts plus a flat
/// [`IMAGE_TOKEN_COST`] per image part.
pub fn estimate_content_tokens(content: &MessageContent) -> i64 {
    match content {
        MessageContent::Text(text) => estimate_tokens(text),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| {
                if part.is_image() {
                    IMAGE_TOKEN_COST
                } else {
                    part.text.as_deref().map(estimate_tokens).unwrap_or(0)
                }
            })
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContentPart;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn test_estimate_content_plain_text() {
        let content = MessageContent::Text("hello world!".to_string());
        assert_eq!(estimate_content_tokens(&content), 3);
    }

    #[test]
    fn test_estimate_bounds_hold_for_arbitrary_text() {
        use proptest::prelude::*;

        proptest!(|(text in ".{0,200}")| {
            let tokens = estimate_tokens(&text);
            let len = text.len() as i64;
            // ceil semantics: within one token of len/4, never negative
            prop_assert!(tokens >= len / CHARS_PER_TOKEN as i64);
            prop_assert!(tokens <= len / CHARS_PER_TOKEN as i64 + 1);
            prop_assert!(tokens >= 0);
        });
    }

    #[test]
    fn test_estimate_content_parts_with_image() {
        let content = MessageContent::Parts(vec![
            ContentPart {
                part_type: "text".to_string(),
                text: Some("abcdefgh".to_string()),
                extra: serde_json::Map::new(),
            },
            ContentPart {
                part_type: "image_url".to_string(),
                text: None,
                extra: serde_json::Map::new(),
            },
        ]);
        assert_eq!(estimate_content_tokens(&content), 2 + IMAGE_TOKEN_COST);
    }
}
