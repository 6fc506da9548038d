//! Inbound message model
//!
//! Both inference surfaces accept the same `{role, content[, memory]}`
//! message shape. Content is either a plain string or an array of typed
//! parts; unrecognised part fields are carried through untouched so the
//! router can forward them verbatim.

use serde::{Deserialize, Serialize};

/// A single message in an inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatMessage {
    /// Message role: "system", "user", or "assistant"
    pub role: String,
    /// Message content: plain string or structured parts
    pub content: MessageContent,
    /// Per-message memory flag. When false the message is ephemeral:
    /// forwarded to the provider but never persisted, counted separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<bool>,
}

impl ChatMessage {
    /// Whether this message may be persisted by the storer.
    pub fn is_memorable(&self) -> bool {
        self.memory.unwrap_or(true)
    }

    /// Flattened text of the content (structured parts joined by newlines).
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Message content: a plain string or an array of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flattened text: text parts joined by newlines, image parts skipped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether the content carries no text at all.
    pub fn is_blank(&self) -> bool {
        self.text().trim().is_empty()
    }
}

/// One part of structured message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ContentPart {
    /// Part type, e.g. "text", "image_url", "image"
    #[serde(rename = "type")]
    pub part_type: String,
    /// Text payload for text parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining fields, forwarded verbatim
    #[serde(flatten)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentPart {
    /// Whether this part is an image (any provider dialect).
    pub fn is_image(&self) -> bool {
        self.part_type.starts_with("image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_untagged_deserialization() -> Result<(), serde_json::Error> {
        let plain: MessageContent = serde_json::from_str("\"hello\"")?;
        assert_eq!(plain, MessageContent::Text("hello".to_string()));

        let parts: MessageContent = serde_json::from_str(
            r#"[{"type": "text", "text": "a"}, {"type": "image_url", "image_url": {"url": "http://x"}}]"#,
        )?;
        match &parts {
            MessageContent::Parts(p) => {
                assert_eq!(p.len(), 2);
                assert!(p[1].is_image());
                assert!(p[1].extra.contains_key("image_url"));
            }
            _ => panic!("expected parts"),
        }
        Ok(())
    }

    #[test]
    fn test_message_memorable_default() -> Result<(), serde_json::Error> {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role": "user", "content": "hi"}"#)?;
        assert!(msg.is_memorable());

        let msg: ChatMessage =
            serde_json::from_str(r#"{"role": "user", "content": "hi", "memory": false}"#)?;
        assert!(!msg.is_memorable());
        Ok(())
    }

    #[test]
    fn test_flattened_text_skips_images() {
        let content = MessageContent::Parts(vec![
            ContentPart {
                part_type: "text".to_string(),
                text: Some("first".to_string()),
                extra: serde_json::Map::new(),
            },
            ContentPart {
                part_type: "image_url".to_string(),
                text: None,
                extra: serde_json::Map::new(),
            },
            ContentPart {
                part_type: "text".to_string(),
                text: Some("second".to_string()),
                extra: serde_json::Map::new(),
            },
        ]);
        assert_eq!(content.text(), "first\nsecond");
        assert!(!content.is_blank());
    }
}
