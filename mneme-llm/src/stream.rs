//! Streaming delta parsers
//!
//! Each provider family speaks its own SSE dialect. A [`DeltaParser`]
//! consumes raw bytes from the capture branch of the tee and yields the
//! incremental assistant text plus the terminal marker. Parsers tolerate
//! frames split across arbitrary byte boundaries.

// ============================================================================
// EVENTS AND TRAIT
// ============================================================================

/// One parsed event from a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental assistant text
    Delta(String),
    /// Terminal marker; no further deltas follow
    Done,
}

/// Incremental parser over a provider byte stream.
pub trait DeltaParser: Send {
    /// Feed raw bytes, returning any events completed by them.
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent>;
}

// ============================================================================
// SSE FRAMING
// ============================================================================

/// Line framer for server-sent events.
///
/// Buffers partial lines across feeds and yields the payload of each
/// complete `data:` line. Invalid UTF-8 is replaced, never fatal.
#[derive(Debug, Default)]
pub struct SseFramer {
    buf: String,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the complete `data:` payloads they finished.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

// ============================================================================
// ANTHROPIC DIALECT
// ============================================================================

/// Parser for the anthropic streaming dialect:
/// `content_block_delta` events carry `delta.text`; `message_stop` ends
/// the stream.
#[derive(Debug, Default)]
pub struct AnthropicDeltaParser {
    framer: SseFramer,
    done: bool,
}

impl AnthropicDeltaParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeltaParser for AnthropicDeltaParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for payload in self.framer.feed(bytes) {
            if self.done {
                break;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
                continue;
            };
            match value.get("type").and_then(|t| t.as_str()) {
                Some("content_block_delta") => {
                    if let Some(text) = value
                        .get("delta")
                        .and_then(|d| d.get("text"))
                        .and_then(|t| t.as_str())
                    {
                        if !text.is_empty() {
                            events.push(StreamEvent::Delta(text.to_string()));
                        }
                    }
                }
                Some("message_stop") => {
                    self.done = true;
                    events.push(StreamEvent::Done);
                }
                _ => {}
            }
        }
        events
    }
}

// ============================================================================
// OPENAI DIALECT
// ============================================================================

/// Parser for the OpenAI chat-completions dialect, shared by openai,
/// openrouter, mistral, and meta-llama: `choices[0].delta.content`
/// carries text; the literal `[DONE]` payload ends the stream.
#[derive(Debug, Default)]
pub struct OpenAiDeltaParser {
    framer: SseFramer,
    done: bool,
}

impl OpenAiDeltaParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeltaParser for OpenAiDeltaParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for payload in self.framer.feed(bytes) {
            if self.done {
                break;
            }
            if payload == "[DONE]" {
                self.done = true;
                events.push(StreamEvent::Done);
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
                continue;
            };
            if let Some(text) = value
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(|t| t.as_str())
            {
                if !text.is_empty() {
                    events.push(StreamEvent::Delta(text.to_string()));
                }
            }
        }
        events
    }
}

// ============================================================================
// GOOGLE DIALECT
// ============================================================================

/// Parser for the gemini streaming dialect:
/// `candidates[0].content.parts[*].text` carries text; a candidate with
/// `finishReason` set ends the stream.
#[derive(Debug, Default)]
pub struct GoogleDeltaParser {
    framer: SseFramer,
    done: bool,
}

impl GoogleDeltaParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeltaParser for GoogleDeltaParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for payload in self.framer.feed(bytes) {
            if self.done {
                break;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
                continue;
            };
            let Some(candidate) = value
                .get("candidates")
                .and_then(|c| c.get(0))
            else {
                continue;
            };
            if let Some(parts) = candidate
                .get("content")
                .and_then(|c| c.get("parts"))
                .and_then(|p| p.as_array())
            {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            events.push(StreamEvent::Delta(text.to_string()));
                        }
                    }
                }
            }
            if candidate.get("finishReason").is_some() {
                self.done = true;
                events.push(StreamEvent::Done);
            }
        }
        events
    }
}

// ============================================================================
// TESTS
// ============================================================================
