//! Preamble formatter registry
//!
//! Pure mapping from target-model family to a context wrapper. The body
//! is rendered once (one entry per chunk: role, optional window tag,
//! content) and the family wrapper decorates it into the final system
//! preamble. An empty body produces an empty preamble - no wrapper
//! scaffolding is injected for nothing.

use mneme_core::{ChunkRole, TemporalWindow};

/// One rendered preamble entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PreambleEntry {
    pub role: ChunkRole,
    pub window: Option<TemporalWindow>,
    pub content: String,
}

/// Context wrapper styles, one per recognised model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    /// XML-style tags (claude)
    Claude,
    /// Markdown section (gpt, o1, o3, o4)
    Markdown,
    /// Bracket tags (llama)
    Llama,
    /// `<context>` wrapper (gemini)
    Gemini,
    /// Plain-text fallback
    Plain,
}

/// Select the wrapper for a model identifier by substring, in order:
/// claude, then gpt/o1/o3/o4, then llama, then gemini, then plain.
pub fn wrapper_for_model(model: &str) -> WrapperKind {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        WrapperKind::Claude
    } else if lower.contains("gpt")
        || lower.contains("o1")
        || lower.contains("o3")
        || lower.contains("o4")
    {
        WrapperKind::Markdown
    } else if lower.contains("llama") {
        WrapperKind::Llama
    } else if lower.contains("gemini") {
        WrapperKind::Gemini
    } else {
        WrapperKind::Plain
    }
}

/// Render the final system preamble for a model.
pub fn render_preamble(model: &str, entries: &[PreambleEntry]) -> String {
    let body = render_body(entries);
    if body.is_empty() {
        return String::new();
    }

    match wrapper_for_model(model) {
        WrapperKind::Claude => format!(
            "<memory_context>\nPrior conversation retrieved from memory. \
             Use it when relevant; do not mention the retrieval.\n{}\n</memory_context>",
            body
        ),
        WrapperKind::Markdown => format!(
            "## Retrieved memory\n\nPrior conversation retrieved from memory. \
             Use it when relevant; do not mention the retrieval.\n\n{}",
            body
        ),
        WrapperKind::Llama => format!("[MEMORY]\n{}\n[/MEMORY]", body),
        WrapperKind::Gemini => format!("<context>\n{}\n</context>", body),
        WrapperKind::Plain => format!("Relevant prior conversation:\n{}", body),
    }
}

/// Render the shared body: one line per entry.
fn render_body(entries: &[PreambleEntry]) -> String {
    entries
        .iter()
        .map(|entry| match entry.window {
            Some(window) => format!(
                "[{}|{}] {}",
                entry.role.as_str(),
                window.label(),
                entry.content
            ),
            None => format!("[{}] {}", entry.role.as_str(), entry.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: ChunkRole, window: Option<TemporalWindow>, content: &str) -> PreambleEntry {
        PreambleEntry {
            role,
            window,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_wrapper_selection_order() {
        assert_eq!(wrapper_for_model("claude-3-opus"), WrapperKind::Claude);
        assert_eq!(wrapper_for_model("gpt-4"), WrapperKind::Markdown);
        assert_eq!(wrapper_for_model("o1-preview"), WrapperKind::Markdown);
        assert_eq!(wrapper_for_model("o3-mini"), WrapperKind::Markdown);
        assert_eq!(wrapper_for_model("llama-3.1-70b"), WrapperKind::Llama);
        assert_eq!(wrapper_for_model("gemini-1.5-pro"), WrapperKind::Gemini);
        assert_eq!(wrapper_for_model("qwen-72b"), WrapperKind::Plain);
    }

    #[test]
    fn test_claude_takes_precedence_over_later_matches() {
        // "claude" wins even if the id also matches a later substring
        assert_eq!(wrapper_for_model("claude-o1-hybrid"), WrapperKind::Claude);
    }

    #[test]
    fn test_empty_entries_render_empty_preamble() {
        assert_eq!(render_preamble("gpt-4", &[]), "");
        assert_eq!(render_preamble("claude-3-opus", &[]), "");
    }

    #[test]
    fn test_body_carries_role_and_window_tag() {
        let entries = vec![
            entry(
                ChunkRole::User,
                Some(TemporalWindow::Hot),
                "my codename is Kingfisher",
            ),
            entry(ChunkRole::Assistant, None, "understood"),
        ];
        let preamble = render_preamble("llama-3-8b", &entries);
        assert!(preamble.starts_with("[MEMORY]\n"));
        assert!(preamble.contains("[user|recent] my codename is Kingfisher"));
        assert!(preamble.contains("[assistant] understood"));
        assert!(preamble.ends_with("\n[/MEMORY]"));
    }

    #[test]
    fn test_claude_wrapper_is_xml_tagged() {
        let entries = vec![entry(ChunkRole::User, None, "hello")];
        let preamble = render_preamble("claude-3-haiku", &entries);
        assert!(preamble.starts_with("<memory_context>"));
        assert!(preamble.ends_with("</memory_context>"));
    }

    #[test]
    fn test_gemini_wrapper_uses_context_tag() {
        let entries = vec![entry(ChunkRole::User, None, "hello")];
        let preamble = render_preamble("gemini-1.5-flash", &entries);
        assert!(preamble.starts_with("<context>"));
        assert!(preamble.ends_with("</context>"));
    }
}
