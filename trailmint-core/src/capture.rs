//! Prompt capture on conversation pages
//!
//! The content script cannot decide on its own which rendered block is the
//! prompt the user just sent; it reports every candidate block with its
//! on-screen position and this module picks one. The pick is a heuristic:
//! the block with the greatest `top + left` is taken as the last message,
//! which is only as reliable as the page layout.

use crate::config::CaptureConfig;
use crate::types::{domain_of, CapturedPrompt, PROMPT_KIND};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rendered text block matched by one of the user-message selectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedText {
    pub text: String,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub left: f64,
}

impl RenderedText {
    pub fn new(text: impl Into<String>, top: f64, left: f64) -> Self {
        Self {
            text: text.into(),
            top,
            left,
        }
    }

    fn position(&self) -> f64 {
        self.top + self.left
    }
}

/// Text of the block that sits furthest down/right, ignoring blank blocks.
pub fn select_last_message(blocks: &[RenderedText]) -> Option<&str> {
    blocks
        .iter()
        .filter(|b| !b.text.trim().is_empty())
        .fold(None::<&RenderedText>, |best, block| match best {
            Some(b) if b.position() >= block.position() => Some(b),
            _ => Some(block),
        })
        .map(|b| b.text.trim())
}

/// Collapse whitespace runs so re-renders of the same text compare equal.
pub fn normalize_prompt(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Id of the conversation a URL points at: the path segment after `/c/`,
/// else a session id derived from `at`.
pub fn conversation_id(raw_url: &str, at: DateTime<Utc>) -> String {
    raw_url
        .split_once("/c/")
        .map(|(_, rest)| {
            rest.split(['/', '?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("session-{}", at.timestamp_millis()))
}

/// Whether prompt capture applies to this URL.
pub fn is_conversation_page(raw_url: &str, hosts: &[String]) -> bool {
    let host = domain_of(raw_url);
    hosts
        .iter()
        .any(|h| raw_url.contains(h.as_str()) || host.contains(h.as_str()))
}

/// Enter without Shift submits the composer.
pub fn is_submit_key(key: &str, shift: bool) -> bool {
    key == "Enter" && !shift
}

/// Length and boilerplate checks applied before a prompt is stored.
#[derive(Debug, Clone)]
pub struct PromptFilter {
    min_len: usize,
    denylist: Vec<String>,
}

impl PromptFilter {
    pub fn new(min_len: usize, denylist: Vec<String>) -> Self {
        Self { min_len, denylist }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.min_prompt_length, config.denylist.clone())
    }

    /// Text that reads like assistant output or page markup.
    pub fn is_boilerplate(&self, text: &str) -> bool {
        self.denylist
            .iter()
            .any(|phrase| !phrase.is_empty() && text.contains(phrase.as_str()))
    }

    /// Whether `text` should become a captured prompt.
    pub fn accepts(&self, text: &str) -> bool {
        let text = text.trim();
        !text.is_empty() && text.chars().count() >= self.min_len && !self.is_boilerplate(text)
    }
}

impl Default for PromptFilter {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

/// Build the record for an accepted prompt.
pub fn build_prompt(page_url: &str, text: &str, at: DateTime<Utc>) -> CapturedPrompt {
    let text = text.trim();
    CapturedPrompt {
        kind: PROMPT_KIND.to_string(),
        url: page_url.to_string(),
        domain: domain_of(page_url),
        prompt: text.to_string(),
        timestamp: at,
        conversation_id: conversation_id(page_url, at),
        prompt_length: text.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filter_min_length() {
        let filter = PromptFilter::default();
        assert!(!filter.accepts("ok"));
        assert!(!filter.accepts("   ok   "));
        assert!(filter.accepts("How do I sort a list in order?"));
        assert!(filter.accepts("abcde"));
        assert!(!filter.accepts("abcd"));
    }

    #[test]
    fn test_filter_denylist() {
        let filter = PromptFilter::default();
        assert!(!filter.accepts("I'm doing great, thanks!"));
        assert!(!filter.accepts("<p class=\"ProseMirror-trailingBreak\"></p>"));
        assert!(filter.accepts("Are you doing great today?"));
    }

    #[test]
    fn test_select_last_message_by_position() {
        let blocks = vec![
            RenderedText::new("first question", 100.0, 20.0),
            RenderedText::new("   ", 900.0, 20.0),
            RenderedText::new("latest question", 640.0, 20.0),
            RenderedText::new("middle question", 300.0, 20.0),
        ];
        assert_eq!(select_last_message(&blocks), Some("latest question"));
        assert_eq!(select_last_message(&[]), None);
    }

    #[test]
    fn test_conversation_id() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(conversation_id("https://chatgpt.com/c/abc-123?model=x", at), "abc-123");
        assert_eq!(conversation_id("https://chatgpt.com/c/abc/extra", at), "abc");
        assert_eq!(
            conversation_id("https://chatgpt.com/", at),
            "session-1700000000000"
        );
    }

    #[test]
    fn test_conversation_page_and_submit_key() {
        let hosts = crate::config::TrackerConfig::default().conversation_hosts;
        assert!(is_conversation_page("https://chatgpt.com/c/abc", &hosts));
        assert!(is_conversation_page("https://chat.openai.com/", &hosts));
        assert!(!is_conversation_page("https://example.com/", &hosts));

        assert!(is_submit_key("Enter", false));
        assert!(!is_submit_key("Enter", true));
        assert!(!is_submit_key("a", false));
    }

    #[test]
    fn test_normalize_and_build() {
        assert_eq!(normalize_prompt("  a \n b\t c "), "a b c");

        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let prompt = build_prompt("https://chatgpt.com/c/xyz", "  Explain lifetimes ", at);
        assert_eq!(prompt.kind, PROMPT_KIND);
        assert_eq!(prompt.prompt, "Explain lifetimes");
        assert_eq!(prompt.prompt_length, 17);
        assert_eq!(prompt.domain, "chatgpt.com");
        assert_eq!(prompt.conversation_id, "xyz");
    }
}
