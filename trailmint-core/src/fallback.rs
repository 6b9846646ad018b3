//! Background fallback recording
//!
//! Tab-level events from the browser cover pages where the content script
//! never ran. They share the tracker's dedup window, so a page the content
//! script already recorded is not counted twice.

use crate::db::StateStore;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// URL prefixes of browser-internal pages that are never recorded.
const INTERNAL_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "moz-extension://",
    "about:",
    "edge://",
    "opera://",
    "brave://",
    "data:",
    "blob:",
];

/// Whether `url` is a normal web page.
pub fn is_valid_url(url: &str) -> bool {
    !url.is_empty() && !INTERNAL_PREFIXES.iter().any(|p| url.starts_with(p))
}

/// What the browser reports about a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl TabSnapshot {
    fn page(&self) -> Option<PageInfo> {
        let url = self.url.as_deref().filter(|u| is_valid_url(u))?;
        Some(PageInfo {
            url: url.to_string(),
            title: self.title.clone(),
            referrer: None,
        })
    }
}

/// Records tab updates and activations into the shared navigation log.
pub struct FallbackRecorder {
    store: Arc<StateStore>,
    dedup_window_ms: i64,
}

impl FallbackRecorder {
    pub fn new(store: Arc<StateStore>, dedup_window_ms: i64) -> Self {
        Self {
            store,
            dedup_window_ms,
        }
    }

    /// A tab finished loading. Recorded as `background_tab_updated` with
    /// `fallback: true` unless the page was recorded recently.
    pub fn on_tab_updated(&self, tab: &TabSnapshot, at: DateTime<Utc>) -> bool {
        let Some(page) = tab.page() else {
            return false;
        };
        let mut entry =
            NavigationEntry::for_page(&page, EventType::Background("tab_updated".into()), at, at);
        entry.fallback = true;
        self.record(entry)
    }

    /// The user switched to a tab.
    pub fn on_tab_activated(&self, tab: &TabSnapshot, at: DateTime<Utc>) -> bool {
        let Some(page) = tab.page() else {
            return false;
        };
        let entry = NavigationEntry::for_page(&page, EventType::TabActivated, at, at);
        self.record(entry)
    }

    fn record(&self, entry: NavigationEntry) -> bool {
        match self
            .store
            .append_navigation_entry(&entry, self.dedup_window_ms)
        {
            Ok(stored) => {
                if stored {
                    tracing::debug!(url = %entry.url, event_type = %entry.event_type, "Fallback entry recorded");
                }
                stored
            }
            Err(e) => {
                tracing::warn!(url = %entry.url, error = %e, "Failed to record fallback entry");
                false
            }
        }
    }
}
