//! Core domain types for trailmint
//!
//! These types are both the persisted records and the JSON shapes exchanged
//! with the browser shim and the relay, so field names follow the wire
//! format (`camelCase`, millisecond timestamps).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Navigation event** | Any browser-reported change of the active page's URL or lifecycle phase |
//! | **Session** | The interval during which one URL is the current page, between two navigation events |
//! | **Entry** | One persisted [`NavigationEntry`]; its time and interactions are rewritten while the page stays current |
//! | **Prompt** | Text a human submitted on a conversation page, captured as a [`CapturedPrompt`] |
//! | **Relay** | The remote service that turns a [`Submission`] into a reward and archives it |

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Title recorded when the page did not report one.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// `type` value carried by every captured prompt.
pub const PROMPT_KIND: &str = "chatgpt_prompt";

/// Host part of a URL, or an empty string when it has none.
pub fn domain_of(raw_url: &str) -> String {
    url::Url::parse(raw_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

// ============================================
// Navigation events
// ============================================

/// What caused a [`NavigationEntry`] to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    InitialLoad,
    DomLoaded,
    FullyLoaded,
    PopState,
    HashChange,
    PushState,
    ReplaceState,
    TabActivated,
    /// Written by the background observer, e.g. `background_tab_updated`
    Background(String),
    /// Anything else the shim reported
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            EventType::InitialLoad => Cow::Borrowed("initial_load"),
            EventType::DomLoaded => Cow::Borrowed("dom_loaded"),
            EventType::FullyLoaded => Cow::Borrowed("fully_loaded"),
            EventType::PopState => Cow::Borrowed("popstate"),
            EventType::HashChange => Cow::Borrowed("hashchange"),
            EventType::PushState => Cow::Borrowed("pushstate"),
            EventType::ReplaceState => Cow::Borrowed("replacestate"),
            EventType::TabActivated => Cow::Borrowed("tab_activated"),
            EventType::Background(trigger) => Cow::Owned(format!("background_{}", trigger)),
            EventType::Other(raw) => Cow::Borrowed(raw.as_str()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "initial_load" => EventType::InitialLoad,
            "dom_loaded" => EventType::DomLoaded,
            "fully_loaded" => EventType::FullyLoaded,
            "popstate" => EventType::PopState,
            "hashchange" => EventType::HashChange,
            "pushstate" => EventType::PushState,
            "replacestate" => EventType::ReplaceState,
            "tab_activated" => EventType::TabActivated,
            other => match other.strip_prefix("background_") {
                Some(trigger) => EventType::Background(trigger.to_string()),
                None => EventType::Other(s),
            },
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().into_owned()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// History-level change that moved the page to a new URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationTrigger {
    PopState,
    HashChange,
    PushState,
    ReplaceState,
}

impl From<NavigationTrigger> for EventType {
    fn from(trigger: NavigationTrigger) -> Self {
        match trigger {
            NavigationTrigger::PopState => EventType::PopState,
            NavigationTrigger::HashChange => EventType::HashChange,
            NavigationTrigger::PushState => EventType::PushState,
            NavigationTrigger::ReplaceState => EventType::ReplaceState,
        }
    }
}

/// Document load milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    DomLoaded,
    FullyLoaded,
}

impl From<LoadPhase> for EventType {
    fn from(phase: LoadPhase) -> Self {
        match phase {
            LoadPhase::DomLoaded => EventType::DomLoaded,
            LoadPhase::FullyLoaded => EventType::FullyLoaded,
        }
    }
}

/// The two unload signals a page can emit; both may fire for one unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnloadSignal {
    BeforeUnload,
    PageHide,
}

/// User input that proves the page is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Scroll,
    Keydown,
}

/// What the shim knows about the page at the time of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

impl PageInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            referrer: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn domain(&self) -> String {
        domain_of(&self.url)
    }
}

// ============================================
// Persisted records
// ============================================

/// One recorded page visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEntry {
    pub url: String,
    pub title: String,
    pub domain: String,
    /// Creation time; the dedup window is measured against this
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub visit_start: DateTime<Utc>,
    pub event_type: EventType,
    /// Minutes, rewritten each time the session is flushed
    #[serde(default)]
    pub time_spent: u32,
    #[serde(default)]
    pub interactions: u32,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(
        default,
        with = "ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_end: Option<DateTime<Utc>>,
}

impl NavigationEntry {
    /// Fresh entry for a page, not yet flushed.
    pub fn for_page(
        page: &PageInfo,
        event_type: EventType,
        visit_start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: page.url.clone(),
            title: page
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            domain: page.domain(),
            timestamp: at,
            visit_start,
            event_type,
            time_spent: 0,
            interactions: 0,
            referrer: page.referrer.clone().filter(|r| !r.is_empty()),
            fallback: false,
            time_end: None,
        }
    }
}

/// Text a human submitted on a conversation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPrompt {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub domain: String,
    pub prompt: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub prompt_length: usize,
}

/// Persisted wallet connection indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub connected: bool,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_connected: Option<DateTime<Utc>>,
}

impl WalletState {
    pub fn connected(account: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            connected: true,
            account: Some(account.into()),
            last_connected: Some(at),
        }
    }

    /// Account to submit for, if the wallet is connected.
    pub fn active_account(&self) -> Option<&str> {
        if self.connected {
            self.account.as_deref().filter(|a| !a.is_empty())
        } else {
            None
        }
    }
}

/// Short-lived context event such as a window regaining focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Everything the batcher reads before a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub pages_visited: u64,
    pub time_tracked: u64,
    pub navigation_data: Vec<NavigationEntry>,
    pub chatgpt_prompts: Vec<CapturedPrompt>,
}

impl StateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pages_visited == 0
            && self.time_tracked == 0
            && self.navigation_data.is_empty()
            && self.chatgpt_prompts.is_empty()
    }
}

/// Record sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub wallet_address: String,
    pub pages_visited: u64,
    pub time_tracked: u64,
    pub navigation_data: Vec<NavigationEntry>,
    pub chatgpt_prompts: Vec<CapturedPrompt>,
    /// Client-side creation time
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    pub fn from_snapshot(
        wallet_address: impl Into<String>,
        snapshot: StateSnapshot,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            pages_visited: snapshot.pages_visited,
            time_tracked: snapshot.time_tracked,
            navigation_data: snapshot.navigation_data,
            chatgpt_prompts: snapshot.chatgpt_prompts,
            timestamp: at,
        }
    }
}
