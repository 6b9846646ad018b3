//! Navigation/session tracker
//!
//! One [`NavigationTracker`] follows one tab's current page. It is an
//! explicit state machine over [`PageState`]: every browser signal is a
//! named transition method taking the signal's data as a typed argument, and
//! activity is flushed into the [`StateStore`] only at transition points.
//!
//! ## Transitions
//!
//! | Signal | From | Effect |
//! |--------|------|--------|
//! | navigation to a different URL | any | flush if `Active`, start a new session, record an entry |
//! | hidden / blur | `Active` | flush, go `Inactive` |
//! | visible / focus | `Inactive` | go `Active`, restart the clock |
//! | unload (either signal) | `Active` | flush, go `Inactive` |
//! | click / scroll / keydown | any | count it; if `Inactive`, go `Active` and restart the clock |
//!
//! Storage failures never stop a transition: they are logged and the
//! in-memory session moves on as if the write had succeeded.

use crate::capture::{
    build_prompt, is_conversation_page, is_submit_key, select_last_message, PromptFilter,
    RenderedText,
};
use crate::config::Config;
use crate::db::StateStore;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether the tracked page is currently accruing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageState {
    /// Visible and focused; the clock runs from `page_start`
    Active,
    /// Hidden, blurred or unloaded; the clock is paused
    Inactive,
}

/// In-memory working state for the current page. Never persisted.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub page: PageInfo,
    pub page_start: DateTime<Utc>,
    pub state: PageState,
    pub interactions: u32,
}

impl SessionContext {
    fn start(page: PageInfo, at: DateTime<Utc>) -> Self {
        Self {
            page,
            page_start: at,
            state: PageState::Active,
            interactions: 0,
        }
    }

    pub fn current_url(&self) -> &str {
        &self.page.url
    }
}

/// Tunables the tracker reads from configuration.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub dedup_window_ms: i64,
    pub capture_delay_ms: u64,
    pub conversation_hosts: Vec<String>,
    pub prompt_dedup_window_ms: i64,
    pub max_prompts: usize,
    pub prompt_filter: PromptFilter,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dedup_window_ms: config.tracker.dedup_window_ms,
            capture_delay_ms: config.tracker.capture_delay_ms,
            conversation_hosts: config.tracker.conversation_hosts.clone(),
            prompt_dedup_window_ms: config.capture.dedup_window_ms,
            max_prompts: config.capture.max_prompts,
            prompt_filter: PromptFilter::from_config(&config.capture),
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Ask the content script to scan rendered messages after a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub delay_ms: u64,
}

/// A page-level signal reported by the content script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A new document started in the tab
    Started { page: PageInfo },
    Loaded {
        phase: LoadPhase,
        #[serde(default)]
        title: Option<String>,
    },
    Navigated {
        trigger: NavigationTrigger,
        page: PageInfo,
    },
    Visibility { visible: bool },
    Focus { focused: bool },
    Unload { signal: UnloadSignal },
    Interaction { interaction: InteractionKind },
    /// A keydown with its key; counts as a keydown interaction
    KeyPress {
        key: String,
        #[serde(default)]
        shift: bool,
    },
    /// Result of a capture scan
    Rendered { blocks: Vec<RenderedText> },
}

/// Elapsed minutes for a flush: rounded to the nearest minute, never below 1.
pub fn elapsed_minutes(start: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let ms = (now - start).num_milliseconds();
    let minutes = (ms as f64 / 60_000.0).round();
    minutes.clamp(1.0, u32::MAX as f64) as u32
}

/// State machine for one tab's current page.
pub struct NavigationTracker {
    store: Arc<StateStore>,
    settings: TrackerSettings,
    session: SessionContext,
}

impl NavigationTracker {
    /// Start tracking `page`, recording its `initial_load` entry.
    pub fn new(
        store: Arc<StateStore>,
        settings: TrackerSettings,
        page: PageInfo,
        at: DateTime<Utc>,
    ) -> Self {
        let mut tracker = Self {
            store,
            settings,
            session: SessionContext::start(page, at),
        };
        tracker.record_page_visit(EventType::InitialLoad, at);
        tracing::debug!(url = %tracker.session.page.url, "Tracker initialized");
        tracker
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn state(&self) -> PageState {
        self.session.state
    }

    pub fn current_url(&self) -> &str {
        self.session.current_url()
    }

    /// Dispatch a reported signal to its transition.
    pub fn apply(&mut self, event: TrackerEvent, at: DateTime<Utc>) -> Option<CaptureRequest> {
        match event {
            TrackerEvent::Started { page } => {
                self.restart(page, at);
            }
            TrackerEvent::Loaded { phase, title } => {
                self.on_loaded(phase, title, at);
            }
            TrackerEvent::Navigated { trigger, page } => {
                self.on_navigation(trigger, page, at);
            }
            TrackerEvent::Visibility { visible } => self.on_visibility(visible, at),
            TrackerEvent::Focus { focused } => self.on_focus(focused, at),
            TrackerEvent::Unload { signal } => self.on_unload(signal, at),
            TrackerEvent::Interaction { interaction } => self.on_interaction(interaction, at),
            TrackerEvent::KeyPress { key, shift } => return self.on_key_press(&key, shift, at),
            TrackerEvent::Rendered { blocks } => {
                self.capture_prompt(&blocks, at);
            }
        }
        None
    }

    /// A new document replaced the old one in the same tab.
    pub fn restart(&mut self, page: PageInfo, at: DateTime<Utc>) {
        self.finalize(at);
        self.session = SessionContext::start(page, at);
        self.record_page_visit(EventType::InitialLoad, at);
    }

    /// DOM-ready or full-load milestone; usually absorbed by the dedup window.
    pub fn on_loaded(&mut self, phase: LoadPhase, title: Option<String>, at: DateTime<Utc>) -> bool {
        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            self.session.page.title = Some(title);
        }
        self.record_page_visit(phase.into(), at)
    }

    /// History-level navigation. Ignored unless the URL actually changed.
    pub fn on_navigation(
        &mut self,
        trigger: NavigationTrigger,
        page: PageInfo,
        at: DateTime<Utc>,
    ) -> bool {
        if page.url == self.session.page.url {
            return false;
        }

        tracing::debug!(
            from = %self.session.page.url,
            to = %page.url,
            trigger = ?trigger,
            "Navigation detected"
        );

        self.finalize(at);
        self.session = SessionContext::start(page, at);
        self.record_page_visit(trigger.into(), at);
        true
    }

    pub fn on_visibility(&mut self, visible: bool, at: DateTime<Utc>) {
        if visible {
            self.activate(at);
        } else {
            self.deactivate(at);
        }
    }

    pub fn on_focus(&mut self, focused: bool, at: DateTime<Utc>) {
        self.on_visibility(focused, at);
    }

    /// Either unload signal. A second signal finds the session already
    /// inactive and does nothing.
    pub fn on_unload(&mut self, signal: UnloadSignal, at: DateTime<Utc>) {
        if self.session.state == PageState::Active {
            tracing::debug!(url = %self.session.page.url, signal = ?signal, "Finalizing session");
        }
        self.deactivate(at);
    }

    pub fn on_interaction(&mut self, kind: InteractionKind, at: DateTime<Utc>) {
        self.session.interactions = self.session.interactions.saturating_add(1);
        if self.session.state == PageState::Inactive {
            tracing::trace!(interaction = ?kind, "Interaction while inactive, resuming");
            self.activate(at);
        }
    }

    /// Keydown. On a conversation page a submit key asks for a capture scan.
    pub fn on_key_press(&mut self, key: &str, shift: bool, at: DateTime<Utc>) -> Option<CaptureRequest> {
        self.on_interaction(InteractionKind::Keydown, at);

        (is_submit_key(key, shift)
            && is_conversation_page(&self.session.page.url, &self.settings.conversation_hosts))
        .then_some(CaptureRequest {
            delay_ms: self.settings.capture_delay_ms,
        })
    }

    /// Store the last rendered message as a prompt if it passes the filter.
    pub fn capture_prompt(&mut self, blocks: &[RenderedText], at: DateTime<Utc>) -> bool {
        let url = &self.session.page.url;
        if !is_conversation_page(url, &self.settings.conversation_hosts) {
            return false;
        }
        let Some(text) = select_last_message(blocks) else {
            return false;
        };
        if !self.settings.prompt_filter.accepts(text) {
            tracing::trace!(length = text.len(), "Prompt rejected by filter");
            return false;
        }

        let prompt = build_prompt(url, text, at);
        match self.store.append_prompt(
            &prompt,
            self.settings.prompt_dedup_window_ms,
            self.settings.max_prompts,
        ) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to store captured prompt");
                false
            }
        }
    }

    /// Flush the running session into the store.
    ///
    /// Returns the minutes added, or `None` when the session is inactive.
    pub fn update_time_spent(&mut self, at: DateTime<Utc>) -> Option<u32> {
        if self.session.state != PageState::Active {
            return None;
        }

        let minutes = elapsed_minutes(self.session.page_start, at);
        if let Err(e) = self.store.flush_time_spent(
            &self.session.page.url,
            minutes,
            self.session.interactions,
            at,
        ) {
            tracing::warn!(
                url = %self.session.page.url,
                error = %e,
                "Failed to flush time spent"
            );
        }
        Some(minutes)
    }

    /// Append an entry for the current page unless the dedup window drops it.
    pub fn record_page_visit(&mut self, event_type: EventType, at: DateTime<Utc>) -> bool {
        let entry = NavigationEntry::for_page(
            &self.session.page,
            event_type,
            self.session.page_start,
            at,
        );
        match self
            .store
            .append_navigation_entry(&entry, self.settings.dedup_window_ms)
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(url = %entry.url, error = %e, "Failed to record page visit");
                false
            }
        }
    }

    /// Flush if active. Called before the session is replaced or dropped.
    pub fn finalize(&mut self, at: DateTime<Utc>) -> Option<u32> {
        self.update_time_spent(at)
    }

    fn activate(&mut self, at: DateTime<Utc>) {
        if self.session.state == PageState::Inactive {
            self.session.page_start = at;
            self.session.state = PageState::Active;
        }
    }

    fn deactivate(&mut self, at: DateTime<Utc>) {
        if self.session.state == PageState::Active {
            self.update_time_spent(at);
            self.session.state = PageState::Inactive;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Arc<StateStore> {
        let store = StateStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        Arc::new(store)
    }

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    fn tracker(store: &Arc<StateStore>, url: &str) -> NavigationTracker {
        NavigationTracker::new(
            store.clone(),
            TrackerSettings::default(),
            PageInfo::new(url).with_title("Page"),
            t(0),
        )
    }

    #[test]
    fn test_elapsed_minutes_rounds_with_floor_of_one() {
        assert_eq!(elapsed_minutes(t(0), t(0)), 1);
        assert_eq!(elapsed_minutes(t(0), t(29_999)), 1);
        assert_eq!(elapsed_minutes(t(0), t(90_000)), 2);
        assert_eq!(elapsed_minutes(t(0), t(149_999)), 2);
        assert_eq!(elapsed_minutes(t(0), t(150_000)), 3);
        // Clock went backwards
        assert_eq!(elapsed_minutes(t(10_000), t(0)), 1);
    }

    #[test]
    fn test_navigation_after_ninety_seconds() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");

        assert!(tracker.on_navigation(
            NavigationTrigger::PushState,
            PageInfo::new("https://b.example/"),
            t(90_000),
        ));

        let entries = store.navigation_entries(None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://a.example/");
        assert_eq!(entries[0].time_spent, 2);
        assert_eq!(entries[0].time_end, Some(t(90_000)));
        assert_eq!(entries[1].url, "https://b.example/");
        assert_eq!(entries[1].event_type, EventType::PushState);
        assert_eq!(entries[1].visit_start, t(90_000));
        assert_eq!(store.time_tracked().unwrap(), 2);
        assert_eq!(store.pages_visited().unwrap(), 2);
        assert_eq!(tracker.current_url(), "https://b.example/");
        assert_eq!(tracker.state(), PageState::Active);
    }

    #[test]
    fn test_same_url_navigation_ignored() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");
        assert!(!tracker.on_navigation(
            NavigationTrigger::HashChange,
            PageInfo::new("https://a.example/"),
            t(10_000),
        ));
        assert_eq!(store.time_tracked().unwrap(), 0);
        assert_eq!(store.count_navigation_entries().unwrap(), 1);
    }

    #[test]
    fn test_load_phases_absorbed_by_dedup() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");
        assert!(!tracker.on_loaded(LoadPhase::DomLoaded, None, t(300)));
        assert!(!tracker.on_loaded(LoadPhase::FullyLoaded, Some("Real".into()), t(2000)));
        assert_eq!(store.count_navigation_entries().unwrap(), 1);
        assert_eq!(tracker.session().page.title.as_deref(), Some("Real"));

        // Late load event outside the window is a separate entry
        assert!(tracker.on_loaded(LoadPhase::FullyLoaded, None, t(6000)));
        assert_eq!(store.pages_visited().unwrap(), 2);
    }

    #[test]
    fn test_hidden_time_not_counted() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");

        tracker.on_visibility(false, t(60_000));
        assert_eq!(tracker.state(), PageState::Inactive);
        assert_eq!(store.time_tracked().unwrap(), 1);

        // Second hide is a no-op
        tracker.on_focus(false, t(70_000));
        assert_eq!(store.time_tracked().unwrap(), 1);

        // Ten minutes hidden, then two minutes visible
        tracker.on_visibility(true, t(660_000));
        assert_eq!(tracker.session().page_start, t(660_000));
        tracker.on_visibility(false, t(780_000));
        assert_eq!(store.time_tracked().unwrap(), 3);

        let entries = store.navigation_entries(None).unwrap();
        assert_eq!(entries[0].time_spent, 2);
    }

    #[test]
    fn test_double_unload_is_idempotent() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");
        tracker.on_unload(UnloadSignal::BeforeUnload, t(45_000));
        tracker.on_unload(UnloadSignal::PageHide, t(45_010));
        assert_eq!(store.time_tracked().unwrap(), 1);
        assert_eq!(tracker.finalize(t(50_000)), None);
    }

    #[test]
    fn test_interaction_reactivates() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");
        tracker.on_visibility(false, t(1000));
        tracker.on_interaction(InteractionKind::Scroll, t(120_000));
        assert_eq!(tracker.state(), PageState::Active);
        assert_eq!(tracker.session().page_start, t(120_000));

        tracker.on_interaction(InteractionKind::Click, t(130_000));
        tracker.on_unload(UnloadSignal::PageHide, t(180_000));

        let entries = store.navigation_entries(None).unwrap();
        assert_eq!(entries[0].interactions, 2);
        assert_eq!(entries[0].time_spent, 1);
        assert_eq!(store.time_tracked().unwrap(), 2);
    }

    #[test]
    fn test_rapid_same_url_navigations_store_one_entry() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");
        tracker.on_navigation(
            NavigationTrigger::PushState,
            PageInfo::new("https://b.example/"),
            t(10_000),
        );
        tracker.on_navigation(
            NavigationTrigger::PopState,
            PageInfo::new("https://a.example/"),
            t(11_000),
        );
        tracker.on_navigation(
            NavigationTrigger::PushState,
            PageInfo::new("https://b.example/"),
            t(12_000),
        );

        let b_entries: Vec<_> = store
            .navigation_entries(None)
            .unwrap()
            .into_iter()
            .filter(|e| e.url == "https://b.example/")
            .collect();
        assert_eq!(b_entries.len(), 1);
    }

    #[test]
    fn test_submit_key_requests_capture_on_conversation_page() {
        let store = store();
        let mut chat = tracker(&store, "https://chatgpt.com/c/abc");
        assert_eq!(
            chat.on_key_press("Enter", false, t(1000)),
            Some(CaptureRequest { delay_ms: 1000 })
        );
        assert_eq!(chat.on_key_press("Enter", true, t(1100)), None);
        assert_eq!(chat.session().interactions, 2);

        let mut other = tracker(&store, "https://example.com/");
        assert_eq!(other.on_key_press("Enter", false, t(1000)), None);
    }

    #[test]
    fn test_capture_prompt_pipeline() {
        let store = store();
        let mut tracker = tracker(&store, "https://chatgpt.com/c/abc");

        let short = vec![RenderedText::new("ok", 500.0, 0.0)];
        assert!(!tracker.capture_prompt(&short, t(2000)));

        let blocks = vec![
            RenderedText::new("Earlier question here", 100.0, 0.0),
            RenderedText::new("How do I sort a list in order?", 500.0, 0.0),
        ];
        assert!(tracker.capture_prompt(&blocks, t(4000)));
        // Same scan again a few seconds later is a duplicate
        assert!(!tracker.capture_prompt(&blocks, t(9000)));

        let prompts = store.prompts().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].prompt, "How do I sort a list in order?");
        assert_eq!(prompts[0].conversation_id, "abc");
    }

    #[test]
    fn test_apply_dispatches_events() {
        let store = store();
        let mut tracker = tracker(&store, "https://a.example/");
        let event: TrackerEvent = serde_json::from_str(
            r#"{"kind":"navigated","trigger":"hashchange","page":{"url":"https://a.example/#x"}}"#,
        )
        .unwrap();
        assert_eq!(tracker.apply(event, t(30_000)), None);
        assert_eq!(tracker.current_url(), "https://a.example/#x");

        let restart = TrackerEvent::Started {
            page: PageInfo::new("https://c.example/"),
        };
        tracker.apply(restart, t(30_000) + Duration::minutes(5));
        assert_eq!(store.pages_visited().unwrap(), 3);
        assert_eq!(store.time_tracked().unwrap(), 1 + 5);
    }
}
