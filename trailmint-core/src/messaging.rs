//! Messaging contract between the extension and the host
//!
//! Every request from the popup, content scripts or background worker is a
//! JSON object tagged by `type`; [`Router::handle`] answers each with exactly
//! one [`Response`]. The router owns the per-tab trackers, so all tracker
//! and store mutations happen on the caller's thread, one request at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::serde::ts_milliseconds_option;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, RewardConfig};
use crate::db::StateStore;
use crate::error::{Error, RejectionCategory, Result};
use crate::fallback::{FallbackRecorder, TabSnapshot};
use crate::relay::{Relay, RelayClient, SubmitReceipt};
use crate::submit::{is_valid_address, SyncSubmitter};
use crate::tracker::{CaptureRequest, NavigationTracker, TrackerEvent, TrackerSettings};
use crate::types::WalletState;
use crate::wallet::{
    detect_wallets, wallet_request, DetachedWallets, ProviderDescriptor, WalletBridge,
};

/// Kind recorded for window focus session events.
pub const WINDOW_FOCUS_EVENT: &str = "window_focus";

/// A request from the extension.
///
/// `at` fields are optional millisecond timestamps; absent means now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    SubmitData {
        #[serde(default)]
        wallet_address: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SaveWalletState { wallet_state: WalletState },
    GetWalletState,
    #[serde(rename = "CHECK_METAMASK")]
    CheckMetaMask,
    DetectWallets,
    #[serde(rename_all = "camelCase")]
    WalletRequest {
        provider_uuid: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    Track {
        tab_id: i64,
        #[serde(default, with = "ts_milliseconds_option")]
        at: Option<DateTime<Utc>>,
        event: TrackerEvent,
    },
    TabUpdated {
        tab: TabSnapshot,
        #[serde(default, with = "ts_milliseconds_option")]
        at: Option<DateTime<Utc>>,
    },
    TabActivated {
        tab: TabSnapshot,
        #[serde(default, with = "ts_milliseconds_option")]
        at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    TabClosed {
        tab_id: i64,
        #[serde(default, with = "ts_milliseconds_option")]
        at: Option<DateTime<Utc>>,
    },
    WindowFocus {
        #[serde(default, with = "ts_milliseconds_option")]
        at: Option<DateTime<Utc>>,
    },
    GetStats,
}

impl Request {
    /// Wire name of this request, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::SubmitData { .. } => "SUBMIT_DATA",
            Request::SaveWalletState { .. } => "SAVE_WALLET_STATE",
            Request::GetWalletState => "GET_WALLET_STATE",
            Request::CheckMetaMask => "CHECK_METAMASK",
            Request::DetectWallets => "DETECT_WALLETS",
            Request::WalletRequest { .. } => "WALLET_REQUEST",
            Request::Track { .. } => "TRACK",
            Request::TabUpdated { .. } => "TAB_UPDATED",
            Request::TabActivated { .. } => "TAB_ACTIVATED",
            Request::TabClosed { .. } => "TAB_CLOSED",
            Request::WindowFocus { .. } => "WINDOW_FOCUS",
            Request::GetStats => "GET_STATS",
        }
    }
}

/// Counters and cached values shown by the popup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub pages_visited: u64,
    pub time_tracked: u64,
    pub navigation_entries: i64,
    pub captured_prompts: usize,
    /// Tokens the current page count would earn at the configured rate
    pub claimable: f64,
    pub token_balance: Option<String>,
}

impl Stats {
    /// Read the current counters from `store`.
    ///
    /// A counter that cannot be read is reported as zero or empty.
    pub fn collect(store: &StateStore, reward: &RewardConfig) -> Self {
        let pages_visited = or_default("pages_visited", store.pages_visited());
        Self {
            pages_visited,
            time_tracked: or_default("time_tracked", store.time_tracked()),
            navigation_entries: or_default(
                "navigation_entries",
                store.count_navigation_entries(),
            ),
            captured_prompts: or_default("captured_prompts", store.prompts().map(|p| p.len())),
            claimable: reward.claimable(pages_visited),
            token_balance: or_default("token_balance", store.token_balance()),
        }
    }
}

fn or_default<T: Default>(counter: &str, value: Result<T>) -> T {
    value.unwrap_or_else(|e| {
        tracing::warn!(counter, error = %e, "Failed to read counter, using default");
        T::default()
    })
}

/// The answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Submitted {
        success: bool,
        response: SubmitReceipt,
    },
    Failed {
        success: bool,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<RejectionCategory>,
    },
    #[serde(rename_all = "camelCase")]
    WalletState {
        success: bool,
        wallet_state: WalletState,
    },
    #[serde(rename_all = "camelCase")]
    MetaMask { has_meta_mask: bool },
    Wallets { providers: Vec<ProviderDescriptor> },
    WalletResult { result: serde_json::Value },
    WalletError { error: String },
    Tracked {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        capture: Option<CaptureRequest>,
    },
    Recorded { success: bool, recorded: bool },
    Ack { success: bool },
    Stats(Stats),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack { success: true }
    }

    /// `{success: false, error, category?}` for any failure.
    pub fn failure(error: &Error) -> Self {
        Response::Failed {
            success: false,
            error: error.to_string(),
            category: error.rejection_category(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Response::Submitted { success, .. }
            | Response::Failed { success, .. }
            | Response::WalletState { success, .. }
            | Response::Tracked { success, .. }
            | Response::Recorded { success, .. }
            | Response::Ack { success } => *success,
            Response::WalletError { .. } => false,
            _ => true,
        }
    }
}

/// Dispatches requests to the tracker, store, batcher and wallet bridge.
pub struct Router<R: Relay = RelayClient> {
    store: Arc<StateStore>,
    config: Config,
    settings: TrackerSettings,
    trackers: HashMap<i64, NavigationTracker>,
    fallback: FallbackRecorder,
    submitter: Option<SyncSubmitter<R>>,
    wallets: Box<dyn WalletBridge>,
}

impl Router<RelayClient> {
    /// Router talking to the configured relay, with no wallet attached.
    pub fn from_config(store: Arc<StateStore>, config: Config) -> Result<Self> {
        let relay = RelayClient::new(config.relay.clone())?;
        let submitter = SyncSubmitter::new(store.clone(), relay)?;
        Ok(Self::new(store, config, Some(submitter), Box::new(DetachedWallets)))
    }
}

impl<R: Relay> Router<R> {
    pub fn new(
        store: Arc<StateStore>,
        config: Config,
        submitter: Option<SyncSubmitter<R>>,
        wallets: Box<dyn WalletBridge>,
    ) -> Self {
        let settings = TrackerSettings::from_config(&config);
        let fallback = FallbackRecorder::new(store.clone(), config.tracker.dedup_window_ms);
        Self {
            store,
            config,
            settings,
            trackers: HashMap::new(),
            fallback,
            submitter,
            wallets,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Number of tabs with a live tracker.
    pub fn tracked_tabs(&self) -> usize {
        self.trackers.len()
    }

    pub fn handle(&mut self, request: Request) -> Response {
        let name = request.name();
        let response = self.dispatch(request);
        if !response.is_success() {
            tracing::debug!(request = name, response = ?response, "Request failed");
        }
        response
    }

    fn dispatch(&mut self, request: Request) -> Response {
        match request {
            Request::SubmitData { wallet_address } => self.submit(wallet_address),
            Request::SaveWalletState { wallet_state } => self.save_wallet_state(&wallet_state),
            Request::GetWalletState => Response::WalletState {
                success: true,
                wallet_state: self.store.wallet_state().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to read wallet state");
                    WalletState::default()
                }),
            },
            Request::CheckMetaMask => Response::MetaMask {
                has_meta_mask: self.wallets.has_injected_provider(),
            },
            Request::DetectWallets => Response::Wallets {
                providers: detect_wallets(self.wallets.as_ref()),
            },
            Request::WalletRequest {
                provider_uuid,
                params,
            } => match wallet_request(self.wallets.as_ref(), &provider_uuid, &params) {
                Ok(result) => Response::WalletResult { result },
                Err(e) => Response::WalletError {
                    error: e.to_string(),
                },
            },
            Request::Track { tab_id, at, event } => self.track(tab_id, event, resolve(at)),
            Request::TabUpdated { tab, at } => Response::Recorded {
                success: true,
                recorded: self.fallback.on_tab_updated(&tab, resolve(at)),
            },
            Request::TabActivated { tab, at } => Response::Recorded {
                success: true,
                recorded: self.fallback.on_tab_activated(&tab, resolve(at)),
            },
            Request::TabClosed { tab_id, at } => {
                if let Some(mut tracker) = self.trackers.remove(&tab_id) {
                    tracker.finalize(resolve(at));
                }
                Response::ok()
            }
            Request::WindowFocus { at } => {
                let retention = Duration::seconds(self.config.tracker.session_event_retention_secs);
                if let Err(e) = self
                    .store
                    .record_session_event(WINDOW_FOCUS_EVENT, resolve(at), retention)
                {
                    tracing::warn!(error = %e, "Failed to record window focus");
                }
                Response::ok()
            }
            Request::GetStats => Response::Stats(self.stats()),
        }
    }

    fn track(&mut self, tab_id: i64, event: TrackerEvent, at: DateTime<Utc>) -> Response {
        let capture = if let Some(tracker) = self.trackers.get_mut(&tab_id) {
            tracker.apply(event, at)
        } else if let TrackerEvent::Started { page } = event {
            let tracker =
                NavigationTracker::new(self.store.clone(), self.settings.clone(), page, at);
            self.trackers.insert(tab_id, tracker);
            None
        } else {
            return Response::Failed {
                success: false,
                error: format!("tab {} is not tracked", tab_id),
                category: None,
            };
        };
        Response::Tracked {
            success: true,
            capture,
        }
    }

    fn submit(&mut self, wallet_address: Option<String>) -> Response {
        let Some(submitter) = self.submitter.as_ref() else {
            return Response::failure(&Error::Relay("relay is not configured".to_string()));
        };

        let wallet = match wallet_address.filter(|w| !w.is_empty()) {
            Some(wallet) => wallet,
            None => match self.store.wallet_state() {
                Ok(state) => match state.active_account() {
                    Some(account) => account.to_string(),
                    None => return Response::failure(&Error::WalletNotConnected),
                },
                Err(e) => return Response::failure(&e),
            },
        };

        // Trackers keep running across a submission; entries they flush
        // afterwards belong to the next batch.
        match submitter.submit(&wallet, Utc::now()) {
            Ok(receipt) => Response::Submitted {
                success: true,
                response: receipt,
            },
            Err(e) => Response::failure(&e),
        }
    }

    fn save_wallet_state(&self, state: &WalletState) -> Response {
        if let Some(account) = state.account.as_deref() {
            if state.connected && !is_valid_address(account) {
                return Response::failure(&Error::InvalidAddress(account.to_string()));
            }
        }
        match self.store.save_wallet_state(state) {
            Ok(()) => Response::ok(),
            Err(e) => Response::failure(&e),
        }
    }

    pub fn stats(&self) -> Stats {
        Stats::collect(&self.store, &self.config.reward)
    }

    /// Finalize every open tab, e.g. when the host shuts down.
    pub fn shutdown(&mut self, at: DateTime<Utc>) {
        for (tab_id, mut tracker) in self.trackers.drain() {
            if let Some(minutes) = tracker.finalize(at) {
                tracing::debug!(tab_id, minutes, "Finalized tab on shutdown");
            }
        }
    }
}

fn resolve(at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    at.unwrap_or_else(Utc::now)
}
