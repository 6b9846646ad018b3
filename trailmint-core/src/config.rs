//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/trailmint/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/trailmint/` (~/.config/trailmint/)
//! - Data: `$XDG_DATA_HOME/trailmint/` (~/.local/share/trailmint/)
//! - State/Logs: `$XDG_STATE_HOME/trailmint/` (~/.local/state/trailmint/)

use crate::classify::{PromptCategory, Rule, UrlCategory};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Relay endpoint configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Navigation tracker tuning
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Prompt capture rules
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Reward display settings
    #[serde(default)]
    pub reward: RewardConfig,

    /// Optional classification table overrides
    #[serde(default)]
    pub classify: ClassifyConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Relay configuration
///
/// The relay validates submissions, forwards the reward call and archives
/// raw and anonymized copies.
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Base URL including the API prefix (e.g., `https://relay.example.com/api`)
    #[serde(default = "default_relay_url")]
    pub server_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for read-only endpoints
    #[serde(default = "default_relay_max_retries")]
    pub max_retries: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_url: default_relay_url(),
            timeout_secs: default_relay_timeout(),
            max_retries: default_relay_max_retries(),
        }
    }
}

impl RelayConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("relay.server_url is not a URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::Config(
                "relay.server_url must use http or https".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "relay.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_relay_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}

fn default_relay_timeout() -> u64 {
    30
}

fn default_relay_max_retries() -> usize {
    3
}

/// Navigation tracker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Window in which a second entry for the same URL is a duplicate.
    /// Shared by the content tracker and the fallback recorder.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: i64,

    /// Delay before scanning rendered messages after a submit key
    #[serde(default = "default_capture_delay_ms")]
    pub capture_delay_ms: u64,

    /// Hosts whose pages get prompt capture
    #[serde(default = "default_conversation_hosts")]
    pub conversation_hosts: Vec<String>,

    /// How long window focus events are kept
    #[serde(default = "default_session_event_retention")]
    pub session_event_retention_secs: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            capture_delay_ms: default_capture_delay_ms(),
            conversation_hosts: default_conversation_hosts(),
            session_event_retention_secs: default_session_event_retention(),
        }
    }
}

fn default_dedup_window_ms() -> i64 {
    5000
}

fn default_capture_delay_ms() -> u64 {
    1000
}

fn default_conversation_hosts() -> Vec<String> {
    vec!["chatgpt.com".to_string(), "chat.openai.com".to_string()]
}

fn default_session_event_retention() -> i64 {
    3600
}

/// Prompt capture configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Prompts shorter than this (after trimming) are ignored
    #[serde(default = "default_min_prompt_length")]
    pub min_prompt_length: usize,

    /// Most recent prompts kept; older ones are evicted first
    #[serde(default = "default_max_prompts")]
    pub max_prompts: usize,

    /// Prompts closer together than this are treated as one
    #[serde(default = "default_prompt_dedup_window_ms")]
    pub dedup_window_ms: i64,

    /// Phrases that mark assistant output or page boilerplate
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_prompt_length: default_min_prompt_length(),
            max_prompts: default_max_prompts(),
            dedup_window_ms: default_prompt_dedup_window_ms(),
            denylist: default_denylist(),
        }
    }
}

fn default_min_prompt_length() -> usize {
    5
}

fn default_max_prompts() -> usize {
    100
}

fn default_prompt_dedup_window_ms() -> i64 {
    2000
}

fn default_denylist() -> Vec<String> {
    [
        "window.__oai_log",
        "I'm doing great",
        "Glad to hear",
        "What's been the highlight",
        "Thanks for asking",
        "requestAnimationFrame",
        "__oai_SSR_",
        "ProseMirror-trailingBreak",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Reward display configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RewardConfig {
    /// Tokens credited per accepted page visit
    #[serde(default = "default_rate_per_page")]
    pub rate_per_page: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            rate_per_page: default_rate_per_page(),
        }
    }
}

impl RewardConfig {
    /// Tokens claimable for the given page count.
    pub fn claimable(&self, pages_visited: u64) -> f64 {
        pages_visited as f64 * self.rate_per_page
    }
}

fn default_rate_per_page() -> f64 {
    0.01
}

/// Classification overrides. Missing tables fall back to the built-in ones.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ClassifyConfig {
    /// Ordered URL rules, first match wins
    #[serde(default)]
    pub url: Option<Vec<Rule<UrlCategory>>>,

    /// Ordered prompt rules, first match wins
    #[serde(default)]
    pub prompt: Option<Vec<Rule<PromptCategory>>>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;
        if self.tracker.dedup_window_ms <= 0 {
            return Err(Error::Config(
                "tracker.dedup_window_ms must be greater than 0".to_string(),
            ));
        }
        if self.capture.dedup_window_ms <= 0 {
            return Err(Error::Config(
                "capture.dedup_window_ms must be greater than 0".to_string(),
            ));
        }
        if self.capture.max_prompts == 0 {
            return Err(Error::Config(
                "capture.max_prompts must be greater than 0".to_string(),
            ));
        }
        if !self.reward.rate_per_page.is_finite() || self.reward.rate_per_page < 0.0 {
            return Err(Error::Config(
                "reward.rate_per_page must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/trailmint/config.toml` (~/.config/trailmint/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("trailmint").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/trailmint/` (~/.local/share/trailmint/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("trailmint")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/trailmint/` (~/.local/state/trailmint/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("trailmint")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/trailmint/state.db` (~/.local/share/trailmint/state.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tracker.dedup_window_ms, 5000);
        assert_eq!(config.capture.min_prompt_length, 5);
        assert_eq!(config.capture.max_prompts, 100);
        assert_eq!(config.relay.timeout_secs, 30);
        assert!(config.classify.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[relay]
server_url = "https://relay.example.com/api"

[tracker]
dedup_window_ms = 4000
conversation_hosts = ["chat.example.org"]

[reward]
rate_per_page = 0.1

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.relay.server_url, "https://relay.example.com/api");
        assert_eq!(config.tracker.dedup_window_ms, 4000);
        assert_eq!(config.tracker.conversation_hosts, vec!["chat.example.org"]);
        assert_eq!(config.tracker.capture_delay_ms, 1000);
        assert_eq!(config.logging.level, "debug");
        assert!((config.reward.claimable(12) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_classify_overrides() {
        let toml = r#"
[[classify.url]]
category = "news"
patterns = ["gazette"]

[[classify.prompt]]
category = "programming"
patterns = ["rust"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let url_rules = config.classify.url.unwrap();
        assert_eq!(url_rules.len(), 1);
        assert_eq!(url_rules[0].category, UrlCategory::News);
        let prompt_rules = config.classify.prompt.unwrap();
        assert_eq!(prompt_rules[0].patterns, vec!["rust"]);
    }

    #[test]
    fn test_relay_config_validation() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());

        let config = RelayConfig {
            server_url: "ftp://relay.example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            server_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_windows_rejected() {
        let mut config = Config::default();
        config.tracker.dedup_window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.max_prompts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prompt_dedup_window_must_be_positive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture]\ndedup_window_ms = -5\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err
            .to_string()
            .contains("capture.dedup_window_ms must be greater than 0"));

        let mut config = Config::default();
        config.capture.dedup_window_ms = 0;
        assert!(config.validate().is_err());
    }
}
