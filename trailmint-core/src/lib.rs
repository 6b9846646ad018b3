//! # trailmint-core
//!
//! Core library for trailmint - a browsing activity tracker that batches
//! what it records and submits it to a reward relay.
//!
//! This library provides:
//! - Domain types for navigation entries, captured prompts and submissions
//! - Local persistent state with SQLite
//! - The per-tab navigation/session tracker and the background fallback recorder
//! - The submission batcher and the relay HTTP client
//! - Anonymization and classification of archived records
//! - The messaging contract spoken with the browser extension
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows one way:
//! - **Browser events** reach the host as [`messaging::Request`]s
//! - **Tracker / fallback recorder** turn them into store mutations
//! - **Local state** ([`StateStore`]) accumulates entries, prompts and counters
//! - **Batcher** ([`submit::Submitter`]) sends a snapshot to the relay and
//!   resets local state only on success
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trailmint_core::{Config, StateStore};
//! use trailmint_core::messaging::{Request, Router};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let store = StateStore::open(&Config::database_path()).expect("failed to open database");
//! store.migrate().expect("failed to run migrations");
//!
//! let mut router = Router::from_config(Arc::new(store), config).expect("failed to build router");
//! let stats = router.handle(Request::GetStats);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::StateStore;
pub use error::{Error, ErrorKind, RejectionCategory, Result};
pub use types::*;

// Public modules
pub mod anonymize;
pub mod capture;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod fallback;
pub mod framing;
pub mod logging;
pub mod messaging;
pub mod relay;
pub mod submit;
pub mod tracker;
pub mod types;
pub mod wallet;
