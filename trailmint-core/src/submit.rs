//! Submission batcher
//!
//! Snapshots the accumulated activity, sends it to the relay and clears the
//! local state only after a success response. Any failure leaves the state
//! exactly as it was so the user can retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::StateStore;
use crate::error::{Error, Result};
use crate::relay::{Relay, SubmitReceipt};
use crate::types::Submission;

/// Whether `address` looks like a 20-byte hex account address.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Sends accumulated activity to a [`Relay`]
pub struct Submitter<R: Relay> {
    store: Arc<StateStore>,
    relay: R,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the submission ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: Relay> Submitter<R> {
    pub fn new(store: Arc<StateStore>, relay: R) -> Self {
        Self {
            store,
            relay,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// Whether a submission is currently waiting for the relay.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit everything accumulated so far for `wallet_address`.
    ///
    /// A second call while one is pending fails with
    /// [`Error::SubmissionInFlight`] without touching state.
    pub async fn submit(&self, wallet_address: &str, at: DateTime<Utc>) -> Result<SubmitReceipt> {
        if !is_valid_address(wallet_address) {
            return Err(Error::InvalidAddress(wallet_address.to_string()));
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Submission requested while another is in flight");
            return Err(Error::SubmissionInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let snapshot = self.store.snapshot()?;
        let submission = Submission::from_snapshot(wallet_address, snapshot, at);

        match self.relay.submit(&submission).await {
            Ok(receipt) => {
                self.store.reset_all()?;
                tracing::info!(
                    transaction = receipt.transaction_reference.as_deref().unwrap_or("-"),
                    tokens = receipt.tokens_awarded.as_deref().unwrap_or("-"),
                    pages_visited = submission.pages_visited,
                    "Submission accepted"
                );
                Ok(receipt)
            }
            Err(e) => {
                // Local state is untouched so the user can retry
                tracing::warn!(
                    error = %e,
                    category = e.rejection_category().map(|c| c.as_str()).unwrap_or("none"),
                    "Submission failed"
                );
                Err(e)
            }
        }
    }
}

/// Synchronous wrapper for Submitter
///
/// Provides blocking methods for use in synchronous code.
pub struct SyncSubmitter<R: Relay> {
    inner: Submitter<R>,
    runtime: tokio::runtime::Runtime,
}

impl<R: Relay> SyncSubmitter<R> {
    pub fn new(store: Arc<StateStore>, relay: R) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Relay(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            inner: Submitter::new(store, relay),
            runtime,
        })
    }

    /// Submit (blocking)
    pub fn submit(&self, wallet_address: &str, at: DateTime<Utc>) -> Result<SubmitReceipt> {
        self.runtime.block_on(self.inner.submit(wallet_address, at))
    }

    pub fn relay(&self) -> &R {
        self.inner.relay()
    }
}
