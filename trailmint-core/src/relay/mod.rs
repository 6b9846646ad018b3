//! Relay/reward service client
//!
//! The relay is an external HTTP service: it validates a submission,
//! forwards the reward call to the token contract and archives raw and
//! anonymized copies. This module only consumes its contract.
//!
//! ## Endpoints
//!
//! | Method | Path | Used for |
//! |--------|------|----------|
//! | `POST` | `/submit-data` | [`Relay::submit`] |
//! | `GET` | `/contract-info` | token contract address and ABI |
//! | `GET` | `/balance/:address` | token balance, cached locally as `tokenBalance` |
//! | `GET` | `/analytics?days=N` | archive statistics |
//! | `GET` | `/marketplace` | dataset listing |
//! | `GET` | `/health` | liveness, resolved against the server origin |
//!
//! Configure it in `~/.config/trailmint/config.toml`:
//!
//! ```toml
//! [relay]
//! server_url = "https://relay.example.com/api"
//! timeout_secs = 30
//! ```

mod client;

pub use client::{
    Analytics, ContractInfo, Health, Marketplace, RelayClient, SubmitReceipt, TokenBalance,
};

use crate::error::Result;
use crate::types::Submission;
use async_trait::async_trait;

/// Anything that can accept a submission. The batcher is generic over this
/// so tests can stand in for the HTTP service.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt>;
}

#[async_trait]
impl Relay for RelayClient {
    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt> {
        RelayClient::submit(self, submission).await
    }
}

/// Fetch the balance for `address` and cache its display string as
/// `tokenBalance`. A cache write failure is logged, not returned.
pub async fn refresh_balance(
    client: &RelayClient,
    store: &crate::db::StateStore,
    address: &str,
) -> Result<TokenBalance> {
    let balance = client.balance(address).await?;
    if let Err(e) = store.set_token_balance(&balance.display()) {
        tracing::warn!(error = %e, "Failed to cache token balance");
    }
    Ok(balance)
}
