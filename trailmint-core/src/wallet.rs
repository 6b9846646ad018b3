//! Wallet provider bridge
//!
//! Wallet providers live in the browser page. The host only sees them
//! through a [`WalletBridge`]; the native host ships [`DetachedWallets`],
//! which reports none.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// `uuid` reported for an injected provider that never announced itself.
pub const LEGACY_PROVIDER_UUID: &str = "legacy";

/// Announced wallet provider, as listed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Reverse-DNS identifier, e.g. `io.metamask`
    pub identifier: String,
    pub uuid: String,
}

impl ProviderDescriptor {
    /// Stand-in for an injected provider that did not announce itself.
    pub fn legacy() -> Self {
        Self {
            name: "MetaMask".to_string(),
            identifier: "io.metamask".to_string(),
            uuid: LEGACY_PROVIDER_UUID.to_string(),
        }
    }
}

/// Access to the page's wallet providers.
pub trait WalletBridge: Send {
    /// Whether the page exposes a pre-announcement injected provider.
    fn has_injected_provider(&self) -> bool;

    /// Providers that answered the announcement request.
    fn announced_providers(&self) -> Vec<ProviderDescriptor>;

    /// Forward a JSON-RPC style request to the provider with `uuid`.
    fn forward(&self, uuid: &str, params: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Bridge used when no page is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedWallets;

impl WalletBridge for DetachedWallets {
    fn has_injected_provider(&self) -> bool {
        false
    }

    fn announced_providers(&self) -> Vec<ProviderDescriptor> {
        Vec::new()
    }

    fn forward(&self, uuid: &str, _params: &serde_json::Value) -> Result<serde_json::Value> {
        Err(Error::WalletProviderNotFound(uuid.to_string()))
    }
}

/// Announced providers, or the legacy descriptor when only an injected
/// provider exists.
pub fn detect_wallets(bridge: &dyn WalletBridge) -> Vec<ProviderDescriptor> {
    let providers = bridge.announced_providers();
    if providers.is_empty() && bridge.has_injected_provider() {
        return vec![ProviderDescriptor::legacy()];
    }
    providers
}

/// Route a request to a known provider, or fail without side effects.
pub fn wallet_request(
    bridge: &dyn WalletBridge,
    uuid: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let known = if uuid == LEGACY_PROVIDER_UUID {
        bridge.has_injected_provider()
    } else {
        bridge.announced_providers().iter().any(|p| p.uuid == uuid)
    };
    if !known {
        return Err(Error::WalletProviderNotFound(uuid.to_string()));
    }
    bridge.forward(uuid, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct InjectedOnly;

    impl WalletBridge for InjectedOnly {
        fn has_injected_provider(&self) -> bool {
            true
        }
        fn announced_providers(&self) -> Vec<ProviderDescriptor> {
            Vec::new()
        }
        fn forward(&self, _uuid: &str, params: &serde_json::Value) -> Result<serde_json::Value> {
            Ok(json!({ "echo": params }))
        }
    }

    #[test]
    fn test_detached_reports_nothing() {
        assert!(detect_wallets(&DetachedWallets).is_empty());
        let err = wallet_request(&DetachedWallets, "legacy", &json!({})).unwrap_err();
        assert!(matches!(err, Error::WalletProviderNotFound(_)));
    }

    #[test]
    fn test_legacy_fallback() {
        let providers = detect_wallets(&InjectedOnly);
        assert_eq!(providers, vec![ProviderDescriptor::legacy()]);
        assert_eq!(providers[0].identifier, "io.metamask");

        let result = wallet_request(&InjectedOnly, "legacy", &json!({"method": "eth_accounts"})).unwrap();
        assert_eq!(result["echo"]["method"], "eth_accounts");
        assert!(wallet_request(&InjectedOnly, "other-uuid", &json!({})).is_err());
    }
}
