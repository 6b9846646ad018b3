//! Error types for trailmint-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business rejection reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    /// Per-wallet daily submission cap reached
    DailyLimit,
    /// Too soon after the previous submission
    Cooldown,
    /// Payload failed the relay's validation
    InvalidData,
    /// Anything the relay did not categorize
    Generic,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::DailyLimit => "daily_limit",
            RejectionCategory::Cooldown => "cooldown",
            RejectionCategory::InvalidData => "invalid_data",
            RejectionCategory::Generic => "generic",
        }
    }

    /// Parse the relay's `type` field; unknown or missing values are generic.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("daily_limit") => RejectionCategory::DailyLimit,
            Some("cooldown") => RejectionCategory::Cooldown,
            Some("invalid_data") => RejectionCategory::InvalidData,
            _ => RejectionCategory::Generic,
        }
    }
}

impl std::fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure classes used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local state could not be read or written; treated as transient
    Storage,
    /// Relay unreachable or answered with something unexpected
    Network,
    /// No wallet connected or no provider available
    Wallet,
    /// Relay refused the submission for a business reason
    Business,
    /// Bad or missing configuration
    Config,
}

/// Main error type for the trailmint-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Relay transport or protocol error
    #[error("relay error: {0}")]
    Relay(String),

    /// Relay accepted the request but refused it
    #[error("{message}")]
    Rejected {
        category: RejectionCategory,
        message: String,
    },

    /// Submission attempted without a wallet
    #[error("no wallet connected")]
    WalletNotConnected,

    /// Wallet provider lookup failed
    #[error("wallet provider not found: {0}")]
    WalletProviderNotFound(String),

    /// Malformed wallet address
    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),

    /// Another submission has not completed yet
    #[error("a submission is already in flight")]
    SubmissionInFlight,
}

impl Error {
    /// Map this error onto the failure class it belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(_) | Error::Io(_) | Error::Json(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
            Error::Relay(_) | Error::SubmissionInFlight => ErrorKind::Network,
            Error::Rejected { .. } => ErrorKind::Business,
            Error::WalletNotConnected
            | Error::WalletProviderNotFound(_)
            | Error::InvalidAddress(_) => ErrorKind::Wallet,
        }
    }

    /// Message shown to the user, worded by failure class.
    ///
    /// Business rejections keep the relay's text verbatim.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Wallet => format!("wallet required: {}", self),
            ErrorKind::Business => match self.rejection_category() {
                Some(RejectionCategory::Generic) | None => {
                    format!("rejected by relay: {}", self)
                }
                Some(category) => format!("rejected by relay [{}]: {}", category, self),
            },
            ErrorKind::Network | ErrorKind::Storage => {
                format!("{} (local activity kept for retry)", self)
            }
            ErrorKind::Config => self.to_string(),
        }
    }

    /// Rejection category, when the relay supplied one.
    pub fn rejection_category(&self) -> Option<RejectionCategory> {
        match self {
            Error::Rejected { category, .. } => Some(*category),
            _ => None,
        }
    }
}

/// Result type alias for trailmint-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_category_from_wire() {
        assert_eq!(
            RejectionCategory::from_wire(Some("cooldown")),
            RejectionCategory::Cooldown
        );
        assert_eq!(
            RejectionCategory::from_wire(Some("daily_limit")),
            RejectionCategory::DailyLimit
        );
        assert_eq!(
            RejectionCategory::from_wire(Some("something_else")),
            RejectionCategory::Generic
        );
        assert_eq!(RejectionCategory::from_wire(None), RejectionCategory::Generic);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::WalletNotConnected.kind(), ErrorKind::Wallet);
        assert_eq!(Error::Relay("down".into()).kind(), ErrorKind::Network);
        assert_eq!(Error::Config("bad".into()).kind(), ErrorKind::Config);

        let rejected = Error::Rejected {
            category: RejectionCategory::Cooldown,
            message: "Cooldown period active".into(),
        };
        assert_eq!(rejected.kind(), ErrorKind::Business);
        assert_eq!(
            rejected.rejection_category(),
            Some(RejectionCategory::Cooldown)
        );
        assert_eq!(rejected.to_string(), "Cooldown period active");
    }

    #[test]
    fn test_user_message_follows_kind() {
        let wallet = Error::InvalidAddress("0x1234".into()).user_message();
        assert_eq!(wallet, "wallet required: invalid wallet address: 0x1234");

        let network = Error::Relay("connection refused".into()).user_message();
        assert!(network.ends_with("(local activity kept for retry)"));

        let cooldown = Error::Rejected {
            category: RejectionCategory::Cooldown,
            message: "Cooldown period active".into(),
        };
        assert_eq!(
            cooldown.user_message(),
            "rejected by relay [cooldown]: Cooldown period active"
        );

        let generic = Error::Rejected {
            category: RejectionCategory::Generic,
            message: "Try later".into(),
        };
        assert_eq!(generic.user_message(), "rejected by relay: Try later");
        assert!(!generic.user_message().contains("kept for retry"));
    }
}
