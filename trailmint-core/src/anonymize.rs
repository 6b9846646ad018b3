//! Anonymized archive records
//!
//! Builds the privacy-preserving copy of a [`Submission`] that is archived
//! next to the raw one: the wallet address becomes a short hash, URLs and
//! prompt text become categories. Also computes the archive object keys and
//! the data quality score reported with a submission.

use crate::classify::{Classifier, PromptCategory, UrlCategory};
use crate::types::Submission;
use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

/// Hex characters kept from the SHA-256 of a wallet address.
pub const WALLET_HASH_LEN: usize = 16;

/// First 16 hex chars of the SHA-256 of `address`.
pub fn wallet_hash(address: &str) -> String {
    let digest = Sha256::digest(address.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(WALLET_HASH_LEN);
    hash
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizedVisit {
    pub domain: String,
    pub time_spent: u32,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub category: UrlCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizedPrompt {
    #[serde(rename = "type")]
    pub kind: String,
    pub domain: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub prompt_length: usize,
    pub category: PromptCategory,
}

/// Archive copy of a submission with direct identifiers removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizedSubmission {
    pub wallet_address_hash: String,
    pub pages_visited: u64,
    pub time_tracked: u64,
    pub navigation_data: Vec<AnonymizedVisit>,
    pub chatgpt_prompts: Vec<AnonymizedPrompt>,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

pub fn anonymize(submission: &Submission, classifier: &Classifier) -> AnonymizedSubmission {
    AnonymizedSubmission {
        wallet_address_hash: wallet_hash(&submission.wallet_address),
        pages_visited: submission.pages_visited,
        time_tracked: submission.time_tracked,
        navigation_data: submission
            .navigation_data
            .iter()
            .map(|entry| AnonymizedVisit {
                domain: entry.domain.clone(),
                time_spent: entry.time_spent,
                timestamp: entry.timestamp,
                category: classifier.classify_url(&entry.url),
            })
            .collect(),
        chatgpt_prompts: submission
            .chatgpt_prompts
            .iter()
            .map(|prompt| AnonymizedPrompt {
                kind: prompt.kind.clone(),
                domain: prompt.domain.clone(),
                timestamp: prompt.timestamp,
                prompt_length: prompt.prompt_length,
                category: classifier.classify_prompt(&prompt.prompt),
            })
            .collect(),
        timestamp: submission.timestamp,
    }
}

/// Object keys for the raw and anonymized copies of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveKeys {
    pub submission_id: String,
    pub raw: String,
    pub anonymized: String,
}

impl ArchiveKeys {
    /// `raw-data/YYYY/MM/DD/<wallet>/<ms>-<uuid>.json` and
    /// `anonymized-data/YYYY/MM/DD/wallet-<hash16>/<ms>-<uuid>.json`
    pub fn for_submission(wallet_address: &str, at: DateTime<Utc>, submission_id: Uuid) -> Self {
        let day = format!("{:04}/{:02}/{:02}", at.year(), at.month(), at.day());
        let object = format!("{}-{}.json", at.timestamp_millis(), submission_id);
        Self {
            submission_id: submission_id.to_string(),
            raw: format!("raw-data/{}/{}/{}", day, wallet_address, object),
            anonymized: format!(
                "anonymized-data/{}/wallet-{}/{}",
                day,
                wallet_hash(wallet_address),
                object
            ),
        }
    }

    /// Keys with a fresh random submission id.
    pub fn generate(wallet_address: &str, at: DateTime<Utc>) -> Self {
        Self::for_submission(wallet_address, at, Uuid::new_v4())
    }
}

/// `min(pages*2, 20) + min(minutes, 30) + 3 * unique domains`
pub fn data_score(submission: &Submission) -> u64 {
    let domains: HashSet<&str> = submission
        .navigation_data
        .iter()
        .map(|e| e.domain.as_str())
        .collect();
    submission.pages_visited.saturating_mul(2).min(20)
        + submission.time_tracked.min(30)
        + 3 * domains.len() as u64
}
