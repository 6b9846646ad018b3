//! HTTP client for the relay API

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::RelayConfig;
use crate::error::{Error, RejectionCategory, Result};
use crate::types::Submission;

/// Successful answer to `POST /submit-data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    #[serde(default = "default_true")]
    pub success: bool,
    /// On-chain transaction reference
    #[serde(default, alias = "transactionHash")]
    pub transaction_reference: Option<String>,
    /// Tokens minted for this submission, as a decimal string
    #[serde(default, alias = "tokensRewarded", deserialize_with = "string_or_number")]
    pub tokens_awarded: Option<String>,
    #[serde(default)]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_score: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_stored: Option<bool>,
}

/// `GET /contract-info`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub address: String,
    #[serde(default)]
    pub abi: Vec<serde_json::Value>,
}

/// `GET /balance/:address`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub address: String,
    #[serde(deserialize_with = "required_string_or_number")]
    pub balance: String,
    #[serde(default)]
    pub symbol: Option<String>,
}

impl TokenBalance {
    /// Balance as shown to the user, e.g. `12.5 SIM`
    pub fn display(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{} {}", self.balance, symbol),
            None => self.balance.clone(),
        }
    }
}

/// `GET /analytics?days=N`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    #[serde(default)]
    pub total_submissions: Option<u64>,
    #[serde(default)]
    pub date_range: Option<String>,
    #[serde(default)]
    pub average_per_day: Option<f64>,
    #[serde(default)]
    pub data_generated: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Set when the relay's archive is disabled
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /marketplace`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marketplace {
    #[serde(default)]
    pub total_datasets: u64,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub pricing: serde_json::Value,
    #[serde(default)]
    pub data_types: Vec<String>,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub contract_connected: bool,
    #[serde(default)]
    pub s3_enabled: bool,
}

/// Error body the relay sends with non-2xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// HTTP client for the relay API
pub struct RelayClient {
    config: RelayConfig,
    http_client: reqwest::Client,
    base_url: String,
    health_url: String,
}

impl RelayClient {
    /// Create a new relay client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.server_url.trim_end_matches('/').to_string();
        let health_url = url::Url::parse(&base_url)
            .and_then(|u| u.join("/health"))
            .map_err(|e| Error::Config(format!("invalid relay.server_url: {}", e)))?
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
            health_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a submission. Never retried: a retry after a lost response
    /// could mint twice.
    pub async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt> {
        let url = format!("{}/submit-data", self.base_url);

        tracing::info!(
            url = %url,
            pages_visited = submission.pages_visited,
            time_tracked = submission.time_tracked,
            entries = submission.navigation_data.len(),
            prompts = submission.chatgpt_prompts.len(),
            "Submitting activity to relay"
        );

        let response = self
            .http_client
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(|e| Error::Relay(format!("HTTP request failed: {}", e)))?;

        let receipt: SubmitReceipt = parse_response(response).await?;
        if !receipt.success {
            return Err(Error::Rejected {
                category: RejectionCategory::Generic,
                message: "relay reported the submission as unsuccessful".to_string(),
            });
        }
        Ok(receipt)
    }

    pub async fn contract_info(&self) -> Result<ContractInfo> {
        self.get_with_retry(&format!("{}/contract-info", self.base_url))
            .await
    }

    pub async fn balance(&self, address: &str) -> Result<TokenBalance> {
        let url = format!("{}/balance/{}", self.base_url, urlencoding::encode(address));
        self.get_with_retry(&url).await
    }

    pub async fn analytics(&self, days: u32) -> Result<Analytics> {
        self.get_with_retry(&format!("{}/analytics?days={}", self.base_url, days))
            .await
    }

    pub async fn marketplace(&self) -> Result<Marketplace> {
        self.get_with_retry(&format!("{}/marketplace", self.base_url))
            .await
    }

    pub async fn health(&self) -> Result<Health> {
        self.get(&self.health_url).await
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Relay(format!("HTTP request failed: {}", e)))?;
        parse_response(response).await
    }

    /// GET with retry logic
    ///
    /// Retries transient failures (5xx, transport errors) with exponential backoff.
    async fn get_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying GET {} (attempt {}/{}), waiting {:?}",
                    url,
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.get(url).await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable_error(&e) => {
                    tracing::warn!("Transient relay error: {}", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Relay("max retries exceeded".to_string())))
    }
}

/// Decode a 2xx body, or map a failure body onto an error.
async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::Relay(format!("failed to read response: {}", e)))?;

    if status.is_success() {
        serde_json::from_str(&text)
            .map_err(|e| Error::Relay(format!("failed to parse response: {}", e)))
    } else {
        Err(error_from_body(status, &text))
    }
}

fn error_from_body(status: StatusCode, text: &str) -> Error {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    match (body.error, body.kind) {
        (Some(message), Some(kind)) => Error::Rejected {
            category: RejectionCategory::from_wire(Some(&kind)),
            message,
        },
        (Some(message), None) => {
            let detail = body
                .details
                .map(|d| format!(" ({})", d))
                .unwrap_or_default();
            Error::Relay(format!("API error ({}): {}{}", status, message, detail))
        }
        _ => Error::Relay(format!("API error ({}): {}", status, text.trim())),
    }
}

/// Check if an error is retryable (transient)
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Relay(msg) => {
            msg.starts_with("API error (5")
                || msg.contains("request failed")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

fn required_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_bad_config() {
        let config = RelayConfig {
            server_url: "ftp://relay.example.com".to_string(),
            ..Default::default()
        };
        assert!(RelayClient::new(config).is_err());
    }

    #[test]
    fn test_health_url_uses_origin() {
        let client = RelayClient::new(RelayConfig {
            server_url: "https://relay.example.com/api/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "https://relay.example.com/api");
        assert_eq!(client.health_url, "https://relay.example.com/health");
    }

    #[test]
    fn test_receipt_accepts_both_field_names() {
        let legacy: SubmitReceipt = serde_json::from_str(
            r#"{"success":true,"transactionHash":"0xdead","tokensRewarded":"0.05","submissionId":"s-1","dataScore":12}"#,
        )
        .unwrap();
        assert_eq!(legacy.transaction_reference.as_deref(), Some("0xdead"));
        assert_eq!(legacy.tokens_awarded.as_deref(), Some("0.05"));
        assert_eq!(legacy.data_score, Some(12));

        let current: SubmitReceipt = serde_json::from_str(
            r#"{"transactionReference":"0xbeef","tokensAwarded":0.5}"#,
        )
        .unwrap();
        assert!(current.success);
        assert_eq!(current.transaction_reference.as_deref(), Some("0xbeef"));
        assert_eq!(current.tokens_awarded.as_deref(), Some("0.5"));

        let json = serde_json::to_value(&current).unwrap();
        assert_eq!(json["transactionReference"], "0xbeef");
        assert_eq!(json["tokensAwarded"], "0.5");
    }

    #[test]
    fn test_error_body_mapping() {
        let err = error_from_body(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":"Cooldown period active. Please wait before submitting again.","type":"cooldown"}"#,
        );
        assert_eq!(err.rejection_category(), Some(RejectionCategory::Cooldown));
        assert_eq!(
            err.to_string(),
            "Cooldown period active. Please wait before submitting again."
        );

        let err = error_from_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"Failed to mint tokens","details":"nonce too low"}"#,
        );
        assert!(matches!(err, Error::Relay(_)));
        assert!(is_retryable_error(&err));

        let err = error_from_body(StatusCode::BAD_REQUEST, "Bad Request");
        assert!(matches!(err, Error::Relay(ref m) if m.contains("Bad Request")));
        assert!(!is_retryable_error(&err));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Relay(
            "API error (503 Service Unavailable): down".to_string()
        )));
        assert!(is_retryable_error(&Error::Relay(
            "HTTP request failed: timeout".to_string()
        )));
        assert!(!is_retryable_error(&Error::Relay(
            "API error (404 Not Found): missing".to_string()
        )));
        assert!(!is_retryable_error(&Error::Rejected {
            category: RejectionCategory::DailyLimit,
            message: "Daily submission limit exceeded".to_string(),
        }));
    }

    #[test]
    fn test_balance_display() {
        let balance: TokenBalance =
            serde_json::from_str(r#"{"address":"0xabc","balance":"12.5","symbol":"SIM"}"#)
                .unwrap();
        assert_eq!(balance.display(), "12.5 SIM");
    }
}
