//! Directory client module for account, subscription and producer-key reads.
//!
//! The platform directory owns user accounts and subscription records; this
//! core only reads them. The client here answers three queries:
//! - Current account state for a user id (role, suspension flag)
//! - The user's current subscription record, if any
//! - The producer public-key set used by the event ingest endpoint
//!
//! # Architecture
//!
//! [`DirectoryClient`] is shared across the application via `Arc` and is the
//! single suspension point of the authenticator and the entitlement gate.
//! It applies a 5-second request timeout and maps upstream failures to a
//! structured [`DirectoryError`] so callers can distinguish "account does
//! not exist" from "directory is down".

use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::types::{Entitlement, Identity};

/// Default timeout for directory API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of retry attempts for startup operations.
const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff (100ms).
const BASE_BACKOFF_MS: u64 = 100;

/// Maximum delay cap for exponential backoff (10 seconds).
const MAX_BACKOFF_MS: u64 = 10_000;

/// Maximum jitter to add to backoff delay (100ms).
const MAX_JITTER_MS: u64 = 100;

/// Errors that can occur when reading from the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The requested record does not exist.
    ///
    /// For account lookups this means the credential references an identity
    /// the platform no longer knows. Maps to HTTP 401 at the auth layer.
    #[error("record not found")]
    NotFound,

    /// The request to the directory timed out.
    ///
    /// Maps to HTTP 503 Service Unavailable.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The directory is unreachable.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// Failed to parse the response from the directory.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),

    /// All retry attempts have been exhausted.
    ///
    /// Used during startup when the producer-key bootstrap fails after all
    /// retry attempts.
    #[error("all {attempts} retry attempts failed: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error encountered.
        last_error: String,
    },
}

/// A producer public key registered with the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerKey {
    /// The identifier of the producer service that owns this key.
    pub producer_id: String,

    /// The base64-encoded Ed25519 public key.
    pub public_key: String,
}

/// Response format from the producer-keys endpoint.
#[derive(Debug, Deserialize)]
struct ProducerKeysResponse {
    keys: Vec<ProducerKey>,
}

/// Client for reading from the platform directory service.
///
/// Thread-safe; wrap in `Arc` to share across tasks.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    /// The underlying HTTP client.
    http_client: Client,

    /// Base URL of the directory service.
    base_url: String,

    /// API key presented on every request.
    api_key: String,
}

impl DirectoryClient {
    /// Creates a new directory client.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Configuration`] if the HTTP client cannot
    /// be created.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, DirectoryError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                DirectoryError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }

    /// Fetches the current account state for a user id.
    ///
    /// Every authorization check calls this fresh; nothing is cached, so a
    /// suspension set in the directory is observed on the caller's next
    /// request.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] - No account exists for this id
    /// - [`DirectoryError::Timeout`] / [`DirectoryError::Unavailable`] -
    ///   Infrastructure failure
    /// - [`DirectoryError::InvalidResponse`] - Unexpected response shape
    pub async fn fetch_account(&self, user_id: &str) -> Result<Identity, DirectoryError> {
        let url = format!("{}/v1/accounts/{}", self.base_url, user_id);

        debug!(url = %url, "Fetching account from directory");

        let response = self
            .http_client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(user_id = %user_id, "Account not found");
            return Err(DirectoryError::NotFound);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Unexpected response from directory accounts");
            return Err(DirectoryError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let identity: Identity = response.json().await.map_err(|e| {
            DirectoryError::InvalidResponse(format!("failed to parse account response: {e}"))
        })?;

        debug!(user_id = %identity.id, suspended = identity.suspended, "Account fetched");

        Ok(identity)
    }

    /// Fetches the user's current subscription record, if any.
    ///
    /// Returns `Ok(None)` when the user holds no subscription at all; the
    /// entitlement gate additionally checks the record's status, so an
    /// expired or canceled record also denies access.
    pub async fn fetch_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Entitlement>, DirectoryError> {
        let url = format!("{}/v1/accounts/{}/subscription", self.base_url, user_id);

        debug!(url = %url, "Fetching subscription from directory");

        let response = self
            .http_client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(user_id = %user_id, "No subscription record");
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Unexpected response from directory subscriptions");
            return Err(DirectoryError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let entitlement: Entitlement = response.json().await.map_err(|e| {
            DirectoryError::InvalidResponse(format!("failed to parse subscription response: {e}"))
        })?;

        debug!(
            owner_id = %entitlement.owner_id,
            plan = %entitlement.plan,
            status = %entitlement.status,
            "Subscription fetched"
        );

        Ok(Some(entitlement))
    }

    /// Fetches producer public keys from the directory.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Timeout`] / [`DirectoryError::Unavailable`] -
    ///   Infrastructure failure
    /// - [`DirectoryError::InvalidResponse`] - Unexpected response shape
    pub async fn fetch_producer_keys(&self) -> Result<Vec<ProducerKey>, DirectoryError> {
        let url = format!("{}/v1/producer-keys", self.base_url);

        debug!(url = %url, "Fetching producer keys from directory");

        let response = self
            .http_client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to fetch producer keys");
            return Err(DirectoryError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let keys_response: ProducerKeysResponse = response.json().await.map_err(|e| {
            DirectoryError::InvalidResponse(format!("failed to parse keys response: {e}"))
        })?;

        debug!(count = keys_response.keys.len(), "Fetched producer keys");

        Ok(keys_response.keys)
    }

    /// Fetches producer keys with retry logic for startup.
    ///
    /// Implements exponential backoff with jitter:
    ///
    /// ```text
    /// delay = min(2^attempt * 100ms + random(0, 100ms), 10s)
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::RetriesExhausted`] if all retry attempts
    /// fail. The server should exit with an error if this occurs during
    /// startup.
    pub async fn fetch_producer_keys_with_retry(
        &self,
    ) -> Result<Vec<ProducerKey>, DirectoryError> {
        let mut last_error = String::new();

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            match self.fetch_producer_keys().await {
                Ok(keys) => {
                    if attempt > 0 {
                        info!(
                            attempt = attempt + 1,
                            "Producer key fetch succeeded after retry"
                        );
                    }
                    return Ok(keys);
                }
                Err(e) => {
                    last_error = e.to_string();

                    if attempt < MAX_RETRY_ATTEMPTS - 1 {
                        let delay = calculate_backoff_delay(attempt);
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRY_ATTEMPTS,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Producer key fetch failed, retrying"
                        );
                        sleep(delay).await;
                    } else {
                        error!(
                            attempts = MAX_RETRY_ATTEMPTS,
                            error = %e,
                            "Producer key fetch failed, no more retries"
                        );
                    }
                }
            }
        }

        Err(DirectoryError::RetriesExhausted {
            attempts: MAX_RETRY_ATTEMPTS,
            last_error,
        })
    }

    /// Returns the base URL of the directory service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Maps reqwest transport errors into the directory taxonomy.
fn map_transport_error(e: reqwest::Error) -> DirectoryError {
    if e.is_timeout() {
        DirectoryError::Timeout(REQUEST_TIMEOUT)
    } else if e.is_connect() {
        DirectoryError::Unavailable(format!("connection failed: {e}"))
    } else {
        DirectoryError::Unavailable(format!("request failed: {e}"))
    }
}

/// Calculates the backoff delay for a given retry attempt.
///
/// `delay = min(2^attempt * 100ms + random(0, 100ms), 10s)`
fn calculate_backoff_delay(attempt: u32) -> Duration {
    let exponential_ms = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_ms = rand::rng().random_range(0..=MAX_JITTER_MS);
    let total_ms = exponential_ms.saturating_add(jitter_ms).min(MAX_BACKOFF_MS);
    Duration::from_millis(total_ms)
}
