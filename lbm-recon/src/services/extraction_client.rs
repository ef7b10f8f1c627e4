//! External extraction service client
//!
//! The engine never talks to an AI model directly; it hands document text
//! to an external extraction service and receives raw candidate records
//! back. Calls are bounded: per-request timeout plus two retries with
//! doubling backoff, after which the whole operation fails without
//! creating a session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ReconError, ReconResult};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Initial retry backoff, doubled per attempt
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Attempts before giving up (initial call + 2 retries)
const MAX_ATTEMPTS: u32 = 3;

/// Source of raw candidate records for a document
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Extract raw vehicle records from document text
    async fn extract(&self, document_text: &str) -> ReconResult<Vec<Value>>;
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ExtractResponse {
    candidates: Vec<Value>,
}

/// HTTP client for the hosted extraction service
pub struct HttpExtractionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpExtractionClient {
    pub fn new(base_url: String, api_key: Option<String>) -> ReconResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReconError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn attempt(&self, document_text: &str) -> Result<Vec<Value>, reqwest::Error> {
        let mut request = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&ExtractRequest {
                text: document_text,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let parsed: ExtractResponse = response.json().await?;
        Ok(parsed.candidates)
    }
}

/// Only timeouts and 5xx responses are worth retrying; a rejected
/// request or a malformed response will not get better on a second try.
fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || matches!(error.status(), Some(status) if status.is_server_error())
}

#[async_trait]
impl ExtractionProvider for HttpExtractionClient {
    async fn extract(&self, document_text: &str) -> ReconResult<Vec<Value>> {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(document_text).await {
                Ok(candidates) => {
                    debug!(
                        count = candidates.len(),
                        attempt, "Extraction service returned candidates"
                    );
                    return Ok(candidates);
                }
                Err(e) if !is_retryable(&e) => {
                    warn!(error = %e, "Extraction request failed with non-retryable error");
                    return Err(ReconError::ExternalServiceFailure(e.to_string()));
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Extraction request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    warn!(error = %e, "Extraction request failed, retries exhausted");
                    return Err(ReconError::ExternalServiceTimeout);
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}
