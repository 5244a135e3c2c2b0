//! Best-effort anchoring of attestations with an external ledger.

use crate::attestation::Attestation;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Anchoring errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnchorError {
    /// Request could not be sent or completed
    #[error("anchor request failed: {message}")]
    Http {
        /// Status code, when a response arrived
        status: Option<u16>,
        /// Transport or body message
        message: String,
    },
    /// Response was not JSON
    #[error("anchor response unreadable: {0}")]
    Decode(String),
    /// No response within the deadline
    #[error("anchor timed out after {0:?}")]
    Timeout(Duration),
}

/// External ledger that accepts signed attestations
#[async_trait]
pub trait Anchor: Send + Sync {
    /// Submit an attestation and return the ledger's receipt
    ///
    /// # Errors
    ///
    /// Returns error if the ledger rejects or cannot be reached
    async fn anchor(&self, attestation: &Attestation) -> Result<Value, AnchorError>;
}

/// Anchor that POSTs attestations as JSON to `<base>/attest`
#[derive(Debug, Clone)]
pub struct HttpAnchor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnchor {
    /// Create an anchor for the ledger at `base_url`
    ///
    /// `timeout` bounds each request on the client side as well.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AnchorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("affirm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnchorError::Http {
                status: None,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/attest", base_url.trim_end_matches('/')),
        })
    }

    /// Full URL attestations are posted to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Anchor for HttpAnchor {
    async fn anchor(&self, attestation: &Attestation) -> Result<Value, AnchorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(attestation)
            .send()
            .await
            .map_err(|e| AnchorError::Http {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read anchor response body".to_string());
            return Err(AnchorError::Http {
                status: Some(status.as_u16()),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AnchorError::Decode(e.to_string()))
    }
}

/// Anchor `attestation`, never failing: the receipt or the failure note is
/// attached to the returned copy
pub async fn anchor_best_effort(anchor: &dyn Anchor, attestation: Attestation, timeout: Duration) -> Attestation {
    let outcome = match tokio::time::timeout(timeout, anchor.anchor(&attestation)).await {
        Ok(result) => result,
        Err(_) => Err(AnchorError::Timeout(timeout)),
    };
    match outcome {
        Ok(receipt) => {
            tracing::info!(kid = %attestation.signing_key, "attestation anchored");
            attestation.with_receipt(receipt)
        }
        Err(e) => {
            tracing::warn!(error = %e, "anchoring failed");
            attestation.with_ledger_error(e.to_string())
        }
    }
}
