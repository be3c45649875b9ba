//! Donation ledger lookups.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BotError, Result};

/// Looks up how much has been donated under an email
#[async_trait]
pub trait DonationLedger: Send + Sync {
    /// Cumulative donation total for `email`. An email with no donations is
    /// `Ok(0.0)`; only transport or protocol failures are errors.
    async fn total_for(&self, email: &str) -> Result<f64>;
}

/// Ledger response body: `{ "data": { "total": 12.5 } }`
#[derive(Deserialize)]
struct TotalResponse {
    data: TotalData,
}

#[derive(Deserialize)]
struct TotalData {
    total: f64,
}

/// Ledger reached over HTTP with a bearer token
pub struct HttpDonationLedger {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDonationLedger {
    pub fn new(http_client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn total_url(&self, email: &str) -> String {
        format!(
            "{}/donation/total/{}",
            self.base_url,
            urlencoding::encode(email)
        )
    }
}

#[async_trait]
impl DonationLedger for HttpDonationLedger {
    async fn total_for(&self, email: &str) -> Result<f64> {
        let response = self
            .http_client
            .get(self.total_url(email))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| BotError::Ledger {
                message: format!("request failed: {}", e),
            })?;

        if response.status() != reqwest::StatusCode::OK {
            debug!(
                "Ledger returned {} for a total lookup, treating as no donations",
                response.status()
            );
            return Ok(0.0);
        }

        let body = response.text().await.map_err(|e| BotError::Ledger {
            message: format!("failed to read response: {}", e),
        })?;

        parse_total(&body)
    }
}

fn parse_total(body: &str) -> Result<f64> {
    serde_json::from_str::<TotalResponse>(body)
        .map(|r| r.data.total)
        .map_err(|e| BotError::Ledger {
            message: format!("unexpected response shape: {}", e),
        })
}
