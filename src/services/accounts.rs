//! Game account name resolution.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{BotError, Result};

/// Resolves an in-game account name to its canonical identifier
#[async_trait]
pub trait AccountLookup: Send + Sync {
    /// `Ok(None)` means no such account exists.
    async fn resolve(&self, name: &str) -> Result<Option<Uuid>>;
}

#[derive(Deserialize)]
struct ProfileResponse {
    id: String,
}

/// Mojang-style profile API: `GET /users/profiles/minecraft/{name}?at={epoch}`
pub struct MojangAccountLookup {
    http_client: reqwest::Client,
    base_url: String,
}

impl MojangAccountLookup {
    pub fn new(http_client: reqwest::Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn profile_url(&self, name: &str, at: i64) -> String {
        format!(
            "{}/users/profiles/minecraft/{}?at={}",
            self.base_url,
            urlencoding::encode(name),
            at
        )
    }
}

#[async_trait]
impl AccountLookup for MojangAccountLookup {
    async fn resolve(&self, name: &str) -> Result<Option<Uuid>> {
        if name.is_empty() {
            return Ok(None);
        }

        let url = self.profile_url(name, chrono::Utc::now().timestamp());
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| BotError::AccountLookup {
                message: format!("request failed: {}", e),
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| BotError::AccountLookup {
            message: format!("failed to read response: {}", e),
        })?;

        parse_profile(&body).map(Some)
    }
}

fn parse_profile(body: &str) -> Result<Uuid> {
    let profile: ProfileResponse =
        serde_json::from_str(body).map_err(|e| BotError::AccountLookup {
            message: format!("unexpected response shape: {}", e),
        })?;
    parse_account_id(&profile.id)
}

/// Parse the undashed 32 hex digit id the profile API returns
pub fn parse_account_id(raw: &str) -> Result<Uuid> {
    if raw.len() != 32 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BotError::AccountLookup {
            message: format!("'{}' is not a 32 hex digit account id", raw),
        });
    }

    Uuid::try_parse(raw).map_err(|e| BotError::AccountLookup {
        message: format!("invalid account id '{}': {}", raw, e),
    })
}
