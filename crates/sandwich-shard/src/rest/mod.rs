//! Discord REST: `GET /gateway/bot`
//!
//! The only endpoint the daemon calls itself. Everything else is left to the
//! consumers.

use std::time::Duration;

use reqwest::StatusCode;
use sandwich_common::SandwichError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identify budget reported by Discord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

impl Default for SessionStartLimit {
    fn default() -> Self {
        Self {
            total: 1000,
            remaining: 1000,
            reset_after: 0,
            max_concurrency: 1,
        }
    }
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Unexpected status {0}")]
    Status(u16),
}

impl From<RestError> for SandwichError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) => SandwichError::transport(e),
            RestError::Unauthorized => SandwichError::Auth("invalid bot token".to_string()),
            RestError::RateLimited { retry_after_ms } => SandwichError::RateLimited {
                retry_after_ms: Some(retry_after_ms),
            },
            RestError::Status(status) => {
                SandwichError::Transport(format!("GET /gateway/bot returned {status}"))
            }
        }
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    /// Seconds, possibly fractional
    retry_after: f64,
}

/// Minimal Discord REST client
#[derive(Debug, Clone)]
pub struct DiscordRest {
    client: reqwest::Client,
    api_base: String,
}

impl DiscordRest {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                "DiscordBot (https://github.com/WelcomerTeam/Sandwich-Daemon, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Fetch the gateway URL, recommended shards, and session start limit
    pub async fn gateway_bot(&self, token: &str) -> Result<GatewayBot, RestError> {
        let token = token.strip_prefix("Bot ").unwrap_or(token).trim();

        let response = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {token}"))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => Err(RestError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_ms = response
                    .json::<RateLimitBody>()
                    .await
                    .map(|b| (b.retry_after * 1000.0) as u64)
                    .unwrap_or(5000);
                Err(RestError::RateLimited { retry_after_ms })
            }
            status => Err(RestError::Status(status.as_u16())),
        }
    }
}
