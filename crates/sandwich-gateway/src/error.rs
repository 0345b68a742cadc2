//! Consumer-facing errors
//!
//! Every error ends the consumer's connection with `{op:9, d:<resumable>}`
//! followed by close code 4000.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session {0} is already connected")]
    SessionInUse(String),

    #[error("Shard {shard_id} is out of range for {shard_count} shards")]
    InvalidShard { shard_id: u32, shard_count: u32 },

    #[error("No identify received in time")]
    IdentifyTimeout,

    #[error("No heartbeat received in time")]
    HeartbeatTimeout,

    #[error("Send buffer overflowed")]
    Overflow,

    #[error("Upstream shard closed: {0}")]
    ShardClosed(String),

    #[error("Gateway is shutting down")]
    Shutdown,
}

impl GatewayError {
    /// Whether the consumer may resume its session afterwards
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload(_) | Self::HeartbeatTimeout | Self::ShardClosed(_) | Self::Shutdown
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}
