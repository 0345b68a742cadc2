//! Daemon-wide error taxonomy
//!
//! Every layer converts its local errors into `SandwichError` so `?` works
//! across crate boundaries and callers can branch on `kind()`.

use sandwich_core::DomainError;
use serde::Serialize;

use crate::config::ConfigError;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Protocol,
    Auth,
    SessionExhausted,
    RateLimited,
    Cache,
    Cancelled,
    Config,
}

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum SandwichError {
    /// WebSocket I/O, TLS, DNS
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected op, bad envelope, inflate failure, JSON decode
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid token, disallowed intents, sharding required
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Session start limit exhausted: {remaining} remaining, {required} required")]
    SessionExhausted {
        remaining: u32,
        required: u32,
        reset_after_ms: u64,
    },

    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error(transparent)]
    Cache(#[from] DomainError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SandwichError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Auth(_) => ErrorKind::Auth,
            Self::SessionExhausted { .. } => ErrorKind::SessionExhausted,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Fatal errors stop retrying and fail the owning group
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// HTTP status for the RPC surface
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Cache(e) if e.is_validation() => 400,
            Self::Cache(_) => 404,
            Self::Auth(_) => 401,
            Self::RateLimited { .. } => 429,
            _ => 500,
        }
    }

    /// Get error code for API responses
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Auth(_) => "AUTH_FAILED",
            Self::SessionExhausted { .. } => "SESSION_EXHAUSTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Cache(e) => e.code(),
            Self::Cancelled => "CANCELLED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<ConfigError> for SandwichError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SandwichError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type alias for daemon operations
pub type SandwichResult<T> = Result<T, SandwichError>;
