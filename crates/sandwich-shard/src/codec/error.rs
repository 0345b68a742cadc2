//! Codec errors

use sandwich_common::SandwichError;
use thiserror::Error;

/// Errors raised while decoding inbound frames
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Inflate failed: {0}")]
    Inflate(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for SandwichError {
    fn from(err: CodecError) -> Self {
        SandwichError::Protocol(err.to_string())
    }
}
