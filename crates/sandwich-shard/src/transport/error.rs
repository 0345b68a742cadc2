//! Transport errors

use sandwich_common::SandwichError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unknown messaging driver: {0}")]
    UnknownDriver(String),

    #[error("Invalid option {key}: {value}")]
    InvalidOption { key: String, value: String },

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to publish: {0}")]
    Publish(String),

    #[error("Publisher is closed")]
    Closed,
}

impl From<TransportError> for SandwichError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UnknownDriver(_) | TransportError::InvalidOption { .. } => {
                SandwichError::Config(err.to_string())
            }
            _ => SandwichError::Transport(err.to_string()),
        }
    }
}
