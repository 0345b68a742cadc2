//! Response types and error handling for RPC endpoints
//!
//! Every body, successful or not, carries the `{ok, error}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sandwich_common::SandwichError;
use sandwich_service::dto::{BaseResponse, RpcResponse};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// RPC error type for consistent error responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Sandwich(#[from] SandwichError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Sandwich(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn invalid_body(msg: impl Into<String>) -> Self {
        Self::InvalidBody(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, "RPC failed");
        }
        (status, Json(BaseResponse::error(self.to_string()))).into_response()
    }
}

/// Type alias for RPC results
pub type ApiResult<T> = Result<T, ApiError>;

/// Successful RPC body: the operation's fields next to `{ok: true, error: ""}`
pub struct Rpc<T>(pub T);

impl<T: Serialize> IntoResponse for Rpc<T> {
    fn into_response(self) -> Response {
        Json(RpcResponse::ok(self.0)).into_response()
    }
}

/// Successful RPC with nothing to return
pub struct Done;

impl IntoResponse for Done {
    fn into_response(self) -> Response {
        Json(BaseResponse::ok()).into_response()
    }
}
