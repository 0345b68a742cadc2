//! Payload injection
//!
//! `POST /publish?shard=<id>-<count>` hands a canonical payload to the
//! consumers of one shard tuple, as if a shard had dispatched it.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sandwich_shard::dispatch::CanonicalPayload;
use serde::Deserialize;

use crate::protocol::{parse_shard_tuple, DispatchFrame};
use crate::server::GatewayState;

/// Largest accepted publish body
pub const MAX_PUBLISH_BODY: usize = 8192;

#[derive(Debug, Default, Deserialize)]
pub struct PublishQuery {
    /// `<shard_id>-<shard_count>`; defaults to the payload's own shard tuple
    pub shard: Option<String>,
}

pub async fn publish_handler(
    State(state): State<GatewayState>,
    Query(query): Query<PublishQuery>,
    body: Bytes,
) -> Response {
    let payload: CanonicalPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let shard = match query.shard.as_deref() {
        Some(raw) => match parse_shard_tuple(raw) {
            Some(shard) => shard,
            None => {
                return (StatusCode::BAD_REQUEST, "shard must be <id>-<count>").into_response();
            }
        },
        None => [payload.metadata.shard_id(), payload.metadata.shard_count()],
    };

    let delivered = state
        .hub()
        .route(shard, &DispatchFrame::from_payload(&payload));
    tracing::debug!(
        shard = ?shard,
        event = payload.event_name(),
        delivered = delivered,
        "Injected payload"
    );

    StatusCode::ACCEPTED.into_response()
}
