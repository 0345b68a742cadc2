//! Virtual gateway server
//!
//! `GET /` upgrades to the consumer WebSocket; `POST /publish` injects
//! payloads.

mod handler;
mod publish;
mod state;

pub use handler::gateway_handler;
pub use publish::{publish_handler, PublishQuery, MAX_PUBLISH_BODY};
pub use state::{GatewaySettings, GatewayState};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new().route("/", get(gateway_handler)).route(
        "/publish",
        post(publish_handler).layer(DefaultBodyLimit::max(MAX_PUBLISH_BODY)),
    )
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
