//! Route definitions
//!
//! Query RPCs are mounted under /rpc; health lives at the root.

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{guilds, health, shards, users};
use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router() -> Router<AppState> {
    Router::new()
        .nest("/rpc", rpc_routes())
        .route("/health", get(health::health_check))
}

fn rpc_routes() -> Router<AppState> {
    Router::new()
        .merge(guild_routes())
        .merge(user_routes())
        .merge(shard_routes())
}

fn guild_routes() -> Router<AppState> {
    Router::new()
        .route("/fetch_guild", post(guilds::fetch_guild))
        .route("/fetch_guild_channels", post(guilds::fetch_guild_channels))
        .route("/fetch_guild_roles", post(guilds::fetch_guild_roles))
        .route("/fetch_guild_emojis", post(guilds::fetch_guild_emojis))
        .route("/fetch_guild_members", post(guilds::fetch_guild_members))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/fetch_user", post(users::fetch_user))
        .route("/fetch_mutual_guilds", post(users::fetch_mutual_guilds))
}

fn shard_routes() -> Router<AppState> {
    Router::new()
        .route("/where_is_guild", post(shards::where_is_guild))
        .route("/send_websocket_message", post(shards::send_websocket_message))
        .route("/request_guild_chunk", post(shards::request_guild_chunk))
        .route("/status", get(shards::fetch_status))
}
