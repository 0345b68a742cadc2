//! Server setup and initialization
//!
//! Builds the shared resources, registers the messaging drivers, loads the
//! identities, and serves the RPC routes until Ctrl-C.

use std::sync::Arc;

use axum::Router;
use sandwich_common::{AppConfig, SandwichConfig, SandwichError, SandwichResult};
use sandwich_gateway::WebsocketPublisher;
use sandwich_shard::{Resources, Sandwich};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::middleware::apply_middleware;
use crate::routes::create_router;
use crate::state::AppState;

/// Build the complete Axum application with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let router = create_router();
    let router = apply_middleware(router);
    router.with_state(state)
}

/// Resources with every driver this binary ships registered
pub fn create_resources(config: &AppConfig) -> SandwichResult<Arc<Resources>> {
    let resources = Resources::from_config(config)?;
    WebsocketPublisher::register(&resources.drivers);
    info!(drivers = ?resources.drivers.names(), "Messaging drivers registered");
    Ok(Arc::new(resources))
}

/// Load the identity file and register its identities
pub fn create_sandwich(config: &AppConfig) -> SandwichResult<Arc<Sandwich>> {
    let resources = create_resources(config)?;
    let identities = SandwichConfig::load(&config.sandwich.config_path)?;
    info!(
        path = %config.sandwich.config_path,
        identities = identities.identities.len(),
        "Identity file loaded"
    );
    Ok(Arc::new(Sandwich::with_identities(resources, identities)?))
}

/// Serve the RPC routes until `shutdown` fires
pub async fn run_server(
    app: Router,
    address: &str,
    shutdown: CancellationToken,
) -> SandwichResult<()> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| SandwichError::Config(format!("Failed to bind to {address}: {e}")))?;

    info!("RPC listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| SandwichError::Config(format!("Server error: {e}")))?;

    Ok(())
}

/// Run the daemon: identities, drivers, and the RPC server
pub async fn run(config: AppConfig) -> SandwichResult<()> {
    let sandwich = create_sandwich(&config)?;
    sandwich.start_auto().await;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received");
        signal.cancel();
    });

    let app = create_app(AppState::new(Arc::clone(&sandwich)));
    let result = run_server(app, &config.api.address(), shutdown).await;

    sandwich.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use sandwich_common::ClusterConfig;
    use sandwich_core::entities::{Channel, Guild, GuildMember, User};
    use sandwich_core::Snowflake;
    use sandwich_shard::rest::DiscordRest;
    use sandwich_state::{GuildSnapshot, StateStore, StoreOptions};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let resources = Resources::new(
            StateStore::new_shared(),
            DiscordRest::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap(),
            4,
            ClusterConfig {
                node_count: 1,
                node_id: 0,
            },
        );
        let guild_id = Snowflake::new(10);
        let member = GuildMember {
            user: Some(User::new(Snowflake::new(1), "alice".to_string())),
            ..GuildMember::default()
        };
        resources.state.ingest_guild(
            GuildSnapshot {
                guild: Guild::new(guild_id, "Café Society".to_string()),
                channels: vec![Channel::new_text(
                    Snowflake::new(13),
                    guild_id,
                    "general".to_string(),
                )],
                members: vec![member],
                ..GuildSnapshot::default()
            },
            StoreOptions::default(),
        );

        let sandwich = Arc::new(Sandwich::new(Arc::new(resources)));
        create_app(AppState::new(sandwich))
    }

    async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_fetch_guild_by_query() {
        let (status, body) = call(
            app(),
            Method::POST,
            "/rpc/fetch_guild",
            Some(json!({"query": "cafe"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["error"], "");
        assert_eq!(body["guilds"]["10"]["name"], "Café Society");
    }

    #[tokio::test]
    async fn test_fetch_guild_channels() {
        let (status, body) = call(
            app(),
            Method::POST,
            "/rpc/fetch_guild_channels",
            Some(json!({"guild_id": "10"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channels"]["13"]["name"], "general");
    }

    #[tokio::test]
    async fn test_unknown_guild_is_not_found() {
        let (status, body) = call(
            app(),
            Method::POST,
            "/rpc/fetch_guild_members",
            Some(json!({"guild_id": "99"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
        assert!(!body["error"].as_str().unwrap().is_empty());
        assert!(body.get("members").is_none());
    }

    #[tokio::test]
    async fn test_unknown_identity_is_not_found() {
        let (status, body) = call(
            app(),
            Method::POST,
            "/rpc/send_websocket_message",
            Some(json!({"identifier": "nobody", "shard_id": 0, "op": 3, "data": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (status, body) = call(
            app(),
            Method::POST,
            "/rpc/fetch_user",
            Some(json!({"user_ids": "not a list"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_status() {
        let (status, body) = call(app(), Method::GET, "/rpc/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["identities"], json!([]));
        assert_eq!(body["state"]["guilds"], 1);
        assert_eq!(body["state"]["users"], 1);
    }
}
