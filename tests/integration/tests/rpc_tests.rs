//! RPC surface tests against a running daemon
//!
//! Run with: cargo test -p integration-tests --test rpc_tests

use integration_tests::{assert_json, fixtures::*, TestDaemon};
use reqwest::StatusCode;
use serde_json::json;

async fn daemon() -> TestDaemon {
    TestDaemon::start(vec![guild(1, "Lobby"), guild(2, "Café Society")])
        .await
        .expect("Failed to start daemon")
}

// ============================================================================
// Guild Tests
// ============================================================================

#[tokio::test]
async fn test_fetch_guild_by_id_and_query() {
    let daemon = daemon().await;

    let response = daemon
        .post("/rpc/fetch_guild", &json!({"guild_ids": [guild_id(1).to_string()]}))
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["guilds"][guild_id(1).to_string()]["name"], "Lobby");
    assert!(body["guilds"].get(guild_id(2).to_string()).is_none());

    let response = daemon
        .post("/rpc/fetch_guild", &json!({"query": "cafe"}))
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    let guilds = body["guilds"].as_object().unwrap();
    assert_eq!(guilds.len(), 1);
    assert!(guilds.contains_key(&guild_id(2).to_string()));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_fetch_guild_members_and_roles() {
    let daemon = daemon().await;
    let id = guild_id(1).to_string();

    let response = daemon
        .post(
            "/rpc/fetch_guild_members",
            &json!({"guild_id": id, "query": "lobby-regular"}),
        )
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    let members = body["members"].as_object().unwrap();
    assert_eq!(members.len(), 1);
    assert!(members.contains_key(&(guild_id(1) + 2).to_string()));

    let response = daemon
        .post("/rpc/fetch_guild_roles", &json!({"guild_id": id}))
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body["roles"][&id]["name"], "@everyone");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_unknown_guild_is_not_found() {
    let daemon = daemon().await;

    let response = daemon
        .post("/rpc/fetch_guild_channels", &json!({"guild_id": "12345"}))
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::NOT_FOUND).await.unwrap();
    assert_eq!(body["ok"], false);
    assert!(!body["error"].as_str().unwrap().is_empty());

    daemon.shutdown().await;
}

// ============================================================================
// User Tests
// ============================================================================

#[tokio::test]
async fn test_mutual_guilds() {
    let daemon = daemon().await;

    // The owner is a member of both guilds
    let response = daemon
        .post("/rpc/fetch_mutual_guilds", &json!({"user_id": "1", "expand": true}))
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body["guild_ids"].as_array().unwrap().len(), 2);
    assert_eq!(body["guilds"][guild_id(2).to_string()]["name"], "Café Society");

    daemon.shutdown().await;
}

// ============================================================================
// Shard Tests
// ============================================================================

#[tokio::test]
async fn test_where_is_guild() {
    let daemon = daemon().await;

    let response = daemon
        .post("/rpc/where_is_guild", &json!({"guild_id": guild_id(2).to_string()}))
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(
        body["locations"],
        json!([{"identifier": IDENTIFIER, "group_id": 0, "shard_id": 0}])
    );

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_send_websocket_message() {
    let daemon = daemon().await;

    let response = daemon
        .post(
            "/rpc/send_websocket_message",
            &json!({
                "identifier": IDENTIFIER,
                "shard_id": 0,
                "op": 3,
                "data": {"since": null, "activities": [], "status": "dnd", "afk": false}
            }),
        )
        .await
        .expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body, json!({"ok": true, "error": ""}));

    let presence = daemon.discord.next_op(3).await.unwrap();
    assert_eq!(presence["d"]["status"], "dnd");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_request_guild_chunk_in_background() {
    let daemon = daemon().await;

    let response = daemon
        .post(
            "/rpc/request_guild_chunk",
            &json!({"identifier": IDENTIFIER, "guild_id": guild_id(1).to_string(), "always": true}),
        )
        .await
        .expect("Request failed");
    assert_json(response, StatusCode::OK).await.unwrap();

    let request = daemon.discord.next_op(8).await.unwrap();
    assert_eq!(request["d"]["guild_id"], guild_id(1).to_string());

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_status() {
    let daemon = daemon().await;

    let response = daemon.get("/rpc/status").await.expect("Request failed");
    let body = assert_json(response, StatusCode::OK).await.unwrap();
    let identity = &body["identities"][0];
    assert_eq!(identity["identifier"], IDENTIFIER);
    assert_eq!(identity["status"], "ready");
    assert_eq!(identity["groups"][0]["shards"][0]["status"], "ready");
    assert_eq!(body["state"]["guilds"], 2);

    daemon.shutdown().await;
}
