//! End-to-end tests of the daemon
//!
//! A fake Discord feeds the shards; consumers attach through the virtual
//! gateway. No external services are needed.
//!
//! Run with: cargo test -p integration-tests --test daemon_tests

use integration_tests::{fixtures::*, TestDaemon, VirtualGatewayClient};
use sandwich_core::Snowflake;
use sandwich_shard::{ManagerStatus, ShardStatus};
use serde_json::json;

// ============================================================================
// Shard Tests
// ============================================================================

#[tokio::test]
async fn test_shard_reaches_ready() {
    let daemon = TestDaemon::start(vec![guild(1, "Lobby")])
        .await
        .expect("Failed to start daemon");

    assert_eq!(daemon.manager.status(), ManagerStatus::Ready);
    assert_eq!(
        daemon.manager.user().map(|user| user.username),
        Some("Welcomer".to_string())
    );

    let identify = daemon.discord.next_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TOKEN);
    assert_eq!(identify["d"]["shard"], json!([0, 1]));

    let snapshot = daemon.manager.snapshot();
    let group = &snapshot.groups[0];
    assert_eq!(group.shards[0].status, ShardStatus::Ready);
    assert_eq!(group.shards[0].guild_count, 1);

    let state = daemon.sandwich.state();
    let guild = state.guild(Snowflake::new(guild_id(1))).unwrap();
    assert_eq!(guild.name, "Lobby");

    daemon.shutdown().await;
}

// ============================================================================
// Virtual Gateway Tests
// ============================================================================

#[tokio::test]
async fn test_consumer_hydration_by_shard() {
    let daemon = TestDaemon::start(vec![
        guild(2, "Two"),
        guild(3, "Three"),
        guild(4, "Four"),
    ])
    .await
    .expect("Failed to start daemon");

    let mut consumer = VirtualGatewayClient::connect(daemon.gateway_addr)
        .await
        .unwrap();
    assert_eq!(consumer.hello["d"]["heartbeat_interval"], 45_000);
    consumer.identify(TOKEN, [0, 2]).await.unwrap();

    let ready = consumer.next_json().await.unwrap();
    assert_eq!(ready["t"], "READY");
    assert_eq!(ready["s"], 0);
    assert_eq!(ready["d"]["shard"], json!([0, 2]));
    assert_eq!(ready["d"]["user"]["id"], BOT_USER_ID);
    assert_eq!(
        ready["d"]["guilds"],
        json!([
            {"id": guild_id(2).to_string(), "unavailable": true},
            {"id": guild_id(4).to_string(), "unavailable": true}
        ])
    );

    let first = consumer.next_json().await.unwrap();
    assert_eq!(first["t"], "GUILD_CREATE");
    assert_eq!(first["s"], 1);
    assert_eq!(first["d"]["name"], "Two");
    let members = first["d"]["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    assert!(members
        .iter()
        .any(|member| member["user"]["username"] == "two-regular"));

    let second = consumer.next_json().await.unwrap();
    assert_eq!(second["t"], "GUILD_CREATE");
    assert_eq!(second["s"], 2);
    assert_eq!(second["d"]["name"], "Four");

    consumer.heartbeat(Some(2)).await.unwrap();
    assert_eq!(consumer.next_json().await.unwrap(), json!({"op": 11, "s": 2}));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_live_dispatch_reaches_consumer() {
    let daemon = TestDaemon::start(vec![guild(1, "Lobby")])
        .await
        .expect("Failed to start daemon");

    let mut consumer = VirtualGatewayClient::connect(daemon.gateway_addr)
        .await
        .unwrap();
    consumer.identify(&format!("Bot {TOKEN}"), [0, 1]).await.unwrap();
    consumer.next_dispatch("GUILD_CREATE").await.unwrap();

    daemon
        .discord
        .dispatch(
            "MESSAGE_CREATE",
            json!({
                "id": "900",
                "channel_id": (guild_id(1) + 1).to_string(),
                "guild_id": guild_id(1).to_string(),
                "content": "hello sandwich",
                "author": {"id": "7", "username": "alice", "discriminator": "0"}
            }),
        )
        .unwrap();

    let message = consumer.next_dispatch("MESSAGE_CREATE").await.unwrap();
    assert_eq!(message["s"], 2);
    assert_eq!(message["d"]["content"], "hello sandwich");
    assert_eq!(message["__sandwich"]["i"], IDENTIFIER);
    assert_eq!(message["__sandwich"]["s"], json!([0, 0, 1]));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_consumer_command_is_forwarded_upstream() {
    let daemon = TestDaemon::start(vec![guild(1, "Lobby")])
        .await
        .expect("Failed to start daemon");

    let mut consumer = VirtualGatewayClient::connect(daemon.gateway_addr)
        .await
        .unwrap();
    consumer.identify(TOKEN, [0, 1]).await.unwrap();
    consumer.next_dispatch("GUILD_CREATE").await.unwrap();

    consumer
        .send_json(json!({
            "op": 3,
            "d": {"since": null, "activities": [], "status": "idle", "afk": false}
        }))
        .await
        .unwrap();

    let presence = daemon.discord.next_op(3).await.unwrap();
    assert_eq!(presence["d"]["status"], "idle");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let daemon = TestDaemon::start(Vec::new())
        .await
        .expect("Failed to start daemon");

    let mut consumer = VirtualGatewayClient::connect(daemon.gateway_addr)
        .await
        .unwrap();
    consumer.identify("someone-else", [0, 1]).await.unwrap();

    assert_eq!(
        consumer.next_json().await.unwrap(),
        json!({"op": 9, "d": false})
    );
    assert!(consumer.next_json().await.is_err());

    daemon.shutdown().await;
}
