//! Shard reconnect behaviour against a scripted upstream
//!
//! Each test brings a shard to READY and makes the fake Discord misbehave.
//! The shard must then come back with IDENTIFY (op 2) or RESUME (op 6), or
//! stay down after a fatal close.
//!
//! Run with: cargo test -p integration-tests --test reconnect_tests

use std::time::Duration;

use integration_tests::{fixtures::*, FakeDiscord, Script, TestDaemon, SESSION_ID};
use sandwich_shard::status::GROUP_STATUS_EVENT;
use sandwich_shard::{GroupStatus, ShardStatus};
use serde_json::json;

/// Long enough for invalid-session jitter plus the 5 s identify bucket
const RECONNECT_WINDOW: Duration = Duration::from_secs(20);

async fn daemon() -> TestDaemon {
    let daemon = TestDaemon::start(vec![guild(1, "Lobby")])
        .await
        .expect("Failed to start daemon");
    let identify = daemon.discord.next_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TOKEN);
    daemon
}

// ============================================================================
// Resume Tests
// ============================================================================

#[tokio::test]
async fn test_reconnect_request_resumes_session() {
    let daemon = daemon().await;

    // READY is s=1 and the guild s=2
    daemon
        .discord
        .dispatch("TYPING_START", json!({"channel_id": "1", "user_id": "7"}))
        .unwrap();
    daemon.discord.run(Script::Raw(json!({"op": 7, "d": null}))).unwrap();

    let resume = daemon.discord.next_handshake(RECONNECT_WINDOW).await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["token"], TOKEN);
    assert_eq!(resume["d"]["session_id"], SESSION_ID);
    assert_eq!(resume["d"]["seq"], 3);

    daemon.wait_for_shard(ShardStatus::Ready).await.unwrap();
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_missed_heartbeat_ack_resumes_session() {
    let discord = FakeDiscord::start_with_heartbeat(vec![guild(1, "Lobby")], 200)
        .await
        .unwrap();
    let daemon = TestDaemon::with_discord(discord)
        .await
        .expect("Failed to start daemon");
    daemon.discord.next_op(2).await.unwrap();
    daemon.discord.next_op(1).await.unwrap();

    daemon.discord.run(Script::MuteHeartbeats).unwrap();

    let resume = daemon.discord.next_handshake(RECONNECT_WINDOW).await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], SESSION_ID);
    assert_eq!(resume["d"]["seq"], 2);

    daemon.wait_for_shard(ShardStatus::Ready).await.unwrap();
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_resumable_invalid_session_resumes() {
    let daemon = daemon().await;

    daemon.discord.run(Script::Raw(json!({"op": 9, "d": true}))).unwrap();

    let resume = daemon.discord.next_handshake(RECONNECT_WINDOW).await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["seq"], 2);

    daemon.shutdown().await;
}

// ============================================================================
// Re-identify Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_session_reidentifies() {
    let daemon = daemon().await;

    daemon.discord.run(Script::Raw(json!({"op": 9, "d": false}))).unwrap();

    let identify = daemon.discord.next_handshake(RECONNECT_WINDOW).await.unwrap();
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["shard"], json!([0, 1]));

    daemon.wait_for_shard(ShardStatus::Ready).await.unwrap();
    let shard = daemon.shard().unwrap();
    assert_eq!(shard.session().session_id, SESSION_ID);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_session_timeout_close_reidentifies() {
    let daemon = daemon().await;

    daemon.discord.run(Script::Close(4009)).unwrap();

    let identify = daemon.discord.next_handshake(RECONNECT_WINDOW).await.unwrap();
    assert_eq!(identify["op"], 2);

    daemon.wait_for_shard(ShardStatus::Ready).await.unwrap();
    daemon.shutdown().await;
}

// ============================================================================
// Fatal Close Tests
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_fails_group() {
    let daemon = daemon().await;
    let group = daemon.manager.live_group().unwrap();
    assert!(group.floodgate());
    let mut feed = daemon.sandwich.subscribe_status();

    daemon.discord.run(Script::Close(4004)).unwrap();
    daemon.wait_for_shard(ShardStatus::Erroring).await.unwrap();

    assert_eq!(group.status(), GroupStatus::Erroring);
    assert!(!group.floodgate());
    assert!(daemon
        .shard()
        .unwrap()
        .last_error()
        .unwrap()
        .contains("4004"));

    // No second attempt
    assert!(daemon
        .discord
        .next_handshake(Duration::from_secs(3))
        .await
        .is_err());

    let mut group_updates = Vec::new();
    while let Ok(event) = feed.try_recv() {
        if event.event_name() == GROUP_STATUS_EVENT {
            group_updates.push(event.to_dispatch()["d"]["status"].clone());
        }
    }
    assert!(group_updates.contains(&json!("erroring")));

    daemon.shutdown().await;
}
