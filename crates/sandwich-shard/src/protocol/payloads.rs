//! Gateway command and event payloads

use sandwich_core::{Snowflake, UnavailableGuild, User};
use serde::{Deserialize, Serialize};

/// Version string reported in identify properties and payload metadata
pub const SANDWICH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Members above which Discord omits offline members from GUILD_CREATE
pub const LARGE_THRESHOLD: u32 = 250;

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 45_000;

    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self::with_interval(Self::DEFAULT_HEARTBEAT_INTERVAL)
    }
}

/// Client connection properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    #[must_use]
    pub fn sandwich() -> Self {
        let agent = format!("sandwich/{SANDWICH_VERSION}");
        Self {
            os: std::env::consts::OS.to_string(),
            browser: agent.clone(),
            device: agent,
        }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub large_threshold: u32,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    pub intents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<serde_json::Value>,
}

impl IdentifyPayload {
    pub fn new(token: impl Into<String>, shard_id: u32, shard_count: u32, intents: u64) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::sandwich(),
            compress: true,
            large_threshold: LARGE_THRESHOLD,
            shard: [shard_id, shard_count],
            intents,
            presence: None,
        }
    }

    #[must_use]
    pub fn with_presence(mut self, presence: Option<serde_json::Value>) -> Self {
        self.presence = presence;
        self
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: Snowflake,
    pub query: String,
    pub limit: u32,
    pub presences: bool,
    pub nonce: String,
}

/// Partial application object carried in READY
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialApplication {
    pub id: Snowflake,
    pub flags: u64,
}

/// READY dispatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyPayload {
    pub v: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    pub application: PartialApplication,
    pub guilds: Vec<UnavailableGuild>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_shape() {
        let identify = IdentifyPayload::new("abc", 1, 4, 513);
        let json = serde_json::to_value(&identify).unwrap();

        assert_eq!(json["token"], "abc");
        assert_eq!(json["compress"], true);
        assert_eq!(json["large_threshold"], 250);
        assert_eq!(json["shard"], serde_json::json!([1, 4]));
        assert_eq!(json["intents"], 513);
        assert!(json["properties"]["browser"]
            .as_str()
            .unwrap()
            .starts_with("sandwich/"));
        assert!(json.get("presence").is_none());
    }

    #[test]
    fn test_identify_from_consumer() {
        let identify: IdentifyPayload =
            serde_json::from_str(r#"{"token":"Bot x","shard":[0,2]}"#).unwrap();
        assert_eq!(identify.token, "Bot x");
        assert_eq!(identify.shard, [0, 2]);
    }

    #[test]
    fn test_ready_parse() {
        let ready: ReadyPayload = serde_json::from_str(
            r#"{
                "v": 10,
                "user": {"id": "5", "username": "bot", "discriminator": "0"},
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.discord.gg",
                "shard": [0, 1],
                "application": {"id": "5", "flags": 0},
                "guilds": [{"id": "1", "unavailable": true}, {"id": "2", "unavailable": true}]
            }"#,
        )
        .unwrap();

        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.user.id, Snowflake::new(5));
        assert_eq!(ready.guilds.len(), 2);
        assert_eq!(ready.shard, Some([0, 1]));
    }
}
