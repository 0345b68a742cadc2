//! Test fixtures and data generators
//!
//! Guild payloads in the shape Discord sends them in GUILD_CREATE.

use serde_json::{json, Value};

pub const TOKEN: &str = "fake-bot-token";
pub const IDENTIFIER: &str = "welcomer";
pub const APPLICATION_ID: &str = "400";
pub const BOT_USER_ID: &str = "400";

pub fn bot_user() -> Value {
    json!({
        "id": BOT_USER_ID,
        "username": "Welcomer",
        "discriminator": "0",
        "bot": true
    })
}

/// Id of the `n`-th test guild; lands on shard `n % shard_count`
pub fn guild_id(n: u64) -> u64 {
    n << 22
}

pub fn member(user_id: u64, username: &str) -> Value {
    json!({
        "user": {"id": user_id.to_string(), "username": username, "discriminator": "0"},
        "roles": [],
        "joined_at": "2024-01-01T00:00:00+00:00"
    })
}

/// A guild with one channel, the everyone role, and two members
pub fn guild(n: u64, name: &str) -> Value {
    let id = guild_id(n);
    json!({
        "id": id.to_string(),
        "name": name,
        "owner_id": "1",
        "member_count": 2,
        "channels": [
            {"id": (id + 1).to_string(), "type": 0, "name": "general", "position": 0}
        ],
        "roles": [
            {"id": id.to_string(), "name": "@everyone", "position": 0, "permissions": "0"}
        ],
        "emojis": [],
        "members": [
            member(1, "owner"),
            member(id + 2, &format!("{}-regular", name.to_lowercase()))
        ],
        "voice_states": []
    })
}
