//! Guild entity - the cached projection of a Discord guild
//!
//! Child collections (roles, emojis, channels) live in their own tables in the
//! state store. The guild only carries the id sets that link to them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{lenient_timestamp, Snowflake};

/// Guild projection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    pub icon: Option<String>,
    pub splash: Option<String>,
    pub discovery_splash: Option<String>,
    pub banner: Option<String>,
    pub description: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub region: Option<String>,
    pub afk_channel_id: Option<Snowflake>,
    pub afk_timeout: u32,
    pub widget_enabled: bool,
    pub widget_channel_id: Option<Snowflake>,
    pub verification_level: u8,
    pub default_message_notifications: u8,
    pub explicit_content_filter: u8,
    pub mfa_level: u8,
    pub nsfw_level: u8,
    pub system_channel_id: Option<Snowflake>,
    pub system_channel_flags: u64,
    pub rules_channel_id: Option<Snowflake>,
    pub public_updates_channel_id: Option<Snowflake>,
    pub safety_alerts_channel_id: Option<Snowflake>,
    pub preferred_locale: String,
    pub features: Vec<String>,
    pub vanity_url_code: Option<String>,
    #[serde(with = "lenient_timestamp")]
    pub joined_at: Option<DateTime<Utc>>,
    pub large: bool,
    pub unavailable: bool,
    pub member_count: u32,
    pub max_presences: Option<u32>,
    pub max_members: Option<u32>,
    pub premium_tier: u8,
    pub premium_subscription_count: Option<u32>,
    pub premium_progress_bar_enabled: bool,
    pub approximate_member_count: Option<u32>,
    pub approximate_presence_count: Option<u32>,
    pub application_id: Option<Snowflake>,
    pub stage_instances: Vec<serde_json::Value>,
    pub stickers: Vec<serde_json::Value>,

    pub role_ids: BTreeSet<Snowflake>,
    pub emoji_ids: BTreeSet<Snowflake>,
    pub channel_ids: BTreeSet<Snowflake>,
}

impl Guild {
    /// Create a new Guild
    pub fn new(id: Snowflake, name: String) -> Self {
        Self {
            id,
            name,
            ..Self::default()
        }
    }

    /// Check if a user is the guild owner
    #[inline]
    pub fn is_owner(&self, user_id: Snowflake) -> bool {
        self.owner_id == Some(user_id)
    }

    /// Shard this guild is routed to for the given shard count
    #[inline]
    pub fn shard_id(&self, shard_count: u32) -> u32 {
        self.id.shard_id(shard_count)
    }

    /// Replace every scalar field with the ones from `update`, keeping the
    /// child id sets and the fields only GUILD_CREATE carries.
    ///
    /// Returns `true` when anything changed.
    pub fn merge_update(&mut self, update: Guild) -> bool {
        let merged = Guild {
            role_ids: self.role_ids.clone(),
            emoji_ids: self.emoji_ids.clone(),
            channel_ids: self.channel_ids.clone(),
            joined_at: self.joined_at.or(update.joined_at),
            large: self.large || update.large,
            member_count: if update.member_count == 0 {
                self.member_count
            } else {
                update.member_count
            },
            ..update
        };

        let changed = merged != *self;
        *self = merged;
        changed
    }
}

/// Guild listed in READY before its GUILD_CREATE arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

impl UnavailableGuild {
    pub fn new(id: Snowflake) -> Self {
        Self {
            id,
            unavailable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_creation() {
        let mut guild = Guild::new(Snowflake::new(1), "Test Guild".to_string());
        guild.owner_id = Some(Snowflake::new(100));
        assert_eq!(guild.name, "Test Guild");
        assert!(guild.is_owner(Snowflake::new(100)));
        assert!(!guild.is_owner(Snowflake::new(200)));
    }

    #[test]
    fn test_guild_deserialize_gateway_shape() {
        let guild: Guild = serde_json::from_str(
            r#"{
                "id": "41771983423143937",
                "name": "Discord Developers",
                "owner_id": "80351110224678912",
                "joined_at": "not a timestamp",
                "member_count": 12,
                "features": ["COMMUNITY"],
                "roles": [{"id": "1"}],
                "channels": []
            }"#,
        )
        .unwrap();

        assert_eq!(guild.id, Snowflake::new(41_771_983_423_143_937));
        assert_eq!(guild.member_count, 12);
        assert!(guild.joined_at.is_none());
        assert!(guild.role_ids.is_empty());
        assert_eq!(guild.features, vec!["COMMUNITY".to_string()]);
    }

    #[test]
    fn test_merge_update_keeps_children() {
        let mut guild = Guild::new(Snowflake::new(1), "old".to_string());
        guild.role_ids.insert(Snowflake::new(10));
        guild.channel_ids.insert(Snowflake::new(20));
        guild.member_count = 5;

        let update = Guild::new(Snowflake::new(1), "new".to_string());
        assert!(guild.merge_update(update));

        assert_eq!(guild.name, "new");
        assert_eq!(guild.member_count, 5);
        assert!(guild.role_ids.contains(&Snowflake::new(10)));
        assert!(guild.channel_ids.contains(&Snowflake::new(20)));
    }

    #[test]
    fn test_merge_update_identical_is_noop() {
        let mut guild = Guild::new(Snowflake::new(1), "same".to_string());
        guild.role_ids.insert(Snowflake::new(10));
        let before = guild.clone();

        let update = Guild::new(Snowflake::new(1), "same".to_string());
        assert!(!guild.merge_update(update));
        assert_eq!(guild, before);
    }

    #[test]
    fn test_shard_routing() {
        let guild = Guild::new(Snowflake::new(3 << 22), "g".to_string());
        assert_eq!(guild.shard_id(2), 1);
        assert_eq!(guild.shard_id(3), 0);
    }
}
