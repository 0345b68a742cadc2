//! Member entity - represents a user's membership in a guild
//!
//! The nested `user` object is split off into the users table on insert; the
//! cached member only keeps `user_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{lenient_timestamp, Snowflake};

/// Guild member projection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildMember {
    pub user_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<super::User>,
    pub nick: Option<String>,
    pub avatar: Option<String>,
    pub roles: Vec<Snowflake>,
    #[serde(with = "lenient_timestamp")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(with = "lenient_timestamp")]
    pub premium_since: Option<DateTime<Utc>>,
    pub deaf: bool,
    pub mute: bool,
    pub flags: u64,
    pub pending: bool,
    #[serde(with = "lenient_timestamp")]
    pub communication_disabled_until: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
}

impl GuildMember {
    /// Create a new GuildMember
    pub fn new(guild_id: Snowflake, user_id: Snowflake) -> Self {
        Self {
            guild_id: Some(guild_id),
            user_id,
            ..Self::default()
        }
    }

    /// Take the nested user out and fill `user_id` from it
    pub fn detach_user(&mut self) -> Option<super::User> {
        let user = self.user.take()?;
        self.user_id = user.id;
        Some(user)
    }

    /// Get display name (nickname if set, otherwise fallback)
    pub fn display_name<'a>(&'a self, username: &'a str) -> &'a str {
        self.nick.as_deref().unwrap_or(username)
    }

    /// Check if member has a specific role
    #[inline]
    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.roles.contains(&role_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_user() {
        let mut member: GuildMember = serde_json::from_str(
            r#"{"user":{"id":"77","username":"alice"},"nick":"Al","roles":["1","2"],"joined_at":"2020-01-01T00:00:00+00:00"}"#,
        )
        .unwrap();

        let user = member.detach_user().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(member.user_id, Snowflake::new(77));
        assert!(member.user.is_none());
        assert!(member.has_role(Snowflake::new(2)));
        assert!(member.joined_at.is_some());
    }

    #[test]
    fn test_display_name() {
        let mut member = GuildMember::new(Snowflake::new(1), Snowflake::new(2));
        assert_eq!(member.display_name("bob"), "bob");

        member.nick = Some("Bobby".to_string());
        assert_eq!(member.display_name("bob"), "Bobby");
    }

    #[test]
    fn test_malformed_premium_since() {
        let member: GuildMember =
            serde_json::from_str(r#"{"user_id":"1","premium_since":"yesterday"}"#).unwrap();
        assert!(member.premium_since.is_none());
    }
}
