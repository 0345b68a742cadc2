//! Role entity - guild roles

use serde::{Deserialize, Deserializer, Serialize};

use crate::value_objects::Snowflake;

/// Role tags; `premium_subscriber` is sent by Discord as `null` when present
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTags {
    pub bot_id: Option<Snowflake>,
    pub integration_id: Option<Snowflake>,
    #[serde(deserialize_with = "deserialize_presence_flag")]
    pub premium_subscriber: bool,
}

/// Role projection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub name: String,
    pub color: u32,
    pub hoist: bool,
    pub icon: Option<String>,
    pub unicode_emoji: Option<String>,
    pub position: i32,
    pub permissions: String,
    pub managed: bool,
    pub mentionable: bool,
    pub tags: Option<RoleTags>,
    pub flags: u64,
}

impl Role {
    /// Create a new Role
    pub fn new(id: Snowflake, guild_id: Snowflake, name: String) -> Self {
        Self {
            id,
            guild_id: Some(guild_id),
            name,
            permissions: "0".to_string(),
            ..Self::default()
        }
    }

    /// Check if this is the @everyone role (id equals guild id)
    #[inline]
    pub fn is_everyone(&self) -> bool {
        self.guild_id == Some(self.id)
    }
}

// A key that is present (even as null) means true.
fn deserialize_presence_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(!matches!(value, Some(serde_json::Value::Bool(false))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_creation() {
        let role = Role::new(Snowflake::new(1), Snowflake::new(1), "@everyone".to_string());
        assert!(role.is_everyone());

        let role = Role::new(Snowflake::new(2), Snowflake::new(1), "Mod".to_string());
        assert!(!role.is_everyone());
    }

    #[test]
    fn test_role_tags() {
        let role: Role = serde_json::from_str(
            r#"{"id":"3","name":"Booster","tags":{"premium_subscriber":null}}"#,
        )
        .unwrap();
        assert!(role.tags.unwrap().premium_subscriber);

        let role: Role =
            serde_json::from_str(r#"{"id":"4","name":"Bot","tags":{"bot_id":"99"}}"#).unwrap();
        let tags = role.tags.unwrap();
        assert!(!tags.premium_subscriber);
        assert_eq!(tags.bot_id, Some(Snowflake::new(99)));
    }
}
