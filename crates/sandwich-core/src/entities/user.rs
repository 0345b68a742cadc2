//! User entity - shared across guilds, referenced by members through user id

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value_objects::Snowflake;

/// Discriminator sent for users without a legacy discriminator
pub const DEFAULT_DISCRIMINATOR: &str = "0";

/// Cached user projection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(
        serialize_with = "serialize_discriminator",
        deserialize_with = "deserialize_discriminator"
    )]
    pub discriminator: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub accent_color: Option<u32>,
    pub flags: u64,
    pub public_flags: u64,
    pub bot: bool,
    pub system: bool,
}

impl User {
    /// Create a new User
    pub fn new(id: Snowflake, username: String) -> Self {
        Self {
            id,
            username,
            discriminator: DEFAULT_DISCRIMINATOR.to_string(),
            ..Self::default()
        }
    }

    /// Name shown in clients: global name if set, otherwise username
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }

    /// Legacy `username#discriminator` tag, or just the username when migrated
    pub fn tag(&self) -> String {
        if self.discriminator.is_empty() || self.discriminator == DEFAULT_DISCRIMINATOR {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }
}

fn serialize_discriminator<S>(value: &str, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_empty() {
        serializer.serialize_str(DEFAULT_DISCRIMINATOR)
    } else {
        serializer.serialize_str(value)
    }
}

fn deserialize_discriminator<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(match value {
        Some(d) if !d.is_empty() => d,
        _ => DEFAULT_DISCRIMINATOR.to_string(),
    })
}
