//! Channel entity - guild channels, threads, and DM sidecars

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{lenient_timestamp, Snowflake};

/// Channel type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChannelType {
    #[default]
    GuildText = 0,
    Dm = 1,
    GuildVoice = 2,
    GroupDm = 3,
    GuildCategory = 4,
    GuildAnnouncement = 5,
    AnnouncementThread = 10,
    PublicThread = 11,
    PrivateThread = 12,
    GuildStageVoice = 13,
    GuildDirectory = 14,
    GuildForum = 15,
    GuildMedia = 16,
}

impl ChannelType {
    /// Get the numeric value
    #[inline]
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is one of the thread types
    #[inline]
    pub fn is_thread(self) -> bool {
        matches!(
            self,
            Self::AnnouncementThread | Self::PublicThread | Self::PrivateThread
        )
    }
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Dm,
            2 => Self::GuildVoice,
            3 => Self::GroupDm,
            4 => Self::GuildCategory,
            5 => Self::GuildAnnouncement,
            10 => Self::AnnouncementThread,
            11 => Self::PublicThread,
            12 => Self::PrivateThread,
            13 => Self::GuildStageVoice,
            14 => Self::GuildDirectory,
            15 => Self::GuildForum,
            16 => Self::GuildMedia,
            _ => Self::GuildText, // Default for 0 and unknown values
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(ct: ChannelType) -> Self {
        ct as u8
    }
}

/// Permission overwrite target kind: 0 role, 1 member
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub allow: String,
    #[serde(default)]
    pub deny: String,
}

impl PermissionOverwrite {
    #[inline]
    pub fn is_member(&self) -> bool {
        self.kind == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadMetadata {
    pub archived: bool,
    pub auto_archive_duration: u32,
    #[serde(with = "lenient_timestamp")]
    pub archive_timestamp: Option<DateTime<Utc>>,
    pub locked: bool,
    pub invitable: Option<bool>,
}

/// Channel projection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    pub guild_id: Option<Snowflake>,
    pub position: i32,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub nsfw: bool,
    pub parent_id: Option<Snowflake>,
    pub last_message_id: Option<Snowflake>,
    pub permission_overwrites: Vec<PermissionOverwrite>,
    pub bitrate: Option<u32>,
    pub user_limit: Option<u32>,
    pub rate_limit_per_user: Option<u32>,
    pub owner_id: Option<Snowflake>,
    pub recipients: Vec<super::User>,
    pub thread_metadata: Option<ThreadMetadata>,
    pub flags: u64,
}

impl Channel {
    /// Create a new guild text channel
    #[must_use]
    pub fn new_text(id: Snowflake, guild_id: Snowflake, name: String) -> Self {
        Self {
            id,
            guild_id: Some(guild_id),
            name: Some(name),
            ..Self::default()
        }
    }

    #[inline]
    pub fn channel_type(&self) -> ChannelType {
        ChannelType::from(self.kind)
    }

    #[inline]
    pub fn is_thread(&self) -> bool {
        self.channel_type().is_thread()
    }

    /// Get display name, falling back to the id for unnamed channels
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}
