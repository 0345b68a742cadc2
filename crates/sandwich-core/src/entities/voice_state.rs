//! Voice state entity, keyed by (guild, user)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{lenient_timestamp, Snowflake};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceState {
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub user_id: Snowflake,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<super::GuildMember>,
    pub session_id: String,
    pub deaf: bool,
    pub mute: bool,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub self_stream: bool,
    pub self_video: bool,
    pub suppress: bool,
    #[serde(with = "lenient_timestamp")]
    pub request_to_speak_timestamp: Option<DateTime<Utc>>,
}

impl VoiceState {
    /// A null `channel_id` means the user left voice
    #[inline]
    pub fn is_leave(&self) -> bool {
        self.channel_id.is_none()
    }
}
