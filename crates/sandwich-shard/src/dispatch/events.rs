//! Typed dispatch payloads that do not map onto a cached entity

use sandwich_core::{Emoji, GuildMember, Role, Snowflake, User};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberRemove {
    pub guild_id: Snowflake,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMembersChunk {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<GuildMember>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default = "one")]
    pub chunk_count: u32,
    #[serde(default)]
    pub not_found: Vec<serde_json::Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}

fn one() -> u32 {
    1
}

impl GuildMembersChunk {
    pub fn progress(&self) -> ChunkProgress {
        ChunkProgress {
            guild_id: self.guild_id,
            chunk_index: self.chunk_index,
            chunk_count: self.chunk_count,
            members: self.members.len(),
        }
    }
}

/// One received chunk, as reported to the waiting request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub guild_id: Snowflake,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub members: usize,
}

impl ChunkProgress {
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 >= self.chunk_count
    }
}

/// GUILD_ROLE_CREATE and GUILD_ROLE_UPDATE
#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleEvent {
    pub guild_id: Snowflake,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleDelete {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildEmojisUpdate {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildStickersUpdate {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub stickers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadListSync {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub threads: Vec<sandwich_core::Channel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadDelete {
    pub id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
}

/// Only the user part of a presence is looked at
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}
