//! Request DTOs for the query RPCs
//!
//! Id lists and the name query are alternatives: ids win when both are given,
//! and an empty request returns everything.

use sandwich_core::Snowflake;
use serde::Deserialize;
use serde_json::value::RawValue;
use validator::Validate;

// ============================================================================
// Guild Requests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct FetchGuildRequest {
    pub guild_ids: Vec<Snowflake>,

    #[validate(length(max = 100, message = "query must be at most 100 characters"))]
    pub query: String,
}

/// Shared shape of the per-guild child lookups
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct FetchGuildChildrenRequest {
    pub guild_id: Snowflake,

    /// Channel, role, emoji, or user ids depending on the route
    #[serde(alias = "channel_ids", alias = "role_ids", alias = "emoji_ids", alias = "user_ids")]
    pub ids: Vec<Snowflake>,

    #[validate(length(max = 100, message = "query must be at most 100 characters"))]
    pub query: String,
}

impl FetchGuildChildrenRequest {
    pub fn new(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            ..Self::default()
        }
    }
}

// ============================================================================
// User Requests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct FetchUserRequest {
    pub user_ids: Vec<Snowflake>,

    #[validate(length(max = 100, message = "query must be at most 100 characters"))]
    pub query: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchMutualGuildsRequest {
    pub user_id: Snowflake,
    /// Return the guild objects as well as their ids
    pub expand: bool,
}

// ============================================================================
// Shard Requests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WhereIsGuildRequest {
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendWebsocketMessageRequest {
    #[validate(length(min = 1, message = "identifier is required"))]
    pub identifier: String,

    /// Defaults to the live group
    #[serde(default)]
    pub group_id: Option<u32>,

    pub shard_id: u32,

    pub op: u8,

    pub data: Box<RawValue>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RequestGuildChunkRequest {
    #[validate(length(min = 1, message = "identifier is required"))]
    pub identifier: String,

    pub guild_id: Snowflake,

    /// Chunk even if the cache looks complete
    #[serde(default)]
    pub always: bool,

    /// Wait for the last chunk before answering
    #[serde(default)]
    pub wait: bool,
}
