//! Response DTOs for the query RPCs
//!
//! Every response carries `{ok, error}` next to its own fields. Maps are
//! keyed by snowflake, which serializes as a string.

use std::collections::BTreeMap;

use sandwich_common::SandwichError;
use sandwich_core::entities::{Channel, Emoji, Guild, GuildMember, Role, User};
use sandwich_core::Snowflake;
use sandwich_shard::{ChunkOutcome, GuildLocation, ManagerSnapshot};
use sandwich_state::StateStats;
use serde::Serialize;

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseResponse {
    pub ok: bool,
    pub error: String,
}

impl BaseResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: message.into(),
        }
    }
}

/// `BaseResponse` flattened together with the operation's fields
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse<T> {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            base: BaseResponse::ok(),
            data: Some(data),
        }
    }

    pub fn error(error: &SandwichError) -> Self {
        Self {
            base: BaseResponse::error(error.to_string()),
            data: None,
        }
    }
}

// ============================================================================
// Lookups
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchGuildResponse {
    pub guilds: BTreeMap<Snowflake, Guild>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchGuildChannelsResponse {
    pub channels: BTreeMap<Snowflake, Channel>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchGuildRolesResponse {
    pub roles: BTreeMap<Snowflake, Role>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchGuildEmojisResponse {
    pub emojis: BTreeMap<Snowflake, Emoji>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchGuildMembersResponse {
    /// Keyed by user id; each member carries its user object
    pub members: BTreeMap<Snowflake, GuildMember>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchUserResponse {
    pub users: BTreeMap<Snowflake, User>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchMutualGuildsResponse {
    pub guild_ids: Vec<Snowflake>,
    /// Only filled when `expand` was requested
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub guilds: BTreeMap<Snowflake, Guild>,
}

// ============================================================================
// Shards
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct WhereIsGuildResponse {
    pub locations: Vec<GuildLocation>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestGuildChunkResponse {
    /// Absent when the request was not waited on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkOutcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStatusResponse {
    pub identities: Vec<ManagerSnapshot>,
    pub state: StateStats,
}
