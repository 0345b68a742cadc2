//! Guild lookups
//!
//! Guilds by id or name, and the channels, roles, emojis, and members of one
//! guild.

use axum::extract::State;
use sandwich_service::dto::{
    FetchGuildChannelsResponse, FetchGuildChildrenRequest, FetchGuildEmojisResponse,
    FetchGuildMembersResponse, FetchGuildRequest, FetchGuildResponse, FetchGuildRolesResponse,
};

use crate::extractors::RpcJson;
use crate::response::{ApiResult, Rpc};
use crate::state::AppState;

/// POST /rpc/fetch_guild
pub async fn fetch_guild(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchGuildRequest>,
) -> ApiResult<Rpc<FetchGuildResponse>> {
    Ok(Rpc(state.query().fetch_guild(&request)?))
}

/// POST /rpc/fetch_guild_channels
pub async fn fetch_guild_channels(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchGuildChildrenRequest>,
) -> ApiResult<Rpc<FetchGuildChannelsResponse>> {
    Ok(Rpc(state.query().fetch_guild_channels(&request)?))
}

/// POST /rpc/fetch_guild_roles
pub async fn fetch_guild_roles(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchGuildChildrenRequest>,
) -> ApiResult<Rpc<FetchGuildRolesResponse>> {
    Ok(Rpc(state.query().fetch_guild_roles(&request)?))
}

/// POST /rpc/fetch_guild_emojis
pub async fn fetch_guild_emojis(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchGuildChildrenRequest>,
) -> ApiResult<Rpc<FetchGuildEmojisResponse>> {
    Ok(Rpc(state.query().fetch_guild_emojis(&request)?))
}

/// POST /rpc/fetch_guild_members
pub async fn fetch_guild_members(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchGuildChildrenRequest>,
) -> ApiResult<Rpc<FetchGuildMembersResponse>> {
    Ok(Rpc(state.query().fetch_guild_members(&request)?))
}
