//! Query service
//!
//! Read-only lookups over the state store plus the few shard operations the
//! RPC surface exposes. Lookups never touch the gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use sandwich_common::SandwichResult;
use sandwich_core::entities::{GuildMember, User};
use sandwich_core::{DomainError, Snowflake};
use sandwich_shard::Sandwich;
use sandwich_state::StateStore;
use tracing::{debug, instrument};
use validator::Validate;

use crate::dto::{
    FetchGuildChannelsResponse, FetchGuildChildrenRequest, FetchGuildEmojisResponse,
    FetchGuildMembersResponse, FetchGuildRequest, FetchGuildResponse, FetchGuildRolesResponse,
    FetchMutualGuildsRequest, FetchMutualGuildsResponse, FetchStatusResponse, FetchUserRequest,
    FetchUserResponse, RequestGuildChunkRequest, RequestGuildChunkResponse,
    SendWebsocketMessageRequest, WhereIsGuildRequest, WhereIsGuildResponse,
};

use super::matching::NameQuery;

fn validate(request: &impl Validate) -> SandwichResult<()> {
    request
        .validate()
        .map_err(|e| DomainError::ValidationError(e.to_string()).into())
}

/// Pick entries by id, by query, or all of them
fn select<T>(
    ids: &[Snowflake],
    query: &str,
    by_ids: impl FnOnce(&[Snowflake]) -> Vec<T>,
    all: impl FnOnce() -> Vec<T>,
    keep: impl Fn(&NameQuery, &T) -> bool,
) -> Vec<T> {
    if !ids.is_empty() {
        return by_ids(ids);
    }
    match NameQuery::new(query) {
        Some(query) => all().into_iter().filter(|item| keep(&query, item)).collect(),
        None => all(),
    }
}

/// Query service
#[derive(Debug, Clone)]
pub struct QueryService {
    sandwich: Arc<Sandwich>,
}

impl QueryService {
    pub fn new(sandwich: Arc<Sandwich>) -> Self {
        Self { sandwich }
    }

    pub fn sandwich(&self) -> &Arc<Sandwich> {
        &self.sandwich
    }

    fn state(&self) -> &StateStore {
        self.sandwich.state()
    }

    /// Child lookups without ids need the guild to exist
    fn require_guild(&self, request: &FetchGuildChildrenRequest) -> SandwichResult<()> {
        if request.ids.is_empty() && !self.state().contains_guild(request.guild_id) {
            return Err(DomainError::GuildNotFound(request.guild_id).into());
        }
        Ok(())
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    #[instrument(skip(self))]
    pub fn fetch_guild(&self, request: &FetchGuildRequest) -> SandwichResult<FetchGuildResponse> {
        validate(request)?;
        let state = self.state();

        let guilds = select(
            &request.guild_ids,
            &request.query,
            |ids| state.guilds(ids),
            || state.all_guilds(),
            |query, guild| query.matches(guild.id, [guild.name.as_str()]),
        );

        debug!(count = guilds.len(), "Fetched guilds");
        Ok(FetchGuildResponse {
            guilds: guilds.into_iter().map(|g| (g.id, g)).collect(),
        })
    }

    #[instrument(skip(self))]
    pub fn fetch_guild_channels(
        &self,
        request: &FetchGuildChildrenRequest,
    ) -> SandwichResult<FetchGuildChannelsResponse> {
        validate(request)?;
        self.require_guild(request)?;
        let state = self.state();
        let guild_id = request.guild_id;

        let channels = select(
            &request.ids,
            &request.query,
            |ids| state.channels_by_ids(guild_id, ids),
            || state.channels(guild_id),
            |query, channel| query.matches(channel.id, channel.name.as_deref()),
        );

        Ok(FetchGuildChannelsResponse {
            channels: channels.into_iter().map(|c| (c.id, c)).collect(),
        })
    }

    #[instrument(skip(self))]
    pub fn fetch_guild_roles(
        &self,
        request: &FetchGuildChildrenRequest,
    ) -> SandwichResult<FetchGuildRolesResponse> {
        validate(request)?;
        self.require_guild(request)?;
        let state = self.state();
        let guild_id = request.guild_id;

        let roles = select(
            &request.ids,
            &request.query,
            |ids| state.roles_by_ids(guild_id, ids),
            || state.roles(guild_id),
            |query, role| query.matches(role.id, [role.name.as_str()]),
        );

        Ok(FetchGuildRolesResponse {
            roles: roles.into_iter().map(|r| (r.id, r)).collect(),
        })
    }

    #[instrument(skip(self))]
    pub fn fetch_guild_emojis(
        &self,
        request: &FetchGuildChildrenRequest,
    ) -> SandwichResult<FetchGuildEmojisResponse> {
        validate(request)?;
        self.require_guild(request)?;
        let state = self.state();
        let guild_id = request.guild_id;

        let emojis = select(
            &request.ids,
            &request.query,
            |ids| state.emojis_by_ids(guild_id, ids),
            || state.emojis(guild_id),
            |query, emoji| query.matches(emoji.id, [emoji.name.as_str()]),
        );

        Ok(FetchGuildEmojisResponse {
            emojis: emojis.into_iter().map(|e| (e.id, e)).collect(),
        })
    }

    /// Members come back with their user attached from the users table
    #[instrument(skip(self))]
    pub fn fetch_guild_members(
        &self,
        request: &FetchGuildChildrenRequest,
    ) -> SandwichResult<FetchGuildMembersResponse> {
        validate(request)?;
        self.require_guild(request)?;
        let state = self.state();
        let guild_id = request.guild_id;

        let with_user = |mut member: GuildMember| {
            member.user = state.user(member.user_id);
            member
        };

        let members = select(
            &request.ids,
            &request.query,
            |ids| state.members_by_ids(guild_id, ids).into_iter().map(with_user).collect(),
            || state.members(guild_id).into_iter().map(with_user).collect(),
            member_matches,
        );

        Ok(FetchGuildMembersResponse {
            members: members.into_iter().map(|m| (m.user_id, m)).collect(),
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    #[instrument(skip(self))]
    pub fn fetch_user(&self, request: &FetchUserRequest) -> SandwichResult<FetchUserResponse> {
        validate(request)?;
        let state = self.state();

        let users = select(
            &request.user_ids,
            &request.query,
            |ids| state.users(ids),
            || state.all_users(),
            |query, user| query.matches(user.id, user_names(user)),
        );

        Ok(FetchUserResponse {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        })
    }

    #[instrument(skip(self))]
    pub fn fetch_mutual_guilds(
        &self,
        request: &FetchMutualGuildsRequest,
    ) -> SandwichResult<FetchMutualGuildsResponse> {
        let state = self.state();
        let guild_ids = state.mutual_guilds(request.user_id);

        let guilds = if request.expand {
            state
                .guilds(&guild_ids)
                .into_iter()
                .map(|g| (g.id, g))
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(FetchMutualGuildsResponse { guild_ids, guilds })
    }

    // =========================================================================
    // Shards
    // =========================================================================

    pub fn where_is_guild(&self, request: &WhereIsGuildRequest) -> WhereIsGuildResponse {
        WhereIsGuildResponse {
            locations: self.sandwich.where_is_guild(request.guild_id),
        }
    }

    /// Forward a raw gateway command to one shard of an identity
    #[instrument(skip(self, request), fields(identifier = %request.identifier, shard_id = request.shard_id, op = request.op))]
    pub async fn send_websocket_message(&self, request: &SendWebsocketMessageRequest) -> SandwichResult<()> {
        validate(request)?;
        let manager = self.sandwich.try_manager(&request.identifier)?;
        manager
            .send_event(request.group_id, request.shard_id, request.op, &request.data)
            .await
    }

    #[instrument(skip(self, request), fields(identifier = %request.identifier, guild_id = %request.guild_id))]
    pub async fn request_guild_chunk(
        &self,
        request: &RequestGuildChunkRequest,
    ) -> SandwichResult<RequestGuildChunkResponse> {
        validate(request)?;
        let manager = self.sandwich.try_manager(&request.identifier)?;
        let chunk = manager
            .request_guild_chunk(request.guild_id, request.always, request.wait)
            .await?;
        Ok(RequestGuildChunkResponse { chunk })
    }

    pub fn fetch_status(&self) -> FetchStatusResponse {
        FetchStatusResponse {
            identities: self.sandwich.identities(),
            state: self.state().stats(),
        }
    }
}

fn user_names(user: &User) -> impl Iterator<Item = &str> {
    std::iter::once(user.username.as_str()).chain(user.global_name.as_deref())
}

/// Nickname, username, or global name
fn member_matches(query: &NameQuery, member: &GuildMember) -> bool {
    let names = member
        .nick
        .as_deref()
        .into_iter()
        .chain(member.user.iter().flat_map(user_names));
    query.matches(member.user_id, names)
}
