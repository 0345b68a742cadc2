//! Per-event state handlers
//!
//! A static table maps each event name to a plain function. Handlers run
//! synchronously on the shard reader, so one shard's mutations are applied
//! in the order Discord sent them.

use std::collections::HashMap;
use std::sync::LazyLock;

use sandwich_common::SandwichResult;
use sandwich_core::{Channel, DomainError, Guild, GuildMember, Snowflake, UnavailableGuild, User, VoiceState};
use sandwich_state::{GuildSnapshot, StateStore, StoreOptions};
use serde_json::value::RawValue;

use super::events::{
    ChunkProgress, GuildEmojisUpdate, GuildMemberRemove, GuildMembersChunk, GuildRoleDelete,
    GuildRoleEvent, GuildStickersUpdate, PresenceUpdate, ThreadDelete, ThreadListSync,
};
use super::payload::Extra;
use crate::protocol::{GatewayEvent, ReadyPayload};

/// Session-level effects of dispatches, implemented by the shard
pub trait DispatchHooks: Send + Sync {
    fn on_ready(&self, ready: &ReadyPayload);

    fn on_resumed(&self);

    /// Returns whether the guild was still pending from READY
    fn on_guild_create(&self, guild_id: Snowflake) -> bool;

    /// `unavailable` tells an outage apart from the bot leaving
    fn on_guild_delete(&self, guild_id: Snowflake, unavailable: bool);

    fn on_members_chunk(&self, nonce: Option<&str>, progress: ChunkProgress);

    fn on_self_update(&self, user: &User);
}

/// What a handler sees
pub struct DispatchContext<'a> {
    pub hooks: &'a dyn DispatchHooks,
    pub state: &'a StateStore,
    pub opts: StoreOptions,
}

/// What a handler hands back to the pipeline
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    pub extra: Extra,
    /// Replacement for `d`; `None` keeps the received bytes
    pub data: Option<Box<RawValue>>,
}

impl HandlerOutcome {
    fn with_extra<T: serde::Serialize>(key: &str, value: &T) -> SandwichResult<Self> {
        Ok(Self {
            extra: Extra::new().with(key, value)?,
            data: None,
        })
    }
}

pub type HandlerFn = fn(&DispatchContext<'_>, &GatewayEvent) -> SandwichResult<HandlerOutcome>;

static HANDLERS: LazyLock<HashMap<&'static str, HandlerFn>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, HandlerFn> = HashMap::new();

    table.insert("READY", on_ready);
    table.insert("RESUMED", on_resumed);

    table.insert("GUILD_CREATE", on_guild_create);
    table.insert("GUILD_UPDATE", on_guild_update);
    table.insert("GUILD_DELETE", on_guild_delete);
    table.insert("GUILD_STICKERS_UPDATE", on_guild_stickers_update);
    table.insert("GUILD_EMOJIS_UPDATE", on_guild_emojis_update);

    table.insert("GUILD_MEMBER_ADD", on_guild_member_add);
    table.insert("GUILD_MEMBER_REMOVE", on_guild_member_remove);
    table.insert("GUILD_MEMBER_UPDATE", on_guild_member_update);
    table.insert("GUILD_MEMBERS_CHUNK", on_guild_members_chunk);

    table.insert("GUILD_ROLE_CREATE", on_guild_role_create);
    table.insert("GUILD_ROLE_UPDATE", on_guild_role_update);
    table.insert("GUILD_ROLE_DELETE", on_guild_role_delete);

    table.insert("CHANNEL_CREATE", on_channel_create);
    table.insert("CHANNEL_UPDATE", on_channel_update);
    table.insert("CHANNEL_DELETE", on_channel_delete);
    table.insert("THREAD_CREATE", on_channel_create);
    table.insert("THREAD_UPDATE", on_channel_update);
    table.insert("THREAD_DELETE", on_thread_delete);
    table.insert("THREAD_LIST_SYNC", on_thread_list_sync);

    table.insert("VOICE_STATE_UPDATE", on_voice_state_update);
    table.insert("PRESENCE_UPDATE", on_presence_update);
    table.insert("USER_UPDATE", on_user_update);

    // Forwarded without touching state
    for event in [
        "CHANNEL_PINS_UPDATE",
        "INTERACTION_CREATE",
        "MESSAGE_CREATE",
        "MESSAGE_UPDATE",
        "MESSAGE_DELETE",
        "MESSAGE_DELETE_BULK",
        "MESSAGE_REACTION_ADD",
        "MESSAGE_REACTION_REMOVE",
        "MESSAGE_REACTION_REMOVE_ALL",
        "MESSAGE_REACTION_REMOVE_EMOJI",
        "TYPING_START",
    ] {
        table.insert(event, forward);
    }

    table
});

/// Handler registered for `event`, if any
pub fn handler_for(event: &str) -> Option<HandlerFn> {
    HANDLERS.get(event).copied()
}

fn missing_guild(event: &str) -> DomainError {
    DomainError::MalformedPayload {
        event: event.to_string(),
        reason: "missing guild_id".to_string(),
    }
}

fn forward(_: &DispatchContext<'_>, _: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    Ok(HandlerOutcome::default())
}

// =============================================================================
// Session
// =============================================================================

fn on_ready(ctx: &DispatchContext<'_>, event: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    let ready: ReadyPayload = event.data()?;

    ctx.state.upsert_user(ready.user.clone());
    ctx.hooks.on_ready(&ready);

    Ok(HandlerOutcome::default())
}

fn on_resumed(ctx: &DispatchContext<'_>, _: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    ctx.hooks.on_resumed();
    Ok(HandlerOutcome::default())
}

fn on_user_update(ctx: &DispatchContext<'_>, event: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    let user: User = event.data()?;

    let before = ctx.state.upsert_user(user.clone());
    ctx.hooks.on_self_update(&user);

    HandlerOutcome::with_extra("before", &before)
}

// =============================================================================
// Guilds
// =============================================================================

fn on_guild_create(ctx: &DispatchContext<'_>, event: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    let snapshot: GuildSnapshot = event.data()?;
    let guild_id = snapshot.guild.id;

    let unavailable = ctx.state.guild(guild_id).is_some_and(|g| g.unavailable);
    ctx.state.ingest_guild(snapshot, ctx.opts);

    // Children are in the store before the barrier can release the shard
    let lazy = ctx.hooks.on_guild_create(guild_id);

    let mut extra = Extra::new();
    extra.insert("lazy", &lazy)?;
    extra.insert("unavailable", &unavailable)?;

    Ok(HandlerOutcome { extra, data: None })
}

fn on_guild_update(ctx: &DispatchContext<'_>, event: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    let update: Guild = event.data()?;
    let before = ctx.state.update_guild(update);
    HandlerOutcome::with_extra("before", &before)
}

fn on_guild_delete(ctx: &DispatchContext<'_>, event: &GatewayEvent) -> SandwichResult<HandlerOutcome> {
    let deleted: UnavailableGuild = event.data()?;

    let before = if deleted.unavailable {
        ctx.state.mark_guild_unavailable(deleted.id, ctx.opts)
    } else {
        ctx.state.remove_guild(deleted.id, ctx.opts)
    };
    ctx.hooks.on_guild_delete(deleted.id, deleted.unavailable);

    HandlerOutcome::with_extra("before", &before)
}

fn on_guild_stickers_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let update: GuildStickersUpdate = event.data()?;
    let before = ctx.state.update_guild_stickers(update.guild_id, update.stickers);
    HandlerOutcome::with_extra("before", &before)
}

fn on_guild_emojis_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let update: GuildEmojisUpdate = event.data()?;
    let before = ctx.state.replace_emojis(update.guild_id, update.emojis);
    HandlerOutcome::with_extra("before", &before)
}

// =============================================================================
// Members
// =============================================================================

fn on_guild_member_add(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let member: GuildMember = event.data()?;
    let guild_id = member.guild_id.ok_or_else(|| missing_guild(event.event_name()))?;

    if let Some(user_id) = member.user.as_ref().map(|u| u.id) {
        ctx.state.count_member_add(guild_id, user_id);
    }
    ctx.state.insert_member(guild_id, member, ctx.opts);

    Ok(HandlerOutcome::default())
}

fn on_guild_member_remove(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let removed: GuildMemberRemove = event.data()?;
    let user_id = removed.user.id;

    let user = ctx.state.user(user_id).unwrap_or(removed.user);
    ctx.state.count_member_remove(removed.guild_id, user_id);
    ctx.state.remove_member(removed.guild_id, user_id, ctx.opts);

    HandlerOutcome::with_extra("user", &user)
}

fn on_guild_member_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let update: GuildMember = event.data()?;
    let guild_id = update.guild_id.ok_or_else(|| missing_guild(event.event_name()))?;

    let before = ctx.state.update_member(guild_id, update, ctx.opts);
    HandlerOutcome::with_extra("before", &before)
}

fn on_guild_members_chunk(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let mut chunk: GuildMembersChunk = event.data()?;
    let progress = chunk.progress();

    for member in std::mem::take(&mut chunk.members) {
        ctx.state.insert_member(chunk.guild_id, member, ctx.opts);
    }
    ctx.hooks.on_members_chunk(chunk.nonce.as_deref(), progress);

    Ok(HandlerOutcome::default())
}

// =============================================================================
// Roles
// =============================================================================

fn on_guild_role_create(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let created: GuildRoleEvent = event.data()?;
    ctx.state.upsert_role(created.guild_id, created.role);
    Ok(HandlerOutcome::default())
}

fn on_guild_role_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let updated: GuildRoleEvent = event.data()?;
    let before = ctx.state.upsert_role(updated.guild_id, updated.role);
    HandlerOutcome::with_extra("before", &before)
}

fn on_guild_role_delete(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let deleted: GuildRoleDelete = event.data()?;
    let before = ctx.state.remove_role(deleted.guild_id, deleted.role_id);
    HandlerOutcome::with_extra("before", &before)
}

// =============================================================================
// Channels and threads
// =============================================================================

fn on_channel_create(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let channel: Channel = event.data()?;
    match channel.guild_id {
        Some(guild_id) => {
            ctx.state.upsert_channel(guild_id, channel);
        }
        None => ctx.state.upsert_dm_channel(channel),
    }
    Ok(HandlerOutcome::default())
}

fn on_channel_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let channel: Channel = event.data()?;
    let before = match channel.guild_id {
        Some(guild_id) => ctx.state.upsert_channel(guild_id, channel),
        None => {
            ctx.state.upsert_dm_channel(channel);
            None
        }
    };
    HandlerOutcome::with_extra("before", &before)
}

fn on_channel_delete(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let channel: Channel = event.data()?;
    match channel.guild_id {
        Some(guild_id) => {
            ctx.state.remove_channel(guild_id, channel.id);
        }
        None => ctx.state.remove_dm_channel(channel.id),
    }
    Ok(HandlerOutcome::default())
}

fn on_thread_delete(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let deleted: ThreadDelete = event.data()?;
    let guild_id = deleted.guild_id.ok_or_else(|| missing_guild(event.event_name()))?;
    let before = ctx.state.remove_channel(guild_id, deleted.id);
    HandlerOutcome::with_extra("before", &before)
}

fn on_thread_list_sync(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let sync: ThreadListSync = event.data()?;
    for thread in sync.threads {
        ctx.state.upsert_channel(sync.guild_id, thread);
    }
    Ok(HandlerOutcome::default())
}

// =============================================================================
// Voice and presence
// =============================================================================

fn on_voice_state_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let state: VoiceState = event.data()?;
    let Some(guild_id) = state.guild_id else {
        // Private call
        return Ok(HandlerOutcome::default());
    };

    let before = ctx.state.update_voice_state(guild_id, state, ctx.opts);
    HandlerOutcome::with_extra("before", &before)
}

fn on_presence_update(
    ctx: &DispatchContext<'_>,
    event: &GatewayEvent,
) -> SandwichResult<HandlerOutcome> {
    let presence: PresenceUpdate = event.data()?;
    if ctx.opts.cache_users && !presence.user.username.is_empty() {
        ctx.state.upsert_user(presence.user);
    }
    Ok(HandlerOutcome::default())
}
