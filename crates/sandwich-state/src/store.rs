//! State store
//!
//! Owns every cached entity. Guild children live in per-guild tables keyed by
//! `(guild_id, child_id)`; the guild keeps only the id sets. All mutations are
//! synchronous and finish before the dispatcher moves on to the next event.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use sandwich_common::CachingConfig;
use sandwich_core::{Channel, Emoji, Guild, GuildMember, Role, Snowflake, User, VoiceState};
use serde::{Deserialize, Serialize};

use crate::dedupe::{member_add_key, member_remove_key, Dedupe};
use crate::table::GuildTable;

/// Per-identity caching switches applied to each mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub cache_users: bool,
    pub cache_members: bool,
    pub store_mutuals: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_users: true,
            cache_members: true,
            store_mutuals: false,
        }
    }
}

impl From<&CachingConfig> for StoreOptions {
    fn from(config: &CachingConfig) -> Self {
        Self {
            cache_users: config.cache_users,
            cache_members: config.cache_members,
            store_mutuals: config.store_mutuals,
        }
    }
}

/// A guild together with its child collections, as carried by GUILD_CREATE
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildSnapshot {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<GuildMember>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

/// Entry counts, used by status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateStats {
    pub guilds: usize,
    pub members: usize,
    pub users: usize,
    pub channels: usize,
    pub roles: usize,
    pub emojis: usize,
    pub voice_states: usize,
}

/// Process-wide entity cache
pub struct StateStore {
    guilds: DashMap<Snowflake, Guild>,
    guild_members: GuildTable<GuildMember>,
    guild_channels: GuildTable<Channel>,
    guild_roles: GuildTable<Role>,
    guild_emojis: GuildTable<Emoji>,
    guild_voice_states: GuildTable<VoiceState>,
    users: DashMap<Snowflake, User>,
    dm_channels: DashMap<Snowflake, Channel>,
    mutuals: DashMap<Snowflake, HashSet<Snowflake>>,
    // Reverse of `mutuals`: guild to users
    mutual_members: DashMap<Snowflake, HashSet<Snowflake>>,
    // Number of cached memberships pointing at each user
    user_refs: DashMap<Snowflake, u32>,
    dedupe: Dedupe,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            guilds: DashMap::new(),
            guild_members: GuildTable::new(),
            guild_channels: GuildTable::new(),
            guild_roles: GuildTable::new(),
            guild_emojis: GuildTable::new(),
            guild_voice_states: GuildTable::new(),
            users: DashMap::new(),
            dm_channels: DashMap::new(),
            mutuals: DashMap::new(),
            mutual_members: DashMap::new(),
            user_refs: DashMap::new(),
            dedupe: Dedupe::default(),
        }
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    pub fn guild(&self, guild_id: Snowflake) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    pub fn guilds(&self, guild_ids: &[Snowflake]) -> Vec<Guild> {
        guild_ids.iter().filter_map(|id| self.guild(*id)).collect()
    }

    pub fn all_guilds(&self) -> Vec<Guild> {
        self.guilds.iter().map(|g| g.value().clone()).collect()
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.iter().map(|g| *g.key()).collect()
    }

    pub fn contains_guild(&self, guild_id: Snowflake) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Insert a guild and all of its children
    ///
    /// Children are written before the guild itself so anything that can see
    /// the guild can also see its roles, channels, and members.
    pub fn ingest_guild(&self, snapshot: GuildSnapshot, opts: StoreOptions) {
        let GuildSnapshot {
            mut guild,
            roles,
            emojis,
            channels,
            threads,
            members,
            voice_states,
        } = snapshot;
        let guild_id = guild.id;

        guild.role_ids = roles.iter().map(|r| r.id).collect();
        guild.emoji_ids = emojis.iter().map(|e| e.id).collect();
        guild.channel_ids = channels.iter().chain(threads.iter()).map(|c| c.id).collect();
        guild.unavailable = false;

        self.guild_roles.replace(
            guild_id,
            roles.into_iter().map(|mut r| {
                r.guild_id = Some(guild_id);
                (r.id, r)
            }),
        );
        self.guild_emojis.replace(
            guild_id,
            emojis.into_iter().map(|mut e| {
                e.guild_id = Some(guild_id);
                (e.id, e)
            }),
        );
        self.guild_channels.replace(
            guild_id,
            channels.into_iter().chain(threads).map(|mut c| {
                c.guild_id = Some(guild_id);
                (c.id, c)
            }),
        );
        self.guild_voice_states.replace(
            guild_id,
            voice_states
                .into_iter()
                .filter(|vs| !vs.is_leave())
                .map(|mut vs| {
                    vs.guild_id = Some(guild_id);
                    if let Some(member) = vs.member.as_mut() {
                        member.detach_user();
                    }
                    (vs.user_id, vs)
                }),
        );

        for member in members {
            self.insert_member(guild_id, member, opts);
        }

        self.guilds.insert(guild_id, guild);
    }

    /// Rebuild the GUILD_CREATE view of a cached guild (members excluded)
    pub fn guild_snapshot(&self, guild_id: Snowflake) -> Option<GuildSnapshot> {
        let guild = self.guild(guild_id)?;
        let (threads, channels): (Vec<Channel>, Vec<Channel>) = self
            .guild_channels
            .all(guild_id)
            .into_iter()
            .partition(Channel::is_thread);

        Some(GuildSnapshot {
            guild,
            roles: self.guild_roles.all(guild_id),
            emojis: self.guild_emojis.all(guild_id),
            channels,
            threads,
            members: Vec::new(),
            voice_states: self.guild_voice_states.all(guild_id),
        })
    }

    /// Merge scalar fields from GUILD_UPDATE; child collections are untouched
    ///
    /// Returns the prior guild, if one was cached.
    pub fn update_guild(&self, update: Guild) -> Option<Guild> {
        match self.guilds.get_mut(&update.id) {
            Some(mut current) => {
                let before = current.clone();
                current.merge_update(update);
                Some(before)
            }
            None => {
                self.guilds.insert(update.id, update);
                None
            }
        }
    }

    /// Replace the guild's sticker list, returning the previous one
    pub fn update_guild_stickers(
        &self,
        guild_id: Snowflake,
        stickers: Vec<serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        self.guilds
            .get_mut(&guild_id)
            .map(|mut g| std::mem::replace(&mut g.stickers, stickers))
            .unwrap_or_default()
    }

    /// Outage: keep the guild entry flagged unavailable, evict its children
    pub fn mark_guild_unavailable(&self, guild_id: Snowflake, opts: StoreOptions) -> Option<Guild> {
        let before = self.guild(guild_id);
        self.evict_children(guild_id, opts);
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.unavailable = true;
            guild.role_ids.clear();
            guild.emoji_ids.clear();
            guild.channel_ids.clear();
        }
        before
    }

    /// Genuine removal: the guild and every child are dropped
    pub fn remove_guild(&self, guild_id: Snowflake, opts: StoreOptions) -> Option<Guild> {
        self.evict_children(guild_id, opts);
        self.guilds.remove(&guild_id).map(|(_, g)| g)
    }

    fn evict_children(&self, guild_id: Snowflake, opts: StoreOptions) {
        self.guild_roles.drop_guild(guild_id);
        self.guild_emojis.drop_guild(guild_id);
        self.guild_channels.drop_guild(guild_id);
        self.guild_voice_states.drop_guild(guild_id);

        for member in self.guild_members.drop_guild(guild_id) {
            self.forget_membership(guild_id, member.user_id, opts);
        }

        // Memberships tracked only through the mutuals index
        if let Some((_, users)) = self.mutual_members.remove(&guild_id) {
            for user_id in users {
                self.remove_mutual(user_id, guild_id);
            }
        }
    }

    /// Adjust `member_count` once per `(guild, user)` inside the dedupe window
    ///
    /// Returns `true` when the count moved.
    pub fn count_member_add(&self, guild_id: Snowflake, user_id: Snowflake) -> bool {
        if !self.dedupe.claim(&member_add_key(guild_id, user_id)) {
            return false;
        }
        self.dedupe.release(&member_remove_key(guild_id, user_id));
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.member_count = guild.member_count.saturating_add(1);
        }
        true
    }

    pub fn count_member_remove(&self, guild_id: Snowflake, user_id: Snowflake) -> bool {
        if !self.dedupe.claim(&member_remove_key(guild_id, user_id)) {
            return false;
        }
        self.dedupe.release(&member_add_key(guild_id, user_id));
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.member_count = guild.member_count.saturating_sub(1);
        }
        true
    }

    // =========================================================================
    // Members
    // =========================================================================

    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<GuildMember> {
        self.guild_members.get(guild_id, user_id)
    }

    pub fn members(&self, guild_id: Snowflake) -> Vec<GuildMember> {
        self.guild_members.all(guild_id)
    }

    pub fn members_by_ids(&self, guild_id: Snowflake, user_ids: &[Snowflake]) -> Vec<GuildMember> {
        self.guild_members.get_many(guild_id, user_ids)
    }

    pub fn cached_member_count(&self, guild_id: Snowflake) -> usize {
        self.guild_members.len(guild_id)
    }

    /// Insert or replace a member; the nested user is split into `users`
    pub fn insert_member(
        &self,
        guild_id: Snowflake,
        mut member: GuildMember,
        opts: StoreOptions,
    ) -> Option<GuildMember> {
        if let Some(user) = member.detach_user() {
            if opts.cache_users {
                self.upsert_user(user);
            }
        }
        member.guild_id = Some(guild_id);
        let user_id = member.user_id;

        if opts.store_mutuals {
            self.add_mutual(user_id, guild_id);
        }

        if !opts.cache_members {
            return None;
        }

        let before = self.guild_members.upsert(guild_id, user_id, member);
        if before.is_none() {
            *self.user_refs.entry(user_id).or_insert(0) += 1;
        }
        before
    }

    /// GUILD_MEMBER_UPDATE: merge onto the cached member, always refresh the user
    pub fn update_member(
        &self,
        guild_id: Snowflake,
        mut update: GuildMember,
        opts: StoreOptions,
    ) -> Option<GuildMember> {
        if let Some(user) = update.detach_user() {
            self.upsert_user(user);
        }
        let before = self.member(guild_id, update.user_id);

        if let Some(prior) = &before {
            // Not carried by member updates
            update.deaf = prior.deaf;
            update.mute = prior.mute;
            if update.joined_at.is_none() {
                update.joined_at = prior.joined_at;
            }
        }

        self.insert_member(guild_id, update, opts);
        before
    }

    /// Remove a member; drops the user once nothing references it
    pub fn remove_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        opts: StoreOptions,
    ) -> Option<GuildMember> {
        let before = self.guild_members.remove(guild_id, user_id);
        if before.is_some() {
            self.forget_membership(guild_id, user_id, opts);
        } else {
            if opts.store_mutuals {
                self.remove_mutual(user_id, guild_id);
            }
            self.maybe_drop_user(user_id, opts);
        }
        before
    }

    fn forget_membership(&self, guild_id: Snowflake, user_id: Snowflake, opts: StoreOptions) {
        if let Some(mut refs) = self.user_refs.get_mut(&user_id) {
            *refs = refs.saturating_sub(1);
        }
        self.user_refs.remove_if(&user_id, |_, refs| *refs == 0);

        if opts.store_mutuals {
            self.remove_mutual(user_id, guild_id);
        }
        self.maybe_drop_user(user_id, opts);
    }

    fn maybe_drop_user(&self, user_id: Snowflake, opts: StoreOptions) {
        if opts.cache_users || self.user_refs.contains_key(&user_id) {
            return;
        }
        if self.mutuals.contains_key(&user_id) {
            return;
        }
        self.users.remove(&user_id);
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub fn user(&self, user_id: Snowflake) -> Option<User> {
        self.users.get(&user_id).map(|u| u.clone())
    }

    pub fn users(&self, user_ids: &[Snowflake]) -> Vec<User> {
        user_ids.iter().filter_map(|id| self.user(*id)).collect()
    }

    pub fn all_users(&self) -> Vec<User> {
        self.users.iter().map(|u| u.value().clone()).collect()
    }

    pub fn upsert_user(&self, user: User) -> Option<User> {
        self.users.insert(user.id, user)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // =========================================================================
    // Mutual guilds
    // =========================================================================

    pub fn mutual_guilds(&self, user_id: Snowflake) -> Vec<Snowflake> {
        let mut ids: Vec<Snowflake> = self
            .mutuals
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn add_mutual(&self, user_id: Snowflake, guild_id: Snowflake) {
        self.mutuals.entry(user_id).or_default().insert(guild_id);
        self.mutual_members.entry(guild_id).or_default().insert(user_id);
    }

    fn remove_mutual(&self, user_id: Snowflake, guild_id: Snowflake) {
        if let Some(mut set) = self.mutuals.get_mut(&user_id) {
            set.remove(&guild_id);
        }
        self.mutuals.remove_if(&user_id, |_, set| set.is_empty());

        if let Some(mut set) = self.mutual_members.get_mut(&guild_id) {
            set.remove(&user_id);
        }
        self.mutual_members.remove_if(&guild_id, |_, set| set.is_empty());
    }

    /// Total number of `(user, guild)` pairs in the mutuals index
    pub fn mutual_pair_count(&self) -> usize {
        self.mutuals.iter().map(|m| m.value().len()).sum()
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub fn role(&self, guild_id: Snowflake, role_id: Snowflake) -> Option<Role> {
        self.guild_roles.get(guild_id, role_id)
    }

    pub fn roles(&self, guild_id: Snowflake) -> Vec<Role> {
        self.guild_roles.all(guild_id)
    }

    pub fn roles_by_ids(&self, guild_id: Snowflake, role_ids: &[Snowflake]) -> Vec<Role> {
        self.guild_roles.get_many(guild_id, role_ids)
    }

    pub fn upsert_role(&self, guild_id: Snowflake, mut role: Role) -> Option<Role> {
        role.guild_id = Some(guild_id);
        let role_id = role.id;
        let before = self.guild_roles.upsert(guild_id, role_id, role);
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.role_ids.insert(role_id);
        }
        before
    }

    pub fn remove_role(&self, guild_id: Snowflake, role_id: Snowflake) -> Option<Role> {
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.role_ids.remove(&role_id);
        }
        self.guild_roles.remove(guild_id, role_id)
    }

    // =========================================================================
    // Emojis
    // =========================================================================

    pub fn emoji(&self, guild_id: Snowflake, emoji_id: Snowflake) -> Option<Emoji> {
        self.guild_emojis.get(guild_id, emoji_id)
    }

    pub fn emojis(&self, guild_id: Snowflake) -> Vec<Emoji> {
        self.guild_emojis.all(guild_id)
    }

    pub fn emojis_by_ids(&self, guild_id: Snowflake, emoji_ids: &[Snowflake]) -> Vec<Emoji> {
        self.guild_emojis.get_many(guild_id, emoji_ids)
    }

    /// Swap the guild's emoji set in one step, returning the previous set
    pub fn replace_emojis(&self, guild_id: Snowflake, emojis: Vec<Emoji>) -> Vec<Emoji> {
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.emoji_ids = emojis.iter().map(|e| e.id).collect();
        }
        self.guild_emojis.replace(
            guild_id,
            emojis.into_iter().map(|mut e| {
                e.guild_id = Some(guild_id);
                (e.id, e)
            }),
        )
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub fn channel(&self, guild_id: Snowflake, channel_id: Snowflake) -> Option<Channel> {
        self.guild_channels.get(guild_id, channel_id)
    }

    pub fn channels(&self, guild_id: Snowflake) -> Vec<Channel> {
        self.guild_channels.all(guild_id)
    }

    pub fn channels_by_ids(&self, guild_id: Snowflake, channel_ids: &[Snowflake]) -> Vec<Channel> {
        self.guild_channels.get_many(guild_id, channel_ids)
    }

    pub fn upsert_channel(&self, guild_id: Snowflake, mut channel: Channel) -> Option<Channel> {
        channel.guild_id = Some(guild_id);
        let channel_id = channel.id;
        let before = self.guild_channels.upsert(guild_id, channel_id, channel);
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.channel_ids.insert(channel_id);
        }
        before
    }

    /// Remove a channel and every thread parented to it
    pub fn remove_channel(&self, guild_id: Snowflake, channel_id: Snowflake) -> Option<Channel> {
        let before = self.guild_channels.remove(guild_id, channel_id);
        let threads = self
            .guild_channels
            .remove_where(guild_id, |c| c.is_thread() && c.parent_id == Some(channel_id));

        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.channel_ids.remove(&channel_id);
            for thread in &threads {
                guild.channel_ids.remove(&thread.id);
            }
        }
        before
    }

    /// DM channels are kept beside the users table, keyed by recipient
    pub fn upsert_dm_channel(&self, channel: Channel) {
        for recipient in &channel.recipients {
            self.dm_channels.insert(recipient.id, channel.clone());
        }
    }

    pub fn dm_channel(&self, user_id: Snowflake) -> Option<Channel> {
        self.dm_channels.get(&user_id).map(|c| c.clone())
    }

    pub fn remove_dm_channel(&self, channel_id: Snowflake) {
        self.dm_channels.retain(|_, c| c.id != channel_id);
    }

    // =========================================================================
    // Voice states
    // =========================================================================

    pub fn voice_state(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<VoiceState> {
        self.guild_voice_states.get(guild_id, user_id)
    }

    pub fn voice_states(&self, guild_id: Snowflake) -> Vec<VoiceState> {
        self.guild_voice_states.all(guild_id)
    }

    /// Upsert, or remove when the user left voice. Returns the prior state.
    pub fn update_voice_state(
        &self,
        guild_id: Snowflake,
        mut state: VoiceState,
        opts: StoreOptions,
    ) -> Option<VoiceState> {
        if let Some(member) = state.member.take() {
            self.insert_member(guild_id, member, opts);
        }
        state.guild_id = Some(guild_id);

        if state.is_leave() {
            self.guild_voice_states.remove(guild_id, state.user_id)
        } else {
            self.guild_voice_states.upsert(guild_id, state.user_id, state)
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self) -> StateStats {
        StateStats {
            guilds: self.guilds.len(),
            members: self.guild_members.total(),
            users: self.users.len(),
            channels: self.guild_channels.total(),
            roles: self.guild_roles.total(),
            emojis: self.guild_emojis.total(),
            voice_states: self.guild_voice_states.total(),
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("stats", &self.stats())
            .finish()
    }
}
