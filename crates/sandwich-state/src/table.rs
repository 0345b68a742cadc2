//! Per-guild child tables
//!
//! Outer map is keyed by guild id; each guild owns an inner map behind its own
//! read-write lock so writers for different guilds never contend.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use sandwich_core::Snowflake;

type Bucket<T> = Arc<RwLock<HashMap<Snowflake, T>>>;

pub(crate) struct GuildTable<T> {
    inner: DashMap<Snowflake, Bucket<T>>,
}

impl<T: Clone> GuildTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    // The DashMap shard guard is released before the inner lock is taken.
    fn bucket(&self, guild_id: Snowflake) -> Bucket<T> {
        self.inner.entry(guild_id).or_default().value().clone()
    }

    fn existing(&self, guild_id: Snowflake) -> Option<Bucket<T>> {
        self.inner.get(&guild_id).map(|b| b.value().clone())
    }

    pub(crate) fn upsert(&self, guild_id: Snowflake, id: Snowflake, value: T) -> Option<T> {
        self.bucket(guild_id).write().insert(id, value)
    }

    pub(crate) fn get(&self, guild_id: Snowflake, id: Snowflake) -> Option<T> {
        self.existing(guild_id)?.read().get(&id).cloned()
    }

    pub(crate) fn get_many(&self, guild_id: Snowflake, ids: &[Snowflake]) -> Vec<T> {
        let Some(bucket) = self.existing(guild_id) else {
            return Vec::new();
        };
        let map = bucket.read();
        ids.iter().filter_map(|id| map.get(id).cloned()).collect()
    }

    pub(crate) fn all(&self, guild_id: Snowflake) -> Vec<T> {
        self.existing(guild_id)
            .map(|bucket| bucket.read().values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn remove(&self, guild_id: Snowflake, id: Snowflake) -> Option<T> {
        self.existing(guild_id)?.write().remove(&id)
    }

    /// Remove every entry matching `pred`, returning the removed values
    pub(crate) fn remove_where<F>(&self, guild_id: Snowflake, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let Some(bucket) = self.existing(guild_id) else {
            return Vec::new();
        };
        let mut map = bucket.write();
        let ids: Vec<Snowflake> = map
            .iter()
            .filter(|(_, v)| pred(v))
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter_map(|id| map.remove(id)).collect()
    }

    /// Atomically swap the guild's whole inner map, returning the previous values
    pub(crate) fn replace<I>(&self, guild_id: Snowflake, items: I) -> Vec<T>
    where
        I: IntoIterator<Item = (Snowflake, T)>,
    {
        let fresh: HashMap<Snowflake, T> = items.into_iter().collect();
        let bucket = self.bucket(guild_id);
        let mut map = bucket.write();
        std::mem::replace(&mut *map, fresh).into_values().collect()
    }

    /// Drop the guild's inner map in full
    pub(crate) fn drop_guild(&self, guild_id: Snowflake) -> Vec<T> {
        self.inner
            .remove(&guild_id)
            .map(|(_, bucket)| bucket.write().drain().map(|(_, v)| v).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self, guild_id: Snowflake) -> usize {
        self.existing(guild_id).map_or(0, |b| b.read().len())
    }

    pub(crate) fn total(&self) -> usize {
        self.inner.iter().map(|b| b.value().read().len()).sum()
    }
}
