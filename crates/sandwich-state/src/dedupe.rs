//! Short-lived dedupe keys
//!
//! Two overlapping shard groups (during scaling) both receive the same
//! GUILD_MEMBER_ADD/REMOVE. Member counts must move only once per
//! `(guild, user)` inside the window.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sandwich_core::Snowflake;

/// How long a member add/remove key suppresses repeats
pub const MEMBER_DEDUPE_WINDOW: Duration = Duration::from_secs(60);

// Expired keys are swept once the map grows past this many entries.
const SWEEP_THRESHOLD: usize = 4096;

pub fn member_add_key(guild_id: Snowflake, user_id: Snowflake) -> String {
    format!("MA:{guild_id}:{user_id}")
}

pub fn member_remove_key(guild_id: Snowflake, user_id: Snowflake) -> String {
    format!("MR:{guild_id}:{user_id}")
}

/// Expiring key set
#[derive(Debug)]
pub struct Dedupe {
    window: Duration,
    keys: DashMap<String, Instant>,
}

impl Default for Dedupe {
    fn default() -> Self {
        Self::new(MEMBER_DEDUPE_WINDOW)
    }
}

impl Dedupe {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            keys: DashMap::new(),
        }
    }

    /// Set `key` unless it is already live. Returns `true` when the caller
    /// should act (the key was absent or expired).
    pub fn claim(&self, key: &str) -> bool {
        self.claim_at(key, Instant::now())
    }

    pub fn claim_at(&self, key: &str, now: Instant) -> bool {
        if self.keys.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }

        let expires = now + self.window;
        let mut claimed = false;
        self.keys
            .entry(key.to_string())
            .and_modify(|deadline| {
                if *deadline <= now {
                    *deadline = expires;
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                expires
            });
        claimed
    }

    pub fn release(&self, key: &str) {
        self.keys.remove(key);
    }

    pub fn sweep(&self, now: Instant) {
        self.keys.retain(|_, deadline| *deadline > now);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
