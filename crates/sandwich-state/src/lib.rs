//! # sandwich-state
//!
//! Concurrent in-memory cache of every entity visible to the daemon's shards.
//!
//! ## Layout
//!
//! - **Guilds**: `guild_id -> Guild`, holding only id sets for children
//! - **Child tables**: members, channels, roles, emojis, voice states keyed by
//!   `(guild_id, child_id)`, one lock per guild
//! - **Users**: shared across guilds, dropped once unreferenced (unless cached)
//! - **Mutuals**: `user_id -> {guild_id}`, maintained for opted-in identities
//!
//! ## Example
//!
//! ```ignore
//! use sandwich_state::{StateStore, StoreOptions, GuildSnapshot};
//!
//! let store = StateStore::new_shared();
//! let snapshot: GuildSnapshot = serde_json::from_str(raw_guild_create)?;
//! store.ingest_guild(snapshot, StoreOptions::default());
//! ```

pub mod dedupe;
mod store;
mod table;

pub use dedupe::{Dedupe, MEMBER_DEDUPE_WINDOW};
pub use store::{GuildSnapshot, StateStats, StateStore, StoreOptions};
