//! Route handlers
//!
//! One handler per RPC, grouped by what they look up.

pub mod guilds;
pub mod health;
pub mod shards;
pub mod users;
