//! # sandwich-shard
//!
//! Discord gateway sessions and everything that drives them.
//!
//! ## Layout
//!
//! - **protocol / codec**: gateway envelope, op and close codes, zlib-stream
//!   decoding, outbound rate limiting
//! - **identify**: process-wide `max_concurrency` buckets
//! - **shard**: one WebSocket session with heartbeat, resume, and chunking
//! - **group / manager**: shards of one identity, floodgate, scaling
//! - **dispatch**: event handlers against the state store and the publish
//!   pipeline
//! - **transport**: publisher contract and the driver registry
//! - **sandwich**: shared resources and the identity registry
//!
//! ## Example
//!
//! ```ignore
//! use sandwich_shard::{Resources, Sandwich};
//!
//! let resources = Arc::new(Resources::from_config(&app_config)?);
//! let sandwich = Sandwich::with_identities(resources, SandwichConfig::load(path)?)?;
//! sandwich.start_auto().await;
//! ```

pub mod codec;
pub mod dispatch;
pub mod group;
pub mod identify;
pub mod manager;
pub mod protocol;
pub mod rest;
pub mod sandwich;
pub mod shard;
pub mod status;
pub mod transport;

pub use group::{GroupConfig, GroupSnapshot, ShardGroup};
pub use manager::{check_session_budget, client_name, Manager, ManagerSnapshot};
pub use sandwich::{GuildLocation, Resources, Sandwich};
pub use shard::{ChunkOutcome, Shard, ShardConfig, ShardSnapshot};
pub use status::{GroupStatus, ManagerStatus, ShardStatus, StatusBroadcaster, StatusEvent};
pub use transport::{DriverRegistry, MemoryMessage, MemoryPublisher, Publisher, TransportError};
