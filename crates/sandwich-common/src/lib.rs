//! # sandwich-common
//!
//! Shared utilities including configuration, the error taxonomy, and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    filter_for_node, parse_shard_ids, AppConfig, AppSettings, BotConfig, CachingConfig,
    ClusterConfig, ConfigError, DiscordConfig, Environment, EventsConfig, IdentityConfig,
    MessagingConfig, SandwichConfig, SandwichSettings, ServerConfig, ShardingConfig,
};
pub use error::{ErrorKind, SandwichError, SandwichResult};
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
