//! Configuration structs

mod app_config;
mod sandwich_config;
mod shard_range;

pub use app_config::{
    AppConfig, AppSettings, ClusterConfig, ConfigError, DiscordConfig, Environment,
    SandwichSettings, ServerConfig,
};
pub use sandwich_config::{
    BotConfig, CachingConfig, EventsConfig, IdentityConfig, MessagingConfig, SandwichConfig,
    ShardingConfig,
};
pub use shard_range::{filter_for_node, parse_shard_ids};
