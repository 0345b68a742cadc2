//! # sandwich-core
//!
//! Domain layer containing snowflakes, gateway intents, and the cached entity
//! projections shared by every other crate.
//! This crate has zero dependencies on infrastructure (network, runtime, etc.).

pub mod entities;
pub mod error;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    Channel, ChannelType, Emoji, Guild, GuildMember, PermissionOverwrite, Role, RoleTags,
    ThreadMetadata, UnavailableGuild, User, VoiceState, DEFAULT_DISCRIMINATOR,
};
pub use error::DomainError;
pub use value_objects::{lenient_timestamp, Intents, Snowflake, SnowflakeParseError};
