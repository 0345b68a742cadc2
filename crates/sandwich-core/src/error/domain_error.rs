//! Domain errors - lookups against the cached state

use thiserror::Error;

use crate::value_objects::Snowflake;

/// Domain layer errors
#[derive(Debug, Error)]
pub enum DomainError {
    // =========================================================================
    // Not Found Errors
    // =========================================================================
    #[error("User not found: {0}")]
    UserNotFound(Snowflake),

    #[error("Guild not found: {0}")]
    GuildNotFound(Snowflake),

    #[error("Channel not found: {0}")]
    ChannelNotFound(Snowflake),

    #[error("Role not found: {0}")]
    RoleNotFound(Snowflake),

    #[error("Emoji not found: {0}")]
    EmojiNotFound(Snowflake),

    #[error("Member {user_id} not found in guild {guild_id}")]
    MemberNotFound {
        guild_id: Snowflake,
        user_id: Snowflake,
    },

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Shard {shard_id} not found in group {group_id}")]
    ShardNotFound { group_id: u32, shard_id: u32 },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Malformed payload for {event}: {reason}")]
    MalformedPayload { event: String, reason: String },
}

impl DomainError {
    /// Get an error code string for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "UNKNOWN_USER",
            Self::GuildNotFound(_) => "UNKNOWN_GUILD",
            Self::ChannelNotFound(_) => "UNKNOWN_CHANNEL",
            Self::RoleNotFound(_) => "UNKNOWN_ROLE",
            Self::EmojiNotFound(_) => "UNKNOWN_EMOJI",
            Self::MemberNotFound { .. } => "UNKNOWN_MEMBER",
            Self::IdentityNotFound(_) => "UNKNOWN_IDENTITY",
            Self::ShardNotFound { .. } => "UNKNOWN_SHARD",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_)
                | Self::GuildNotFound(_)
                | Self::ChannelNotFound(_)
                | Self::RoleNotFound(_)
                | Self::EmojiNotFound(_)
                | Self::MemberNotFound { .. }
                | Self::IdentityNotFound(_)
                | Self::ShardNotFound { .. }
        )
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_) | Self::MalformedPayload { .. }
        )
    }
}
