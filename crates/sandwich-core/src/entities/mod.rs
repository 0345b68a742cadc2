//! Cached entity projections - only the fields the daemon or consumers read

mod channel;
mod emoji;
mod guild;
mod member;
mod role;
mod user;
mod voice_state;

pub use channel::{Channel, ChannelType, PermissionOverwrite, ThreadMetadata};
pub use emoji::Emoji;
pub use guild::{Guild, UnavailableGuild};
pub use member::GuildMember;
pub use role::{Role, RoleTags};
pub use user::{User, DEFAULT_DISCRIMINATOR};
pub use voice_state::VoiceState;
