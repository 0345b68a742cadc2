//! Dispatch: per-event state handlers and the publish pipeline

mod events;
mod handlers;
mod payload;
mod pipeline;

pub use events::{
    ChunkProgress, GuildEmojisUpdate, GuildMemberRemove, GuildMembersChunk, GuildRoleDelete,
    GuildRoleEvent, GuildStickersUpdate, PresenceUpdate, ThreadDelete, ThreadListSync,
};
pub use handlers::{handler_for, DispatchContext, DispatchHooks, HandlerFn, HandlerOutcome};
pub use payload::{rewrite_discriminators, CanonicalPayload, Extra, SandwichMetadata, Trace};
pub use pipeline::{dispatch, DispatchRoute, Disposition, EventPool};
