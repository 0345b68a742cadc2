//! Gateway protocol definitions
//!
//! Op codes, message envelopes, payloads, and close codes of the Discord
//! gateway as spoken both upstream and to virtual-gateway consumers.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{classify_close, CloseCode, ReconnectAction, NORMAL_CLOSURE};
pub use messages::{heartbeat_command, GatewayCommand, GatewayEvent};
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, PartialApplication, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload, LARGE_THRESHOLD, SANDWICH_VERSION,
};
