//! Wire codec
//!
//! Inbound frames become [`GatewayEvent`](crate::protocol::GatewayEvent)s;
//! outbound commands are paced by [`CommandLimiter`].

mod error;
mod inflate;
mod limiter;

pub use error::CodecError;
pub use inflate::{FrameDecoder, ZlibStream, MAX_MESSAGE_SIZE, ZLIB_SUFFIX};
pub use limiter::CommandLimiter;
