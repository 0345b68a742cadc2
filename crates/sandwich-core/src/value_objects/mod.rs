//! Value objects - immutable types that represent domain concepts

mod intents;
mod snowflake;
mod timestamp;

pub use intents::Intents;
pub use snowflake::{Snowflake, SnowflakeParseError};

/// Serde adapter for timestamps that tolerates malformed input
pub mod lenient_timestamp {
    pub use super::timestamp::{deserialize, parse, serialize};
}
