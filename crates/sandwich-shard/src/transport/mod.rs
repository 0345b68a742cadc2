//! Transport façade
//!
//! One publisher per identity, picked by driver name from the
//! [`DriverRegistry`].

mod error;
mod memory;
mod publisher;
mod registry;

pub use error::TransportError;
pub use memory::{MemoryMessage, MemoryPublisher, DEFAULT_MEMORY_CAPACITY};
pub use publisher::{shard_channel, Publisher};
pub use registry::{DriverFactory, DriverRegistry};
