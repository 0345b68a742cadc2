//! Consumer sessions and their registry

mod hub;
mod session;

pub use hub::{Hub, SESSION_TTL};
pub use session::{Queued, Session, SESSION_QUEUE_LIMIT};
