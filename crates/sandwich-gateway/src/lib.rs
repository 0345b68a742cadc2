//! # sandwich-gateway
//!
//! Virtual gateway: consumers connect with any Discord library and receive
//! the dispatch stream of one identity as if they were talking to Discord.
//!
//! ## Layout
//!
//! - **protocol**: HELLO, heartbeat ACK, invalid session and dispatch frames
//! - **connection**: resumable consumer sessions and the hub routing to them
//! - **hydrate**: synthetic READY and GUILD_CREATE built from the cache
//! - **server**: axum WebSocket handler and the `/publish` endpoint
//! - **publisher**: the `websocket` messaging driver
//!
//! ## Example
//!
//! ```ignore
//! let resources = Resources::from_config(&app_config)?;
//! WebsocketPublisher::register(&resources.drivers);
//! // identities with `messaging.driver = "websocket"` now serve consumers
//! // on `messaging.options.address`
//! ```

pub mod connection;
pub mod error;
pub mod hydrate;
pub mod protocol;
pub mod publisher;
pub mod server;

pub use connection::{Hub, Session};
pub use error::GatewayError;
pub use publisher::{WebsocketPublisher, DRIVER_NAME};
pub use server::{create_app, GatewaySettings, GatewayState};
