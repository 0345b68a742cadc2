//! Integration test utilities for sandwich
//!
//! Runs a full daemon against a fake Discord (REST and zlib-stream gateway)
//! and talks to it the way consumers do: over the RPC surface and the
//! virtual gateway.

pub mod client;
pub mod fake_discord;
pub mod fixtures;
pub mod helpers;

pub use client::*;
pub use fake_discord::*;
pub use fixtures::*;
pub use helpers::*;
