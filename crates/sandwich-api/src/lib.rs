//! # sandwich-api
//!
//! Query RPC server built with Axum, and the daemon entry point that wires
//! the shard managers, the messaging drivers, and the RPC surface together.

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;

pub use server::{create_app, run};
pub use state::AppState;
