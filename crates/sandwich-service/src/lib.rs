//! # sandwich-service
//!
//! Query layer: read-only lookups over the state store, name matching, and
//! the request/response DTOs used by the RPC surface.

pub mod dto;
pub mod services;

pub use services::QueryService;
