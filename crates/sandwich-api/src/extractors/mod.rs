//! Axum extractors for request handling

mod rpc_json;

pub use rpc_json::RpcJson;
