//! Query services

pub mod matching;
pub mod query;

pub use matching::{normalize, NameQuery};
pub use query::QueryService;
