//! Application state
//!
//! Holds the query service shared by every RPC handler.

use std::sync::Arc;

use sandwich_service::QueryService;
use sandwich_shard::Sandwich;

/// Application state shared across all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    query: QueryService,
}

impl AppState {
    pub fn new(sandwich: Arc<Sandwich>) -> Self {
        Self {
            query: QueryService::new(sandwich),
        }
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn sandwich(&self) -> &Arc<Sandwich> {
        self.query.sandwich()
    }
}
