//! Driver registry
//!
//! Maps the `messaging.driver` name of an identity to a publisher factory.
//! Drivers living in other crates register themselves at startup.

use std::sync::Arc;

use dashmap::DashMap;

use super::{MemoryPublisher, Publisher, TransportError};

pub type DriverFactory = Arc<dyn Fn() -> Arc<dyn Publisher> + Send + Sync>;

pub struct DriverRegistry {
    factories: DashMap<String, DriverFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let registry = Self::empty();
        registry.register("memory", || Arc::new(MemoryPublisher::default()) as Arc<dyn Publisher>);
        registry
    }
}

impl DriverRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Register or replace a driver
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Publisher> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Build a fresh publisher for `name`
    pub fn create(&self, name: &str) -> Result<Arc<dyn Publisher>, TransportError> {
        let factory = self
            .factories
            .get(&name.to_ascii_lowercase())
            .map(|f| f.value().clone())
            .ok_or_else(|| TransportError::UnknownDriver(name.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
