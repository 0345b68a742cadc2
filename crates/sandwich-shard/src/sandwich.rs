//! Process context
//!
//! `Resources` holds what every identity shares: the state store, the event
//! pool, the identify buckets, the status feed, the REST client, and the
//! driver registry. `Sandwich` keeps the managers by identifier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use sandwich_common::{
    AppConfig, ClusterConfig, IdentityConfig, SandwichConfig, SandwichError, SandwichResult,
};
use sandwich_core::{DomainError, Snowflake};
use sandwich_state::StateStore;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::dispatch::EventPool;
use crate::identify::IdentifyCoordinator;
use crate::manager::{Manager, ManagerSnapshot};
use crate::rest::DiscordRest;
use crate::status::{StatusBroadcaster, StatusEvent};
use crate::transport::DriverRegistry;

/// Shared by every identity of the process
#[derive(Debug)]
pub struct Resources {
    pub state: Arc<StateStore>,
    pub event_pool: EventPool,
    pub identify: IdentifyCoordinator,
    pub status: StatusBroadcaster,
    pub rest: DiscordRest,
    pub drivers: DriverRegistry,
    pub cluster: ClusterConfig,
}

impl Resources {
    pub fn new(
        state: Arc<StateStore>,
        rest: DiscordRest,
        event_pool_limit: usize,
        cluster: ClusterConfig,
    ) -> Self {
        Self {
            state,
            event_pool: EventPool::new(event_pool_limit),
            identify: IdentifyCoordinator::new(),
            status: StatusBroadcaster::default(),
            rest,
            drivers: DriverRegistry::default(),
            cluster,
        }
    }

    /// Build from process settings
    pub fn from_config(config: &AppConfig) -> SandwichResult<Self> {
        let rest = DiscordRest::new(
            config.discord.api_base.clone(),
            Duration::from_secs(config.discord.http_timeout_secs),
        )
        .map_err(SandwichError::from)?;

        Ok(Self::new(
            StateStore::new_shared(),
            rest,
            config.sandwich.event_pool_limit,
            config.cluster,
        ))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(
            StateStore::new_shared(),
            DiscordRest::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap(),
            16,
            ClusterConfig {
                node_count: 1,
                node_id: 0,
            },
        )
    }
}

/// Where a guild is currently served
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildLocation {
    pub identifier: String,
    pub group_id: u32,
    pub shard_id: u32,
}

/// Registry of identity managers
pub struct Sandwich {
    resources: Arc<Resources>,
    managers: RwLock<BTreeMap<String, Arc<Manager>>>,
    cancel: CancellationToken,
}

impl Sandwich {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self {
            resources,
            managers: RwLock::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register every identity of the file
    pub fn with_identities(resources: Arc<Resources>, config: SandwichConfig) -> SandwichResult<Self> {
        let sandwich = Self::new(resources);
        for identity in config.identities {
            sandwich.add_identity(identity)?;
        }
        Ok(sandwich)
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.resources.state
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.resources.status.subscribe()
    }

    pub fn add_identity(&self, identity: IdentityConfig) -> SandwichResult<Arc<Manager>> {
        let mut managers = self.managers.write();
        if managers.contains_key(&identity.identifier) {
            return Err(SandwichError::Config(format!(
                "duplicate identifier {}",
                identity.identifier
            )));
        }

        let identifier = identity.identifier.clone();
        let manager = Manager::new(identity, Arc::clone(&self.resources), &self.cancel);
        managers.insert(identifier, Arc::clone(&manager));
        Ok(manager)
    }

    pub fn manager(&self, identifier: &str) -> Option<Arc<Manager>> {
        self.managers.read().get(identifier).cloned()
    }

    pub fn try_manager(&self, identifier: &str) -> SandwichResult<Arc<Manager>> {
        self.manager(identifier)
            .ok_or_else(|| DomainError::IdentityNotFound(identifier.to_string()).into())
    }

    pub fn managers(&self) -> Vec<Arc<Manager>> {
        self.managers.read().values().cloned().collect()
    }

    pub async fn start_identity(&self, identifier: &str) -> SandwichResult<()> {
        self.try_manager(identifier)?.start().await
    }

    pub async fn stop_identity(&self, identifier: &str) -> SandwichResult<()> {
        self.try_manager(identifier)?.stop().await;
        Ok(())
    }

    /// Status of every identity, sorted by identifier
    pub fn identities(&self) -> Vec<ManagerSnapshot> {
        self.managers().iter().map(|manager| manager.snapshot()).collect()
    }

    /// Start every identity with `auto_start`; failures are logged per identity
    pub async fn start_auto(&self) {
        let managers: Vec<Arc<Manager>> = self
            .managers()
            .into_iter()
            .filter(|manager| manager.identity().auto_start)
            .collect();

        let results = join_all(managers.iter().map(|manager| manager.start())).await;
        for (manager, result) in managers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(identifier = %manager.identifier(), error = %e, "Auto start failed");
            }
        }
    }

    pub fn where_is_guild(&self, guild_id: Snowflake) -> Vec<GuildLocation> {
        self.managers()
            .iter()
            .flat_map(|manager| {
                manager
                    .where_is_guild(guild_id)
                    .into_iter()
                    .map(|(group_id, shard_id)| GuildLocation {
                        identifier: manager.identifier().to_string(),
                        group_id,
                        shard_id,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Stop every identity and cancel whatever is left
    pub async fn shutdown(&self) {
        tracing::info!(identities = self.managers.read().len(), "Shutting down");
        let managers = self.managers();
        join_all(managers.iter().map(|manager| manager.stop())).await;
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Sandwich {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandwich")
            .field("identities", &self.managers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
