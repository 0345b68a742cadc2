//! Shard group: the shards of one identity started as a unit
//!
//! The first shard opens alone so a bad token fails fast; the rest open
//! concurrently. Dispatches are applied to state from the start but only
//! published once the manager opens the floodgate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use sandwich_common::{IdentityConfig, SandwichError, SandwichResult};
use sandwich_core::{DomainError, Snowflake};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::manager::Manager;
use crate::sandwich::Resources;
use crate::shard::{Shard, ShardConfig, ShardSnapshot};
use crate::status::{GroupStatus, StatusBroadcaster};

/// Parameters of a new group
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub group_id: u32,
    pub identity: Arc<IdentityConfig>,
    pub shard_count: u32,
    pub shard_ids: Vec<u32>,
    pub gateway_url: String,
    pub max_concurrency: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub group_id: u32,
    pub status: GroupStatus,
    pub shard_count: u32,
    pub floodgate: bool,
    pub shards: Vec<ShardSnapshot>,
}

pub struct ShardGroup {
    group_id: u32,
    identity: Arc<IdentityConfig>,
    shard_count: u32,
    manager: Weak<Manager>,
    shards: RwLock<BTreeMap<u32, Arc<Shard>>>,
    floodgate: AtomicBool,
    status: Mutex<GroupStatus>,
    feed: StatusBroadcaster,
    cancel: CancellationToken,
    chunk_cancel: CancellationToken,
}

impl ShardGroup {
    pub fn new(
        config: GroupConfig,
        resources: &Arc<Resources>,
        manager: Weak<Manager>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let cancel = parent.child_token();

        Arc::new_cyclic(|group: &Weak<ShardGroup>| {
            let shards = config
                .shard_ids
                .iter()
                .map(|&shard_id| {
                    let shard = Shard::new(
                        ShardConfig {
                            shard_id,
                            shard_count: config.shard_count,
                            group_id: config.group_id,
                            identity: Arc::clone(&config.identity),
                            gateway_url: config.gateway_url.clone(),
                            max_concurrency: config.max_concurrency,
                        },
                        Arc::clone(resources),
                        group.clone(),
                        cancel.child_token(),
                    );
                    (shard_id, shard)
                })
                .collect();

            Self {
                group_id: config.group_id,
                identity: config.identity,
                shard_count: config.shard_count,
                manager,
                shards: RwLock::new(shards),
                floodgate: AtomicBool::new(false),
                status: Mutex::new(GroupStatus::Idle),
                feed: resources.status.clone(),
                chunk_cancel: cancel.child_token(),
                cancel,
            }
        })
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn status(&self) -> GroupStatus {
        *self.status.lock()
    }

    pub fn manager(&self) -> Option<Arc<Manager>> {
        self.manager.upgrade()
    }

    // =========================================================================
    // Floodgate
    // =========================================================================

    /// Whether dispatches of this group are published
    pub fn floodgate(&self) -> bool {
        self.floodgate.load(Ordering::Acquire)
    }

    pub fn open_floodgate(&self) {
        if !self.floodgate.swap(true, Ordering::AcqRel) {
            tracing::info!(identifier = %self.identity.identifier, group_id = self.group_id, "Floodgate opened");
        }
    }

    pub fn close_floodgate(&self) {
        if self.floodgate.swap(false, Ordering::AcqRel) {
            tracing::info!(identifier = %self.identity.identifier, group_id = self.group_id, "Floodgate closed");
        }
    }

    /// Cancelled once the group is marked for closure
    pub fn chunk_cancel(&self) -> CancellationToken {
        self.chunk_cancel.clone()
    }

    // =========================================================================
    // Shards
    // =========================================================================

    pub fn shard(&self, shard_id: u32) -> Option<Arc<Shard>> {
        self.shards.read().get(&shard_id).cloned()
    }

    /// Shards in id order
    pub fn shards(&self) -> Vec<Arc<Shard>> {
        self.shards.read().values().cloned().collect()
    }

    pub fn shard_ids(&self) -> Vec<u32> {
        self.shards.read().keys().copied().collect()
    }

    /// Shard responsible for `guild_id`, if this group runs it
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> Option<Arc<Shard>> {
        self.shard(guild_id.shard_id(self.shard_count))
    }

    pub fn try_shard(&self, shard_id: u32) -> SandwichResult<Arc<Shard>> {
        self.shard(shard_id).ok_or_else(|| {
            DomainError::ShardNotFound {
                group_id: self.group_id,
                shard_id,
            }
            .into()
        })
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            group_id: self.group_id,
            status: self.status(),
            shard_count: self.shard_count,
            floodgate: self.floodgate(),
            shards: self.shards().iter().map(|shard| shard.snapshot()).collect(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bring every shard to Ready
    ///
    /// Fails if the first shard fails or any shard fails fatally. Other shard
    /// failures are logged and leave that shard Erroring.
    pub async fn open(&self) -> SandwichResult<()> {
        self.set_status(GroupStatus::Connecting);

        let shards = self.shards();
        let Some((first, rest)) = shards.split_first() else {
            self.set_status(GroupStatus::Connected);
            return Ok(());
        };

        tracing::info!(
            identifier = %self.identity.identifier,
            group_id = self.group_id,
            shard_count = self.shard_count,
            shards = shards.len(),
            "Starting shard group"
        );

        if let Err(e) = first.open().await {
            return Err(self.fail(e).await);
        }

        let results = join_all(rest.iter().map(|shard| shard.open())).await;
        for (shard, result) in rest.iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() || matches!(e, SandwichError::Cancelled) => {
                    return Err(self.fail(e).await);
                }
                Err(e) => tracing::warn!(
                    identifier = %self.identity.identifier,
                    group_id = self.group_id,
                    shard_id = shard.shard_id(),
                    error = %e,
                    "Shard failed to start"
                ),
            }
        }

        // A shard may have failed the group while the rest were opening
        if self.status() == GroupStatus::Erroring {
            return Err(SandwichError::Auth(format!(
                "group {} failed while starting",
                self.group_id
            )));
        }
        self.set_status(GroupStatus::Connected);
        Ok(())
    }

    /// Stop publishing and cancel outstanding chunk requests
    pub fn mark_for_closure(&self) {
        self.close_floodgate();
        self.chunk_cancel.cancel();
        self.set_status(GroupStatus::MarkedForClosure);
    }

    /// Close every shard with `code`
    pub async fn close(&self, code: u16) {
        if self.status() == GroupStatus::Closed {
            return;
        }
        self.close_floodgate();
        self.chunk_cancel.cancel();
        self.set_status(GroupStatus::Closing);

        let shards = self.shards();
        join_all(shards.iter().map(|shard| shard.close(code))).await;
        self.cancel.cancel();

        self.set_status(GroupStatus::Closed);
    }

    async fn fail(&self, error: SandwichError) -> SandwichError {
        tracing::error!(
            identifier = %self.identity.identifier,
            group_id = self.group_id,
            error = %error,
            "Shard group failed to start"
        );
        self.set_status(GroupStatus::Erroring);
        self.chunk_cancel.cancel();

        let shards = self.shards();
        join_all(shards.iter().map(|shard| shard.close(crate::protocol::NORMAL_CLOSURE))).await;
        self.cancel.cancel();
        error
    }

    /// A shard of this group stopped after `error`
    ///
    /// An Auth error fails the whole group: publishing stops, chunk requests
    /// are cancelled and the sibling shards are closed. Anything else only
    /// takes down the one shard.
    pub(crate) fn on_shard_error(&self, shard_id: u32, error: &SandwichError) {
        if !error.is_fatal() {
            tracing::warn!(
                identifier = %self.identity.identifier,
                group_id = self.group_id,
                shard_id = shard_id,
                error = %error,
                "Shard gave up, group keeps running"
            );
            return;
        }

        // Only the first fatal error acts
        {
            let mut current = self.status.lock();
            if matches!(
                *current,
                GroupStatus::Erroring | GroupStatus::Closing | GroupStatus::Closed
            ) {
                return;
            }
            *current = GroupStatus::Erroring;
        }
        self.feed
            .group(&self.identity.identifier, self.group_id, GroupStatus::Erroring);

        tracing::error!(
            identifier = %self.identity.identifier,
            group_id = self.group_id,
            shard_id = shard_id,
            error = %error,
            "Shard failed fatally, failing group"
        );
        self.close_floodgate();
        self.chunk_cancel.cancel();

        // Called from the failing shard's own task, so siblings close elsewhere
        let siblings: Vec<Arc<Shard>> = self
            .shards()
            .into_iter()
            .filter(|shard| shard.shard_id() != shard_id)
            .collect();
        tokio::spawn(async move {
            join_all(
                siblings
                    .iter()
                    .map(|shard| shard.close(crate::protocol::NORMAL_CLOSURE)),
            )
            .await;
        });
    }

    fn set_status(&self, status: GroupStatus) {
        {
            let mut current = self.status.lock();
            if *current == status
                || (*current == GroupStatus::Erroring && status == GroupStatus::Closing)
            {
                return;
            }
            tracing::debug!(
                identifier = %self.identity.identifier,
                group_id = self.group_id,
                from = %*current,
                to = %status,
                "Group status changed"
            );
            *current = status;
        }
        self.feed
            .group(&self.identity.identifier, self.group_id, status);
    }
}

impl std::fmt::Debug for ShardGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardGroup")
            .field("identifier", &self.identity.identifier)
            .field("group_id", &self.group_id)
            .field("shard_count", &self.shard_count)
            .field("status", &self.status())
            .field("floodgate", &self.floodgate())
            .finish_non_exhaustive()
    }
}
