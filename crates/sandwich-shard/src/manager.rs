//! Identity manager
//!
//! One manager per bot identity. It owns the transport publisher and the
//! shard groups of that identity, and swaps groups when scaling so only one
//! group publishes at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use sandwich_common::{filter_for_node, IdentityConfig, SandwichError, SandwichResult};
use sandwich_core::{DomainError, Snowflake, User};
use serde::Serialize;
use serde_json::value::RawValue;
use tokio_util::sync::CancellationToken;

use crate::group::{GroupConfig, GroupSnapshot, ShardGroup};
use crate::protocol::{OpCode, ReadyPayload, NORMAL_CLOSURE};
use crate::rest::{GatewayBot, SessionStartLimit};
use crate::sandwich::Resources;
use crate::shard::{ChunkOutcome, Shard};
use crate::status::ManagerStatus;
use crate::transport::Publisher;

#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub identifier: String,
    pub status: ManagerStatus,
    pub live_group: Option<u32>,
    pub groups: Vec<GroupSnapshot>,
}

/// Refuse to start more shards than Discord still allows today
pub fn check_session_budget(limit: &SessionStartLimit, required: usize) -> SandwichResult<()> {
    let required = u32::try_from(required).unwrap_or(u32::MAX);
    if limit.remaining < required {
        return Err(SandwichError::SessionExhausted {
            remaining: limit.remaining,
            required,
            reset_after_ms: limit.reset_after,
        });
    }
    Ok(())
}

/// Transport client name, with a random suffix when configured
pub fn client_name(identity: &IdentityConfig) -> String {
    let messaging = &identity.messaging;
    if messaging.client_name_random_suffix {
        format!("{}-{:08x}", messaging.client_name, rand::random::<u32>())
    } else {
        messaging.client_name.clone()
    }
}

pub struct Manager {
    identity: Arc<IdentityConfig>,
    resources: Arc<Resources>,
    this: Weak<Manager>,

    status: Mutex<ManagerStatus>,
    groups: RwLock<BTreeMap<u32, Arc<ShardGroup>>>,
    live_group: Mutex<Option<u32>>,
    next_group_id: AtomicU32,

    publisher: RwLock<Option<Arc<dyn Publisher>>>,
    user: RwLock<Option<User>>,
    application_id: AtomicU64,

    /// Serializes start, scale, and stop
    lifecycle: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl Manager {
    pub fn new(
        identity: IdentityConfig,
        resources: Arc<Resources>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            identity: Arc::new(identity),
            resources,
            this: this.clone(),
            status: Mutex::new(ManagerStatus::Idle),
            groups: RwLock::new(BTreeMap::new()),
            live_group: Mutex::new(None),
            next_group_id: AtomicU32::new(0),
            publisher: RwLock::new(None),
            user: RwLock::new(None),
            application_id: AtomicU64::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
            cancel: parent.child_token(),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identity.identifier
    }

    pub fn identity(&self) -> &Arc<IdentityConfig> {
        &self.identity
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    pub fn status(&self) -> ManagerStatus {
        *self.status.lock()
    }

    pub fn publisher(&self) -> Option<Arc<dyn Publisher>> {
        self.publisher.read().clone()
    }

    /// Bot user from the latest READY or USER_UPDATE
    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn set_user(&self, user: User) {
        *self.user.write() = Some(user);
    }

    pub fn application_id(&self) -> u64 {
        self.application_id.load(Ordering::Acquire)
    }

    pub fn on_ready(&self, ready: &ReadyPayload) {
        let application_id = if ready.application.id.is_zero() {
            ready.user.id
        } else {
            ready.application.id
        };
        self.application_id
            .store(application_id.into_inner(), Ordering::Release);
        self.set_user(ready.user.clone());
    }

    pub fn group(&self, group_id: u32) -> Option<Arc<ShardGroup>> {
        self.groups.read().get(&group_id).cloned()
    }

    pub fn groups(&self) -> Vec<Arc<ShardGroup>> {
        self.groups.read().values().cloned().collect()
    }

    /// Group whose floodgate is open
    pub fn live_group(&self) -> Option<Arc<ShardGroup>> {
        let live = *self.live_group.lock();
        live.and_then(|group_id| self.group(group_id))
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            identifier: self.identity.identifier.clone(),
            status: self.status(),
            live_group: *self.live_group.lock(),
            groups: self.groups().iter().map(|group| group.snapshot()).collect(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect the publisher and start the first group
    pub async fn start(&self) -> SandwichResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.status().is_running() {
            return Err(SandwichError::Config(format!(
                "identity {} is already running",
                self.identity.identifier
            )));
        }

        self.set_status(ManagerStatus::Starting);
        let result = async {
            self.ensure_publisher().await?;
            let gateway = self.gateway_bot().await?;
            let shard_count = if self.identity.sharding.auto_sharded {
                gateway.shards
            } else {
                self.identity.sharding.shard_count
            }
            .max(1);
            self.launch(&gateway, shard_count, None).await
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(identifier = %self.identity.identifier, error = %e, "Identity failed to start");
            self.set_status(ManagerStatus::Failed);
        }
        result
    }

    /// Replace the live group with one running `shard_count` shards
    ///
    /// The old group keeps publishing until the new one is ready.
    pub async fn scale(&self, shard_count: u32, shard_ids: Option<Vec<u32>>) -> SandwichResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.status().is_running() {
            return Err(SandwichError::Config(format!(
                "identity {} is not running",
                self.identity.identifier
            )));
        }

        tracing::info!(identifier = %self.identity.identifier, shard_count = shard_count, "Scaling");
        let gateway = self.gateway_bot().await?;
        let result = self.launch(&gateway, shard_count.max(1), shard_ids).await;
        if result.is_err() && self.live_group().is_some() {
            self.set_status(ManagerStatus::Ready);
        }
        result
    }

    /// Close every group with a normal closure and the publisher
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if matches!(self.status(), ManagerStatus::Idle | ManagerStatus::Stopped) {
            return;
        }
        self.set_status(ManagerStatus::Stopping);

        let groups: Vec<Arc<ShardGroup>> = std::mem::take(&mut *self.groups.write())
            .into_values()
            .collect();
        *self.live_group.lock() = None;
        for group in &groups {
            group.mark_for_closure();
        }
        join_all(groups.iter().map(|group| group.close(NORMAL_CLOSURE))).await;

        let publisher = self.publisher.write().take();
        if let Some(publisher) = publisher {
            publisher.close().await;
        }
        self.set_status(ManagerStatus::Stopped);
    }

    async fn gateway_bot(&self) -> SandwichResult<GatewayBot> {
        Ok(self.resources.rest.gateway_bot(&self.identity.token).await?)
    }

    async fn ensure_publisher(&self) -> SandwichResult<Arc<dyn Publisher>> {
        if let Some(publisher) = self.publisher() {
            return Ok(publisher);
        }

        let messaging = &self.identity.messaging;
        let publisher = self.resources.drivers.create(&messaging.driver)?;
        let manager = self.this.upgrade().ok_or(SandwichError::Cancelled)?;
        let options: HashMap<String, String> = messaging
            .options
            .iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value.clone()))
            .collect();
        let client_name = client_name(&self.identity);

        publisher.connect(manager, &client_name, &options).await?;
        tracing::info!(
            identifier = %self.identity.identifier,
            driver = publisher.name(),
            client_name = %client_name,
            "Publisher connected"
        );

        *self.publisher.write() = Some(Arc::clone(&publisher));
        Ok(publisher)
    }

    /// Start a new group and make it live once ready
    async fn launch(
        &self,
        gateway: &GatewayBot,
        shard_count: u32,
        shard_ids: Option<Vec<u32>>,
    ) -> SandwichResult<()> {
        let shard_ids = match shard_ids {
            Some(ids) => ids.into_iter().filter(|&id| id < shard_count).collect(),
            None => self.identity.shard_ids(shard_count)?,
        };
        let cluster = self.resources.cluster;
        let shard_ids = filter_for_node(shard_ids, cluster.node_count, cluster.node_id);
        check_session_budget(&gateway.session_start_limit, shard_ids.len())?;

        let group_id = self.next_group_id.fetch_add(1, Ordering::AcqRel);
        let group = ShardGroup::new(
            GroupConfig {
                group_id,
                identity: Arc::clone(&self.identity),
                shard_count,
                shard_ids,
                gateway_url: gateway.url.clone(),
                max_concurrency: gateway.session_start_limit.max_concurrency.max(1),
            },
            &self.resources,
            self.this.clone(),
            &self.cancel,
        );
        self.groups.write().insert(group_id, Arc::clone(&group));

        if self.live_group().is_none() {
            self.set_status(ManagerStatus::Connecting);
        }
        if let Err(e) = group.open().await {
            group.close(NORMAL_CLOSURE).await;
            self.groups.write().remove(&group_id);
            return Err(e);
        }
        if self.live_group().is_none() {
            self.set_status(ManagerStatus::Connected);
        }

        // Only one group publishes at a time; the old group's chunk
        // requests are cancelled after the new floodgate is open
        let previous = self.live_group.lock().replace(group_id);
        let previous = previous.and_then(|id| self.group(id));
        if let Some(old) = &previous {
            old.close_floodgate();
        }
        group.open_floodgate();
        self.set_status(ManagerStatus::Ready);

        if let Some(old) = previous {
            old.mark_for_closure();
            old.close(NORMAL_CLOSURE).await;
            self.groups.write().remove(&old.group_id());
        }
        Ok(())
    }

    // =========================================================================
    // Shard access
    // =========================================================================

    /// Send a raw gateway command through a shard
    ///
    /// `group_id` defaults to the live group.
    pub async fn send_event(
        &self,
        group_id: Option<u32>,
        shard_id: u32,
        op: u8,
        data: &RawValue,
    ) -> SandwichResult<()> {
        let op = OpCode::from_u8(op)
            .filter(|op| op.is_client_op())
            .ok_or_else(|| SandwichError::Protocol(format!("op {op} cannot be sent")))?;
        let shard = self.find_shard(group_id, shard_id)?;
        shard.send_event(op, data).await
    }

    pub fn find_shard(&self, group_id: Option<u32>, shard_id: u32) -> SandwichResult<Arc<Shard>> {
        let group = match group_id {
            Some(group_id) => self.group(group_id),
            None => self.live_group(),
        }
        .ok_or(DomainError::ShardNotFound {
            group_id: group_id.unwrap_or_default(),
            shard_id,
        })?;
        group.try_shard(shard_id)
    }

    /// `(group_id, shard_id)` of every shard that holds the guild
    pub fn where_is_guild(&self, guild_id: Snowflake) -> Vec<(u32, u32)> {
        self.groups()
            .iter()
            .flat_map(|group| {
                group
                    .shards()
                    .into_iter()
                    .filter(|shard| shard.has_guild(guild_id))
                    .map(|shard| (group.group_id(), shard.shard_id()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Chunk a guild on the live shard responsible for it
    ///
    /// With `wait` unset the request runs in the background and `None` is
    /// returned at once.
    pub async fn request_guild_chunk(
        &self,
        guild_id: Snowflake,
        always: bool,
        wait: bool,
    ) -> SandwichResult<Option<ChunkOutcome>> {
        let group = self.live_group().ok_or_else(|| {
            SandwichError::Config(format!("identity {} is not running", self.identity.identifier))
        })?;
        let shard = group.shard_for_guild(guild_id).ok_or(DomainError::ShardNotFound {
            group_id: group.group_id(),
            shard_id: guild_id.shard_id(group.shard_count()),
        })?;

        if wait {
            return shard.chunk_guild(guild_id, always).await.map(Some);
        }
        tokio::spawn(async move {
            let _ = shard.chunk_guild(guild_id, always).await;
        });
        Ok(None)
    }

    fn set_status(&self, status: ManagerStatus) {
        {
            let mut current = self.status.lock();
            if *current == status {
                return;
            }
            *current = status;
        }
        tracing::info!(identifier = %self.identity.identifier, status = %status, "Identity status changed");
        self.resources
            .status
            .application(&self.identity.identifier, status);
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("identifier", &self.identity.identifier)
            .field("status", &self.status())
            .field("live_group", &*self.live_group.lock())
            .finish_non_exhaustive()
    }
}
