//! Shard: one WebSocket session against the Discord gateway
//!
//! A shard runs one long-lived task that connects, identifies or resumes,
//! reads frames, and reconnects according to the close reason. The reader
//! applies dispatches to the state store inline so one shard's events are
//! applied in the order Discord sent them.

mod chunk;
mod connection;
mod session;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use sandwich_common::{IdentityConfig, SandwichError, SandwichResult};
use sandwich_core::{Snowflake, User};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use chunk::{ChunkOutcome, CHUNK_IDLE_TIMEOUT, CHUNK_START_TIMEOUT};
pub use session::{HeartbeatClock, ReadyBarrier, Session, HEARTBEAT_FAILURE_FACTOR, READY_IDLE_TIMEOUT};

use crate::codec::CommandLimiter;
use crate::dispatch::{ChunkProgress, DispatchHooks, SandwichMetadata};
use crate::group::ShardGroup;
use crate::manager::Manager;
use crate::protocol::{GatewayCommand, OpCode, ReadyPayload, NORMAL_CLOSURE};
use crate::sandwich::Resources;
use crate::status::ShardStatus;
use crate::transport::Publisher;

/// Static parameters of one shard
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub shard_id: u32,
    pub shard_count: u32,
    pub group_id: u32,
    pub identity: Arc<IdentityConfig>,
    /// Base gateway URL from `GET /gateway/bot`
    pub gateway_url: String,
    pub max_concurrency: u32,
}

/// Status view of a shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardSnapshot {
    pub shard_id: u32,
    pub status: ShardStatus,
    pub latency_ms: Option<u64>,
    pub guild_count: usize,
}

/// Frames queued for the connection writer
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close(u16),
}

pub struct Shard {
    config: ShardConfig,
    resources: Arc<Resources>,
    group: Weak<ShardGroup>,

    status: watch::Sender<ShardStatus>,
    session: Mutex<Session>,
    sequence: AtomicU64,
    barrier: Mutex<ReadyBarrier>,
    heartbeat: Mutex<Option<HeartbeatClock>>,
    guilds: RwLock<HashSet<Snowflake>>,

    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    limiter: CommandLimiter,
    chunks: dashmap::DashMap<String, mpsc::UnboundedSender<ChunkProgress>>,

    retries: AtomicU32,
    last_error: Mutex<Option<(bool, String)>>,
    close_code: AtomicU16,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Shard {
    pub fn new(
        config: ShardConfig,
        resources: Arc<Resources>,
        group: Weak<ShardGroup>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ShardStatus::Idle);
        let retries = config.identity.bot.retries;

        Arc::new(Self {
            config,
            resources,
            group,
            status,
            session: Mutex::new(Session::default()),
            sequence: AtomicU64::new(0),
            barrier: Mutex::new(ReadyBarrier::default()),
            heartbeat: Mutex::new(None),
            guilds: RwLock::new(HashSet::new()),
            outbound: Mutex::new(None),
            limiter: CommandLimiter::new(),
            chunks: dashmap::DashMap::new(),
            retries: AtomicU32::new(retries),
            last_error: Mutex::new(None),
            close_code: AtomicU16::new(NORMAL_CLOSURE),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            cancel,
        })
    }

    pub fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    pub fn shard_count(&self) -> u32 {
        self.config.shard_count
    }

    pub fn group_id(&self) -> u32 {
        self.config.group_id
    }

    pub fn identifier(&self) -> &str {
        &self.config.identity.identifier
    }

    pub fn status(&self) -> ShardStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ShardStatus> {
        self.status.subscribe()
    }

    /// Last sequence number received
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// Heartbeat round trip of the current connection
    pub fn latency(&self) -> Option<Duration> {
        (*self.heartbeat.lock()).and_then(|clock| clock.latency)
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.read().iter().copied().collect()
    }

    pub fn has_guild(&self, guild_id: Snowflake) -> bool {
        self.guilds.read().contains(&guild_id)
    }

    /// Guilds READY listed that have not arrived yet
    pub fn unavailable_guilds(&self) -> Vec<Snowflake> {
        self.barrier.lock().pending().iter().copied().collect()
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        ShardSnapshot {
            shard_id: self.shard_id(),
            status: self.status(),
            latency_ms: self.latency().map(|d| d.as_millis() as u64),
            guild_count: self.guilds.read().len(),
        }
    }

    /// Message of the error that stopped the shard, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|(_, message)| message.clone())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the connection task; later calls are no-ops
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let shard = Arc::clone(self);
        let handle = tokio::spawn(async move { shard.run().await });
        *self.task.lock() = Some(handle);
    }

    /// Start and wait until the shard is ready or has given up
    pub async fn open(self: &Arc<Self>) -> SandwichResult<()> {
        self.start();
        self.wait_ready().await
    }

    /// Resolve once the shard passed the READY barrier
    pub async fn wait_ready(&self) -> SandwichResult<()> {
        let mut rx = self.status.subscribe();
        let status = *rx
            .wait_for(|status| status.is_settled())
            .await
            .map_err(|_| SandwichError::Cancelled)?;

        match status {
            ShardStatus::Ready => Ok(()),
            ShardStatus::Erroring => Err(self.terminal_error()),
            _ => Err(SandwichError::Cancelled),
        }
    }

    /// Close the connection with `code` and stop reconnecting
    ///
    /// Safe to call more than once; later calls only wait for the task.
    pub async fn close(&self, code: u16) {
        if !self.cancel.is_cancelled() {
            tracing::info!(
                identifier = %self.identifier(),
                group_id = self.group_id(),
                shard_id = self.shard_id(),
                close_code = code,
                "Closing shard"
            );
            self.close_code.store(code, Ordering::Release);
            if !self.status().is_terminal() {
                self.set_status(ShardStatus::Closing);
            }
            self.cancel.cancel();
        }

        let handle = self.task.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(shard_id = self.shard_id(), error = %e, "Shard task panicked");
                }
            }
            None if !self.started.load(Ordering::Acquire) => {
                self.set_status(ShardStatus::Closed);
            }
            None => {}
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Send a gateway command through the rate limiter
    pub async fn send_event<T: Serialize + ?Sized>(&self, op: OpCode, data: &T) -> SandwichResult<()> {
        let text = GatewayCommand::new(op, data).to_json()?;

        tokio::select! {
            () = self.cancel.cancelled() => return Err(SandwichError::Cancelled),
            () = self.limiter.acquire() => {}
        }

        tracing::debug!(shard_id = self.shard_id(), op = op.as_u8(), "Sending command");
        self.enqueue(Outbound::Text(text))
    }

    pub(crate) fn enqueue(&self, frame: Outbound) -> SandwichResult<()> {
        let guard = self.outbound.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| SandwichError::Transport("shard is not connected".to_string()))?;
        sender
            .send(frame)
            .map_err(|_| SandwichError::Transport("connection writer stopped".to_string()))
    }

    // =========================================================================
    // Internals shared by the connection and chunk modules
    // =========================================================================

    pub(crate) fn set_status(&self, status: ShardStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            self.resources.status.shard(
                self.identifier(),
                self.group_id(),
                self.shard_id(),
                status,
            );
        }
    }

    fn record_error(&self, error: &SandwichError) {
        *self.last_error.lock() = Some((error.is_fatal(), error.to_string()));
    }

    fn terminal_error(&self) -> SandwichError {
        match self.last_error.lock().clone() {
            Some((true, message)) => SandwichError::Auth(message),
            Some((false, message)) => SandwichError::Transport(message),
            None => SandwichError::Transport("shard stopped".to_string()),
        }
    }

    /// Store `s` if it is newer than what we have
    fn observe_sequence(&self, sequence: Option<u64>) {
        if let Some(sequence) = sequence {
            self.sequence.fetch_max(sequence, Ordering::AcqRel);
        }
    }

    /// Session id and sequence to resume with, if both are present
    fn resumable(&self) -> Option<(String, u64)> {
        let session = self.session.lock();
        let sequence = self.sequence();
        if session.is_empty() || sequence == 0 {
            None
        } else {
            Some((session.session_id.clone(), sequence))
        }
    }

    /// Drop session id and sequence together
    fn clear_session(&self) {
        let mut session = self.session.lock();
        session.session_id.clear();
        session.resume_url = None;
        self.sequence.store(0, Ordering::Release);
    }

    fn reset_retries(&self) {
        self.retries
            .store(self.config.identity.bot.retries, Ordering::Release);
    }

    fn floodgate(&self) -> bool {
        self.group.upgrade().is_some_and(|group| group.floodgate())
    }

    fn manager(&self) -> Option<Arc<Manager>> {
        self.group.upgrade().and_then(|group| group.manager())
    }

    fn publisher(&self) -> Option<Arc<dyn Publisher>> {
        self.manager().and_then(|manager| manager.publisher())
    }

    fn metadata(&self) -> SandwichMetadata {
        let application_id = self.manager().map_or(0, |m| m.application_id());
        SandwichMetadata::new(
            self.config.identity.producer_identifier(),
            self.config.identity.display_name(),
            application_id,
            [self.group_id(), self.shard_id(), self.shard_count()],
        )
    }

    /// Move to Ready if the barrier has passed
    fn poll_barrier(self: &Arc<Self>, now: Instant) {
        let passed = self.barrier.lock().poll(now);
        if passed && self.status() != ShardStatus::Ready {
            tracing::info!(
                identifier = %self.identifier(),
                shard_id = self.shard_id(),
                guilds = self.guilds.read().len(),
                unavailable = self.barrier.lock().pending().len(),
                "Shard ready"
            );
            self.set_status(ShardStatus::Ready);
            self.spawn_startup_chunking();
        }
    }
}

impl DispatchHooks for Shard {
    fn on_ready(&self, ready: &ReadyPayload) {
        {
            let mut session = self.session.lock();
            session.session_id.clone_from(&ready.session_id);
            session.resume_url =
                Some(ready.resume_gateway_url.clone()).filter(|url| !url.is_empty());
        }
        self.guilds.write().clear();
        self.barrier
            .lock()
            .on_ready(ready.guilds.iter().map(|g| g.id), Instant::now());
        self.reset_retries();

        if let Some(manager) = self.manager() {
            manager.on_ready(ready);
        }
        tracing::info!(
            identifier = %self.identifier(),
            shard_id = self.shard_id(),
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "Received READY"
        );
    }

    fn on_resumed(&self) {
        self.barrier.lock().on_resumed();
        self.reset_retries();
        tracing::info!(
            identifier = %self.identifier(),
            shard_id = self.shard_id(),
            sequence = self.sequence(),
            "Session resumed"
        );
    }

    fn on_guild_create(&self, guild_id: Snowflake) -> bool {
        self.guilds.write().insert(guild_id);
        self.barrier.lock().on_guild_create(guild_id, Instant::now())
    }

    fn on_guild_delete(&self, guild_id: Snowflake, unavailable: bool) {
        if unavailable {
            self.barrier.lock().on_guild_unavailable(guild_id);
        } else {
            self.guilds.write().remove(&guild_id);
        }
    }

    fn on_members_chunk(&self, nonce: Option<&str>, progress: ChunkProgress) {
        let Some(nonce) = nonce else {
            return;
        };
        if let Some(waiter) = self.chunks.get(nonce) {
            let _ = waiter.send(progress);
        }
    }

    fn on_self_update(&self, user: &User) {
        if let Some(manager) = self.manager() {
            manager.set_user(user.clone());
        }
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("identifier", &self.identifier())
            .field("group_id", &self.group_id())
            .field("shard_id", &self.shard_id())
            .field("shard_count", &self.shard_count())
            .field("status", &self.status())
            .field("sequence", &self.sequence())
            .finish()
    }
}
