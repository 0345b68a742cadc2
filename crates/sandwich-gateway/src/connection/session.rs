//! Consumer session
//!
//! A session outlives its WebSocket: dispatches keep queueing while the
//! consumer is away so a resume can pick them up. The queue holds dispatches
//! not yet written to a socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::GatewayError;
use crate::protocol::DispatchFrame;

/// Queued dispatches per session before the consumer is dropped
pub const SESSION_QUEUE_LIMIT: usize = 100_000;

/// Entry waiting for the connection writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Queued {
    Dispatch { seq: u64, text: String },
    /// Upstream shard closed; end the connection so the consumer resumes
    Kick { reason: String },
}

#[derive(Debug, Default)]
struct SessionInner {
    queue: VecDeque<Queued>,
    next_seq: u64,
    detached_at: Option<Instant>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    /// `[shard_id, shard_count]`
    shard: [u32; 2],
    limit: usize,
    inner: Mutex<SessionInner>,
    attached: AtomicBool,
    /// Set once hydration is queued; routing skips the session until then
    live: AtomicBool,
    overflowed: AtomicBool,
    notify: Notify,
}

impl Session {
    pub fn new(id: String, shard: [u32; 2], limit: usize) -> Self {
        Self {
            id,
            shard,
            limit: limit.max(1),
            inner: Mutex::new(SessionInner {
                detached_at: Some(Instant::now()),
                ..SessionInner::default()
            }),
            attached: AtomicBool::new(false),
            live: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shard(&self) -> [u32; 2] {
        self.shard
    }

    pub fn shard_id(&self) -> u32 {
        self.shard[0]
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn go_live(&self) {
        self.live.store(true, Ordering::Release);
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence the next dispatch will carry
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// Claim the session for a connection; fails if one already holds it
    pub fn attach(&self) -> bool {
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.inner.lock().detached_at = None;
        true
    }

    pub fn detach(&self) {
        self.inner.lock().detached_at = Some(Instant::now());
        self.attached.store(false, Ordering::Release);
    }

    /// Detached for longer than `ttl`
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        !self.is_attached()
            && self
                .inner
                .lock()
                .detached_at
                .is_some_and(|at| now.saturating_duration_since(at) >= ttl)
    }

    /// Queue a dispatch under the next sequence
    ///
    /// Sequence assignment and queueing happen under one lock so the
    /// consumer always sees increasing sequences.
    pub fn push(&self, frame: &DispatchFrame<'_>) -> Result<u64, GatewayError> {
        if self.is_overflowed() {
            return Err(GatewayError::Overflow);
        }

        let mut inner = self.inner.lock();
        if inner.queue.len() >= self.limit {
            inner.queue.clear();
            drop(inner);
            self.overflowed.store(true, Ordering::Release);
            self.notify.notify_one();
            return Err(GatewayError::Overflow);
        }

        let seq = inner.next_seq;
        let text = frame.to_json(seq)?;
        inner.next_seq += 1;
        inner.queue.push_back(Queued::Dispatch { seq, text });
        drop(inner);
        self.notify.notify_one();
        Ok(seq)
    }

    /// Ask the attached connection to end; ignored while detached
    pub fn kick(&self, reason: &str) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.inner.lock().queue.push_back(Queued::Kick {
            reason: reason.to_string(),
        });
        self.notify.notify_one();
        true
    }

    /// Everything queued so far
    pub fn drain(&self) -> Vec<Queued> {
        self.inner.lock().queue.drain(..).collect()
    }

    /// Put back entries a connection drained but did not write
    pub fn restore(&self, entries: Vec<Queued>) {
        if entries.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for entry in entries.into_iter().rev() {
            inner.queue.push_front(entry);
        }
    }

    /// Drop dispatches the consumer already has, and kicks meant for an
    /// earlier connection
    pub fn prepare_resume(&self, seq: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.queue.retain(|queued| match queued {
            Queued::Dispatch { seq: queued_seq, .. } => seq.is_none_or(|seen| *queued_seq > seen),
            Queued::Kick { .. } => false,
        });
    }

    /// Wait until something is queued
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
