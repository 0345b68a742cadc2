//! Dispatch pipeline
//!
//! Per `op=0` event: event blacklist, state mutation, floodgate, produce
//! blacklist, canonical payload, publish. The state step runs inline on the
//! caller; only the publish is spawned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sandwich_common::IdentityConfig;
use sandwich_state::{StateStore, StoreOptions};
use serde_json::value::RawValue;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::handlers::{handler_for, DispatchContext, DispatchHooks, HandlerOutcome};
use super::payload::{rewrite_discriminators, CanonicalPayload, SandwichMetadata, Trace};
use crate::protocol::GatewayEvent;
use crate::transport::{shard_channel, Publisher};

/// Process-wide cap on concurrently running dispatches
#[derive(Debug)]
pub struct EventPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
    waiting: AtomicUsize,
}

impl EventPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Wait for a slot; `None` once the pool is shut down
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Some(permit);
        }

        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        permit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Events queued behind the cap
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Everything the pipeline needs to know about the receiving shard
pub struct DispatchRoute<'a> {
    pub hooks: &'a dyn DispatchHooks,
    pub state: &'a StateStore,
    pub identity: &'a IdentityConfig,
    /// Group floodgate at the time the event was received
    pub floodgate: bool,
    pub metadata: SandwichMetadata,
    pub publisher: Option<Arc<dyn Publisher>>,
}

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Dropped by the event blacklist
    Blacklisted,
    /// The handler failed; the event was dropped
    Failed,
    /// State applied, floodgate closed
    Held,
    /// State applied, not published (produce blacklist, no passthrough, no publisher)
    Suppressed,
    /// Handed to the publisher
    Published,
}

/// Run one dispatch through the pipeline
pub async fn dispatch(
    pool: &EventPool,
    route: DispatchRoute<'_>,
    event: GatewayEvent,
    mut trace: Trace,
) -> Disposition {
    let name = event.event_name().to_string();

    if route.identity.is_event_blacklisted(&name) {
        tracing::trace!(event = %name, "Event blacklisted");
        return Disposition::Blacklisted;
    }

    let Some(permit) = pool.acquire().await else {
        return Disposition::Failed;
    };

    let handler = handler_for(&name);
    let outcome = match handler {
        Some(handler) => {
            let ctx = DispatchContext {
                hooks: route.hooks,
                state: route.state,
                opts: StoreOptions::from(&route.identity.caching),
            };
            match handler(&ctx, &event) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        event = %name,
                        error = %e,
                        data = event.raw_data(),
                        "Dispatch handler failed"
                    );
                    return Disposition::Failed;
                }
            }
        }
        None => HandlerOutcome::default(),
    };
    trace.mark("state");

    if !route.floodgate {
        return Disposition::Held;
    }
    if route.identity.is_produce_blacklisted(&name)
        || (handler.is_none() && !route.identity.events.allow_passthrough)
    {
        return Disposition::Suppressed;
    }
    let Some(publisher) = route.publisher else {
        return Disposition::Suppressed;
    };

    let HandlerOutcome { extra, data } = outcome;
    let d = match (data, event.d) {
        (Some(rewritten), _) => rewritten,
        (None, Some(raw)) => rewrite_discriminators(&raw).unwrap_or(raw),
        (None, None) => RawValue::NULL.to_owned(),
    };

    let channel = shard_channel(
        &route.identity.messaging.channel_name,
        route.metadata.shard_id(),
    );
    let mut payload = CanonicalPayload {
        op: event.op,
        d,
        s: event.s,
        t: event.t,
        extra: extra.into_map(),
        metadata: route.metadata,
        trace,
    };
    payload.trace.mark("publish");
    let payload = Arc::new(payload);

    tokio::spawn(async move {
        let _permit = permit;
        if let Err(e) = publisher.publish(Arc::clone(&payload), &channel).await {
            tracing::warn!(
                event = payload.event_name(),
                channel = %channel,
                error = %e,
                "Publish failed"
            );
        }
    });

    Disposition::Published
}
