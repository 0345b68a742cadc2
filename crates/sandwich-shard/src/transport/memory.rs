//! In-process publisher
//!
//! Broadcasts every payload to local subscribers. Used when consumers live
//! in the same process, and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Publisher, TransportError};
use crate::dispatch::CanonicalPayload;
use crate::manager::Manager;

pub const DEFAULT_MEMORY_CAPACITY: usize = 4096;

/// Messages seen by memory subscribers
#[derive(Debug, Clone)]
pub enum MemoryMessage {
    Payload {
        channel: String,
        payload: Arc<CanonicalPayload>,
    },
    ShardClosed {
        shard: [u32; 2],
        reason: String,
    },
}

pub struct MemoryPublisher {
    sender: broadcast::Sender<MemoryMessage>,
    closed: AtomicBool,
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryMessage> {
        self.sender.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(
        &self,
        _manager: Arc<Manager>,
        client_name: &str,
        _options: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        self.closed.store(false, Ordering::Release);
        tracing::debug!(client_name = client_name, "Memory publisher connected");
        Ok(())
    }

    async fn publish(
        &self,
        payload: Arc<CanonicalPayload>,
        channel_name: &str,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let _ = self.sender.send(MemoryMessage::Payload {
            channel: channel_name.to_string(),
            payload,
        });
        Ok(())
    }

    async fn close_shard(&self, shard: [u32; 2], reason: &str) {
        let _ = self.sender.send(MemoryMessage::ShardClosed {
            shard,
            reason: reason.to_string(),
        });
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
