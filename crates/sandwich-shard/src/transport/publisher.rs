//! Publisher contract

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::TransportError;
use crate::dispatch::CanonicalPayload;
use crate::manager::Manager;

/// A messaging driver fed by one identity
///
/// Publishing is at-least-once; drivers serialize the payload themselves.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Driver name, as used in the identity configuration
    fn name(&self) -> &'static str;

    /// Called once before the first publish
    ///
    /// `options` keys arrive lowercased; unknown keys are ignored.
    async fn connect(
        &self,
        manager: Arc<Manager>,
        client_name: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Deliver one payload on `channel_name` (already suffixed with the shard id)
    async fn publish(
        &self,
        payload: Arc<CanonicalPayload>,
        channel_name: &str,
    ) -> Result<(), TransportError>;

    /// Hint that the upstream shard `[shard_id, shard_count]` closed
    async fn close_shard(&self, shard: [u32; 2], reason: &str);

    async fn close(&self);
}

/// Routing key for one shard
pub fn shard_channel(channel_name: &str, shard_id: u32) -> String {
    format!("{channel_name}.{shard_id}")
}
