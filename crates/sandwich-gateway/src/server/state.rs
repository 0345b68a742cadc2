//! Gateway state
//!
//! Shared by every consumer connection of one identity's virtual gateway.

use std::sync::{Arc, Weak};

use sandwich_shard::Manager;
use sandwich_state::StateStore;
use tokio_util::sync::CancellationToken;

use crate::connection::Hub;

/// Settings read from the identity's messaging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Token consumers must present, without the `Bot ` prefix
    pub expected_token: String,
    /// Advertised in READY as `resume_gateway_url`
    pub resume_gateway_url: String,
}

#[derive(Clone)]
pub struct GatewayState {
    hub: Arc<Hub>,
    manager: Weak<Manager>,
    settings: Arc<GatewaySettings>,
    cancel: CancellationToken,
}

impl GatewayState {
    pub fn new(
        hub: Arc<Hub>,
        manager: Weak<Manager>,
        settings: GatewaySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hub,
            manager,
            settings: Arc::new(settings),
            cancel,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// `None` once the identity is gone
    pub fn manager(&self) -> Option<Arc<Manager>> {
        self.manager.upgrade()
    }

    pub fn state(&self) -> Option<Arc<StateStore>> {
        self.manager()
            .map(|manager| Arc::clone(&manager.resources().state))
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shard count handed to consumers that identify with a count of zero
    pub fn default_shard_count(&self) -> u32 {
        self.manager()
            .and_then(|manager| manager.live_group())
            .map_or(1, |group| group.shard_count().max(1))
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("sessions", &self.hub.len())
            .field("resume_gateway_url", &self.settings.resume_gateway_url)
            .finish_non_exhaustive()
    }
}
