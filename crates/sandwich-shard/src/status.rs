//! Lifecycle states and the process-wide status feed
//!
//! Every shard, group and identity status change is pushed to a bounded
//! broadcast channel as a synthetic dispatch (`SW_SHARD_STATUS_UPDATE`,
//! `SW_GROUP_STATUS_UPDATE`, `SW_APPLICATION_STATUS_UPDATE`). Slow
//! subscribers lag and skip entries.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the status broadcast channel
pub const STATUS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Ready,
    Reconnecting,
    Closing,
    Closed,
    Erroring,
}

impl ShardStatus {
    /// States `open()` stops waiting on
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Closed | Self::Erroring)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Erroring)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Erroring => "erroring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    MarkedForClosure,
    Closing,
    Closed,
    Erroring,
}

impl GroupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::MarkedForClosure => "marked_for_closure",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Erroring => "erroring",
        }
    }
}

/// Status of one identity ("application")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    #[default]
    Idle,
    Failed,
    Starting,
    Connecting,
    Connected,
    Ready,
    Stopping,
    Stopped,
}

impl ManagerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Failed => "failed",
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the identity currently holds running groups
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Connecting | Self::Connected | Self::Ready
        )
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(ShardStatus, GroupStatus, ManagerStatus);

pub const SHARD_STATUS_EVENT: &str = "SW_SHARD_STATUS_UPDATE";
pub const GROUP_STATUS_EVENT: &str = "SW_GROUP_STATUS_UPDATE";
pub const APPLICATION_STATUS_EVENT: &str = "SW_APPLICATION_STATUS_UPDATE";

/// One entry of the status feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusEvent {
    Shard {
        identifier: String,
        group_id: u32,
        shard_id: u32,
        status: ShardStatus,
    },
    Group {
        identifier: String,
        group_id: u32,
        status: GroupStatus,
    },
    Application {
        identifier: String,
        status: ManagerStatus,
    },
}

impl StatusEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Shard { .. } => SHARD_STATUS_EVENT,
            Self::Group { .. } => GROUP_STATUS_EVENT,
            Self::Application { .. } => APPLICATION_STATUS_EVENT,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Shard { identifier, .. }
            | Self::Group { identifier, .. }
            | Self::Application { identifier, .. } => identifier,
        }
    }

    /// Render as a gateway dispatch `{op:0, t, d}`
    pub fn to_dispatch(&self) -> serde_json::Value {
        serde_json::json!({
            "op": 0,
            "t": self.event_name(),
            "d": self,
        })
    }
}

/// Fan-out of status changes to any number of listeners
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(STATUS_CHANNEL_CAPACITY)
    }
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        tracing::info!(
            event = event.event_name(),
            payload = %event.to_dispatch()["d"],
            "Status update"
        );
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn shard(&self, identifier: &str, group_id: u32, shard_id: u32, status: ShardStatus) {
        self.publish(StatusEvent::Shard {
            identifier: identifier.to_string(),
            group_id,
            shard_id,
            status,
        });
    }

    pub fn group(&self, identifier: &str, group_id: u32, status: GroupStatus) {
        self.publish(StatusEvent::Group {
            identifier: identifier.to_string(),
            group_id,
            status,
        });
    }

    pub fn application(&self, identifier: &str, status: ManagerStatus) {
        self.publish(StatusEvent::Application {
            identifier: identifier.to_string(),
            status,
        });
    }
}
