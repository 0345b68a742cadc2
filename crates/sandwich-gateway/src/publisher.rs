//! `websocket` messaging driver
//!
//! Binds the virtual gateway on the identity's `address` option when the
//! identity starts, and routes every canonical payload into the hub.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandwich_shard::dispatch::CanonicalPayload;
use sandwich_shard::transport::{DriverRegistry, Publisher, TransportError};
use sandwich_shard::Manager;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::Hub;
use crate::protocol::{bare_token, DispatchFrame};
use crate::server::{create_app, GatewaySettings, GatewayState};

pub const DRIVER_NAME: &str = "websocket";

/// How long `close` waits for the server task to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Running {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

pub struct WebsocketPublisher {
    hub: Arc<Hub>,
    server: Mutex<Option<Running>>,
}

impl Default for WebsocketPublisher {
    fn default() -> Self {
        Self::new(Arc::new(Hub::default()))
    }
}

impl WebsocketPublisher {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            server: Mutex::new(None),
        }
    }

    /// Make the driver available to identities as `websocket`
    pub fn register(registry: &DriverRegistry) {
        registry.register(DRIVER_NAME, || {
            Arc::new(WebsocketPublisher::default()) as Arc<dyn Publisher>
        });
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Address the server is bound to, once connected
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|running| running.local_addr)
    }
}

fn option<'a>(options: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl Publisher for WebsocketPublisher {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    async fn connect(
        &self,
        manager: Arc<Manager>,
        client_name: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Ok(());
        }

        let address = option(options, "address").ok_or_else(|| TransportError::InvalidOption {
            key: "address".to_string(),
            value: String::new(),
        })?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::Connect(format!("Failed to bind to {address}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let expected_token = option(options, "expectedtoken")
            .unwrap_or_else(|| manager.identity().token.as_str());
        let settings = GatewaySettings {
            expected_token: bare_token(expected_token).to_string(),
            resume_gateway_url: option(options, "publicurl")
                .map_or_else(|| format!("ws://{local_addr}"), str::to_string),
        };

        let cancel = CancellationToken::new();
        let state = GatewayState::new(
            Arc::clone(&self.hub),
            Arc::downgrade(&manager),
            settings,
            cancel.clone(),
        );
        let app = create_app(state);

        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Virtual gateway server failed");
            }
        });

        tracing::info!(
            client_name = client_name,
            identifier = %manager.identifier(),
            "Virtual gateway listening on ws://{}",
            local_addr
        );

        *server = Some(Running {
            cancel,
            local_addr,
            task,
        });
        Ok(())
    }

    async fn publish(
        &self,
        payload: Arc<CanonicalPayload>,
        _channel_name: &str,
    ) -> Result<(), TransportError> {
        let shard = [payload.metadata.shard_id(), payload.metadata.shard_count()];
        self.hub.route(shard, &DispatchFrame::from_payload(&payload));
        Ok(())
    }

    async fn close_shard(&self, shard: [u32; 2], reason: &str) {
        let kicked = self.hub.kick_shard(shard, reason);
        if kicked > 0 {
            tracing::info!(
                shard = ?shard,
                consumers = kicked,
                reason = reason,
                "Closing consumers of shard"
            );
        }
    }

    async fn close(&self) {
        let Some(running) = self.server.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, running.task).await.is_err() {
            tracing::warn!("Virtual gateway did not stop in time");
        }
        self.hub.clear();
        tracing::info!(address = %running.local_addr, "Virtual gateway closed");
    }
}
