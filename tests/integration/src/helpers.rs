//! Test helpers for integration tests
//!
//! `TestDaemon` wires a complete sandwich against [`FakeDiscord`]: one
//! identity on the `websocket` driver, its shards connected and READY, and
//! the RPC surface served on a random port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response, StatusCode};
use sandwich_api::{create_app, AppState};
use sandwich_common::{ClusterConfig, IdentityConfig};
use sandwich_gateway::{WebsocketPublisher, DRIVER_NAME};
use sandwich_shard::rest::DiscordRest;
use sandwich_shard::{Manager, Publisher, Resources, Sandwich, Shard, ShardStatus};
use sandwich_state::StateStore;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::fake_discord::FakeDiscord;
use crate::fixtures::{IDENTIFIER, TOKEN};

/// How long the identity may take to reach READY
const START_TIMEOUT: Duration = Duration::from_secs(20);

pub struct TestDaemon {
    pub discord: FakeDiscord,
    pub sandwich: Arc<Sandwich>,
    pub manager: Arc<Manager>,
    /// Where consumers connect to the virtual gateway
    pub gateway_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    pub client: Client,
    _rpc: JoinHandle<()>,
}

impl TestDaemon {
    /// Start a daemon whose single shard receives `guilds`
    pub async fn start(guilds: Vec<Value>) -> Result<Self> {
        Self::with_discord(FakeDiscord::start(guilds).await?).await
    }

    /// Start a daemon against an already running fake
    pub async fn with_discord(discord: FakeDiscord) -> Result<Self> {
        let rest = DiscordRest::new(discord.api_base(), Duration::from_secs(5))?;
        let resources = Resources::new(
            StateStore::new_shared(),
            rest,
            64,
            ClusterConfig {
                node_count: 1,
                node_id: 0,
            },
        );
        // Hand the identity a publisher we keep, to learn the bound port
        let publisher = Arc::new(WebsocketPublisher::default());
        let shared = Arc::clone(&publisher);
        resources.drivers.register(DRIVER_NAME, move || {
            Arc::clone(&shared) as Arc<dyn Publisher>
        });
        let sandwich = Arc::new(Sandwich::new(Arc::new(resources)));

        let mut identity = IdentityConfig::new(IDENTIFIER, TOKEN);
        identity.sharding.auto_sharded = false;
        identity.sharding.shard_count = 1;
        identity.caching.store_mutuals = true;
        identity.messaging.driver = DRIVER_NAME.to_string();
        identity
            .messaging
            .options
            .insert("address".to_string(), "127.0.0.1:0".to_string());

        let manager = sandwich.add_identity(identity)?;
        tokio::time::timeout(START_TIMEOUT, manager.start())
            .await
            .context("identity did not become ready")??;
        let gateway_addr = publisher
            .local_addr()
            .await
            .ok_or_else(|| anyhow!("virtual gateway is not listening"))?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let rpc_addr = listener.local_addr()?;
        let app = create_app(AppState::new(Arc::clone(&sandwich)));
        let rpc = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            discord,
            sandwich,
            manager,
            gateway_addr,
            rpc_addr,
            client,
            _rpc: rpc,
        })
    }

    /// Get base URL for the RPC server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.rpc_addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.post(&url).json(body).send().await?)
    }

    /// Shard 0 of the live group
    pub fn shard(&self) -> Result<Arc<Shard>> {
        self.manager
            .live_group()
            .and_then(|group| group.shard(0))
            .ok_or_else(|| anyhow!("no live shard"))
    }

    /// Wait until shard 0 reports `status`
    pub async fn wait_for_shard(&self, status: ShardStatus) -> Result<()> {
        let mut rx = self.shard()?.subscribe_status();
        tokio::time::timeout(START_TIMEOUT, rx.wait_for(|current| *current == status))
            .await
            .with_context(|| format!("shard never became {status}"))??;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.sandwich.shutdown().await;
    }
}

/// Assert the status and return the body as JSON
pub async fn assert_json(response: Response, expected: StatusCode) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await?;
    anyhow::ensure!(
        status == expected,
        "expected status {expected}, got {status}: {body}"
    );
    Ok(body)
}
