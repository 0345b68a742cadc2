//! Fake Discord
//!
//! Serves `GET /gateway/bot` and a gateway endpoint that speaks the bot side
//! of the protocol over zlib-stream: HELLO, READY followed by one
//! GUILD_CREATE per configured guild, heartbeat ACKs, and RESUMED. Every
//! frame a shard sends is recorded. Tests script the connected shards
//! through [`Script`]: dispatches, raw ops such as RECONNECT or
//! INVALID_SESSION, close codes, and silenced heartbeat ACKs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use flate2::{Compress, Compression, FlushCompress};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::fixtures::{bot_user, APPLICATION_ID};

pub const HEARTBEAT_INTERVAL: u64 = 41_250;

/// Session id handed out in every READY
pub const SESSION_ID: &str = "fake-session";

/// How long `next_op` waits by default
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the fake does next on every open connection
#[derive(Debug, Clone)]
pub enum Script {
    Dispatch { event: String, data: Value },
    /// Send a frame as is, e.g. `{"op": 7}`
    Raw(Value),
    /// Close the connection with this code
    Close(u16),
    /// Stop acknowledging heartbeats on this connection
    MuteHeartbeats,
}

#[derive(Clone)]
struct FakeState {
    addr: SocketAddr,
    guilds: Arc<Vec<Value>>,
    heartbeat_interval: u64,
    received: mpsc::UnboundedSender<Value>,
    script: broadcast::Sender<Script>,
}

pub struct FakeDiscord {
    pub addr: SocketAddr,
    received: Mutex<mpsc::UnboundedReceiver<Value>>,
    script: broadcast::Sender<Script>,
    _handle: JoinHandle<()>,
}

impl FakeDiscord {
    /// Start the fake on a random port; `guilds` are sent after READY
    pub async fn start(guilds: Vec<Value>) -> Result<Self> {
        Self::start_with_heartbeat(guilds, HEARTBEAT_INTERVAL).await
    }

    /// Like [`FakeDiscord::start`], announcing `heartbeat_interval` ms in HELLO
    pub async fn start_with_heartbeat(guilds: Vec<Value>, heartbeat_interval: u64) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (script, _) = broadcast::channel(64);
        let state = FakeState {
            addr,
            guilds: Arc::new(guilds),
            heartbeat_interval,
            received: received_tx,
            script: script.clone(),
        };

        let app = Router::new()
            .route("/gateway/bot", get(gateway_bot))
            .route("/gateway", get(gateway))
            .with_state(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            received: Mutex::new(received_rx),
            script,
            _handle: handle,
        })
    }

    /// REST base handed to the daemon
    pub fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Send a dispatch to every connected shard
    pub fn dispatch(&self, event: &str, data: Value) -> Result<()> {
        self.run(Script::Dispatch {
            event: event.to_string(),
            data,
        })
    }

    /// Apply `script` to every connected shard
    pub fn run(&self, script: Script) -> Result<()> {
        self.script
            .send(script)
            .map_err(|_| anyhow!("no shard is connected"))?;
        Ok(())
    }

    /// Next frame sent by a shard with the given opcode
    pub async fn next_op(&self, op: u64) -> Result<Value> {
        self.next_op_within(op, RECEIVE_TIMEOUT).await
    }

    /// Like [`FakeDiscord::next_op`] with an explicit deadline
    pub async fn next_op_within(&self, op: u64, within: Duration) -> Result<Value> {
        self.next_where(within, |frame| frame["op"].as_u64() == Some(op))
            .await
            .map_err(|e| anyhow!("waiting for op {op}: {e}"))
    }

    /// Next IDENTIFY or RESUME, whichever a shard sends first
    pub async fn next_handshake(&self, within: Duration) -> Result<Value> {
        self.next_where(within, |frame| matches!(frame["op"].as_u64(), Some(2 | 6)))
            .await
    }

    async fn next_where(&self, within: Duration, predicate: impl Fn(&Value) -> bool) -> Result<Value> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(within, async {
            while let Some(frame) = received.recv().await {
                if predicate(&frame) {
                    return Ok(frame);
                }
            }
            Err(anyhow!("fake discord stopped"))
        })
        .await
        .map_err(|_| anyhow!("timed out"))?
    }
}

async fn gateway_bot(State(state): State<FakeState>) -> Json<Value> {
    Json(json!({
        "url": format!("ws://{}/gateway", state.addr),
        "shards": 1,
        "session_start_limit": {
            "total": 1000,
            "remaining": 1000,
            "reset_after": 0,
            "max_concurrency": 1
        }
    }))
}

async fn gateway(ws: WebSocketUpgrade, State(state): State<FakeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| shard_socket(socket, state))
}

/// One zlib context per connection, flushed after every frame
struct ZlibStream(Compress);

impl ZlibStream {
    fn new() -> Self {
        Self(Compress::new(Compression::default(), true))
    }

    fn frame(&mut self, value: &Value) -> Vec<u8> {
        let text = value.to_string();
        let mut out = Vec::with_capacity(text.len() * 2 + 64);
        self.0
            .compress_vec(text.as_bytes(), &mut out, FlushCompress::Sync)
            .expect("compress frame");
        out
    }
}

async fn shard_socket(socket: WebSocket, state: FakeState) {
    let (mut sink, mut stream) = socket.split();
    let mut zlib = ZlibStream::new();
    let mut script = state.script.subscribe();
    let mut seq = 0u64;
    let mut acking = true;

    let mut outgoing = vec![json!({"op": 10, "d": {"heartbeat_interval": state.heartbeat_interval}})];
    loop {
        for frame in outgoing.drain(..) {
            if sink.send(Message::Binary(zlib.frame(&frame))).await.is_err() {
                return;
            }
        }

        tokio::select! {
            message = stream.next() => {
                let Some(Ok(message)) = message else {
                    return;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let _ = state.received.send(frame.clone());

                match frame["op"].as_u64() {
                    Some(1) if acking => outgoing.push(json!({"op": 11})),
                    Some(2) => {
                        let shard = frame["d"]["shard"].clone();
                        let unavailable: Vec<Value> = state
                            .guilds
                            .iter()
                            .map(|guild| json!({"id": guild["id"], "unavailable": true}))
                            .collect();
                        seq = 1;
                        outgoing.push(dispatch(seq, "READY", json!({
                            "v": 10,
                            "user": bot_user(),
                            "session_id": SESSION_ID,
                            "resume_gateway_url": format!("ws://{}/gateway", state.addr),
                            "shard": shard,
                            "application": {"id": APPLICATION_ID, "flags": 0},
                            "guilds": unavailable
                        })));
                        for guild in state.guilds.iter() {
                            seq += 1;
                            outgoing.push(dispatch(seq, "GUILD_CREATE", guild.clone()));
                        }
                    }
                    Some(6) => {
                        // The session continues from the shard's sequence
                        seq = frame["d"]["seq"].as_u64().unwrap_or(0) + 1;
                        outgoing.push(dispatch(seq, "RESUMED", json!({})));
                    }
                    _ => {}
                }
            }
            Ok(next) = script.recv() => match next {
                Script::Dispatch { event, data } => {
                    seq += 1;
                    outgoing.push(dispatch(seq, &event, data));
                }
                Script::Raw(frame) => outgoing.push(frame),
                Script::Close(code) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    return;
                }
                Script::MuteHeartbeats => acking = false,
            },
        }
    }
}

fn dispatch(seq: u64, event: &str, data: Value) -> Value {
    json!({"op": 0, "s": seq, "t": event, "d": data})
}
