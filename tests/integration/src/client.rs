//! Consumer-side client for the virtual gateway

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VirtualGatewayClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Payload of the HELLO received on connect
    pub hello: Value,
}

impl VirtualGatewayClient {
    /// Connect and read HELLO
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let (socket, _) = connect_async(format!("ws://{addr}")).await?;
        let mut client = Self {
            socket,
            hello: Value::Null,
        };
        let hello = client.next_json().await?;
        if hello["op"] != 10 {
            bail!("expected HELLO, got {hello}");
        }
        client.hello = hello;
        Ok(client)
    }

    pub async fn send_json(&mut self, value: Value) -> Result<()> {
        self.socket.send(Message::Text(value.to_string())).await?;
        Ok(())
    }

    pub async fn identify(&mut self, token: &str, shard: [u32; 2]) -> Result<()> {
        self.send_json(json!({
            "op": 2,
            "d": {"token": token, "shard": shard, "intents": 0}
        }))
        .await
    }

    pub async fn resume(&mut self, token: &str, session_id: &str, seq: u64) -> Result<()> {
        self.send_json(json!({
            "op": 6,
            "d": {"token": token, "session_id": session_id, "seq": seq}
        }))
        .await
    }

    pub async fn heartbeat(&mut self, seq: Option<u64>) -> Result<()> {
        self.send_json(json!({"op": 1, "d": seq})).await
    }

    /// Next text frame as JSON
    pub async fn next_json(&mut self) -> Result<Value> {
        let receive = async {
            loop {
                match self.socket.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                    Some(Ok(Message::Close(frame))) => bail!("closed: {frame:?}"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => bail!("connection ended"),
                }
            }
        };
        tokio::time::timeout(RECEIVE_TIMEOUT, receive)
            .await
            .map_err(|_| anyhow!("timed out waiting for a frame"))?
    }

    /// Skip frames until a dispatch named `event` arrives
    pub async fn next_dispatch(&mut self, event: &str) -> Result<Value> {
        loop {
            let frame = self.next_json().await?;
            if frame["op"] == 0 && frame["t"] == event {
                return Ok(frame);
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}
