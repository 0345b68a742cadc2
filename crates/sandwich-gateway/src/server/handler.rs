//! WebSocket handler
//!
//! One task per consumer connection: HELLO, identify or resume, then the
//! session queue is written out until the connection ends.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use flate2::read::ZlibDecoder;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sandwich_shard::protocol::{GatewayEvent, OpCode};
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::connection::{Queued, Session};
use crate::error::GatewayError;
use crate::hydrate::hydrate;
use crate::protocol::{
    bare_token, heartbeat_ack, hello, invalid_session, DispatchFrame, IdentifyRequest,
    ResumeRequest, HEARTBEAT_INTERVAL_MS, INVALID_SESSION_CLOSE, INVALID_SESSION_REASON,
};
use crate::server::GatewayState;

/// Time a consumer has to identify or resume after HELLO
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Silence tolerated from a consumer, one and a half heartbeat intervals
const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);

/// Frames read ahead from a consumer, and commands waiting to go upstream
const CLIENT_BUFFER: usize = 64;

/// Largest frame a consumer may send, after inflating
const MAX_CLIENT_FRAME: usize = 64 * 1024;

type Sink = SplitSink<WebSocket, Message>;

/// Frame read from the consumer
enum ClientFrame {
    Event(GatewayEvent),
    Malformed(String),
}

enum Handshake {
    Ready(Arc<Session>),
    /// Consumer left before identifying
    Gone,
}

/// WebSocket gateway handler
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_CLIENT_FRAME)
        .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: GatewayState, socket: WebSocket) {
    let (mut sink, stream) = socket.split();

    if sink.send(Message::Text(hello())).await.is_err() {
        tracing::debug!("Consumer left before HELLO");
        return;
    }

    let (tx, mut rx) = mpsc::channel(CLIENT_BUFFER);
    let reader = tokio::spawn(read_loop(stream, tx));

    let session = match handshake(&state, &mut sink, &mut rx).await {
        Ok(Handshake::Ready(session)) => session,
        Ok(Handshake::Gone) => {
            reader.abort();
            return;
        }
        Err(e) => {
            tracing::debug!(error = %e, "Consumer handshake failed");
            close_with(&mut sink, &e).await;
            reader.abort();
            return;
        }
    };

    tracing::info!(
        session_id = %session.id(),
        shard = ?session.shard(),
        "Consumer connected"
    );

    let result = serve(&state, &session, &mut sink, &mut rx).await;

    if let Err(e) = &result {
        if !e.is_resumable() {
            state.hub().forget(session.id());
        }
    }
    session.detach();

    match result {
        Ok(()) => {
            tracing::info!(session_id = %session.id(), "Consumer disconnected");
            let _ = sink.close().await;
        }
        Err(e) => {
            tracing::info!(
                session_id = %session.id(),
                error = %e,
                resumable = e.is_resumable(),
                "Closing consumer"
            );
            close_with(&mut sink, &e).await;
        }
    }
    reader.abort();
}

/// Tell the consumer whether it may resume, then close with 4000
async fn close_with(sink: &mut Sink, error: &GatewayError) {
    let _ = sink
        .send(Message::Text(invalid_session(error.is_resumable())))
        .await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: INVALID_SESSION_CLOSE,
            reason: INVALID_SESSION_REASON.into(),
        })))
        .await;
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, tx: mpsc::Sender<ClientFrame>) {
    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => decode(text.as_bytes()),
            Ok(Message::Binary(bytes)) => match inflate(&bytes) {
                Ok(inflated) => decode(&inflated),
                Err(e) => ClientFrame::Malformed(e.to_string()),
            },
            Ok(Message::Close(_)) => break,
            // Pong is handled automatically by axum
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Consumer socket error");
                break;
            }
        };
        if tx.send(frame).await.is_err() {
            break;
        }
    }
}

fn decode(bytes: &[u8]) -> ClientFrame {
    match GatewayEvent::from_slice(bytes) {
        Ok(event) => ClientFrame::Event(event),
        Err(e) => ClientFrame::Malformed(e.to_string()),
    }
}

/// Binary frames carry one zlib-compressed JSON message each
fn inflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut inflated = Vec::with_capacity(bytes.len() * 4);
    ZlibDecoder::new(bytes)
        .take(MAX_CLIENT_FRAME as u64 + 1)
        .read_to_end(&mut inflated)?;
    if inflated.len() > MAX_CLIENT_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "inflated frame too large",
        ));
    }
    Ok(inflated)
}

async fn handshake(
    state: &GatewayState,
    sink: &mut Sink,
    rx: &mut mpsc::Receiver<ClientFrame>,
) -> Result<Handshake, GatewayError> {
    let deadline = Instant::now() + IDENTIFY_TIMEOUT;

    loop {
        let frame = tokio::select! {
            () = state.cancel().cancelled() => return Err(GatewayError::Shutdown),
            () = sleep_until(deadline) => return Err(GatewayError::IdentifyTimeout),
            frame = rx.recv() => frame,
        };

        let event = match frame {
            None => return Ok(Handshake::Gone),
            Some(ClientFrame::Malformed(reason)) => return Err(GatewayError::InvalidPayload(reason)),
            Some(ClientFrame::Event(event)) => event,
        };

        match event.opcode() {
            Some(OpCode::Heartbeat) => {
                if sink.send(Message::Text(heartbeat_ack(None))).await.is_err() {
                    return Ok(Handshake::Gone);
                }
            }
            Some(OpCode::Identify) => {
                return identify(state, &event.data::<IdentifyRequest>()?).map(Handshake::Ready);
            }
            Some(OpCode::Resume) => {
                return resume(state, &event.data::<ResumeRequest>()?).map(Handshake::Ready);
            }
            _ => tracing::debug!(op = event.op, "Ignoring frame before identify"),
        }
    }
}

fn authorize(state: &GatewayState, token: &str) -> Result<(), GatewayError> {
    if bare_token(token) == state.settings().expected_token {
        Ok(())
    } else {
        Err(GatewayError::AuthenticationFailed)
    }
}

fn identify(state: &GatewayState, request: &IdentifyRequest) -> Result<Arc<Session>, GatewayError> {
    authorize(state, &request.token)?;

    let [shard_id, requested_count] = request.shard;
    let shard_count = if requested_count == 0 {
        state.default_shard_count()
    } else {
        requested_count
    };
    if shard_id >= shard_count {
        return Err(GatewayError::InvalidShard {
            shard_id,
            shard_count,
        });
    }

    let session = state.hub().create([shard_id, shard_count]);
    session.attach();
    if let Err(e) = hydrate(state, &session) {
        state.hub().forget(session.id());
        session.detach();
        return Err(e);
    }
    Ok(session)
}

fn resume(state: &GatewayState, request: &ResumeRequest) -> Result<Arc<Session>, GatewayError> {
    authorize(state, &request.token)?;

    let session = state
        .hub()
        .get(&request.session_id)
        .filter(|session| !session.is_overflowed())
        .ok_or_else(|| GatewayError::UnknownSession(request.session_id.clone()))?;
    if !session.attach() {
        return Err(GatewayError::SessionInUse(request.session_id.clone()));
    }

    session.prepare_resume(request.seq);
    let d = RawValue::from_string("{}".to_string())?;
    if let Err(e) = session.push(&DispatchFrame::synthetic("RESUMED", &d)) {
        state.hub().forget(session.id());
        session.detach();
        return Err(e);
    }

    tracing::debug!(
        session_id = %session.id(),
        seq = ?request.seq,
        "Consumer resumed"
    );
    Ok(session)
}

/// Write queued dispatches and answer the consumer until either side ends
async fn serve(
    state: &GatewayState,
    session: &Session,
    sink: &mut Sink,
    rx: &mut mpsc::Receiver<ClientFrame>,
) -> Result<(), GatewayError> {
    let upstream = spawn_forwarder(state, session.shard_id());
    let mut last_seq = None;
    let mut heartbeat_deadline = Instant::now() + HEARTBEAT_TIMEOUT;

    loop {
        let mut pending = session.drain().into_iter();
        while let Some(queued) = pending.next() {
            match queued {
                Queued::Dispatch { seq, text } => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        session.restore(pending.collect());
                        return Ok(());
                    }
                    last_seq = Some(seq);
                }
                Queued::Kick { reason } => {
                    session.restore(pending.collect());
                    return Err(GatewayError::ShardClosed(reason));
                }
            }
        }
        if session.is_overflowed() {
            return Err(GatewayError::Overflow);
        }

        let frame = tokio::select! {
            () = state.cancel().cancelled() => return Err(GatewayError::Shutdown),
            () = session.notified() => continue,
            () = sleep_until(heartbeat_deadline) => return Err(GatewayError::HeartbeatTimeout),
            frame = rx.recv() => frame,
        };
        heartbeat_deadline = Instant::now() + HEARTBEAT_TIMEOUT;

        let event = match frame {
            None => return Ok(()),
            Some(ClientFrame::Malformed(reason)) => return Err(GatewayError::InvalidPayload(reason)),
            Some(ClientFrame::Event(event)) => event,
        };

        match event.opcode() {
            Some(OpCode::Heartbeat) => {
                if sink.send(Message::Text(heartbeat_ack(last_seq))).await.is_err() {
                    return Ok(());
                }
            }
            Some(OpCode::Identify | OpCode::Resume) => {
                tracing::debug!(session_id = %session.id(), "Ignoring repeated handshake");
            }
            _ => {
                if let Some(upstream) = &upstream {
                    if upstream.try_send(event).is_err() {
                        tracing::warn!(
                            session_id = %session.id(),
                            "Upstream command buffer full, dropping command"
                        );
                    }
                }
            }
        }
    }
}

/// Per-connection task sending consumer commands to the upstream shard in order
///
/// Ends when the connection drops its sender.
fn spawn_forwarder(state: &GatewayState, shard_id: u32) -> Option<mpsc::Sender<GatewayEvent>> {
    let manager = state.manager()?;
    let (tx, mut rx) = mpsc::channel::<GatewayEvent>(CLIENT_BUFFER);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let data: &RawValue = match serde_json::from_str(event.raw_data()) {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(op = event.op, error = %e, "Unreadable consumer command");
                    continue;
                }
            };
            if let Err(e) = manager.send_event(None, shard_id, event.op, data).await {
                tracing::warn!(
                    shard_id = shard_id,
                    op = event.op,
                    error = %e,
                    "Failed to forward consumer command"
                );
            }
        }
    });

    Some(tx)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;

    #[test]
    fn test_decode_text_frame() {
        match decode(br#"{"op":1,"d":null}"#) {
            ClientFrame::Event(event) => assert_eq!(event.opcode(), Some(OpCode::Heartbeat)),
            ClientFrame::Malformed(reason) => panic!("unexpected {reason}"),
        }
        assert!(matches!(decode(b"not json"), ClientFrame::Malformed(_)));
    }

    #[test]
    fn test_inflate_binary_frame() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"op":1,"d":7}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let inflated = inflate(&compressed).unwrap();
        assert_eq!(inflated, br#"{"op":1,"d":7}"#);
        assert!(inflate(b"plain text").is_err());
    }

    #[test]
    fn test_inflate_rejects_oversized_frames() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&vec![b' '; MAX_CLIENT_FRAME + 1]).unwrap();
        let compressed = encoder.finish().unwrap();

        assert!(inflate(&compressed).is_err());
    }
}
