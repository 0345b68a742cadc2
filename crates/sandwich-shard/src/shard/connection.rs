//! Connection loop
//!
//! `run` owns the reconnect policy. Each pass of `connect_once` dials the
//! gateway, waits for HELLO, identifies or resumes, and then reads frames
//! until the connection ends. Writes go through a single writer task; the
//! heartbeat task shares its queue but skips the rate limiter.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use rand::Rng;
use sandwich_common::{SandwichError, SandwichResult};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use super::{HeartbeatClock, Outbound, Shard};
use crate::codec::{FrameDecoder, MAX_MESSAGE_SIZE};
use crate::dispatch::{dispatch, DispatchRoute, Disposition, Trace};
use crate::identify::identify_domain;
use crate::protocol::{
    classify_close, heartbeat_command, CloseCode, GatewayEvent, HelloPayload, IdentifyPayload,
    OpCode, ReconnectAction, ResumePayload,
};
use crate::status::ShardStatus;

/// First event after connecting must arrive within this window
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code that keeps the Discord session resumable
pub const RESUMABLE_CLOSE: u16 = 4000;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Cancelled,
    /// Reconnect at once and resume
    Resume,
    InvalidSession { resumable: bool },
    /// Closed by the peer, with its close code if one was sent
    Closed(Option<u16>),
}

enum Frame {
    Event(GatewayEvent),
    Closed(Option<u16>),
}

enum Control {
    HeartbeatExpired,
}

impl Shard {
    pub(super) async fn run(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;

        let terminal = loop {
            if self.cancel.is_cancelled() {
                break ShardStatus::Closed;
            }
            self.set_status(if attempt == 0 {
                ShardStatus::Connecting
            } else {
                ShardStatus::Reconnecting
            });
            attempt += 1;

            let result = self.connect_once().await;
            *self.outbound.lock() = None;

            let delay = match result {
                Ok(Disconnect::Cancelled) | Err(SandwichError::Cancelled) => break ShardStatus::Closed,
                Ok(Disconnect::Resume) => None,
                Ok(Disconnect::InvalidSession { resumable }) => {
                    if !resumable {
                        self.clear_session();
                    }
                    tracing::info!(
                        shard_id = self.shard_id(),
                        resumable = resumable,
                        "Invalid session"
                    );
                    Some(Duration::from_millis(rand::thread_rng().gen_range(1000..=5000)))
                }
                Ok(Disconnect::Closed(code)) => match classify_close(code) {
                    ReconnectAction::Resume => {
                        tracing::info!(shard_id = self.shard_id(), close_code = ?code, "Connection closed, resuming");
                        None
                    }
                    ReconnectAction::Reidentify => {
                        self.clear_session();
                        let error = SandwichError::Transport(describe_close(code));
                        if !self.consume_retry(&error) {
                            break ShardStatus::Erroring;
                        }
                        Some(next_backoff(&mut backoff))
                    }
                    ReconnectAction::Fatal => {
                        self.record_error(&SandwichError::Auth(describe_close(code)));
                        break ShardStatus::Erroring;
                    }
                },
                Err(e) if e.is_fatal() => {
                    self.record_error(&e);
                    break ShardStatus::Erroring;
                }
                Err(e) => {
                    if !self.consume_retry(&e) {
                        break ShardStatus::Erroring;
                    }
                    Some(next_backoff(&mut backoff))
                }
            };

            match delay {
                Some(delay) => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break ShardStatus::Closed,
                        () = sleep(delay) => {}
                    }
                }
                None => backoff = INITIAL_BACKOFF,
            }
        };

        *self.heartbeat.lock() = None;
        if terminal == ShardStatus::Erroring {
            if let Some(group) = self.group.upgrade() {
                group.on_shard_error(self.shard_id(), &self.terminal_error());
            }
        }
        self.set_status(terminal);

        let reason = match terminal {
            ShardStatus::Erroring => {
                let reason = self.last_error().unwrap_or_default();
                tracing::error!(
                    identifier = %self.identifier(),
                    group_id = self.group_id(),
                    shard_id = self.shard_id(),
                    error = %reason,
                    "Shard stopped after an error"
                );
                reason
            }
            _ => terminal.as_str().to_string(),
        };
        if let Some(publisher) = self.publisher() {
            publisher
                .close_shard([self.shard_id(), self.shard_count()], &reason)
                .await;
        }
    }

    /// Returns `false` once retries are exhausted
    fn consume_retry(&self, error: &SandwichError) -> bool {
        self.record_error(error);
        let previous = self
            .retries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| Some(r.saturating_sub(1)))
            .unwrap_or(0);

        tracing::warn!(
            shard_id = self.shard_id(),
            error = %error,
            retries_remaining = previous.saturating_sub(1),
            "Shard connection failed"
        );
        previous > 1
    }

    fn endpoint(&self) -> String {
        let base = self
            .session
            .lock()
            .resume_url
            .clone()
            .unwrap_or_else(|| self.config.gateway_url.clone());

        if base.contains('?') {
            base
        } else {
            format!("{base}?v=10&encoding=json&compress=zlib-stream")
        }
    }

    async fn connect_once(self: &Arc<Self>) -> SandwichResult<Disconnect> {
        let url = self.endpoint();
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_SIZE);
        config.max_frame_size = Some(MAX_MESSAGE_SIZE);

        tracing::debug!(shard_id = self.shard_id(), url = %url, "Dialing gateway");
        let (socket, _) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(Disconnect::Cancelled),
            socket = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(config), false) => {
                socket.map_err(SandwichError::transport)?
            }
        };
        let (sink, mut stream) = socket.split();
        let mut decoder = FrameDecoder::new();

        let hello = tokio::select! {
            () = self.cancel.cancelled() => return Ok(Disconnect::Cancelled),
            frame = timeout(HELLO_TIMEOUT, read_frame(&mut stream, &mut decoder)) => {
                frame.map_err(|_| SandwichError::Protocol("no HELLO within 5 s".to_string()))??
            }
        };
        let hello: HelloPayload = match hello {
            Frame::Event(event) if event.opcode() == Some(OpCode::Hello) => event.data()?,
            Frame::Event(event) => {
                return Err(SandwichError::Protocol(format!(
                    "expected HELLO, got op {}",
                    event.op
                )))
            }
            Frame::Closed(code) => return Ok(Disconnect::Closed(code)),
        };
        if hello.heartbeat_interval == 0 {
            return Err(SandwichError::Protocol("heartbeat interval is zero".to_string()));
        }
        let interval = Duration::from_millis(hello.heartbeat_interval);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx.clone());
        let mut writer = tokio::spawn(write_loop(sink, rx));

        *self.heartbeat.lock() = Some(HeartbeatClock::new(interval, Instant::now()));
        self.barrier.lock().reset();

        let connection = self.cancel.child_token();
        let stop_heartbeat = connection.clone().drop_guard();
        let (control_tx, mut control_rx) = mpsc::channel(1);
        tokio::spawn(Arc::clone(self).heartbeat_loop(interval, tx, control_tx, connection));

        self.identify_or_resume().await?;
        self.set_status(ShardStatus::Connected);

        let disconnect = loop {
            let deadline = self.barrier.lock().deadline();

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    let _ = self.enqueue(Outbound::Close(self.close_code.load(Ordering::Acquire)));
                    break Disconnect::Cancelled;
                }
                () = wait_until(deadline) => self.poll_barrier(Instant::now()),
                Some(control) = control_rx.recv() => match control {
                    Control::HeartbeatExpired => {
                        tracing::warn!(shard_id = self.shard_id(), "Heartbeat not acknowledged, reconnecting");
                        let _ = self.enqueue(Outbound::Close(RESUMABLE_CLOSE));
                        break Disconnect::Resume;
                    }
                },
                frame = read_frame(&mut stream, &mut decoder) => match frame {
                    Ok(Frame::Event(event)) => {
                        if let Some(disconnect) = self.handle_event(event).await {
                            let _ = self.enqueue(Outbound::Close(RESUMABLE_CLOSE));
                            break disconnect;
                        }
                    }
                    Ok(Frame::Closed(code)) => break Disconnect::Closed(code),
                    Err(e) => {
                        tracing::warn!(shard_id = self.shard_id(), error = %e, "Read failed");
                        let _ = self.enqueue(Outbound::Close(RESUMABLE_CLOSE));
                        break Disconnect::Resume;
                    }
                },
            }
        };

        *self.outbound.lock() = None;
        drop(stop_heartbeat);
        if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        Ok(disconnect)
    }

    async fn identify_or_resume(&self) -> SandwichResult<()> {
        let identity = &self.config.identity;
        let token = identity.bare_token();

        if let Some((session_id, seq)) = self.resumable() {
            tracing::info!(shard_id = self.shard_id(), session_id = %session_id, sequence = seq, "Resuming");
            let resume = ResumePayload {
                token: token.to_string(),
                session_id,
                seq,
            };
            return self.send_event(OpCode::Resume, &resume).await;
        }

        self.resources
            .identify
            .acquire(
                &identify_domain(identity),
                self.shard_id(),
                self.config.max_concurrency,
                &self.cancel,
            )
            .await?;

        tracing::info!(
            identifier = %self.identifier(),
            shard_id = self.shard_id(),
            shard_count = self.shard_count(),
            "Identifying"
        );
        let identify = IdentifyPayload::new(
            token,
            self.shard_id(),
            self.shard_count(),
            identity.bot.intents.bits(),
        )
        .with_presence(identity.bot.default_presence.clone());
        self.send_event(OpCode::Identify, &identify).await
    }

    /// Returns the reason to drop the connection, if any
    async fn handle_event(self: &Arc<Self>, event: GatewayEvent) -> Option<Disconnect> {
        match event.opcode() {
            Some(OpCode::Dispatch) => {
                self.observe_sequence(event.s);
                let trace = Trace::start();
                let name = event.event_name().to_string();

                let route = DispatchRoute {
                    hooks: &**self,
                    state: &self.resources.state,
                    identity: &self.config.identity,
                    floodgate: self.floodgate(),
                    metadata: self.metadata(),
                    publisher: self.publisher(),
                };
                let disposition = dispatch(&self.resources.event_pool, route, event, trace).await;
                if disposition != Disposition::Published {
                    tracing::trace!(shard_id = self.shard_id(), event = %name, disposition = ?disposition, "Dispatch not published");
                }

                self.poll_barrier(Instant::now());
                None
            }
            Some(OpCode::Heartbeat) => {
                if self
                    .enqueue(Outbound::Text(heartbeat_command(self.sequence())))
                    .is_ok()
                {
                    if let Some(clock) = self.heartbeat.lock().as_mut() {
                        clock.sent(Instant::now());
                    }
                }
                None
            }
            Some(OpCode::HeartbeatAck) => {
                if let Some(clock) = self.heartbeat.lock().as_mut() {
                    clock.acked(Instant::now());
                    tracing::trace!(shard_id = self.shard_id(), latency = ?clock.latency, "Heartbeat acknowledged");
                }
                None
            }
            Some(OpCode::Reconnect) => {
                tracing::info!(shard_id = self.shard_id(), "Gateway requested reconnect");
                Some(Disconnect::Resume)
            }
            Some(OpCode::InvalidSession) => Some(Disconnect::InvalidSession {
                resumable: event.data::<bool>().unwrap_or(false),
            }),
            other => {
                tracing::debug!(shard_id = self.shard_id(), op = event.op, known = other.is_some(), "Ignoring op");
                None
            }
        }
    }

    async fn heartbeat_loop(
        self: Arc<Self>,
        interval: Duration,
        tx: mpsc::UnboundedSender<Outbound>,
        control: mpsc::Sender<Control>,
        cancel: CancellationToken,
    ) {
        let jitter = interval.mul_f64(rand::random::<f64>());
        let mut next = Instant::now() + jitter;
        tracing::debug!(
            shard_id = self.shard_id(),
            interval_ms = interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "Heartbeating"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep_until(next) => {}
            }
            let now = Instant::now();
            next = now + interval;

            let expired = self
                .heartbeat
                .lock()
                .as_ref()
                .is_some_and(|clock| clock.is_expired(now));
            if expired {
                let _ = control.send(Control::HeartbeatExpired).await;
                return;
            }

            if tx
                .send(Outbound::Text(heartbeat_command(self.sequence())))
                .is_err()
            {
                return;
            }
            if let Some(clock) = self.heartbeat.lock().as_mut() {
                clock.sent(now);
            }
        }
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "Write failed");
                    return;
                }
            }
            Outbound::Close(code) => {
                let frame = CloseFrame {
                    code: WsCloseCode::from(code),
                    reason: "".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
        }
    }
}

/// Read until one complete gateway message is decoded
async fn read_frame<S>(stream: &mut S, decoder: &mut FrameDecoder) -> SandwichResult<Frame>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let message = match stream.next().await {
            None => return Ok(Frame::Closed(None)),
            Some(Err(e)) => return Err(SandwichError::transport(e)),
            Some(Ok(message)) => message,
        };

        match message {
            Message::Binary(bytes) => {
                if let Some(event) = decoder.decode_binary(&bytes)? {
                    return Ok(Frame::Event(event));
                }
            }
            Message::Text(text) => return Ok(Frame::Event(decoder.decode_text(&text)?)),
            Message::Close(frame) => return Ok(Frame::Closed(frame.map(|f| u16::from(f.code)))),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn next_backoff(backoff: &mut Duration) -> Duration {
    let current = *backoff;
    *backoff = (*backoff * 2).min(MAX_BACKOFF);
    current
}

fn describe_close(code: Option<u16>) -> String {
    match code {
        Some(raw) => match CloseCode::from_u16(raw) {
            Some(known) => format!("closed with {raw}: {}", known.description()),
            None => format!("closed with {raw}"),
        },
        None => "connection dropped".to_string(),
    }
}
