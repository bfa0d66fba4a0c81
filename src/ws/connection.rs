//! One upstream streaming connection, configured for a single subscription
//! mode.
//!
//! Each connection runs as one long-lived task: a select loop over the
//! socket, the command channel from the feed manager, and its timers (ping,
//! data-request nudge, health check, buffer scavenge). Reconnection with
//! bounded exponential backoff is handled inside the task; every reconnect
//! starts a new *epoch*, and because the loop's timers and buffers live on
//! the epoch's stack frame, a reconnect structurally cancels all of them.
//!
//! State machine: `DISCONNECTED → CONNECTING → AUTHENTICATING →
//! AUTHENTICATED → READY`, with `RECONNECTING` re-entering at `CONNECTING`.
//! READY is reached on a fixed delay after the auth frame is sent — the
//! vendor does not always acknowledge auth explicitly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;

use crate::constants::{
    ACK_STATUS_RESUBSCRIBE, BUFFER_MAX_AGE, BUFFER_SCAVENGE_INTERVAL, CONNECT_TIMEOUT,
    PING_INTERVAL,
};
use crate::error::{FeedError, Result};
use crate::session::SessionProvider;
use crate::ws::decoder::{self, Frame, TextEnvelope};
use crate::ws::dispatcher::DispatchPool;
use crate::ws::frames::auth_frame;

// ---------------------------------------------------------------------------
// Mode & state
// ---------------------------------------------------------------------------

/// Which of the two upstream connections this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedMode {
    /// Mode-1 connection: LTP ticks.
    Ltp,
    /// Mode-3 connection: snap-quote ticks with depth.
    SnapQuote,
}

impl FeedMode {
    /// The mode byte used in subscribe frames and binary packets.
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Ltp => crate::constants::mode::LTP,
            Self::SnapQuote => crate::constants::mode::SNAP_QUOTE,
        }
    }

    /// Short label for logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::SnapQuote => "depth",
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Authenticating = 2,
    Authenticated = 3,
    Ready = 4,
    Reconnecting = 5,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Authenticated,
            4 => Self::Ready,
            5 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands, events, shared stats
// ---------------------------------------------------------------------------

/// Commands the feed manager sends to a connection.
#[derive(Debug, Clone)]
pub enum ConnCommand {
    /// Write a JSON frame to the socket now.
    Send(String),
    /// Replace the periodic market-data request frame.
    SetNudge(Option<String>),
}

/// Events a connection reports back to the feed manager.
#[derive(Debug)]
pub enum ConnEvent {
    /// The connection reached READY in the given epoch.
    Ready { mode: FeedMode, epoch: u64 },
    /// An acknowledgement frame arrived.
    Ack {
        mode: FeedMode,
        epoch: u64,
        ack: decoder::AckFrame,
    },
    /// The connection exhausted its reconnect budget or hit a fatal auth
    /// failure and has shut down.
    Unrecoverable { mode: FeedMode, error: FeedError },
}

/// Counters and state shared with the engine's health surface.
#[derive(Debug, Default)]
pub struct ConnStats {
    state: AtomicU8,
    epoch: AtomicU64,
    reconnects: AtomicU64,
    frames: AtomicU64,
    decode_errors: AtomicU64,
}

impl ConnStats {
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// Per-connection tunables, lifted from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub ws_url: String,
    pub reconnect_base: Duration,
    pub reconnect_multiplier: f64,
    pub reconnect_max_attempts: u32,
    pub stale_frame_timeout: Duration,
    pub stale_pong_timeout: Duration,
    pub data_request_interval: Duration,
    pub health_check_interval: Duration,
    pub post_auth_delay: Duration,
    pub auth_reject_limit: u32,
    pub auth_reject_window: Duration,
}

impl ConnConfig {
    /// Backoff delay before reconnect attempt `k` (1-based):
    /// `base × multiplier^(k-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.reconnect_multiplier.powi(attempt.saturating_sub(1) as i32);
        self.reconnect_base.mul_f64(factor)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// How an epoch ended.
enum EpochEnd {
    /// The command channel closed; the engine is shutting down.
    Stopped,
    /// Transient failure; reconnect after backoff.
    Reconnect { reason: String, reached_ready: bool },
    /// The vendor rejected authentication.
    AuthRejected { reason: String },
}

/// One upstream streaming connection.
pub struct Connection {
    mode: FeedMode,
    cfg: ConnConfig,
    session: Arc<dyn SessionProvider>,
    events: mpsc::Sender<ConnEvent>,
    pool: Arc<DispatchPool>,
    stats: Arc<ConnStats>,
}

impl Connection {
    pub fn new(
        mode: FeedMode,
        cfg: ConnConfig,
        session: Arc<dyn SessionProvider>,
        events: mpsc::Sender<ConnEvent>,
        pool: Arc<DispatchPool>,
        stats: Arc<ConnStats>,
    ) -> Self {
        Self {
            mode,
            cfg,
            session,
            events,
            pool,
            stats,
        }
    }

    /// Drive the connection until the command channel closes or the
    /// reconnect budget is exhausted.
    pub async fn run(self, mut cmd_rx: mpsc::Receiver<ConnCommand>) {
        let mut nudge: Option<String> = None;
        let mut attempts: u32 = 0;
        let mut rejects: VecDeque<Instant> = VecDeque::new();

        loop {
            match self.run_epoch(&mut cmd_rx, &mut nudge).await {
                EpochEnd::Stopped => {
                    tracing::info!(conn = self.mode.label(), "connection stopped");
                    self.stats.set_state(ConnState::Disconnected);
                    return;
                }
                EpochEnd::Reconnect {
                    reason,
                    reached_ready,
                } => {
                    if reached_ready {
                        attempts = 0;
                    }
                    attempts += 1;
                    if !self.enter_reconnect(attempts, &reason).await {
                        return;
                    }
                }
                EpochEnd::AuthRejected { reason } => {
                    let now = Instant::now();
                    rejects.push_back(now);
                    while rejects
                        .front()
                        .is_some_and(|t| now.duration_since(*t) > self.cfg.auth_reject_window)
                    {
                        rejects.pop_front();
                    }
                    if rejects.len() >= self.cfg.auth_reject_limit as usize {
                        tracing::error!(
                            conn = self.mode.label(),
                            rejections = rejects.len(),
                            "repeated authentication rejections"
                        );
                        self.stats.set_state(ConnState::Disconnected);
                        let _ = self
                            .events
                            .send(ConnEvent::Unrecoverable {
                                mode: self.mode,
                                error: FeedError::AuthRejected(reason),
                            })
                            .await;
                        return;
                    }
                    attempts += 1;
                    if !self.enter_reconnect(attempts, &reason).await {
                        return;
                    }
                }
            }
        }
    }

    /// Transition to RECONNECTING, advance the epoch, and sleep out the
    /// backoff. Returns `false` when the budget is spent and the connection
    /// is done.
    async fn enter_reconnect(&self, attempt: u32, reason: &str) -> bool {
        self.stats.set_state(ConnState::Reconnecting);
        self.stats.epoch.fetch_add(1, Ordering::Relaxed);
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);

        if attempt > self.cfg.reconnect_max_attempts {
            tracing::error!(
                conn = self.mode.label(),
                attempts = attempt - 1,
                reason,
                "reconnect attempts exhausted"
            );
            self.stats.set_state(ConnState::Disconnected);
            let _ = self
                .events
                .send(ConnEvent::Unrecoverable {
                    mode: self.mode,
                    error: FeedError::ReconnectExhausted {
                        attempts: attempt - 1,
                        last_error: reason.to_owned(),
                    },
                })
                .await;
            return false;
        }

        let delay = self.cfg.backoff_delay(attempt);
        tracing::warn!(
            conn = self.mode.label(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "scheduling reconnect"
        );
        sleep(delay).await;
        true
    }

    /// One epoch: dial, authenticate, then pump frames and timers until
    /// something ends it.
    async fn run_epoch(
        &self,
        cmd_rx: &mut mpsc::Receiver<ConnCommand>,
        nudge: &mut Option<String>,
    ) -> EpochEnd {
        let epoch = self.stats.epoch();
        self.stats.set_state(ConnState::Connecting);

        let session = match self.session.session().await {
            Ok(s) => s,
            Err(e) => {
                return EpochEnd::Reconnect {
                    reason: format!("session issue failed: {e}"),
                    reached_ready: false,
                }
            }
        };

        let request = match self.dial_request(&session) {
            Ok(r) => r,
            Err(e) => {
                return EpochEnd::Reconnect {
                    reason: format!("bad dial request: {e}"),
                    reached_ready: false,
                }
            }
        };

        let ws = match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
            Ok(Ok((ws, _resp))) => ws,
            Ok(Err(e)) => {
                return EpochEnd::Reconnect {
                    reason: format!("dial failed: {e}"),
                    reached_ready: false,
                }
            }
            Err(_) => {
                return EpochEnd::Reconnect {
                    reason: "connect timed out".into(),
                    reached_ready: false,
                }
            }
        };
        let (mut write, mut read) = ws.split();
        tracing::info!(conn = self.mode.label(), epoch, "socket opened");

        // Authenticate immediately; READY follows on a fixed delay.
        self.stats.set_state(ConnState::Authenticating);
        let auth = match auth_frame(&session.client_code, &session.jwt) {
            Ok(f) => f,
            Err(e) => {
                return EpochEnd::Reconnect {
                    reason: format!("auth frame: {e}"),
                    reached_ready: false,
                }
            }
        };
        if let Err(e) = write.send(Message::Text(auth.into())).await {
            return EpochEnd::Reconnect {
                reason: format!("auth send failed: {e}"),
                reached_ready: false,
            };
        }

        let ready_at = sleep(self.cfg.post_auth_delay);
        tokio::pin!(ready_at);
        let mut ready = false;

        let mut ping = interval(PING_INTERVAL);
        let mut nudge_timer = interval(self.cfg.data_request_interval);
        let mut health = interval(self.cfg.health_check_interval);
        let mut scavenge = interval(BUFFER_SCAVENGE_INTERVAL);
        for t in [&mut ping, &mut nudge_timer, &mut health, &mut scavenge] {
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t.reset();
        }

        let mut last_frame = Instant::now();
        let mut last_pong = Instant::now();
        let mut partial: Option<(Instant, Vec<u8>)> = None;

        loop {
            tokio::select! {
                _ = &mut ready_at, if !ready => {
                    ready = true;
                    self.stats.set_state(ConnState::Ready);
                    tracing::info!(conn = self.mode.label(), epoch, "connection ready");
                    let _ = self.events.send(ConnEvent::Ready { mode: self.mode, epoch }).await;
                }

                cmd = cmd_rx.recv() => match cmd {
                    None => return EpochEnd::Stopped,
                    Some(ConnCommand::Send(frame)) => {
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            return EpochEnd::Reconnect {
                                reason: format!("frame send failed: {e}"),
                                reached_ready: ready,
                            };
                        }
                    }
                    Some(ConnCommand::SetNudge(frame)) => *nudge = frame,
                },

                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        self.stats.frames.fetch_add(1, Ordering::Relaxed);
                        last_frame = Instant::now();
                        self.handle_binary(&data, epoch, &mut partial).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        last_frame = Instant::now();
                        match self.handle_text(&text, ready) {
                            TextOutcome::AuthOk => {
                                self.stats.set_state(ConnState::Authenticated);
                            }
                            TextOutcome::AuthRejected(reason) => {
                                return EpochEnd::AuthRejected { reason };
                            }
                            TextOutcome::Ignore => {}
                        }
                    }
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return EpochEnd::Reconnect {
                            reason: "socket closed".into(),
                            reached_ready: ready,
                        };
                    }
                    Some(Err(e)) => {
                        return EpochEnd::Reconnect {
                            reason: format!("read error: {e}"),
                            reached_ready: ready,
                        };
                    }
                    Some(Ok(_)) => {}
                },

                _ = ping.tick(), if ready => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        return EpochEnd::Reconnect {
                            reason: format!("ping failed: {e}"),
                            reached_ready: true,
                        };
                    }
                }

                _ = nudge_timer.tick(), if ready => {
                    if let Some(frame) = nudge.as_ref() {
                        if let Err(e) = write.send(Message::Text(frame.clone().into())).await {
                            return EpochEnd::Reconnect {
                                reason: format!("data request failed: {e}"),
                                reached_ready: true,
                            };
                        }
                    }
                }

                _ = health.tick(), if ready => {
                    let now = Instant::now();
                    if now.duration_since(last_frame) > self.cfg.stale_frame_timeout {
                        return EpochEnd::Reconnect {
                            reason: "no frames within health threshold".into(),
                            reached_ready: true,
                        };
                    }
                    if now.duration_since(last_pong) > self.cfg.stale_pong_timeout {
                        return EpochEnd::Reconnect {
                            reason: "no pong within health threshold".into(),
                            reached_ready: true,
                        };
                    }
                }

                _ = scavenge.tick() => {
                    if partial
                        .as_ref()
                        .is_some_and(|(at, _)| at.elapsed() > BUFFER_MAX_AGE)
                    {
                        tracing::debug!(conn = self.mode.label(), "discarding stale partial frame");
                        partial = None;
                    }
                }
            }
        }
    }

    /// Decode one binary payload, reassembling split packets.
    async fn handle_binary(
        &self,
        data: &[u8],
        epoch: u64,
        partial: &mut Option<(Instant, Vec<u8>)>,
    ) {
        let assembled;
        let frame: &[u8] = match partial.take() {
            Some((_, mut buf)) => {
                buf.extend_from_slice(data);
                assembled = buf;
                &assembled
            }
            None => data,
        };

        if let Some(min) = decoder::min_frame_len(frame) {
            if frame.len() < min {
                *partial = Some((Instant::now(), frame.to_vec()));
                return;
            }
        }

        match decoder::decode_frame(frame) {
            Ok(Frame::Tick(tick)) => {
                if tick.ltp().truncated {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        conn = self.mode.label(),
                        token = tick.token(),
                        "tick decoded with defaulted fields"
                    );
                }
                self.pool.route(tick);
            }
            Ok(Frame::Ack(ack)) => {
                if ack.status != 0 && ack.status != ACK_STATUS_RESUBSCRIBE {
                    tracing::warn!(
                        conn = self.mode.label(),
                        message_id = %ack.message_id,
                        status = ack.status,
                        "acknowledgement with error status"
                    );
                }
                let _ = self
                    .events
                    .send(ConnEvent::Ack {
                        mode: self.mode,
                        epoch,
                        ack,
                    })
                    .await;
            }
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(conn = self.mode.label(), error = %e, "discarding frame");
            }
        }
    }

    fn handle_text(&self, text: &str, ready: bool) -> TextOutcome {
        let Some(envelope) = TextEnvelope::parse(text) else {
            tracing::debug!(conn = self.mode.label(), text, "unstructured text frame");
            return TextOutcome::Ignore;
        };
        match envelope.success {
            Some(false) if !ready => TextOutcome::AuthRejected(
                envelope
                    .message
                    .or(envelope.error_code)
                    .unwrap_or_else(|| "authentication rejected".into()),
            ),
            Some(true) if !ready => TextOutcome::AuthOk,
            _ => {
                if let Some(message) = envelope.message {
                    tracing::debug!(conn = self.mode.label(), %message, "status envelope");
                }
                TextOutcome::Ignore
            }
        }
    }

    fn dial_request(
        &self,
        session: &crate::session::FeedSession,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self.cfg.ws_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        let header = |value: &str, what: &str| {
            HeaderValue::from_str(value)
                .map_err(|_| FeedError::Session(format!("{what} contains invalid header characters")))
        };
        headers.insert(AUTHORIZATION, header(&format!("Bearer {}", session.jwt), "jwt")?);
        headers.insert("x-api-key", header(&session.api_key, "api key")?);
        headers.insert("x-client-code", header(&session.client_code, "client code")?);
        headers.insert("x-feed-token", header(&session.feed_token, "feed token")?);
        Ok(request)
    }
}

enum TextOutcome {
    AuthOk,
    AuthRejected(String),
    Ignore,
}
