//! Connection task: state machine, reconnect policy, and the transport
//! event loop.
//!
//! One spawned task owns the transport, the framer, the rate limiter, and
//! the queue. Commands arrive over a channel from the [`WsClient`] handle;
//! everything observable leaves as a [`ClientEvent`].
//!
//! # Reconnect Policy
//!
//! On an unintentional close the first retry is immediate, then delays
//! grow exponentially with jitter up to a cap, abandoned after a maximum
//! attempt count. Auth-failure closes (code 1008, or a reason naming the
//! ticket) clear the ticket cache and use a fixed cooldown instead, capped
//! at a smaller retry budget; exceeding it is non-recoverable and no
//! further timer is scheduled.
//!
//! [`WsClient`]: super::WsClient

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant as TokioInstant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::auth::TicketAuthClient;
use crate::backoff::ExponentialBackoff;
use crate::config::ClientConfig;
use crate::error::{Error, ErrorEvent, Result};
use crate::flow::{MessageQueue, RateLimiter};
use crate::framer::{Ingest, MessageFramer};
use crate::protocol::frame::{Frame, LifecycleFrame};

use super::{ClientEvent, ConnectionState};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for a single transport handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code for policy violations, used by servers rejecting credentials.
const CLOSE_CODE_POLICY: u16 = 1008;

/// How often queued messages are re-offered to the rate limiter.
const QUEUE_FLUSH_PERIOD: Duration = Duration::from_millis(250);

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Commands from the client handle.
pub(crate) enum ClientCommand {
    /// Establish the connection; the ack resolves with the outcome.
    Connect {
        ack: oneshot::Sender<Result<()>>,
    },
    /// Send a payload (queued while disconnected or over budget).
    Send { payload: Value },
    /// Intentional disconnect; suppresses auto-reconnect.
    Disconnect,
}

/// Why a connected session ended.
enum SessionEnd {
    /// Every client handle was dropped; the task should exit.
    ChannelClosed,
    /// `disconnect()` was called; do not reconnect.
    Intentional,
    /// Transport dropped; `auth` marks a credential-rejection close.
    Dropped { auth: bool },
}

/// Outcome of the reconnect loop.
enum ReconnectOutcome {
    /// A new transport is open.
    Connected(Box<WsStream>),
    /// Retries exhausted or terminal failure; the error is unreported.
    GaveUp(Error),
    /// `disconnect()` arrived while waiting.
    Intentional,
    /// Every client handle was dropped.
    ChannelClosed,
}

/// Outcome of an interruptible delay.
enum Wait {
    Elapsed,
    Disconnected,
    ChannelClosed,
}

// ============================================================================
// ConnectionTask
// ============================================================================

/// Owns one logical connection's lifecycle.
pub(crate) struct ConnectionTask {
    config: ClientConfig,
    ticket_client: Option<Arc<TicketAuthClient>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<AtomicU8>,
    framer: MessageFramer,
    limiter: Option<RateLimiter>,
    queue: MessageQueue,
    backoff: ExponentialBackoff,
    /// Consecutive auth-failure closes; reset on a non-auth session end.
    auth_failures: u32,
    /// Time of the most recent transport attempt (storm throttling).
    last_attempt: Option<Instant>,
}

impl ConnectionTask {
    /// Creates the task state. Call [`run`](Self::run) on a spawned task.
    pub(crate) fn new(
        config: ClientConfig,
        ticket_client: Option<Arc<TicketAuthClient>>,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
        state: Arc<AtomicU8>,
    ) -> Self {
        let framer = MessageFramer::new(
            config.chunk_size,
            config.assembly_max_age,
            config.compression.clone(),
        );
        let limiter = config
            .rate_limit
            .map(|limit| RateLimiter::new(limit.messages, limit.window));
        let queue = MessageQueue::new(config.queue_capacity);
        let backoff = ExponentialBackoff::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.reconnect_jitter,
            true,
        );

        Self {
            config,
            ticket_client,
            event_tx,
            state,
            framer,
            limiter,
            queue,
            backoff,
            auth_failures: 0,
            last_attempt: None,
        }
    }

    // ========================================================================
    // Top-Level Loop
    // ========================================================================

    /// Runs until every client handle is dropped.
    pub(crate) async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ClientCommand>) {
        loop {
            // Idle: disconnected, waiting for a command.
            let Some(command) = command_rx.recv().await else {
                debug!("Command channel closed, connection task exiting");
                return;
            };

            match command {
                ClientCommand::Send { payload } => self.queue_offline(payload),

                ClientCommand::Disconnect => {
                    trace!("Disconnect while already disconnected");
                }

                ClientCommand::Connect { ack } => {
                    if let Err(error) = self.check_attempt_allowed() {
                        warn!(%error, "Connection attempt rejected");
                        let _ = ack.send(Err(error));
                        continue;
                    }

                    self.auth_failures = 0;
                    self.backoff.reset();

                    match self.establish().await {
                        Ok(ws) => {
                            // State flips before the ack resolves so the
                            // caller observes `Connected` immediately.
                            self.set_state(ConnectionState::Connected);
                            let _ = ack.send(Ok(()));
                            if !self.drive(ws, false, &mut command_rx).await {
                                return;
                            }
                        }
                        Err(error) if error.is_recoverable() => {
                            self.emit_error(&error);
                            match self.reconnect_loop(false, &mut command_rx).await {
                                ReconnectOutcome::Connected(ws) => {
                                    self.set_state(ConnectionState::Connected);
                                    let _ = ack.send(Ok(()));
                                    // First open of this connect(), not a reconnect.
                                    if !self.drive(*ws, false, &mut command_rx).await {
                                        return;
                                    }
                                }
                                ReconnectOutcome::GaveUp(terminal) => {
                                    self.emit_error(&terminal);
                                    self.set_state(ConnectionState::Disconnected);
                                    let _ = ack.send(Err(terminal));
                                }
                                ReconnectOutcome::Intentional => {
                                    let _ = ack.send(Err(Error::ConnectionClosed));
                                }
                                ReconnectOutcome::ChannelClosed => return,
                            }
                        }
                        Err(error) => {
                            self.set_state(ConnectionState::Disconnected);
                            let _ = ack.send(Err(error));
                        }
                    }
                }
            }
        }
    }

    /// Runs sessions and reconnects until an intentional disconnect or a
    /// terminal failure. Returns `false` when the command channel closed.
    async fn drive(
        &mut self,
        ws: WsStream,
        reconnected: bool,
        command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> bool {
        let mut ws = ws;
        let mut reconnected = reconnected;

        loop {
            match self.session(ws, reconnected, command_rx).await {
                SessionEnd::ChannelClosed => return false,
                SessionEnd::Intentional => return true,
                SessionEnd::Dropped { auth } => {
                    self.emit(ClientEvent::Closed);
                    if !auth {
                        self.auth_failures = 0;
                    }

                    match self.reconnect_loop(auth, command_rx).await {
                        ReconnectOutcome::Connected(next) => {
                            ws = *next;
                            reconnected = true;
                        }
                        ReconnectOutcome::GaveUp(terminal) => {
                            self.emit_error(&terminal);
                            self.set_state(ConnectionState::Disconnected);
                            return true;
                        }
                        ReconnectOutcome::Intentional => return true,
                        ReconnectOutcome::ChannelClosed => return false,
                    }
                }
            }
        }
    }

    // ========================================================================
    // Connected Session
    // ========================================================================

    /// Runs one connected session until the transport drops or the caller
    /// disconnects.
    async fn session(
        &mut self,
        ws: WsStream,
        reconnected: bool,
        command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> SessionEnd {
        let (mut sink, mut source) = ws.split();

        self.set_state(ConnectionState::Connected);
        self.backoff.reset();
        self.emit(if reconnected {
            ClientEvent::Reconnected
        } else {
            ClientEvent::Open
        });

        // Queued messages go out first, in FIFO order, in bounded batches.
        if let Err(error) = self.drain_queue(&mut sink).await {
            warn!(%error, "Queue flush failed");
            self.emit_error(&error);
        }

        let heartbeat_period = self
            .config
            .heartbeat_interval
            .unwrap_or(Duration::from_secs(3600));
        let mut heartbeat = tokio::time::interval_at(
            TokioInstant::now() + heartbeat_period,
            heartbeat_period,
        );

        let purge_period = self
            .config
            .assembly_max_age
            .max(Duration::from_millis(100))
            .min(Duration::from_secs(10));
        let mut purge =
            tokio::time::interval_at(TokioInstant::now() + purge_period, purge_period);

        let mut flush = tokio::time::interval_at(
            TokioInstant::now() + QUEUE_FLUSH_PERIOD,
            QUEUE_FLUSH_PERIOD,
        );

        loop {
            tokio::select! {
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(text.as_str(), &mut sink).await;
                    }

                    Some(Ok(Message::Binary(data))) => {
                        self.emit(ClientEvent::Binary(data.to_vec()));
                    }

                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            warn!(error = %e, "Failed to send pong");
                        }
                    }

                    Some(Ok(Message::Close(frame))) => {
                        let auth = frame.as_ref().is_some_and(Self::is_auth_close);
                        debug!(?frame, auth, "Server closed connection");
                        self.set_state(ConnectionState::Disconnected);
                        return SessionEnd::Dropped { auth };
                    }

                    Some(Ok(_)) => {}

                    Some(Err(e)) => {
                        error!(error = %e, "Transport error");
                        self.emit_error(&Error::from(e));
                        self.set_state(ConnectionState::Disconnected);
                        return SessionEnd::Dropped { auth: false };
                    }

                    None => {
                        debug!("Transport stream ended");
                        self.set_state(ConnectionState::Disconnected);
                        return SessionEnd::Dropped { auth: false };
                    }
                },

                command = command_rx.recv() => match command {
                    Some(ClientCommand::Send { payload }) => {
                        if let Err(error) = self.handle_send(payload, &mut sink).await {
                            self.emit_error(&error);
                        }
                    }

                    Some(ClientCommand::Connect { ack }) => {
                        warn!("connect() while already connected, ignoring");
                        let _ = ack.send(Err(Error::connection("already connected")));
                    }

                    Some(ClientCommand::Disconnect) => {
                        debug!("Intentional disconnect");
                        let _ = sink.close().await;
                        self.clear_pending();
                        self.set_state(ConnectionState::Disconnected);
                        self.emit(ClientEvent::Closed);
                        return SessionEnd::Intentional;
                    }

                    None => return SessionEnd::ChannelClosed,
                },

                _ = heartbeat.tick(), if self.config.heartbeat_interval.is_some() => {
                    self.send_lifecycle(LifecycleFrame::Ping, &mut sink).await;
                }

                _ = purge.tick() => {
                    let purged = self.framer.purge_stale();
                    if purged > 0 {
                        debug!(purged, "Purged stale assemblies");
                    }
                }

                // Rate-limited sends leave the queue once the window clears.
                _ = flush.tick(), if !self.queue.is_empty() => {
                    if let Err(error) = self.drain_queue(&mut sink).await {
                        self.emit_error(&error);
                    }
                }
            }
        }
    }

    /// Handles one inbound text frame.
    ///
    /// Parse errors are reported and the connection continues.
    async fn handle_text(&mut self, text: &str, sink: &mut WsSink) {
        match Frame::parse(text) {
            Ok(Frame::Standard(value)) => self.emit(ClientEvent::Message(value)),

            Ok(Frame::Lifecycle(lifecycle)) => match lifecycle {
                LifecycleFrame::Ping => {
                    self.send_lifecycle(LifecycleFrame::Pong, sink).await;
                }
                LifecycleFrame::Heartbeat => {
                    self.send_lifecycle(LifecycleFrame::HeartbeatAck, sink).await;
                }
                LifecycleFrame::Pong | LifecycleFrame::HeartbeatAck => {
                    trace!(?lifecycle, "Liveness ack received");
                }
                LifecycleFrame::ServerShutdown => {
                    info!("Server announced shutdown");
                }
            },

            Ok(Frame::Chunk(chunk)) => {
                let message_id = chunk.message_id().to_string();
                match self.framer.ingest(chunk) {
                    Ok(Ingest::Accepted) => {}
                    Ok(Ingest::Progress(progress)) => {
                        self.emit(ClientEvent::LargeMessageProgress(progress));
                    }
                    Ok(Ingest::Complete(value)) => self.emit(ClientEvent::Message(value)),
                    Err(error) => {
                        warn!(message_id, %error, "Chunk frame rejected");
                        self.emit_error(&error);
                    }
                }
            }

            Err(error) => {
                warn!(%error, "Dropping malformed frame");
                self.emit_error(&error);
            }
        }
    }

    /// Sends a lifecycle frame, logging failures.
    async fn send_lifecycle(&self, lifecycle: LifecycleFrame, sink: &mut WsSink) {
        if let Ok(text) = Frame::Lifecycle(lifecycle).to_text()
            && let Err(e) = sink.send(Message::Text(text.into())).await
        {
            warn!(error = %e, ?lifecycle, "Failed to send lifecycle frame");
        }
    }

    /// Handles an outbound send while connected.
    async fn handle_send(&mut self, payload: Value, sink: &mut WsSink) -> Result<()> {
        if let Some(limiter) = &mut self.limiter
            && !limiter.try_acquire()
        {
            trace!("Send over budget, queueing");
            self.emit(ClientEvent::RateLimited);
            if !self.queue.push(payload) {
                return Err(Error::QueueFull {
                    capacity: self.config.queue_capacity,
                });
            }
            return Ok(());
        }

        self.transmit(&payload, sink).await?;

        // A successful send check also drains whatever the budget allows.
        self.drain_queue(sink).await
    }

    /// Sends queued messages while the budget allows, in bounded batches
    /// with a yield between batches.
    async fn drain_queue(&mut self, sink: &mut WsSink) -> Result<()> {
        let mut sent = 0usize;

        while !self.queue.is_empty() {
            if let Some(limiter) = &mut self.limiter
                && !limiter.try_acquire()
            {
                break;
            }
            let Some(payload) = self.queue.pop() else { break };

            self.transmit(&payload, sink).await?;
            sent += 1;

            if sent.is_multiple_of(self.config.flush_batch_size) {
                tokio::task::yield_now().await;
            }
        }

        if sent > 0 {
            debug!(sent, remaining = self.queue.len(), "Drained queued messages");
        }
        Ok(())
    }

    /// Serializes a payload (chunked if large) and writes it out.
    async fn transmit(&mut self, payload: &Value, sink: &mut WsSink) -> Result<()> {
        for text in self.framer.split(payload)?.into_frames() {
            sink.send(Message::Text(text.into())).await?;
        }
        Ok(())
    }

    /// Queues a payload while no transport is available.
    fn queue_offline(&mut self, payload: Value) {
        trace!("Queueing message while disconnected");
        if !self.queue.push(payload) {
            self.emit_error(&Error::QueueFull {
                capacity: self.config.queue_capacity,
            });
        }
    }

    // ========================================================================
    // Connection Establishment
    // ========================================================================

    /// Rejects attempts while one is in flight or inside the minimum
    /// attempt interval.
    fn check_attempt_allowed(&self) -> Result<()> {
        let state = self.current_state();
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Err(Error::connection("connection attempt already in flight"));
        }

        if let Some(last) = self.last_attempt
            && last.elapsed() < self.config.min_connect_interval
        {
            return Err(Error::connection("connection attempt throttled"));
        }

        Ok(())
    }

    /// Acquires a credential and opens the transport.
    async fn establish(&mut self) -> Result<WsStream> {
        self.last_attempt = Some(Instant::now());
        self.set_state(ConnectionState::Connecting);

        let url = self.credentialed_url().await?;
        debug!(host = ?url.host_str(), "Opening transport");

        let (ws, _response) = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(CONNECT_TIMEOUT.as_millis() as u64))??;

        info!("WebSocket connection established");
        Ok(ws)
    }

    /// Builds the endpoint URL with the transport credential appended:
    /// a ticket when issuance succeeds, the JWT token otherwise.
    async fn credentialed_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| Error::config(format!("invalid URL {:?}: {e}", self.config.url)))?;

        if self.config.uses_ticket_auth()
            && let Some(ticket_client) = &self.ticket_client
        {
            match ticket_client
                .acquire_ticket(self.config.ticket_ttl_secs)
                .await
            {
                Ok(ticket) => {
                    if let Some(issuer_url) = &ticket.websocket_url {
                        url = Url::parse(issuer_url).map_err(|e| {
                            Error::protocol(format!("issuer returned invalid URL: {e}"))
                        })?;
                    }
                    url.query_pairs_mut().append_pair("ticket", &ticket.value);
                    return Ok(url);
                }
                Err(error @ Error::TicketUnavailable { .. }) if self.config.token.is_some() => {
                    warn!(%error, "Ticket issuance unavailable, falling back to token auth");
                }
                Err(error) => return Err(error),
            }
        }

        match &self.config.token {
            Some(token) => {
                url.query_pairs_mut().append_pair("token", token);
                Ok(url)
            }
            None => Err(Error::auth_failed("no credential available")),
        }
    }

    // ========================================================================
    // Reconnection
    // ========================================================================

    /// Retries the connection until it opens, the budget is spent, or the
    /// caller intervenes. The terminal error in `GaveUp` has not been
    /// emitted yet.
    async fn reconnect_loop(
        &mut self,
        auth_close: bool,
        command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> ReconnectOutcome {
        if auth_close {
            if let Some(ticket_client) = &self.ticket_client {
                ticket_client.clear_cache();
            }
            self.auth_failures += 1;
            if self.auth_failures > self.config.max_auth_retries {
                warn!(
                    failures = self.auth_failures,
                    cap = self.config.max_auth_retries,
                    "Auth retries exhausted, not reconnecting"
                );
                return ReconnectOutcome::GaveUp(Error::AuthExhausted {
                    attempts: self.auth_failures,
                });
            }
        }

        self.set_state(ConnectionState::Reconnecting);
        let mut use_cooldown = auth_close;

        loop {
            if self.backoff.attempt() >= self.config.max_reconnect_attempts {
                return ReconnectOutcome::GaveUp(Error::ReconnectExhausted {
                    attempts: self.backoff.attempt(),
                });
            }

            let delay = if use_cooldown {
                self.config.auth_retry_cooldown
            } else {
                self.backoff.next_delay()
            };
            use_cooldown = false;

            debug!(?delay, attempt = self.backoff.attempt(), "Scheduling reconnect");

            match self.wait_interruptible(delay, command_rx).await {
                Wait::Elapsed => {}
                Wait::Disconnected => return ReconnectOutcome::Intentional,
                Wait::ChannelClosed => return ReconnectOutcome::ChannelClosed,
            }

            match self.establish().await {
                Ok(ws) => return ReconnectOutcome::Connected(Box::new(ws)),
                Err(error) => {
                    if !error.is_recoverable() {
                        return ReconnectOutcome::GaveUp(error);
                    }
                    self.emit_error(&error);
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
        }
    }

    /// Sleeps for `delay` while staying responsive to commands.
    async fn wait_interruptible(
        &mut self,
        delay: Duration,
        command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> Wait {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return Wait::Elapsed,

                command = command_rx.recv() => match command {
                    Some(ClientCommand::Send { payload }) => self.queue_offline(payload),

                    Some(ClientCommand::Connect { ack }) => {
                        warn!("connect() while reconnect in progress, ignoring");
                        let _ = ack.send(Err(Error::connection(
                            "reconnect already in progress",
                        )));
                    }

                    Some(ClientCommand::Disconnect) => {
                        debug!("Disconnect during reconnect wait");
                        self.clear_pending();
                        self.set_state(ConnectionState::Disconnected);
                        return Wait::Disconnected;
                    }

                    None => return Wait::ChannelClosed,
                },
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Returns `true` for closes that signal a rejected credential.
    fn is_auth_close(frame: &CloseFrame) -> bool {
        if u16::from(frame.code) == CLOSE_CODE_POLICY {
            return true;
        }
        let reason = frame.reason.to_lowercase();
        reason.contains("ticket") || reason.contains("auth") || reason.contains("unauthorized")
    }

    /// Drops queued messages and partial assemblies.
    fn clear_pending(&mut self) {
        self.queue.clear();
        self.framer.clear();
    }

    fn current_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.swap(state.as_u8(), Ordering::SeqCst);
        if previous != state.as_u8() {
            debug!(from = ?ConnectionState::from_u8(previous), to = ?state, "State transition");
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_error(&self, error: &Error) {
        let _ = self.event_tx.send(ClientEvent::Error(ErrorEvent::from_error(error)));
    }
}

// ============================================================================
// Tests
// ============================================================================
