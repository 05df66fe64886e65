//! Caller-facing client handle.
//!
//! [`WsClient`] is a cheap handle over the connection task: commands go
//! down a channel, events come back on the receiver returned by
//! [`WsClient::spawn`]. The handle is `Send + Sync` and can be cloned
//! across tasks; the connection task exits when every handle is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::auth::TicketAuthClient;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

use super::connection::{ClientCommand, ConnectionTask};
use super::{ClientEvent, ConnectionState};

// ============================================================================
// WsClient
// ============================================================================

/// Handle to one logical WebSocket connection.
///
/// Construct with [`WsClient::spawn`], which also returns the event
/// receiver. Dependencies (the ticket client) are injected explicitly so
/// independent connections never share state.
pub struct WsClient {
    /// Channel to the connection task.
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    /// Connection state mirror, written by the task.
    state: Arc<AtomicU8>,
}

impl Clone for WsClient {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl WsClient {
    /// Spawns the connection task and returns the handle plus the event
    /// stream.
    ///
    /// The task idles until [`connect`](Self::connect) is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or ticket
    /// auth is enabled without a ticket client.
    pub fn spawn(
        config: ClientConfig,
        ticket_client: Option<Arc<TicketAuthClient>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        config.validate()?;

        if config.uses_ticket_auth() && ticket_client.is_none() {
            return Err(Error::config(
                "ticket auth enabled but no ticket client provided",
            ));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected.as_u8()));

        let task = ConnectionTask::new(config, ticket_client, event_tx, Arc::clone(&state));
        tokio::spawn(task.run(command_rx));

        Ok((Self { command_tx, state }, event_rx))
    }

    /// Connects to the configured endpoint.
    ///
    /// Acquires a credential (ticket, or token fallback), opens the
    /// transport, and on success flushes any queued messages. Recoverable
    /// failures are retried with backoff; the future resolves when the
    /// connection is established or retries are exhausted.
    ///
    /// A call while already connected or within the minimum attempt
    /// interval is rejected.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if an attempt is already in flight or the
    ///   call is throttled
    /// - [`Error::ReconnectExhausted`] when the retry budget is spent
    /// - [`Error::AuthExhausted`] / [`Error::TicketUnavailable`] on
    ///   terminal auth failures
    pub async fn connect(&self) -> Result<()> {
        let (ack, result) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::Connect { ack })
            .map_err(|_| Error::ConnectionClosed)?;
        result.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Sends a JSON payload.
    ///
    /// While connected the payload goes through the rate limiter and the
    /// framer (chunked if large). While disconnected or over budget it is
    /// queued and flushed on (re)connect; a full queue drops the message
    /// with an [`ClientEvent::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection task has
    /// exited.
    pub fn send(&self, payload: Value) -> Result<()> {
        self.command_tx
            .send(ClientCommand::Send { payload })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Disconnects intentionally.
    ///
    /// Cancels pending reconnect timers, clears queued messages and
    /// partial assemblies, and closes the transport. The close handler
    /// sees the intent and does not schedule a reconnect. The task stays
    /// alive; a later [`connect`](Self::connect) starts a fresh session.
    pub fn disconnect(&self) {
        debug!("Disconnect requested");
        let _ = self.command_tx.send(ClientCommand::Disconnect);
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` if the transport is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
