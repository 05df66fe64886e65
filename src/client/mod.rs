//! WebSocket client: connection lifecycle, reconnection, and the typed
//! event stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────────┐   WebSocket
//! │   WsClient   │────────────►│  ConnectionTask  │◄─────────────► server
//! │   (handle)   │             │  (state machine) │
//! └──────────────┘             └────────┬─────────┘
//!        ▲                              │ events
//!        └── caller ◄───────────────────┘
//! ```
//!
//! The handle sends commands over a channel to a spawned connection task
//! that owns the transport, the framer, the rate limiter, and the queue.
//! Everything the caller observes arrives as a typed [`ClientEvent`] on
//! the event receiver returned by [`WsClient::spawn`] — there are no
//! callback registrations and no global state.
//!
//! # Connection Lifecycle
//!
//! ```text
//! disconnected --connect()--> connecting --open--> connected
//!      ▲                          │                    │
//!      │                          │ error/close        │ close/error
//!      │        give up           ▼                    ▼
//!      └─────────────────── reconnecting ◄─────────(unintentional)
//!                                 │ timer
//!                                 └──────────► connecting
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Caller-facing [`WsClient`] handle |
//! | `connection` | Connection task, state machine, reconnect policy |

// ============================================================================
// Submodules
// ============================================================================

/// Caller-facing client handle.
pub mod core;

/// Connection task and state machine.
pub mod connection;

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::ErrorEvent;
use crate::framer::AssemblyProgress;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::WsClient;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of one logical connection.
///
/// Exactly one instance per connection, owned by the connection task and
/// mirrored into an atomic for the handle to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport, no pending attempt.
    Disconnected = 0,
    /// Connection attempt in flight.
    Connecting = 1,
    /// Transport open.
    Connected = 2,
    /// Waiting out a reconnect delay.
    Reconnecting = 3,
}

impl ConnectionState {
    /// Converts from the atomic representation.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    /// Converts to the atomic representation.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the transport is open.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

// ============================================================================
// ClientEvent
// ============================================================================

/// Typed event delivered to the caller.
///
/// Lifecycle frames (`ping`, `pong`, heartbeats, `server_shutdown`) are
/// consumed internally and never appear here.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Transport opened for the first time on this `connect()`.
    Open,

    /// Transport reopened after an unintentional drop.
    Reconnected,

    /// Application message (standard frame, or a reassembled chunked
    /// message delivered through the same path).
    Message(Value),

    /// Binary transport frame.
    Binary(Vec<u8>),

    /// An error occurred; `recoverable` distinguishes self-healing errors
    /// from those requiring explicit caller action.
    Error(ErrorEvent),

    /// A send was deferred by the rate limiter.
    RateLimited,

    /// Progress of an in-flight large message.
    LargeMessageProgress(AssemblyProgress),

    /// Transport closed.
    Closed,
}

// ============================================================================
// Tests
// ============================================================================
