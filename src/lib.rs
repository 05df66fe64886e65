//! ws-courier - Resilient WebSocket client library.
//!
//! This library provides a connection-and-authentication layer for
//! long-lived WebSocket sessions: a lifecycle state machine with
//! exponential-backoff reconnection, short-lived ticket credentials with
//! JWT fallback, outbound rate limiting with offline queueing, and
//! transparent chunked framing for large messages.
//!
//! # Architecture
//!
//! The client follows a handle-and-task model:
//!
//! - **[`WsClient`] (handle)**: Cheap, cloneable; sends commands over a channel
//! - **Connection task**: Owns the transport, the framer, the rate limiter,
//!   and the queue; emits typed [`ClientEvent`]s
//!
//! Key design principles:
//!
//! - One task per logical connection, no global state
//! - Credentials acquired per transport attempt ([`TicketAuthClient`]),
//!   never persisted
//! - Inbound frames validated once at the parse boundary ([`Frame`])
//! - Unintentional drops self-heal; terminal failures surface as
//!   non-recoverable error events
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use ws_courier::{ClientConfig, ClientEvent, Result, WsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::new("wss://api.example.com/ws")
//!         .with_token("jwt")
//!         .with_heartbeat(Duration::from_secs(30))
//!         .with_rate_limit(10, Duration::from_secs(1));
//!
//!     let (client, mut events) = WsClient::spawn(config, None)?;
//!     client.connect().await?;
//!
//!     client.send(serde_json::json!({"type": "subscribe", "channel": "ticks"}))?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Message(value) => println!("message: {value}"),
//!             ClientEvent::Closed => break,
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Ticket acquisition and caching |
//! | [`backoff`] | Exponential backoff with jitter |
//! | [`client`] | Client handle, connection task, event stream |
//! | [`config`] | Configuration surface and validation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`flow`] | Rate limiting and the offline queue |
//! | [`framer`] | Chunked message splitting and reassembly |
//! | [`protocol`] | Wire frame types (internal format) |

// ============================================================================
// Modules
// ============================================================================

/// Connection authentication.
///
/// Short-lived tickets from a backend issuer, with caching, single-flight
/// acquisition, and retry.
pub mod auth;

/// Exponential backoff with jitter.
pub mod backoff;

/// WebSocket client: handle, connection task, and event stream.
///
/// Use [`WsClient::spawn`] to create a client and its event receiver.
pub mod client;

/// Client configuration.
///
/// Construct with [`ClientConfig::new`] and the `with_*` builders.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Outbound flow control: rate limiter and offline queue.
pub mod flow;

/// Chunked message framing: splitting, reassembly, decompression.
pub mod framer;

/// Wire frame types.
///
/// Tagged unions for standard, lifecycle, and large-message frames.
pub mod protocol;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientEvent, ConnectionState, WsClient};

// Configuration types
pub use config::{ClientConfig, RateLimitConfig};

// Authentication types
pub use auth::{Ticket, TicketAuthClient};

// Error types
pub use error::{Error, ErrorCategory, ErrorEvent, Result};

// Framing types
pub use framer::AssemblyProgress;

// Protocol types
pub use protocol::{ChunkFrame, Frame, LifecycleFrame};
