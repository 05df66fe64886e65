//! Error types for the WebSocket client.
//!
//! This module defines all error types used throughout the crate, plus the
//! [`ErrorEvent`] payload that errors are surfaced through on the client
//! event stream.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_courier::{Result, WsClient};
//!
//! async fn example(client: &WsClient) -> Result<()> {
//!     client.connect().await?;
//!     client.send(serde_json::json!({ "type": "ping" }))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::ReconnectExhausted`], [`Error::Config`], [`Error::Io`], [`Error::WebSocket`], [`Error::Http`] |
//! | Parse | [`Error::Protocol`], [`Error::ChunkMismatch`], [`Error::ChunkCorrupt`], [`Error::UnknownAssembly`], [`Error::Json`] |
//! | Auth | [`Error::AuthFailed`], [`Error::AuthExhausted`], [`Error::TicketUnavailable`] |
//! | Timeout | [`Error::ConnectionTimeout`], [`Error::Timeout`] |
//! | Rate limit | [`Error::RateLimited`], [`Error::QueueFull`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging and maps onto one
/// of the five [`ErrorCategory`] values surfaced to callers.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the transport cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt timed out.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Reconnection abandoned after exhausting the attempt budget.
    ///
    /// Terminal: the caller must call `connect()` again explicitly.
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    // ========================================================================
    // Protocol / Parse Errors
    // ========================================================================
    /// Protocol violation or malformed inbound frame.
    ///
    /// Non-fatal to the connection: reported and the connection continues.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Chunked message ended with missing chunks.
    #[error("Chunk mismatch for message {message_id}: received {received}/{expected}")]
    ChunkMismatch {
        /// Identifier of the chunked message.
        message_id: String,
        /// Chunks actually received.
        received: u32,
        /// Chunks declared by the sender.
        expected: u32,
    },

    /// Chunk payload failed decoding or hash verification.
    #[error("Corrupt chunk {chunk_index} for message {message_id}: {message}")]
    ChunkCorrupt {
        /// Identifier of the chunked message.
        message_id: String,
        /// Index of the corrupt chunk.
        chunk_index: u32,
        /// Description of the corruption.
        message: String,
    },

    /// Chunk data arrived for a message with no in-flight assembly.
    #[error("No assembly for message {message_id}")]
    UnknownAssembly {
        /// Identifier carried by the orphaned chunk.
        message_id: String,
    },

    // ========================================================================
    // Auth Errors
    // ========================================================================
    /// Credential rejected by the server (recoverable, retried with cooldown).
    #[error("Authentication failed: {message}")]
    AuthFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Auth retry budget exhausted.
    ///
    /// Terminal: the caller must re-authenticate and reconnect explicitly.
    #[error("Authentication abandoned after {attempts} failures")]
    AuthExhausted {
        /// Number of auth failures before giving up.
        attempts: u32,
    },

    /// Ticket issuance is unavailable (endpoint missing or unauthenticated).
    ///
    /// Signals the connection layer to fall back to token auth.
    #[error("Ticket endpoint unavailable (HTTP {status})")]
    TicketUnavailable {
        /// HTTP status returned by the issuer.
        status: u16,
    },

    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// Operation exceeded its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Rate Limit Errors
    // ========================================================================
    /// Outbound message budget exceeded; message was queued.
    ///
    /// Informational, not fatal.
    #[error("Rate limit exceeded, message queued")]
    RateLimited,

    /// Message queue at capacity; message was dropped.
    #[error("Message queue full (capacity {capacity}), message dropped")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP error from the ticket endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an auth failure error.
    #[inline]
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a chunk mismatch error.
    #[inline]
    pub fn chunk_mismatch(message_id: impl Into<String>, received: u32, expected: u32) -> Self {
        Self::ChunkMismatch {
            message_id: message_id.into(),
            received,
            expected,
        }
    }

    /// Creates a corrupt chunk error.
    #[inline]
    pub fn chunk_corrupt(
        message_id: impl Into<String>,
        chunk_index: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::ChunkCorrupt {
            message_id: message_id.into(),
            chunk_index,
            message: message.into(),
        }
    }

    /// Creates an unknown assembly error.
    #[inline]
    pub fn unknown_assembly(message_id: impl Into<String>) -> Self {
        Self::UnknownAssembly {
            message_id: message_id.into(),
        }
    }
}

// ============================================================================
// ErrorCategory
// ============================================================================

/// Error category surfaced to callers.
///
/// Maps the full error taxonomy onto the five categories the caller-facing
/// event stream reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport-level failure or unexpected close.
    Connection,
    /// Malformed inbound frame or chunk protocol violation.
    Parse,
    /// Credential rejected or expired.
    Auth,
    /// Request exceeded its deadline.
    Timeout,
    /// Outbound budget exceeded (informational).
    RateLimit,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Parse => "parse",
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the category this error is surfaced under.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. }
            | Self::ConnectionClosed
            | Self::ReconnectExhausted { .. }
            | Self::Io(_)
            | Self::WebSocket(_)
            | Self::Config { .. } => ErrorCategory::Connection,

            Self::Protocol { .. }
            | Self::ChunkMismatch { .. }
            | Self::ChunkCorrupt { .. }
            | Self::UnknownAssembly { .. }
            | Self::Json(_) => ErrorCategory::Parse,

            Self::AuthFailed { .. }
            | Self::AuthExhausted { .. }
            | Self::TicketUnavailable { .. } => ErrorCategory::Auth,

            Self::ConnectionTimeout { .. } | Self::Timeout { .. } => ErrorCategory::Timeout,

            Self::RateLimited | Self::QueueFull { .. } => ErrorCategory::RateLimit,

            Self::Http(e) if e.is_timeout() => ErrorCategory::Timeout,
            Self::Http(_) => ErrorCategory::Connection,
        }
    }

    /// Returns `true` if this is an auth error.
    #[inline]
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        self.category() == ErrorCategory::Auth
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are self-healing: the client retries or continues
    /// on its own. Non-recoverable errors require explicit caller action
    /// (re-authenticate, reconnect).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::ReconnectExhausted { .. }
                | Self::AuthExhausted { .. }
                | Self::TicketUnavailable { .. }
                | Self::Config { .. }
        )
    }
}

// ============================================================================
// ErrorEvent
// ============================================================================

/// Error payload delivered on the client event stream.
///
/// Carries the category and recoverability so callers can distinguish
/// self-healing errors from those requiring explicit action.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    /// Stable machine-readable code (category string).
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Error category.
    pub category: ErrorCategory,
    /// Whether the client recovers on its own.
    pub recoverable: bool,
}

impl ErrorEvent {
    /// Builds an event from an error, stamped with the current time.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            code: error.category().to_string(),
            message: error.to_string(),
            timestamp: unix_millis(),
            category: error.category(),
            recoverable: error.is_recoverable(),
        }
    }
}

impl From<&Error> for ErrorEvent {
    fn from(error: &Error) -> Self {
        Self::from_error(error)
    }
}

/// Current wall-clock time as unix milliseconds.
#[must_use]
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_category_connection() {
        assert_eq!(Error::connection("x").category(), ErrorCategory::Connection);
        assert_eq!(
            Error::ConnectionClosed.category(),
            ErrorCategory::Connection
        );
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Error::protocol("bad frame").category(), ErrorCategory::Parse);
        assert_eq!(
            Error::chunk_mismatch("m1", 3, 5).category(),
            ErrorCategory::Parse
        );
    }

    #[test]
    fn test_category_auth() {
        assert_eq!(Error::auth_failed("nope").category(), ErrorCategory::Auth);
        assert_eq!(
            Error::AuthExhausted { attempts: 3 }.category(),
            ErrorCategory::Auth
        );
    }

    #[test]
    fn test_category_timeout() {
        assert_eq!(
            Error::timeout("ticket acquisition", 5000).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            Error::connection_timeout(1000).category(),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_category_rate_limit() {
        assert_eq!(Error::RateLimited.category(), ErrorCategory::RateLimit);
        assert_eq!(
            Error::QueueFull { capacity: 100 }.category(),
            ErrorCategory::RateLimit
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::connection("transient").is_recoverable());
        assert!(Error::RateLimited.is_recoverable());
        assert!(Error::auth_failed("expired ticket").is_recoverable());

        assert!(!Error::AuthExhausted { attempts: 3 }.is_recoverable());
        assert!(!Error::ReconnectExhausted { attempts: 10 }.is_recoverable());
        assert!(!Error::TicketUnavailable { status: 404 }.is_recoverable());
        assert!(!Error::config("bad url").is_recoverable());
    }

    #[test]
    fn test_error_event_fields() {
        let err = Error::AuthExhausted { attempts: 3 };
        let event = ErrorEvent::from_error(&err);

        assert_eq!(event.code, "auth");
        assert_eq!(event.category, ErrorCategory::Auth);
        assert!(!event.recoverable);
        assert!(event.timestamp > 0);
        assert!(event.message.contains('3'));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "rate_limit");
        assert_eq!(ErrorCategory::Parse.to_string(), "parse");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.category(), ErrorCategory::Parse);
    }
}
