//! Client configuration.
//!
//! Provides a type-safe configuration surface for the WebSocket client:
//! authentication mode, heartbeat, rate limiting, reconnection policy,
//! framing thresholds, and queueing.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_courier::ClientConfig;
//!
//! let config = ClientConfig::new("wss://example.com/ws")
//!     .with_ticket_auth(300)
//!     .with_heartbeat(Duration::from_secs(30))
//!     .with_rate_limit(10, Duration::from_secs(1));
//!
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default ticket TTL requested from the issuer (seconds).
pub const DEFAULT_TICKET_TTL_SECS: u64 = 300;

/// Default chunk size threshold for outbound framing (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum age of a partial chunk assembly before it is purged.
pub const DEFAULT_ASSEMBLY_MAX_AGE: Duration = Duration::from_secs(60);

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default base delay for reconnect backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on reconnect backoff delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default maximum reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default bound on reconnect jitter.
pub const DEFAULT_RECONNECT_JITTER: Duration = Duration::from_millis(500);

/// Default minimum interval between connection attempts.
pub const DEFAULT_MIN_CONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default maximum auth-failure retries before the client gives up.
pub const DEFAULT_MAX_AUTH_RETRIES: u32 = 3;

/// Default cooldown before retrying after an auth-failure close.
pub const DEFAULT_AUTH_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

/// Default number of queued messages flushed per batch on reconnect.
pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 10;

// ============================================================================
// RateLimitConfig
// ============================================================================

/// Outbound rate limit: at most `messages` sends per trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum messages per window.
    pub messages: usize,
    /// Sliding window duration.
    pub window: Duration,
}

// ============================================================================
// ClientConfig
// ============================================================================

/// WebSocket client configuration.
///
/// Construct with [`ClientConfig::new`] and refine with the `with_*`
/// builder methods. [`validate`](ClientConfig::validate) is called by the
/// client before the first connection attempt.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint URL (`ws://` or `wss://`).
    pub url: String,

    /// JWT token used as the fallback credential when ticket issuance is
    /// unavailable, or as the primary credential when ticket auth is off.
    pub token: Option<String>,

    /// Whether to authenticate with short-lived connection tickets.
    pub use_ticket_auth: bool,

    /// Ticket TTL requested from the issuer (seconds).
    pub ticket_ttl_secs: u64,

    /// Optional heartbeat ping interval while connected.
    pub heartbeat_interval: Option<Duration>,

    /// Optional outbound rate limit.
    pub rate_limit: Option<RateLimitConfig>,

    /// Inbound compression algorithms the client accepts.
    pub compression: Vec<String>,

    /// Base delay for reconnect backoff.
    pub reconnect_base_delay: Duration,

    /// Cap on reconnect backoff delay.
    pub reconnect_max_delay: Duration,

    /// Maximum reconnect attempts before surfacing a terminal error.
    pub max_reconnect_attempts: u32,

    /// Bound on random jitter added to reconnect delays.
    pub reconnect_jitter: Duration,

    /// Minimum interval between connection attempts (storm throttling).
    pub min_connect_interval: Duration,

    /// Maximum auth-failure retries; exceeding this is non-recoverable.
    pub max_auth_retries: u32,

    /// Cooldown before retrying after an auth-failure close.
    pub auth_retry_cooldown: Duration,

    /// Outbound payloads above this serialized size are chunked.
    pub chunk_size: usize,

    /// Partial assemblies older than this are purged.
    pub assembly_max_age: Duration,

    /// Capacity of the outbound message queue.
    pub queue_capacity: usize,

    /// Queued messages flushed per batch after reconnect.
    pub flush_batch_size: usize,
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientConfig {
    /// Creates a configuration for the given endpoint with defaults.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            use_ticket_auth: false,
            ticket_ttl_secs: DEFAULT_TICKET_TTL_SECS,
            heartbeat_interval: None,
            rate_limit: None,
            compression: vec!["deflate".to_string()],
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_jitter: DEFAULT_RECONNECT_JITTER,
            min_connect_interval: DEFAULT_MIN_CONNECT_INTERVAL,
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            auth_retry_cooldown: DEFAULT_AUTH_RETRY_COOLDOWN,
            chunk_size: DEFAULT_CHUNK_SIZE,
            assembly_max_age: DEFAULT_ASSEMBLY_MAX_AGE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientConfig {
    /// Sets the fallback JWT token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Enables ticket authentication with the given TTL (seconds).
    #[inline]
    #[must_use]
    pub fn with_ticket_auth(mut self, ttl_secs: u64) -> Self {
        self.use_ticket_auth = true;
        self.ticket_ttl_secs = ttl_secs;
        self
    }

    /// Enables the periodic heartbeat ping.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Sets the outbound rate limit.
    #[inline]
    #[must_use]
    pub fn with_rate_limit(mut self, messages: usize, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitConfig { messages, window });
        self
    }

    /// Sets the reconnect backoff policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect_policy(
        mut self,
        base_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        self.reconnect_base_delay = base_delay;
        self.reconnect_max_delay = max_delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Sets the bound on reconnect jitter.
    #[inline]
    #[must_use]
    pub fn with_reconnect_jitter(mut self, jitter: Duration) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Sets the minimum interval between connection attempts.
    #[inline]
    #[must_use]
    pub fn with_min_connect_interval(mut self, interval: Duration) -> Self {
        self.min_connect_interval = interval;
        self
    }

    /// Sets the auth retry policy.
    #[inline]
    #[must_use]
    pub fn with_auth_retry_policy(mut self, max_retries: u32, cooldown: Duration) -> Self {
        self.max_auth_retries = max_retries;
        self.auth_retry_cooldown = cooldown;
        self
    }

    /// Sets the chunking threshold for outbound payloads.
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the maximum age of partial chunk assemblies.
    #[inline]
    #[must_use]
    pub fn with_assembly_max_age(mut self, max_age: Duration) -> Self {
        self.assembly_max_age = max_age;
        self
    }

    /// Sets the outbound queue capacity.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the accepted inbound compression algorithms.
    #[inline]
    #[must_use]
    pub fn with_compression(mut self, algorithms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.compression = algorithms.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is not a valid `ws`/`wss` URL,
    /// a rate limit is zero-sized, or framing/queue bounds are zero.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("invalid URL {:?}: {e}", self.url)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "URL scheme must be ws or wss, got {:?}",
                url.scheme()
            )));
        }

        if let Some(limit) = &self.rate_limit
            && (limit.messages == 0 || limit.window.is_zero())
        {
            return Err(Error::config("rate limit must allow at least one message"));
        }

        if self.chunk_size == 0 {
            return Err(Error::config("chunk size must be greater than zero"));
        }

        if self.queue_capacity == 0 {
            return Err(Error::config("queue capacity must be greater than zero"));
        }

        if self.flush_batch_size == 0 {
            return Err(Error::config("flush batch size must be greater than zero"));
        }

        if !self.use_ticket_auth && self.token.is_none() {
            return Err(Error::config(
                "either ticket auth or a fallback token is required",
            ));
        }

        Ok(())
    }

    /// Returns `true` if ticket authentication is enabled.
    #[inline]
    #[must_use]
    pub const fn uses_ticket_auth(&self) -> bool {
        self.use_ticket_auth
    }
}

// ============================================================================
// Tests
// ============================================================================
