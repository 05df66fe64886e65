//! Ticket acquisition, caching, and renewal.
//!
//! One active ticket is cached at a time and renewed when it approaches
//! expiry. Concurrent callers share a single in-flight issuer request
//! (single-flight) instead of issuing duplicates; the whole acquisition is
//! bounded by a wait timeout.
//!
//! Issuer failures are categorized: network errors, 5xx, and 429 are
//! recoverable and retried with backoff; 401 and 404 mean issuance is
//! unavailable and the caller should fall back to token auth.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Issuer endpoint path, relative to the service base URL.
const TICKET_PATH: &str = "/api/websocket/ticket";

/// Default ticket refresh threshold: renew when this close to expiry.
const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(30);

/// Default maximum issuer retries per acquisition.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between issuer retries.
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap on the per-retry delay.
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default bound on retry jitter.
const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(100);

/// Default bound on the total acquisition wait, including retries and
/// waiting on another caller's in-flight request.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Ticket
// ============================================================================

/// A short-lived connection-authorization credential.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// Opaque ticket value presented at the transport handshake.
    pub value: String,
    /// Expiry as unix seconds.
    pub expires_at: u64,
    /// Issuance time as unix seconds.
    pub created_at: u64,
    /// Issuer-directed WebSocket URL override, if any.
    pub websocket_url: Option<String>,
}

impl Ticket {
    /// Returns `true` if the ticket is within `threshold` of expiry.
    #[must_use]
    pub fn needs_refresh(&self, threshold: Duration) -> bool {
        let now = unix_secs();
        self.expires_at.saturating_sub(now) < threshold.as_secs()
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Request body for the issuer endpoint.
#[derive(Debug, Serialize)]
struct TicketRequest {
    ttl_seconds: u64,
    single_use: bool,
    permissions: Vec<String>,
}

/// Response body from the issuer endpoint.
#[derive(Debug, Deserialize)]
struct TicketResponse {
    ticket_id: String,
    expires_at: u64,
    created_at: u64,
    #[serde(default)]
    websocket_url: Option<String>,
}

impl From<TicketResponse> for Ticket {
    fn from(response: TicketResponse) -> Self {
        Self {
            value: response.ticket_id,
            expires_at: response.expires_at,
            created_at: response.created_at,
            websocket_url: response.websocket_url,
        }
    }
}

// ============================================================================
// TicketAuthClient
// ============================================================================

/// Acquires and caches connection tickets from the backend issuer.
///
/// Explicitly constructed and injected into the connection layer; holds
/// no global state.
pub struct TicketAuthClient {
    /// HTTP client for issuer requests.
    http: reqwest::Client,
    /// Full issuer endpoint URL.
    endpoint: String,
    /// Bearer token authenticating issuer requests.
    bearer_token: String,
    /// Renew when the cached ticket is this close to expiry.
    refresh_threshold: Duration,
    /// Maximum issuer retries per acquisition.
    max_retries: u32,
    /// Base delay between retries.
    retry_base_delay: Duration,
    /// Cap on the per-retry delay.
    retry_max_delay: Duration,
    /// Bound on the total acquisition wait.
    acquire_timeout: Duration,
    /// Cached ticket (one active ticket at a time).
    cache: Mutex<Option<Ticket>>,
    /// Single-flight guard: one issuer request at a time.
    flight: tokio::sync::Mutex<()>,
}

impl TicketAuthClient {
    /// Creates a ticket client for the given service base URL.
    ///
    /// `base_url` is the HTTP origin of the issuing service, e.g.
    /// `https://api.example.com`; the endpoint path is appended.
    #[must_use]
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}{TICKET_PATH}", base.trim_end_matches('/')),
            bearer_token: bearer_token.into(),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            cache: Mutex::new(None),
            flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the refresh threshold.
    #[inline]
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Sets the bound on the total acquisition wait.
    #[inline]
    #[must_use]
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Returns a valid ticket, fetching from the issuer if needed.
    ///
    /// A cached ticket outside the refresh threshold is returned without a
    /// network round trip. Otherwise one issuer request is made; concurrent
    /// callers await it rather than issuing duplicates.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the acquisition exceeds the wait bound
    /// - [`Error::TicketUnavailable`] on 401/404 (fall back to token auth)
    /// - [`Error::Http`] / [`Error::Connection`] after retries exhaust
    pub async fn acquire_ticket(&self, ttl_seconds: u64) -> Result<Ticket> {
        timeout(self.acquire_timeout, self.acquire_inner(ttl_seconds))
            .await
            .map_err(|_| {
                Error::timeout(
                    "ticket acquisition",
                    self.acquire_timeout.as_millis() as u64,
                )
            })?
    }

    async fn acquire_inner(&self, ttl_seconds: u64) -> Result<Ticket> {
        if let Some(ticket) = self.cached_fresh() {
            return Ok(ticket);
        }

        let _flight = self.flight.lock().await;

        // Another caller may have populated the cache while we waited.
        if let Some(ticket) = self.cached_fresh() {
            return Ok(ticket);
        }

        let ticket = self.fetch_with_retry(ttl_seconds).await?;
        *self.cache.lock() = Some(ticket.clone());
        Ok(ticket)
    }

    /// Clears the cached ticket.
    ///
    /// Called by the connection layer when the transport reports an auth
    /// failure attributable to an expired or invalid ticket; the next
    /// acquisition fetches fresh credentials.
    pub fn clear_cache(&self) {
        if self.cache.lock().take().is_some() {
            debug!("Ticket cache cleared");
        }
    }

    /// Returns `true` if a fresh ticket is cached.
    #[must_use]
    pub fn has_cached(&self) -> bool {
        self.cached_fresh().is_some()
    }

    fn cached_fresh(&self) -> Option<Ticket> {
        self.cache
            .lock()
            .as_ref()
            .filter(|t| !t.needs_refresh(self.refresh_threshold))
            .cloned()
    }

    // ========================================================================
    // Issuer Requests
    // ========================================================================

    async fn fetch_with_retry(&self, ttl_seconds: u64) -> Result<Ticket> {
        let mut backoff = ExponentialBackoff::new(
            self.retry_base_delay,
            self.retry_max_delay,
            DEFAULT_RETRY_JITTER,
            false,
        );

        loop {
            match self.fetch(ttl_seconds).await {
                Ok(ticket) => {
                    debug!(
                        expires_at = ticket.expires_at,
                        "Ticket acquired from issuer"
                    );
                    return Ok(ticket);
                }
                Err(error) if !error.is_recoverable() => {
                    warn!(%error, "Ticket issuance unavailable, not retrying");
                    return Err(error);
                }
                Err(error) => {
                    if backoff.attempt() >= self.max_retries {
                        warn!(
                            %error,
                            retries = self.max_retries,
                            "Ticket retries exhausted"
                        );
                        return Err(error);
                    }
                    let delay = backoff.next_delay();
                    debug!(%error, ?delay, "Ticket request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn fetch(&self, ttl_seconds: u64) -> Result<Ticket> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.bearer_token)
            .json(&TicketRequest {
                ttl_seconds,
                single_use: true,
                permissions: vec!["connect".to_string()],
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: TicketResponse = response.json().await?;
            return Ok(body.into());
        }

        match status.as_u16() {
            // Endpoint missing or unauthenticated: fall back to token auth.
            401 | 404 => Err(Error::TicketUnavailable {
                status: status.as_u16(),
            }),
            code => Err(Error::connection(format!(
                "ticket issuer returned HTTP {code}"
            ))),
        }
    }
}

impl std::fmt::Debug for TicketAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketAuthClient")
            .field("endpoint", &self.endpoint)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Current wall-clock time as unix seconds.
fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal scripted HTTP issuer: serves the given (status, body) pairs
    /// in order, repeating the last one, and counts requests.
    async fn spawn_issuer(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses
                    .get(n)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or((200, String::new()));

                // Drain the request head and body before responding.
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                loop {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) => break,
                        Ok(n) => {
                            read += n;
                            if let Some(head_end) =
                                find_subsequence(&buf[..read], b"\r\n\r\n")
                            {
                                let head = String::from_utf8_lossy(&buf[..head_end]);
                                let content_length = head
                                    .lines()
                                    .find_map(|l| {
                                        l.to_ascii_lowercase()
                                            .strip_prefix("content-length:")
                                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                                    })
                                    .unwrap_or(0);
                                if read >= head_end + 4 + content_length {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }

                let reason = if status == 200 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{addr}"), requests)
    }

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn ticket_body(id: &str, ttl_secs: u64) -> String {
        let now = unix_secs();
        format!(
            r#"{{"ticket_id":"{id}","expires_at":{},"created_at":{now}}}"#,
            now + ttl_secs
        )
    }

    #[test]
    fn test_needs_refresh() {
        let now = unix_secs();
        let fresh = Ticket {
            value: "t".to_string(),
            expires_at: now + 300,
            created_at: now,
            websocket_url: None,
        };
        assert!(!fresh.needs_refresh(Duration::from_secs(30)));

        let expiring = Ticket {
            value: "t".to_string(),
            expires_at: now + 10,
            created_at: now,
            websocket_url: None,
        };
        assert!(expiring.needs_refresh(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_acquire_success() {
        let (base, requests) = spawn_issuer(vec![(200, ticket_body("t1", 300))]).await;
        let client = TicketAuthClient::new(base, "jwt");

        let ticket = client.acquire_ticket(300).await.expect("acquire");
        assert_eq!(ticket.value, "t1");
        assert!(ticket.expires_at > ticket.created_at);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_ticket_reused() {
        let (base, requests) = spawn_issuer(vec![(200, ticket_body("t1", 300))]).await;
        let client = TicketAuthClient::new(base, "jwt");

        let first = client.acquire_ticket(300).await.expect("first");
        let second = client.acquire_ticket(300).await.expect("second");

        assert_eq!(first.value, second.value);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert!(client.has_cached());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let (base, requests) = spawn_issuer(vec![
            (200, ticket_body("t1", 300)),
            (200, ticket_body("t2", 300)),
        ])
        .await;
        let client = TicketAuthClient::new(base, "jwt");

        let first = client.acquire_ticket(300).await.expect("first");
        client.clear_cache();
        let second = client.acquire_ticket(300).await.expect("second");

        assert_eq!(first.value, "t1");
        assert_eq!(second.value, "t2");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_endpoint_missing_is_terminal() {
        let (base, requests) =
            spawn_issuer(vec![(404, r#"{"error":"not found"}"#.to_string())]).await;
        let client = TicketAuthClient::new(base, "jwt");

        let err = client.acquire_ticket(300).await.unwrap_err();
        assert!(matches!(err, Error::TicketUnavailable { status: 404 }));
        assert!(!err.is_recoverable());
        // No retries for a terminal status.
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (base, requests) = spawn_issuer(vec![
            (500, r#"{"error":"boom"}"#.to_string()),
            (200, ticket_body("t1", 300)),
        ])
        .await;
        let client = TicketAuthClient::new(base, "jwt")
            .with_retry_policy(3, Duration::from_millis(10));

        let ticket = client.acquire_ticket(300).await.expect("acquire");
        assert_eq!(ticket.value, "t1");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_exhaust() {
        let (base, requests) =
            spawn_issuer(vec![(500, r#"{"error":"boom"}"#.to_string())]).await;
        let client = TicketAuthClient::new(base, "jwt")
            .with_retry_policy(2, Duration::from_millis(10));

        let err = client.acquire_ticket(300).await.unwrap_err();
        assert!(err.is_recoverable());
        // Initial attempt plus two retries.
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (base, requests) = spawn_issuer(vec![(200, ticket_body("t1", 300))]).await;
        let client = Arc::new(TicketAuthClient::new(base, "jwt"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(
                async move { client.acquire_ticket(300).await },
            ));
        }

        for handle in handles {
            let ticket = handle.await.expect("join").expect("acquire");
            assert_eq!(ticket.value, "t1");
        }

        // All callers shared one issuer request.
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }
}
