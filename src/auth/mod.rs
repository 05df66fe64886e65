//! Connection authentication.
//!
//! Tickets are short-lived credentials authorizing one WebSocket
//! connection, issued by a backend authority distinct from the long-lived
//! JWT. The connection layer asks [`TicketAuthClient`] for a ticket before
//! each transport handshake and falls back to token auth when issuance is
//! unavailable.

// ============================================================================
// Submodules
// ============================================================================

/// Ticket acquisition and caching.
pub mod ticket;

// ============================================================================
// Re-exports
// ============================================================================

pub use ticket::{Ticket, TicketAuthClient};
