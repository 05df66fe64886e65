//! Wire protocol message types.
//!
//! Frames are JSON objects carried in WebSocket text frames. Two tag
//! conventions coexist on the wire:
//!
//! - Standard frames carry a required `type` field. Unrecognized types are
//!   passed through to the caller rather than rejected.
//! - Large-message frames are disambiguated by a `message_type` field
//!   (`chunked_start`, `chunked_data`, `chunked_end`).
//! - Lifecycle frames (`ping`, `pong`, `heartbeat`, `heartbeat_ack`,
//!   `server_shutdown`) are handled internally and never surfaced.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Tagged [`Frame`] union and the parse boundary |
//! | `chunk` | Chunk metadata and payload encoding helpers |

// ============================================================================
// Submodules
// ============================================================================

/// Tagged frame union and parsing.
pub mod frame;

/// Chunk metadata and encoding helpers.
pub mod chunk;

// ============================================================================
// Re-exports
// ============================================================================

pub use chunk::{ChunkMetadata, chunk_hash, decode_chunk, encode_chunk};
pub use frame::{ChunkFrame, Frame, LifecycleFrame};
