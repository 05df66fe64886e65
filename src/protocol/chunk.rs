//! Chunk metadata and payload encoding.
//!
//! Chunk payloads travel base64-encoded inside JSON text frames, each with
//! a SHA-256 content hash so a corrupted or truncated chunk is detected at
//! the receiver instead of producing a garbled reassembled message.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// ============================================================================
// ChunkMetadata
// ============================================================================

/// Per-chunk metadata carried by every `chunked_data` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Unique identifier of this chunk.
    pub chunk_id: String,

    /// Identifier of the message this chunk belongs to.
    pub message_id: String,

    /// Zero-based position of this chunk.
    pub chunk_index: u32,

    /// Total chunks in the message.
    pub total_chunks: u32,

    /// Hex-encoded SHA-256 of the chunk bytes.
    pub chunk_hash: String,

    /// Whether this is the last chunk.
    pub is_final: bool,
}

// ============================================================================
// Encoding Helpers
// ============================================================================

/// Hex-encoded SHA-256 of the given bytes.
#[must_use]
pub fn chunk_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Encodes chunk bytes for transport.
#[inline]
#[must_use]
pub fn encode_chunk(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes and verifies a chunk payload.
///
/// # Errors
///
/// Returns [`Error::ChunkCorrupt`] if the base64 is invalid or the
/// decoded bytes do not match `metadata.chunk_hash`.
pub fn decode_chunk(metadata: &ChunkMetadata, data: &str) -> Result<Vec<u8>> {
    let bytes = BASE64.decode(data).map_err(|e| {
        Error::chunk_corrupt(
            &metadata.message_id,
            metadata.chunk_index,
            format!("invalid base64: {e}"),
        )
    })?;

    let actual = chunk_hash(&bytes);
    if actual != metadata.chunk_hash {
        return Err(Error::chunk_corrupt(
            &metadata.message_id,
            metadata.chunk_index,
            format!("hash mismatch: expected {}, got {actual}", metadata.chunk_hash),
        ));
    }

    Ok(bytes)
}

// ============================================================================
// Tests
// ============================================================================
