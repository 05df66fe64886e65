//! Chunked message framing and reassembly.
//!
//! Outbound payloads whose serialized form exceeds the chunk threshold are
//! split into a `chunked_start` / `chunked_data`* / `chunked_end` frame
//! sequence; smaller payloads pass through unmodified. Inbound chunk
//! frames are accumulated per message id until the terminating frame
//! triggers reassembly.
//!
//! # Assembly Lifecycle
//!
//! 1. `chunked_start` creates a [`MessageAssembly`] keyed by message id
//! 2. Each `chunked_data` stores decoded bytes at its chunk index
//! 3. `chunked_end` verifies completeness, concatenates, decompresses,
//!    parses, and removes the assembly
//! 4. Assemblies older than the configured max age are purged
//!
//! A duplicate `chunked_start` for an in-flight message id restarts the
//! assembly (last-start-wins): a sender retrying from the top supersedes
//! whatever partial state it left behind.

// ============================================================================
// Imports
// ============================================================================

use std::io::Read;
use std::time::{Duration, Instant};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::chunk::{ChunkMetadata, chunk_hash, decode_chunk, encode_chunk};
use crate::protocol::frame::ChunkFrame;

// ============================================================================
// MessageAssembly
// ============================================================================

/// In-progress reconstruction of one chunked message.
#[derive(Debug)]
pub struct MessageAssembly {
    /// Number of chunks the sender declared.
    total_chunks: u32,

    /// Decoded chunk bytes by index.
    received: FxHashMap<u32, Vec<u8>>,

    /// When the `chunked_start` arrived.
    started_at: Instant,

    /// Whether the payload is compressed.
    is_compressed: bool,

    /// Declared compression algorithm.
    algorithm: String,

    /// Whether the payload is binary rather than JSON text.
    is_binary: bool,
}

impl MessageAssembly {
    fn new(total_chunks: u32, compression: &str, is_binary: bool) -> Self {
        Self {
            total_chunks,
            received: FxHashMap::default(),
            started_at: Instant::now(),
            is_compressed: compression != "none" && !compression.is_empty(),
            algorithm: compression.to_string(),
            is_binary,
        }
    }

    /// Returns the number of chunks received so far.
    #[inline]
    #[must_use]
    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    /// Returns `true` if every declared chunk has arrived.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Concatenates chunks in index order.
    fn concatenate(&mut self) -> Vec<u8> {
        let mut payload = Vec::new();
        for index in 0..self.total_chunks {
            if let Some(bytes) = self.received.remove(&index) {
                payload.extend_from_slice(&bytes);
            }
        }
        payload
    }
}

// ============================================================================
// AssemblyProgress
// ============================================================================

/// Progress of an in-flight chunked message, reported per data frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyProgress {
    /// Chunks received so far.
    pub chunks_received: u32,
    /// Chunks the sender declared.
    pub total_chunks: u32,
    /// Completion percentage in `0.0..=100.0`.
    pub progress_percent: f64,
}

// ============================================================================
// Ingest
// ============================================================================

/// Outcome of feeding one chunk frame to the framer.
#[derive(Debug)]
pub enum Ingest {
    /// Frame accepted; nothing to deliver yet.
    Accepted,
    /// A data chunk was stored; progress for the caller.
    Progress(AssemblyProgress),
    /// The message is fully reassembled.
    Complete(Value),
}

// ============================================================================
// SplitOutcome
// ============================================================================

/// Outcome of preparing an outbound payload.
#[derive(Debug)]
pub enum SplitOutcome {
    /// Payload fits in a single frame; serialized text.
    Single(String),
    /// Payload was chunked; serialized frames in send order.
    Chunked(Vec<String>),
}

impl SplitOutcome {
    /// Returns the serialized frames in send order.
    #[must_use]
    pub fn into_frames(self) -> Vec<String> {
        match self {
            Self::Single(text) => vec![text],
            Self::Chunked(frames) => frames,
        }
    }
}

// ============================================================================
// MessageFramer
// ============================================================================

/// Splits outbound payloads and reassembles inbound chunk streams.
///
/// Owns the map of in-flight [`MessageAssembly`] keyed by message id.
/// Multiple chunked messages may be in flight concurrently.
pub struct MessageFramer {
    /// Outbound payloads above this serialized size are chunked.
    chunk_size: usize,

    /// Partial assemblies older than this are purged.
    assembly_max_age: Duration,

    /// Compression algorithms accepted on inbound messages.
    accepted_compression: Vec<String>,

    /// In-flight assemblies by message id.
    assemblies: FxHashMap<String, MessageAssembly>,
}

impl MessageFramer {
    /// Creates a framer.
    #[must_use]
    pub fn new(
        chunk_size: usize,
        assembly_max_age: Duration,
        accepted_compression: Vec<String>,
    ) -> Self {
        Self {
            chunk_size,
            assembly_max_age,
            accepted_compression,
            assemblies: FxHashMap::default(),
        }
    }

    /// Returns the number of in-flight assemblies.
    #[inline]
    #[must_use]
    pub fn assembly_count(&self) -> usize {
        self.assemblies.len()
    }

    // ========================================================================
    // Send Side
    // ========================================================================

    /// Prepares an outbound payload for transport.
    ///
    /// Payloads at or under the chunk threshold pass through unmodified;
    /// larger payloads become a `chunked_start`, N `chunked_data`, and a
    /// `chunked_end` frame, in send order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn split(&self, payload: &Value) -> Result<SplitOutcome> {
        let serialized = serde_json::to_string(payload)?;

        if serialized.len() <= self.chunk_size {
            return Ok(SplitOutcome::Single(serialized));
        }

        let bytes = serialized.as_bytes();
        let message_id = Uuid::new_v4().to_string();
        let chunks: Vec<&[u8]> = bytes.chunks(self.chunk_size).collect();
        let total_chunks = chunks.len() as u32;

        debug!(
            %message_id,
            total_chunks,
            total_size = bytes.len(),
            "Splitting large outbound message"
        );

        let mut frames = Vec::with_capacity(chunks.len() + 2);

        frames.push(serde_json::to_string(&ChunkFrame::ChunkedStart {
            message_id: message_id.clone(),
            total_chunks,
            total_size: bytes.len() as u64,
            compression: "none".to_string(),
            is_binary: false,
        })?);

        for (index, chunk) in chunks.iter().enumerate() {
            let index = index as u32;
            frames.push(serde_json::to_string(&ChunkFrame::ChunkedData {
                metadata: ChunkMetadata {
                    chunk_id: format!("{message_id}-{index}"),
                    message_id: message_id.clone(),
                    chunk_index: index,
                    total_chunks,
                    chunk_hash: chunk_hash(chunk),
                    is_final: index + 1 == total_chunks,
                },
                data: encode_chunk(chunk),
                encoding: "base64".to_string(),
            })?);
        }

        frames.push(serde_json::to_string(&ChunkFrame::ChunkedEnd {
            message_id,
            total_chunks,
        })?);

        Ok(SplitOutcome::Chunked(frames))
    }

    // ========================================================================
    // Receive Side
    // ========================================================================

    /// Feeds one inbound chunk frame to the reassembly state.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownAssembly`] for data/end frames with no matching
    ///   `chunked_start` (protocol violation; the frame is dropped)
    /// - [`Error::ChunkCorrupt`] for undecodable or hash-mismatched chunks
    /// - [`Error::ChunkMismatch`] when `chunked_end` arrives with chunks
    ///   missing (the assembly is discarded, not retried)
    pub fn ingest(&mut self, frame: ChunkFrame) -> Result<Ingest> {
        match frame {
            ChunkFrame::ChunkedStart {
                message_id,
                total_chunks,
                total_size,
                compression,
                is_binary,
            } => {
                if self.assemblies.contains_key(&message_id) {
                    // Last-start-wins: the sender restarted this message.
                    warn!(%message_id, "Duplicate chunked_start, restarting assembly");
                }

                trace!(%message_id, total_chunks, total_size, "Assembly started");
                self.assemblies.insert(
                    message_id,
                    MessageAssembly::new(total_chunks, &compression, is_binary),
                );
                Ok(Ingest::Accepted)
            }

            ChunkFrame::ChunkedData {
                metadata,
                data,
                encoding: _,
            } => {
                let Some(assembly) = self.assemblies.get_mut(&metadata.message_id) else {
                    warn!(
                        message_id = %metadata.message_id,
                        chunk_index = metadata.chunk_index,
                        "Chunk for unknown assembly, dropping"
                    );
                    return Err(Error::unknown_assembly(&metadata.message_id));
                };

                if metadata.chunk_index >= assembly.total_chunks {
                    return Err(Error::chunk_corrupt(
                        &metadata.message_id,
                        metadata.chunk_index,
                        format!("index out of range (total {})", assembly.total_chunks),
                    ));
                }

                let bytes = decode_chunk(&metadata, &data)?;
                assembly.received.insert(metadata.chunk_index, bytes);

                let received = assembly.received_count();
                let total = assembly.total_chunks;
                Ok(Ingest::Progress(AssemblyProgress {
                    chunks_received: received,
                    total_chunks: total,
                    progress_percent: f64::from(received) / f64::from(total.max(1)) * 100.0,
                }))
            }

            ChunkFrame::ChunkedEnd {
                message_id,
                total_chunks: _,
            } => {
                let Some(mut assembly) = self.assemblies.remove(&message_id) else {
                    warn!(%message_id, "chunked_end for unknown assembly, dropping");
                    return Err(Error::unknown_assembly(&message_id));
                };

                if !assembly.is_complete() {
                    return Err(Error::chunk_mismatch(
                        &message_id,
                        assembly.received_count(),
                        assembly.total_chunks,
                    ));
                }

                let payload = assembly.concatenate();
                let payload = if assembly.is_compressed {
                    self.decompress(&message_id, &assembly.algorithm, &payload)?
                } else {
                    payload
                };

                debug!(%message_id, size = payload.len(), "Assembly complete");
                Ok(Ingest::Complete(Self::finalize(
                    payload,
                    assembly.is_binary,
                )))
            }
        }
    }

    /// Purges assemblies older than the configured max age.
    ///
    /// Returns the number of assemblies discarded. Called opportunistically
    /// by the connection layer to bound memory under partial-failure chunk
    /// streams.
    pub fn purge_stale(&mut self) -> usize {
        let max_age = self.assembly_max_age;
        let before = self.assemblies.len();

        self.assemblies.retain(|message_id, assembly| {
            let stale = assembly.started_at.elapsed() > max_age;
            if stale {
                warn!(
                    %message_id,
                    received = assembly.received_count(),
                    total = assembly.total_chunks,
                    "Purging stale assembly"
                );
            }
            !stale
        });

        before - self.assemblies.len()
    }

    /// Drops all in-flight assemblies (connection teardown).
    pub fn clear(&mut self) {
        if !self.assemblies.is_empty() {
            debug!(count = self.assemblies.len(), "Clearing in-flight assemblies");
        }
        self.assemblies.clear();
    }

    /// Decompresses a reassembled payload with its declared algorithm.
    fn decompress(&self, message_id: &str, algorithm: &str, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.accepted_compression.iter().any(|a| a == algorithm) {
            return Err(Error::protocol(format!(
                "message {message_id} uses unsupported compression {algorithm:?}"
            )));
        }

        let mut output = Vec::new();
        match algorithm {
            "deflate" => {
                DeflateDecoder::new(payload)
                    .read_to_end(&mut output)
                    .map_err(|e| {
                        Error::protocol(format!("deflate decompression failed for {message_id}: {e}"))
                    })?;
            }
            "zlib" => {
                ZlibDecoder::new(payload)
                    .read_to_end(&mut output)
                    .map_err(|e| {
                        Error::protocol(format!("zlib decompression failed for {message_id}: {e}"))
                    })?;
            }
            other => {
                return Err(Error::protocol(format!(
                    "message {message_id} uses unknown compression {other:?}"
                )));
            }
        }
        Ok(output)
    }

    /// Parses a reassembled payload, falling back to a raw-data wrapper.
    fn finalize(payload: Vec<u8>, is_binary: bool) -> Value {
        if !is_binary
            && let Ok(text) = std::str::from_utf8(&payload)
            && let Ok(value) = serde_json::from_str::<Value>(text)
        {
            return value;
        }

        // Not valid JSON (or declared binary): wrap rather than drop.
        json!({
            "type": "raw_data",
            "data": encode_chunk(&payload),
            "encoding": "base64",
            "is_binary": is_binary,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use proptest::prelude::*;
    use std::io::Write;

    fn framer_with_chunk_size(chunk_size: usize) -> MessageFramer {
        MessageFramer::new(
            chunk_size,
            Duration::from_secs(60),
            vec!["deflate".to_string(), "zlib".to_string()],
        )
    }

    fn parse_chunk_frame(text: &str) -> ChunkFrame {
        serde_json::from_str(text).expect("chunk frame")
    }

    /// Splits a payload and feeds every frame back through ingest.
    fn round_trip(framer: &mut MessageFramer, payload: &Value) -> Value {
        let frames = match framer.split(payload).expect("split") {
            SplitOutcome::Chunked(frames) => frames,
            SplitOutcome::Single(_) => panic!("payload should have been chunked"),
        };

        let mut result = None;
        for text in frames {
            match framer.ingest(parse_chunk_frame(&text)).expect("ingest") {
                Ingest::Complete(value) => result = Some(value),
                Ingest::Accepted | Ingest::Progress(_) => {}
            }
        }
        result.expect("assembly should complete")
    }

    #[test]
    fn test_small_payload_passes_through() {
        let framer = framer_with_chunk_size(1024);
        let payload = serde_json::json!({ "type": "chat", "payload": { "text": "hi" } });

        match framer.split(&payload).expect("split") {
            SplitOutcome::Single(text) => {
                let back: Value = serde_json::from_str(&text).expect("parse");
                assert_eq!(back, payload);
            }
            SplitOutcome::Chunked(_) => panic!("small payload must not be chunked"),
        }
    }

    #[test]
    fn test_chunked_round_trip() {
        let mut framer = framer_with_chunk_size(64);
        let payload = serde_json::json!({
            "type": "document",
            "payload": { "body": "x".repeat(1000) },
        });

        let result = round_trip(&mut framer, &payload);
        assert_eq!(result, payload);
        assert_eq!(framer.assembly_count(), 0);
    }

    #[test]
    fn test_progress_reported_per_chunk() {
        let mut framer = framer_with_chunk_size(32);
        let payload = serde_json::json!({ "data": "y".repeat(200) });

        let frames = framer.split(&payload).expect("split").into_frames();
        let mut progress_events = 0;
        let mut last_percent = 0.0;

        for text in frames {
            if let Ingest::Progress(progress) =
                framer.ingest(parse_chunk_frame(&text)).expect("ingest")
            {
                progress_events += 1;
                assert!(progress.progress_percent >= last_percent);
                assert!(progress.progress_percent <= 100.0);
                last_percent = progress.progress_percent;
            }
        }

        assert!(progress_events >= 2);
        assert_eq!(last_percent, 100.0);
    }

    #[test]
    fn test_data_without_start_is_rejected() {
        let mut framer = framer_with_chunk_size(64);
        let bytes = b"orphan";

        let frame = ChunkFrame::ChunkedData {
            metadata: ChunkMetadata {
                chunk_id: "m1-0".to_string(),
                message_id: "m1".to_string(),
                chunk_index: 0,
                total_chunks: 2,
                chunk_hash: chunk_hash(bytes),
                is_final: false,
            },
            data: encode_chunk(bytes),
            encoding: "base64".to_string(),
        };

        let err = framer.ingest(frame).unwrap_err();
        assert!(matches!(err, Error::UnknownAssembly { .. }));
    }

    #[test]
    fn test_end_with_missing_chunks_discards_assembly() {
        let mut framer = framer_with_chunk_size(16);
        let payload = serde_json::json!({ "data": "z".repeat(100) });

        let frames = framer.split(&payload).expect("split").into_frames();
        let total = frames.len();

        // Feed start and the first data chunk only, then the end frame.
        framer
            .ingest(parse_chunk_frame(&frames[0]))
            .expect("start");
        framer
            .ingest(parse_chunk_frame(&frames[1]))
            .expect("data");

        let err = framer
            .ingest(parse_chunk_frame(&frames[total - 1]))
            .unwrap_err();
        assert!(matches!(err, Error::ChunkMismatch { .. }));
        assert_eq!(framer.assembly_count(), 0);
    }

    #[test]
    fn test_duplicate_start_restarts_assembly() {
        let mut framer = framer_with_chunk_size(16);
        let payload = serde_json::json!({ "data": "w".repeat(100) });

        let frames = framer.split(&payload).expect("split").into_frames();

        framer.ingest(parse_chunk_frame(&frames[0])).expect("start");
        framer.ingest(parse_chunk_frame(&frames[1])).expect("data");

        // Restart from the top and replay everything; must still complete.
        let mut result = None;
        for text in &frames {
            if let Ingest::Complete(value) =
                framer.ingest(parse_chunk_frame(text)).expect("ingest")
            {
                result = Some(value);
            }
        }
        assert_eq!(result.expect("complete"), payload);
    }

    #[test]
    fn test_out_of_order_chunks_reassemble() {
        let mut framer = framer_with_chunk_size(16);
        let payload = serde_json::json!({ "data": "v".repeat(100) });

        let mut frames = framer.split(&payload).expect("split").into_frames();
        let end = frames.pop().expect("end frame");
        let start = frames.remove(0);

        framer.ingest(parse_chunk_frame(&start)).expect("start");
        // Deliver data chunks in reverse order.
        for text in frames.iter().rev() {
            framer.ingest(parse_chunk_frame(text)).expect("data");
        }

        match framer.ingest(parse_chunk_frame(&end)).expect("end") {
            Ingest::Complete(value) => assert_eq!(value, payload),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_purge_stale_assemblies() {
        let mut framer = MessageFramer::new(16, Duration::ZERO, vec![]);

        framer
            .ingest(ChunkFrame::ChunkedStart {
                message_id: "stale".to_string(),
                total_chunks: 5,
                total_size: 80,
                compression: "none".to_string(),
                is_binary: false,
            })
            .expect("start");
        assert_eq!(framer.assembly_count(), 1);

        // Max age is zero, so the assembly is immediately stale.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(framer.purge_stale(), 1);
        assert_eq!(framer.assembly_count(), 0);
    }

    #[test]
    fn test_concurrent_assemblies() {
        let mut framer = framer_with_chunk_size(16);
        let payload_a = serde_json::json!({ "doc": "a".repeat(100) });
        let payload_b = serde_json::json!({ "doc": "b".repeat(100) });

        let frames_a = framer.split(&payload_a).expect("split").into_frames();
        let frames_b = framer.split(&payload_b).expect("split").into_frames();

        // Interleave the two streams frame by frame.
        let mut completed = Vec::new();
        let mut iter_a = frames_a.iter();
        let mut iter_b = frames_b.iter();
        loop {
            let mut progressed = false;
            for next in [iter_a.next(), iter_b.next()].into_iter().flatten() {
                progressed = true;
                if let Ingest::Complete(value) =
                    framer.ingest(parse_chunk_frame(next)).expect("ingest")
                {
                    completed.push(value);
                }
            }
            if !progressed {
                break;
            }
        }

        assert_eq!(completed.len(), 2);
        assert!(completed.contains(&payload_a));
        assert!(completed.contains(&payload_b));
    }

    #[test]
    fn test_compressed_message_reassembles() {
        let mut framer = framer_with_chunk_size(1024);
        let original = serde_json::json!({ "type": "doc", "payload": { "text": "compressed" } });
        let plain = serde_json::to_vec(&original).expect("serialize");

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).expect("compress");
        let compressed = encoder.finish().expect("finish");

        framer
            .ingest(ChunkFrame::ChunkedStart {
                message_id: "z1".to_string(),
                total_chunks: 1,
                total_size: compressed.len() as u64,
                compression: "zlib".to_string(),
                is_binary: false,
            })
            .expect("start");

        framer
            .ingest(ChunkFrame::ChunkedData {
                metadata: ChunkMetadata {
                    chunk_id: "z1-0".to_string(),
                    message_id: "z1".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    chunk_hash: chunk_hash(&compressed),
                    is_final: true,
                },
                data: encode_chunk(&compressed),
                encoding: "base64".to_string(),
            })
            .expect("data");

        match framer
            .ingest(ChunkFrame::ChunkedEnd {
                message_id: "z1".to_string(),
                total_chunks: 1,
            })
            .expect("end")
        {
            Ingest::Complete(value) => assert_eq!(value, original),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_compression_is_rejected() {
        let mut framer = MessageFramer::new(1024, Duration::from_secs(60), vec![]);
        let bytes = b"whatever";

        framer
            .ingest(ChunkFrame::ChunkedStart {
                message_id: "c1".to_string(),
                total_chunks: 1,
                total_size: bytes.len() as u64,
                compression: "zstd".to_string(),
                is_binary: false,
            })
            .expect("start");

        framer
            .ingest(ChunkFrame::ChunkedData {
                metadata: ChunkMetadata {
                    chunk_id: "c1-0".to_string(),
                    message_id: "c1".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    chunk_hash: chunk_hash(bytes),
                    is_final: true,
                },
                data: encode_chunk(bytes),
                encoding: "base64".to_string(),
            })
            .expect("data");

        let err = framer
            .ingest(ChunkFrame::ChunkedEnd {
                message_id: "c1".to_string(),
                total_chunks: 1,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_non_json_payload_wrapped_as_raw_data() {
        let mut framer = framer_with_chunk_size(1024);
        let bytes = b"this is not json at all {{{";

        framer
            .ingest(ChunkFrame::ChunkedStart {
                message_id: "r1".to_string(),
                total_chunks: 1,
                total_size: bytes.len() as u64,
                compression: "none".to_string(),
                is_binary: false,
            })
            .expect("start");

        framer
            .ingest(ChunkFrame::ChunkedData {
                metadata: ChunkMetadata {
                    chunk_id: "r1-0".to_string(),
                    message_id: "r1".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    chunk_hash: chunk_hash(bytes),
                    is_final: true,
                },
                data: encode_chunk(bytes),
                encoding: "base64".to_string(),
            })
            .expect("data");

        match framer
            .ingest(ChunkFrame::ChunkedEnd {
                message_id: "r1".to_string(),
                total_chunks: 1,
            })
            .expect("end")
        {
            Ingest::Complete(value) => {
                assert_eq!(value["type"], "raw_data");
                assert_eq!(value["encoding"], "base64");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Splitting then reassembling yields the original payload for
        /// chunk counts from 2 up to 1000.
        #[test]
        fn prop_chunk_round_trip(len in 65usize..64_000) {
            let mut framer = framer_with_chunk_size(64);
            let payload = serde_json::json!({ "blob": "q".repeat(len) });

            let result = round_trip(&mut framer, &payload);
            prop_assert_eq!(result, payload);
            prop_assert_eq!(framer.assembly_count(), 0);
        }
    }
}
