//! Tagged frame union and the parse boundary.
//!
//! Inbound text is validated here, once, into an exhaustively-matched
//! [`Frame`] so downstream code never probes raw JSON fields. Parsing
//! probes `message_type` first (large-message frames), then `type`
//! (lifecycle and standard frames). A frame with neither discriminant is
//! a protocol error — non-fatal to the connection.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::chunk::ChunkMetadata;

// ============================================================================
// LifecycleFrame
// ============================================================================

/// Connection lifecycle frames, handled internally and never surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleFrame {
    /// Liveness probe.
    Ping,
    /// Reply to a ping.
    Pong,
    /// Application-level heartbeat.
    Heartbeat,
    /// Reply to a heartbeat.
    HeartbeatAck,
    /// Server is shutting down; a close follows.
    ServerShutdown,
}

// ============================================================================
// ChunkFrame
// ============================================================================

/// Large-message frames, disambiguated by `message_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ChunkFrame {
    /// Announces a chunked message and creates the assembly.
    ChunkedStart {
        /// Identifier shared by all frames of this message.
        message_id: String,
        /// Number of data chunks to expect.
        total_chunks: u32,
        /// Total payload size in bytes.
        total_size: u64,
        /// Compression algorithm, or `"none"`.
        compression: String,
        /// Whether the payload is binary rather than JSON text.
        is_binary: bool,
    },

    /// One chunk of payload data.
    ChunkedData {
        /// Per-chunk metadata.
        metadata: ChunkMetadata,
        /// Base64-encoded chunk bytes.
        data: String,
        /// Payload encoding (always `"base64"`).
        encoding: String,
    },

    /// Terminates a chunked message and triggers reassembly.
    ChunkedEnd {
        /// Identifier of the completed message.
        message_id: String,
        /// Number of chunks the sender emitted.
        total_chunks: u32,
    },
}

impl ChunkFrame {
    /// Returns the message id this frame belongs to.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::ChunkedStart { message_id, .. } | Self::ChunkedEnd { message_id, .. } => {
                message_id
            }
            Self::ChunkedData { metadata, .. } => &metadata.message_id,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A parsed inbound or outbound wire frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Ordinary application frame; the full object is passed through.
    ///
    /// `type` is guaranteed present; unrecognized types are delivered to
    /// the caller unchanged.
    Standard(Value),

    /// Large-message frame.
    Chunk(ChunkFrame),

    /// Lifecycle frame, consumed internally.
    Lifecycle(LifecycleFrame),
}

impl Frame {
    /// Parses a wire text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for malformed JSON, a non-object frame,
    /// a missing discriminant, or an unknown `message_type`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("malformed frame: {e}")))?;

        let Some(object) = value.as_object() else {
            return Err(Error::protocol("frame is not a JSON object"));
        };

        // Large-message frames are disambiguated by `message_type`.
        if object.contains_key("message_type") {
            let chunk = serde_json::from_value::<ChunkFrame>(value.clone())
                .map_err(|e| Error::protocol(format!("invalid chunk frame: {e}")))?;
            return Ok(Self::Chunk(chunk));
        }

        let Some(frame_type) = object.get("type").and_then(Value::as_str) else {
            return Err(Error::protocol("frame missing required `type` field"));
        };

        match frame_type {
            "ping" | "pong" | "heartbeat" | "heartbeat_ack" | "server_shutdown" => {
                let lifecycle = serde_json::from_value::<LifecycleFrame>(value)
                    .map_err(|e| Error::protocol(format!("invalid lifecycle frame: {e}")))?;
                Ok(Self::Lifecycle(lifecycle))
            }
            _ => Ok(Self::Standard(value)),
        }
    }

    /// Serializes this frame to wire text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        let text = match self {
            Self::Standard(value) => serde_json::to_string(value)?,
            Self::Chunk(chunk) => serde_json::to_string(chunk)?,
            Self::Lifecycle(lifecycle) => serde_json::to_string(lifecycle)?,
        };
        Ok(text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::chunk::{chunk_hash, encode_chunk};

    #[test]
    fn test_parse_standard_frame() {
        let frame = Frame::parse(r#"{"type":"chat","payload":{"text":"hi"}}"#).expect("parse");
        match frame {
            Frame::Standard(value) => {
                assert_eq!(value["type"], "chat");
                assert_eq!(value["payload"]["text"], "hi");
            }
            other => panic!("expected standard frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_type_passes_through() {
        let frame = Frame::parse(r#"{"type":"totally_new_feature","payload":{}}"#).expect("parse");
        assert!(matches!(frame, Frame::Standard(_)));
    }

    #[test]
    fn test_parse_lifecycle_frames() {
        for (text, expected) in [
            (r#"{"type":"ping"}"#, LifecycleFrame::Ping),
            (r#"{"type":"pong"}"#, LifecycleFrame::Pong),
            (r#"{"type":"heartbeat"}"#, LifecycleFrame::Heartbeat),
            (r#"{"type":"heartbeat_ack"}"#, LifecycleFrame::HeartbeatAck),
            (r#"{"type":"server_shutdown"}"#, LifecycleFrame::ServerShutdown),
        ] {
            let frame = Frame::parse(text).expect("parse");
            match frame {
                Frame::Lifecycle(lifecycle) => assert_eq!(lifecycle, expected),
                other => panic!("expected lifecycle frame for {text}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_chunked_start() {
        let text = json!({
            "message_type": "chunked_start",
            "message_id": "m1",
            "total_chunks": 3,
            "total_size": 200_000,
            "compression": "none",
            "is_binary": false,
        })
        .to_string();

        let frame = Frame::parse(&text).expect("parse");
        match frame {
            Frame::Chunk(ChunkFrame::ChunkedStart {
                message_id,
                total_chunks,
                ..
            }) => {
                assert_eq!(message_id, "m1");
                assert_eq!(total_chunks, 3);
            }
            other => panic!("expected chunked_start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_chunked_data() {
        let bytes = b"chunk bytes";
        let text = json!({
            "message_type": "chunked_data",
            "metadata": {
                "chunk_id": "m1-0",
                "message_id": "m1",
                "chunk_index": 0,
                "total_chunks": 2,
                "chunk_hash": chunk_hash(bytes),
                "is_final": false,
            },
            "data": encode_chunk(bytes),
            "encoding": "base64",
        })
        .to_string();

        let frame = Frame::parse(&text).expect("parse");
        match frame {
            Frame::Chunk(ChunkFrame::ChunkedData { metadata, .. }) => {
                assert_eq!(metadata.message_id, "m1");
                assert_eq!(metadata.chunk_index, 0);
            }
            other => panic!("expected chunked_data, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_type_is_error() {
        let err = Frame::parse(r#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_malformed_json_is_error() {
        let err = Frame::parse("{not json").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_non_object_is_error() {
        let err = Frame::parse("[1,2,3]").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_unknown_message_type_is_error() {
        let err = Frame::parse(r#"{"message_type":"chunked_sideways"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_message_id_across_variants() {
        let bytes = b"x";
        let frames = [
            ChunkFrame::ChunkedStart {
                message_id: "m7".to_string(),
                total_chunks: 1,
                total_size: 1,
                compression: "none".to_string(),
                is_binary: false,
            },
            ChunkFrame::ChunkedData {
                metadata: ChunkMetadata {
                    chunk_id: "m7:0".to_string(),
                    message_id: "m7".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    chunk_hash: chunk_hash(bytes),
                    is_final: true,
                },
                data: encode_chunk(bytes),
                encoding: "base64".to_string(),
            },
            ChunkFrame::ChunkedEnd {
                message_id: "m7".to_string(),
                total_chunks: 1,
            },
        ];

        for frame in &frames {
            assert_eq!(frame.message_id(), "m7");
        }
    }

    #[test]
    fn test_lifecycle_serialization() {
        let text = Frame::Lifecycle(LifecycleFrame::Ping).to_text().expect("serialize");
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_chunked_end_round_trip() {
        let frame = Frame::Chunk(ChunkFrame::ChunkedEnd {
            message_id: "m9".to_string(),
            total_chunks: 7,
        });
        let text = frame.to_text().expect("serialize");
        assert!(text.contains(r#""message_type":"chunked_end""#));

        match Frame::parse(&text).expect("parse") {
            Frame::Chunk(ChunkFrame::ChunkedEnd {
                message_id,
                total_chunks,
            }) => {
                assert_eq!(message_id, "m9");
                assert_eq!(total_chunks, 7);
            }
            other => panic!("expected chunked_end, got {other:?}"),
        }
    }
}
