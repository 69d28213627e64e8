//! Client → server control messages.
//!
//! # Format
//!
//! ```json
//! { "type": "agent_note", "payload": { "note": "...", "timestamp": "..." } }
//! ```
//!
//! The `type` string is the only dispatch key; there is no envelope
//! version.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

use super::audio::SAMPLE_RATE;

// ============================================================================
// ClientMessageType
// ============================================================================

/// Closed set of outbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessageType {
    /// JSON-wrapped audio. Superseded by binary frames.
    AudioChunk,
    /// Client-side transcript segment.
    Transcript,
    /// Free-form note from the agent.
    AgentNote,
    /// Ask the backend to produce the call report.
    GenerateReport,
    /// Liveness ping.
    Heartbeat,
}

impl ClientMessageType {
    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AudioChunk => "audio_chunk",
            Self::Transcript => "transcript",
            Self::AgentNote => "agent_note",
            Self::GenerateReport => "generate_report",
            Self::Heartbeat => "heartbeat",
        }
    }
}

// ============================================================================
// ClientMessage
// ============================================================================

/// An outbound control message.
///
/// The payload is kept as JSON so the buffer can hold any message type
/// without knowing its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Dispatch key.
    #[serde(rename = "type")]
    pub message_type: ClientMessageType,

    /// Type-specific body.
    pub payload: Value,
}

impl ClientMessage {
    /// Creates a message from an already-built JSON payload.
    #[inline]
    #[must_use]
    pub fn new(message_type: ClientMessageType, payload: Value) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Creates a message from any serializable payload.
    ///
    /// # Errors
    ///
    /// [`Error::Json`](crate::Error::Json) if the payload does not serialize.
    pub fn with_payload<T: Serialize>(message_type: ClientMessageType, payload: &T) -> Result<Self> {
        Ok(Self::new(message_type, serde_json::to_value(payload)?))
    }

    /// Agent note stamped with the current time.
    #[must_use]
    pub fn agent_note(note: impl Into<String>) -> Self {
        let payload = AgentNotePayload {
            note: note.into(),
            timestamp: now_rfc3339(),
        };
        Self::new(ClientMessageType::AgentNote, to_value(&payload))
    }

    /// Report generation request (`pdf`, `docx`, ...).
    #[must_use]
    pub fn generate_report(format: impl Into<String>) -> Self {
        let payload = GenerateReportPayload {
            format: format.into(),
        };
        Self::new(ClientMessageType::GenerateReport, to_value(&payload))
    }

    /// Heartbeat stamped with the current time.
    #[must_use]
    pub fn heartbeat() -> Self {
        let payload = HeartbeatPayload {
            timestamp: now_rfc3339(),
        };
        Self::new(ClientMessageType::Heartbeat, to_value(&payload))
    }

    /// Client-produced transcript segment.
    #[must_use]
    pub fn transcript(payload: Value) -> Self {
        Self::new(ClientMessageType::Transcript, payload)
    }

    /// Legacy JSON audio chunk.
    #[must_use]
    pub fn audio_chunk(payload: &AudioChunkPayload) -> Self {
        Self::new(ClientMessageType::AudioChunk, to_value(payload))
    }

    /// Serializes to the JSON text sent on the socket.
    ///
    /// # Errors
    ///
    /// [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// The payload structs below only hold strings and integers.
fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|e| {
        warn!(error = %e, "Payload failed to serialize, sending null");
        Value::Null
    })
}

/// Current UTC time in the RFC 3339 form the backend expects.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Payloads
// ============================================================================

/// `agent_note` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentNotePayload {
    /// Note text.
    pub note: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

/// `generate_report` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateReportPayload {
    /// Output format, e.g. `pdf`.
    pub format: String,
}

/// `heartbeat` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// RFC 3339 send time.
    pub timestamp: String,
}

/// `audio_chunk` payload (legacy JSON audio path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunkPayload {
    /// Base64 of the raw audio bytes.
    pub data: String,
    /// Container or sample format name.
    pub format: String,
    /// Samples per second.
    pub sample_rate: u32,
    /// Monotonic chunk counter.
    pub sequence: u64,
}

impl AudioChunkPayload {
    /// Wraps 16 kHz PCM samples as a base64 `pcm_s16le` chunk.
    #[must_use]
    pub fn from_pcm(samples: &[i16], sequence: u64) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            data: STANDARD.encode(bytes),
            format: "pcm_s16le".to_string(),
            sample_rate: SAMPLE_RATE,
            sequence,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
