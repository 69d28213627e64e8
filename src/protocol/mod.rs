//! Wire message types for the live call socket.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Encoding |
//! |---------|-----------|----------|
//! | [`ClientMessage`] | Client → Server | JSON text frame |
//! | Audio frame | Client → Server | Binary frame, see [`audio`] |
//! | [`InboundMessage`] | Server → Client | JSON text frame, possibly newline-batched |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `audio` | Binary PCM framing |
//! | `inbound` | Server envelope and typed payloads |
//! | `outbound` | Client control messages |

// ============================================================================
// Submodules
// ============================================================================

/// Binary PCM framing.
pub mod audio;

/// Server → client messages.
pub mod inbound;

/// Client → server control messages.
pub mod outbound;

// ============================================================================
// Re-exports
// ============================================================================

pub use audio::{StreamType, decode_audio_frame, encode_audio_bytes, encode_audio_frame};
pub use inbound::{
    BlockerPayload, ErrorPayload, InboundBody, InboundMessage, PhaseChangePayload, Priority,
    QualificationPayload, ServerMessageType, Severity, SuggestionPayload, TranscriptPayload,
    error_codes,
};
pub use outbound::{
    AgentNotePayload, AudioChunkPayload, ClientMessage, ClientMessageType, GenerateReportPayload,
    HeartbeatPayload,
};
