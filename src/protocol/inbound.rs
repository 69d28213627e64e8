//! Server → client messages.
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "transcript",
//!   "session_id": "call-42",
//!   "payload": { ... },
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! # Message Types
//!
//! | `type` | Payload |
//! |--------|---------|
//! | `transcript` | [`TranscriptPayload`] |
//! | `blocker` | [`BlockerPayload`] |
//! | `suggestion` | [`SuggestionPayload`] |
//! | `analysis` | opaque JSON |
//! | `phase_change` | [`PhaseChangePayload`] |
//! | `qualification_update` | [`QualificationPayload`] |
//! | `pong` | none |
//! | `error` | [`ErrorPayload`] |

// ============================================================================
// Imports
// ============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// ServerMessageType
// ============================================================================

/// Closed set of inbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageType {
    /// Transcript segment.
    Transcript,
    /// Detected blocker pattern.
    Blocker,
    /// Coaching suggestion.
    Suggestion,
    /// Readiness analysis update.
    Analysis,
    /// Call phase transition.
    PhaseChange,
    /// Qualification status change.
    QualificationUpdate,
    /// Heartbeat acknowledgement.
    Pong,
    /// Server-side error report.
    Error,
}

impl ServerMessageType {
    /// Every variant, in wire order.
    pub const ALL: [Self; 8] = [
        Self::Transcript,
        Self::Blocker,
        Self::Suggestion,
        Self::Analysis,
        Self::PhaseChange,
        Self::QualificationUpdate,
        Self::Pong,
        Self::Error,
    ];

    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transcript => "transcript",
            Self::Blocker => "blocker",
            Self::Suggestion => "suggestion",
            Self::Analysis => "analysis",
            Self::PhaseChange => "phase_change",
            Self::QualificationUpdate => "qualification_update",
            Self::Pong => "pong",
            Self::Error => "error",
        }
    }
}

impl FromStr for ServerMessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::unknown_message_type(s))
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Raw envelope before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<String>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Session the server attributes this message to.
    pub session_id: String,
    /// Server send time, when provided.
    pub timestamp: Option<String>,
    /// Typed body.
    pub body: InboundBody,
}

/// Typed payload of an [`InboundMessage`], one variant per
/// [`ServerMessageType`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    /// `transcript`
    Transcript(TranscriptPayload),
    /// `blocker`
    Blocker(BlockerPayload),
    /// `suggestion`
    Suggestion(SuggestionPayload),
    /// `analysis`
    Analysis(Value),
    /// `phase_change`
    PhaseChange(PhaseChangePayload),
    /// `qualification_update`
    QualificationUpdate(QualificationPayload),
    /// `pong`
    Pong,
    /// `error`
    Error(ErrorPayload),
}

impl InboundBody {
    /// Returns the wire type of this body.
    #[must_use]
    pub const fn message_type(&self) -> ServerMessageType {
        match self {
            Self::Transcript(_) => ServerMessageType::Transcript,
            Self::Blocker(_) => ServerMessageType::Blocker,
            Self::Suggestion(_) => ServerMessageType::Suggestion,
            Self::Analysis(_) => ServerMessageType::Analysis,
            Self::PhaseChange(_) => ServerMessageType::PhaseChange,
            Self::QualificationUpdate(_) => ServerMessageType::QualificationUpdate,
            Self::Pong => ServerMessageType::Pong,
            Self::Error(_) => ServerMessageType::Error,
        }
    }
}

impl InboundMessage {
    /// Decodes one JSON message.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not a JSON envelope or the payload
    ///   does not match its type
    /// - [`Error::UnknownMessageType`] if `type` is outside the known set
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let message_type = envelope.message_type.parse::<ServerMessageType>()?;

        let payload = envelope.payload;
        let body = match message_type {
            ServerMessageType::Transcript => InboundBody::Transcript(serde_json::from_value(payload)?),
            ServerMessageType::Blocker => InboundBody::Blocker(serde_json::from_value(payload)?),
            ServerMessageType::Suggestion => InboundBody::Suggestion(serde_json::from_value(payload)?),
            ServerMessageType::Analysis => InboundBody::Analysis(payload),
            ServerMessageType::PhaseChange => InboundBody::PhaseChange(serde_json::from_value(payload)?),
            ServerMessageType::QualificationUpdate => {
                InboundBody::QualificationUpdate(serde_json::from_value(payload)?)
            }
            ServerMessageType::Pong => InboundBody::Pong,
            ServerMessageType::Error => InboundBody::Error(serde_json::from_value(payload)?),
        };

        Ok(Self {
            session_id: envelope.session_id,
            timestamp: envelope.timestamp,
            body,
        })
    }

    /// Decodes a text frame that may hold several newline-separated
    /// messages. Blank lines are skipped; each line fails independently.
    pub fn decode_batch(text: &str) -> impl Iterator<Item = Result<Self>> + '_ {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Self::decode)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Blocker severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Minor.
    Low,
    /// Worth addressing.
    Medium,
    /// Likely to stall the deal.
    High,
    /// Deal-breaking.
    Critical,
}

/// Suggestion priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Nice to have.
    Low,
    /// Should use.
    Medium,
    /// Use now.
    High,
}

/// `transcript` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptPayload {
    /// Speaker label (`agent`, `prospect`, ...).
    pub speaker: String,
    /// Recognized text.
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Segment start, seconds from call start.
    #[serde(default)]
    pub start_time: f64,
    /// Segment end, seconds from call start.
    #[serde(default)]
    pub end_time: f64,
    /// `false` for interim hypotheses.
    #[serde(default)]
    pub is_final: bool,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// `blocker` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockerPayload {
    /// Server-assigned ID.
    pub id: String,
    /// Blocker category.
    #[serde(rename = "type")]
    pub blocker_type: String,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable summary.
    pub description: String,
    /// Transcript evidence.
    #[serde(default)]
    pub evidence: String,
    /// Proposed remedy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    /// Detection confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Detection time.
    #[serde(default)]
    pub timestamp: String,
}

/// `suggestion` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionPayload {
    /// Server-assigned ID.
    pub id: String,
    /// Suggestion category.
    pub suggestion_type: String,
    /// Short title.
    pub title: String,
    /// Longer explanation.
    pub description: String,
    /// Literal wording to use, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Urgency.
    pub priority: Priority,
    /// Blocker this addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_blocker_id: Option<String>,
    /// Shown to the agent only.
    #[serde(default)]
    pub for_agent: bool,
    /// Creation time.
    #[serde(default)]
    pub timestamp: String,
}

/// `phase_change` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChangePayload {
    /// Phase just entered.
    pub current_phase: String,
    /// When the phase started.
    #[serde(default)]
    pub phase_start_time: f64,
    /// Seconds spent in the phase.
    #[serde(default)]
    pub time_in_phase: f64,
    /// Seconds since call start.
    #[serde(default)]
    pub total_call_duration: f64,
    /// Phases already finished.
    #[serde(default)]
    pub phases_completed: Vec<String>,
    /// Hint for what comes next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_phase_recommendation: Option<String>,
}

/// `qualification_update` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationPayload {
    /// Budget authority confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_authority: Option<bool>,
    /// Timeline urgency confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_urgency: Option<bool>,
    /// Decision power confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_power: Option<bool>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// `error` payload.
///
/// Also used for locally generated transport errors, with codes from
/// [`error_codes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Creates an error payload.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Codes for errors raised by the client itself.
pub mod error_codes {
    /// The socket reported an error.
    pub const SOCKET_ERROR: &str = "socket_error";
    /// A connection attempt failed before opening.
    pub const CONNECT_FAILED: &str = "connect_failed";
}

// ============================================================================
// Tests
// ============================================================================
