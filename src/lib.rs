//! Outlet Realtime - live call transport for the sales assistant backend.
//!
//! This library keeps one WebSocket connection per call alive and typed:
//! it streams microphone audio to the server, sends control messages, and
//! turns the server's analysis traffic into events.
//!
//! # Architecture
//!
//! - **Session task**: one tokio task per call owns the socket and timers
//! - **Handle**: [`CallSession`] is a cheap, cloneable command sender
//! - **Events**: everything the server or the transport reports arrives on
//!   one ordered [`SessionEvents`] stream
//!
//! Lost connections are retried with exponential backoff until the
//! application calls [`CallSession::disconnect`]. Control messages issued
//! while offline are held (up to 100) and flushed on the next open; audio
//! is never held.
//!
//! # Quick Start
//!
//! ```no_run
//! use outlet_realtime::{CallSession, ClientMessage, Result, Role, SessionEvent, StreamType};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (session, mut events) = CallSession::builder()
//!         .base_url("https://app.example.com")
//!         .build()?;
//!
//!     session.connect("call-42", Role::Agent, "secret-token");
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SessionEvent::Connected => {
//!                 session.send(ClientMessage::agent_note("Prospect sounds busy"));
//!                 session.send_audio_frame(StreamType::Agent, &[0; 320]);
//!             }
//!             SessionEvent::Suggestion(s) => println!("{}: {}", s.title, s.description),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session ID, auth token, role |
//! | [`protocol`] | Wire messages and audio framing |
//! | [`session`] | [`CallSession`], configuration, events |
//! | [`transport`] | Socket seam and the tungstenite connector |
//!
//! # Features
//!
//! - `native-tls`: enables `wss://` endpoints

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire message types.
///
/// JSON control messages in both directions plus binary audio frames.
pub mod protocol;

/// Session lifecycle.
///
/// Use [`CallSession::builder()`] to create a session.
pub mod session;

/// WebSocket transport layer.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    BackoffConfig, CallSession, ConnectionState, ReconnectState, SessionBuilder, SessionCallbacks,
    SessionConfig, SessionEvent, SessionEvents,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{AuthToken, Role, SessionId};

// Protocol types
pub use protocol::{
    BlockerPayload, ClientMessage, ClientMessageType, ErrorPayload, PhaseChangePayload, Priority,
    QualificationPayload, ServerMessageType, Severity, StreamType, SuggestionPayload,
    TranscriptPayload, decode_audio_frame, encode_audio_frame,
};

// Transport types
pub use transport::{Connector, WsConnector};
