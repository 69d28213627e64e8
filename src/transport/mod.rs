//! WebSocket transport layer.
//!
//! This module hides the WebSocket library behind a small [`Connector`]
//! seam so the session state machine can be driven by a real network
//! socket or by an in-memory one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  CallSession    │         WebSocket            │  Live call      │
//! │  (session task) │◄────────────────────────────►│  service        │
//! │  Socket         │   wss://host/ws/call?...     │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `socket` | [`Frame`], [`Socket`], [`Connector`], [`WsConnector`] |

// ============================================================================
// Submodules
// ============================================================================

/// Socket abstraction and the tungstenite-backed connector.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use socket::{Connector, Frame, FrameSink, FrameStream, Socket, WsConnector};
