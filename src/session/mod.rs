//! Call session: connection lifecycle, buffering, heartbeat and retries.
//!
//! # Architecture
//!
//! ```text
//! CallSession (handle, Clone) ──commands──► session task ──events──► SessionEvents
//!                                            │  Socket
//!                                            │  Heartbeat
//!                                            │  ReconnectPolicy
//!                                            │  OutboundBuffer
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Exponential backoff with jitter |
//! | `buffer` | Bounded FIFO of control messages held while offline |
//! | `call` | [`CallSession`] handle and the event loop |
//! | `config` | [`SessionBuilder`] and validated [`SessionConfig`] |
//! | `events` | [`SessionEvent`] stream and [`SessionCallbacks`] |
//! | `heartbeat` | Fixed-period liveness timer |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect timing.
pub mod backoff;

/// Offline message buffer.
pub mod buffer;

/// Session handle and event loop.
pub mod call;

/// Builder and configuration.
pub mod config;

/// Events and callbacks.
pub mod events;

/// Heartbeat timer.
pub mod heartbeat;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{BackoffConfig, ReconnectPolicy, ReconnectState};
pub use buffer::{DEFAULT_BUFFER_CAPACITY, OutboundBuffer};
pub use call::{CallSession, ConnectionState};
pub use config::{CALL_PATH, SessionBuilder, SessionConfig};
pub use events::{SessionCallbacks, SessionEvent, SessionEvents};
pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, Heartbeat};
