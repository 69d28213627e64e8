//! Session events and the optional callback adapter.
//!
//! The session reports everything through one ordered channel of
//! [`SessionEvent`]s. Applications that prefer per-type callbacks can wrap
//! that channel in [`SessionCallbacks`].

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{
    BlockerPayload, ErrorPayload, InboundBody, PhaseChangePayload, QualificationPayload,
    SuggestionPayload, TranscriptPayload,
};

// ============================================================================
// SessionEvent
// ============================================================================

/// Everything a session reports to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Socket opened and buffered messages were flushed.
    Connected,
    /// Socket closed without the application asking.
    Disconnected,
    /// A retry was scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// `None`: retries are unbounded.
        max_attempts: Option<u32>,
    },
    /// `transcript` from the server.
    Transcript(TranscriptPayload),
    /// `blocker` from the server.
    Blocker(BlockerPayload),
    /// `suggestion` from the server.
    Suggestion(SuggestionPayload),
    /// `analysis` from the server.
    Analysis(Value),
    /// `phase_change` from the server.
    PhaseChange(PhaseChangePayload),
    /// `qualification_update` from the server.
    QualificationUpdate(QualificationPayload),
    /// `pong` from the server.
    Pong,
    /// Server `error` message or a local socket failure.
    Error(ErrorPayload),
}

impl From<InboundBody> for SessionEvent {
    fn from(body: InboundBody) -> Self {
        match body {
            InboundBody::Transcript(p) => Self::Transcript(p),
            InboundBody::Blocker(p) => Self::Blocker(p),
            InboundBody::Suggestion(p) => Self::Suggestion(p),
            InboundBody::Analysis(p) => Self::Analysis(p),
            InboundBody::PhaseChange(p) => Self::PhaseChange(p),
            InboundBody::QualificationUpdate(p) => Self::QualificationUpdate(p),
            InboundBody::Pong => Self::Pong,
            InboundBody::Error(p) => Self::Error(p),
        }
    }
}

// ============================================================================
// SessionEvents
// ============================================================================

/// Receiving end of a session's events.
///
/// Ends once the session task has shut down and every event was read.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<SessionEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Returns an event if one is ready.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ============================================================================
// SessionCallbacks
// ============================================================================

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Per-event callbacks. All are optional.
#[derive(Default)]
pub struct SessionCallbacks {
    on_transcript: Option<Callback<TranscriptPayload>>,
    on_blocker: Option<Callback<BlockerPayload>>,
    on_suggestion: Option<Callback<SuggestionPayload>>,
    on_analysis: Option<Callback<Value>>,
    on_phase_change: Option<Callback<PhaseChangePayload>>,
    on_qualification_update: Option<Callback<QualificationPayload>>,
    on_pong: Option<Callback<()>>,
    on_error: Option<Callback<ErrorPayload>>,
    on_connected: Option<Callback<()>>,
    on_disconnected: Option<Callback<()>>,
    on_reconnecting: Option<Callback<(u32, Option<u32>)>>,
}

impl SessionCallbacks {
    /// Creates an empty callback set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `transcript` callback.
    #[must_use]
    pub fn on_transcript(mut self, f: impl Fn(TranscriptPayload) + Send + Sync + 'static) -> Self {
        self.on_transcript = Some(Box::new(f));
        self
    }

    /// Sets the `blocker` callback.
    #[must_use]
    pub fn on_blocker(mut self, f: impl Fn(BlockerPayload) + Send + Sync + 'static) -> Self {
        self.on_blocker = Some(Box::new(f));
        self
    }

    /// Sets the `suggestion` callback.
    #[must_use]
    pub fn on_suggestion(mut self, f: impl Fn(SuggestionPayload) + Send + Sync + 'static) -> Self {
        self.on_suggestion = Some(Box::new(f));
        self
    }

    /// Sets the `analysis` callback.
    #[must_use]
    pub fn on_analysis(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_analysis = Some(Box::new(f));
        self
    }

    /// Sets the `phase_change` callback.
    #[must_use]
    pub fn on_phase_change(mut self, f: impl Fn(PhaseChangePayload) + Send + Sync + 'static) -> Self {
        self.on_phase_change = Some(Box::new(f));
        self
    }

    /// Sets the `qualification_update` callback.
    #[must_use]
    pub fn on_qualification_update(
        mut self,
        f: impl Fn(QualificationPayload) + Send + Sync + 'static,
    ) -> Self {
        self.on_qualification_update = Some(Box::new(f));
        self
    }

    /// Sets the `pong` callback.
    #[must_use]
    pub fn on_pong(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_pong = Some(Box::new(move |()| f()));
        self
    }

    /// Sets the error callback (server `error` messages and socket errors).
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(ErrorPayload) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Sets the connected callback.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Box::new(move |()| f()));
        self
    }

    /// Sets the disconnected callback.
    #[must_use]
    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Box::new(move |()| f()));
        self
    }

    /// Sets the reconnecting callback, called with `(attempt, max_attempts)`.
    #[must_use]
    pub fn on_reconnecting(mut self, f: impl Fn(u32, Option<u32>) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Box::new(move |(attempt, max)| f(attempt, max)));
        self
    }

    /// Routes one event to its callback, if set.
    pub fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => call(&self.on_connected, ()),
            SessionEvent::Disconnected => call(&self.on_disconnected, ()),
            SessionEvent::Reconnecting {
                attempt,
                max_attempts,
            } => call(&self.on_reconnecting, (attempt, max_attempts)),
            SessionEvent::Transcript(p) => call(&self.on_transcript, p),
            SessionEvent::Blocker(p) => call(&self.on_blocker, p),
            SessionEvent::Suggestion(p) => call(&self.on_suggestion, p),
            SessionEvent::Analysis(p) => call(&self.on_analysis, p),
            SessionEvent::PhaseChange(p) => call(&self.on_phase_change, p),
            SessionEvent::QualificationUpdate(p) => call(&self.on_qualification_update, p),
            SessionEvent::Pong => call(&self.on_pong, ()),
            SessionEvent::Error(p) => call(&self.on_error, p),
        }
    }

    /// Spawns a task that dispatches every event from `events` in order.
    pub fn spawn(self, mut events: SessionEvents) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.dispatch(event);
            }
        })
    }
}

fn call<T>(callback: &Option<Callback<T>>, arg: T) {
    if let Some(f) = callback {
        f(arg);
    }
}

// ============================================================================
// Tests
// ============================================================================
