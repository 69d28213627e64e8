//! Call session handle and its event loop.
//!
//! # Event Loop
//!
//! Building a session starts one tokio task that exclusively owns the
//! socket, the heartbeat timer, the reconnect timer and the outbound
//! buffer. It handles, one at a time:
//!
//! - Commands from [`CallSession`] handles (connect, send, disconnect)
//! - Audio frames, on their own small bounded queue
//! - Completion of a pending connection attempt
//! - Frames from the server
//! - Heartbeat and reconnect timers
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Connected
//!      ▲                          ▲                    │
//!      │                          │ timer        close │ (not requested)
//!      │                          │                    ▼
//!      └──── disconnect() ─── (any state) ◄──── Reconnecting
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Sleep, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{AuthToken, Role, SessionId};
use crate::protocol::{
    ClientMessage, ErrorPayload, InboundBody, InboundMessage, StreamType, encode_audio_frame,
    error_codes,
};
use crate::transport::{Frame, Socket};

use super::backoff::{ReconnectPolicy, ReconnectState};
use super::buffer::OutboundBuffer;
use super::config::{SessionBuilder, SessionConfig};
use super::events::{SessionEvent, SessionEvents};
use super::heartbeat::Heartbeat;

// ============================================================================
// Constants
// ============================================================================

/// How long a graceful close may take before the socket is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio frames waiting for the session task. Four 20ms frames; anything
/// older than that is dropped at the handle.
pub(crate) const AUDIO_QUEUE_CAPACITY: usize = 4;

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection status as seen by the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket and no retry pending.
    #[default]
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Socket open.
    Connected,
    /// Lost the socket; retrying until the next successful open.
    Reconnecting,
}

// ============================================================================
// Shared Status
// ============================================================================

/// Raw status published by the session task.
#[derive(Debug, Clone, Copy, Default)]
struct StatusSnapshot {
    /// Socket-level status; never `Reconnecting`.
    socket: ConnectionState,
    reconnect: ReconnectState,
    buffered: usize,
}

impl StatusSnapshot {
    /// `Reconnecting` wins over whatever the socket is doing.
    fn state(&self) -> ConnectionState {
        if self.reconnect.is_reconnecting {
            ConnectionState::Reconnecting
        } else {
            self.socket
        }
    }
}

/// State shared between handles and the task.
#[derive(Debug, Default)]
struct SharedStatus {
    snapshot: Mutex<StatusSnapshot>,
    /// Set by `disconnect()` before the task sees the command.
    closing: AtomicBool,
}

impl SharedStatus {
    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        f(&mut self.snapshot.lock());
    }

    fn snapshot(&self) -> StatusSnapshot {
        *self.snapshot.lock()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Where to connect.
#[derive(Debug, Clone)]
struct ConnectTarget {
    session_id: SessionId,
    role: Role,
    token: AuthToken,
}

/// Internal commands for the event loop.
enum SessionCommand {
    /// Open a socket unless one is open or opening.
    Connect(ConnectTarget),
    /// Send or buffer a control message.
    Send(ClientMessage),
    /// Tear everything down.
    Disconnect,
}

// ============================================================================
// CallSession
// ============================================================================

/// Handle to one live call connection.
///
/// Cheap to clone; all clones drive the same session task. The task shuts
/// down once every handle is dropped.
///
/// Only one session should exist per backend session ID at a time.
#[derive(Clone)]
pub struct CallSession {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Encoded audio frames. Bounded; full means the socket is behind.
    audio_tx: mpsc::Sender<Vec<u8>>,
    /// Status snapshot (shared with event loop).
    shared: Arc<SharedStatus>,
}

impl CallSession {
    /// Creates a new [`SessionBuilder`].
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Spawns the session task for a validated configuration.
    pub(crate) fn spawn(config: SessionConfig) -> (Self, SessionEvents) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
        let (event_tx, events) = SessionEvents::channel();
        let shared = Arc::new(SharedStatus::default());

        let task = SessionTask {
            heartbeat: Heartbeat::new(config.heartbeat_interval),
            policy: ReconnectPolicy::new(config.backoff),
            buffer: OutboundBuffer::new(config.buffer_capacity),
            config,
            shared: Arc::clone(&shared),
            commands: command_rx,
            audio: audio_rx,
            events: event_tx,
            target: None,
            socket: None,
            connecting: None,
            reconnect_timer: None,
        };
        tokio::spawn(task.run());

        (
            Self {
                command_tx,
                audio_tx,
                shared,
            },
            events,
        )
    }

    /// Opens the connection for `session_id`.
    ///
    /// Does nothing while already connecting or connected. While
    /// reconnecting, skips the remaining backoff and connects now.
    pub fn connect(&self, session_id: impl Into<SessionId>, role: Role, token: impl Into<AuthToken>) {
        self.shared.closing.store(false, Ordering::SeqCst);
        self.dispatch(SessionCommand::Connect(ConnectTarget {
            session_id: session_id.into(),
            role,
            token: token.into(),
        }));
    }

    /// Sends a control message, buffering it while disconnected.
    pub fn send(&self, message: ClientMessage) {
        self.dispatch(SessionCommand::Send(message));
    }

    /// Sends PCM audio as a binary frame.
    ///
    /// Best effort: the frame is dropped if the socket is not open, if the
    /// socket cannot take it right away, or if frames are already waiting.
    /// Audio is never queued behind a stalled write.
    pub fn send_audio_frame(&self, stream_type: StreamType, samples: &[i16]) {
        if self.shared.snapshot().socket != ConnectionState::Connected {
            trace!("Not connected, dropping audio frame");
            return;
        }

        match self.audio_tx.try_send(encode_audio_frame(stream_type, samples)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Audio queue full, dropping frame"),
            Err(TrySendError::Closed(_)) => debug!("Session task is gone, audio frame ignored"),
        }
    }

    /// Closes the connection and cancels any pending retry.
    ///
    /// Takes effect immediately for timers; the socket closes shortly after
    /// on the session task. Buffered messages are discarded.
    pub fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.update(|s| {
            s.socket = ConnectionState::Disconnected;
            s.reconnect = ReconnectState::default();
        });
        self.dispatch(SessionCommand::Disconnect);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot().state()
    }

    /// Current reconnection progress.
    #[must_use]
    pub fn reconnect_state(&self) -> ReconnectState {
        self.shared.snapshot().reconnect
    }

    /// Number of control messages waiting for the next open.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.snapshot().buffered
    }

    /// Returns `true` if the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn dispatch(&self, command: SessionCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("Session task is gone, command ignored");
        }
    }
}

// ============================================================================
// SessionTask
// ============================================================================

/// The event loop. Owns every piece of mutable session state.
struct SessionTask {
    config: SessionConfig,
    shared: Arc<SharedStatus>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    audio: mpsc::Receiver<Vec<u8>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    target: Option<ConnectTarget>,
    socket: Option<Socket>,
    connecting: Option<BoxFuture<'static, Result<Socket>>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Heartbeat,
    policy: ReconnectPolicy,
    buffer: OutboundBuffer,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All session handles dropped");
                        self.shared.closing.store(true, Ordering::SeqCst);
                        self.shutdown().await;
                        break;
                    }
                },

                Some(frame) = self.audio.recv() => {
                    self.send_audio(frame);
                }

                result = wait_connect(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    self.handle_connect_result(result).await;
                }

                frame = next_frame(&mut self.socket), if self.socket.is_some() => {
                    self.handle_frame(frame).await;
                }

                () = self.heartbeat.tick() => {
                    self.handle_heartbeat().await;
                }

                () = wait_timer(&mut self.reconnect_timer), if self.reconnect_timer.is_some() => {
                    self.reconnect_timer = None;
                    self.handle_reconnect_timer();
                }
            }

            let buffered = self.buffer.len();
            self.shared.update(|s| s.buffered = buffered);
        }

        debug!("Session task terminated");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect(target) => self.handle_connect(target),
            SessionCommand::Send(message) => self.send_control(message).await,
            SessionCommand::Disconnect => self.shutdown().await,
        }
    }

    fn handle_connect(&mut self, target: ConnectTarget) {
        if self.socket.is_some() || self.connecting.is_some() {
            debug!(session_id = %target.session_id, "Already connecting or connected");
            return;
        }

        if self.reconnect_timer.take().is_some() {
            debug!("Connect requested during backoff, retrying now");
        }

        self.target = Some(target);
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        let Some(target) = &self.target else {
            return;
        };

        let url = self.config.call_url(&target.session_id, target.role, &target.token);
        info!(
            session_id = %target.session_id,
            role = %target.role,
            attempt = self.policy.attempts(),
            "Connecting"
        );

        let connector = Arc::clone(&self.config.connector);
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
        self.shared.update(|s| s.socket = ConnectionState::Connecting);
    }

    async fn handle_connect_result(&mut self, result: Result<Socket>) {
        match result {
            Ok(mut socket) => {
                if self.shared.is_closing() {
                    debug!("Socket opened after disconnect, closing it");
                    close_gracefully(&mut socket).await;
                    return;
                }
                self.on_open(socket).await;
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                self.emit(SessionEvent::Error(ErrorPayload::new(
                    error_codes::CONNECT_FAILED,
                    e.to_string(),
                )));
                self.shared.update(|s| s.socket = ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    async fn on_open(&mut self, socket: Socket) {
        self.socket = Some(socket);
        self.policy.reset();
        self.shared.update(|s| {
            s.socket = ConnectionState::Connected;
            s.reconnect = ReconnectState::default();
        });
        self.heartbeat.start();

        info!("Connected");
        self.flush().await;

        // A failed flush already reported the close.
        if self.socket.is_some() {
            self.emit(SessionEvent::Connected);
        }
    }

    /// Tears down the connection. The closing flag is already set by the
    /// caller.
    async fn shutdown(&mut self) {
        self.reconnect_timer = None;
        self.connecting = None;
        self.heartbeat.stop();

        if let Some(mut socket) = self.socket.take() {
            close_gracefully(&mut socket).await;
        }

        let dropped = self.buffer.len();
        self.buffer.clear();
        self.policy.reset();
        self.shared.update(|s| *s = StatusSnapshot::default());

        info!(dropped_buffered = dropped, "Disconnected");
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Writes buffered messages in order through the normal send path.
    async fn flush(&mut self) {
        let pending = self.buffer.drain();
        if pending.is_empty() {
            return;
        }

        debug!(count = pending.len(), "Flushing buffered messages");
        for message in pending {
            self.send_control(message).await;
        }
    }

    async fn send_control(&mut self, message: ClientMessage) {
        let Some(socket) = self.socket.as_mut() else {
            self.buffer.enqueue(message);
            return;
        };

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, message_type = message.message_type.as_str(), "Failed to serialize message");
                return;
            }
        };

        let result = socket.sink.send(Frame::Text(json)).await;
        match result {
            Ok(()) => trace!(message_type = message.message_type.as_str(), "Message sent"),
            Err(e) => {
                warn!(error = %e, message_type = message.message_type.as_str(), "Send failed, buffering");
                self.buffer.enqueue(message);
                self.on_socket_closed();
            }
        }
    }

    /// Writes one audio frame only if the socket accepts it without
    /// waiting. A frame the sink has taken but not flushed yet goes out
    /// with the next write.
    fn send_audio(&mut self, frame: Vec<u8>) {
        let Some(socket) = self.socket.as_mut() else {
            trace!("Not connected, dropping audio frame");
            return;
        };

        match socket.sink.send(Frame::Binary(frame)).now_or_never() {
            Some(Ok(())) => {}
            None => trace!("Socket busy, dropping audio frame"),
            Some(Err(e)) => {
                debug!(error = %e, "Audio send failed, frame dropped");
                self.on_socket_closed();
            }
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    async fn handle_frame(&mut self, frame: Option<Result<Frame>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.handle_text(&text),
            Some(Ok(Frame::Binary(bytes))) => {
                trace!(len = bytes.len(), "Ignoring binary frame from server");
            }
            Some(Ok(Frame::Close)) => {
                debug!("Socket closed by server");
                self.on_socket_closed();
            }
            Some(Err(e)) => {
                error!(error = %e, "Socket error");
                self.emit(SessionEvent::Error(ErrorPayload::new(
                    error_codes::SOCKET_ERROR,
                    e.to_string(),
                )));
                if let Some(mut socket) = self.socket.take() {
                    close_gracefully(&mut socket).await;
                }
                self.on_socket_closed();
            }
            None => {
                debug!("Socket stream ended");
                self.on_socket_closed();
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        for result in InboundMessage::decode_batch(text) {
            match result {
                Ok(message) => self.handle_inbound(message),
                Err(Error::UnknownMessageType { message_type }) => {
                    debug!(message_type = %message_type, "Ignoring unknown message type");
                }
                Err(e) => warn!(error = %e, "Failed to parse inbound message"),
            }
        }
    }

    fn handle_inbound(&mut self, message: InboundMessage) {
        trace!(
            message_type = message.body.message_type().as_str(),
            session_id = %message.session_id,
            "Inbound message"
        );

        match &message.body {
            InboundBody::Pong => self.heartbeat.acknowledge(),
            InboundBody::Error(payload) => {
                warn!(code = %payload.code, detail = %payload.message, "Server reported error");
            }
            _ => {}
        }

        self.emit(message.body.into());
    }

    // ========================================================================
    // Timers
    // ========================================================================

    async fn handle_heartbeat(&mut self) {
        let unanswered = self.heartbeat.unanswered();
        if let Some(max) = self.config.max_missed_heartbeats
            && unanswered >= max
        {
            warn!(unanswered, "Heartbeats unanswered, forcing reconnect");
            if let Some(mut socket) = self.socket.take() {
                close_gracefully(&mut socket).await;
            }
            self.on_socket_closed();
            return;
        }

        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        let json = match ClientMessage::heartbeat().to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize heartbeat");
                return;
            }
        };

        let result = socket.sink.send(Frame::Text(json)).await;
        match result {
            Ok(()) => {
                self.heartbeat.record_beat();
                trace!(unanswered = self.heartbeat.unanswered(), "Heartbeat sent");
            }
            Err(e) => {
                debug!(error = %e, "Heartbeat send failed");
                self.on_socket_closed();
            }
        }
    }

    fn handle_reconnect_timer(&mut self) {
        if self.shared.is_closing() {
            debug!("Reconnect timer fired after disconnect");
            return;
        }
        self.begin_connect();
    }

    // ========================================================================
    // Close Handling
    // ========================================================================

    /// Bookkeeping after the socket is gone, for whatever reason.
    fn on_socket_closed(&mut self) {
        self.socket = None;
        self.heartbeat.stop();
        self.shared.update(|s| s.socket = ConnectionState::Disconnected);

        if self.shared.is_closing() {
            return;
        }

        self.emit(SessionEvent::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.shared.is_closing() || self.target.is_none() {
            return;
        }

        let delay = self.policy.next_delay();
        let attempt = self.policy.attempts();
        self.shared.update(|s| {
            s.reconnect = ReconnectState {
                attempts: attempt,
                is_reconnecting: true,
            };
        });

        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.emit(SessionEvent::Reconnecting {
            attempt,
            max_attempts: None,
        });
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

// ============================================================================
// Select Helpers
// ============================================================================

async fn wait_connect(connecting: &mut Option<BoxFuture<'static, Result<Socket>>>) -> Result<Socket> {
    match connecting {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<Frame>> {
    match socket {
        Some(socket) => socket.stream.next().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn close_gracefully(socket: &mut Socket) {
    match timeout(CLOSE_TIMEOUT, socket.sink.close()).await {
        Ok(Ok(())) => trace!("Socket closed"),
        Ok(Err(e)) => debug!(error = %e, "Error while closing socket"),
        Err(_) => debug!("Timed out closing socket"),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::protocol::ClientMessageType;
    use crate::transport::socket::mock::{MockConnector, MockPeer};

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn session_with(
        configure: impl FnOnce(SessionBuilder) -> SessionBuilder,
    ) -> (CallSession, SessionEvents, Arc<MockConnector>, UnboundedReceiver<MockPeer>) {
        let (connector, peers) = MockConnector::new();
        let builder = CallSession::builder()
            .base_url("https://app.example.com")
            .connector(connector.clone());
        let (session, events) = configure(builder).build().unwrap();
        (session, events, connector, peers)
    }

    fn session() -> (CallSession, SessionEvents, Arc<MockConnector>, UnboundedReceiver<MockPeer>) {
        session_with(|b| b)
    }

    fn connect(session: &CallSession) {
        session.connect("call-1", Role::Agent, "tok");
    }

    /// Lets the session task drain its queue.
    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    fn note(text: &str) -> ClientMessage {
        ClientMessage::new(ClientMessageType::AgentNote, json!({ "note": text }))
    }

    fn text_of(frame: Option<Frame>) -> Value {
        match frame {
            Some(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn envelope(message_type: &str, payload: Value) -> String {
        json!({ "type": message_type, "session_id": "call-1", "payload": payload }).to_string()
    }

    async fn expect_event(events: &mut SessionEvents) -> SessionEvent {
        events.recv().await.expect("event channel closed")
    }

    // ------------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_connect_opens_socket_with_call_url() {
        let (session, mut events, _connector, mut peers) = session();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        connect(&session);
        let peer = peers.recv().await.unwrap();

        assert_eq!(
            peer.url.as_str(),
            "wss://app.example.com/ws/call?session_id=call-1&token=tok&role=agent"
        );
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_while_connecting_opens_one_socket() {
        let (session, _events, connector, _peers) = session();
        connector.stall(true);

        connect(&session);
        connect(&session);
        settle().await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_is_noop() {
        let (session, mut events, connector, mut peers) = session();
        connect(&session);
        let _peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        connect(&session);
        settle().await;

        assert_eq!(connector.attempts(), 1);
        assert!(events.try_recv().is_none());
    }

    // ------------------------------------------------------------------------
    // Buffering
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_buffered_messages_flush_in_order() {
        let (session, mut events, _connector, mut peers) = session();

        session.send(note("A"));
        session.send(note("B"));
        session.send(note("C"));
        settle().await;
        assert_eq!(session.buffered(), 3);

        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        for expected in ["A", "B", "C"] {
            let frame = text_of(peer.next_frame().await);
            assert_eq!(frame["type"], "agent_note");
            assert_eq!(frame["payload"]["note"], expected);
        }
        assert!(peer.received.try_recv().is_err());
        settle().await;
        assert_eq!(session.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_keeps_first_hundred() {
        let (session, mut events, _connector, mut peers) = session();

        for n in 0..105 {
            session.send(note(&n.to_string()));
        }
        settle().await;
        assert_eq!(session.buffered(), 100);

        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        for n in 0..100 {
            let frame = text_of(peer.next_frame().await);
            assert_eq!(frame["payload"]["note"], n.to_string());
        }
        assert!(peer.received.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_connected_goes_straight_out() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        session.send(ClientMessage::generate_report("pdf"));
        let frame = text_of(peer.next_frame().await);

        assert_eq!(frame["type"], "generate_report");
        assert_eq!(frame["payload"]["format"], "pdf");
        assert_eq!(session.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_rebuffers_in_order() {
        let (session, mut events, connector, mut peers) = session();
        connector.kill_next(1);

        session.send(note("A"));
        session.send(note("B"));
        session.send(note("C"));
        connect(&session);

        assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
        assert_eq!(
            expect_event(&mut events).await,
            SessionEvent::Reconnecting {
                attempt: 1,
                max_attempts: None
            }
        );
        settle().await;
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        assert_eq!(session.buffered(), 3);

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
        for expected in ["A", "B", "C"] {
            assert_eq!(text_of(peer.next_frame().await)["payload"]["note"], expected);
        }
        assert_eq!(connector.attempts(), 2);
    }

    // ------------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_audio_dropped_while_disconnected() {
        let (session, _events, _connector, _peers) = session();

        session.send_audio_frame(StreamType::Agent, &[1, 2, 3]);
        settle().await;

        assert_eq!(session.buffered(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_sent_as_binary_frame() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        session.send_audio_frame(StreamType::Mixed, &[1, 2, 3, -4]);

        assert_eq!(
            peer.next_frame().await,
            Some(Frame::Binary(vec![1, 1, 0, 2, 0, 3, 0, 0xFC, 0xFF]))
        );
    }

    /// Sends `count` 20ms frames in real time.
    async fn stream_frames(session: &CallSession, count: usize) {
        for _ in 0..count {
            session.send_audio_frame(StreamType::Agent, &[0; 320]);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_dropped_while_socket_cannot_write() {
        let (session, mut events, connector, mut peers) = session();
        let gate = connector.gate_writes();
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        stream_frames(&session, 500).await;
        assert_eq!(session.state(), ConnectionState::Connected);

        gate.add_permits(1_000);
        session.send(note("after"));

        let mut audio = 0;
        loop {
            match peer.next_frame().await {
                Some(Frame::Binary(_)) => audio += 1,
                Some(Frame::Text(text)) => {
                    assert!(text.contains("after"));
                    break;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert!(audio <= 1, "{audio} stale audio frames delivered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_not_queued_behind_blocked_control_write() {
        let (session, mut events, connector, mut peers) = session();
        let gate = connector.gate_writes();
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        session.send(note("blocked"));
        settle().await;
        stream_frames(&session, 500).await;

        gate.add_permits(1_000);
        assert_eq!(text_of(peer.next_frame().await)["payload"]["note"], "blocked");
        settle().await;

        let mut audio = 0;
        while let Ok(frame) = peer.received.try_recv() {
            assert!(matches!(frame, Frame::Binary(_)), "unexpected frame {frame:?}");
            audio += 1;
        }
        assert!(audio <= AUDIO_QUEUE_CAPACITY, "{audio} stale audio frames delivered");
    }

    // ------------------------------------------------------------------------
    // Reconnect
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_server_close_triggers_reconnect() {
        let (session, mut events, connector, mut peers) = session();
        connect(&session);
        let peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        drop(peer);

        assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
        assert_eq!(
            expect_event(&mut events).await,
            SessionEvent::Reconnecting {
                attempt: 1,
                max_attempts: None
            }
        );
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        assert_eq!(
            session.reconnect_state(),
            ReconnectState {
                attempts: 1,
                is_reconnecting: true
            }
        );

        let _peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.reconnect_state(), ReconnectState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_keep_counting() {
        let (session, mut events, connector, _peers) = session();
        connector.refuse(true);
        connect(&session);

        let mut attempts = Vec::new();
        while attempts.len() < 3 {
            match expect_event(&mut events).await {
                SessionEvent::Reconnecting { attempt, max_attempts } => {
                    assert_eq!(max_attempts, None);
                    attempts.push(attempt);
                }
                SessionEvent::Error(payload) => assert_eq!(payload.code, error_codes::CONNECT_FAILED),
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(session.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (session, mut events, connector, _peers) = session();
        connector.refuse(true);
        connect(&session);

        loop {
            if let SessionEvent::Reconnecting { .. } = expect_event(&mut events).await {
                break;
            }
        }
        assert_eq!(connector.attempts(), 1);

        session.disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_during_backoff_retries_now() {
        let (session, mut events, connector, mut peers) = session();
        connector.refuse(true);
        connect(&session);
        loop {
            if let SessionEvent::Reconnecting { .. } = expect_event(&mut events).await {
                break;
            }
        }

        connector.refuse(false);
        connect(&session);
        let _peer = peers.recv().await.unwrap();

        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_socket_without_reconnect() {
        let (session, mut events, connector, mut peers) = session();
        session.send(note("first"));
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(text_of(peer.next_frame().await)["payload"]["note"], "first");

        session.send(note("late"));
        session.disconnect();
        settle().await;

        // The socket is dropped once closed.
        assert_eq!(text_of(peer.next_frame().await)["payload"]["note"], "late");
        assert_eq!(peer.next_frame().await, None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(events.try_recv().is_none());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_task() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        drop(session);

        assert_eq!(peer.next_frame().await, None);
        assert_eq!(events.recv().await, None);
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_inbound_messages_become_events() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        let batch = format!(
            "{}\n{}",
            envelope("transcript", json!({ "speaker": "prospect", "text": "hello" })),
            envelope("qualification_update", json!({ "decision_power": true })),
        );
        peer.send_text(batch);

        let SessionEvent::Transcript(transcript) = expect_event(&mut events).await else {
            panic!("expected transcript");
        };
        assert_eq!(transcript.text, "hello");

        let SessionEvent::QualificationUpdate(update) = expect_event(&mut events).await else {
            panic!("expected qualification update");
        };
        assert_eq!(update.decision_power, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_unknown_messages_are_skipped() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        peer.send_text("not json at all");
        peer.send_text(envelope("report_ready", json!({})));
        peer.send_text(envelope("pong", Value::Null));

        assert_eq!(expect_event(&mut events).await, SessionEvent::Pong);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_keeps_connection() {
        let (session, mut events, connector, mut peers) = session();
        connect(&session);
        let peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        peer.send_text(envelope("error", json!({ "code": "RATE_LIMIT", "message": "slow down" })));

        assert_eq!(
            expect_event(&mut events).await,
            SessionEvent::Error(ErrorPayload::new("RATE_LIMIT", "slow down"))
        );
        settle().await;
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_error_reports_and_reconnects() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        peer.outgoing.send(Err(Error::connection("reset by peer"))).unwrap();

        let SessionEvent::Error(payload) = expect_event(&mut events).await else {
            panic!("expected error");
        };
        assert_eq!(payload.code, error_codes::SOCKET_ERROR);
        assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
        assert!(matches!(
            expect_event(&mut events).await,
            SessionEvent::Reconnecting { attempt: 1, .. }
        ));
    }

    // ------------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sent_every_period() {
        let (session, mut events, _connector, mut peers) = session();
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        let started = tokio::time::Instant::now();
        let frame = text_of(peer.next_frame().await);

        assert_eq!(frame["type"], "heartbeat");
        assert!(frame["payload"]["timestamp"].is_string());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));

        // Without enforcement, unanswered beats never close the socket.
        for _ in 0..4 {
            assert_eq!(text_of(peer.next_frame().await)["type"], "heartbeat");
        }
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_force_reconnect_when_enabled() {
        let (session, mut events, _connector, mut peers) =
            session_with(|b| b.max_missed_heartbeats(2));
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        assert_eq!(text_of(peer.next_frame().await)["type"], "heartbeat");
        assert_eq!(text_of(peer.next_frame().await)["type"], "heartbeat");
        assert_eq!(peer.next_frame().await, None);

        assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
        assert!(matches!(
            expect_event(&mut events).await,
            SessionEvent::Reconnecting { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_missed_heartbeats() {
        let (session, mut events, _connector, mut peers) =
            session_with(|b| b.max_missed_heartbeats(1));
        connect(&session);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

        for _ in 0..3 {
            assert_eq!(text_of(peer.next_frame().await)["type"], "heartbeat");
            peer.send_text(envelope("pong", Value::Null));
            assert_eq!(expect_event(&mut events).await, SessionEvent::Pong);
        }
        assert_eq!(session.state(), ConnectionState::Connected);
    }
}
