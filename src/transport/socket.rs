//! Socket abstraction between the session and the WebSocket library.
//!
//! The session only sees [`Frame`]s flowing through a boxed sink and
//! stream. [`WsConnector`] produces them from a real `tokio-tungstenite`
//! connection; tests plug in an in-memory connector instead.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::future::ready;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Frame
// ============================================================================

/// One WebSocket data frame as the session sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame (JSON control traffic).
    Text(String),
    /// Binary frame (audio).
    Binary(Vec<u8>),
    /// Close handshake.
    Close,
}

impl Frame {
    /// Converts a tungstenite message. Ping/pong control frames yield `None`
    /// since tungstenite answers them itself.
    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            Message::Binary(bytes) => Some(Self::Binary(bytes.to_vec())),
            Message::Close(_) => Some(Self::Close),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Close => Message::Close(None),
        }
    }
}

// ============================================================================
// Socket
// ============================================================================

/// Write half of a socket.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// Read half of a socket. Ends (`None`) when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An open socket split into its two halves.
pub struct Socket {
    /// Outgoing frames.
    pub sink: FrameSink,
    /// Incoming frames.
    pub stream: FrameStream,
}

impl Socket {
    /// Bundles a sink and a stream.
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Frame, Error = Error> + Send + 'static,
        R: Stream<Item = Result<Frame>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens sockets for a session.
///
/// Each call must produce a fresh socket; the session never reuses one
/// after it closes.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a socket to `url`.
    ///
    /// # Errors
    ///
    /// Any error means the attempt failed and the session will schedule a
    /// retry.
    async fn connect(&self, url: &Url) -> Result<Socket>;
}

// ============================================================================
// WsConnector
// ============================================================================

/// Production connector backed by `tokio-tungstenite`.
///
/// `wss://` URLs need the `native-tls` crate feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Socket> {
        let (ws_stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        debug!(status = %response.status(), host = ?url.host_str(), "WebSocket handshake completed");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(Error::from)
            .with(|frame: Frame| ready(Ok::<Message, Error>(frame.into())));

        let stream = read.filter_map(|message| {
            ready(match message {
                Ok(message) => Frame::from_message(message).map(Ok),
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Ok(Socket::new(sink, stream))
    }
}

// ============================================================================
// In-memory connector (tests)
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
