//! Session configuration and builder.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use outlet_realtime::CallSession;
//!
//! # async fn example() -> outlet_realtime::Result<()> {
//! let (session, events) = CallSession::builder()
//!     .base_url("https://app.example.com")
//!     .heartbeat_interval(Duration::from_secs(15))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{AuthToken, Role, SessionId};
use crate::transport::{Connector, WsConnector};

use super::backoff::BackoffConfig;
use super::buffer::DEFAULT_BUFFER_CAPACITY;
use super::call::CallSession;
use super::events::SessionEvents;
use super::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;

// ============================================================================
// Constants
// ============================================================================

/// Path of the live call endpoint.
pub const CALL_PATH: &str = "/ws/call";

// ============================================================================
// SessionConfig
// ============================================================================

/// Validated session settings.
#[derive(Clone)]
pub struct SessionConfig {
    /// `ws`/`wss` URL of the call endpoint, without query.
    pub endpoint: Url,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// Messages held while disconnected.
    pub buffer_capacity: usize,
    /// Retry timing.
    pub backoff: BackoffConfig,
    /// Force a reconnect after this many unanswered heartbeats.
    /// `None` never does.
    pub max_missed_heartbeats: Option<u32>,
    /// Socket factory.
    pub connector: Arc<dyn Connector>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("backoff", &self.backoff)
            .field("max_missed_heartbeats", &self.max_missed_heartbeats)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Builds the connection URL for one call.
    ///
    /// Format: `{ws|wss}://{host}/ws/call?session_id=..&token=..&role=..`
    #[must_use]
    pub fn call_url(&self, session_id: &SessionId, role: Role, token: &AuthToken) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("session_id", session_id.as_str())
            .append_pair("token", token.expose())
            .append_pair("role", role.as_str());
        url
    }
}

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for a [`CallSession`].
///
/// Use [`CallSession::builder()`] to create one.
#[derive(Default, Clone)]
pub struct SessionBuilder {
    base_url: Option<String>,
    heartbeat_interval: Option<Duration>,
    buffer_capacity: Option<usize>,
    backoff: Option<BackoffConfig>,
    max_missed_heartbeats: Option<u32>,
    connector: Option<Arc<dyn Connector>>,
}

impl SessionBuilder {
    /// Creates a builder with defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page or API origin, e.g. `https://app.example.com`.
    ///
    /// `https` and `wss` select `wss`; `http` and `ws` select `ws`.
    #[inline]
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the heartbeat period (default 30s).
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Sets how many control messages are held while disconnected
    /// (default 100).
    #[inline]
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Sets retry timing.
    #[inline]
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Forces a reconnect after `count` heartbeats go unanswered.
    ///
    /// Off by default: liveness normally relies on the socket's own close.
    #[inline]
    #[must_use]
    pub fn max_missed_heartbeats(mut self, count: u32) -> Self {
        self.max_missed_heartbeats = Some(count);
        self
    }

    /// Replaces the default [`WsConnector`].
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validates the settings and spawns the session task.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the base URL is missing or unusable, or a
    /// numeric setting is out of range.
    pub fn build(self) -> Result<(CallSession, SessionEvents)> {
        let config = self.into_config()?;
        Ok(CallSession::spawn(config))
    }

    /// Validates the settings without spawning anything.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn into_config(self) -> Result<SessionConfig> {
        let endpoint = Self::validate_endpoint(self.base_url.as_deref())?;

        let heartbeat_interval = self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        if heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat_interval must be greater than zero"));
        }

        let buffer_capacity = self.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY);
        if buffer_capacity == 0 {
            return Err(Error::config("buffer_capacity must be greater than zero"));
        }

        let backoff = self.backoff.unwrap_or_default();
        if backoff.base.is_zero() || backoff.base > backoff.max_delay {
            return Err(Error::config(format!(
                "backoff base ({:?}) must be non-zero and not exceed max_delay ({:?})",
                backoff.base, backoff.max_delay
            )));
        }

        if self.max_missed_heartbeats == Some(0) {
            return Err(Error::config("max_missed_heartbeats must be at least 1"));
        }

        Ok(SessionConfig {
            endpoint,
            heartbeat_interval,
            buffer_capacity,
            backoff,
            max_missed_heartbeats: self.max_missed_heartbeats,
            connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionBuilder {
    /// Turns the base URL into the `ws`/`wss` call endpoint.
    fn validate_endpoint(base_url: Option<&str>) -> Result<Url> {
        let raw = base_url.ok_or_else(|| {
            Error::config(
                "Base URL is required. Use .base_url() to set it.\n\
                 Example: CallSession::builder().base_url(\"https://app.example.com\")",
            )
        })?;

        let parsed = Url::parse(raw)?;
        let scheme = match parsed.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(Error::config(format!(
                    "Unsupported base URL scheme '{other}', expected http, https, ws or wss"
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::config(format!("Base URL has no host: {raw}")))?;

        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Url::parse(&format!("{scheme}://{authority}{CALL_PATH}"))?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> SessionConfig {
        SessionBuilder::new().base_url(base).into_config().unwrap()
    }

    #[test]
    fn test_https_selects_wss() {
        assert_eq!(config("https://app.example.com").endpoint.as_str(), "wss://app.example.com/ws/call");
    }

    #[test]
    fn test_http_selects_ws_and_keeps_port() {
        assert_eq!(config("http://localhost:8080/dashboard").endpoint.as_str(), "ws://localhost:8080/ws/call");
    }

    #[test]
    fn test_call_url_query() {
        let url = config("https://app.example.com").call_url(
            &SessionId::new("call 1"),
            Role::Prospect,
            &AuthToken::new("t&k"),
        );

        assert_eq!(
            url.as_str(),
            "wss://app.example.com/ws/call?session_id=call+1&token=t%26k&role=prospect"
        );
    }

    #[test]
    fn test_defaults() {
        let config = config("http://localhost");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.backoff, BackoffConfig::default());
        assert_eq!(config.max_missed_heartbeats, None);
    }

    #[test]
    fn test_missing_base_url() {
        let err = SessionBuilder::new().into_config().unwrap_err();
        assert!(err.to_string().contains("Base URL is required"));
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = SessionBuilder::new().base_url("ftp://host").into_config().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let err = SessionBuilder::new().base_url("::nope").into_config().unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_rejects_zero_values() {
        let base = SessionBuilder::new().base_url("http://localhost");

        assert!(base.clone().heartbeat_interval(Duration::ZERO).into_config().is_err());
        assert!(base.clone().buffer_capacity(0).into_config().is_err());
        assert!(base.clone().max_missed_heartbeats(0).into_config().is_err());
        assert!(
            base.backoff(BackoffConfig {
                base: Duration::from_secs(60),
                ..Default::default()
            })
            .into_config()
            .is_err()
        );
    }
}
