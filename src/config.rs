//! Transport configuration.
//!
//! [`TransportSettings`] is a plain struct with public fields and a
//! [`Default`] implementation. A [`Transport`](crate::Transport) takes the
//! settings by value and freezes them, so nothing the caller does afterwards
//! can affect exchanges already running or started later.
//!
//! # Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `connection_attempts` | 2 | attempts the retry layer may make per replica |
//! | `connect_timeout` | 750 ms | per-attempt handshake cap when the caller passes none |
//! | `idle_timeout` | 2 min | pooled connection idle limit |
//! | `connection_lifetime` | none | pooled connection lifetime limit |
//! | `request_abort_timeout` | 250 ms | grace period for the abort wait |
//! | `max_connections_per_endpoint` | 10000 | per-destination connection cap |
//! | `max_response_body_size` | none | hard cap for buffered bodies |
//! | `max_response_drain_size` | none | cap on bytes discarded when abandoning a body |
//! | `use_response_streaming` | never | streaming decision predicate |
//! | `allow_auto_redirect` | false | let the engine follow redirects |
//! | `proxy` | none | proxy URL for all connections |
//! | `tcp_keep_alive_enabled` | false | enable TCP keep-alive probes |
//! | `arp_cache_warmup_enabled` | false | report peer addresses for warm-up |
//!
//! # Examples
//!
//! ```
//! use sockets_transport::config::{StreamingPredicate, TransportSettings};
//! use std::time::Duration;
//!
//! let settings = TransportSettings {
//!     max_response_body_size: Some(1024 * 1024),
//!     use_response_streaming: StreamingPredicate::new(|length| length.map_or(true, |l| l > 64 * 1024)),
//!     request_abort_timeout: Duration::from_millis(100),
//!     ..Default::default()
//! };
//! assert!(settings.validate().is_ok());
//! ```

use crate::error::{Result, TransportError};
use crate::tuning::SocketTuner;
use serde::Deserialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Decides, from the declared content length, whether a response body is
/// handed to the caller as a live stream.
#[derive(Clone)]
pub struct StreamingPredicate(Arc<dyn Fn(Option<u64>) -> bool + Send + Sync>);

impl StreamingPredicate {
    /// Wrap a predicate.
    pub fn new(predicate: impl Fn(Option<u64>) -> bool + Send + Sync + 'static) -> Self {
        StreamingPredicate(Arc::new(predicate))
    }

    /// Never stream.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Always stream.
    pub fn always() -> Self {
        Self::new(|_| true)
    }

    /// Stream bodies of unknown length or longer than `threshold` bytes.
    pub fn above(threshold: u64) -> Self {
        Self::new(move |length| length.map_or(true, |length| length > threshold))
    }

    /// Evaluate the predicate. A panic inside it is logged and means "do not stream".
    pub fn evaluate(&self, content_length: Option<u64>) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.0)(content_length))) {
            Ok(decision) => decision,
            Err(_) => {
                tracing::error!(
                    content_length = ?content_length,
                    "response streaming predicate panicked, buffering body instead"
                );
                false
            }
        }
    }
}

impl Default for StreamingPredicate {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for StreamingPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamingPredicate(..)")
    }
}

/// Immutable configuration snapshot for a transport.
#[derive(Clone)]
pub struct TransportSettings {
    /// Attempts per replica the calling retry layer may make. The transport
    /// itself always performs a single attempt per `send`.
    pub connection_attempts: u32,

    /// Handshake cap used when the caller passes no connect timeout.
    pub connect_timeout: Option<Duration>,

    /// How long a pooled connection may sit idle before it is closed.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a pooled connection.
    pub connection_lifetime: Option<Duration>,

    /// Grace period the transport waits for a timed-out exchange to unwind.
    pub request_abort_timeout: Duration,

    /// Cap on concurrent exchanges to one destination. Further sends wait for
    /// a slot; a streamed response keeps its slot until it is released.
    pub max_connections_per_endpoint: usize,

    /// Hard cap on a buffered response body.
    pub max_response_body_size: Option<u64>,

    /// Cap on bytes read and discarded when abandoning a response body.
    pub max_response_drain_size: Option<u64>,

    /// Streaming decision predicate over the declared content length.
    pub use_response_streaming: StreamingPredicate,

    /// Let the engine follow redirects.
    pub allow_auto_redirect: bool,

    /// Proxy URL used for every connection.
    pub proxy: Option<String>,

    /// Accept TLS certificates that fail validation.
    pub accept_invalid_certs: bool,

    /// Enable TCP keep-alive probes on new connections.
    pub tcp_keep_alive_enabled: bool,

    /// Idle time before the first keep-alive probe.
    pub tcp_keep_alive_time: Duration,

    /// Interval between keep-alive probes.
    pub tcp_keep_alive_interval: Duration,

    /// Report peer addresses to the ARP warm-up tuner.
    pub arp_cache_warmup_enabled: bool,

    /// Extra post-connect tuning hook.
    pub tuner: Option<Arc<dyn SocketTuner>>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            connection_attempts: 2,
            connect_timeout: Some(Duration::from_millis(750)),
            idle_timeout: Duration::from_secs(120),
            connection_lifetime: None,
            request_abort_timeout: Duration::from_millis(250),
            max_connections_per_endpoint: 10_000,
            max_response_body_size: None,
            max_response_drain_size: None,
            use_response_streaming: StreamingPredicate::never(),
            allow_auto_redirect: false,
            proxy: None,
            accept_invalid_certs: false,
            tcp_keep_alive_enabled: false,
            tcp_keep_alive_time: Duration::from_secs(3),
            tcp_keep_alive_interval: Duration::from_secs(1),
            arp_cache_warmup_enabled: false,
            tuner: None,
        }
    }
}

impl TransportSettings {
    /// Check the settings for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] for a zero connection cap or
    /// an unparsable proxy URL.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections_per_endpoint == 0 {
            return Err(TransportError::InvalidConfig(
                "max_connections_per_endpoint must be positive".into(),
            ));
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy).map_err(|e| {
                TransportError::InvalidConfig(format!("invalid proxy url '{}': {}", proxy, e))
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("connection_attempts", &self.connection_attempts)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("connection_lifetime", &self.connection_lifetime)
            .field("request_abort_timeout", &self.request_abort_timeout)
            .field("max_connections_per_endpoint", &self.max_connections_per_endpoint)
            .field("max_response_body_size", &self.max_response_body_size)
            .field("max_response_drain_size", &self.max_response_drain_size)
            .field("allow_auto_redirect", &self.allow_auto_redirect)
            .field("proxy", &self.proxy)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("tcp_keep_alive_enabled", &self.tcp_keep_alive_enabled)
            .field("arp_cache_warmup_enabled", &self.arp_cache_warmup_enabled)
            .field("tuner", &self.tuner.is_some())
            .finish()
    }
}

/// Serializable subset of [`TransportSettings`], with durations in milliseconds.
///
/// Missing fields keep their defaults.
///
/// ```
/// use sockets_transport::config::SettingsFile;
///
/// let file = SettingsFile {
///     request_abort_timeout_ms: Some(100),
///     stream_responses_above: Some(4096),
///     ..Default::default()
/// };
/// let settings = file.into_settings().unwrap();
/// assert!(settings.use_response_streaming.evaluate(Some(8192)));
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    /// See [`TransportSettings::connection_attempts`].
    pub connection_attempts: Option<u32>,
    /// See [`TransportSettings::connect_timeout`].
    pub connect_timeout_ms: Option<u64>,
    /// See [`TransportSettings::idle_timeout`].
    pub idle_timeout_ms: Option<u64>,
    /// See [`TransportSettings::connection_lifetime`].
    pub connection_lifetime_ms: Option<u64>,
    /// See [`TransportSettings::request_abort_timeout`].
    pub request_abort_timeout_ms: Option<u64>,
    /// See [`TransportSettings::max_connections_per_endpoint`].
    pub max_connections_per_endpoint: Option<usize>,
    /// See [`TransportSettings::max_response_body_size`].
    pub max_response_body_size: Option<u64>,
    /// See [`TransportSettings::max_response_drain_size`].
    pub max_response_drain_size: Option<u64>,
    /// Stream bodies of unknown length or longer than this many bytes.
    pub stream_responses_above: Option<u64>,
    /// See [`TransportSettings::allow_auto_redirect`].
    pub allow_auto_redirect: Option<bool>,
    /// See [`TransportSettings::proxy`].
    pub proxy_url: Option<String>,
    /// See [`TransportSettings::accept_invalid_certs`].
    pub accept_invalid_certs: Option<bool>,
    /// See [`TransportSettings::tcp_keep_alive_enabled`].
    pub tcp_keep_alive_enabled: Option<bool>,
    /// See [`TransportSettings::tcp_keep_alive_time`].
    pub tcp_keep_alive_time_ms: Option<u64>,
    /// See [`TransportSettings::tcp_keep_alive_interval`].
    pub tcp_keep_alive_interval_ms: Option<u64>,
    /// See [`TransportSettings::arp_cache_warmup_enabled`].
    pub arp_cache_warmup_enabled: Option<bool>,
}

impl SettingsFile {
    /// Overlay the file onto the default settings and validate the result.
    ///
    /// # Errors
    ///
    /// Propagates [`TransportSettings::validate`] failures.
    pub fn into_settings(self) -> Result<TransportSettings> {
        let defaults = TransportSettings::default();
        let ms = Duration::from_millis;

        let settings = TransportSettings {
            connection_attempts: self.connection_attempts.unwrap_or(defaults.connection_attempts),
            connect_timeout: self.connect_timeout_ms.map(ms).or(defaults.connect_timeout),
            idle_timeout: self.idle_timeout_ms.map_or(defaults.idle_timeout, ms),
            connection_lifetime: self.connection_lifetime_ms.map(ms),
            request_abort_timeout: self
                .request_abort_timeout_ms
                .map_or(defaults.request_abort_timeout, ms),
            max_connections_per_endpoint: self
                .max_connections_per_endpoint
                .unwrap_or(defaults.max_connections_per_endpoint),
            max_response_body_size: self.max_response_body_size,
            max_response_drain_size: self.max_response_drain_size,
            use_response_streaming: self
                .stream_responses_above
                .map_or_else(StreamingPredicate::never, StreamingPredicate::above),
            allow_auto_redirect: self.allow_auto_redirect.unwrap_or(defaults.allow_auto_redirect),
            proxy: self.proxy_url,
            accept_invalid_certs: self
                .accept_invalid_certs
                .unwrap_or(defaults.accept_invalid_certs),
            tcp_keep_alive_enabled: self
                .tcp_keep_alive_enabled
                .unwrap_or(defaults.tcp_keep_alive_enabled),
            tcp_keep_alive_time: self
                .tcp_keep_alive_time_ms
                .map_or(defaults.tcp_keep_alive_time, ms),
            tcp_keep_alive_interval: self
                .tcp_keep_alive_interval_ms
                .map_or(defaults.tcp_keep_alive_interval, ms),
            arp_cache_warmup_enabled: self
                .arp_cache_warmup_enabled
                .unwrap_or(defaults.arp_cache_warmup_enabled),
            tuner: None,
        };

        settings.validate()?;
        Ok(settings)
    }
}
