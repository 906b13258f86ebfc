//! Transport entry point.
//!
//! [`Transport::send`] runs one exchange under an overall deadline:
//!
//! ```text
//! caller token already cancelled ──► Canceled
//! timeout below 1 ms ─────────────► RequestTimeout
//! otherwise:
//!     spawn sender ──┬── finishes first ──► its response
//!                    └── timer fires ─────► cancel exchange, RequestTimeout
//!                                           (abort wait continues detached)
//! ```
//!
//! When the timer wins, the caller gets `RequestTimeout` right away. A detached
//! task gives the cancelled exchange `request_abort_timeout` to unwind, disposes
//! whatever late response it produces, and logs a warning if it does not finish
//! in time.
//!
//! Dropping the future returned by `send` cancels the exchange too.
//!
//! # Examples
//!
//! ```no_run
//! use sockets_transport::{Request, Transport, TransportSettings};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn run() -> sockets_transport::Result<()> {
//! let transport = Transport::new(TransportSettings::default())?;
//! let request = Request::get(Url::parse("http://localhost:8080/ping").unwrap());
//! let response = transport
//!     .send(request, None, Duration::from_secs(5), CancellationToken::new())
//!     .await?;
//! println!("{}", response.code());
//! # Ok(())
//! # }
//! ```

use crate::cache::{ClientProvider, SharedEngineCache};
use crate::config::TransportSettings;
use crate::constants::MIN_TIMEOUT;
use crate::engine::{EngineFactory, ReqwestEngineFactory};
use crate::error::Result;
use crate::model::{Request, Response};
use crate::pool::BufferPool;
use crate::sender::{RequestSender, SendContext};
use crate::tuning::ArpCacheWarmer;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Single-attempt HTTP transport.
///
/// Cheap to share behind an `Arc`; every `send` is independent.
pub struct Transport {
    settings: Arc<TransportSettings>,
    sender: Arc<RequestSender>,
    pool: BufferPool,
    arp: Arc<ArpCacheWarmer>,
}

impl Transport {
    /// Create a transport over the default reqwest engine.
    ///
    /// Engines are shared with every other transport created this way whose
    /// connection settings match.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`](crate::TransportError::InvalidConfig)
    /// if the settings fail validation.
    pub fn new(settings: TransportSettings) -> Result<Self> {
        Self::with_shared_cache(
            settings,
            Arc::new(ReqwestEngineFactory),
            SharedEngineCache::global(),
        )
    }

    /// Create a transport over engines built by `factory`.
    ///
    /// The engines are cached privately, not shared with other transports.
    ///
    /// # Errors
    ///
    /// See [`Transport::new`].
    pub fn with_engine_factory(
        settings: TransportSettings,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        Self::with_shared_cache(settings, factory, SharedEngineCache::shared())
    }

    /// Create a transport over engines built by `factory` and cached in `shared`.
    ///
    /// # Errors
    ///
    /// See [`Transport::new`].
    pub fn with_shared_cache(
        settings: TransportSettings,
        factory: Arc<dyn EngineFactory>,
        shared: Arc<SharedEngineCache>,
    ) -> Result<Self> {
        settings.validate()?;

        let settings = Arc::new(settings);
        let pool = BufferPool::new();
        let arp = Arc::new(ArpCacheWarmer::default());
        let provider = ClientProvider::new(settings.clone(), factory, shared);
        let sender = RequestSender::new(settings.clone(), provider, pool.clone(), &arp);

        Ok(Transport {
            settings,
            sender: Arc::new(sender),
            pool,
            arp,
        })
    }

    /// Frozen settings of this transport.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Buffer pool shared by every exchange of this transport.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Peers recorded for ARP warm-up, when enabled.
    #[inline]
    #[must_use]
    pub fn arp_cache(&self) -> &Arc<ArpCacheWarmer> {
        &self.arp
    }

    /// Send `request` once.
    ///
    /// `connect_timeout` caps the handshake and falls back to the settings
    /// value when `None`. `timeout` caps the whole exchange. Cancelling
    /// `cancellation` ends the exchange with `Canceled`.
    ///
    /// # Errors
    ///
    /// Only [`TransportError::StreamAlreadyUsed`](crate::TransportError::StreamAlreadyUsed),
    /// when the request's stream body was already sent.
    pub async fn send(
        &self,
        request: Request,
        connect_timeout: Option<Duration>,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Result<Response> {
        if cancellation.is_cancelled() {
            return Ok(Response::canceled());
        }

        let target = request.authority();

        if timeout < MIN_TIMEOUT {
            tracing::error!(target = %target, timeout = ?timeout, "request timed out before it was sent");
            return Ok(Response::timeout());
        }

        let connect_timeout = connect_timeout.or(self.settings.connect_timeout);
        let exchange = cancellation.child_token();
        let mut context = SendContext::new(&request, connect_timeout, cancellation, exchange.clone());

        let sender = self.sender.clone();
        let mut task = tokio::spawn(async move { sender.send(&request, &mut context).await });

        // Cancels the exchange if this future is dropped before it resolves.
        let abandon = exchange.clone().drop_guard();

        let finished = tokio::select! {
            biased;
            joined = &mut task => Some(joined),
            _ = tokio::time::sleep(timeout) => None,
        };
        abandon.disarm();

        match finished {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                tracing::error!(target = %target, error = %e, "send task failed");
                Ok(Response::unknown_failure())
            }
            None => {
                exchange.cancel();
                tracing::error!(target = %target, timeout = ?timeout, "request timed out");

                let abort_timeout = self.settings.request_abort_timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(abort_timeout, task).await {
                        Ok(Ok(Ok(mut late))) => late.dispose(),
                        Ok(_) => {}
                        Err(_) => tracing::warn!(
                            target = %target,
                            "timed out request was aborted but did not complete in {:?}",
                            abort_timeout
                        ),
                    }
                });

                Ok(Response::timeout())
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("settings", &self.settings)
            .field("sender", &self.sender)
            .finish()
    }
}
