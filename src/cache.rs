//! Engine caching.
//!
//! Building an engine is expensive: each one owns a connection pool. Engines
//! are therefore cached at two levels:
//!
//! - a small per-transport cache keyed by the effective connect timeout, and
//! - a shared cache keyed by every setting that shapes connection behaviour
//!   ([`SettingsKey`]), so transports with identical settings reuse pools.
//!
//! Both are [`HandlerCache`]s: bounded maps that evict the least recently used
//! key once full. Construction is single-flight; concurrent first lookups of
//! the same key wait for one factory call.

use crate::config::TransportSettings;
use crate::constants::{LOCAL_CACHE_CAPACITY, SHARED_CACHE_CAPACITY};
use crate::engine::{EngineFactory, HttpEngine};
use crate::error::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::OnceCell;

/// TCP keep-alive parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeepAlive {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Interval between probes.
    pub interval: Duration,
}

/// Settings that determine how an engine opens and keeps connections.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SettingsKey {
    /// Handshake cap.
    pub connect_timeout: Option<Duration>,
    /// Pooled connection idle limit.
    pub idle_timeout: Duration,
    /// Pooled connection lifetime limit.
    pub connection_lifetime: Option<Duration>,
    /// Per-destination connection cap.
    pub max_connections_per_endpoint: usize,
    /// Follow redirects.
    pub allow_auto_redirect: bool,
    /// Proxy URL.
    pub proxy: Option<String>,
    /// Skip certificate validation.
    pub accept_invalid_certs: bool,
    /// Keep-alive parameters, when enabled.
    pub tcp_keep_alive: Option<KeepAlive>,
}

impl SettingsKey {
    /// Derive the key for `settings` with the effective connect timeout.
    pub fn new(settings: &TransportSettings, connect_timeout: Option<Duration>) -> Self {
        SettingsKey {
            connect_timeout,
            idle_timeout: settings.idle_timeout,
            connection_lifetime: settings.connection_lifetime,
            max_connections_per_endpoint: settings.max_connections_per_endpoint,
            allow_auto_redirect: settings.allow_auto_redirect,
            proxy: settings.proxy.clone(),
            accept_invalid_certs: settings.accept_invalid_certs,
            tcp_keep_alive: settings.tcp_keep_alive_enabled.then_some(KeepAlive {
                time: settings.tcp_keep_alive_time,
                interval: settings.tcp_keep_alive_interval,
            }),
        }
    }
}

/// Bounded, recycling cache with single-flight construction.
pub struct HandlerCache<K, V> {
    entries: Mutex<LruCache<K, Arc<OnceCell<V>>>>,
}

impl<K, V> HandlerCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        HandlerCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the value for `key`, building it with `factory` on a miss.
    ///
    /// Callers racing on the same missing key share one `factory` call. A
    /// failed construction leaves the key empty so the next lookup retries.
    pub async fn obtain<F, Fut, E>(&self, key: K, factory: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            entries
                .get_or_insert(key, || Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(factory).await.cloned()
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for HandlerCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("HandlerCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

/// Cache of engines shared between transports.
pub type SharedEngineCache = HandlerCache<SettingsKey, Arc<dyn HttpEngine>>;

impl SharedEngineCache {
    /// Create an empty shared cache with the default capacity.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(SHARED_CACHE_CAPACITY))
    }

    /// The process-wide cache used by transports built on the default engine.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SharedEngineCache>> = OnceLock::new();
        GLOBAL.get_or_init(SharedEngineCache::shared).clone()
    }
}

/// Hands out the engine for a given connect timeout.
pub struct ClientProvider {
    settings: Arc<TransportSettings>,
    local: HandlerCache<Option<Duration>, Arc<dyn HttpEngine>>,
    shared: Arc<SharedEngineCache>,
    factory: Arc<dyn EngineFactory>,
}

impl ClientProvider {
    /// Create a provider building engines with `factory` and sharing them through `shared`.
    pub fn new(
        settings: Arc<TransportSettings>,
        factory: Arc<dyn EngineFactory>,
        shared: Arc<SharedEngineCache>,
    ) -> Self {
        ClientProvider {
            settings,
            local: HandlerCache::new(LOCAL_CACHE_CAPACITY),
            shared,
            factory,
        }
    }

    /// Engine for exchanges using `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Propagates [`EngineFactory::create`] failures.
    pub async fn obtain(&self, connect_timeout: Option<Duration>) -> Result<Arc<dyn HttpEngine>> {
        self.local
            .obtain(connect_timeout, || async {
                let key = SettingsKey::new(&self.settings, connect_timeout);
                self.shared
                    .obtain(key.clone(), || async { self.factory.create(&key) })
                    .await
            })
            .await
    }
}

impl std::fmt::Debug for ClientProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProvider")
            .field("local", &self.local)
            .field("shared", &self.shared)
            .finish()
    }
}
