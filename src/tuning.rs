//! Best-effort post-connect tuning.
//!
//! Once the engine hands back a response head, the sender gives every
//! configured [`SocketTuner`] a look at the connection the exchange ran over.
//! Tuning is a side channel: failures are logged at `warn` and never change the
//! outcome of the exchange. An exchange whose request body could not be written
//! never produces a response head, so its connection is not tuned.
//!
//! TCP keep-alive is configured on the engine itself when it is built, so the
//! only built-in tuner is [`ArpCacheWarmer`], which records peer addresses for
//! an external warm-up job.

use crate::config::TransportSettings;
use crate::engine::ConnectionInfo;
use lru::LruCache;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single tuning step.
#[derive(Error, Debug)]
#[error("socket tuning failed: {0}")]
pub struct TuneError(pub String);

/// Post-connect tuning hook.
pub trait SocketTuner: Send + Sync {
    /// Tune the connection described by `connection`.
    fn tune(&self, connection: &ConnectionInfo) -> Result<(), TuneError>;
}

/// Tuner that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTuner;

impl SocketTuner for NoopTuner {
    fn tune(&self, _connection: &ConnectionInfo) -> Result<(), TuneError> {
        Ok(())
    }
}

/// Records the addresses of recently contacted peers.
///
/// A warm-up job can periodically read [`addresses`](Self::addresses) and
/// refresh the neighbour table for them. The set is bounded; the least
/// recently reported address is evicted first.
pub struct ArpCacheWarmer {
    peers: Mutex<LruCache<IpAddr, ()>>,
}

impl ArpCacheWarmer {
    /// Default number of tracked peers.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a warmer tracking up to `capacity` peers.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ArpCacheWarmer {
            peers: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Note that `address` was just contacted.
    pub fn report(&self, address: IpAddr) {
        self.peers.lock().put(address, ());
    }

    /// Tracked peers, most recently reported first.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.peers.lock().iter().map(|(address, _)| *address).collect()
    }
}

impl Default for ArpCacheWarmer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ArpCacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArpCacheWarmer")
            .field("tracked", &self.peers.lock().len())
            .finish()
    }
}

impl SocketTuner for ArpCacheWarmer {
    fn tune(&self, connection: &ConnectionInfo) -> Result<(), TuneError> {
        let address = connection
            .remote_addr
            .ok_or_else(|| TuneError("connection has no peer address".into()))?;
        self.report(address.ip());
        Ok(())
    }
}

/// The ordered set of tuners enabled by a settings snapshot.
#[derive(Clone, Default)]
pub(crate) struct TuningChain {
    tuners: Vec<Arc<dyn SocketTuner>>,
}

impl TuningChain {
    pub(crate) fn from_settings(settings: &TransportSettings, arp: &Arc<ArpCacheWarmer>) -> Self {
        let mut tuners: Vec<Arc<dyn SocketTuner>> = Vec::new();
        if settings.arp_cache_warmup_enabled {
            tuners.push(arp.clone());
        }
        if let Some(tuner) = &settings.tuner {
            tuners.push(tuner.clone());
        }
        TuningChain { tuners }
    }

    /// Run every tuner, logging and swallowing failures.
    pub(crate) fn apply(&self, connection: Option<&ConnectionInfo>, target: &str) {
        let Some(connection) = connection else {
            return;
        };
        for tuner in &self.tuners {
            if let Err(e) = tuner.tune(connection) {
                tracing::warn!(target = %target, error = %e, "connection tuning failed");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tuners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection(last_octet: u8) -> ConnectionInfo {
        ConnectionInfo {
            remote_addr: Some(SocketAddr::from((Ipv4Addr::new(10, 0, 0, last_octet), 80))),
        }
    }

    struct Failing(AtomicUsize);

    impl SocketTuner for Failing {
        fn tune(&self, _connection: &ConnectionInfo) -> Result<(), TuneError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(TuneError("unsupported".into()))
        }
    }

    #[test]
    fn test_arp_warmer_tracks_recent_peers() {
        let warmer = ArpCacheWarmer::new(2);
        warmer.tune(&connection(1)).unwrap();
        warmer.tune(&connection(2)).unwrap();
        warmer.tune(&connection(3)).unwrap();
        let addresses = warmer.addresses();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0], IpAddr::from(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn test_arp_warmer_needs_peer_address() {
        let warmer = ArpCacheWarmer::default();
        assert!(warmer.tune(&ConnectionInfo::default()).is_err());
    }

    #[test]
    fn test_chain_follows_settings() {
        let arp = Arc::new(ArpCacheWarmer::default());
        let chain = TuningChain::from_settings(&TransportSettings::default(), &arp);
        assert_eq!(chain.len(), 0);

        let settings = TransportSettings {
            arp_cache_warmup_enabled: true,
            tuner: Some(Arc::new(NoopTuner)),
            ..Default::default()
        };
        let chain = TuningChain::from_settings(&settings, &arp);
        assert_eq!(chain.len(), 2);
        chain.apply(Some(&connection(7)), "localhost");
        assert_eq!(arp.addresses().len(), 1);
    }

    #[test]
    fn test_chain_swallows_failures() {
        let failing = Arc::new(Failing(AtomicUsize::new(0)));
        let settings = TransportSettings {
            tuner: Some(failing.clone()),
            ..Default::default()
        };
        let chain = TuningChain::from_settings(&settings, &Arc::new(ArpCacheWarmer::default()));
        chain.apply(Some(&connection(1)), "localhost");
        chain.apply(None, "localhost");
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
    }
}
