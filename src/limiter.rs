//! Per-destination connection cap.
//!
//! The engine keeps its own pool but cannot bound how many connections it
//! opens to one destination. The transport enforces
//! `max_connections_per_endpoint` itself: every exchange holds an
//! [`EndpointPermit`] for its destination from before the request is handed
//! to the engine until the response body is released. A streamed response
//! carries its permit inside the [`ResponseStream`](crate::ResponseStream).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Idle destinations are forgotten once this many are tracked.
const PRUNE_THRESHOLD: usize = 1024;

/// Slot for one in-flight exchange to a destination.
#[derive(Debug)]
pub struct EndpointPermit {
    _permit: OwnedSemaphorePermit,
}

/// Hands out at most `capacity` concurrent permits per destination.
pub struct EndpointLimiter {
    capacity: usize,
    endpoints: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl EndpointLimiter {
    /// Create a limiter allowing `capacity` exchanges per destination.
    pub fn new(capacity: usize) -> Self {
        EndpointLimiter {
            capacity: capacity.clamp(1, Semaphore::MAX_PERMITS),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a free slot to `endpoint`.
    ///
    /// # Errors
    ///
    /// Fails only if the destination's semaphore was closed, which the
    /// limiter never does.
    pub async fn acquire(&self, endpoint: &str) -> Result<EndpointPermit, AcquireError> {
        let permit = self.semaphore(endpoint).acquire_owned().await?;
        Ok(EndpointPermit { _permit: permit })
    }

    /// Free slots to `endpoint`.
    pub fn available(&self, endpoint: &str) -> usize {
        self.endpoints
            .lock()
            .get(endpoint)
            .map_or(self.capacity, |semaphore| semaphore.available_permits())
    }

    fn semaphore(&self, endpoint: &str) -> Arc<Semaphore> {
        let mut endpoints = self.endpoints.lock();
        if let Some(semaphore) = endpoints.get(endpoint) {
            return semaphore.clone();
        }

        if endpoints.len() >= PRUNE_THRESHOLD {
            // Outstanding permits hold a reference, so only idle entries go.
            endpoints.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
        }

        let semaphore = Arc::new(Semaphore::new(self.capacity));
        endpoints.insert(endpoint.to_string(), semaphore.clone());
        semaphore
    }
}

impl std::fmt::Debug for EndpointLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointLimiter")
            .field("capacity", &self.capacity)
            .field("endpoints", &self.endpoints.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_capacity_is_per_endpoint() {
        let limiter = EndpointLimiter::new(2);
        let a1 = limiter.acquire("a:80").await.unwrap();
        let _a2 = limiter.acquire("a:80").await.unwrap();
        assert_eq!(limiter.available("a:80"), 0);
        assert_eq!(limiter.available("b:80"), 2);

        let _b = limiter.acquire("b:80").await.unwrap();
        assert_eq!(limiter.available("b:80"), 1);

        let blocked = tokio::time::timeout(Duration::from_millis(20), limiter.acquire("a:80")).await;
        assert!(blocked.is_err());

        drop(a1);
        assert_eq!(limiter.available("a:80"), 1);
        let _a3 = limiter.acquire("a:80").await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_endpoints_are_pruned() {
        let limiter = EndpointLimiter::new(1);
        let held = limiter.acquire("held:80").await.unwrap();
        for i in 0..PRUNE_THRESHOLD {
            drop(limiter.acquire(&format!("idle-{}:80", i)).await.unwrap());
        }
        let _next = limiter.acquire("next:80").await.unwrap();

        let endpoints = limiter.endpoints.lock();
        assert!(endpoints.contains_key("held:80"));
        assert!(endpoints.len() < PRUNE_THRESHOLD);
        drop(endpoints);
        drop(held);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let limiter = EndpointLimiter::new(0);
        assert_eq!(limiter.available("x"), 1);
    }
}
