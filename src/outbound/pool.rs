//! Rotating pool of outbound proxy endpoints
//!
//! Endpoints are (address, port) pairs selected least-recently-used so load
//! spreads across the whole set without per-endpoint request counters. The
//! pool is replaced wholesale on refresh; a failed refresh keeps the old set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::outbound::source::EndpointSource;

/// A single outbound proxy endpoint
#[derive(Debug)]
pub struct ProxyEndpoint {
    pub address: String,
    pub port: u16,
    /// Epoch milliseconds of the last selection (0 = never used)
    last_used_at: AtomicU64,
}

impl ProxyEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            last_used_at: AtomicU64::new(0),
        }
    }

    pub fn last_used_at(&self) -> u64 {
        self.last_used_at.load(Ordering::Acquire)
    }

    /// Stamp the endpoint as used now. fetch_max keeps the timestamp
    /// monotonic when two selectors race on the same endpoint.
    fn touch(&self, now_ms: u64) {
        self.last_used_at.fetch_max(now_ms, Ordering::AcqRel);
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Concurrency-safe pool of proxy endpoints with LRU selection
///
/// Selection reads an immutable snapshot of the endpoint set, so a concurrent
/// refresh is never observed half-applied. The only mutation inside
/// [`ProxyPool::select`] is the chosen endpoint's timestamp.
pub struct ProxyPool {
    endpoints: ArcSwap<Vec<Arc<ProxyEndpoint>>>,
    source: Arc<dyn EndpointSource>,
    ports: Vec<u16>,
}

impl ProxyPool {
    pub fn new(source: Arc<dyn EndpointSource>, ports: Vec<u16>) -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(Vec::new()),
            source,
            ports,
        }
    }

    /// Fetch a fresh address list and replace the endpoint set atomically.
    ///
    /// On source failure the existing set is left untouched and the error is
    /// returned; callers treat it as "no new data", not a fatal condition.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize> {
        let addresses = match self.source.fetch_candidate_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!("Endpoint source refresh failed, keeping current pool: {}", e);
                return Err(e);
            }
        };

        let endpoints: Vec<Arc<ProxyEndpoint>> = addresses
            .iter()
            .flat_map(|addr| {
                self.ports
                    .iter()
                    .map(move |&port| Arc::new(ProxyEndpoint::new(addr.clone(), port)))
            })
            .collect();

        let count = endpoints.len();
        self.endpoints.store(Arc::new(endpoints));

        if count == 0 {
            warn!("Endpoint source returned no addresses; pool is now empty");
        } else {
            info!("Proxy pool refreshed with {} endpoints", count);
        }

        Ok(count)
    }

    /// Select the least-recently-used endpoint and stamp it as used.
    ///
    /// Returns `None` on an empty pool; never blocks waiting for a refresh.
    pub fn select(&self) -> Option<Arc<ProxyEndpoint>> {
        let snapshot = self.endpoints.load();

        let selected = snapshot
            .iter()
            .min_by_key(|endpoint| endpoint.last_used_at())?
            .clone();

        selected.touch(chrono::Utc::now().timestamp_millis() as u64);
        Some(selected)
    }

    /// Current endpoint set (consistent snapshot)
    pub fn snapshot(&self) -> Arc<Vec<Arc<ProxyEndpoint>>> {
        self.endpoints.load_full()
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::source::tests::ScriptedSource;
    use std::collections::HashSet;

    fn pool_with(addresses: &[&str], ports: &[u16]) -> ProxyPool {
        let source = Arc::new(ScriptedSource::with_addresses(addresses));
        ProxyPool::new(source, ports.to_vec())
    }

    #[tokio::test]
    async fn test_select_empty_pool_returns_none() {
        let pool = pool_with(&[], &[443]);
        assert!(pool.select().is_none());
        // Deterministic: still none on repeat
        assert!(pool.select().is_none());
    }

    #[tokio::test]
    async fn test_refresh_expands_addresses_by_ports() {
        let pool = pool_with(&["1.1.1.1", "2.2.2.2"], &[443, 8443]);
        let count = pool.refresh().await.unwrap();
        assert_eq!(count, 4);
        assert_eq!(pool.len(), 4);
    }

    #[tokio::test]
    async fn test_lru_visits_every_endpoint_before_repeating() {
        let pool = pool_with(&["1.1.1.1", "2.2.2.2", "3.3.3.3"], &[443, 2053]);
        pool.refresh().await.unwrap();

        let n = pool.len();
        let mut seen = HashSet::new();
        for _ in 0..n {
            let endpoint = pool.select().unwrap();
            assert!(
                seen.insert(endpoint.to_string()),
                "endpoint {} selected twice before the pool was exhausted",
                endpoint
            );
        }
        assert_eq!(seen.len(), n);
    }

    #[tokio::test]
    async fn test_selection_stamps_last_used() {
        let pool = pool_with(&["1.1.1.1"], &[443]);
        pool.refresh().await.unwrap();

        let endpoint = pool.select().unwrap();
        let first = endpoint.last_used_at();
        assert!(first > 0);

        let endpoint = pool.select().unwrap();
        assert!(endpoint.last_used_at() >= first);
    }

    #[tokio::test]
    async fn test_failed_refresh_preserves_existing_set() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec!["1.1.1.1".to_string()]),
            Err("source down".to_string()),
        ]));
        let pool = ProxyPool::new(source, vec![443]);

        pool.refresh().await.unwrap();
        let before = pool.snapshot();

        assert!(pool.refresh().await.is_err());
        let after = pool.snapshot();

        // The same allocation, not merely equal contents
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_rather_than_merges() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]),
            Ok(vec!["9.9.9.9".to_string()]),
        ]));
        let pool = ProxyPool::new(source, vec![443]);

        pool.refresh().await.unwrap();
        assert_eq!(pool.len(), 2);

        pool.refresh().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.select().unwrap().address, "9.9.9.9");
    }

    #[tokio::test]
    async fn test_concurrent_select_during_refresh() {
        let source = Arc::new(ScriptedSource::with_addresses(&["1.1.1.1", "2.2.2.2"]));
        let pool = Arc::new(ProxyPool::new(source, vec![443, 2053]));
        pool.refresh().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    // Must always observe a complete snapshot
                    assert!(pool.select().is_some());
                }
            }));
        }
        for _ in 0..4 {
            pool.refresh().await.unwrap();
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
