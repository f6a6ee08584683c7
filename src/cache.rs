//! TTL cache for reputation lookups.

use crate::geo::GeoInfo;
use moka::future::Cache;
use std::net::IpAddr;
use std::time::Duration;

/// Successful lookups keyed by client IP. Failures are not cached so that a
/// transient outage does not pin an address to "unknown".
#[derive(Clone)]
pub struct LookupCache {
    inner: Cache<IpAddr, GeoInfo>,
}

impl LookupCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    pub async fn get(&self, ip: &IpAddr) -> Option<GeoInfo> {
        self.inner.get(ip).await
    }

    pub async fn insert(&self, ip: IpAddr, info: GeoInfo) {
        self.inner.insert(ip, info).await;
    }

    /// Approximate entry count.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_cache_basic() {
        let cache = LookupCache::new(100, Duration::from_secs(60));
        let info = GeoInfo {
            country: Some("DE".into()),
            ..Default::default()
        };

        cache.insert(ip("203.0.113.7"), info.clone()).await;

        assert_eq!(cache.get(&ip("203.0.113.7")).await, Some(info));
        assert_eq!(cache.get(&ip("203.0.113.8")).await, None);
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = LookupCache::new(100, Duration::from_millis(50));
        cache.insert(ip("198.51.100.1"), GeoInfo::default()).await;

        assert!(cache.get(&ip("198.51.100.1")).await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&ip("198.51.100.1")).await.is_none());
    }
}
