//! Process-wide DNS cache shared by every remote session.

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub(crate) const DNS_TTL: Duration = Duration::from_secs(5 * 60);

static DNS_CACHE: LazyLock<DnsCache> = LazyLock::new(|| DnsCache::new(DNS_TTL));

struct CachedAddrs {
    resolved_at: Instant,
    addrs: Vec<SocketAddr>,
}

pub(crate) struct DnsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedAddrs>>,
}

impl DnsCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn get(&self, host: &str) -> Option<Vec<SocketAddr>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(host)
            .filter(|e| e.resolved_at.elapsed() < self.ttl)
            .map(|e| e.addrs.clone())
    }

    pub(crate) fn insert(&self, host: String, addrs: Vec<SocketAddr>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| e.resolved_at.elapsed() < self.ttl);
        entries.insert(host, CachedAddrs { resolved_at: Instant::now(), addrs });
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn resolve_cached(host: String) -> Result<Addrs, BoxError> {
    if let Some(addrs) = DNS_CACHE.get(&host) {
        tracing::trace!(%host, "DNS cache hit");
        return Ok(Box::new(addrs.into_iter()));
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0)).await?.collect();
    tracing::debug!(%host, count = addrs.len(), "resolved host");
    DNS_CACHE.insert(host, addrs.clone());
    Ok(Box::new(addrs.into_iter()))
}

/// `reqwest` resolver backed by [`DNS_CACHE`].
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CachingResolver;

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_cached(name.as_str().to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn hit_within_ttl() {
        let cache = DnsCache::new(Duration::from_secs(60));
        cache.insert("models.example".into(), vec![addr(0)]);
        assert_eq!(cache.get("models.example"), Some(vec![addr(0)]));
        assert_eq!(cache.get("other.example"), None);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = DnsCache::new(Duration::ZERO);
        cache.insert("models.example".into(), vec![addr(0)]);
        assert_eq!(cache.get("models.example"), None);
    }
}
