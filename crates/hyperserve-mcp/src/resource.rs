//! Resources and the TTL cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hyperserve_protocol::types::ResourceDescriptor;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::McpResult;
use crate::metrics::McpMetrics;
use crate::DEFAULT_RESOURCE_TTL;

/// A URI-addressed read-only value exposed over MCP.
#[async_trait::async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Descriptor listed by `resources/list`.
    fn descriptor(&self) -> ResourceDescriptor;

    /// Produce the current value as text.
    async fn read(&self) -> McpResult<String>;

    /// Cache TTL for this resource; `None` uses the 5-minute default.
    fn ttl(&self) -> Option<Duration> {
        None
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Read-through cache keyed by resource URI.
///
/// Per-key single-flight: concurrent readers of an expired entry contend
/// on a per-URI mutex so exactly one performs the refresh.
pub struct ResourceCache {
    entries: DashMap<String, CacheEntry>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: Arc<McpMetrics>,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    /// Create a cache reporting hits/misses to `metrics`.
    pub fn new(metrics: Arc<McpMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
            metrics,
        }
    }

    /// Return the cached value for `uri`, refreshing through `provider`
    /// when absent or expired.
    pub async fn read_through(
        &self,
        uri: &str,
        provider: &dyn ResourceProvider,
    ) -> McpResult<String> {
        if let Some(entry) = self.entries.get(uri) {
            if Instant::now() < entry.expires_at {
                self.metrics.cache_hit();
                return Ok(entry.value.clone());
            }
        }

        let lock = self
            .refresh_locks
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another reader may have refreshed while we waited.
        if let Some(entry) = self.entries.get(uri) {
            if Instant::now() < entry.expires_at {
                self.metrics.cache_hit();
                return Ok(entry.value.clone());
            }
        }

        self.metrics.cache_miss();
        debug!(uri, "resource cache refresh");
        let value = provider.read().await?;
        let ttl = provider.ttl().unwrap_or(DEFAULT_RESOURCE_TTL);
        self.entries.insert(
            uri.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(value)
    }

    /// Drop a cached entry (used by tests and dev tooling).
    pub fn invalidate(&self, uri: &str) {
        self.entries.remove(uri);
    }
}
