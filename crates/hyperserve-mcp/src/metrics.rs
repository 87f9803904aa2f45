//! MCP call metrics.
//!
//! Lock-free counters updated by the dispatcher and cache; snapshots are
//! plain JSON values consumed by the health plane and the observability
//! resources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};

#[derive(Debug, Default)]
struct MethodStat {
    calls: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

/// Per-method counters plus cache hit/miss totals.
#[derive(Debug, Default)]
pub struct McpMetrics {
    methods: DashMap<String, MethodStat>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl McpMetrics {
    /// Record one dispatched call.
    pub fn record(&self, method: &str, elapsed: Duration, ok: bool) {
        let stat = self.methods.entry(method.to_string()).or_default();
        stat.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            stat.errors.fetch_add(1, Ordering::Relaxed);
        }
        stat.total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Count a resource-cache hit.
    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a resource-cache miss.
    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Read-only snapshot for observability surfaces.
    pub fn snapshot(&self) -> Value {
        let mut methods = serde_json::Map::new();
        for entry in self.methods.iter() {
            let calls = entry.calls.load(Ordering::Relaxed);
            let total = entry.total_micros.load(Ordering::Relaxed);
            methods.insert(
                entry.key().clone(),
                json!({
                    "calls": calls,
                    "errors": entry.errors.load(Ordering::Relaxed),
                    "avg_micros": if calls == 0 { 0 } else { total / calls },
                }),
            );
        }
        json!({
            "methods": Value::Object(methods),
            "cache": {
                "hits": self.cache_hits.load(Ordering::Relaxed),
                "misses": self.cache_misses.load(Ordering::Relaxed),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_aggregates_calls() {
        let metrics = McpMetrics::default();
        metrics.record("tools/call", Duration::from_micros(100), true);
        metrics.record("tools/call", Duration::from_micros(300), false);
        metrics.record("ping", Duration::from_micros(10), true);

        let snap = metrics.snapshot();
        assert_eq!(snap["methods"]["tools/call"]["calls"], 2);
        assert_eq!(snap["methods"]["tools/call"]["errors"], 1);
        assert_eq!(snap["methods"]["tools/call"]["avg_micros"], 200);
        assert_eq!(snap["methods"]["ping"]["calls"], 1);
    }
}
