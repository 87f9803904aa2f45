//! Server-wide request metrics.
//!
//! Counters land here from the metrics middleware (request totals,
//! status classes, per-route latency sums) and from the SSE hub (events
//! discarded by full client queues). Snapshots feed the health plane and
//! the `hs://health` observability resource.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};

#[derive(Debug, Default, Clone, Copy)]
struct RouteStat {
    requests: u64,
    total_micros: u64,
}

/// Request counters updated by the metrics middleware and the SSE hub.
#[derive(Debug)]
pub struct ServerMetrics {
    started: Instant,
    total_requests: AtomicU64,
    /// Status classes 1xx..5xx
    classes: [AtomicU64; 5],
    /// Latency sums keyed by matched route pattern
    routes: Mutex<HashMap<String, RouteStat>>,
    /// SSE events discarded by full client queues
    sse_dropped: AtomicU64,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            classes: Default::default(),
            routes: Mutex::new(HashMap::new()),
            sse_dropped: AtomicU64::new(0),
        }
    }
}

impl ServerMetrics {
    /// Fresh metrics; uptime counts from here.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one served request.
    pub fn record(&self, status: http::StatusCode) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let class = (status.as_u16() / 100) as usize;
        if (1..=5).contains(&class) {
            self.classes[class - 1].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Add one request's wall time to its route's latency sum.
    pub fn record_route(&self, pattern: &str, elapsed: Duration) {
        let mut routes = self.routes.lock();
        let stat = routes.entry(pattern.to_string()).or_default();
        stat.requests += 1;
        stat.total_micros += elapsed.as_micros() as u64;
    }

    /// Count an SSE event discarded by a full client queue.
    pub fn sse_event_dropped(&self) {
        self.sse_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests served so far.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// SSE events dropped so far.
    pub fn sse_dropped_events(&self) -> u64 {
        self.sse_dropped.load(Ordering::Relaxed)
    }

    /// Seconds since server start.
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Snapshot for the health plane and observability resources.
    pub fn snapshot(&self) -> Value {
        let mut routes = serde_json::Map::new();
        for (pattern, stat) in self.routes.lock().iter() {
            routes.insert(
                pattern.clone(),
                json!({
                    "requests": stat.requests,
                    "latency_micros": stat.total_micros,
                }),
            );
        }
        json!({
            "uptime": self.uptime_secs(),
            "total_requests": self.total_requests(),
            "status_classes": {
                "1xx": self.classes[0].load(Ordering::Relaxed),
                "2xx": self.classes[1].load(Ordering::Relaxed),
                "3xx": self.classes[2].load(Ordering::Relaxed),
                "4xx": self.classes[3].load(Ordering::Relaxed),
                "5xx": self.classes[4].load(Ordering::Relaxed),
            },
            "routes": Value::Object(routes),
            "sse": {
                "dropped_events": self.sse_dropped_events(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_bucketed() {
        let metrics = ServerMetrics::new();
        metrics.record(http::StatusCode::OK);
        metrics.record(http::StatusCode::NOT_FOUND);
        metrics.record(http::StatusCode::TOO_MANY_REQUESTS);
        metrics.record(http::StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(metrics.total_requests(), 4);
        let snap = metrics.snapshot();
        assert_eq!(snap["status_classes"]["2xx"], 1);
        assert_eq!(snap["status_classes"]["4xx"], 2);
        assert_eq!(snap["status_classes"]["5xx"], 1);
    }

    #[test]
    fn route_latency_sums_accumulate() {
        let metrics = ServerMetrics::new();
        metrics.record_route("/api/", Duration::from_micros(200));
        metrics.record_route("/api/", Duration::from_micros(300));
        metrics.record_route("/healthz/", Duration::from_micros(50));

        let snap = metrics.snapshot();
        assert_eq!(snap["routes"]["/api/"]["requests"], 2);
        assert_eq!(snap["routes"]["/api/"]["latency_micros"], 500);
        assert_eq!(snap["routes"]["/healthz/"]["requests"], 1);
    }

    #[test]
    fn sse_drops_appear_in_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.sse_event_dropped();
        metrics.sse_event_dropped();
        assert_eq!(metrics.sse_dropped_events(), 2);
        assert_eq!(metrics.snapshot()["sse"]["dropped_events"], 2);
    }
}
