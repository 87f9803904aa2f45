//! Observability resources: sanitized configuration, health snapshot,
//! and a ring buffer of recent log entries fed by a `tracing` layer.
//!
//! Observability mode registers resources only; it exposes no tools.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use hyperserve_protocol::types::ResourceDescriptor;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::error::McpResult;
use crate::resource::ResourceProvider;

/// Default capacity of the log ring (overridable via
/// `HS_MCP_LOG_RESOURCE_SIZE`).
pub const DEFAULT_LOG_RING_SIZE: usize = 100;

/// Bounded, shareable buffer of formatted log lines.
#[derive(Clone)]
pub struct LogRing {
    entries: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl std::fmt::Debug for LogRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRing")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl LogRing {
    /// Ring with the given capacity (drop-oldest on overflow).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(line);
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}

/// `tracing` layer feeding a [`LogRing`].
#[derive(Debug, Clone)]
pub struct RingLayer {
    ring: LogRing,
}

impl RingLayer {
    /// Capture into `ring`.
    pub fn new(ring: LogRing) -> Self {
        Self { ring }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl tracing::field::Visit for LineVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.ring.push(format!(
            "{} {:>5} {}: {}{}",
            chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields,
        ));
    }
}

/// `hs://config` - the server's sanitized configuration. Credentials and
/// validator callbacks never appear; the server builds the value.
#[derive(Debug)]
pub struct ConfigResource {
    value: Value,
}

impl ConfigResource {
    /// Wrap the sanitized configuration value.
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait::async_trait]
impl ResourceProvider for ConfigResource {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: "hs://config".to_string(),
            name: "Server configuration".to_string(),
            description: "Sanitized server options (no credentials)".to_string(),
            mime_type: Some("application/json".to_string()),
        }
    }

    async fn read(&self) -> McpResult<String> {
        Ok(serde_json::to_string_pretty(&self.value)?)
    }
}

/// `hs://health` - live metrics snapshot.
pub struct HealthResource {
    snapshot: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl std::fmt::Debug for HealthResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HealthResource")
    }
}

impl HealthResource {
    /// The callback produces the current health snapshot.
    pub fn new(snapshot: Arc<dyn Fn() -> Value + Send + Sync>) -> Self {
        Self { snapshot }
    }
}

#[async_trait::async_trait]
impl ResourceProvider for HealthResource {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: "hs://health".to_string(),
            name: "Health metrics".to_string(),
            description: "Current health and request metrics snapshot".to_string(),
            mime_type: Some("application/json".to_string()),
        }
    }

    async fn read(&self) -> McpResult<String> {
        Ok(serde_json::to_string_pretty(&(self.snapshot)())?)
    }

    fn ttl(&self) -> Option<Duration> {
        // Health goes stale in seconds, not minutes.
        Some(Duration::from_secs(1))
    }
}

/// `hs://logs` - recent log entries from the ring buffer.
#[derive(Debug)]
pub struct LogsResource {
    ring: LogRing,
}

impl LogsResource {
    /// Serve the given ring.
    pub fn new(ring: LogRing) -> Self {
        Self { ring }
    }
}

#[async_trait::async_trait]
impl ResourceProvider for LogsResource {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: "hs://logs".to_string(),
            name: "Recent logs".to_string(),
            description: "Ring buffer of recent log entries".to_string(),
            mime_type: Some("text/plain".to_string()),
        }
    }

    async fn read(&self) -> McpResult<String> {
        Ok(self.ring.snapshot().join("\n"))
    }

    fn ttl(&self) -> Option<Duration> {
        // Always refresh; the ring is the source of truth.
        Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ring_drops_oldest() {
        let ring = LogRing::new(2);
        ring.push("a".into());
        ring.push("b".into());
        ring.push("c".into());
        assert_eq!(ring.snapshot(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn config_resource_serializes_value() {
        let resource = ConfigResource::new(json!({"addr": ":8080", "debug": false}));
        let text = resource.read().await.unwrap();
        assert!(text.contains(":8080"));
        assert_eq!(resource.descriptor().uri, "hs://config");
    }

    #[tokio::test]
    async fn health_resource_calls_through() {
        let resource = HealthResource::new(Arc::new(|| json!({"requests": 7})));
        let text = resource.read().await.unwrap();
        assert!(text.contains('7'));
        assert_eq!(resource.ttl(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn logs_resource_joins_lines() {
        let ring = LogRing::new(4);
        ring.push("one".into());
        ring.push("two".into());
        let resource = LogsResource::new(ring);
        assert_eq!(resource.read().await.unwrap(), "one\ntwo");
    }
}
