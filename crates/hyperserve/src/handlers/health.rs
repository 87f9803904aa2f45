//! Health plane: `/healthz/`, `/readyz/`, `/livez/`.

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;

use crate::handler::{respond, Handler, HttpRequest, HttpResponse, RequestCtx};
use crate::metrics::ServerMetrics;

/// Readiness predicate; false turns `/readyz/` (and `/healthz/`) into 503.
pub type ReadinessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Which endpoint this handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthKind {
    /// Overall health: alive and ready
    Health,
    /// Readiness to take traffic
    Ready,
    /// Process liveness only
    Live,
}

/// JSON health responder.
pub struct HealthHandler {
    metrics: Arc<ServerMetrics>,
    readiness: ReadinessCheck,
    kind: HealthKind,
}

impl std::fmt::Debug for HealthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthHandler").field("kind", &self.kind).finish()
    }
}

impl HealthHandler {
    /// Handler for one of the three endpoints.
    pub fn new(metrics: Arc<ServerMetrics>, readiness: ReadinessCheck, kind: HealthKind) -> Self {
        Self {
            metrics,
            readiness,
            kind,
        }
    }
}

#[async_trait::async_trait]
impl Handler for HealthHandler {
    async fn handle(&self, _req: HttpRequest, _ctx: RequestCtx) -> HttpResponse {
        let healthy = match self.kind {
            HealthKind::Live => true,
            HealthKind::Ready | HealthKind::Health => (self.readiness)(),
        };
        let status = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        // The request being counted includes this one; middleware
        // records after the handler, so add it here for the body.
        let body = json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "uptime": self.metrics.uptime_secs(),
            "total_requests": self.metrics.total_requests() + 1,
        });
        respond::json(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::req_body;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;

    async fn call(handler: &HealthHandler) -> (StatusCode, serde_json::Value) {
        let req = http::Request::builder().uri("/healthz/").body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        let response = handler.handle(req, ctx).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn healthy_when_ready() {
        let handler = HealthHandler::new(
            Arc::new(ServerMetrics::new()),
            Arc::new(|| true),
            HealthKind::Health,
        );
        let (status, body) = call(&handler).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["total_requests"].as_u64().unwrap() >= 1);
        assert!(body["uptime"].as_u64().is_some());
    }

    #[tokio::test]
    async fn unready_is_503() {
        let handler = HealthHandler::new(
            Arc::new(ServerMetrics::new()),
            Arc::new(|| false),
            HealthKind::Ready,
        );
        let (status, body) = call(&handler).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn liveness_ignores_readiness() {
        let handler = HealthHandler::new(
            Arc::new(ServerMetrics::new()),
            Arc::new(|| false),
            HealthKind::Live,
        );
        let (status, _) = call(&handler).await;
        assert_eq!(status, StatusCode::OK);
    }
}
