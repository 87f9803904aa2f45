//! Request-counting middleware. Always first in the default stack.

use std::sync::Arc;
use std::time::Instant;

use crate::handler::{handler_fn, ArcHandler, HttpRequest, RequestCtx};
use crate::metrics::ServerMetrics;
use crate::middleware::Middleware;

/// Counts requests, per-status-class outcomes, and per-route wall time.
#[derive(Debug)]
pub struct MetricsMiddleware {
    metrics: Arc<ServerMetrics>,
}

impl MetricsMiddleware {
    /// Record into the shared server metrics.
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        let metrics = Arc::clone(&self.metrics);
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            let metrics = Arc::clone(&metrics);
            async move {
                let started = Instant::now();
                let route_ctx = ctx.clone();
                let response = next.handle(req, ctx).await;
                metrics.record(response.status());
                if let Some(pattern) = route_ctx.route_pattern() {
                    metrics.record_route(pattern, started.elapsed());
                }
                response
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{req_body, respond};
    use http::StatusCode;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn counts_every_response() {
        let metrics = Arc::new(ServerMetrics::new());
        let middleware = MetricsMiddleware::new(Arc::clone(&metrics));
        let handler = middleware.wrap(crate::handler::handler_fn(|_req, _ctx| async {
            respond::status(StatusCode::IM_A_TEAPOT)
        }));

        for _ in 0..3 {
            let req = http::Request::builder().uri("/x").body(req_body("")).unwrap();
            let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
            handler.handle(req, ctx).await;
        }
        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.snapshot()["status_classes"]["4xx"], 3);
    }

    #[tokio::test]
    async fn latency_recorded_under_matched_route() {
        let metrics = Arc::new(ServerMetrics::new());
        let middleware = MetricsMiddleware::new(Arc::clone(&metrics));
        let handler = middleware.wrap(crate::handler::handler_fn(|_req, _ctx| async {
            respond::status(StatusCode::OK)
        }));

        let req = http::Request::builder()
            .uri("/api/data")
            .body(req_body(""))
            .unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        // The dispatcher sets the matched pattern before the chain runs.
        ctx.set_route("/api/");
        handler.handle(req, ctx).await;

        let snap = metrics.snapshot();
        assert_eq!(snap["routes"]["/api/"]["requests"], 1);
        assert!(snap["routes"]["/api/"]["latency_micros"].as_u64().is_some());
    }

    #[tokio::test]
    async fn unmatched_requests_skip_route_stats() {
        let metrics = Arc::new(ServerMetrics::new());
        let middleware = MetricsMiddleware::new(Arc::clone(&metrics));
        let handler = middleware.wrap(crate::handler::handler_fn(|_req, _ctx| async {
            respond::not_found()
        }));

        let req = http::Request::builder().uri("/nope").body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        handler.handle(req, ctx).await;

        let snap = metrics.snapshot();
        assert!(snap["routes"].as_object().unwrap().is_empty());
        assert_eq!(snap["status_classes"]["4xx"], 1);
    }
}
