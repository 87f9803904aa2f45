//! Structured request logging.

use std::sync::Arc;
use std::time::Instant;

use http::HeaderValue;
use hyper::body::Body as _;
use tracing::info;

use crate::handler::{handler_fn, ArcHandler, HttpRequest, RequestCtx};
use crate::middleware::Middleware;

/// Logs one structured line per request and stamps `X-Request-Id`.
#[derive(Debug, Default)]
pub struct RequestLogger;

impl RequestLogger {
    /// Plain logger.
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RequestLogger {
    fn name(&self) -> &str {
        "request_logger"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            async move {
                let method = req.method().clone();
                let path = req.uri().path().to_string();
                let client_ip = ctx.peer.ip().to_string();
                let request_id = ctx.request_id.clone();
                let started = Instant::now();

                let mut response = next.handle(req, ctx).await;

                let bytes_out = response.body().size_hint().exact().unwrap_or(0);
                info!(
                    client_ip,
                    method = %method,
                    path,
                    status = response.status().as_u16(),
                    bytes_out,
                    duration_ms = started.elapsed().as_millis() as u64,
                    request_id,
                    "request"
                );
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    response.headers_mut().insert("x-request-id", value);
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
    async fn stamps_request_id_header() {
        let handler = RequestLogger::new().wrap(crate::handler::handler_fn(|_req, _ctx| async {
            respond::status(StatusCode::OK)
        }));
        let req = http::Request::builder().uri("/x").body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        let expected_id = ctx.request_id.clone();

        let response = handler.handle(req, ctx).await;
        assert_eq!(
            response.headers().get("x-request-id").unwrap().to_str().unwrap(),
            expected_id
        );
    }
}
