//! Handler abstraction and response helpers.
//!
//! A handler maps an HTTP request to a response; middleware are
//! `Handler -> Handler` wrappers. Bodies are boxed so static payloads,
//! streamed SSE bodies, and empty upgrade responses share one type.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use tokio_util::sync::CancellationToken;

use crate::net::ConnDeadlines;

/// Boxed response body.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, std::convert::Infallible>;
/// Boxed request body. Hyper's `Incoming` boxes into this; tests build
/// one from in-memory bytes with [`req_body`]. Unsync because `Incoming`
/// itself is not `Sync`.
pub type ReqBody = http_body_util::combinators::UnsyncBoxBody<
    Bytes,
    Box<dyn std::error::Error + Send + Sync + 'static>,
>;
/// Inbound request type.
pub type HttpRequest = http::Request<ReqBody>;
/// Outbound response type.
pub type HttpResponse = http::Response<BoxBody>;
/// Shared handler.
pub type ArcHandler = Arc<dyn Handler>;

/// Build a request body from in-memory bytes.
pub fn req_body(bytes: impl Into<Bytes>) -> ReqBody {
    Full::new(bytes.into()).map_err(Into::into).boxed_unsync()
}

/// Box hyper's streaming request body.
pub(crate) fn incoming_body(incoming: hyper::body::Incoming) -> ReqBody {
    incoming.map_err(Into::into).boxed_unsync()
}

/// Per-request context threaded through the middleware chain.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    /// Peer socket address
    pub peer: SocketAddr,
    /// Fires on client disconnect and server drain
    pub cancel: CancellationToken,
    /// Correlation id attached to logs and the `X-Request-Id` header
    pub request_id: String,
    authorized: Arc<AtomicBool>,
    /// Route pattern the router matched, filled in at dispatch
    route: Arc<std::sync::OnceLock<String>>,
    deadlines: Option<Arc<ConnDeadlines>>,
}

impl RequestCtx {
    /// Context for a request arriving from `peer`.
    pub fn new(peer: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            peer,
            cancel,
            request_id: uuid::Uuid::new_v4().to_string(),
            authorized: Arc::new(AtomicBool::new(false)),
            route: Arc::new(std::sync::OnceLock::new()),
            deadlines: None,
        }
    }

    /// Record the matched route pattern (set once by the dispatcher).
    pub(crate) fn set_route(&self, pattern: &str) {
        let _ = self.route.set(pattern.to_string());
    }

    /// Route pattern the router matched, once dispatch has happened.
    pub fn route_pattern(&self) -> Option<&str> {
        self.route.get().map(String::as_str)
    }

    /// Attach the connection deadline handle (set by the accept loop).
    #[must_use]
    pub(crate) fn with_deadlines(mut self, deadlines: Arc<ConnDeadlines>) -> Self {
        self.deadlines = Some(deadlines);
        self
    }

    /// Mark the request as authenticated (set by the auth middleware).
    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::Relaxed);
    }

    /// Whether the request carried valid credentials.
    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Relaxed)
    }

    /// Clear the connection's write deadline. Long-lived SSE and
    /// WebSocket responses call this right before streaming.
    pub fn clear_write_deadline(&self) {
        if let Some(deadlines) = &self.deadlines {
            deadlines.disable_write();
        }
    }

    /// Clear the connection's read deadline (WebSocket sessions enforce
    /// their own keepalive schedule instead).
    pub fn clear_read_deadline(&self) {
        if let Some(deadlines) = &self.deadlines {
            deadlines.disable_read();
        }
    }
}

/// An HTTP request handler.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Produce the response for `req`.
    async fn handle(&self, req: HttpRequest, ctx: RequestCtx) -> HttpResponse;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HttpRequest, RequestCtx) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HttpResponse> + Send,
{
    async fn handle(&self, req: HttpRequest, ctx: RequestCtx) -> HttpResponse {
        (self.0)(req, ctx).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> ArcHandler
where
    F: Fn(HttpRequest, RequestCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Response construction helpers.
pub mod respond {
    use super::*;

    /// A full in-memory body.
    pub fn full(bytes: impl Into<Bytes>) -> BoxBody {
        Full::new(bytes.into()).boxed()
    }

    /// An empty body.
    pub fn empty() -> BoxBody {
        Empty::new().boxed()
    }

    /// Status-only response.
    pub fn status(code: StatusCode) -> HttpResponse {
        let mut response = http::Response::new(empty());
        *response.status_mut() = code;
        response
    }

    /// Plain-text response.
    pub fn text(code: StatusCode, body: impl Into<String>) -> HttpResponse {
        let mut response = http::Response::new(full(body.into().into_bytes()));
        *response.status_mut() = code;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// JSON response.
    pub fn json(code: StatusCode, value: &serde_json::Value) -> HttpResponse {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        let mut response = http::Response::new(full(body));
        *response.status_mut() = code;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    /// 404 with a terse body.
    pub fn not_found() -> HttpResponse {
        text(StatusCode::NOT_FOUND, "404 page not found\n")
    }

    /// 500 with no detail; the cause is logged, never echoed.
    pub fn internal_error() -> HttpResponse {
        text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctx_authorization_is_shared_between_clones() {
        let ctx = RequestCtx::new("127.0.0.1:9999".parse().unwrap(), CancellationToken::new());
        let clone = ctx.clone();
        assert!(!clone.is_authorized());
        ctx.set_authorized(true);
        assert!(clone.is_authorized());
    }

    #[test]
    fn respond_helpers_set_status_and_type() {
        let response = respond::json(StatusCode::OK, &serde_json::json!({"ok": true}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let response = respond::not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
