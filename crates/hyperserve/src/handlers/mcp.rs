//! The MCP endpoint over HTTP.
//!
//! One route, three behaviors:
//!
//! - `POST` - JSON-RPC. With an `X-SSE-Client-ID` header naming a live
//!   stream, the response is delivered as a `message` event on that
//!   stream and the HTTP side answers `202 Accepted`; otherwise the
//!   response is returned inline.
//! - `GET` with `Accept: text/event-stream` - attach an SSE stream.
//! - `GET` otherwise - the capability/discovery document.

use std::collections::HashMap;
use std::sync::Arc;

use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use hyperserve_mcp::{Dispatcher, McpSession, RequestMeta};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::handler::{respond, Handler, HttpRequest, HttpResponse, RequestCtx};
use crate::middleware::bearer_token;
use crate::options::TokenValidator;
use crate::sse::{SseEvent, SseHub};

/// Routing header for SSE-delivered responses.
const SSE_CLIENT_HEADER: &str = "x-sse-client-id";
/// Upper bound on a JSON-RPC body.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// The `POST /mcp` + `GET /mcp` handler.
pub struct McpEndpoint {
    dispatcher: Arc<Dispatcher>,
    hub: Arc<SseHub>,
    /// Sessions for SSE-attached clients, keyed by opaque client id
    sessions: RwLock<HashMap<String, Arc<McpSession>>>,
    /// Shared session for plain POSTs (stateless transport)
    shared_session: Arc<McpSession>,
    validator: Option<TokenValidator>,
}

impl std::fmt::Debug for McpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpEndpoint")
            .field("sessions", &self.sessions.read().len())
            .finish_non_exhaustive()
    }
}

impl McpEndpoint {
    /// Endpoint over the dispatcher and hub.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        hub: Arc<SseHub>,
        validator: Option<TokenValidator>,
    ) -> Self {
        Self {
            dispatcher,
            hub,
            sessions: RwLock::new(HashMap::new()),
            shared_session: Arc::new(McpSession::pre_initialized()),
            validator,
        }
    }

    /// A request is authorized if upstream auth middleware said so, or
    /// its bearer token passes the validator (checked here so discovery
    /// policies can distinguish callers without a rejecting auth layer).
    fn authorized(&self, req: &HttpRequest, ctx: &RequestCtx) -> bool {
        if ctx.is_authorized() {
            return true;
        }
        match (&self.validator, bearer_token(req.headers())) {
            (Some(validator), Some(token)) => validator(token),
            _ => false,
        }
    }

    fn session_for(&self, client_id: Option<&str>) -> Arc<McpSession> {
        match client_id {
            Some(id) => {
                if let Some(session) = self.sessions.read().get(id) {
                    return Arc::clone(session);
                }
                Arc::clone(&self.shared_session)
            }
            None => Arc::clone(&self.shared_session),
        }
    }

    /// Forget an SSE client's session (the hub entry is already gone).
    pub fn drop_session(&self, client_id: &str) {
        self.sessions.write().remove(client_id);
    }

    async fn handle_post(&self, req: HttpRequest, ctx: RequestCtx) -> HttpResponse {
        let authorized = self.authorized(&req, &ctx);
        let sse_client = req
            .headers()
            .get(SSE_CLIENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let body = match read_body(req, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(status) => return respond::status(status),
        };

        let meta = RequestMeta {
            authorized,
            cancel: ctx.cancel.clone(),
        };

        // Header routing only applies when the stream is actually live.
        let route_to_stream = sse_client
            .as_deref()
            .filter(|id| self.hub.knows(id))
            .map(String::from);
        let session = self.session_for(route_to_stream.as_deref());

        let response = self
            .dispatcher
            .handle_body(&body, session.as_ref(), &meta)
            .await;

        match (response, route_to_stream) {
            (Some(value), Some(client_id)) => {
                let delivered = self
                    .hub
                    .send_to(&client_id, SseEvent::named("message", value.to_string()));
                if !delivered {
                    // Stream vanished between the check and the send.
                    debug!(client_id, "sse client gone; answering inline");
                    return respond::json(StatusCode::OK, &value);
                }
                respond::status(StatusCode::ACCEPTED)
            }
            (Some(value), None) => respond::json(StatusCode::OK, &value),
            // Notifications only: nothing to answer.
            (None, _) => respond::status(StatusCode::ACCEPTED),
        }
    }

    fn handle_sse_attach(&self, ctx: &RequestCtx) -> HttpResponse {
        // Long-lived stream: neither deadline may tear it down. The hub's
        // keepalive ping takes over liveness.
        ctx.clear_write_deadline();
        ctx.clear_read_deadline();

        let (client_id, body) = self.hub.attach();
        {
            let mut sessions = self.sessions.write();
            // Lazily drop sessions whose stream is gone.
            sessions.retain(|id, _| self.hub.knows(id));
            sessions.insert(client_id.clone(), Arc::new(McpSession::pre_initialized()));
        }

        let mut response = http::Response::new(body);
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

async fn read_body(req: HttpRequest, limit: usize) -> Result<bytes::Bytes, StatusCode> {
    let body = req.into_body();
    match http_body_util::Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => {
            warn!(error = %err, "request body rejected");
            Err(StatusCode::PAYLOAD_TOO_LARGE)
        }
    }
}

fn wants_event_stream(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

#[async_trait::async_trait]
impl Handler for McpEndpoint {
    async fn handle(&self, req: HttpRequest, ctx: RequestCtx) -> HttpResponse {
        match *req.method() {
            Method::POST => self.handle_post(req, ctx).await,
            Method::GET if wants_event_stream(&req) => self.handle_sse_attach(&ctx),
            Method::GET => {
                let meta = RequestMeta {
                    authorized: self.authorized(&req, &ctx),
                    cancel: ctx.cancel.clone(),
                };
                respond::json(StatusCode::OK, &self.dispatcher.discovery_document(&meta))
            }
            _ => respond::status(StatusCode::METHOD_NOT_ALLOWED),
        }
    }
}

/// `GET /.well-known/mcp.json` and `GET /mcp/discover`. Both routes use
/// this one handler, so the bodies are byte-identical.
pub struct DiscoveryHandler {
    dispatcher: Arc<Dispatcher>,
    validator: Option<TokenValidator>,
}

impl std::fmt::Debug for DiscoveryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DiscoveryHandler")
    }
}

impl DiscoveryHandler {
    /// Discovery over the dispatcher.
    pub fn new(dispatcher: Arc<Dispatcher>, validator: Option<TokenValidator>) -> Self {
        Self {
            dispatcher,
            validator,
        }
    }
}

#[async_trait::async_trait]
impl Handler for DiscoveryHandler {
    async fn handle(&self, req: HttpRequest, ctx: RequestCtx) -> HttpResponse {
        if req.method() != Method::GET {
            return respond::status(StatusCode::METHOD_NOT_ALLOWED);
        }
        let authorized = ctx.is_authorized()
            || match (&self.validator, bearer_token(req.headers())) {
                (Some(validator), Some(token)) => validator(token),
                _ => false,
            };
        let meta = RequestMeta {
            authorized,
            cancel: ctx.cancel.clone(),
        };
        respond::json(StatusCode::OK, &self.dispatcher.discovery_document(&meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::req_body;
    use crate::metrics::ServerMetrics;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn endpoint() -> McpEndpoint {
        let dispatcher = Arc::new(
            Dispatcher::builder("test", "1.0")
                .tool(Box::new(hyperserve_mcp::builtin::CalculatorTool))
                .build()
                .unwrap(),
        );
        let hub = Arc::new(SseHub::new(Arc::new(ServerMetrics::default())));
        McpEndpoint::new(dispatcher, hub, None)
    }

    fn ctx() -> RequestCtx {
        RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new())
    }

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_returns_inline_json() {
        let endpoint = endpoint();
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "calculator", "arguments": {"op": "mul", "a": 15, "b": 4}},
            "id": 1
        });
        let req = http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(req_body(payload.to_string()))
            .unwrap();

        let response = endpoint.handle(req, ctx()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["result"]["content"][0]["text"], "60");
    }

    #[tokio::test]
    async fn post_with_live_stream_returns_202() {
        let endpoint = endpoint();

        // Attach a stream directly through the hub.
        let attach_req = http::Request::builder()
            .method("GET")
            .uri("/mcp")
            .header("accept", "text/event-stream")
            .body(req_body(""))
            .unwrap();
        let attach_response = endpoint.handle(attach_req, ctx()).await;
        assert_eq!(
            attach_response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let client_id = {
            let sessions = endpoint.sessions.read();
            sessions.keys().next().unwrap().clone()
        };

        let payload = json!({"jsonrpc": "2.0", "method": "ping", "id": 7});
        let req = http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(SSE_CLIENT_HEADER, &client_id)
            .body(req_body(payload.to_string()))
            .unwrap();
        let response = endpoint.handle(req, ctx()).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn post_with_unknown_stream_falls_back_inline() {
        let endpoint = endpoint();
        let payload = json!({"jsonrpc": "2.0", "method": "ping", "id": 8});
        let req = http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(SSE_CLIENT_HEADER, "no-such-client")
            .body(req_body(payload.to_string()))
            .unwrap();
        let response = endpoint.handle(req, ctx()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"], json!({}));
    }

    #[tokio::test]
    async fn plain_get_serves_capability_page() {
        let endpoint = endpoint();
        let req = http::Request::builder()
            .method("GET")
            .uri("/mcp")
            .body(req_body(""))
            .unwrap();
        let response = endpoint.handle(req, ctx()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["name"], "test");
        assert_eq!(value["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn discovery_routes_share_one_body() {
        let dispatcher = Arc::new(Dispatcher::builder("d", "1").build().unwrap());
        let discovery = DiscoveryHandler::new(Arc::clone(&dispatcher), None);

        let mut bodies = Vec::new();
        for uri in ["/.well-known/mcp.json", "/mcp/discover"] {
            let req = http::Request::builder().uri(uri).body(req_body("")).unwrap();
            let response = discovery.handle(req, ctx()).await;
            bodies.push(body_json(response).await);
        }
        assert_eq!(bodies[0], bodies[1]);
    }
}
