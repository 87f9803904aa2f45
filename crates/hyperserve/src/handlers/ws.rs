//! WebSocket upgrade handler.
//!
//! Validates the RFC 6455 handshake, answers `101 Switching Protocols`,
//! and hands the hijacked byte stream to a session handler on a spawned
//! task. The default session handler echoes messages back.

use std::sync::Arc;

use http::{header, HeaderValue, StatusCode};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use hyperserve_websocket::{
    accept_key, negotiate_subprotocol, validate_upgrade, Message, OriginPolicy, WebSocket, WsError,
};
use tracing::{debug, warn};

use crate::handler::{respond, Handler, HttpRequest, HttpResponse, RequestCtx};

/// The concrete session type handed to session handlers.
pub type ServerWebSocket = WebSocket<TokioIo<Upgraded>>;

/// Application logic for one upgraded connection.
#[async_trait::async_trait]
pub trait WsSessionHandler: Send + Sync {
    /// Drive the session until close or error.
    async fn handle(&self, ws: ServerWebSocket, ctx: RequestCtx);
}

/// Default session handler: echo every data message.
#[derive(Debug, Default)]
pub struct EchoWsHandler;

#[async_trait::async_trait]
impl WsSessionHandler for EchoWsHandler {
    async fn handle(&self, ws: ServerWebSocket, _ctx: RequestCtx) {
        loop {
            match ws.read_message().await {
                Ok(Message::Text(text)) => {
                    if ws.send_text(text).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(payload)) => {
                    if ws.send_binary(payload).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    if !err.is_normal_close() {
                        debug!(error = %err, "websocket session ended");
                    }
                    break;
                }
            }
        }
    }
}

/// HTTP handler performing the upgrade.
pub struct WsUpgradeHandler {
    origin_policy: OriginPolicy,
    protocols: Vec<String>,
    session: Arc<dyn WsSessionHandler>,
    max_message_size: usize,
}

impl std::fmt::Debug for WsUpgradeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsUpgradeHandler")
            .field("origin_policy", &self.origin_policy)
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}

impl WsUpgradeHandler {
    /// Upgrade handler delegating sessions to `session`.
    pub fn new(session: Arc<dyn WsSessionHandler>) -> Self {
        Self {
            origin_policy: OriginPolicy::default(),
            protocols: Vec::new(),
            session,
            max_message_size: hyperserve_websocket::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Override the origin policy (default: same-origin).
    #[must_use]
    pub fn origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    /// Subprotocols the server supports, in preference order.
    #[must_use]
    pub fn protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Override the maximum assembled message size.
    #[must_use]
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }
}

#[async_trait::async_trait]
impl Handler for WsUpgradeHandler {
    async fn handle(&self, mut req: HttpRequest, ctx: RequestCtx) -> HttpResponse {
        let offer = match validate_upgrade(&req, &self.origin_policy) {
            Ok(offer) => offer,
            Err(WsError::OriginDenied(origin)) => {
                debug!(origin, "websocket origin denied");
                return respond::status(StatusCode::FORBIDDEN);
            }
            Err(err) => {
                debug!(error = %err, "websocket handshake rejected");
                return respond::text(StatusCode::BAD_REQUEST, "bad websocket handshake\n");
            }
        };

        let accept = accept_key(&offer.key);
        let protocol = negotiate_subprotocol(&offer.protocols, &self.protocols);

        // The connection's own timeouts end here; the session enforces
        // its own ping schedule and deadlines.
        ctx.clear_read_deadline();
        ctx.clear_write_deadline();

        let session = Arc::clone(&self.session);
        let max_message_size = self.max_message_size;
        let upgrade = hyper::upgrade::on(&mut req);
        let session_ctx = ctx.clone();
        tokio::spawn(async move {
            match upgrade.await {
                Ok(upgraded) => {
                    let ws = WebSocket::server(TokioIo::new(upgraded))
                        .with_max_message_size(max_message_size);
                    session.handle(ws, session_ctx).await;
                }
                Err(err) => warn!(error = %err, "websocket upgrade failed"),
            }
        });

        let mut response = respond::status(StatusCode::SWITCHING_PROTOCOLS);
        let headers = response.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        if let Ok(value) = HeaderValue::from_str(&accept) {
            headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
        }
        if let Some(protocol) = protocol {
            if let Ok(value) = HeaderValue::from_str(&protocol) {
                headers.insert(header::SEC_WEBSOCKET_PROTOCOL, value);
            }
        }
        response
    }
}
