//! # HyperServe
//!
//! Embeddable HTTP server for high-concurrency application services:
//! request routing with per-route middleware composition, token-bucket
//! rate limiting, authentication hooks, Server-Sent Events, WebSocket
//! upgrades, and an integrated JSON-RPC 2.0 endpoint implementing the
//! Model Context Protocol.
//!
//! ## Example
//!
//! ```no_run
//! use hyperserve::{handler_fn, respond, Options, Server};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Options::builder()
//!         .addr(":8080")
//!         .load()
//!         .and_then(|options| {
//!             Server::builder()
//!                 .options(options)
//!                 .route(
//!                     "/hello",
//!                     handler_fn(|_req, _ctx| async {
//!                         respond::text(StatusCode::OK, "hello\n")
//!                     }),
//!                 )
//!                 .build()
//!         })
//!         .unwrap_or_else(|err| {
//!             eprintln!("{err}");
//!             std::process::exit(err.exit_code());
//!         });
//!
//!     let shutdown = server.shutdown_handle();
//!     // e.g. hand `shutdown` to an orchestration hook
//!     let _ = shutdown;
//!
//!     // Exit 0 on clean shutdown, 1 on bind/config failure, 2 when a
//!     // panic forced the shutdown.
//!     if let Err(err) = server.run().await {
//!         eprintln!("{err}");
//!         std::process::exit(err.exit_code());
//!     }
//! }
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

pub mod error;
pub mod handler;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod net;
pub mod options;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod sse;

// Re-export the main surface.
pub use error::{ServerError, ServerResult};
pub use handler::{handler_fn, req_body, respond, ArcHandler, Handler, HttpRequest, HttpResponse, RequestCtx};
pub use handlers::{EchoWsHandler, ServerWebSocket, WsSessionHandler, WsUpgradeHandler};
pub use metrics::ServerMetrics;
pub use middleware::{
    secure_api, secure_web, AuthMiddleware, MetricsMiddleware, Middleware, RateLimitMiddleware,
    RequestLogger, Recovery, SecurityHeaders,
};
pub use options::{McpOptions, McpTransport, Options, OptionsBuilder, TokenValidator};
pub use rate_limit::RateLimiter;
pub use router::Router;
pub use server::{LifecycleState, Server, ServerBuilder, ShutdownHandle};
pub use sse::{SseEvent, SseHub};

// The sibling crates are part of the public API surface.
pub use hyperserve_mcp as mcp;
pub use hyperserve_protocol as protocol;
pub use hyperserve_websocket as websocket;
