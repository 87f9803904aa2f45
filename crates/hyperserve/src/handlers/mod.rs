//! Built-in endpoint handlers: health plane, static files, the MCP
//! endpoint (JSON-RPC + SSE + discovery), and WebSocket upgrades.

mod health;
mod mcp;
mod static_files;
mod ws;

pub use health::{HealthHandler, HealthKind, ReadinessCheck};
pub use mcp::{DiscoveryHandler, McpEndpoint};
pub use static_files::StaticFileHandler;
pub use ws::{EchoWsHandler, ServerWebSocket, WsSessionHandler, WsUpgradeHandler};
