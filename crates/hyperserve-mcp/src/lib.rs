//! # HyperServe MCP
//!
//! The Model Context Protocol endpoint of HyperServe: a JSON-RPC 2.0
//! dispatcher whose method table is assembled at server startup from
//! built-in, dev, observability, and user-contributed extensions.
//!
//! - [`dispatcher`] - the method table, batch handling, and per-call
//!   timeout/cancellation plumbing
//! - [`session`] - the `initialize` → `initialized` state machine
//! - [`tool`] / [`resource`] - the extension traits and the TTL resource
//!   cache with single-flight refresh
//! - [`discovery`] - the tool-visibility policy and the discovery document
//! - [`builtin`] - calculator, sandboxed file tools, outbound HTTP
//! - [`dev`] - runtime-introspection tools (dev mode only)
//! - [`observability`] - sanitized config / health / log-ring resources
//! - [`stdio`] - newline-delimited JSON-RPC over stdin/stdout
//!
//! The dispatcher is transport-neutral; the HTTP and SSE adapters live in
//! the `hyperserve` crate.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

pub mod builtin;
pub mod dev;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod resource;
pub mod session;
pub mod stdio;
pub mod tool;

pub use discovery::DiscoveryPolicy;
pub use dispatcher::{Dispatcher, DispatcherBuilder, RequestMeta};
pub use error::{McpError, McpResult, ToolFailure};
pub use metrics::McpMetrics;
pub use resource::{ResourceCache, ResourceProvider};
pub use session::McpSession;
pub use tool::{Tool, ToolCtx};

/// Default timeout applied to each tool execution.
pub const DEFAULT_TOOL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Default resource cache TTL.
pub const DEFAULT_RESOURCE_TTL: std::time::Duration = std::time::Duration::from_secs(300);
