//! The tool extension point.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::McpResult;

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    /// Fires when the client disconnects or the server shuts down. Tools
    /// must observe this at their own suspension points.
    pub cancel: CancellationToken,
    /// Whether the request carried valid credentials.
    pub authorized: bool,
    /// Deadline the dispatcher enforces around the whole call.
    pub deadline: Duration,
}

impl ToolCtx {
    /// Context for an unauthenticated call with the default deadline.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            authorized: false,
            deadline: crate::DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Mark the call as carrying valid credentials.
    #[must_use]
    pub fn authorized(mut self, authorized: bool) -> Self {
        self.authorized = authorized;
        self
    }
}

impl Default for ToolCtx {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// A named, schema-described callable exposed over MCP.
///
/// Implementations are registered before server start and are read-only
/// at runtime. The dispatcher wraps every `call` in a timeout and links
/// the context's cancellation token to the request.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Tool name before namespace prefixing.
    fn name(&self) -> &str;

    /// Human description shown in `tools/list`.
    fn description(&self) -> &str;

    /// JSON-Schema object for the tool's arguments.
    fn input_schema(&self) -> Value;

    /// Execute the tool.
    async fn call(&self, args: Value, ctx: &ToolCtx) -> McpResult<Value>;

    /// Discovery predicate; tools default to discoverable. Names starting
    /// with `_` or `internal_` are suppressed regardless.
    fn discoverable(&self) -> bool {
        true
    }
}

/// A registered tool with its externally visible (possibly prefixed) name.
pub(crate) struct RegisteredTool {
    pub external_name: String,
    pub dev_only: bool,
    pub tool: Box<dyn Tool>,
}

impl RegisteredTool {
    /// Hidden names never appear in listings or discovery documents.
    pub fn is_hidden(&self) -> bool {
        let base = self.tool.name();
        base.starts_with('_') || base.starts_with("internal_")
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("external_name", &self.external_name)
            .field("dev_only", &self.dev_only)
            .finish_non_exhaustive()
    }
}
