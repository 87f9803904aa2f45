//! MCP error types and their JSON-RPC projections.

use hyperserve_protocol::rpc::{ErrorCode, RpcError};
use serde_json::json;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Failure kinds surfaced to clients in `error.data.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailure {
    /// Arguments were structurally valid JSON but semantically wrong
    InvalidArgument,
    /// The tool gave up of its own accord
    Failed,
    /// The 30 s (or configured) execution deadline elapsed
    Timeout,
    /// The request was canceled before the tool finished
    Canceled,
    /// A sandbox or allow-list refused the operation
    Denied,
}

impl ToolFailure {
    /// The wire string carried in `data.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Denied => "denied",
        }
    }
}

/// Errors produced by the dispatcher and by tools/resources.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum McpError {
    /// Unknown JSON-RPC method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Parameters did not match the method's expectations.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// `initialize` arrived on an already-initialized session.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// A method other than `initialize`/`ping` arrived before
    /// initialization completed.
    #[error("server not initialized")]
    NotInitialized,

    /// `tools/call` named a tool that is not registered.
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// `resources/read` named a URI that is not registered.
    #[error("unknown resource: {0}")]
    ResourceNotFound(String),

    /// A tool failed in an application-visible way.
    #[error("tool failed ({}): {message}", .kind.kind())]
    Tool {
        /// Failure classification, surfaced as `data.kind`
        kind: ToolFailure,
        /// Human-readable detail
        message: String,
    },

    /// Registration-time conflict (duplicate tool name after prefixing).
    #[error("registration conflict: {0}")]
    Registration(String),

    /// Filesystem failure inside a tool or resource.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else; detail is logged, not sent to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Tool-failure constructor.
    pub fn tool(kind: ToolFailure, message: impl Into<String>) -> Self {
        Self::Tool {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ToolFailure::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::tool(ToolFailure::InvalidArgument, message)
    }

    /// Project onto the JSON-RPC error object sent to clients.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::MethodNotFound(method) => RpcError::new(
                ErrorCode::MethodNotFound,
                format!("method not found: {method}"),
            ),
            Self::InvalidParams(detail) => {
                RpcError::new(ErrorCode::InvalidParams, detail.clone())
            }
            Self::AlreadyInitialized => RpcError::new(
                ErrorCode::InvalidRequest,
                "session already initialized",
            ),
            Self::NotInitialized => RpcError::new(
                ErrorCode::Application(-32002),
                "server not initialized",
            ),
            Self::ToolNotFound(name) => RpcError::new(
                ErrorCode::Application(-32601),
                format!("unknown tool: {name}"),
            ),
            Self::ResourceNotFound(uri) => RpcError::new(
                ErrorCode::Application(-32601),
                format!("unknown resource: {uri}"),
            ),
            Self::Tool { kind, message } => {
                RpcError::new(ErrorCode::InternalError, message.clone())
                    .with_data(json!({"kind": kind.kind()}))
            }
            Self::Registration(detail) | Self::Internal(detail) => RpcError::new(
                ErrorCode::InternalError,
                detail.clone(),
            ),
            Self::Io(err) => RpcError::new(ErrorCode::InternalError, err.to_string()),
            Self::Json(_) => RpcError::new(ErrorCode::InvalidParams, "malformed parameters"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_carry_kind_in_data() {
        let err = McpError::tool(ToolFailure::Timeout, "tool timed out");
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32603);
        assert_eq!(rpc.data.unwrap()["kind"], "timeout");
    }

    #[test]
    fn invalid_argument_maps_to_internal_code() {
        let rpc = McpError::invalid_argument("division by zero").to_rpc_error();
        assert_eq!(rpc.code, -32603);
        assert_eq!(rpc.data.unwrap()["kind"], "invalid_argument");
    }

    #[test]
    fn standard_codes() {
        assert_eq!(
            McpError::MethodNotFound("x".into()).to_rpc_error().code,
            -32601
        );
        assert_eq!(
            McpError::InvalidParams("x".into()).to_rpc_error().code,
            -32602
        );
        assert_eq!(McpError::AlreadyInitialized.to_rpc_error().code, -32600);
        assert_eq!(McpError::NotInitialized.to_rpc_error().code, -32002);
    }
}
