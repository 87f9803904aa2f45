//! # HyperServe Protocol
//!
//! Wire-level types shared by the HyperServe server and its MCP endpoint:
//!
//! - **JSON-RPC 2.0** - requests, notifications, responses, batches, and the
//!   standard error-code space ([`rpc`])
//! - **MCP** - the Model Context Protocol payload shapes: initialization,
//!   capabilities, tool and resource descriptors, content blocks ([`types`])
//!
//! This crate performs no I/O. Transports and dispatchers live in
//! `hyperserve-mcp` and `hyperserve`.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

pub mod rpc;
pub mod types;

pub use rpc::{
    ErrorCode, Incoming, Notification, Outgoing, Request, RequestId, Response, ResponseId,
    RpcError,
};
pub use types::{
    CallToolResult, Content, Implementation, InitializeParams, InitializeResult,
    ReadResourceResult, ResourceContents, ResourceDescriptor, ResourcesCapability,
    ServerCapabilities, SseCapability, ToolDescriptor, ToolsCapability, PROTOCOL_VERSION,
};
