//! # MCP payload types
//!
//! The Model Context Protocol shapes carried inside JSON-RPC envelopes.
//! Field names and nesting are wire-exact; see the `initialize` and
//! `tools/list` shape tests at the bottom of this file.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity of a client or server implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Create an implementation descriptor.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Tools capability block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server emits `tools/list_changed` notifications
    pub list_changed: bool,
}

/// Resources capability block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether resource subscriptions are supported
    pub subscribe: bool,
    /// Whether the server emits `resources/list_changed` notifications
    pub list_changed: bool,
}

/// SSE transport capability block (HyperServe extension).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseCapability {
    /// Whether the SSE stream transport is available
    pub enabled: bool,
    /// Where the stream is served relative to the RPC endpoint
    pub endpoint: String,
    /// Whether `X-SSE-Client-ID` response routing is honored
    pub header_routing: bool,
}

impl Default for SseCapability {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "same".to_string(),
            header_routing: true,
        }
    }
}

/// Capabilities advertised in the `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool surface
    pub tools: ToolsCapability,
    /// Resource surface
    pub resources: ResourcesCapability,
    /// SSE stream surface
    pub sse: SseCapability,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision the client speaks
    pub protocol_version: String,
    /// Client capability advertisement (opaque to the server)
    #[serde(default)]
    pub capabilities: Value,
    /// Client identity
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server speaks
    pub protocol_version: String,
    /// Server capability advertisement
    pub capabilities: ServerCapabilities,
    /// Server identity
    pub server_info: Implementation,
}

/// A tool as listed by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Externally visible (possibly namespace-prefixed) name
    pub name: String,
    /// Human description
    pub description: String,
    /// JSON-Schema object for the tool's arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A resource as listed by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// Human description
    pub description: String,
    /// MIME type, when known
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A content block inside a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },
}

impl Content {
    /// Text content block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content blocks produced by the tool
    pub content: Vec<Content>,
}

impl CallToolResult {
    /// Wrap a string as the single text block of a result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
        }
    }
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    /// Resource URI
    pub uri: String,
    /// MIME type of the payload
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Text payload
    pub text: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Resource contents (one entry per URI read)
    pub contents: Vec<ResourceContents>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn initialize_result_wire_shape() {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation::new("hyperserve", "0.4.0"),
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(
            wire,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {"listChanged": false},
                    "resources": {"subscribe": false, "listChanged": false},
                    "sse": {"enabled": true, "endpoint": "same", "headerRouting": true}
                },
                "serverInfo": {"name": "hyperserve", "version": "0.4.0"}
            })
        );
    }

    #[test]
    fn initialize_params_accepts_minimal_client() {
        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        }))
        .unwrap();
        assert_eq!(params.client_info.name, "t");
        assert_eq!(params.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn tool_descriptor_uses_input_schema_key() {
        let tool = ToolDescriptor {
            name: "calculator".to_string(),
            description: "arithmetic".to_string(),
            input_schema: json!({"type": "object"}),
        };
        let wire = serde_json::to_value(&tool).unwrap();
        assert!(wire.get("inputSchema").is_some());
        assert!(wire.get("input_schema").is_none());
    }

    #[test]
    fn call_tool_result_wire_shape() {
        let result = CallToolResult::text("60");
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire, json!({"content": [{"type": "text", "text": "60"}]}));
    }

    #[test]
    fn resource_contents_round_trip() {
        let read = ReadResourceResult {
            contents: vec![ResourceContents {
                uri: "hs://config".to_string(),
                mime_type: "application/json".to_string(),
                text: "{}".to_string(),
            }],
        };
        let wire = serde_json::to_string(&read).unwrap();
        let back: ReadResourceResult = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, read);
    }

    #[test]
    fn resource_descriptor_omits_absent_mime_type() {
        let desc = ResourceDescriptor {
            uri: "hs://logs".to_string(),
            name: "logs".to_string(),
            description: "recent log entries".to_string(),
            mime_type: None,
        };
        let wire = serde_json::to_value(&desc).unwrap();
        assert!(wire.get("mimeType").is_none());
    }
}
