//! # JSON-RPC 2.0 message model
//!
//! Serde representations of the JSON-RPC 2.0 protocol as used by the MCP
//! endpoint: requests, notifications, responses with mutually exclusive
//! `result`/`error` payloads, batches, and the standard error-code space.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Version witness. Serializes as the literal string `"2.0"` and refuses
/// anything else on deserialization, so a parsed message is known-good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: a string or an integer, per the JSON-RPC grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A JSON-RPC request: carries an `id` and expects a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version marker
    pub jsonrpc: Version,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier
    pub id: RequestId,
}

impl Request {
    /// Create a request.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC notification: no `id`, no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version marker
    pub jsonrpc: Version,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
        }
    }
}

/// Response payload. Untagged so that exactly one of `result` / `error`
/// appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Successful call
    Success {
        /// Call result
        result: Value,
    },
    /// Failed call
    Failure {
        /// Error object
        error: RpcError,
    },
}

impl From<Value> for ResponsePayload {
    fn from(result: Value) -> Self {
        Self::Success { result }
    }
}

impl From<RpcError> for ResponsePayload {
    fn from(error: RpcError) -> Self {
        Self::Failure { error }
    }
}

/// Response identifier. Mirrors the request id, except for parse errors
/// where JSON-RPC 2.0 requires a literal `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<RequestId>);

impl ResponseId {
    /// Echo a request's id.
    pub fn from_request(id: RequestId) -> Self {
        Self(Some(id))
    }

    /// The `null` id used when the request could not be parsed.
    pub fn null() -> Self {
        Self(None)
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version marker
    pub jsonrpc: Version,
    /// Result or error, never both
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Identifier of the request being answered
    pub id: ResponseId,
}

impl Response {
    /// Assemble a response from a payload and an already-resolved id.
    pub fn new(payload: impl Into<ResponsePayload>, id: ResponseId) -> Self {
        Self {
            jsonrpc: Version,
            payload: payload.into(),
            id,
        }
    }

    /// Successful response echoing the request id.
    pub fn success(result: Value, id: RequestId) -> Self {
        Self::new(result, ResponseId::from_request(id))
    }

    /// Error response echoing the request id.
    pub fn failure(error: RpcError, id: RequestId) -> Self {
        Self::new(error, ResponseId::from_request(id))
    }

    /// Parse-error response; carries a `null` id because the request id
    /// could not be recovered from the malformed input.
    pub fn parse_error(detail: Option<String>) -> Self {
        let mut error = RpcError::from_code(ErrorCode::ParseError);
        if let Some(detail) = detail {
            error.message = detail;
        }
        Self::new(error, ResponseId::null())
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error from a standard code with its canonical message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }

    /// Build an error with a custom message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Standard JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON (-32700)
    ParseError,
    /// Not a valid request object (-32600)
    InvalidRequest,
    /// Unknown method (-32601)
    MethodNotFound,
    /// Bad parameters (-32602)
    InvalidParams,
    /// Server-side failure (-32603)
    InternalError,
    /// Application-defined code
    Application(i32),
}

impl ErrorCode {
    /// Numeric code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Application(code) => *code,
        }
    }

    /// Canonical message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Application(_) => "Application error",
        }
    }
}

impl From<ErrorCode> for RpcError {
    fn from(code: ErrorCode) -> Self {
        Self::from_code(code)
    }
}

/// One inbound message: a call that wants an answer, or a notification.
///
/// Untagged: the presence of `id` is what distinguishes the two, so the
/// `Request` arm must be tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    /// Request carrying an id
    Request(Request),
    /// Notification without an id
    Notification(Notification),
}

impl Incoming {
    /// The method name, for either shape.
    pub fn method(&self) -> &str {
        match self {
            Self::Request(r) => &r.method,
            Self::Notification(n) => &n.method,
        }
    }
}

/// One outbound message: a response, or a server-initiated notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outgoing {
    /// Response to a request
    Response(Response),
    /// Server-initiated notification
    Notification(Notification),
}
