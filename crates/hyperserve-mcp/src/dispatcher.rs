//! # JSON-RPC method dispatch
//!
//! The method table is assembled once by [`DispatcherBuilder`] at server
//! startup and is read-only afterwards. Transports hand raw JSON bodies to
//! [`Dispatcher::handle_body`], which performs parse / batch handling /
//! per-element routing and returns the serialized response (or `None`
//! when the payload contained only notifications).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyperserve_protocol::rpc::{ErrorCode, Incoming, Request, Response, ResponseId, RpcError};
use hyperserve_protocol::types::{
    CallToolResult, Implementation, InitializeParams, InitializeResult, ReadResourceResult,
    ResourceContents, ResourceDescriptor, ServerCapabilities, ToolDescriptor, PROTOCOL_VERSION,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::discovery::{DiscoveryPolicy, ToolListing};
use crate::error::{McpError, McpResult, ToolFailure};
use crate::metrics::McpMetrics;
use crate::resource::{ResourceCache, ResourceProvider};
use crate::session::McpSession;
use crate::tool::{RegisteredTool, Tool, ToolCtx};
use crate::DEFAULT_TOOL_TIMEOUT;

/// Transport-level facts about the request being dispatched.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Whether the transport validated credentials for this request.
    pub authorized: bool,
    /// Canceled when the client disconnects or the server drains.
    pub cancel: CancellationToken,
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            authorized: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// The assembled MCP endpoint.
pub struct Dispatcher {
    server_info: Implementation,
    endpoint: String,
    transports: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, for stable listings
    tool_order: Vec<String>,
    resources: Vec<Arc<dyn ResourceProvider>>,
    by_uri: HashMap<String, usize>,
    policy: DiscoveryPolicy,
    dev_mode: bool,
    tool_timeout: Duration,
    cache: ResourceCache,
    metrics: Arc<McpMetrics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("server_info", &self.server_info)
            .field("tools", &self.tool_order)
            .field("resources", &self.resources.len())
            .field("policy", &self.policy)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Dispatcher`]. Tool and resource registration happens
/// here; the table is frozen by [`build`](Self::build).
pub struct DispatcherBuilder {
    server_info: Implementation,
    endpoint: String,
    transports: Vec<String>,
    tools: Vec<(String, bool, Box<dyn Tool>)>,
    resources: Vec<Arc<dyn ResourceProvider>>,
    policy: DiscoveryPolicy,
    dev_mode: bool,
    tool_timeout: Duration,
    metrics: Option<Arc<McpMetrics>>,
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("server_info", &self.server_info)
            .field("tools", &self.tools.len())
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl DispatcherBuilder {
    /// Start a builder with the advertised server identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            server_info: Implementation::new(name, version),
            endpoint: "/mcp".to_string(),
            transports: vec!["http".to_string(), "sse".to_string()],
            tools: Vec::new(),
            resources: Vec::new(),
            policy: DiscoveryPolicy::default(),
            dev_mode: false,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            metrics: None,
        }
    }

    /// Endpoint path advertised in discovery documents.
    #[must_use]
    pub fn endpoint(mut self, path: impl Into<String>) -> Self {
        self.endpoint = path.into();
        self
    }

    /// Transports advertised in discovery documents.
    #[must_use]
    pub fn transports(mut self, transports: Vec<String>) -> Self {
        self.transports = transports;
        self
    }

    /// Register a tool under its own name.
    #[must_use]
    pub fn tool(mut self, tool: Box<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        self.tools.push((name, false, tool));
        self
    }

    /// Register a tool under a namespace: its external name becomes
    /// `mcp__<namespace>__<name>`.
    #[must_use]
    pub fn namespaced_tool(mut self, namespace: &str, tool: Box<dyn Tool>) -> Self {
        let name = format!("mcp__{}__{}", namespace, tool.name());
        self.tools.push((name, false, tool));
        self
    }

    /// Register a dev-only tool; listed and advertised only in dev mode.
    #[must_use]
    pub fn dev_tool(mut self, tool: Box<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        self.tools.push((name, true, tool));
        self
    }

    /// Register a resource provider.
    #[must_use]
    pub fn resource(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.resources.push(provider);
        self
    }

    /// Set the discovery policy (default: public).
    #[must_use]
    pub fn discovery_policy(mut self, policy: DiscoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable dev mode.
    #[must_use]
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Override the per-call tool timeout (default 30 s).
    #[must_use]
    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Share a metrics sink created elsewhere (so the host can surface
    /// MCP counters through its own health plane). A fresh sink is
    /// created otherwise.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<McpMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Freeze the method table.
    ///
    /// # Errors
    ///
    /// [`McpError::Registration`] on duplicate tool names after namespace
    /// prefixing or duplicate resource URIs.
    pub fn build(self) -> McpResult<Dispatcher> {
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(McpMetrics::default()));

        let mut tools = HashMap::new();
        let mut tool_order = Vec::with_capacity(self.tools.len());
        for (external_name, dev_only, tool) in self.tools {
            if tools.contains_key(&external_name) {
                return Err(McpError::Registration(format!(
                    "duplicate tool name: {external_name}"
                )));
            }
            tool_order.push(external_name.clone());
            tools.insert(
                external_name.clone(),
                RegisteredTool {
                    external_name,
                    dev_only,
                    tool,
                },
            );
        }

        let mut by_uri = HashMap::new();
        for (index, provider) in self.resources.iter().enumerate() {
            let uri = provider.descriptor().uri;
            if by_uri.insert(uri.clone(), index).is_some() {
                return Err(McpError::Registration(format!(
                    "duplicate resource uri: {uri}"
                )));
            }
        }

        if self.dev_mode {
            warn!("MCP DEVELOPER MODE ENABLED");
        }

        Ok(Dispatcher {
            server_info: self.server_info,
            endpoint: self.endpoint,
            transports: self.transports,
            tools,
            tool_order,
            resources: self.resources,
            by_uri,
            policy: self.policy,
            dev_mode: self.dev_mode,
            tool_timeout: self.tool_timeout,
            cache: ResourceCache::new(metrics.clone()),
            metrics,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

impl Dispatcher {
    /// Entry point for the builder.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> DispatcherBuilder {
        DispatcherBuilder::new(name, version)
    }

    /// Advertised server identity.
    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    /// Call metrics shared with the server's observability surfaces.
    pub fn metrics(&self) -> Arc<McpMetrics> {
        self.metrics.clone()
    }

    /// Handle one raw JSON-RPC body: a single message or a batch.
    ///
    /// Returns the JSON to send back, or `None` when the payload was
    /// entirely notifications. Parse and shape errors never panic and
    /// never tear down the transport; they come back as error responses.
    pub async fn handle_body(
        &self,
        body: &[u8],
        session: &McpSession,
        meta: &RequestMeta,
    ) -> Option<Value> {
        let parsed: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "unparseable JSON-RPC body");
                return serde_json::to_value(Response::parse_error(None)).ok();
            }
        };

        match parsed {
            Value::Array(items) if items.is_empty() => {
                Some(invalid_request_response("empty batch"))
            }
            Value::Array(items) => {
                let mut responses = Vec::new();
                for item in items {
                    if let Some(response) = self.handle_value(item, session, meta).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
            single => self.handle_value(single, session, meta).await,
        }
    }

    /// Route one already-parsed JSON value.
    async fn handle_value(
        &self,
        value: Value,
        session: &McpSession,
        meta: &RequestMeta,
    ) -> Option<Value> {
        let incoming: Incoming = match serde_json::from_value(value) {
            Ok(incoming) => incoming,
            Err(err) => {
                debug!(error = %err, "message is not a JSON-RPC request or notification");
                return Some(invalid_request_response("not a JSON-RPC message"));
            }
        };

        match incoming {
            Incoming::Notification(note) => {
                self.handle_notification(&note.method, session);
                None
            }
            Incoming::Request(request) => {
                let response = self.handle_request(request, session, meta).await;
                serde_json::to_value(response).ok()
            }
        }
    }

    fn handle_notification(&self, method: &str, session: &McpSession) {
        match method {
            "initialized" | "notifications/initialized" => {
                debug!("session initialized");
                session.mark_initialized();
            }
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn handle_request(
        &self,
        request: Request,
        session: &McpSession,
        meta: &RequestMeta,
    ) -> Response {
        let started = Instant::now();
        let method = request.method.clone();
        let id = request.id.clone();

        let result = self
            .dispatch(&method, request.params.unwrap_or(Value::Null), session, meta)
            .await;

        let ok = result.is_ok();
        self.metrics.record(&method, started.elapsed(), ok);

        match result {
            Ok(value) => Response::success(value, id),
            Err(err) => {
                debug!(method, error = %err, "request failed");
                Response::failure(err.to_rpc_error(), id)
            }
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Value,
        session: &McpSession,
        meta: &RequestMeta,
    ) -> McpResult<Value> {
        match method {
            "initialize" => self.initialize(params, session),
            "ping" => Ok(json!({})),
            "tools/list" => {
                session.require_initialized()?;
                Ok(self.list_tools(meta))
            }
            "tools/call" => {
                session.require_initialized()?;
                self.call_tool(params, meta).await
            }
            "resources/list" => {
                session.require_initialized()?;
                Ok(self.list_resources())
            }
            "resources/read" => {
                session.require_initialized()?;
                self.read_resource(params).await
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, params: Value, session: &McpSession) -> McpResult<Value> {
        let params: InitializeParams = serde_json::from_value(params)
            .map_err(|err| McpError::InvalidParams(format!("initialize: {err}")))?;
        session.begin_initialize(params.protocol_version, params.client_info)?;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: self.server_info.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Tools that survive visibility filtering for this caller: hidden
    /// names out, dev-only out unless dev mode, per-tool predicate.
    fn visible_tools(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tool_order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .filter(|entry| !entry.is_hidden())
            .filter(|entry| !entry.dev_only || self.dev_mode)
            .filter(|entry| entry.tool.discoverable())
    }

    fn list_tools(&self, meta: &RequestMeta) -> Value {
        let candidates: Vec<ToolDescriptor> = self
            .visible_tools()
            .map(|entry| ToolDescriptor {
                name: entry.external_name.clone(),
                description: entry.tool.description().to_string(),
                input_schema: entry.tool.input_schema(),
            })
            .collect();

        match self.policy.apply(candidates, meta) {
            ToolListing::Tools(tools) => json!({ "tools": tools }),
            ToolListing::Count(count) => json!({ "count": count }),
        }
    }

    async fn call_tool(&self, params: Value, meta: &RequestMeta) -> McpResult<Value> {
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|err| McpError::InvalidParams(format!("tools/call: {err}")))?;

        let entry = self
            .tools
            .get(&params.name)
            .ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;

        let ctx = ToolCtx {
            cancel: meta.cancel.clone(),
            authorized: meta.authorized,
            deadline: self.tool_timeout,
        };

        let outcome = tokio::select! {
            result = entry.tool.call(params.arguments, &ctx) => result,
            () = ctx.cancel.cancelled() => {
                Err(McpError::tool(ToolFailure::Canceled, "request canceled"))
            }
            () = tokio::time::sleep(self.tool_timeout) => {
                Err(McpError::tool(
                    ToolFailure::Timeout,
                    format!("tool '{}' exceeded {}s", params.name, self.tool_timeout.as_secs()),
                ))
            }
        }?;

        let text = match outcome {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(serde_json::to_value(CallToolResult::text(text))?)
    }

    fn list_resources(&self) -> Value {
        let resources: Vec<ResourceDescriptor> = self
            .resources
            .iter()
            .map(|provider| provider.descriptor())
            .collect();
        json!({ "resources": resources })
    }

    async fn read_resource(&self, params: Value) -> McpResult<Value> {
        let params: ReadResourceParams = serde_json::from_value(params)
            .map_err(|err| McpError::InvalidParams(format!("resources/read: {err}")))?;

        let index = *self
            .by_uri
            .get(&params.uri)
            .ok_or_else(|| McpError::ResourceNotFound(params.uri.clone()))?;
        let provider = &self.resources[index];
        let descriptor = provider.descriptor();

        let text = self.cache.read_through(&params.uri, provider.as_ref()).await?;
        let result = ReadResourceResult {
            contents: vec![ResourceContents {
                uri: params.uri,
                mime_type: descriptor
                    .mime_type
                    .unwrap_or_else(|| "text/plain".to_string()),
                text,
            }],
        };
        Ok(serde_json::to_value(result)?)
    }

    /// The document served at `/.well-known/mcp.json` and `/mcp/discover`.
    /// Both routes call this, so the bodies are identical by construction.
    pub fn discovery_document(&self, meta: &RequestMeta) -> Value {
        let candidates: Vec<ToolDescriptor> = self
            .visible_tools()
            .map(|entry| ToolDescriptor {
                name: entry.external_name.clone(),
                description: entry.tool.description().to_string(),
                input_schema: entry.tool.input_schema(),
            })
            .collect();

        let tools = match self.policy.apply(candidates, meta) {
            ToolListing::Tools(tools) => json!(tools
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description}))
                .collect::<Vec<_>>()),
            ToolListing::Count(count) => json!({ "count": count }),
        };

        json!({
            "name": self.server_info.name,
            "version": self.server_info.version,
            "protocolVersion": PROTOCOL_VERSION,
            "endpoint": self.endpoint,
            "transports": self.transports,
            "tools": tools,
            "resources": self
                .resources
                .iter()
                .map(|p| p.descriptor())
                .collect::<Vec<_>>(),
        })
    }
}

fn invalid_request_response(detail: &str) -> Value {
    let response = Response::new(
        RpcError::new(ErrorCode::InvalidRequest, detail),
        ResponseId::null(),
    );
    serde_json::to_value(response).unwrap_or(Value::Null)
}
