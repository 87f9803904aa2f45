//! Runtime-introspection tools, registered only in dev mode.
//!
//! The server feeds [`DevState`] as routes are registered and requests are
//! served; the tools read (and, for the log level, write) that state.
//! Enabling dev mode logs a prominent startup warning from the dispatcher
//! builder.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{McpError, McpResult};
use crate::tool::{Tool, ToolCtx};

/// A route as seen by the introspection tools.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    /// Route pattern
    pub pattern: String,
    /// Names of the middleware wrapping the route, outermost first
    pub middleware: Vec<String>,
}

/// One captured request, kept in the recent-requests ring.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedRequest {
    /// RFC 3339 receipt time
    pub time: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Response status
    pub status: u16,
    /// Handler wall time in milliseconds
    pub duration_ms: u64,
}

/// Shared state between the server runtime and the dev tools.
pub struct DevState {
    log_level: RwLock<String>,
    apply_log_level: RwLock<Option<Arc<dyn Fn(&str) + Send + Sync>>>,
    routes: RwLock<Vec<RouteInfo>>,
    requests: Mutex<VecDeque<CapturedRequest>>,
    capture_capacity: usize,
}

impl std::fmt::Debug for DevState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevState")
            .field("log_level", &self.log_level.read().clone())
            .field("routes", &self.routes.read().len())
            .finish_non_exhaustive()
    }
}

impl DevState {
    /// Fresh state; `capture_capacity` bounds the recent-requests ring.
    pub fn new(initial_log_level: impl Into<String>, capture_capacity: usize) -> Self {
        Self {
            log_level: RwLock::new(initial_log_level.into()),
            apply_log_level: RwLock::new(None),
            routes: RwLock::new(Vec::new()),
            requests: Mutex::new(VecDeque::with_capacity(capture_capacity)),
            capture_capacity,
        }
    }

    /// Install the callback that applies a new log level to the
    /// subscriber (the server provides this at startup).
    pub fn on_log_level_change(&self, apply: Arc<dyn Fn(&str) + Send + Sync>) {
        *self.apply_log_level.write() = Some(apply);
    }

    /// Current log level.
    pub fn log_level(&self) -> String {
        self.log_level.read().clone()
    }

    /// Change the log level, invoking the installed callback.
    pub fn set_log_level(&self, level: &str) {
        *self.log_level.write() = level.to_string();
        if let Some(apply) = self.apply_log_level.read().as_ref() {
            apply(level);
        }
    }

    /// Replace the route table shown by `list_routes`.
    pub fn set_routes(&self, routes: Vec<RouteInfo>) {
        *self.routes.write() = routes;
    }

    /// Record a served request in the capture ring (drop-oldest).
    pub fn capture(&self, request: CapturedRequest) {
        let mut ring = self.requests.lock();
        if ring.len() == self.capture_capacity {
            ring.pop_front();
        }
        ring.push_back(request);
    }

    fn routes_snapshot(&self) -> Vec<RouteInfo> {
        self.routes.read().clone()
    }

    fn requests_snapshot(&self) -> Vec<CapturedRequest> {
        self.requests.lock().iter().cloned().collect()
    }
}

/// `server_control` - get or set the runtime log level.
#[derive(Debug)]
pub struct ServerControlTool {
    state: Arc<DevState>,
}

impl ServerControlTool {
    /// Bind to the shared dev state.
    pub fn new(state: Arc<DevState>) -> Self {
        Self { state }
    }
}

#[derive(Debug, Deserialize)]
struct ControlArgs {
    action: String,
    level: Option<String>,
}

#[async_trait::async_trait]
impl Tool for ServerControlTool {
    fn name(&self) -> &str {
        "server_control"
    }

    fn description(&self) -> &str {
        "Get or set the server's runtime log level"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["get_log_level", "set_log_level"]},
                "level": {"type": "string", "enum": ["trace", "debug", "info", "warn", "error"]}
            },
            "required": ["action"]
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let args: ControlArgs = serde_json::from_value(args)
            .map_err(|err| McpError::InvalidParams(format!("server_control: {err}")))?;
        match args.action.as_str() {
            "get_log_level" => Ok(json!({"level": self.state.log_level()})),
            "set_log_level" => {
                let level = args
                    .level
                    .ok_or_else(|| McpError::invalid_argument("set_log_level requires 'level'"))?;
                match level.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" => {
                        self.state.set_log_level(&level);
                        Ok(json!({"level": level}))
                    }
                    other => Err(McpError::invalid_argument(format!(
                        "unknown log level: {other}"
                    ))),
                }
            }
            other => Err(McpError::invalid_argument(format!("unknown action: {other}"))),
        }
    }
}

/// `list_routes` - dump the route table.
#[derive(Debug)]
pub struct ListRoutesTool {
    state: Arc<DevState>,
}

impl ListRoutesTool {
    /// Bind to the shared dev state.
    pub fn new(state: Arc<DevState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl Tool for ListRoutesTool {
    fn name(&self) -> &str {
        "list_routes"
    }

    fn description(&self) -> &str {
        "List the server's registered routes"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn call(&self, _args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let routes: Vec<Value> = self
            .state
            .routes_snapshot()
            .into_iter()
            .map(|r| json!({"pattern": r.pattern}))
            .collect();
        Ok(json!({"routes": routes}))
    }
}

/// `inspect_middleware` - show the middleware chain per route.
#[derive(Debug)]
pub struct InspectMiddlewareTool {
    state: Arc<DevState>,
}

impl InspectMiddlewareTool {
    /// Bind to the shared dev state.
    pub fn new(state: Arc<DevState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl Tool for InspectMiddlewareTool {
    fn name(&self) -> &str {
        "inspect_middleware"
    }

    fn description(&self) -> &str {
        "Show the composed middleware chain for each route, outermost first"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn call(&self, _args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        Ok(serde_json::to_value(self.state.routes_snapshot())?)
    }
}

/// `recent_requests` - read or clear the request capture ring.
#[derive(Debug)]
pub struct RecentRequestsTool {
    state: Arc<DevState>,
}

impl RecentRequestsTool {
    /// Bind to the shared dev state.
    pub fn new(state: Arc<DevState>) -> Self {
        Self { state }
    }
}

#[derive(Debug, Deserialize)]
struct RecentArgs {
    #[serde(default)]
    action: Option<String>,
}

#[async_trait::async_trait]
impl Tool for RecentRequestsTool {
    fn name(&self) -> &str {
        "recent_requests"
    }

    fn description(&self) -> &str {
        "List recently served requests (method, path, status, timing) for replay"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["list", "clear"]}
            }
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let args: RecentArgs = serde_json::from_value(args)
            .map_err(|err| McpError::InvalidParams(format!("recent_requests: {err}")))?;
        match args.action.as_deref() {
            None | Some("list") => Ok(serde_json::to_value(self.state.requests_snapshot())?),
            Some("clear") => {
                self.state.requests.lock().clear();
                Ok(json!({"cleared": true}))
            }
            Some(other) => Err(McpError::invalid_argument(format!(
                "unknown action: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn log_level_round_trip_invokes_callback() {
        let state = Arc::new(DevState::new("info", 8));
        let applied = Arc::new(AtomicUsize::new(0));
        let counter = applied.clone();
        state.on_log_level_change(Arc::new(move |_level| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let tool = ServerControlTool::new(state.clone());
        let out = tool
            .call(json!({"action": "get_log_level"}), &ToolCtx::default())
            .await
            .unwrap();
        assert_eq!(out["level"], "info");

        tool.call(
            json!({"action": "set_log_level", "level": "debug"}),
            &ToolCtx::default(),
        )
        .await
        .unwrap();
        assert_eq!(state.log_level(), "debug");
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_level_rejected() {
        let tool = ServerControlTool::new(Arc::new(DevState::new("info", 8)));
        assert!(tool
            .call(
                json!({"action": "set_log_level", "level": "loud"}),
                &ToolCtx::default()
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn capture_ring_drops_oldest() {
        let state = Arc::new(DevState::new("info", 2));
        for i in 0..3 {
            state.capture(CapturedRequest {
                time: format!("t{i}"),
                method: "GET".into(),
                path: format!("/r{i}"),
                status: 200,
                duration_ms: 1,
            });
        }
        let tool = RecentRequestsTool::new(state);
        let out = tool.call(json!({}), &ToolCtx::default()).await.unwrap();
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["path"], "/r1");
        assert_eq!(items[1]["path"], "/r2");
    }

    #[tokio::test]
    async fn route_table_snapshot() {
        let state = Arc::new(DevState::new("info", 8));
        state.set_routes(vec![RouteInfo {
            pattern: "/api/".into(),
            middleware: vec!["metrics".into(), "auth".into()],
        }]);
        let tool = InspectMiddlewareTool::new(state);
        let out = tool.call(json!({}), &ToolCtx::default()).await.unwrap();
        assert_eq!(out[0]["pattern"], "/api/");
        assert_eq!(out[0]["middleware"][1], "auth");
    }
}
