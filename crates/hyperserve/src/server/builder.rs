//! Server assembly.
//!
//! The builder collects routes, middleware bindings, WebSocket routes,
//! and MCP extensions, then wires the whole runtime: logging, metrics,
//! rate limiter, SSE hub, MCP dispatcher, health plane, and the
//! per-route composed handler table.

use std::collections::HashMap;
use std::sync::Arc;

use hyperserve_mcp::dev::{CapturedRequest, DevState, RouteInfo};
use hyperserve_mcp::discovery::DiscoveryPolicy;
use hyperserve_mcp::observability::{
    ConfigResource, HealthResource, LogRing, LogsResource, RingLayer,
};
use hyperserve_mcp::{builtin, dev, Dispatcher, RequestMeta, ResourceProvider, Tool};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ServerResult;
use crate::handler::{handler_fn, respond, ArcHandler, HttpRequest, RequestCtx};
use crate::handlers::{
    DiscoveryHandler, EchoWsHandler, HealthHandler, HealthKind, McpEndpoint, ReadinessCheck,
    StaticFileHandler, WsUpgradeHandler,
};
use crate::logging;
use crate::metrics::ServerMetrics;
use crate::middleware::{
    MetricsMiddleware, Middleware, MiddlewareRegistry, RateLimitMiddleware, RequestLogger,
    Recovery, SecurityHeaders, GLOBAL_PATTERN,
};
use crate::options::{DiscoveryPolicyKind, Options};
use crate::rate_limit::RateLimiter;
use crate::router::Router;
use crate::server::core::{App, Server};
use crate::server::Lifecycle;
use crate::sse::SseHub;

type DiscoveryPredicate = Arc<dyn Fn(&str, &RequestMeta) -> bool + Send + Sync>;

/// Builder for [`Server`].
pub struct ServerBuilder {
    options: Option<Options>,
    routes: Vec<(String, ArcHandler)>,
    bindings: Vec<(String, Arc<dyn Middleware>, Vec<String>)>,
    ws_routes: Vec<(String, Arc<WsUpgradeHandler>)>,
    tools: Vec<Box<dyn Tool>>,
    namespaced_tools: Vec<(String, Box<dyn Tool>)>,
    resources: Vec<Arc<dyn ResourceProvider>>,
    custom_discovery: Option<DiscoveryPredicate>,
    readiness: Option<ReadinessCheck>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("routes", &self.routes.len())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            options: None,
            routes: Vec::new(),
            bindings: Vec::new(),
            ws_routes: Vec::new(),
            tools: Vec::new(),
            namespaced_tools: Vec::new(),
            resources: Vec::new(),
            custom_discovery: None,
            readiness: None,
        }
    }
}

impl ServerBuilder {
    /// Fresh builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use pre-resolved options (skips the env/file layering).
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// Register a route. Identical patterns replace predecessors.
    #[must_use]
    pub fn route(mut self, pattern: impl Into<String>, handler: ArcHandler) -> Self {
        self.routes.push((pattern.into(), handler));
        self
    }

    /// Bind a middleware globally (`*`) or to a path prefix.
    #[must_use]
    pub fn middleware(mut self, pattern: impl Into<String>, mw: Arc<dyn Middleware>) -> Self {
        self.bindings.push((pattern.into(), mw, Vec::new()));
        self
    }

    /// Bind a middleware with route patterns it must not wrap.
    #[must_use]
    pub fn middleware_excluding(
        mut self,
        pattern: impl Into<String>,
        mw: Arc<dyn Middleware>,
        excluded_routes: Vec<String>,
    ) -> Self {
        self.bindings.push((pattern.into(), mw, excluded_routes));
        self
    }

    /// Register a WebSocket upgrade route.
    #[must_use]
    pub fn websocket(mut self, pattern: impl Into<String>, handler: WsUpgradeHandler) -> Self {
        self.ws_routes.push((pattern.into(), Arc::new(handler)));
        self
    }

    /// Contribute an MCP tool under its own name.
    #[must_use]
    pub fn mcp_tool(mut self, tool: Box<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Contribute an MCP tool under a namespace
    /// (external name `mcp__<ns>__<name>`).
    #[must_use]
    pub fn mcp_namespaced_tool(mut self, namespace: impl Into<String>, tool: Box<dyn Tool>) -> Self {
        self.namespaced_tools.push((namespace.into(), tool));
        self
    }

    /// Contribute an MCP resource.
    #[must_use]
    pub fn mcp_resource(mut self, resource: Arc<dyn ResourceProvider>) -> Self {
        self.resources.push(resource);
        self
    }

    /// Custom discovery predicate (`(tool_name, request) -> bool`);
    /// overrides the configured policy.
    #[must_use]
    pub fn mcp_discovery_predicate(mut self, predicate: DiscoveryPredicate) -> Self {
        self.custom_discovery = Some(predicate);
        self
    }

    /// Readiness predicate for `/readyz/` (default: serving state).
    #[must_use]
    pub fn readiness(mut self, check: ReadinessCheck) -> Self {
        self.readiness = Some(check);
        self
    }

    /// Assemble the server.
    ///
    /// # Errors
    ///
    /// Configuration resolution/validation failures and MCP registration
    /// conflicts.
    pub fn build(self) -> ServerResult<Server> {
        let Self {
            options,
            routes,
            bindings,
            ws_routes,
            tools,
            namespaced_tools,
            resources,
            custom_discovery,
            readiness,
        } = self;

        let options = match options {
            Some(options) => options,
            None => Options::builder().load()?,
        };

        // Logging first so every later step can log.
        let log_ring = options
            .mcp
            .observability
            .then(|| LogRing::new(options.mcp.log_resource_size));
        let log_control = logging::init(&options.log_level, log_ring.clone().map(RingLayer::new));

        let lifecycle = Arc::new(Lifecycle::default());
        let cancel = CancellationToken::new();
        let metrics = Arc::new(ServerMetrics::new());

        let limiter = (options.rate_limit > 0)
            .then(|| Arc::new(RateLimiter::new(options.rate_limit, options.burst_limit)));

        let dev_state = options.mcp.dev.then(|| {
            let state = Arc::new(DevState::new(options.log_level.clone(), 64));
            state.on_log_level_change(log_control.as_callback());
            state
        });

        let dispatcher = Arc::new(assemble_dispatcher(
            &options,
            &metrics,
            dev_state.as_ref(),
            log_ring,
            tools,
            namespaced_tools,
            resources,
            custom_discovery,
        )?);
        let hub = Arc::new(SseHub::new(Arc::clone(&metrics)));

        // Route table.
        let mut router = Router::new();
        for (pattern, handler) in routes {
            router.register(pattern, handler);
        }

        let readiness: ReadinessCheck = match readiness {
            Some(check) => check,
            None => {
                let lifecycle = Arc::clone(&lifecycle);
                Arc::new(move || lifecycle.is_serving())
            }
        };

        if options.health_addr.is_none() {
            register_health_routes(&mut router, &metrics, &readiness);
        }

        if let Some(static_dir) = &options.static_dir {
            router.register(
                "/static/",
                Arc::new(StaticFileHandler::new(static_dir.clone(), "/static/")),
            );
        }

        if options.mcp.enabled {
            let endpoint = Arc::new(McpEndpoint::new(
                Arc::clone(&dispatcher),
                Arc::clone(&hub),
                options.auth_token_validator.clone(),
            ));
            router.register(options.mcp.endpoint.clone(), endpoint);
            let discovery = Arc::new(DiscoveryHandler::new(
                Arc::clone(&dispatcher),
                options.auth_token_validator.clone(),
            ));
            router.register(
                "/.well-known/mcp.json",
                Arc::clone(&discovery) as ArcHandler,
            );
            router.register("/mcp/discover", discovery);
        }

        let have_ws_default = ws_routes.iter().any(|(pattern, _)| pattern == "/ws");
        for (pattern, handler) in ws_routes {
            router.register(pattern, handler);
        }
        if !have_ws_default {
            router.register(
                "/ws",
                Arc::new(WsUpgradeHandler::new(Arc::new(EchoWsHandler))),
            );
        }

        // Middleware: the default global stack, then deployer bindings.
        let mut registry = MiddlewareRegistry::new();
        registry.bind(
            GLOBAL_PATTERN,
            Arc::new(MetricsMiddleware::new(Arc::clone(&metrics))),
        );
        registry.bind(GLOBAL_PATTERN, Arc::new(RequestLogger::new()));
        registry.bind(GLOBAL_PATTERN, Arc::new(Recovery::new()));
        registry.bind(
            GLOBAL_PATTERN,
            Arc::new(SecurityHeaders::new(
                options.csp_web_worker_support,
                options.cors_origins.clone(),
            )),
        );
        if let Some(limiter) = &limiter {
            registry.bind(
                GLOBAL_PATTERN,
                Arc::new(RateLimitMiddleware::new(Arc::clone(limiter))),
            );
        }
        if let Some(state) = &dev_state {
            registry.bind(GLOBAL_PATTERN, Arc::new(DevCapture::new(Arc::clone(state))));
        }
        for (pattern, mw, exclusions) in bindings {
            registry.bind_excluding(pattern, mw, exclusions);
        }

        // Compose once per route.
        let mut composed = HashMap::new();
        for route in router.routes() {
            composed.insert(
                route.pattern.clone(),
                registry.compose(&route.pattern, Arc::clone(&route.handler)),
            );
        }
        let not_found = registry.compose(
            "/",
            handler_fn(|_req: HttpRequest, _ctx: RequestCtx| async { respond::not_found() }),
        );

        if let Some(state) = &dev_state {
            let routes = router
                .routes()
                .iter()
                .map(|route| RouteInfo {
                    pattern: route.pattern.clone(),
                    middleware: registry.chain_names(&route.pattern),
                })
                .collect();
            state.set_routes(routes);
        }

        // The health listener, when separate, gets a bare route table.
        let health_app = options.health_addr.as_ref().map(|_| {
            let mut health_router = Router::new();
            register_health_routes(&mut health_router, &metrics, &readiness);
            let composed = health_router
                .routes()
                .iter()
                .map(|route| (route.pattern.clone(), Arc::clone(&route.handler)))
                .collect();
            Arc::new(App::new(
                health_router,
                composed,
                handler_fn(|_req: HttpRequest, _ctx: RequestCtx| async { respond::not_found() }),
            ))
        });

        info!(
            mcp_enabled = options.mcp.enabled,
            dev_mode = options.mcp.dev,
            rate_limit = options.rate_limit,
            "server assembled"
        );

        Ok(Server::new(
            options,
            lifecycle,
            cancel,
            Arc::new(App::new(router, composed, not_found)),
            health_app,
            metrics,
            limiter,
            hub,
            dispatcher,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble_dispatcher(
    options: &Options,
    metrics: &Arc<ServerMetrics>,
    dev_state: Option<&Arc<DevState>>,
    log_ring: Option<LogRing>,
    tools: Vec<Box<dyn Tool>>,
    namespaced_tools: Vec<(String, Box<dyn Tool>)>,
    resources: Vec<Arc<dyn ResourceProvider>>,
    custom_discovery: Option<DiscoveryPredicate>,
) -> ServerResult<Dispatcher> {
    let policy = match (custom_discovery, options.mcp.discovery_policy) {
        (Some(predicate), _) => DiscoveryPolicy::Custom(predicate),
        (None, DiscoveryPolicyKind::Public) => DiscoveryPolicy::Public,
        (None, DiscoveryPolicyKind::Authenticated) => DiscoveryPolicy::Authenticated,
        (None, DiscoveryPolicyKind::Count) => DiscoveryPolicy::CountOnly,
        (None, DiscoveryPolicyKind::None) => DiscoveryPolicy::None,
    };

    let mcp_metrics = Arc::new(hyperserve_mcp::McpMetrics::default());
    let mut builder = Dispatcher::builder(&options.mcp.server_name, &options.mcp.server_version)
        .endpoint(options.mcp.endpoint.clone())
        .discovery_policy(policy)
        .dev_mode(options.mcp.dev)
        .metrics(Arc::clone(&mcp_metrics));

    if options.mcp.builtin_tools {
        builder = builder
            .tool(Box::new(builtin::CalculatorTool))
            .tool(Box::new(builtin::ReadFileTool::new(
                options.mcp.file_tool_root.clone(),
            )))
            .tool(Box::new(builtin::ListDirectoryTool::new(
                options.mcp.file_tool_root.clone(),
            )))
            .tool(Box::new(builtin::HttpRequestTool::new(Vec::new())));
    }

    if let Some(state) = dev_state {
        builder = builder
            .dev_tool(Box::new(dev::ServerControlTool::new(Arc::clone(state))))
            .dev_tool(Box::new(dev::ListRoutesTool::new(Arc::clone(state))))
            .dev_tool(Box::new(dev::InspectMiddlewareTool::new(Arc::clone(state))))
            .dev_tool(Box::new(dev::RecentRequestsTool::new(Arc::clone(state))));
    }

    if options.mcp.observability {
        builder = builder.resource(Arc::new(ConfigResource::new(options.sanitized())));
        let metrics = Arc::clone(metrics);
        let mcp_metrics = Arc::clone(&mcp_metrics);
        builder = builder.resource(Arc::new(HealthResource::new(Arc::new(move || {
            let mut snapshot = metrics.snapshot();
            if let Some(map) = snapshot.as_object_mut() {
                map.insert("mcp".to_string(), mcp_metrics.snapshot());
            }
            snapshot
        }))));
        if let Some(ring) = log_ring {
            builder = builder.resource(Arc::new(LogsResource::new(ring)));
        }
    }

    for tool in tools {
        builder = builder.tool(tool);
    }
    for (namespace, tool) in namespaced_tools {
        builder = builder.namespaced_tool(&namespace, tool);
    }
    for resource in resources {
        builder = builder.resource(resource);
    }

    builder
        .build()
        .map_err(|err| crate::error::ServerError::config(err.to_string()))
}

fn register_health_routes(
    router: &mut Router,
    metrics: &Arc<ServerMetrics>,
    readiness: &ReadinessCheck,
) {
    router.register(
        "/healthz/",
        Arc::new(HealthHandler::new(
            Arc::clone(metrics),
            Arc::clone(readiness),
            HealthKind::Health,
        )),
    );
    router.register(
        "/readyz/",
        Arc::new(HealthHandler::new(
            Arc::clone(metrics),
            Arc::clone(readiness),
            HealthKind::Ready,
        )),
    );
    router.register(
        "/livez/",
        Arc::new(HealthHandler::new(
            Arc::clone(metrics),
            Arc::clone(readiness),
            HealthKind::Live,
        )),
    );
}

/// Dev-mode capture of served requests into the recent-requests ring.
struct DevCapture {
    state: Arc<DevState>,
}

impl DevCapture {
    fn new(state: Arc<DevState>) -> Self {
        Self { state }
    }
}

impl Middleware for DevCapture {
    fn name(&self) -> &str {
        "dev_capture"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        let state = Arc::clone(&self.state);
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            let state = Arc::clone(&state);
            async move {
                let method = req.method().to_string();
                let path = req.uri().path().to_string();
                let started = std::time::Instant::now();
                let response = next.handle(req, ctx).await;
                state.capture(CapturedRequest {
                    time: chrono::Utc::now().to_rfc3339(),
                    method,
                    path,
                    status: response.status().as_u16(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                response
            }
        })
    }
}
