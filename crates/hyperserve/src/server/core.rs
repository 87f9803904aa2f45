//! The running server: listeners, connection service, draining.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyperserve_mcp::Dispatcher;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::handler::{incoming_body, respond, ArcHandler, HttpRequest, HttpResponse, RequestCtx};
use crate::metrics::ServerMetrics;
use crate::net::{ConnDeadlines, DeadlineStream};
use crate::options::{McpTransport, Options};
use crate::rate_limit::RateLimiter;
use crate::router::{RouteMatch, Router};
use crate::server::shutdown::ShutdownHandle;
use crate::server::{Lifecycle, LifecycleState, ServerBuilder, BANNER};
use crate::sse::SseHub;

/// One listener's dispatch surface: route table plus the per-route
/// composed handlers.
pub(crate) struct App {
    router: Router,
    composed: HashMap<String, ArcHandler>,
    not_found: ArcHandler,
}

impl App {
    pub(crate) fn new(
        router: Router,
        composed: HashMap<String, ArcHandler>,
        not_found: ArcHandler,
    ) -> Self {
        Self {
            router,
            composed,
            not_found,
        }
    }

    pub(crate) async fn dispatch(&self, req: HttpRequest, ctx: RequestCtx) -> HttpResponse {
        let path = req.uri().path().to_string();
        match self.router.match_path(&path) {
            RouteMatch::Handler(fallback, pattern) => {
                ctx.set_route(&pattern);
                let handler = self.composed.get(&pattern).unwrap_or(&fallback);
                handler.handle(req, ctx).await
            }
            RouteMatch::RedirectSlash(to) => {
                let mut response = respond::status(http::StatusCode::MOVED_PERMANENTLY);
                if let Ok(value) = http::HeaderValue::from_str(&to) {
                    response.headers_mut().insert(http::header::LOCATION, value);
                }
                response
            }
            RouteMatch::NotFound => self.not_found.handle(req, ctx).await,
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").field("router", &self.router).finish()
    }
}

/// The assembled server. Owns the router, SSE hub, rate limiter, and
/// MCP dispatcher; `run` drives the listeners until shutdown.
pub struct Server {
    options: Options,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    app: Arc<App>,
    health_app: Option<Arc<App>>,
    metrics: Arc<ServerMetrics>,
    limiter: Option<Arc<RateLimiter>>,
    hub: Arc<SseHub>,
    dispatcher: Arc<Dispatcher>,
    bound_addr: std::sync::OnceLock<std::net::SocketAddr>,
    /// Set when a connection task panics outside the recovery boundary;
    /// `run` then returns `ServerError::ShutdownPanic` (exit code 2).
    task_panicked: Arc<AtomicBool>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.options.addr)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl Server {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: Options,
        lifecycle: Arc<Lifecycle>,
        cancel: CancellationToken,
        app: Arc<App>,
        health_app: Option<Arc<App>>,
        metrics: Arc<ServerMetrics>,
        limiter: Option<Arc<RateLimiter>>,
        hub: Arc<SseHub>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            options,
            lifecycle,
            cancel,
            app,
            health_app,
            metrics,
            limiter,
            hub,
            dispatcher,
            bound_addr: std::sync::OnceLock::new(),
            task_panicked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Address the main listener actually bound (useful with `:0`).
    /// `None` until `run` has bound.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.bound_addr.get().copied()
    }

    /// Start building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The resolved options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Shared request metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Cloneable handle for triggering shutdown externally.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.cancel.clone(), Arc::clone(&self.lifecycle))
    }

    /// Initiate graceful shutdown. Idempotent and safe from any state.
    pub fn shutdown(&self) {
        self.shutdown_handle().shutdown();
    }

    /// Bind listeners and serve until shutdown completes.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when a listener cannot bind (fail-fast,
    /// before any traffic is accepted), and
    /// [`ServerError::ShutdownPanic`] when a background task panicked
    /// and forced the shutdown. Map the outcome to a process exit code
    /// with [`ServerError::exit_code`]: 0 on `Ok`, 1 or 2 on `Err`.
    pub async fn run(&self) -> ServerResult<()> {
        self.lifecycle.advance(LifecycleState::Starting);

        let main_addr = Options::socket_addr(&self.options.addr)?;
        let main_listener = TcpListener::bind(main_addr)
            .await
            .map_err(|err| ServerError::bind(&self.options.addr, err))?;
        let bound_main = main_listener.local_addr().map_err(ServerError::Io)?;
        let _ = self.bound_addr.set(bound_main);

        let health_listener = match &self.options.health_addr {
            Some(addr) => {
                let health_addr = Options::socket_addr(addr)?;
                let listener = TcpListener::bind(health_addr)
                    .await
                    .map_err(|err| ServerError::bind(addr, err))?;
                Some(listener)
            }
            None => None,
        };

        println!("{BANNER}");
        info!(
            addr = %bound_main,
            health_addr = self.options.health_addr.as_deref().unwrap_or("<main>"),
            mcp = self.options.mcp.enabled,
            log_level = %self.options.log_level,
            "listening"
        );

        let tracker = TaskTracker::new();

        // Signal handling: SIGINT/SIGTERM trigger graceful shutdown.
        {
            let handle = self.shutdown_handle();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = wait_for_signal() => {
                        info!("shutdown signal received");
                        handle.shutdown();
                    }
                }
            });
        }

        if let Some(limiter) = &self.limiter {
            limiter.spawn_sweeper(self.cancel.child_token());
        }

        if self.options.mcp.enabled && self.options.mcp.transport == McpTransport::Stdio {
            let dispatcher = Arc::clone(&self.dispatcher);
            let cancel = self.cancel.child_token();
            tracker.spawn(async move {
                if let Err(err) = hyperserve_mcp::stdio::run(dispatcher, cancel).await {
                    error!(error = %err, "stdio transport failed");
                }
            });
        }

        self.lifecycle.advance(LifecycleState::Serving);

        let main_loop = self.accept_loop(main_listener, Arc::clone(&self.app), &tracker);
        match (health_listener, &self.health_app) {
            (Some(listener), Some(health_app)) => {
                let health_loop = self.accept_loop(listener, Arc::clone(health_app), &tracker);
                tokio::join!(main_loop, health_loop);
            }
            _ => main_loop.await,
        }

        // Drain.
        self.lifecycle.advance(LifecycleState::Draining);
        self.hub.close_all();
        tracker.close();
        let drain = tokio::time::timeout(
            self.options.shutdown_timeout + Duration::from_secs(1),
            tracker.wait(),
        )
        .await;
        if drain.is_err() {
            warn!("drain deadline exceeded; abandoning remaining connections");
        }

        self.lifecycle.advance(LifecycleState::Stopped);
        if self.task_panicked.load(Ordering::Relaxed) {
            return Err(ServerError::ShutdownPanic(
                "connection task panicked".to_string(),
            ));
        }
        info!("server stopped");
        Ok(())
    }

    /// Accept connections until cancellation; each connection runs on
    /// the tracker so draining can wait for it.
    async fn accept_loop(&self, listener: TcpListener, app: Arc<App>, tracker: &TaskTracker) {
        let read_timeout = if self.options.read_timeout.is_zero() {
            self.options.idle_timeout
        } else {
            self.options.read_timeout
        };
        let write_timeout = self.options.write_timeout;
        let shutdown_timeout = self.options.shutdown_timeout;

        loop {
            let accepted = tokio::select! {
                () = self.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    debug!(error = %err, "accept failed");
                    continue;
                }
            };

            let app = Arc::clone(&app);
            let cancel = self.cancel.clone();
            let panicked = Arc::clone(&self.task_panicked);
            let handle = self.shutdown_handle();
            tracker.spawn(async move {
                let served = std::panic::AssertUnwindSafe(serve_connection(
                    stream,
                    peer,
                    app,
                    cancel,
                    read_timeout,
                    write_timeout,
                    shutdown_timeout,
                ))
                .catch_unwind()
                .await;
                if served.is_err() {
                    // Handler panics stop at the recovery middleware;
                    // anything landing here is a runtime bug.
                    error!(peer = %peer, "connection task panicked; initiating shutdown");
                    panicked.store(true, Ordering::Relaxed);
                    handle.shutdown();
                }
            });
        }
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    app: Arc<App>,
    cancel: CancellationToken,
    read_timeout: Duration,
    write_timeout: Duration,
    shutdown_timeout: Duration,
) {
    let deadlines = Arc::new(ConnDeadlines::new(read_timeout, write_timeout));
    let io = TokioIo::new(DeadlineStream::new(stream, Arc::clone(&deadlines)));

    // Canceled when the connection task ends, which fires request
    // cancellation for anything still running on this connection.
    let conn_token = cancel.child_token();
    let _conn_guard = conn_token.clone().drop_guard();

    let service = service_fn({
        let app = Arc::clone(&app);
        let deadlines = Arc::clone(&deadlines);
        let conn_token = conn_token.clone();
        move |req: http::Request<hyper::body::Incoming>| {
            let app = Arc::clone(&app);
            let deadlines = Arc::clone(&deadlines);
            let conn_token = conn_token.clone();
            async move {
                let ctx = RequestCtx::new(peer, conn_token.child_token())
                    .with_deadlines(deadlines);
                let req = req.map(incoming_body);
                Ok::<_, Infallible>(app.dispatch(req, ctx).await)
            }
        }
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                debug!(peer = %peer, error = %err, "connection ended with error");
            }
        }
        () = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            let _ = tokio::time::timeout(shutdown_timeout, conn).await;
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "cannot install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
