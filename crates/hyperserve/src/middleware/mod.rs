//! # Middleware pipeline
//!
//! A middleware wraps a handler and returns a handler. Bindings associate
//! an ordered list of middleware with either every route (`*`) or a path
//! prefix, minus per-route exclusions. Composition happens once per route
//! at server start:
//!
//! 1. global bindings, in registration order;
//! 2. bindings whose pattern is a prefix of the route's pattern, in
//!    registration order;
//! 3. minus exclusions.
//!
//! The first-registered global ends up outermost.

mod auth;
mod headers;
mod logger;
mod metrics;
mod rate_limit;
mod recovery;

pub use auth::{static_token_validator, AuthMiddleware};
pub(crate) use auth::bearer_token;
pub use headers::SecurityHeaders;
pub use logger::RequestLogger;
pub use metrics::MetricsMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use recovery::Recovery;

use std::collections::HashSet;
use std::sync::Arc;

use crate::handler::ArcHandler;

/// A handler wrapper.
pub trait Middleware: Send + Sync {
    /// Stable name, used for exclusions and dev introspection.
    fn name(&self) -> &str;

    /// Wrap `next`, returning the composed handler.
    fn wrap(&self, next: ArcHandler) -> ArcHandler;
}

/// Pattern for the global binding.
pub const GLOBAL_PATTERN: &str = "*";

/// The `SecureWeb` stack: security headers only. Bind it to HTML-serving
/// routes.
pub fn secure_web(
    worker_blob: bool,
    cors_origins: Vec<String>,
) -> Vec<Arc<dyn Middleware>> {
    vec![Arc::new(SecurityHeaders::new(worker_blob, cors_origins))]
}

/// The `SecureAPI` stack: bearer auth then rate limiting. Bind it to API
/// prefixes.
pub fn secure_api(
    validator: Option<crate::options::TokenValidator>,
    limiter: Arc<crate::rate_limit::RateLimiter>,
) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(AuthMiddleware::new(validator)),
        Arc::new(RateLimitMiddleware::new(limiter)),
    ]
}

struct Binding {
    pattern: String,
    middleware: Arc<dyn Middleware>,
    excluded_routes: HashSet<String>,
}

/// Ordered middleware bindings.
#[derive(Default)]
pub struct MiddlewareRegistry {
    bindings: Vec<Binding>,
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self
            .bindings
            .iter()
            .map(|b| format!("{}@{}", b.middleware.name(), b.pattern))
            .collect();
        f.debug_struct("MiddlewareRegistry").field("bindings", &names).finish()
    }
}

impl MiddlewareRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a middleware to `*` (global) or a path-prefix pattern.
    pub fn bind(&mut self, pattern: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.bindings.push(Binding {
            pattern: pattern.into(),
            middleware,
            excluded_routes: HashSet::new(),
        });
    }

    /// Bind with a set of route patterns the middleware must not wrap.
    pub fn bind_excluding(
        &mut self,
        pattern: impl Into<String>,
        middleware: Arc<dyn Middleware>,
        excluded_routes: impl IntoIterator<Item = String>,
    ) {
        self.bindings.push(Binding {
            pattern: pattern.into(),
            middleware,
            excluded_routes: excluded_routes.into_iter().collect(),
        });
    }

    /// Middleware applying to a route, outermost first.
    fn chain_for(&self, route_pattern: &str) -> Vec<&Binding> {
        let applies = |binding: &&Binding| {
            !binding.excluded_routes.contains(route_pattern)
        };
        let globals = self
            .bindings
            .iter()
            .filter(|b| b.pattern == GLOBAL_PATTERN)
            .filter(applies);
        let scoped = self
            .bindings
            .iter()
            .filter(|b| b.pattern != GLOBAL_PATTERN && route_pattern.starts_with(&b.pattern))
            .filter(applies);
        globals.chain(scoped).collect()
    }

    /// Names of the middleware wrapping a route, outermost first (for
    /// dev-mode introspection).
    pub fn chain_names(&self, route_pattern: &str) -> Vec<String> {
        self.chain_for(route_pattern)
            .into_iter()
            .map(|b| b.middleware.name().to_string())
            .collect()
    }

    /// Compose the chain around `terminal` for a route.
    pub fn compose(&self, route_pattern: &str, terminal: ArcHandler) -> ArcHandler {
        let chain = self.chain_for(route_pattern);
        // Wrap inside-out so the first binding is the outermost wrapper.
        let mut handler = terminal;
        for binding in chain.into_iter().rev() {
            handler = binding.middleware.wrap(handler);
        }
        handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, respond, HttpRequest, RequestCtx};
    use http::StatusCode;
    use std::sync::Mutex;

    /// Appends its tag on the way in, recording composition order.
    struct Tagger {
        tag: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Tagger {
        fn name(&self) -> &str {
            self.tag
        }

        fn wrap(&self, next: ArcHandler) -> ArcHandler {
            let tag = self.tag;
            let seen = Arc::clone(&self.seen);
            handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
                let next = Arc::clone(&next);
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(tag);
                    next.handle(req, ctx).await
                }
            })
        }
    }

    fn tagger(tag: &'static str, seen: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Middleware> {
        Arc::new(Tagger {
            tag,
            seen: Arc::clone(seen),
        })
    }

    fn terminal() -> ArcHandler {
        handler_fn(|_req, _ctx| async { respond::status(StatusCode::OK) })
    }

    #[tokio::test]
    async fn globals_wrap_before_scoped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        registry.bind("*", tagger("g1", &seen));
        registry.bind("/api/", tagger("api", &seen));
        registry.bind("*", tagger("g2", &seen));

        let handler = registry.compose("/api/data", terminal());
        let req = http::Request::builder()
            .uri("/api/data")
            .body(crate::handler::req_body(""))
            .unwrap();
        let ctx = RequestCtx::new(
            "127.0.0.1:1".parse().unwrap(),
            tokio_util::sync::CancellationToken::new(),
        );
        handler.handle(req, ctx).await;

        // Globals first (registration order), then route-scoped.
        assert_eq!(*seen.lock().unwrap(), vec!["g1", "g2", "api"]);
    }

    #[tokio::test]
    async fn scoped_binding_skips_other_routes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        registry.bind("/api/", tagger("api", &seen));

        assert!(registry.chain_names("/public/page").is_empty());
        assert_eq!(registry.chain_names("/api/data"), vec!["api"]);
    }

    #[test]
    fn exclusions_remove_middleware_from_route() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        registry.bind_excluding(
            "*",
            tagger("auth", &seen),
            ["/healthz/".to_string()],
        );

        assert_eq!(registry.chain_names("/api/data"), vec!["auth"]);
        assert!(registry.chain_names("/healthz/").is_empty());
    }

}
