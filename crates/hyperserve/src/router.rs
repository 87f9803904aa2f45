//! Longest-prefix router with trailing-slash canonicalization.
//!
//! Patterns come in two shapes: exact (`/about`) and prefix (`/static/`,
//! trailing slash). An exact match always beats a prefix match; among
//! prefixes the longest wins. Registering a pattern twice replaces the
//! earlier handler. A path whose canonical form (`path + "/"`) is a
//! registered prefix pattern is answered with a redirect.

use std::sync::Arc;

use crate::handler::ArcHandler;

/// One registered route.
#[derive(Clone)]
pub struct Route {
    /// Pattern: exact, or prefix when it ends with `/`
    pub pattern: String,
    /// Terminal handler (before middleware composition)
    pub handler: ArcHandler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route").field("pattern", &self.pattern).finish()
    }
}

/// Outcome of a route lookup.
#[derive(Clone)]
pub enum RouteMatch {
    /// Dispatch to this handler (matched pattern included)
    Handler(ArcHandler, String),
    /// Redirect to the canonical trailing-slash form
    RedirectSlash(String),
    /// No route matched
    NotFound,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_, pattern) => f.debug_tuple("Handler").field(pattern).finish(),
            Self::RedirectSlash(to) => f.debug_tuple("RedirectSlash").field(to).finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// The route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.patterns())
            .finish()
    }
}

impl Router {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; an identical pattern replaces its predecessor.
    pub fn register(&mut self, pattern: impl Into<String>, handler: ArcHandler) {
        let pattern = pattern.into();
        if let Some(existing) = self.routes.iter_mut().find(|r| r.pattern == pattern) {
            existing.handler = handler;
        } else {
            self.routes.push(Route { pattern, handler });
        }
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.pattern.clone()).collect()
    }

    /// All routes (for middleware composition at startup).
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Look up the handler for `path`.
    pub fn match_path(&self, path: &str) -> RouteMatch {
        // Exact match wins outright.
        if let Some(route) = self.routes.iter().find(|r| r.pattern == path) {
            return RouteMatch::Handler(Arc::clone(&route.handler), route.pattern.clone());
        }

        // Longest matching prefix pattern (ties broken by registration
        // order via max_by_key's last-wins being avoided: strictly longer
        // only).
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !route.pattern.ends_with('/') {
                continue;
            }
            if path.starts_with(route.pattern.as_str()) {
                let better = match best {
                    Some(current) => route.pattern.len() > current.pattern.len(),
                    None => true,
                };
                if better {
                    best = Some(route);
                }
            }
        }
        if let Some(route) = best {
            return RouteMatch::Handler(Arc::clone(&route.handler), route.pattern.clone());
        }

        // `/healthz` with only `/healthz/` registered: canonicalize.
        let canonical = format!("{path}/");
        if self.routes.iter().any(|r| r.pattern == canonical) {
            return RouteMatch::RedirectSlash(canonical);
        }

        RouteMatch::NotFound
    }
}
