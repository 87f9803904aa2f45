//! Rate-limiting middleware over the token-bucket limiter.

use std::sync::Arc;

use http::{HeaderValue, StatusCode};
use tracing::debug;

use crate::handler::{handler_fn, respond, ArcHandler, HttpRequest, RequestCtx};
use crate::middleware::Middleware;
use crate::rate_limit::RateLimiter;

/// Consults the shared limiter keyed by client IP; refusals get 429 with
/// the standard rate headers.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    /// Middleware over the shared limiter.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        let limiter = Arc::clone(&self.limiter);
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            let limiter = Arc::clone(&limiter);
            async move {
                let client_ip = limiter.client_ip(req.headers(), ctx.peer);
                let decision = limiter.try_acquire(&client_ip);
                if decision.allowed {
                    return next.handle(req, ctx).await;
                }

                debug!(client_ip, retry_after = decision.retry_after, "rate limited");
                let retry_after = decision.retry_after.max(1);
                let mut response =
                    respond::text(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests\n");
                let headers = response.headers_mut();
                headers.insert(
                    "x-ratelimit-limit",
                    HeaderValue::from(limiter.rate()),
                );
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
                headers.insert("x-ratelimit-reset", HeaderValue::from(retry_after));
                headers.insert("retry-after", HeaderValue::from(retry_after));
                response
            }
        })
    }
}
