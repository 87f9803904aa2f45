//! Security headers.

use std::sync::Arc;

use http::{header, HeaderValue};

use crate::handler::{handler_fn, ArcHandler, HttpRequest, RequestCtx};
use crate::middleware::Middleware;

/// Sets the security header suite: CSP, HSTS, COOP/COEP,
/// Permissions-Policy, and the CORS allow-origin from configuration.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    csp: String,
    cors_origins: Vec<String>,
}

impl SecurityHeaders {
    /// Headers middleware; `worker_blob` loosens worker-src/child-src to
    /// allow `blob:` (needed by in-browser workers).
    pub fn new(worker_blob: bool, cors_origins: Vec<String>) -> Self {
        let worker_src = if worker_blob { "'self' blob:" } else { "'self'" };
        let csp = format!(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
             img-src 'self' data:; connect-src 'self'; worker-src {worker_src}; \
             child-src {worker_src}; frame-ancestors 'none'"
        );
        Self { csp, cors_origins }
    }

    fn allow_origin_for(&self, origin: Option<&str>) -> Option<HeaderValue> {
        if self.cors_origins.is_empty() {
            return Some(HeaderValue::from_static("*"));
        }
        let origin = origin?;
        self.cors_origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
            .then(|| HeaderValue::from_str(origin).ok())
            .flatten()
    }
}

impl Middleware for SecurityHeaders {
    fn name(&self) -> &str {
        "security_headers"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        let this = self.clone();
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            let this = this.clone();
            async move {
                let origin = req
                    .headers()
                    .get(header::ORIGIN)
                    .and_then(|value| value.to_str().ok())
                    .map(String::from);
                let mut response = next.handle(req, ctx).await;

                let headers = response.headers_mut();
                headers.insert(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_str(&this.csp)
                        .unwrap_or_else(|_| HeaderValue::from_static("default-src 'self'")),
                );
                headers.insert(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=63072000; includeSubDomains"),
                );
                headers.insert(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                );
                headers.insert(
                    "cross-origin-opener-policy",
                    HeaderValue::from_static("same-origin"),
                );
                headers.insert(
                    "cross-origin-embedder-policy",
                    HeaderValue::from_static("require-corp"),
                );
                headers.insert(
                    "permissions-policy",
                    HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
                );
                if let Some(allow) = this.allow_origin_for(origin.as_deref()) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow);
                    if !this.cors_origins.is_empty() {
                        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                    }
                }
                response
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{req_body, respond};
    use http::StatusCode;
    use tokio_util::sync::CancellationToken;

    async fn run(headers: SecurityHeaders, origin: Option<&str>) -> http::Response<crate::handler::BoxBody> {
        let handler = headers.wrap(crate::handler::handler_fn(|_req, _ctx| async {
            respond::status(StatusCode::OK)
        }));
        let mut builder = http::Request::builder().uri("/x");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        let req = builder.body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        handler.handle(req, ctx).await
    }

    #[tokio::test]
    async fn sets_the_header_suite() {
        let response = run(SecurityHeaders::new(false, Vec::new()), None).await;
        let headers = response.headers();
        assert!(headers.contains_key("content-security-policy"));
        assert!(headers.contains_key("strict-transport-security"));
        assert_eq!(headers.get("cross-origin-opener-policy").unwrap(), "same-origin");
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    }

    #[tokio::test]
    async fn blob_workers_opt_in() {
        let strict = run(SecurityHeaders::new(false, Vec::new()), None).await;
        let csp = strict.headers().get("content-security-policy").unwrap().to_str().unwrap();
        assert!(!csp.contains("blob:"));

        let loose = run(SecurityHeaders::new(true, Vec::new()), None).await;
        let csp = loose.headers().get("content-security-policy").unwrap().to_str().unwrap();
        assert!(csp.contains("worker-src 'self' blob:"));
    }

    #[tokio::test]
    async fn cors_list_reflects_known_origins_only() {
        let headers = SecurityHeaders::new(false, vec!["https://app.test".into()]);
        let allowed = run(headers.clone(), Some("https://app.test")).await;
        assert_eq!(
            allowed.headers().get("access-control-allow-origin").unwrap(),
            "https://app.test"
        );

        let denied = run(headers, Some("https://evil.test")).await;
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }
}
