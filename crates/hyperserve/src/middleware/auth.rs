//! Bearer-token authentication.

use std::sync::Arc;

use http::{header, StatusCode};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::handler::{handler_fn, respond, ArcHandler, HttpRequest, RequestCtx};
use crate::middleware::Middleware;
use crate::options::TokenValidator;

/// Validator comparing against a fixed token in constant time.
pub fn static_token_validator(expected: impl Into<String>) -> TokenValidator {
    let expected = expected.into();
    Arc::new(move |token: &str| {
        token.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
    })
}

/// Rejects requests without a valid `Authorization: Bearer` token.
/// With no validator configured, every request is rejected.
pub struct AuthMiddleware {
    validator: Option<TokenValidator>,
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("validator", &self.validator.as_ref().map(|_| "<validator>"))
            .finish()
    }
}

impl AuthMiddleware {
    /// Auth middleware backed by the configured validator.
    pub fn new(validator: Option<TokenValidator>) -> Self {
        Self { validator }
    }
}

/// Extract the bearer token from an `Authorization` header value.
pub(crate) fn bearer_token(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        let validator = self.validator.clone();
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            let validator = validator.clone();
            async move {
                let Some(validator) = validator else {
                    debug!("auth middleware active with no validator; rejecting");
                    return respond::text(StatusCode::UNAUTHORIZED, "Unauthorized\n");
                };
                match bearer_token(req.headers()) {
                    Some(token) if validator(token) => {
                        ctx.set_authorized(true);
                        next.handle(req, ctx).await
                    }
                    _ => respond::text(StatusCode::UNAUTHORIZED, "Unauthorized\n"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::req_body;
    use tokio_util::sync::CancellationToken;

    fn handler(validator: Option<TokenValidator>) -> ArcHandler {
        AuthMiddleware::new(validator).wrap(crate::handler::handler_fn(|_req, ctx| async move {
            assert!(ctx.is_authorized());
            respond::status(StatusCode::OK)
        }))
    }

    async fn request(handler: &ArcHandler, auth: Option<&str>) -> StatusCode {
        let mut builder = http::Request::builder().uri("/x");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let req = builder.body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        handler.handle(req, ctx).await.status()
    }

    #[tokio::test]
    async fn valid_token_passes_and_marks_ctx() {
        let handler = handler(Some(static_token_validator("sekrit")));
        assert_eq!(request(&handler, Some("Bearer sekrit")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_401() {
        let handler = handler(Some(static_token_validator("sekrit")));
        assert_eq!(
            request(&handler, Some("Bearer wrong")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(request(&handler, None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            request(&handler, Some("Basic dXNlcjpwdw==")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn absent_validator_rejects_all() {
        let handler = handler(None);
        assert_eq!(
            request(&handler, Some("Bearer anything")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn bearer_extraction_is_case_insensitive() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "bearer tok123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("tok123"));
    }
}
