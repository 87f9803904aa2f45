//! Panic recovery boundary.
//!
//! A panicking handler must not take the process down: the panic is
//! caught here, logged with the request's correlation id and a sentinel
//! marker, and turned into a bare 500. No stack ever reaches the client.

use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::handler::{handler_fn, respond, ArcHandler, HttpRequest, RequestCtx};
use crate::middleware::Middleware;

/// Sentinel marker attached to panic logs for grepping.
const PANIC_MARKER: &str = "HANDLER_PANIC";

/// Converts handler panics into 500 responses.
#[derive(Debug, Default)]
pub struct Recovery;

impl Recovery {
    /// Plain recovery boundary.
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Recovery {
    fn name(&self) -> &str {
        "recovery"
    }

    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        handler_fn(move |req: HttpRequest, ctx: RequestCtx| {
            let next = Arc::clone(&next);
            async move {
                let path = req.uri().path().to_string();
                let request_id = ctx.request_id.clone();
                match std::panic::AssertUnwindSafe(next.handle(req, ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(response) => response,
                    Err(panic) => {
                        let detail = panic
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "<non-string panic payload>".to_string());
                        error!(
                            marker = PANIC_MARKER,
                            path,
                            request_id,
                            panic = %detail,
                            "recovered from handler panic"
                        );
                        respond::internal_error()
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::req_body;
    use http::StatusCode;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn panic_becomes_500_and_process_survives() {
        let handler = Recovery::new().wrap(crate::handler::handler_fn(
            |_req, _ctx| async { panic!("boom") },
        ));
        let req = http::Request::builder().uri("/x").body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());

        let response = handler.handle(req, ctx).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // A second request still works.
        let handler = Recovery::new().wrap(crate::handler::handler_fn(|_req, _ctx| async {
            crate::handler::respond::status(StatusCode::OK)
        }));
        let req = http::Request::builder().uri("/x").body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        assert_eq!(handler.handle(req, ctx).await.status(), StatusCode::OK);
    }
}
