//! Sandboxed static file serving. No directory listings; symlinks that
//! escape the root are refused.

use std::path::{Component, Path, PathBuf};

use http::{header, HeaderValue, Method, StatusCode};
use tracing::debug;

use crate::handler::{respond, Handler, HttpRequest, HttpResponse, RequestCtx};

/// Serves files under a root directory for a route prefix.
#[derive(Debug)]
pub struct StaticFileHandler {
    root: PathBuf,
    prefix: String,
}

impl StaticFileHandler {
    /// Serve `root` under `prefix` (e.g. `/static/`).
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Lexical containment then symlink-chasing containment.
    async fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let mut clean = PathBuf::new();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        let canonical_root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let canonical = tokio::fs::canonicalize(canonical_root.join(&clean)).await.ok()?;
        canonical.starts_with(&canonical_root).then_some(canonical)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[async_trait::async_trait]
impl Handler for StaticFileHandler {
    async fn handle(&self, req: HttpRequest, _ctx: RequestCtx) -> HttpResponse {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return respond::status(StatusCode::METHOD_NOT_ALLOWED);
        }

        let rel = req
            .uri()
            .path()
            .strip_prefix(self.prefix.as_str())
            .unwrap_or("");
        let Some(mut path) = self.resolve(rel).await else {
            return respond::not_found();
        };

        if path.is_dir() {
            // No directory listing; serve an index when present.
            path = path.join("index.html");
            if tokio::fs::canonicalize(&path).await.is_err() {
                return respond::not_found();
            }
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut response = http::Response::new(respond::full(bytes));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(content_type(&path)),
                );
                response
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "static read failed");
                respond::not_found()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::req_body;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;

    async fn serve(handler: &StaticFileHandler, path: &str) -> (StatusCode, Vec<u8>) {
        let req = http::Request::builder().uri(path).body(req_body("")).unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        let response = handler.handle(req, ctx).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, bytes)
    }

    async fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("app.css"), "body{}").await.unwrap();
        tokio::fs::create_dir(dir.path().join("docs")).await.unwrap();
        tokio::fs::write(dir.path().join("docs/index.html"), "<html></html>")
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn serves_files_with_content_type() {
        let dir = site().await;
        let handler = StaticFileHandler::new(dir.path(), "/static/");
        let (status, body) = serve(&handler, "/static/app.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"body{}");
    }

    #[tokio::test]
    async fn directories_serve_index_not_listing() {
        let dir = site().await;
        let handler = StaticFileHandler::new(dir.path(), "/static/");
        let (status, body) = serve(&handler, "/static/docs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<html></html>");

        // Root has no index.html: nothing is listed.
        let (status, _) = serve(&handler, "/static/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let dir = site().await;
        let handler = StaticFileHandler::new(dir.path(), "/static/");
        let (status, _) = serve(&handler, "/static/../etc/passwd").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escape_is_refused() {
        let dir = site().await;
        let outside = tempfile::tempdir().unwrap();
        tokio::fs::write(outside.path().join("secret"), "s").await.unwrap();
        tokio::fs::symlink(outside.path().join("secret"), dir.path().join("leak"))
            .await
            .unwrap();

        let handler = StaticFileHandler::new(dir.path(), "/static/");
        let (status, _) = serve(&handler, "/static/leak").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_is_not_allowed() {
        let dir = site().await;
        let handler = StaticFileHandler::new(dir.path(), "/static/");
        let req = http::Request::builder()
            .method("POST")
            .uri("/static/app.css")
            .body(req_body(""))
            .unwrap();
        let ctx = RequestCtx::new("127.0.0.1:1".parse().unwrap(), CancellationToken::new());
        let response = handler.handle(req, ctx).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
