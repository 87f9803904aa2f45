//! Outbound HTTP tool.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{McpError, McpResult, ToolFailure};
use crate::tool::{Tool, ToolCtx};

/// Backoff schedule for idempotent retries.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(400)];

/// `http_request` - perform an outbound HTTP request.
///
/// Hosts are checked against the deployer's allow-list. An empty list
/// admits any host, mirroring the wildcard default of `cors_origins`.
/// `GET`/`HEAD` are retried up to twice on transport-level errors;
/// non-idempotent methods are never retried.
pub struct HttpRequestTool {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
}

impl std::fmt::Debug for HttpRequestTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequestTool")
            .field("allowed_hosts", &self.allowed_hosts)
            .finish_non_exhaustive()
    }
}

impl HttpRequestTool {
    /// Create the tool with a host allow-list (`*.` wildcards permitted).
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            allowed_hosts,
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        self.allowed_hosts.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                host.len() > suffix.len() + 1 && host.ends_with(&format!(".{suffix}"))
            } else {
                host.eq_ignore_ascii_case(pattern)
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct Args {
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

#[async_trait::async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Perform an outbound HTTP request against an allow-listed host"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "method": {"type": "string", "enum": ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"]},
                "url": {"type": "string"},
                "headers": {"type": "object", "additionalProperties": {"type": "string"}},
                "body": {"type": "string"}
            },
            "required": ["method", "url"]
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let args: Args = serde_json::from_value(args)
            .map_err(|err| McpError::InvalidParams(format!("http_request: {err}")))?;

        let url: reqwest::Url = args
            .url
            .parse()
            .map_err(|_| McpError::invalid_argument(format!("invalid url: {}", args.url)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(McpError::invalid_argument(format!(
                    "unsupported scheme: {other}"
                )));
            }
        }
        let host = url
            .host_str()
            .ok_or_else(|| McpError::invalid_argument("url has no host"))?;
        if !self.host_allowed(host) {
            return Err(McpError::tool(
                ToolFailure::Denied,
                format!("host not in allow-list: {host}"),
            ));
        }

        let method: reqwest::Method = args
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| McpError::invalid_argument(format!("invalid method: {}", args.method)))?;
        let idempotent = method == reqwest::Method::GET || method == reqwest::Method::HEAD;

        let mut attempt = 0;
        let response = loop {
            let mut request = self.client.request(method.clone(), url.clone());
            for (name, value) in &args.headers {
                request = request.header(name, value);
            }
            if let Some(body) = &args.body {
                request = request.body(body.clone());
            }

            match request.send().await {
                Ok(response) => break response,
                Err(err) if idempotent && attempt < RETRY_DELAYS.len() => {
                    debug!(attempt, error = %err, "retrying idempotent request");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(McpError::tool(ToolFailure::Failed, err.to_string()));
                }
            }
        };

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| McpError::tool(ToolFailure::Failed, err.to_string()))?;
        Ok(json!({"status": status, "body": body}))
    }
}
