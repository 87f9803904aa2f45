//! # Server options
//!
//! Configuration is computed once, before the server starts, by layering
//! four sources (weakest first): built-in defaults, the programmatic
//! builder, a JSON file (`HS_CONFIG_PATH` or `./options.json`), and
//! `HS_*` environment variables. The resulting [`Options`] value is
//! immutable for the life of the server.
//!
//! One deliberate exception to "environment wins": MCP enablement set
//! programmatically beats `HS_MCP_ENABLED`, and the prevailing source is
//! logged once at info level.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

/// Default listen address.
pub const DEFAULT_ADDR: &str = ":8080";
/// Default shutdown drain deadline.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer-token validator. Returns whether the token is valid.
pub type TokenValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// MCP transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    /// JSON-RPC over the HTTP endpoint (with SSE routing)
    Http,
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
}

/// Discovery policy selection. The `custom` predicate variant is set
/// programmatically on the server builder, not through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryPolicyKind {
    /// List all discoverable tools
    Public,
    /// Full list for authenticated callers, counts otherwise
    Authenticated,
    /// Counts only
    Count,
    /// Nothing
    None,
}

/// MCP endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpOptions {
    /// Whether the MCP endpoint is mounted
    pub enabled: bool,
    /// Endpoint path
    pub endpoint: String,
    /// Advertised server name
    pub server_name: String,
    /// Advertised server version
    pub server_version: String,
    /// Transport
    pub transport: McpTransport,
    /// Dev-mode introspection tools
    pub dev: bool,
    /// Observability resources
    pub observability: bool,
    /// Built-in tools (calculator, file tools, http_request)
    pub builtin_tools: bool,
    /// Built-in resources
    pub builtin_resources: bool,
    /// Sandbox root for the file tools
    pub file_tool_root: PathBuf,
    /// Discovery policy
    pub discovery_policy: DiscoveryPolicyKind,
    /// Capacity of the `hs://logs` ring
    pub log_resource_size: usize,
}

impl Default for McpOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/mcp".to_string(),
            server_name: "hyperserve".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            transport: McpTransport::Http,
            dev: false,
            observability: false,
            builtin_tools: false,
            builtin_resources: false,
            file_tool_root: PathBuf::from("."),
            discovery_policy: DiscoveryPolicyKind::Public,
            log_resource_size: 100,
        }
    }
}

/// Immutable server configuration.
#[derive(Clone)]
pub struct Options {
    /// Main listen address (`:8080` or `host:port`)
    pub addr: String,
    /// Optional secondary health listener
    pub health_addr: Option<String>,
    /// Read deadline per connection; zero disables
    pub read_timeout: Duration,
    /// Write deadline per connection; zero disables
    pub write_timeout: Duration,
    /// Keep-alive idle deadline; zero disables
    pub idle_timeout: Duration,
    /// Drain deadline during shutdown
    pub shutdown_timeout: Duration,
    /// Requests per second per client IP; zero disables the limiter
    pub rate_limit: u32,
    /// Burst capacity per client IP
    pub burst_limit: u32,
    /// Allowed CORS origins; empty means wildcard
    pub cors_origins: Vec<String>,
    /// TLS certificate path (carried for config fidelity)
    pub tls_cert_file: Option<PathBuf>,
    /// TLS key path (carried for config fidelity)
    pub tls_key_file: Option<PathBuf>,
    /// Template root for pluggable renderers
    pub template_dir: Option<PathBuf>,
    /// Static file root
    pub static_dir: Option<PathBuf>,
    /// Bearer-token validator; absent means auth rejects everything
    pub auth_token_validator: Option<TokenValidator>,
    /// MCP endpoint configuration
    pub mcp: McpOptions,
    /// Log level (trace/debug/info/warn/error)
    pub log_level: String,
    /// Debug mode
    pub debug: bool,
    /// Allow `blob:` in worker-src/child-src of the CSP
    pub csp_web_worker_support: bool,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("addr", &self.addr)
            .field("health_addr", &self.health_addr)
            .field("rate_limit", &self.rate_limit)
            .field("mcp", &self.mcp)
            .field("log_level", &self.log_level)
            .field(
                "auth_token_validator",
                &self.auth_token_validator.as_ref().map(|_| "<validator>"),
            )
            .finish_non_exhaustive()
    }
}

impl PartialEq for Options {
    /// Equality over the non-opaque fields; the validator is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.health_addr == other.health_addr
            && self.read_timeout == other.read_timeout
            && self.write_timeout == other.write_timeout
            && self.idle_timeout == other.idle_timeout
            && self.shutdown_timeout == other.shutdown_timeout
            && self.rate_limit == other.rate_limit
            && self.burst_limit == other.burst_limit
            && self.cors_origins == other.cors_origins
            && self.tls_cert_file == other.tls_cert_file
            && self.tls_key_file == other.tls_key_file
            && self.template_dir == other.template_dir
            && self.static_dir == other.static_dir
            && self.mcp == other.mcp
            && self.log_level == other.log_level
            && self.debug == other.debug
            && self.csp_web_worker_support == other.csp_web_worker_support
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            health_addr: None,
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            rate_limit: 0,
            burst_limit: 0,
            cors_origins: Vec::new(),
            tls_cert_file: None,
            tls_key_file: None,
            template_dir: None,
            static_dir: None,
            auth_token_validator: None,
            mcp: McpOptions::default(),
            log_level: "info".to_string(),
            debug: false,
            csp_web_worker_support: false,
        }
    }
}

impl Options {
    /// Start a programmatic builder.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Resolve `addr`-style strings (`:8080` means all interfaces).
    pub fn socket_addr(addr: &str) -> ServerResult<std::net::SocketAddr> {
        let full = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };
        full.parse()
            .map_err(|_| ServerError::config_key(format!("invalid address: {addr}"), "addr"))
    }

    /// Project the options onto the JSON file format.
    pub fn to_file_value(&self) -> Value {
        serde_json::to_value(FileOptions::from(self)).unwrap_or(Value::Null)
    }

    /// Apply a parsed JSON file over these options. Unknown keys are
    /// logged at debug and ignored.
    pub fn apply_file_value(&mut self, value: Value) -> ServerResult<()> {
        let file: FileOptions = serde_json::from_value(value)
            .map_err(|err| ServerError::config(format!("config file: {err}")))?;
        for key in file.unknown.keys() {
            debug!(key, "ignoring unknown configuration key");
        }
        file.apply(self)
    }

    /// Sanitized projection for the observability config resource:
    /// everything except credentials and callbacks.
    pub fn sanitized(&self) -> Value {
        let mut value = self.to_file_value();
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "auth_token_validator".to_string(),
                Value::String(
                    if self.auth_token_validator.is_some() {
                        "<configured>"
                    } else {
                        "<absent>"
                    }
                    .to_string(),
                ),
            );
        }
        value
    }

    fn validate(&self) -> ServerResult<()> {
        Self::socket_addr(&self.addr)?;
        if let Some(health) = &self.health_addr {
            Self::socket_addr(health)?;
        }
        if self.tls_cert_file.is_some() != self.tls_key_file.is_some() {
            return Err(ServerError::config(
                "tls_cert_file and tls_key_file must both be set",
            ));
        }
        if self.rate_limit > 0 && self.burst_limit == 0 {
            return Err(ServerError::config_key(
                "burst_limit must be nonzero when rate_limit is set",
                "burst_limit",
            ));
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ServerError::config_key(
                format!("unknown log level: {other}"),
                "log_level",
            )),
        }
    }
}

/// Parse `<number><unit>` durations with units ns/us/ms/s/m/h. A bare
/// `0` disables the timeout.
pub fn parse_duration(input: &str) -> ServerResult<Duration> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ServerError::config(format!("duration missing unit: {input}")))?;
    let (number, unit) = input.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| ServerError::config(format!("invalid duration: {input}")))?;
    let duration = match unit {
        "ns" => Duration::from_nanos(number),
        "us" => Duration::from_micros(number),
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number * 60),
        "h" => Duration::from_secs(number * 3600),
        other => {
            return Err(ServerError::config(format!(
                "unknown duration unit '{other}' in: {input}"
            )));
        }
    };
    Ok(duration)
}

/// Format a duration in the file/env syntax.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0".to_string();
    }
    let nanos = duration.as_nanos();
    if nanos % 1_000_000_000 == 0 {
        let secs = duration.as_secs();
        if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

fn parse_bool(input: &str) -> ServerResult<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ServerError::config(format!("invalid boolean: {other}"))),
    }
}

fn parse_policy(input: &str) -> ServerResult<DiscoveryPolicyKind> {
    match input.trim().to_ascii_lowercase().as_str() {
        "public" => Ok(DiscoveryPolicyKind::Public),
        "authenticated" => Ok(DiscoveryPolicyKind::Authenticated),
        "count" => Ok(DiscoveryPolicyKind::Count),
        "none" => Ok(DiscoveryPolicyKind::None),
        other => Err(ServerError::config(format!(
            "unknown discovery policy: {other}"
        ))),
    }
}

/// The JSON file shape: every field optional, durations as strings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    read_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    write_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idle_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shutdown_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    burst_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cors_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_key_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    static_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_transport: Option<McpTransport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_dev: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_observability: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_builtin_tools: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_builtin_resources: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_file_tool_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_discovery_policy: Option<DiscoveryPolicyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_log_resource_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    csp_web_worker_support: Option<bool>,
    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

impl From<&Options> for FileOptions {
    fn from(opts: &Options) -> Self {
        Self {
            addr: Some(opts.addr.clone()),
            health_addr: opts.health_addr.clone(),
            read_timeout: Some(format_duration(opts.read_timeout)),
            write_timeout: Some(format_duration(opts.write_timeout)),
            idle_timeout: Some(format_duration(opts.idle_timeout)),
            shutdown_timeout: Some(format_duration(opts.shutdown_timeout)),
            rate_limit: Some(opts.rate_limit),
            burst_limit: Some(opts.burst_limit),
            cors_origins: Some(opts.cors_origins.clone()),
            tls_cert_file: opts.tls_cert_file.clone(),
            tls_key_file: opts.tls_key_file.clone(),
            template_dir: opts.template_dir.clone(),
            static_dir: opts.static_dir.clone(),
            mcp_enabled: Some(opts.mcp.enabled),
            mcp_endpoint: Some(opts.mcp.endpoint.clone()),
            mcp_server_name: Some(opts.mcp.server_name.clone()),
            mcp_server_version: Some(opts.mcp.server_version.clone()),
            mcp_transport: Some(opts.mcp.transport),
            mcp_dev: Some(opts.mcp.dev),
            mcp_observability: Some(opts.mcp.observability),
            mcp_builtin_tools: Some(opts.mcp.builtin_tools),
            mcp_builtin_resources: Some(opts.mcp.builtin_resources),
            mcp_file_tool_root: Some(opts.mcp.file_tool_root.clone()),
            mcp_discovery_policy: Some(opts.mcp.discovery_policy),
            mcp_log_resource_size: Some(opts.mcp.log_resource_size),
            log_level: Some(opts.log_level.clone()),
            debug: Some(opts.debug),
            csp_web_worker_support: Some(opts.csp_web_worker_support),
            unknown: HashMap::new(),
        }
    }
}

impl FileOptions {
    fn apply(self, opts: &mut Options) -> ServerResult<()> {
        macro_rules! set {
            ($field:ident, $target:expr) => {
                if let Some(value) = self.$field {
                    $target = value;
                }
            };
        }
        set!(addr, opts.addr);
        if let Some(health) = self.health_addr {
            opts.health_addr = Some(health);
        }
        if let Some(s) = self.read_timeout {
            opts.read_timeout = parse_duration(&s)?;
        }
        if let Some(s) = self.write_timeout {
            opts.write_timeout = parse_duration(&s)?;
        }
        if let Some(s) = self.idle_timeout {
            opts.idle_timeout = parse_duration(&s)?;
        }
        if let Some(s) = self.shutdown_timeout {
            opts.shutdown_timeout = parse_duration(&s)?;
        }
        set!(rate_limit, opts.rate_limit);
        set!(burst_limit, opts.burst_limit);
        set!(cors_origins, opts.cors_origins);
        if let Some(path) = self.tls_cert_file {
            opts.tls_cert_file = Some(path);
        }
        if let Some(path) = self.tls_key_file {
            opts.tls_key_file = Some(path);
        }
        if let Some(path) = self.template_dir {
            opts.template_dir = Some(path);
        }
        if let Some(path) = self.static_dir {
            opts.static_dir = Some(path);
        }
        set!(mcp_enabled, opts.mcp.enabled);
        set!(mcp_endpoint, opts.mcp.endpoint);
        set!(mcp_server_name, opts.mcp.server_name);
        set!(mcp_server_version, opts.mcp.server_version);
        set!(mcp_transport, opts.mcp.transport);
        set!(mcp_dev, opts.mcp.dev);
        set!(mcp_observability, opts.mcp.observability);
        set!(mcp_builtin_tools, opts.mcp.builtin_tools);
        set!(mcp_builtin_resources, opts.mcp.builtin_resources);
        set!(mcp_file_tool_root, opts.mcp.file_tool_root);
        set!(mcp_discovery_policy, opts.mcp.discovery_policy);
        set!(mcp_log_resource_size, opts.mcp.log_resource_size);
        set!(log_level, opts.log_level);
        set!(debug, opts.debug);
        set!(csp_web_worker_support, opts.csp_web_worker_support);
        Ok(())
    }
}

/// Programmatic options builder. Only fields set here count as
/// "programmatic" for precedence purposes.
#[derive(Default)]
pub struct OptionsBuilder {
    base: Options,
    mcp_set_programmatically: bool,
    validator: Option<TokenValidator>,
}

impl std::fmt::Debug for OptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsBuilder")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl OptionsBuilder {
    /// Main listen address.
    #[must_use]
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.base.addr = addr.into();
        self
    }

    /// Secondary health listener address.
    #[must_use]
    pub fn health_addr(mut self, addr: impl Into<String>) -> Self {
        self.base.health_addr = Some(addr.into());
        self
    }

    /// Connection read deadline; zero disables.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.base.read_timeout = timeout;
        self
    }

    /// Connection write deadline; zero disables.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.base.write_timeout = timeout;
        self
    }

    /// Keep-alive idle deadline; zero disables.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.base.idle_timeout = timeout;
        self
    }

    /// Drain deadline during shutdown.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.base.shutdown_timeout = timeout;
        self
    }

    /// Requests/second and burst per client IP; zero rate disables.
    #[must_use]
    pub fn rate_limit(mut self, rate: u32, burst: u32) -> Self {
        self.base.rate_limit = rate;
        self.base.burst_limit = burst;
        self
    }

    /// Allowed CORS origins; empty means wildcard.
    #[must_use]
    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.base.cors_origins = origins;
        self
    }

    /// Static file root.
    #[must_use]
    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base.static_dir = Some(dir.into());
        self
    }

    /// Template root.
    #[must_use]
    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base.template_dir = Some(dir.into());
        self
    }

    /// Bearer-token validator for the auth middleware.
    #[must_use]
    pub fn auth_token_validator(mut self, validator: TokenValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// MCP configuration. Calling this marks MCP as programmatically
    /// configured, which wins over `HS_MCP_ENABLED`.
    #[must_use]
    pub fn mcp(mut self, mcp: McpOptions) -> Self {
        self.base.mcp = mcp;
        self.mcp_set_programmatically = true;
        self
    }

    /// Log level.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.base.log_level = level.into();
        self
    }

    /// Debug mode.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.base.debug = debug;
        self
    }

    /// Allow `blob:` workers in the CSP.
    #[must_use]
    pub fn csp_web_worker_support(mut self, enabled: bool) -> Self {
        self.base.csp_web_worker_support = enabled;
        self
    }

    /// Resolve the final options from all four sources, using the
    /// process environment and filesystem.
    pub fn load(self) -> ServerResult<Options> {
        let env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("HS_"))
            .collect();
        let config_path = env
            .get("HS_CONFIG_PATH")
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from("options.json");
                default.exists().then_some(default)
            });
        let file = match config_path {
            Some(path) => Some(
                std::fs::read_to_string(&path)
                    .map_err(|err| {
                        ServerError::config(format!("cannot read {}: {err}", path.display()))
                    })
                    .and_then(|text| {
                        serde_json::from_str(&text).map_err(|err| {
                            ServerError::config(format!("invalid JSON in {}: {err}", path.display()))
                        })
                    })?,
            ),
            None => None,
        };
        self.load_from(file, &env)
    }

    /// Resolve the final options from explicit inputs (testable form).
    pub fn load_from(
        self,
        file: Option<Value>,
        env: &HashMap<String, String>,
    ) -> ServerResult<Options> {
        let programmatic_mcp_enabled = self.mcp_set_programmatically.then_some(self.base.mcp.enabled);
        let mut opts = self.base;
        opts.auth_token_validator = self.validator;

        if let Some(value) = file {
            opts.apply_file_value(value)?;
        }

        apply_env(&mut opts, env)?;

        // Programmatic MCP enablement wins over the environment.
        if let Some(programmatic) = programmatic_mcp_enabled {
            if env.contains_key("HS_MCP_ENABLED") && opts.mcp.enabled != programmatic {
                opts.mcp.enabled = programmatic;
                info!(
                    enabled = programmatic,
                    "MCP enablement: programmatic configuration prevailed over HS_MCP_ENABLED"
                );
            }
        }

        opts.validate()?;
        Ok(opts)
    }
}

fn apply_env(opts: &mut Options, env: &HashMap<String, String>) -> ServerResult<()> {
    let get = |key: &str| env.get(key).map(String::as_str);

    if let Some(addr) = get("HS_ADDR") {
        opts.addr = addr.to_string();
    }
    if let Some(port) = get("HS_PORT") {
        let port: u16 = port
            .parse()
            .map_err(|_| ServerError::config_key(format!("invalid port: {port}"), "HS_PORT"))?;
        let host = opts.addr.rsplit_once(':').map_or("", |(host, _)| host);
        opts.addr = format!("{host}:{port}");
    }
    if let Some(addr) = get("HS_HEALTH_ADDR") {
        opts.health_addr = (!addr.is_empty()).then(|| addr.to_string());
    }
    if let Some(s) = get("HS_READ_TIMEOUT") {
        opts.read_timeout = parse_duration(s)?;
    }
    if let Some(s) = get("HS_WRITE_TIMEOUT") {
        opts.write_timeout = parse_duration(s)?;
    }
    if let Some(s) = get("HS_IDLE_TIMEOUT") {
        opts.idle_timeout = parse_duration(s)?;
    }
    if let Some(s) = get("HS_SHUTDOWN_TIMEOUT") {
        opts.shutdown_timeout = parse_duration(s)?;
    }
    if let Some(s) = get("HS_RATE_LIMIT") {
        opts.rate_limit = s
            .parse()
            .map_err(|_| ServerError::config_key("invalid rate limit", "HS_RATE_LIMIT"))?;
    }
    if let Some(s) = get("HS_BURST_LIMIT") {
        opts.burst_limit = s
            .parse()
            .map_err(|_| ServerError::config_key("invalid burst limit", "HS_BURST_LIMIT"))?;
    }
    if let Some(s) = get("HS_CORS_ORIGINS") {
        opts.cors_origins = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(s) = get("HS_TLS_CERT_FILE") {
        opts.tls_cert_file = Some(PathBuf::from(s));
    }
    if let Some(s) = get("HS_TLS_KEY_FILE") {
        opts.tls_key_file = Some(PathBuf::from(s));
    }
    if let Some(s) = get("HS_TEMPLATE_DIR") {
        opts.template_dir = Some(PathBuf::from(s));
    }
    if let Some(s) = get("HS_STATIC_DIR") {
        opts.static_dir = Some(PathBuf::from(s));
    }
    if let Some(s) = get("HS_LOG_LEVEL") {
        opts.log_level = s.to_string();
    }
    if let Some(s) = get("HS_DEBUG") {
        opts.debug = parse_bool(s)?;
    }
    if let Some(s) = get("HS_CSP_WEB_WORKER_SUPPORT") {
        opts.csp_web_worker_support = parse_bool(s)?;
    }

    if let Some(s) = get("HS_MCP_ENABLED") {
        opts.mcp.enabled = parse_bool(s)?;
    }
    if let Some(s) = get("HS_MCP_ENDPOINT") {
        opts.mcp.endpoint = s.to_string();
    }
    if let Some(s) = get("HS_MCP_SERVER_NAME") {
        opts.mcp.server_name = s.to_string();
    }
    if let Some(s) = get("HS_MCP_SERVER_VERSION") {
        opts.mcp.server_version = s.to_string();
    }
    if let Some(s) = get("HS_MCP_TRANSPORT") {
        opts.mcp.transport = match s.to_ascii_lowercase().as_str() {
            "http" => McpTransport::Http,
            "stdio" => McpTransport::Stdio,
            other => {
                return Err(ServerError::config_key(
                    format!("unknown transport: {other}"),
                    "HS_MCP_TRANSPORT",
                ));
            }
        };
    }
    if let Some(s) = get("HS_MCP_DEV") {
        opts.mcp.dev = parse_bool(s)?;
    }
    if let Some(s) = get("HS_MCP_OBSERVABILITY") {
        opts.mcp.observability = parse_bool(s)?;
    }
    if let Some(s) = get("HS_MCP_TOOLS_ENABLED") {
        opts.mcp.builtin_tools = parse_bool(s)?;
    }
    if let Some(s) = get("HS_MCP_RESOURCES_ENABLED") {
        opts.mcp.builtin_resources = parse_bool(s)?;
    }
    if let Some(s) = get("HS_MCP_FILE_TOOL_ROOT") {
        opts.mcp.file_tool_root = PathBuf::from(s);
    }
    if let Some(s) = get("HS_MCP_DISCOVERY_POLICY") {
        opts.mcp.discovery_policy = parse_policy(s)?;
    }
    if let Some(s) = get("HS_MCP_LOG_RESOURCE_SIZE") {
        opts.mcp.log_resource_size = s.parse().map_err(|_| {
            ServerError::config_key("invalid log resource size", "HS_MCP_LOG_RESOURCE_SIZE")
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("10ns").unwrap(), Duration::from_nanos(10));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10fortnights").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn duration_round_trip() {
        for text in ["0", "500ms", "15s", "2m", "1h", "250us"] {
            let parsed = parse_duration(text).unwrap();
            assert_eq!(format_duration(parsed), text);
        }
    }

    proptest::proptest! {
        #[test]
        fn duration_format_parse_identity(ms in 1u64..10_000_000) {
            let duration = Duration::from_millis(ms);
            let parsed = parse_duration(&format_duration(duration)).unwrap();
            proptest::prop_assert_eq!(parsed, duration);
        }
    }

    #[test]
    fn defaults_are_valid() {
        let opts = Options::builder()
            .load_from(None, &HashMap::new())
            .unwrap();
        assert_eq!(opts.addr, ":8080");
        assert_eq!(opts.shutdown_timeout, Duration::from_secs(10));
        assert!(opts.mcp.enabled);
        assert_eq!(opts.mcp.endpoint, "/mcp");
    }

    #[test]
    fn config_file_round_trip() {
        let mut original = Options::default();
        original.addr = ":9090".to_string();
        original.health_addr = Some(":9091".to_string());
        original.rate_limit = 50;
        original.burst_limit = 10;
        original.cors_origins = vec!["https://app.example.com".to_string()];
        original.read_timeout = Duration::from_secs(30);
        original.mcp.server_name = "round-trip".to_string();
        original.mcp.discovery_policy = DiscoveryPolicyKind::Authenticated;
        original.log_level = "debug".to_string();

        let serialized = original.to_file_value();
        let mut loaded = Options::default();
        loaded.apply_file_value(serialized).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn env_overrides_file_overrides_builder() {
        let file = json!({"addr": ":7000", "log_level": "warn"});
        let mut env = HashMap::new();
        env.insert("HS_ADDR".to_string(), ":7001".to_string());

        let opts = Options::builder()
            .addr(":6000")
            .log_level("error")
            .load_from(Some(file), &env)
            .unwrap();

        // env beats file for addr; file beats builder for log level.
        assert_eq!(opts.addr, ":7001");
        assert_eq!(opts.log_level, "warn");
    }

    #[test]
    fn unknown_file_keys_are_ignored() {
        let file = json!({"addr": ":7000", "frobnicate": true});
        let opts = Options::builder()
            .load_from(Some(file), &HashMap::new())
            .unwrap();
        assert_eq!(opts.addr, ":7000");
    }

    #[test]
    fn programmatic_mcp_beats_environment() {
        let mut env = HashMap::new();
        env.insert("HS_MCP_ENABLED".to_string(), "false".to_string());

        let opts = Options::builder()
            .mcp(McpOptions::default())
            .load_from(None, &env)
            .unwrap();
        assert!(opts.mcp.enabled);

        // Without a programmatic call, the environment rules.
        let opts = Options::builder().load_from(None, &env).unwrap();
        assert!(!opts.mcp.enabled);
    }

    #[test]
    fn port_override_keeps_host() {
        let mut env = HashMap::new();
        env.insert("HS_PORT".to_string(), "9000".to_string());
        let opts = Options::builder()
            .addr("127.0.0.1:8080")
            .load_from(None, &env)
            .unwrap();
        assert_eq!(opts.addr, "127.0.0.1:9000");
    }

    #[test]
    fn tls_requires_both_halves() {
        let file = json!({"tls_cert_file": "/tmp/cert.pem"});
        assert!(Options::builder()
            .load_from(Some(file), &HashMap::new())
            .is_err());
    }

    #[test]
    fn rate_limit_requires_burst() {
        let file = json!({"rate_limit": 10});
        assert!(Options::builder()
            .load_from(Some(file), &HashMap::new())
            .is_err());
    }

    #[test]
    fn cors_origins_env_is_comma_separated() {
        let mut env = HashMap::new();
        env.insert(
            "HS_CORS_ORIGINS".to_string(),
            "https://a.test, https://b.test".to_string(),
        );
        let opts = Options::builder().load_from(None, &env).unwrap();
        assert_eq!(opts.cors_origins, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn socket_addr_expands_bare_port() {
        assert_eq!(
            Options::socket_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse().unwrap()
        );
        assert!(Options::socket_addr("nonsense").is_err());
    }

    #[test]
    fn sanitized_config_masks_validator() {
        let opts = Options {
            auth_token_validator: Some(Arc::new(|_| true)),
            ..Options::default()
        };
        let value = opts.sanitized();
        assert_eq!(value["auth_token_validator"], "<configured>");
        assert!(value.get("addr").is_some());
    }
}
