//! Server error taxonomy.

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the server runtime.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Malformed configuration; fails server construction.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong
        message: String,
        /// Offending option, when known
        key: Option<String>,
    },

    /// A listener could not bind; fatal to `run`.
    #[error("bind error on {addr}: {source}")]
    Bind {
        /// Address that failed
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Malformed HTTP, WebSocket, or JSON-RPC framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing or invalid credentials.
    #[error("authentication failed")]
    Auth,

    /// Token bucket refused the request.
    #[error("rate limit exceeded; retry after {retry_after}s")]
    RateLimitExceeded {
        /// Seconds until a token is available
        retry_after: u64,
    },

    /// Unknown route or resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// A deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The request's context was canceled (client gone or draining).
    #[error("canceled")]
    Canceled,

    /// IO failure outside bind.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected failure; full context is logged, never sent to clients.
    #[error("internal error: {0}")]
    Internal(String),

    /// A background task panicked outside the recovery middleware; the
    /// server performed a controlled shutdown and surfaced this from
    /// `run`.
    #[error("unrecoverable panic during shutdown: {0}")]
    ShutdownPanic(String),
}

impl ServerError {
    /// Configuration-error constructor.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Configuration error naming the offending key.
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Bind-error constructor.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// HTTP status this error maps to.
    pub fn http_status(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Config { .. }
            | Self::Bind { .. }
            | Self::Canceled
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::ShutdownPanic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether `run` should treat this as fatal at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Config { .. })
    }

    /// Process exit code for a failed `run`: 2 when a panic forced the
    /// shutdown, 1 for every other failure (bind, config, transport).
    /// The clean-shutdown code 0 belongs to the `Ok` path at the call
    /// site; see the crate-level example.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ShutdownPanic(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ServerError::Auth.http_status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(
            ServerError::RateLimitExceeded { retry_after: 1 }.http_status(),
            http::StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServerError::NotFound("/x".into()).http_status(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Protocol("bad".into()).http_status(),
            http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn bind_and_config_are_fatal() {
        let bind = ServerError::bind(
            ":8080",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(bind.is_fatal());
        assert_eq!(bind.exit_code(), 1);
        assert!(ServerError::config("bad option").is_fatal());
        assert!(!ServerError::Auth.is_fatal());
    }

    #[test]
    fn shutdown_panic_exits_2() {
        let err = ServerError::ShutdownPanic("connection task panicked".into());
        assert_eq!(err.exit_code(), 2);
        assert_eq!(ServerError::config("x").exit_code(), 1);
    }
}
