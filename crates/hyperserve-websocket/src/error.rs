//! WebSocket error types.

use crate::frame::CloseCode;

/// Result type for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors surfaced by the handshake, codec, and session layers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WsError {
    /// The HTTP request is not a valid WebSocket upgrade.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// The peer's origin failed the configured origin policy.
    #[error("origin not allowed: {0}")]
    OriginDenied(String),

    /// The peer violated the framing protocol. The session has sent (or
    /// will send) a close frame with the carried code.
    #[error("protocol violation ({code}): {reason}")]
    Protocol {
        /// Close code sent to the peer
        code: CloseCode,
        /// What went wrong
        reason: String,
    },

    /// An assembled message exceeded the configured maximum. The session
    /// closes with code 1009.
    #[error("message exceeds maximum size of {limit} bytes")]
    MessageTooLarge {
        /// Configured maximum
        limit: usize,
    },

    /// The peer sent a close frame. Carries the peer's code and reason;
    /// the session has echoed the close.
    #[error("connection closed by peer ({code}): {reason}")]
    Closed {
        /// Close code from the peer's payload (1005 when absent)
        code: CloseCode,
        /// UTF-8 reason from the peer's payload
        reason: String,
    },

    /// A read or write deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// Underlying transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Protocol-violation constructor.
    pub fn protocol(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// True for the normal-closure case (peer closed with 1000).
    pub fn is_normal_close(&self) -> bool {
        matches!(self, Self::Closed { code, .. } if *code == CloseCode::NORMAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_close_detection() {
        let err = WsError::Closed {
            code: CloseCode::NORMAL,
            reason: String::new(),
        };
        assert!(err.is_normal_close());

        let err = WsError::Closed {
            code: CloseCode::PROTOCOL_ERROR,
            reason: "bad frame".into(),
        };
        assert!(!err.is_normal_close());
    }
}
