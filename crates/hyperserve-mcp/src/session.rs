//! Session state for the `initialize` / `initialized` handshake.

use hyperserve_protocol::types::Implementation;
use parking_lot::Mutex;

use crate::error::{McpError, McpResult};

#[derive(Debug, Default)]
struct State {
    /// Set by `initialize`
    client: Option<Implementation>,
    protocol_version: Option<String>,
    /// Set by the `initialized` notification
    initialized: bool,
}

/// Per-connection MCP session.
///
/// Transitions are totally ordered within a session: `initialize` records
/// the client, the `initialized` notification finalizes, and everything
/// except `ping` is rejected until then.
#[derive(Debug, Default)]
pub struct McpSession {
    state: Mutex<State>,
}

impl McpSession {
    /// Fresh, uninitialized session. Stateful transports (stdio) use
    /// this and enforce the full handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that starts initialized. The HTTP transport uses this:
    /// each POST is independent, so ordinary calls are not gated on the
    /// handshake, while `initialize` still records the client and
    /// rejects a second attempt.
    pub fn pre_initialized() -> Self {
        let session = Self::default();
        session.state.lock().initialized = true;
        session
    }

    /// Record the `initialize` call.
    ///
    /// # Errors
    ///
    /// [`McpError::AlreadyInitialized`] on a second `initialize`.
    pub fn begin_initialize(
        &self,
        protocol_version: String,
        client: Implementation,
    ) -> McpResult<()> {
        let mut state = self.state.lock();
        if state.client.is_some() {
            return Err(McpError::AlreadyInitialized);
        }
        state.protocol_version = Some(protocol_version);
        state.client = Some(client);
        Ok(())
    }

    /// Handle the `initialized` notification.
    pub fn mark_initialized(&self) {
        self.state.lock().initialized = true;
    }

    /// Gate for ordinary method calls.
    ///
    /// # Errors
    ///
    /// [`McpError::NotInitialized`] until the handshake completed.
    pub fn require_initialized(&self) -> McpResult<()> {
        if self.state.lock().initialized {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    /// Client identity, once initialized.
    pub fn client(&self) -> Option<Implementation> {
        self.state.lock().client.clone()
    }

    /// Protocol version negotiated at `initialize`.
    pub fn protocol_version(&self) -> Option<String> {
        self.state.lock().protocol_version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_ordering() {
        let session = McpSession::new();
        assert!(matches!(
            session.require_initialized(),
            Err(McpError::NotInitialized)
        ));

        session
            .begin_initialize("2024-11-05".into(), Implementation::new("t", "1"))
            .unwrap();
        // `initialize` alone is not enough.
        assert!(session.require_initialized().is_err());

        session.mark_initialized();
        assert!(session.require_initialized().is_ok());
        assert_eq!(session.client().unwrap().name, "t");
    }

    #[test]
    fn pre_initialized_sessions_skip_the_gate() {
        let session = McpSession::pre_initialized();
        assert!(session.require_initialized().is_ok());
        // initialize still works exactly once.
        session
            .begin_initialize("2024-11-05".into(), Implementation::new("t", "1"))
            .unwrap();
        assert!(session
            .begin_initialize("2024-11-05".into(), Implementation::new("t", "1"))
            .is_err());
    }

    #[test]
    fn double_initialize_rejected() {
        let session = McpSession::new();
        session
            .begin_initialize("2024-11-05".into(), Implementation::new("a", "1"))
            .unwrap();
        assert!(matches!(
            session.begin_initialize("2024-11-05".into(), Implementation::new("b", "2")),
            Err(McpError::AlreadyInitialized)
        ));
    }
}
