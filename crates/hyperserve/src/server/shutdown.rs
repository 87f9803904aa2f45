//! Graceful shutdown coordination.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::server::{Lifecycle, LifecycleState};

/// Handle for triggering graceful shutdown from outside the run loop:
/// signal handlers, orchestration hooks, tests. Cloneable and
/// thread-safe; `shutdown` is idempotent and safe from any state.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    lifecycle: Arc<Lifecycle>,
}

impl ShutdownHandle {
    pub(crate) fn new(cancel: CancellationToken, lifecycle: Arc<Lifecycle>) -> Self {
        Self { cancel, lifecycle }
    }

    /// Begin draining: broadcast cancellation to the accept loops, SSE
    /// writers, sweeper, and in-flight requests.
    pub fn shutdown(&self) {
        self.lifecycle.advance(LifecycleState::Draining);
        self.cancel.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.lifecycle.state(),
            LifecycleState::Draining | LifecycleState::Stopped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_idempotent() {
        let handle = ShutdownHandle::new(CancellationToken::new(), Arc::new(Lifecycle::default()));
        assert!(!handle.is_shutting_down());
        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shutting_down());
        assert!(handle.cancel.is_cancelled());
    }
}
