//! Logging initialization.
//!
//! One `tracing-subscriber` registry: a reloadable `EnvFilter` (so dev
//! mode can change the level at runtime), an optional ring-buffer layer
//! feeding the `hs://logs` observability resource, and a stderr fmt
//! layer. `RUST_LOG` wins over the configured level when set.

use std::sync::Arc;

use hyperserve_mcp::observability::RingLayer;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Handle for runtime log-level changes.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("active", &self.handle.is_some())
            .finish()
    }
}

impl LogControl {
    /// No-op control (used when a subscriber was already installed,
    /// e.g. by the embedding application or a test harness).
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Swap the active filter for a new level.
    pub fn set_level(&self, level: &str) {
        if let Some(handle) = &self.handle {
            match EnvFilter::try_new(level) {
                Ok(filter) => {
                    if let Err(err) = handle.reload(filter) {
                        debug!(error = %err, "log level reload failed");
                    }
                }
                Err(err) => debug!(error = %err, level, "invalid log level"),
            }
        }
    }

    /// Adapter for the dev-mode `server_control` tool.
    pub fn as_callback(&self) -> Arc<dyn Fn(&str) + Send + Sync> {
        let control = self.clone();
        Arc::new(move |level| control.set_level(level))
    }
}

/// Install the global subscriber. Returns a disabled control when one is
/// already installed instead of failing server startup.
pub fn init(level: &str, ring: Option<RingLayer>) -> LogControl {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let registry = tracing_subscriber::registry().with(filter_layer);
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let installed = registry.with(ring).with(fmt_layer).try_init();

    match installed {
        Ok(()) => LogControl {
            handle: Some(handle),
        },
        Err(_) => LogControl::disabled(),
    }
}
