//! Side channel for quota and backend diagnostics.
//!
//! The [`Monitor`] formats one line per event and hands it to an optional
//! [`LogSink`]. With no sink configured every call is a no-op.

use std::fmt;
use std::sync::Arc;

/// Destination for monitor lines.
pub trait LogSink: Send + Sync {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Sink that forwards monitor lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn warn(&self, message: &str) {
        tracing::warn!(target: "quotakeeper", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "quotakeeper", "{}", message);
    }
}

/// Stateless reporter for exceeded limits and swallowed store errors.
#[derive(Clone, Default)]
pub struct Monitor {
    sink: Option<Arc<dyn LogSink>>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Monitor {
    pub fn new(sink: Option<Arc<dyn LogSink>>) -> Self {
        Self { sink }
    }

    /// A monitor that drops everything.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// A monitor writing to `tracing`.
    pub fn tracing() -> Self {
        Self::new(Some(Arc::new(TracingSink)))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Emit the warning for a rejected evaluation.
    pub fn log_exceeded(&self, key: &str, limit: u64, period: u64) {
        if let Some(sink) = &self.sink {
            sink.warn(&format!(
                "Rate limit exceeded for {}. Limit: {} requests per {} seconds",
                key, limit, period
            ));
        }
    }

    /// Report a backend failure that a store absorbed.
    pub fn log_store_error(&self, store: &str, operation: &str, error: &dyn fmt::Display) {
        if let Some(sink) = &self.sink {
            sink.error(&format!("{}#{} error: {}", store, operation, error));
        }
    }
}
