//! Diagnostics sink forwarding engine diagnostics to `tracing`.

use cascade_application::{DiagnosticLevel, DiagnosticsSink};
use tracing::{debug, error, info, warn};

/// Diagnostics sink that writes engine messages as tracing events.
#[derive(Debug, Clone)]
pub struct TracingDiagnosticsSink;

impl TracingDiagnosticsSink {
    /// Creates a new tracing diagnostics sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingDiagnosticsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSink for TracingDiagnosticsSink {
    fn log(&self, level: DiagnosticLevel, message: &str) {
        match level {
            DiagnosticLevel::Info => info!(level = level.as_str(), "{message}"),
            DiagnosticLevel::Warning => warn!(level = level.as_str(), "{message}"),
            DiagnosticLevel::Error => error!(level = level.as_str(), "{message}"),
            DiagnosticLevel::Debug => debug!(level = level.as_str(), "{message}"),
        }
    }

    fn begin(&self, operation: &str) {
        debug!(operation = %operation, "cascade operation started");
    }

    fn end(&self, operation: &str) {
        debug!(operation = %operation, "cascade operation finished");
    }
}
