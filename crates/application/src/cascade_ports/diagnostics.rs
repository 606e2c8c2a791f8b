use std::sync::Arc;

/// Severity of one diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// Informational message.
    Info,
    /// Recovered problem.
    Warning,
    /// Failure surfaced to the host.
    Error,
    /// Verbose tracing, only emitted when the configuration enables it.
    Debug,
}

impl DiagnosticLevel {
    /// Returns the stable level name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

/// Observability sink for engine diagnostics.
pub trait DiagnosticsSink: Send + Sync {
    /// Records one leveled message.
    fn log(&self, level: DiagnosticLevel, message: &str);

    /// Marks the start of one named operation.
    fn begin(&self, operation: &str);

    /// Marks the end of one named operation.
    fn end(&self, operation: &str);
}

/// Per-invocation diagnostics handle.
///
/// A missing sink turns every call into a no-op.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<Arc<dyn DiagnosticsSink>>,
    verbose: bool,
}

impl Diagnostics {
    /// Creates a handle writing to an optional sink.
    #[must_use]
    pub fn new(sink: Option<Arc<dyn DiagnosticsSink>>, verbose: bool) -> Self {
        Self { sink, verbose }
    }

    /// Creates a handle that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Records an informational message.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(DiagnosticLevel::Info, message.as_ref());
    }

    /// Records a warning.
    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(DiagnosticLevel::Warning, message.as_ref());
    }

    /// Records an error.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(DiagnosticLevel::Error, message.as_ref());
    }

    /// Records a debug message when verbose diagnostics are enabled.
    pub fn debug(&self, message: impl AsRef<str>) {
        if self.verbose {
            self.log(DiagnosticLevel::Debug, message.as_ref());
        }
    }

    /// Marks the start of one named operation.
    pub fn begin(&self, operation: &str) {
        if let Some(sink) = &self.sink {
            sink.begin(operation);
        }
    }

    /// Marks the end of one named operation.
    pub fn end(&self, operation: &str) {
        if let Some(sink) = &self.sink {
            sink.end(operation);
        }
    }

    fn log(&self, level: DiagnosticLevel, message: &str) {
        if let Some(sink) = &self.sink {
            sink.log(level, message);
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Diagnostics")
            .field("has_sink", &self.sink.is_some())
            .field("verbose", &self.verbose)
            .finish()
    }
}
