mod configuration_source;
mod diagnostics;
mod record_store;

pub use configuration_source::CascadeConfigurationSource;
pub use diagnostics::{DiagnosticLevel, Diagnostics, DiagnosticsSink};
pub use record_store::{BatchItemOutcome, RecordQuery, RecordStore, RecordUpdate};
