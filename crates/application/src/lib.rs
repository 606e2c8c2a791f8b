//! Application services and ports.

#![forbid(unsafe_code)]

mod cascade_ports;
mod cascade_service;

pub use cascade_ports::{
    BatchItemOutcome, CascadeConfigurationSource, DiagnosticLevel, Diagnostics, DiagnosticsSink,
    RecordQuery, RecordStore, RecordUpdate,
};
pub use cascade_service::{
    AttachApplication, AttachOutcome, BatchUpdateResult, CascadeService, CascadeSummary,
    DispatchReport, FieldMetadataCache, MAX_RELATED_RECORDS, RecordUpdateError,
    RelatedCascadeOutcome, RelatedCascadeStatus, UPDATE_BATCH_SIZE, foreign_key_field,
    should_cascade, truncate_text,
};
