use std::sync::Arc;

use cascade_core::{AppError, AppResult};
use cascade_domain::{
    CascadeConfiguration, ChangeEvent, ChangeOperation, ExecutionPhase, FieldMapping,
    FieldMetadata, FieldValue, FilterCriterion, FilterValue, Record, RecordId,
    RelatedEntityConfig, RelationshipMode, ValueSet, parse_filter_criteria,
};

use crate::cascade_ports::{
    CascadeConfigurationSource, Diagnostics, DiagnosticsSink, RecordQuery, RecordStore,
    RecordUpdate,
};

mod attach;
mod batch;
mod dispatch;
mod locator;
mod metadata_cache;
mod parent;
mod trigger;
mod values;

pub use attach::{AttachApplication, AttachOutcome};
pub use batch::{BatchUpdateResult, RecordUpdateError, UPDATE_BATCH_SIZE};
pub use dispatch::DispatchReport;
pub use locator::{MAX_RELATED_RECORDS, foreign_key_field};
pub use metadata_cache::FieldMetadataCache;
pub use parent::{CascadeSummary, RelatedCascadeOutcome, RelatedCascadeStatus};
pub use trigger::should_cascade;
pub use values::truncate_text;

/// Cascade engine service: propagates parent field values to related children.
#[derive(Clone)]
pub struct CascadeService {
    record_store: Arc<dyn RecordStore>,
    metadata_cache: Arc<FieldMetadataCache>,
    diagnostics_sink: Option<Arc<dyn DiagnosticsSink>>,
    configuration_source: Option<Arc<dyn CascadeConfigurationSource>>,
}

impl CascadeService {
    /// Creates a cascade service over a record store.
    #[must_use]
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self {
            record_store,
            metadata_cache: Arc::new(FieldMetadataCache::new()),
            diagnostics_sink: None,
            configuration_source: None,
        }
    }

    /// Shares a field metadata cache with other service instances.
    #[must_use]
    pub fn with_metadata_cache(mut self, metadata_cache: Arc<FieldMetadataCache>) -> Self {
        self.metadata_cache = metadata_cache;
        self
    }

    /// Adds optional diagnostics output.
    #[must_use]
    pub fn with_diagnostics_sink(mut self, diagnostics_sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics_sink = Some(diagnostics_sink);
        self
    }

    /// Adds the configuration source used by event dispatch.
    #[must_use]
    pub fn with_configuration_source(
        mut self,
        configuration_source: Arc<dyn CascadeConfigurationSource>,
    ) -> Self {
        self.configuration_source = Some(configuration_source);
        self
    }

    /// Returns a diagnostics handle honoring the configuration's verbosity flag.
    #[must_use]
    pub fn diagnostics_for(&self, configuration: &CascadeConfiguration) -> Diagnostics {
        Diagnostics::new(self.diagnostics_sink.clone(), configuration.enable_tracing)
    }
}

#[cfg(test)]
mod tests;
