use async_trait::async_trait;
use cascade_core::AppResult;
use cascade_domain::{FieldMetadata, FilterCriterion, Record, RecordId, ValueSet};

/// Criteria-based read of one entity's records.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    /// Entity logical name to read.
    pub entity_logical_name: String,
    /// AND-combined conditions.
    pub criteria: Vec<FilterCriterion>,
    /// Optional restriction to one record.
    pub record_id: Option<RecordId>,
    /// Columns to fetch; identifiers are always returned, an empty list fetches nothing else.
    pub columns: Vec<String>,
    /// Maximum rows returned.
    pub limit: usize,
}

/// Field values to write onto one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    /// Entity logical name of the written record.
    pub entity_logical_name: String,
    /// Written record identifier.
    pub record_id: RecordId,
    /// Target field values.
    pub values: ValueSet,
}

/// Per-item result of a grouped write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemOutcome {
    /// Written record identifier.
    pub record_id: RecordId,
    /// Failure message when the write failed.
    pub error_message: Option<String>,
}

impl BatchItemOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(record_id: RecordId) -> Self {
        Self {
            record_id,
            error_message: None,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(record_id: RecordId, error_message: impl Into<String>) -> Self {
        Self {
            record_id,
            error_message: Some(error_message.into()),
        }
    }
}

/// Record store port used by the cascade engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads one record restricted to the requested columns.
    async fn retrieve_record(
        &self,
        entity_logical_name: &str,
        record_id: RecordId,
        columns: &[String],
    ) -> AppResult<Option<Record>>;

    /// Reads records matching all criteria, capped at the query limit.
    async fn query_records(&self, query: RecordQuery) -> AppResult<Vec<Record>>;

    /// Writes field values onto one record.
    async fn update_record(&self, update: RecordUpdate) -> AppResult<()>;

    /// Writes a group of updates with continue-on-failure semantics.
    ///
    /// Outcomes are reported per item in submission order; `Err` means the
    /// whole submission failed.
    async fn execute_batch(&self, updates: Vec<RecordUpdate>) -> AppResult<Vec<BatchItemOutcome>>;

    /// Returns type metadata for one field, `None` when the field is unknown.
    async fn field_metadata(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
    ) -> AppResult<Option<FieldMetadata>>;
}
