use std::path::Path;

use cascade_core::{AppError, AppResult};
use cascade_domain::{FieldMetadata, Record};
use serde::Deserialize;

/// Records and field metadata used to prime a record store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordSeed {
    /// Records to insert or replace.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Field metadata to insert or replace.
    #[serde(default)]
    pub field_metadata: Vec<FieldMetadata>,
}

impl RecordSeed {
    /// Parses a seed document.
    pub fn from_json(document: &str) -> AppResult<Self> {
        serde_json::from_str(document)
            .map_err(|error| AppError::Validation(format!("invalid record seed document: {error}")))
    }

    /// Reads and parses a seed document from disk.
    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let document = tokio::fs::read_to_string(path).await.map_err(|error| {
            AppError::Internal(format!(
                "failed to read record seed '{}': {error}",
                path.display()
            ))
        })?;

        Self::from_json(document.as_str())
    }
}
