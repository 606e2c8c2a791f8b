use std::collections::HashMap;

use async_trait::async_trait;
use cascade_application::{BatchItemOutcome, RecordQuery, RecordStore, RecordUpdate};
use cascade_core::{AppError, AppResult};
use cascade_domain::{FieldMetadata, Record, RecordId};
use tokio::sync::RwLock;

use crate::RecordSeed;

/// In-memory record store implementation.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<(String, RecordId), Record>>,
    field_metadata: RwLock<HashMap<(String, String), FieldMetadata>>,
}

impl InMemoryRecordStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            field_metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or replaces every seeded record and field metadata entry.
    pub async fn seed(&self, seed: RecordSeed) {
        for record in seed.records {
            self.insert_record(record).await;
        }

        for metadata in seed.field_metadata {
            self.insert_field_metadata(metadata).await;
        }
    }

    /// Inserts or replaces one record.
    pub async fn insert_record(&self, record: Record) {
        let key = (
            record.entity_logical_name().as_str().to_owned(),
            record.record_id(),
        );
        self.records.write().await.insert(key, record);
    }

    /// Inserts or replaces metadata for one field.
    pub async fn insert_field_metadata(&self, metadata: FieldMetadata) {
        let key = (
            metadata.entity_logical_name().as_str().to_owned(),
            metadata.logical_name().as_str().to_owned(),
        );
        self.field_metadata.write().await.insert(key, metadata);
    }

    /// Returns the full stored state of one record.
    pub async fn find_record(
        &self,
        entity_logical_name: &str,
        record_id: RecordId,
    ) -> Option<Record> {
        self.records
            .read()
            .await
            .get(&(entity_logical_name.to_owned(), record_id))
            .cloned()
    }

    async fn apply_update(&self, update: RecordUpdate) -> AppResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&(update.entity_logical_name.clone(), update.record_id))
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "record '{}' does not exist for entity '{}'",
                    update.record_id, update.entity_logical_name
                ))
            })?;

        record.merge_fields(update.values);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn retrieve_record(
        &self,
        entity_logical_name: &str,
        record_id: RecordId,
        columns: &[String],
    ) -> AppResult<Option<Record>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(entity_logical_name.to_owned(), record_id))
            .map(|record| record.project(columns)))
    }

    async fn query_records(&self, query: RecordQuery) -> AppResult<Vec<Record>> {
        let records = self.records.read().await;

        let mut listed: Vec<&Record> = records
            .iter()
            .filter_map(|((stored_entity, stored_id), record)| {
                let in_scope = stored_entity == &query.entity_logical_name
                    && query
                        .record_id
                        .is_none_or(|record_id| record_id == *stored_id);
                in_scope.then_some(record)
            })
            .filter(|record| {
                query.criteria.iter().all(|criterion| {
                    criterion.matches(record.field(criterion.field_logical_name()))
                })
            })
            .collect();
        listed.sort_by_key(|record| record.record_id());

        Ok(listed
            .into_iter()
            .take(query.limit)
            .map(|record| record.project(query.columns.as_slice()))
            .collect())
    }

    async fn update_record(&self, update: RecordUpdate) -> AppResult<()> {
        self.apply_update(update).await
    }

    async fn execute_batch(&self, updates: Vec<RecordUpdate>) -> AppResult<Vec<BatchItemOutcome>> {
        let mut outcomes = Vec::with_capacity(updates.len());
        for update in updates {
            let record_id = update.record_id;
            match self.apply_update(update).await {
                Ok(()) => outcomes.push(BatchItemOutcome::succeeded(record_id)),
                Err(error) => outcomes.push(BatchItemOutcome::failed(record_id, error.to_string())),
            }
        }

        Ok(outcomes)
    }

    async fn field_metadata(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
    ) -> AppResult<Option<FieldMetadata>> {
        Ok(self
            .field_metadata
            .read()
            .await
            .get(&(entity_logical_name.to_owned(), field_logical_name.to_owned()))
            .cloned())
    }
}
