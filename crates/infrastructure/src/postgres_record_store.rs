use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use cascade_application::{BatchItemOutcome, RecordQuery, RecordStore, RecordUpdate};
use cascade_core::{AppError, AppResult};
use cascade_domain::{FieldMetadata, FieldType, FieldValue, Record, RecordId};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

use crate::RecordSeed;

mod query;

/// PostgreSQL-backed record store.
///
/// Record fields live in one JSONB object per record, keyed by field logical name.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces every seeded record and field metadata entry.
    pub async fn seed(&self, seed: RecordSeed) -> AppResult<()> {
        for record in &seed.records {
            self.save_record(record).await?;
        }

        for metadata in &seed.field_metadata {
            self.save_field_metadata(metadata).await?;
        }

        Ok(())
    }

    /// Inserts or replaces one record.
    pub async fn save_record(&self, record: &Record) -> AppResult<()> {
        let data = to_json(record.fields(), record.record_id())?;
        let formatted_values = to_json(record.formatted_values(), record.record_id())?;

        sqlx::query(
            r#"
            INSERT INTO cascade_records (entity_logical_name, id, data, formatted_values)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_logical_name, id)
            DO UPDATE SET data = EXCLUDED.data,
                          formatted_values = EXCLUDED.formatted_values,
                          updated_at = now()
            "#,
        )
        .bind(record.entity_logical_name().as_str())
        .bind(record.record_id().as_uuid())
        .bind(data)
        .bind(formatted_values)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save record '{}' for entity '{}': {error}",
                record.record_id(),
                record.entity_logical_name()
            ))
        })?;

        Ok(())
    }

    /// Inserts or replaces metadata for one field.
    pub async fn save_field_metadata(&self, metadata: &FieldMetadata) -> AppResult<()> {
        let max_length = metadata
            .max_length()
            .map(i32::try_from)
            .transpose()
            .map_err(|error| {
                AppError::Validation(format!(
                    "max_length of field '{}.{}' is out of range: {error}",
                    metadata.entity_logical_name(),
                    metadata.logical_name()
                ))
            })?;

        sqlx::query(
            r#"
            INSERT INTO cascade_field_metadata (entity_logical_name, logical_name, field_type, max_length)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_logical_name, logical_name)
            DO UPDATE SET field_type = EXCLUDED.field_type, max_length = EXCLUDED.max_length
            "#,
        )
        .bind(metadata.entity_logical_name().as_str())
        .bind(metadata.logical_name().as_str())
        .bind(metadata.field_type().as_str())
        .bind(max_length)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save field metadata '{}.{}': {error}",
                metadata.entity_logical_name(),
                metadata.logical_name()
            ))
        })?;

        Ok(())
    }

    async fn update_with<'c, E>(&self, executor: E, update: &RecordUpdate) -> AppResult<()>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let values = to_json(&update.values, update.record_id)?;
        let result = sqlx::query(
            r#"
            UPDATE cascade_records
            SET data = data || $3, updated_at = now()
            WHERE entity_logical_name = $1 AND id = $2
            "#,
        )
        .bind(update.entity_logical_name.as_str())
        .bind(update.record_id.as_uuid())
        .bind(values)
        .execute(executor)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to update record '{}' for entity '{}': {error}",
                update.record_id, update.entity_logical_name
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "record '{}' does not exist for entity '{}'",
                update.record_id, update.entity_logical_name
            )));
        }

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    id: Uuid,
    entity_logical_name: String,
    data: Value,
    formatted_values: Value,
}

#[derive(Debug, FromRow)]
struct FieldMetadataRow {
    entity_logical_name: String,
    logical_name: String,
    field_type: String,
    max_length: Option<i32>,
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn retrieve_record(
        &self,
        entity_logical_name: &str,
        record_id: RecordId,
        columns: &[String],
    ) -> AppResult<Option<Record>> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, entity_logical_name, data, formatted_values
            FROM cascade_records
            WHERE entity_logical_name = $1 AND id = $2
            "#,
        )
        .bind(entity_logical_name)
        .bind(record_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to read record '{record_id}' for entity '{entity_logical_name}': {error}"
            ))
        })?;

        row.map(|row| record_from_row(row).map(|record| record.project(columns)))
            .transpose()
    }

    async fn query_records(&self, query: RecordQuery) -> AppResult<Vec<Record>> {
        self.query_records_impl(query).await
    }

    async fn update_record(&self, update: RecordUpdate) -> AppResult<()> {
        self.update_with(&self.pool, &update).await
    }

    async fn execute_batch(&self, updates: Vec<RecordUpdate>) -> AppResult<Vec<BatchItemOutcome>> {
        let mut connection = self.pool.acquire().await.map_err(|error| {
            AppError::Internal(format!("failed to acquire connection for batch: {error}"))
        })?;

        let mut outcomes = Vec::with_capacity(updates.len());
        for update in &updates {
            match self.update_with(&mut *connection, update).await {
                Ok(()) => outcomes.push(BatchItemOutcome::succeeded(update.record_id)),
                Err(error) => {
                    warn!(
                        entity = %update.entity_logical_name,
                        record_id = %update.record_id,
                        error = %error,
                        "batch item update failed"
                    );
                    outcomes.push(BatchItemOutcome::failed(update.record_id, error.to_string()));
                }
            }
        }

        Ok(outcomes)
    }

    async fn field_metadata(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
    ) -> AppResult<Option<FieldMetadata>> {
        let row = sqlx::query_as::<_, FieldMetadataRow>(
            r#"
            SELECT entity_logical_name, logical_name, field_type, max_length
            FROM cascade_field_metadata
            WHERE entity_logical_name = $1 AND logical_name = $2
            "#,
        )
        .bind(entity_logical_name)
        .bind(field_logical_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to read field metadata '{entity_logical_name}.{field_logical_name}': {error}"
            ))
        })?;

        row.map(field_metadata_from_row).transpose()
    }
}

fn record_from_row(row: RecordRow) -> AppResult<Record> {
    let fields: BTreeMap<String, FieldValue> = serde_json::from_value(row.data).map_err(|error| {
        AppError::Internal(format!(
            "stored data of record '{}' for entity '{}' is invalid: {error}",
            row.id, row.entity_logical_name
        ))
    })?;
    let formatted_values: BTreeMap<String, String> = serde_json::from_value(row.formatted_values)
        .map_err(|error| {
            AppError::Internal(format!(
                "stored formatted values of record '{}' are invalid: {error}",
                row.id
            ))
        })?;

    let mut record = Record::new(RecordId::from_uuid(row.id), row.entity_logical_name)?;
    record.merge_fields(fields);
    for (field, label) in formatted_values {
        record = record.with_formatted_value(field, label);
    }

    Ok(record)
}

fn field_metadata_from_row(row: FieldMetadataRow) -> AppResult<FieldMetadata> {
    let max_length = row
        .max_length
        .map(usize::try_from)
        .transpose()
        .map_err(|error| {
            AppError::Internal(format!(
                "stored max_length of field '{}.{}' is invalid: {error}",
                row.entity_logical_name, row.logical_name
            ))
        })?;

    FieldMetadata::new(
        row.entity_logical_name,
        row.logical_name,
        FieldType::from_str(row.field_type.as_str())?,
        max_length,
    )
}

fn to_json<T: Serialize>(value: &T, record_id: RecordId) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|error| {
        AppError::Internal(format!(
            "failed to serialize values of record '{record_id}': {error}"
        ))
    })
}
