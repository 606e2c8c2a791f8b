use super::*;

/// Number of child updates submitted to the store per grouped write.
pub const UPDATE_BATCH_SIZE: usize = 100;

/// One failed child update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdateError {
    /// Child record that was not updated.
    pub record_id: RecordId,
    /// Store-reported failure.
    pub message: String,
}

/// Aggregate outcome of applying one value set to many children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUpdateResult {
    /// Successfully updated children.
    pub success_count: usize,
    /// Children whose update failed.
    pub error_count: usize,
    /// Failure detail per failed child.
    pub errors: Vec<RecordUpdateError>,
}

impl BatchUpdateResult {
    fn record_failure(&mut self, record_id: RecordId, message: impl Into<String>) {
        self.error_count += 1;
        self.errors.push(RecordUpdateError {
            record_id,
            message: message.into(),
        });
    }

    fn absorb(&mut self, other: Self) {
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.errors.extend(other.errors);
    }
}

impl CascadeService {
    /// Writes the same value set onto every child, in groups of [`UPDATE_BATCH_SIZE`].
    ///
    /// A failed group does not stop later groups.
    pub async fn apply_updates(
        &self,
        entity_logical_name: &str,
        record_ids: &[RecordId],
        values: &ValueSet,
        diagnostics: &Diagnostics,
    ) -> BatchUpdateResult {
        let mut result = BatchUpdateResult::default();

        for (index, chunk) in record_ids.chunks(UPDATE_BATCH_SIZE).enumerate() {
            let chunk_result = self
                .apply_update_chunk(entity_logical_name, chunk, values)
                .await;
            diagnostics.debug(format!(
                "batch {} for '{entity_logical_name}': {} updated, {} failed",
                index + 1,
                chunk_result.success_count,
                chunk_result.error_count
            ));
            result.absorb(chunk_result);
        }

        for failure in &result.errors {
            diagnostics.error(format!(
                "failed to update '{entity_logical_name}' record '{}': {}",
                failure.record_id, failure.message
            ));
        }

        diagnostics.info(format!(
            "updated {} '{entity_logical_name}' records, {} failed",
            result.success_count, result.error_count
        ));

        result
    }

    async fn apply_update_chunk(
        &self,
        entity_logical_name: &str,
        chunk: &[RecordId],
        values: &ValueSet,
    ) -> BatchUpdateResult {
        let mut result = BatchUpdateResult::default();
        let updates = chunk
            .iter()
            .map(|record_id| RecordUpdate {
                entity_logical_name: entity_logical_name.to_owned(),
                record_id: *record_id,
                values: values.clone(),
            })
            .collect();

        let outcomes = match self.record_store.execute_batch(updates).await {
            Ok(outcomes) => outcomes,
            Err(error) => {
                for record_id in chunk {
                    result.record_failure(*record_id, format!("batch submission failed: {error}"));
                }
                return result;
            }
        };

        for (position, record_id) in chunk.iter().enumerate() {
            match outcomes.get(position) {
                Some(outcome) => match &outcome.error_message {
                    None => result.success_count += 1,
                    Some(message) => result.record_failure(*record_id, message.clone()),
                },
                None => result.record_failure(*record_id, "no result reported"),
            }
        }

        result
    }
}
