use super::*;

/// Upper bound on child records one related configuration may update per event.
pub const MAX_RELATED_RECORDS: usize = 5000;

/// Returns the child lookup field pointing at the parent.
///
/// An explicit `lookup_field_name` always wins. Otherwise the name is derived
/// from the relationship name on a best-effort basis: its last
/// underscore-delimited segment when that segment ends in `id`, else
/// `<parent entity>id`. This fallback is fragile and only meant for
/// conventionally named relationships.
#[must_use]
pub fn foreign_key_field(related: &RelatedEntityConfig, parent_entity: &str) -> String {
    if let Some(lookup_field) = related.configured_lookup_field() {
        return lookup_field.to_owned();
    }

    related
        .configured_relationship_name()
        .and_then(|relationship| relationship.rsplit('_').next())
        .map(str::to_ascii_lowercase)
        .filter(|segment| segment.len() > 2 && segment.ends_with("id"))
        .unwrap_or_else(|| format!("{}id", parent_entity.trim().to_ascii_lowercase()))
}

impl CascadeService {
    /// Finds the identifiers of child records linked to one parent.
    ///
    /// Configured filter criteria are AND-combined with the link condition.
    pub async fn find_children(
        &self,
        parent_id: RecordId,
        related: &RelatedEntityConfig,
        parent_entity: &str,
        diagnostics: &Diagnostics,
    ) -> AppResult<Vec<RecordId>> {
        let lookup_field = foreign_key_field(related, parent_entity);
        if related.link_mode == RelationshipMode::ByNamedRelationship
            && related.configured_lookup_field().is_none()
        {
            diagnostics.debug(format!(
                "derived lookup field '{lookup_field}' from relationship '{}'",
                related.configured_relationship_name().unwrap_or_default()
            ));
        }

        let mut criteria = vec![FilterCriterion::equals(
            lookup_field.as_str(),
            FilterValue::Identifier(parent_id.as_uuid()),
        )?];
        if let Some(filter) = related.configured_filter() {
            criteria.extend(parse_filter_criteria(filter)?);
        }

        let mut records = self
            .record_store
            .query_records(RecordQuery {
                entity_logical_name: related.entity_logical_name.clone(),
                criteria,
                record_id: None,
                columns: Vec::new(),
                limit: MAX_RELATED_RECORDS + 1,
            })
            .await?;

        if records.len() > MAX_RELATED_RECORDS {
            records.truncate(MAX_RELATED_RECORDS);
            diagnostics.warning(format!(
                "related '{}' records of parent '{parent_id}' reached the {MAX_RELATED_RECORDS} record ceiling; remaining records are not updated",
                related.entity_logical_name
            ));
        }

        diagnostics.debug(format!(
            "found {} '{}' records linked through '{lookup_field}'",
            records.len(),
            related.entity_logical_name
        ));

        Ok(records.iter().map(Record::record_id).collect())
    }

    /// Finds the parent a child was attached or re-linked to, with the mapped source fields.
    ///
    /// Returns `None` when the child carries no parent reference, when an
    /// update did not change the reference, or when the reference targets
    /// another entity.
    pub async fn find_parent(
        &self,
        event: &ChangeEvent,
        related: &RelatedEntityConfig,
        parent_entity: &str,
        diagnostics: &Diagnostics,
    ) -> AppResult<Option<Record>> {
        let lookup_field = foreign_key_field(related, parent_entity);
        let Some(reference) = event
            .target()
            .field(lookup_field.as_str())
            .and_then(FieldValue::as_reference)
        else {
            diagnostics.debug(format!(
                "'{}' carries no '{lookup_field}' reference, nothing to attach",
                event.entity_logical_name()
            ));
            return Ok(None);
        };

        if event.operation() == ChangeOperation::Update
            && let Some(previous) = event
                .pre_image()
                .and_then(|pre| pre.field(lookup_field.as_str()))
                .and_then(FieldValue::as_reference)
            && previous.refers_to_same(reference)
        {
            diagnostics.debug(format!(
                "'{lookup_field}' on '{}' is unchanged, nothing to attach",
                event.target().record_id()
            ));
            return Ok(None);
        }

        if reference.entity_logical_name().as_str() != parent_entity {
            diagnostics.debug(format!(
                "'{lookup_field}' references '{}' instead of '{parent_entity}'",
                reference.entity_logical_name()
            ));
            return Ok(None);
        }

        let parent = self
            .record_store
            .retrieve_record(
                parent_entity,
                reference.record_id(),
                related.source_fields().as_slice(),
            )
            .await?;

        if parent.is_none() {
            diagnostics.warning(format!(
                "parent '{parent_entity}' record '{}' referenced by '{lookup_field}' does not exist",
                reference.record_id()
            ));
        }

        Ok(parent)
    }

    /// Checks whether the changed child currently satisfies the configured filter.
    ///
    /// Criteria on fields carried by the event snapshots are evaluated there,
    /// since a pre-commit store does not hold the event's changes yet. The
    /// remaining criteria are checked against the stored record. Read
    /// failures are permissive.
    pub(super) async fn child_satisfies_filter(
        &self,
        event: &ChangeEvent,
        criteria: Vec<FilterCriterion>,
        diagnostics: &Diagnostics,
    ) -> bool {
        let snapshot_value = |field: &str| {
            event
                .target()
                .field(field)
                .or_else(|| event.pre_image().and_then(|pre| pre.field(field)))
        };

        let (from_snapshot, remaining): (Vec<FilterCriterion>, Vec<FilterCriterion>) = criteria
            .into_iter()
            .partition(|criterion| snapshot_value(criterion.field_logical_name()).is_some());

        if !from_snapshot
            .iter()
            .all(|criterion| criterion.matches(snapshot_value(criterion.field_logical_name())))
        {
            return false;
        }

        if remaining.is_empty() {
            return true;
        }

        // A created record has no stored state beyond its own snapshot.
        if event.operation() == ChangeOperation::Create {
            return remaining.iter().all(|criterion| criterion.matches(None));
        }

        match self
            .record_store
            .query_records(RecordQuery {
                entity_logical_name: event.entity_logical_name().to_owned(),
                criteria: remaining,
                record_id: Some(event.target().record_id()),
                columns: Vec::new(),
                limit: 1,
            })
            .await
        {
            Ok(records) => !records.is_empty(),
            Err(error) => {
                diagnostics.warning(format!(
                    "could not evaluate filter for '{}' record '{}', proceeding: {error}",
                    event.entity_logical_name(),
                    event.target().record_id()
                ));
                true
            }
        }
    }
}
