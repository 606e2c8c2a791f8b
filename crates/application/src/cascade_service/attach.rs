use super::*;

const ATTACH_OPERATION: &str = "on_child_attached";

/// How the values resolved for an attached child were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachApplication {
    /// No related configuration produced values.
    NotApplicable,
    /// Values were set on the event target for the host to persist.
    FoldedIntoEvent,
    /// Values were written with a separate record update.
    Written,
    /// The separate record update failed.
    WriteFailed(String),
}

/// Outcome of processing a child attach or re-link event.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachOutcome {
    /// Values merged across matching related configurations.
    pub values: ValueSet,
    /// How the values were applied.
    pub application: AttachApplication,
}

impl AttachOutcome {
    fn not_applicable() -> Self {
        Self {
            values: ValueSet::new(),
            application: AttachApplication::NotApplicable,
        }
    }
}

impl CascadeService {
    /// Pulls parent values onto a child that was created under, or re-linked to, a parent.
    ///
    /// Pre-commit phases fold the values into `event`'s target; the
    /// post-operation phase writes them with a follow-up update.
    pub async fn on_child_attached(
        &self,
        event: &mut ChangeEvent,
        configuration: &CascadeConfiguration,
        phase: ExecutionPhase,
    ) -> AppResult<AttachOutcome> {
        configuration.validate()?;

        let diagnostics = self.diagnostics_for(configuration);
        diagnostics.begin(ATTACH_OPERATION);
        let result = self
            .attach_child(event, configuration, phase, &diagnostics)
            .await;
        diagnostics.end(ATTACH_OPERATION);
        result
    }

    async fn attach_child(
        &self,
        event: &mut ChangeEvent,
        configuration: &CascadeConfiguration,
        phase: ExecutionPhase,
        diagnostics: &Diagnostics,
    ) -> AppResult<AttachOutcome> {
        if !configuration.is_active {
            diagnostics.info(format!(
                "configuration '{}' is inactive, skipping",
                configuration.display_label()
            ));
            return Ok(AttachOutcome::not_applicable());
        }

        let mut merged = ValueSet::new();
        for related in configuration.related_for_child(event.entity_logical_name()) {
            let values = match self
                .attach_values(event, configuration, related, diagnostics)
                .await
            {
                Ok(Some(values)) => values,
                Ok(None) => continue,
                Err(error) if error.is_unclassified() => {
                    diagnostics.error(format!(
                        "attach from '{}' failed unexpectedly: {error:?}",
                        configuration.parent_entity
                    ));
                    return Err(error);
                }
                Err(error) => {
                    diagnostics.warning(format!(
                        "attach through related '{}' aborted: {error}",
                        related.entity_logical_name
                    ));
                    continue;
                }
            };

            for (target_field, value) in values {
                if merged.insert(target_field.clone(), value).is_some() {
                    diagnostics.debug(format!(
                        "'{target_field}' was already resolved by an earlier mapping and is overwritten"
                    ));
                }
            }
        }

        if merged.is_empty() {
            diagnostics.debug(format!(
                "no values to apply to '{}' record '{}'",
                event.entity_logical_name(),
                event.target().record_id()
            ));
            return Ok(AttachOutcome::not_applicable());
        }

        if phase.is_pre_commit() {
            event.target_mut().merge_fields(merged.clone());
            diagnostics.info(format!(
                "set {} values on '{}' record '{}' before commit",
                merged.len(),
                event.entity_logical_name(),
                event.target().record_id()
            ));
            return Ok(AttachOutcome {
                values: merged,
                application: AttachApplication::FoldedIntoEvent,
            });
        }

        let update = RecordUpdate {
            entity_logical_name: event.entity_logical_name().to_owned(),
            record_id: event.target().record_id(),
            values: merged.clone(),
        };
        let application = match self.record_store.update_record(update).await {
            Ok(()) => {
                diagnostics.info(format!(
                    "wrote {} values to '{}' record '{}'",
                    merged.len(),
                    event.entity_logical_name(),
                    event.target().record_id()
                ));
                AttachApplication::Written
            }
            Err(error) => {
                diagnostics.error(format!(
                    "failed to update '{}' record '{}': {error}",
                    event.entity_logical_name(),
                    event.target().record_id()
                ));
                AttachApplication::WriteFailed(error.to_string())
            }
        };

        Ok(AttachOutcome {
            values: merged,
            application,
        })
    }

    async fn attach_values(
        &self,
        event: &ChangeEvent,
        configuration: &CascadeConfiguration,
        related: &RelatedEntityConfig,
        diagnostics: &Diagnostics,
    ) -> AppResult<Option<ValueSet>> {
        let Some(parent) = self
            .find_parent(
                event,
                related,
                configuration.parent_entity.as_str(),
                diagnostics,
            )
            .await?
        else {
            return Ok(None);
        };

        if let Some(filter) = related.configured_filter() {
            let criteria = parse_filter_criteria(filter)?;
            if !self
                .child_satisfies_filter(event, criteria, diagnostics)
                .await
            {
                diagnostics.debug(format!(
                    "'{}' record '{}' does not satisfy '{filter}'",
                    event.entity_logical_name(),
                    event.target().record_id()
                ));
                return Ok(None);
            }
        }

        let values = self
            .resolve_all(&parent, None, related, diagnostics)
            .await;
        Ok(Some(values))
    }
}
