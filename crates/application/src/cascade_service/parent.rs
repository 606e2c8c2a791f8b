use super::*;

const PARENT_OPERATION: &str = "on_parent_changed";

/// Result of processing one related configuration for a parent change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedCascadeStatus {
    /// No trigger field changed.
    NotTriggered,
    /// Values were applied to the located children.
    Completed(BatchUpdateResult),
    /// The cascade path aborted with a recoverable error.
    Failed(String),
}

/// Per related configuration entry of a cascade summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedCascadeOutcome {
    /// Child entity logical name of the related configuration.
    pub entity_logical_name: String,
    /// Processing result.
    pub status: RelatedCascadeStatus,
}

/// Aggregated outcome of one parent change across related configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeSummary {
    /// Evaluated configuration identifier.
    pub configuration_id: String,
    /// Evaluated configuration name.
    pub configuration_name: String,
    /// Outcomes in configuration order.
    pub outcomes: Vec<RelatedCascadeOutcome>,
}

impl CascadeSummary {
    fn empty(configuration: &CascadeConfiguration) -> Self {
        Self {
            configuration_id: configuration.id.clone(),
            configuration_name: configuration.name.clone(),
            outcomes: Vec::new(),
        }
    }

    /// Returns whether any related configuration was triggered.
    #[must_use]
    pub fn any_triggered(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status != RelatedCascadeStatus::NotTriggered)
    }

    /// Returns the number of children updated across related configurations.
    #[must_use]
    pub fn total_success_count(&self) -> usize {
        self.completed().map(|result| result.success_count).sum()
    }

    /// Returns the number of children whose update failed.
    #[must_use]
    pub fn total_error_count(&self) -> usize {
        self.completed().map(|result| result.error_count).sum()
    }

    /// Returns the number of related configurations that aborted.
    #[must_use]
    pub fn failed_path_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, RelatedCascadeStatus::Failed(_)))
            .count()
    }

    fn completed(&self) -> impl Iterator<Item = &BatchUpdateResult> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.status {
            RelatedCascadeStatus::Completed(result) => Some(result),
            _ => None,
        })
    }
}

impl CascadeService {
    /// Propagates a parent change to the children of every triggered related configuration.
    ///
    /// Fails before any store access when the configuration is invalid.
    /// Recoverable failures of one related configuration are recorded and
    /// processing moves on; unclassified failures are re-raised.
    pub async fn on_parent_changed(
        &self,
        event: &ChangeEvent,
        configuration: &CascadeConfiguration,
    ) -> AppResult<CascadeSummary> {
        configuration.validate()?;

        let diagnostics = self.diagnostics_for(configuration);
        diagnostics.begin(PARENT_OPERATION);
        let result = self
            .cascade_parent_change(event, configuration, &diagnostics)
            .await;
        diagnostics.end(PARENT_OPERATION);
        result
    }

    /// Processes one related configuration for a parent change.
    pub async fn cascade_related_entity(
        &self,
        event: &ChangeEvent,
        configuration: &CascadeConfiguration,
        related: &RelatedEntityConfig,
        diagnostics: &Diagnostics,
    ) -> AppResult<RelatedCascadeStatus> {
        if !should_cascade(related, event.target(), event.pre_image()) {
            diagnostics.debug(format!(
                "no trigger field changed for related '{}'",
                related.entity_logical_name
            ));
            return Ok(RelatedCascadeStatus::NotTriggered);
        }

        let values = self
            .resolve_all(event.target(), event.pre_image(), related, diagnostics)
            .await;
        if values.is_empty() {
            diagnostics.info(format!(
                "no mapped values available for related '{}'",
                related.entity_logical_name
            ));
            return Ok(RelatedCascadeStatus::Completed(BatchUpdateResult::default()));
        }

        let children = self
            .find_children(
                event.target().record_id(),
                related,
                configuration.parent_entity.as_str(),
                diagnostics,
            )
            .await?;
        if children.is_empty() {
            diagnostics.info(format!(
                "no '{}' records linked to '{}'",
                related.entity_logical_name,
                event.target().record_id()
            ));
            return Ok(RelatedCascadeStatus::Completed(BatchUpdateResult::default()));
        }

        let result = self
            .apply_updates(
                related.entity_logical_name.as_str(),
                children.as_slice(),
                &values,
                diagnostics,
            )
            .await;
        Ok(RelatedCascadeStatus::Completed(result))
    }

    async fn cascade_parent_change(
        &self,
        event: &ChangeEvent,
        configuration: &CascadeConfiguration,
        diagnostics: &Diagnostics,
    ) -> AppResult<CascadeSummary> {
        let mut summary = CascadeSummary::empty(configuration);

        if !configuration.is_active {
            diagnostics.info(format!(
                "configuration '{}' is inactive, skipping",
                configuration.display_label()
            ));
            return Ok(summary);
        }

        if event.entity_logical_name() != configuration.parent_entity {
            diagnostics.debug(format!(
                "event entity '{}' is not parent entity '{}'",
                event.entity_logical_name(),
                configuration.parent_entity
            ));
            return Ok(summary);
        }

        for related in &configuration.related_entities {
            let status = match self
                .cascade_related_entity(event, configuration, related, diagnostics)
                .await
            {
                Ok(status) => status,
                Err(error) if error.is_unclassified() => {
                    diagnostics.error(format!(
                        "cascade to '{}' failed unexpectedly: {error:?}",
                        related.entity_logical_name
                    ));
                    return Err(error);
                }
                Err(error) => {
                    diagnostics.warning(format!(
                        "cascade to '{}' aborted: {error}",
                        related.entity_logical_name
                    ));
                    RelatedCascadeStatus::Failed(error.to_string())
                }
            };

            summary.outcomes.push(RelatedCascadeOutcome {
                entity_logical_name: related.entity_logical_name.clone(),
                status,
            });
        }

        if summary.any_triggered() {
            diagnostics.info(format!(
                "configuration '{}': {} children updated, {} failed, {} paths aborted",
                configuration.display_label(),
                summary.total_success_count(),
                summary.total_error_count(),
                summary.failed_path_count()
            ));
        } else {
            diagnostics.info(format!(
                "configuration '{}': no related configuration triggered",
                configuration.display_label()
            ));
        }

        Ok(summary)
    }
}
