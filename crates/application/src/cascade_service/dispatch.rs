use super::*;

/// Everything one change event caused across the loaded configurations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Parent cascade summaries, one per configuration whose parent entity changed.
    pub parent_summaries: Vec<CascadeSummary>,
    /// Attach outcomes keyed by configuration identifier.
    pub attach_outcomes: Vec<(String, AttachOutcome)>,
}

impl DispatchReport {
    /// Returns whether no configuration reacted to the event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parent_summaries.is_empty() && self.attach_outcomes.is_empty()
    }
}

impl CascadeService {
    /// Routes one change event to every active configuration it concerns.
    ///
    /// Parent cascades run for post-operation updates of a parent entity.
    /// Attach handling runs for any event on a configured child entity.
    pub async fn handle_event(
        &self,
        event: &mut ChangeEvent,
        phase: ExecutionPhase,
    ) -> AppResult<DispatchReport> {
        let configuration_source = self.configuration_source.as_ref().ok_or_else(|| {
            AppError::Configuration("no cascade configuration source is registered".to_owned())
        })?;

        let configurations = configuration_source.list_configurations().await?;
        let mut report = DispatchReport::default();

        for configuration in &configurations {
            if !configuration.is_active {
                self.diagnostics_for(configuration).info(format!(
                    "configuration '{}' is inactive, skipping",
                    configuration.display_label()
                ));
                continue;
            }

            if event.entity_logical_name() == configuration.parent_entity
                && event.operation() == ChangeOperation::Update
                && phase == ExecutionPhase::PostOperation
            {
                let summary = self.on_parent_changed(event, configuration).await?;
                report.parent_summaries.push(summary);
            }

            if configuration
                .related_for_child(event.entity_logical_name())
                .next()
                .is_some()
            {
                let outcome = self.on_child_attached(event, configuration, phase).await?;
                report
                    .attach_outcomes
                    .push((configuration.id.clone(), outcome));
            }
        }

        Ok(report)
    }
}
