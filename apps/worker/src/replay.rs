use std::path::Path;

use cascade_application::{AttachApplication, CascadeService, DispatchReport};
use cascade_core::{AppError, AppResult};
use cascade_domain::{ChangeEvent, ExecutionPhase};
use serde::Deserialize;
use tracing::{info, warn};

/// One recorded change event and the pipeline phase it is replayed in.
#[derive(Debug, Deserialize)]
pub struct ReplayedEvent {
    #[serde(default = "default_phase")]
    pub phase: ExecutionPhase,
    pub event: ChangeEvent,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayTotals {
    pub events: usize,
    pub failed_events: usize,
    pub updated_children: usize,
    pub failed_children: usize,
    pub attached_children: usize,
}

fn default_phase() -> ExecutionPhase {
    ExecutionPhase::PostOperation
}

pub fn parse_events(document: &str) -> AppResult<Vec<ReplayedEvent>> {
    serde_json::from_str(document)
        .map_err(|error| AppError::Validation(format!("invalid change event document: {error}")))
}

pub async fn load_events(path: &Path) -> AppResult<Vec<ReplayedEvent>> {
    let document = tokio::fs::read_to_string(path).await.map_err(|error| {
        AppError::Internal(format!(
            "failed to read change events '{}': {error}",
            path.display()
        ))
    })?;

    parse_events(document.as_str())
}

pub async fn replay_events(service: &CascadeService, events: Vec<ReplayedEvent>) -> ReplayTotals {
    let mut totals = ReplayTotals::default();

    for (index, replayed) in events.into_iter().enumerate() {
        let ReplayedEvent { phase, mut event } = replayed;
        totals.events += 1;

        match service.handle_event(&mut event, phase).await {
            Ok(report) => {
                record_report(&mut totals, &report);
                info!(
                    event_index = index,
                    entity = %event.entity_logical_name(),
                    record_id = %event.target().record_id(),
                    operation = event.operation().as_str(),
                    parent_cascades = report.parent_summaries.len(),
                    attach_outcomes = report.attach_outcomes.len(),
                    "change event processed"
                );
            }
            Err(error) => {
                totals.failed_events += 1;
                warn!(
                    event_index = index,
                    entity = %event.entity_logical_name(),
                    record_id = %event.target().record_id(),
                    error = %error,
                    "change event failed"
                );
            }
        }
    }

    totals
}

fn record_report(totals: &mut ReplayTotals, report: &DispatchReport) {
    for summary in &report.parent_summaries {
        totals.updated_children += summary.total_success_count();
        totals.failed_children += summary.total_error_count();
    }

    totals.attached_children += report
        .attach_outcomes
        .iter()
        .filter(|(_, outcome)| {
            matches!(
                outcome.application,
                AttachApplication::FoldedIntoEvent | AttachApplication::Written
            )
        })
        .count();
}
