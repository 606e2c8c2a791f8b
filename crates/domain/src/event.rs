use cascade_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Kind of record operation that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    /// Record was created.
    Create,
    /// Record was updated.
    Update,
}

impl ChangeOperation {
    /// Returns stable transport value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

/// Point in the host's persistence pipeline where the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Before validation of the host write.
    PreValidation,
    /// Inside the host write, before commit.
    PreOperation,
    /// After the host write has been persisted.
    PostOperation,
}

impl ExecutionPhase {
    /// Returns whether values can still be folded into the event's own write.
    #[must_use]
    pub fn is_pre_commit(&self) -> bool {
        matches!(self, Self::PreValidation | Self::PreOperation)
    }
}

/// One record change handed to the engine by its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChangeEventDocument")]
pub struct ChangeEvent {
    operation: ChangeOperation,
    target: Record,
    pre_image: Option<Record>,
}

#[derive(Deserialize)]
struct ChangeEventDocument {
    operation: ChangeOperation,
    target: Record,
    #[serde(default)]
    pre_image: Option<Record>,
}

impl TryFrom<ChangeEventDocument> for ChangeEvent {
    type Error = AppError;

    fn try_from(document: ChangeEventDocument) -> Result<Self, Self::Error> {
        match document.operation {
            ChangeOperation::Create if document.pre_image.is_some() => {
                Err(AppError::Validation(format!(
                    "create event for record '{}' must not carry a pre-image",
                    document.target.record_id()
                )))
            }
            ChangeOperation::Create => Ok(Self::create(document.target)),
            ChangeOperation::Update => Self::update(document.target, document.pre_image),
        }
    }
}

impl ChangeEvent {
    /// Creates an event for a freshly created record.
    #[must_use]
    pub fn create(target: Record) -> Self {
        Self {
            operation: ChangeOperation::Create,
            target,
            pre_image: None,
        }
    }

    /// Creates an event for an updated record with its optional pre-change snapshot.
    pub fn update(target: Record, pre_image: Option<Record>) -> AppResult<Self> {
        if let Some(pre_image) = &pre_image
            && (pre_image.record_id() != target.record_id()
                || pre_image.entity_logical_name() != target.entity_logical_name())
        {
            return Err(AppError::Validation(format!(
                "pre-image of record '{}' does not describe the same record",
                target.record_id()
            )));
        }

        Ok(Self {
            operation: ChangeOperation::Update,
            target,
            pre_image,
        })
    }

    /// Returns the changed entity logical name.
    #[must_use]
    pub fn entity_logical_name(&self) -> &str {
        self.target.entity_logical_name().as_str()
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn operation(&self) -> ChangeOperation {
        self.operation
    }

    /// Returns the post-change snapshot.
    #[must_use]
    pub fn target(&self) -> &Record {
        &self.target
    }

    /// Returns the post-change snapshot for pre-commit value folding.
    pub fn target_mut(&mut self) -> &mut Record {
        &mut self.target
    }

    /// Returns the pre-change snapshot, present for updates only.
    #[must_use]
    pub fn pre_image(&self) -> Option<&Record> {
        self.pre_image.as_ref()
    }
}
