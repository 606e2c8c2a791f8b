//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod configuration;
mod event;
mod filter;
mod metadata;
mod record;

pub use configuration::{CascadeConfiguration, FieldMapping, RelatedEntityConfig, RelationshipMode};
pub use event::{ChangeEvent, ChangeOperation, ExecutionPhase};
pub use filter::{
    FilterCriterion, FilterOperator, FilterValue, parse_filter_criteria, validate_field_name,
};
pub use metadata::{FieldMetadata, FieldType};
pub use record::{FieldValue, Record, RecordId, RecordReference, ValueSet};
