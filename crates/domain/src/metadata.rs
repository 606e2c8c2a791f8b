use std::str::FromStr;

use cascade_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Supported target field type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text field.
    Text,
    /// Multi-line text field.
    Memo,
    /// Whole number field.
    WholeNumber,
    /// Decimal number field.
    Decimal,
    /// Currency field.
    Money,
    /// Two-option field.
    Boolean,
    /// Date-time field.
    DateTime,
    /// Option set field.
    Choice,
    /// Many-to-one lookup field.
    Lookup,
    /// Unique identifier field.
    UniqueIdentifier,
}

impl FieldType {
    /// Returns a stable storage value for the field type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Memo => "memo",
            Self::WholeNumber => "whole_number",
            Self::Decimal => "decimal",
            Self::Money => "money",
            Self::Boolean => "boolean",
            Self::DateTime => "date_time",
            Self::Choice => "choice",
            Self::Lookup => "lookup",
            Self::UniqueIdentifier => "unique_identifier",
        }
    }

    /// Returns whether the type stores text.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text | Self::Memo)
    }
}

impl FromStr for FieldType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "memo" => Ok(Self::Memo),
            "whole_number" => Ok(Self::WholeNumber),
            "decimal" => Ok(Self::Decimal),
            "money" => Ok(Self::Money),
            "boolean" => Ok(Self::Boolean),
            "date_time" => Ok(Self::DateTime),
            "choice" => Ok(Self::Choice),
            "lookup" => Ok(Self::Lookup),
            "unique_identifier" => Ok(Self::UniqueIdentifier),
            _ => Err(AppError::Validation(format!(
                "unknown field type '{value}'"
            ))),
        }
    }
}

/// Type metadata for one field of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    entity_logical_name: NonEmptyString,
    logical_name: NonEmptyString,
    field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
}

impl FieldMetadata {
    /// Creates validated field metadata.
    pub fn new(
        entity_logical_name: impl Into<String>,
        logical_name: impl Into<String>,
        field_type: FieldType,
        max_length: Option<usize>,
    ) -> AppResult<Self> {
        if max_length.is_some() && !field_type.is_text() {
            return Err(AppError::Validation(format!(
                "max_length is only allowed for text fields, not '{}'",
                field_type.as_str()
            )));
        }

        Ok(Self {
            entity_logical_name: NonEmptyString::new(entity_logical_name)?,
            logical_name: NonEmptyString::new(logical_name)?,
            field_type,
            max_length,
        })
    }

    /// Returns the owning entity logical name.
    #[must_use]
    pub fn entity_logical_name(&self) -> &NonEmptyString {
        &self.entity_logical_name
    }

    /// Returns the field logical name.
    #[must_use]
    pub fn logical_name(&self) -> &NonEmptyString {
        &self.logical_name
    }

    /// Returns the field type.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Returns the maximum text length, if any.
    #[must_use]
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// Returns the length bound when the field is bounded text.
    #[must_use]
    pub fn bounded_text_length(&self) -> Option<usize> {
        if self.field_type.is_text() {
            self.max_length
        } else {
            None
        }
    }
}
