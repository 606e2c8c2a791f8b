use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use cascade_core::{AppError, AppResult, NonEmptyString};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a random record identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid record id '{value}': {error}")))
    }
}

/// Reference from one record to another record of a given entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordReference {
    entity_logical_name: NonEmptyString,
    record_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

impl RecordReference {
    /// Creates a reference to one record.
    pub fn new(entity_logical_name: impl Into<String>, record_id: RecordId) -> AppResult<Self> {
        Ok(Self {
            entity_logical_name: NonEmptyString::new(entity_logical_name)?,
            record_id,
            display_name: None,
        })
    }

    /// Attaches the referenced record's display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Returns the referenced entity logical name.
    #[must_use]
    pub fn entity_logical_name(&self) -> &NonEmptyString {
        &self.entity_logical_name
    }

    /// Returns the referenced record identifier.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Returns the display name when the host supplied one.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    /// Returns whether both references point at the same record.
    ///
    /// Display names are ignored: only target identity and target entity count.
    #[must_use]
    pub fn refers_to_same(&self, other: &Self) -> bool {
        self.record_id == other.record_id && self.entity_logical_name == other.entity_logical_name
    }
}

/// Typed field value carried by records and value sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Explicitly cleared value.
    Null,
    /// UTF-8 text.
    Text(String),
    /// Whole number.
    Integer(i64),
    /// Decimal or floating-point number.
    Decimal(f64),
    /// Monetary amount.
    Money(f64),
    /// Two-option value.
    Boolean(bool),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Unique identifier value.
    Identifier(Uuid),
    /// Reference to another record.
    Reference(RecordReference),
    /// Enumeration (option set) code.
    Choice(i32),
}

impl FieldValue {
    /// Returns whether the value is an explicit null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the record reference carried by this value.
    #[must_use]
    pub fn as_reference(&self) -> Option<&RecordReference> {
        match self {
            Self::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Compares two values with type-aware equality.
    ///
    /// References compare target identity plus target entity, choices compare
    /// codes, money compares amounts and everything else uses value equality.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Reference(left), Self::Reference(right)) => left.refers_to_same(right),
            (Self::Choice(left), Self::Choice(right)) => left == right,
            (Self::Money(left), Self::Money(right)) => left == right,
            _ => self == other,
        }
    }

    /// Returns the natural text representation of the value.
    #[must_use]
    pub fn to_natural_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(value) => value.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Decimal(value) | Self::Money(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
            Self::DateTime(value) => value.to_rfc3339(),
            Self::Identifier(value) => value.to_string(),
            Self::Reference(reference) => reference.record_id().to_string(),
            Self::Choice(code) => code.to_string(),
        }
    }

    /// Returns a stable type name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Money(_) => "money",
            Self::Boolean(_) => "boolean",
            Self::DateTime(_) => "date_time",
            Self::Identifier(_) => "identifier",
            Self::Reference(_) => "reference",
            Self::Choice(_) => "choice",
        }
    }
}

/// Resolved target-field values for one write, keyed by target field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSet(BTreeMap<String, FieldValue>);

impl ValueSet {
    /// Creates an empty value set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one target field value, returning the replaced value.
    pub fn insert(
        &mut self,
        target_field: impl Into<String>,
        value: FieldValue,
    ) -> Option<FieldValue> {
        self.0.insert(target_field.into(), value)
    }

    /// Returns one target field value.
    #[must_use]
    pub fn get(&self, target_field: &str) -> Option<&FieldValue> {
        self.0.get(target_field)
    }

    /// Returns the number of target fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether no target field was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates target fields and values in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

impl IntoIterator for ValueSet {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, FieldValue)> for ValueSet {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Snapshot of one record: identifier, entity and typed field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    record_id: RecordId,
    entity_logical_name: NonEmptyString,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    formatted_values: BTreeMap<String, String>,
}

impl Record {
    /// Creates an empty record snapshot.
    pub fn new(record_id: RecordId, entity_logical_name: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            record_id,
            entity_logical_name: NonEmptyString::new(entity_logical_name)?,
            fields: BTreeMap::new(),
            formatted_values: BTreeMap::new(),
        })
    }

    /// Adds one field value.
    #[must_use]
    pub fn with_field(mut self, field_logical_name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(field_logical_name.into(), value);
        self
    }

    /// Adds one host-formatted display label.
    #[must_use]
    pub fn with_formatted_value(
        mut self,
        field_logical_name: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.formatted_values
            .insert(field_logical_name.into(), label.into());
        self
    }

    /// Returns the record identifier.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Returns the entity logical name.
    #[must_use]
    pub fn entity_logical_name(&self) -> &NonEmptyString {
        &self.entity_logical_name
    }

    /// Returns one field value when the field is present in the snapshot.
    #[must_use]
    pub fn field(&self, field_logical_name: &str) -> Option<&FieldValue> {
        self.fields.get(field_logical_name)
    }

    /// Returns whether the snapshot carries the field (including explicit nulls).
    #[must_use]
    pub fn contains_field(&self, field_logical_name: &str) -> bool {
        self.fields.contains_key(field_logical_name)
    }

    /// Returns all field values.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Returns all host-formatted labels.
    #[must_use]
    pub fn formatted_values(&self) -> &BTreeMap<String, String> {
        &self.formatted_values
    }

    /// Returns the host-formatted label for one field.
    #[must_use]
    pub fn formatted_value(&self, field_logical_name: &str) -> Option<&str> {
        self.formatted_values
            .get(field_logical_name)
            .map(String::as_str)
            .filter(|label| !label.trim().is_empty())
    }

    /// Sets one field value in place.
    pub fn set_field(&mut self, field_logical_name: impl Into<String>, value: FieldValue) {
        self.fields.insert(field_logical_name.into(), value);
    }

    /// Merges field values into the snapshot, overwriting existing values.
    pub fn merge_fields<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        self.fields.extend(values);
    }

    /// Returns a copy restricted to the requested columns.
    ///
    /// The identifier is always kept; an empty column list keeps no fields.
    #[must_use]
    pub fn project(&self, columns: &[String]) -> Self {
        let keep = |name: &String| columns.iter().any(|column| column == name);
        Self {
            record_id: self.record_id,
            entity_logical_name: self.entity_logical_name.clone(),
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            formatted_values: self
                .formatted_values
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, label)| (name.clone(), label.clone()))
                .collect(),
        }
    }
}
