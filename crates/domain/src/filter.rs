//! Compact `field|operator|value;...` filter language used to scope child records.
//!
//! Segments are AND-combined; there is no OR or grouping support.

use std::cmp::Ordering;
use std::str::FromStr;

use cascade_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::FieldValue;

const SEGMENT_SEPARATOR: char = ';';
const PART_SEPARATOR: char = '|';
const LIST_SEPARATOR: char = ',';

/// Comparison operator of one filter criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equality comparison.
    Eq,
    /// Inequality comparison.
    Ne,
    /// Greater-than comparison.
    Gt,
    /// Less-than comparison.
    Lt,
    /// Membership in a value list.
    In,
    /// Exclusion from a value list.
    NotIn,
    /// Field has no value.
    Null,
    /// Field has a value.
    NotNull,
    /// Text pattern match with `%` and `_` wildcards.
    Like,
}

impl FilterOperator {
    /// Returns the filter-language token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::In => "in",
            Self::NotIn => "notin",
            Self::Null => "null",
            Self::NotNull => "notnull",
            Self::Like => "like",
        }
    }

    /// Returns whether the operator takes a comparison value.
    #[must_use]
    pub fn requires_value(&self) -> bool {
        !matches!(self, Self::Null | Self::NotNull)
    }

    /// Returns whether the operator compares against a value list.
    #[must_use]
    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl FromStr for FilterOperator {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "in" => Ok(Self::In),
            "notin" => Ok(Self::NotIn),
            "null" => Ok(Self::Null),
            "notnull" => Ok(Self::NotNull),
            "like" => Ok(Self::Like),
            _ => Err(AppError::FilterFormat(format!(
                "unknown filter operator '{}'",
                value.trim()
            ))),
        }
    }
}

/// Parsed comparison value of one filter criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    /// Literal `null`.
    Null,
    /// Literal `true` or `false`.
    Boolean(bool),
    /// Integer literal.
    Integer(i64),
    /// Unique identifier literal.
    Identifier(Uuid),
    /// Any other text.
    Text(String),
    /// Comma-separated values for `in` and `notin`.
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Parses one scalar literal: `null`, booleans, integers, identifiers, then text.
    #[must_use]
    pub fn parse_scalar(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Boolean(false);
        }
        if let Ok(number) = trimmed.parse::<i64>() {
            return Self::Integer(number);
        }
        if let Ok(identifier) = Uuid::parse_str(trimmed) {
            return Self::Identifier(identifier);
        }

        Self::Text(trimmed.to_owned())
    }

    fn parse_list(raw: &str) -> Self {
        Self::List(
            raw.split(LIST_SEPARATOR)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Self::parse_scalar)
                .collect(),
        )
    }

    /// Renders the value in filter-language syntax.
    #[must_use]
    pub fn to_filter_text(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Boolean(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Identifier(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::List(values) => values
                .iter()
                .map(Self::to_filter_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// One parsed `field|operator|value` condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriterion {
    field_logical_name: String,
    operator: FilterOperator,
    value: Option<FilterValue>,
}

impl FilterCriterion {
    /// Creates a validated criterion.
    ///
    /// `null`/`notnull` take no value; every other operator requires one.
    pub fn new(
        field_logical_name: impl Into<String>,
        operator: FilterOperator,
        value: Option<FilterValue>,
    ) -> AppResult<Self> {
        let field_logical_name = field_logical_name.into();
        validate_field_name(field_logical_name.as_str())?;

        let value = if operator.requires_value() {
            let Some(value) = value else {
                return Err(AppError::FilterFormat(format!(
                    "filter operator '{}' on field '{}' requires a value",
                    operator.as_str(),
                    field_logical_name
                )));
            };

            match (operator.takes_list(), value) {
                (true, FilterValue::List(values)) => Some(FilterValue::List(values)),
                (true, scalar) => Some(FilterValue::List(vec![scalar])),
                (false, FilterValue::List(_)) => {
                    return Err(AppError::FilterFormat(format!(
                        "filter operator '{}' does not accept a value list",
                        operator.as_str()
                    )));
                }
                (false, scalar) => Some(scalar),
            }
        } else if value.is_some() {
            return Err(AppError::FilterFormat(format!(
                "filter operator '{}' on field '{}' does not take a value",
                operator.as_str(),
                field_logical_name
            )));
        } else {
            None
        };

        Ok(Self {
            field_logical_name,
            operator,
            value,
        })
    }

    /// Creates an equality criterion.
    pub fn equals(field_logical_name: impl Into<String>, value: FilterValue) -> AppResult<Self> {
        Self::new(field_logical_name, FilterOperator::Eq, Some(value))
    }

    /// Returns the compared field logical name.
    #[must_use]
    pub fn field_logical_name(&self) -> &str {
        self.field_logical_name.as_str()
    }

    /// Returns the operator.
    #[must_use]
    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    /// Returns the comparison value.
    #[must_use]
    pub fn value(&self) -> Option<&FilterValue> {
        self.value.as_ref()
    }

    /// Renders the criterion as one filter-language segment.
    #[must_use]
    pub fn to_filter_string(&self) -> String {
        format!(
            "{}{PART_SEPARATOR}{}{PART_SEPARATOR}{}",
            self.field_logical_name,
            self.operator.as_str(),
            self.value
                .as_ref()
                .map(FilterValue::to_filter_text)
                .unwrap_or_default()
        )
    }

    /// Evaluates the criterion against one field value; `None` means the field is absent.
    #[must_use]
    pub fn matches(&self, field_value: Option<&FieldValue>) -> bool {
        let field_value = field_value.filter(|value| !value.is_null());

        match (self.operator, self.value.as_ref()) {
            (FilterOperator::Null, _) => field_value.is_none(),
            (FilterOperator::NotNull, _) => field_value.is_some(),
            (FilterOperator::Eq, Some(FilterValue::Null)) => field_value.is_none(),
            (FilterOperator::Ne, Some(FilterValue::Null)) => field_value.is_some(),
            (_, None) => false,
            (operator, Some(expected)) => {
                let Some(actual) = field_value else {
                    return false;
                };

                match operator {
                    FilterOperator::Eq => scalar_equals(actual, expected),
                    FilterOperator::Ne => !scalar_equals(actual, expected),
                    FilterOperator::Gt => {
                        scalar_compare(actual, expected) == Some(Ordering::Greater)
                    }
                    FilterOperator::Lt => scalar_compare(actual, expected) == Some(Ordering::Less),
                    FilterOperator::In => list_items(expected)
                        .iter()
                        .any(|item| scalar_equals(actual, item)),
                    FilterOperator::NotIn => !list_items(expected)
                        .iter()
                        .any(|item| scalar_equals(actual, item)),
                    FilterOperator::Like => like_matches(
                        actual.to_natural_text().as_str(),
                        expected.to_filter_text().as_str(),
                    ),
                    FilterOperator::Null | FilterOperator::NotNull => false,
                }
            }
        }
    }
}

/// Parses a filter string into AND-combined criteria.
///
/// Blank input yields no criteria; blank segments are ignored.
pub fn parse_filter_criteria(filter: &str) -> AppResult<Vec<FilterCriterion>> {
    filter
        .split(SEGMENT_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_segment)
        .collect()
}

fn parse_segment(segment: &str) -> AppResult<FilterCriterion> {
    let parts: Vec<&str> = segment.split(PART_SEPARATOR).collect();

    let (field, operator, raw_value) = match parts.as_slice() {
        [field, operator, value] => (*field, operator.parse::<FilterOperator>()?, Some(*value)),
        [field, operator] => {
            let operator = operator.parse::<FilterOperator>()?;
            if operator.requires_value() {
                return Err(AppError::FilterFormat(format!(
                    "filter segment '{segment}' must have the form field|operator|value"
                )));
            }
            (*field, operator, None)
        }
        _ => {
            return Err(AppError::FilterFormat(format!(
                "filter segment '{segment}' must have the form field|operator|value"
            )));
        }
    };

    // `null`/`notnull` may still carry an empty trailing value.
    let raw_value = raw_value.filter(|raw| operator.requires_value() || !raw.trim().is_empty());
    let value = raw_value.map(|raw| {
        if operator.takes_list() {
            FilterValue::parse_list(raw)
        } else {
            FilterValue::parse_scalar(raw)
        }
    });

    FilterCriterion::new(field.trim(), operator, value)
}

/// Rejects field names that are not plain `[A-Za-z0-9_]+` identifiers.
pub fn validate_field_name(field_logical_name: &str) -> AppResult<()> {
    if field_logical_name.is_empty() {
        return Err(AppError::FilterFormat(
            "filter field name must not be empty".to_owned(),
        ));
    }

    if let Some(invalid) = field_logical_name
        .chars()
        .find(|character| !(character.is_ascii_alphanumeric() || *character == '_'))
    {
        return Err(AppError::FilterFormat(format!(
            "filter field name '{field_logical_name}' contains invalid character '{invalid}'"
        )));
    }

    Ok(())
}

fn list_items(value: &FilterValue) -> &[FilterValue] {
    match value {
        FilterValue::List(items) => items.as_slice(),
        scalar => std::slice::from_ref(scalar),
    }
}

#[derive(Debug, PartialEq)]
enum Scalar {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Identifier(Uuid),
    Text(String),
}

fn field_scalar(value: &FieldValue) -> Option<Scalar> {
    match value {
        FieldValue::Null => None,
        FieldValue::Text(text) => Some(Scalar::Text(text.clone())),
        FieldValue::Integer(number) => Some(Scalar::Integer(*number)),
        FieldValue::Decimal(number) | FieldValue::Money(number) => Some(Scalar::Number(*number)),
        FieldValue::Boolean(flag) => Some(Scalar::Boolean(*flag)),
        FieldValue::DateTime(timestamp) => Some(Scalar::Text(timestamp.to_rfc3339())),
        FieldValue::Identifier(identifier) => Some(Scalar::Identifier(*identifier)),
        FieldValue::Reference(reference) => {
            Some(Scalar::Identifier(reference.record_id().as_uuid()))
        }
        FieldValue::Choice(code) => Some(Scalar::Integer(i64::from(*code))),
    }
}

fn filter_scalar(value: &FilterValue) -> Option<Scalar> {
    match value {
        FilterValue::Null | FilterValue::List(_) => None,
        FilterValue::Boolean(flag) => Some(Scalar::Boolean(*flag)),
        FilterValue::Integer(number) => Some(Scalar::Integer(*number)),
        FilterValue::Identifier(identifier) => Some(Scalar::Identifier(*identifier)),
        FilterValue::Text(text) => Some(Scalar::Text(text.clone())),
    }
}

impl Scalar {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(number) => Some(*number as f64),
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }
}

fn scalar_equals(actual: &FieldValue, expected: &FilterValue) -> bool {
    match (field_scalar(actual), filter_scalar(expected)) {
        (Some(Scalar::Text(left)), Some(Scalar::Text(right))) => {
            left.to_lowercase() == right.to_lowercase()
        }
        (Some(Scalar::Integer(left)), Some(Scalar::Integer(right))) => left == right,
        (Some(left), Some(right)) => match (left.as_number(), right.as_number()) {
            (Some(left), Some(right)) => left == right,
            _ => left == right,
        },
        _ => false,
    }
}

fn scalar_compare(actual: &FieldValue, expected: &FilterValue) -> Option<Ordering> {
    match (field_scalar(actual)?, filter_scalar(expected)?) {
        (Scalar::Integer(left), Scalar::Integer(right)) => Some(left.cmp(&right)),
        (Scalar::Text(left), Scalar::Text(right)) => {
            Some(left.to_lowercase().cmp(&right.to_lowercase()))
        }
        (left, right) => left.as_number()?.partial_cmp(&right.as_number()?),
    }
}

fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // Iterative wildcard match with backtracking on the last `%`.
    let (mut text_index, mut pattern_index) = (0, 0);
    let mut last_wildcard: Option<(usize, usize)> = None;

    while text_index < text.len() {
        match pattern.get(pattern_index) {
            Some('%') => {
                last_wildcard = Some((pattern_index, text_index));
                pattern_index += 1;
            }
            Some('_') => {
                text_index += 1;
                pattern_index += 1;
            }
            Some(character) if *character == text[text_index] => {
                text_index += 1;
                pattern_index += 1;
            }
            _ => match last_wildcard {
                Some((wildcard_index, matched_until)) => {
                    pattern_index = wildcard_index + 1;
                    text_index = matched_until + 1;
                    last_wildcard = Some((wildcard_index, matched_until + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pattern_index..].iter().all(|character| *character == '%')
}
