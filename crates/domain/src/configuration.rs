use std::collections::BTreeSet;

use cascade_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// How a related entity configuration identifies the child-to-parent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipMode {
    /// Link expressed by a named relationship.
    ByNamedRelationship,
    /// Link expressed by a lookup field on the child entity.
    ByLookupField,
}

impl RelationshipMode {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ByNamedRelationship => "by_named_relationship",
            Self::ByLookupField => "by_lookup_field",
        }
    }
}

/// One value propagation rule from a parent field to a child field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Source field on the parent entity.
    pub source_field: String,
    /// Target field on the child entity.
    pub target_field: String,
    /// Whether a change of the source field activates the cascade.
    #[serde(default)]
    pub is_trigger_field: bool,
}

impl FieldMapping {
    /// Creates a mapping between a parent field and a child field.
    #[must_use]
    pub fn new(
        source_field: impl Into<String>,
        target_field: impl Into<String>,
        is_trigger_field: bool,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            is_trigger_field,
        }
    }
}

/// Cascade rules for one child entity of the configured parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntityConfig {
    /// Child entity logical name.
    pub entity_logical_name: String,
    /// Relationship selection mode.
    pub link_mode: RelationshipMode,
    /// Relationship name used by `ByNamedRelationship`.
    #[serde(default)]
    pub relationship_name: Option<String>,
    /// Lookup field on the child entity pointing at the parent.
    #[serde(default)]
    pub lookup_field_name: Option<String>,
    /// Optional `field|operator|value;...` filter scoping affected children.
    #[serde(default)]
    pub filter_criteria: Option<String>,
    /// Ordered field mappings.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

impl RelatedEntityConfig {
    /// Returns source fields marked as triggers.
    #[must_use]
    pub fn trigger_fields(&self) -> BTreeSet<&str> {
        self.field_mappings
            .iter()
            .filter(|mapping| mapping.is_trigger_field)
            .map(|mapping| mapping.source_field.as_str())
            .collect()
    }

    /// Returns every distinct source field read by the mappings, in mapping order.
    #[must_use]
    pub fn source_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::with_capacity(self.field_mappings.len());
        for mapping in &self.field_mappings {
            if !fields.contains(&mapping.source_field) {
                fields.push(mapping.source_field.clone());
            }
        }
        fields
    }

    /// Returns the configured lookup field when it is not blank.
    #[must_use]
    pub fn configured_lookup_field(&self) -> Option<&str> {
        non_blank(self.lookup_field_name.as_deref())
    }

    /// Returns the configured relationship name when it is not blank.
    #[must_use]
    pub fn configured_relationship_name(&self) -> Option<&str> {
        non_blank(self.relationship_name.as_deref())
    }

    /// Returns the filter criteria when it is not blank.
    #[must_use]
    pub fn configured_filter(&self) -> Option<&str> {
        non_blank(self.filter_criteria.as_deref())
    }

    fn validate(&self, index: usize) -> AppResult<()> {
        if self.entity_logical_name.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "related entity #{} is missing its entity logical name",
                index + 1
            )));
        }

        let entity = self.entity_logical_name.as_str();
        match self.link_mode {
            RelationshipMode::ByNamedRelationship => {
                if self.configured_relationship_name().is_none() {
                    return Err(AppError::Configuration(format!(
                        "related entity '{entity}' uses a named relationship but relationship_name is empty"
                    )));
                }
            }
            RelationshipMode::ByLookupField => {
                if self.configured_lookup_field().is_none() {
                    return Err(AppError::Configuration(format!(
                        "related entity '{entity}' uses a lookup field but lookup_field_name is empty"
                    )));
                }
            }
        }

        if self.field_mappings.is_empty() {
            return Err(AppError::Configuration(format!(
                "related entity '{entity}' has no field mappings"
            )));
        }

        for (position, mapping) in self.field_mappings.iter().enumerate() {
            if mapping.source_field.trim().is_empty() || mapping.target_field.trim().is_empty() {
                return Err(AppError::Configuration(format!(
                    "field mapping #{} of related entity '{entity}' needs both source and target field names",
                    position + 1
                )));
            }
        }

        Ok(())
    }
}

/// Declarative parent-to-children cascade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeConfiguration {
    /// Stable configuration identifier.
    pub id: String,
    /// Human-friendly configuration name.
    pub name: String,
    /// Parent entity logical name.
    pub parent_entity: String,
    /// Whether the configuration participates in cascading.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Whether debug diagnostics are emitted.
    #[serde(default)]
    pub enable_tracing: bool,
    /// Ordered related entity configurations.
    #[serde(default)]
    pub related_entities: Vec<RelatedEntityConfig>,
}

impl CascadeConfiguration {
    /// Validates structural completeness, failing on the first violation.
    pub fn validate(&self) -> AppResult<()> {
        if self.parent_entity.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "configuration '{}' is missing its parent entity",
                self.display_label()
            )));
        }

        if self.is_active && self.related_entities.is_empty() {
            return Err(AppError::Configuration(format!(
                "configuration '{}' has no related entities",
                self.display_label()
            )));
        }

        for (index, related) in self.related_entities.iter().enumerate() {
            related.validate(index).map_err(|error| match error {
                AppError::Configuration(message) => AppError::Configuration(format!(
                    "configuration '{}': {message}",
                    self.display_label()
                )),
                other => other,
            })?;
        }

        Ok(())
    }

    /// Returns related configurations whose child entity matches.
    pub fn related_for_child<'a>(
        &'a self,
        entity_logical_name: &'a str,
    ) -> impl Iterator<Item = &'a RelatedEntityConfig> + 'a {
        self.related_entities
            .iter()
            .filter(move |related| related.entity_logical_name == entity_logical_name)
    }

    /// Returns the name used in diagnostics.
    #[must_use]
    pub fn display_label(&self) -> &str {
        if self.name.trim().is_empty() {
            self.id.as_str()
        } else {
            self.name.as_str()
        }
    }
}

fn default_true() -> bool {
    true
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
