use super::*;

const ELLIPSIS: char = '\u{2026}';

/// Truncates text above `max_length` characters to `max_length - 1` characters plus `…`.
///
/// Returns `None` when the text already fits.
#[must_use]
pub fn truncate_text(text: &str, max_length: usize) -> Option<String> {
    if text.chars().count() <= max_length {
        return None;
    }

    if max_length == 0 {
        return Some(String::new());
    }

    let mut truncated: String = text.chars().take(max_length - 1).collect();
    truncated.push(ELLIPSIS);
    Some(truncated)
}

impl CascadeService {
    /// Resolves one mapped value from a source record, coerced for the target field.
    pub async fn resolve_value(
        &self,
        source: &Record,
        mapping: &FieldMapping,
        target_entity_logical_name: &str,
        diagnostics: &Diagnostics,
    ) -> Option<FieldValue> {
        let value = source.field(mapping.source_field.as_str())?;
        let metadata = self
            .target_field_metadata(
                target_entity_logical_name,
                mapping.target_field.as_str(),
                diagnostics,
            )
            .await;

        let Some(max_length) = metadata.as_ref().and_then(FieldMetadata::bounded_text_length)
        else {
            return Some(value.clone());
        };

        if value.is_null() {
            return Some(FieldValue::Null);
        }

        let text = text_for_bounded_target(source, mapping.source_field.as_str(), value);
        match truncate_text(text.as_str(), max_length) {
            Some(truncated) => {
                diagnostics.warning(format!(
                    "value for '{}.{}' exceeded {max_length} characters and was truncated",
                    target_entity_logical_name, mapping.target_field
                ));
                Some(FieldValue::Text(truncated))
            }
            None => Some(FieldValue::Text(text)),
        }
    }

    /// Resolves every mapping of one related configuration into a value set.
    ///
    /// Post-change values win; the pre-change snapshot only fills fields the
    /// post-change snapshot does not carry.
    pub async fn resolve_all(
        &self,
        post: &Record,
        pre: Option<&Record>,
        related: &RelatedEntityConfig,
        diagnostics: &Diagnostics,
    ) -> ValueSet {
        let mut values = ValueSet::new();

        for mapping in &related.field_mappings {
            let source_field = mapping.source_field.as_str();
            let source = if post.contains_field(source_field) {
                post
            } else if let Some(pre) = pre.filter(|pre| pre.contains_field(source_field)) {
                pre
            } else {
                diagnostics.debug(format!(
                    "source field '{source_field}' is absent from the event, skipping mapping to '{}'",
                    mapping.target_field
                ));
                continue;
            };

            if let Some(value) = self
                .resolve_value(
                    source,
                    mapping,
                    related.entity_logical_name.as_str(),
                    diagnostics,
                )
                .await
            {
                diagnostics.debug(format!(
                    "mapped '{source_field}' to '{}.{}' as {}",
                    related.entity_logical_name,
                    mapping.target_field,
                    value.type_name()
                ));
                values.insert(mapping.target_field.clone(), value);
            }
        }

        values
    }
}

fn text_for_bounded_target(source: &Record, source_field: &str, value: &FieldValue) -> String {
    match value {
        FieldValue::Reference(reference) => reference
            .display_name()
            .or_else(|| source.formatted_value(source_field))
            .map(str::to_owned)
            .unwrap_or_else(|| reference.record_id().to_string()),
        FieldValue::Choice(code) => source
            .formatted_value(source_field)
            .map(str::to_owned)
            .unwrap_or_else(|| code.to_string()),
        other => other.to_natural_text(),
    }
}
