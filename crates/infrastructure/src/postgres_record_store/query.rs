use cascade_domain::{FilterCriterion, FilterOperator, FilterValue};
use sqlx::{Postgres, QueryBuilder};

use super::*;

impl PostgresRecordStore {
    pub(super) async fn query_records_impl(&self, query: RecordQuery) -> AppResult<Vec<Record>> {
        let limit = i64::try_from(query.limit).map_err(|error| {
            AppError::Validation(format!("invalid record query limit: {error}"))
        })?;

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, entity_logical_name, data, formatted_values FROM cascade_records WHERE entity_logical_name = ",
        );
        builder.push_bind(query.entity_logical_name.clone());

        if let Some(record_id) = query.record_id {
            builder.push(" AND id = ");
            builder.push_bind(record_id.as_uuid());
        }

        for criterion in &query.criteria {
            builder.push(" AND ");
            push_criterion(&mut builder, criterion);
        }

        builder.push(" ORDER BY id LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to query records for entity '{}': {error}",
                    query.entity_logical_name
                ))
            })?;

        rows.into_iter()
            .map(|row| record_from_row(row).map(|record| record.project(query.columns.as_slice())))
            .collect()
    }
}

/// Stored type tags compared as text, matching the in-memory evaluation.
const TEXT_TYPES: [&str; 2] = ["text", "date_time"];
const BOOLEAN_TYPES: [&str; 1] = ["boolean"];
const IDENTIFIER_TYPES: [&str; 2] = ["identifier", "reference"];

/// Pushes the comparable text of one stored field; references compare by target id.
///
/// Absent fields and stored nulls both yield SQL `NULL`.
fn push_scalar_text(builder: &mut QueryBuilder<'_, Postgres>, field_logical_name: &str) {
    builder.push("COALESCE(data -> ");
    builder.push_bind(field_logical_name.to_owned());
    builder.push(" -> 'value' ->> 'record_id', data -> ");
    builder.push_bind(field_logical_name.to_owned());
    builder.push(" ->> 'value')");
}

fn push_scalar_number(builder: &mut QueryBuilder<'_, Postgres>, field_logical_name: &str) {
    builder.push("(CASE WHEN jsonb_typeof(data -> ");
    builder.push_bind(field_logical_name.to_owned());
    builder.push(" -> 'value') = 'number' THEN (data -> ");
    builder.push_bind(field_logical_name.to_owned());
    builder.push(" ->> 'value')::NUMERIC END)");
}

fn push_criterion(builder: &mut QueryBuilder<'_, Postgres>, criterion: &FilterCriterion) {
    let field = criterion.field_logical_name();

    match (criterion.operator(), criterion.value()) {
        (FilterOperator::Null, _) | (FilterOperator::Eq, Some(FilterValue::Null)) => {
            push_scalar_text(builder, field);
            builder.push(" IS NULL");
        }
        (FilterOperator::NotNull, _) | (FilterOperator::Ne, Some(FilterValue::Null)) => {
            push_scalar_text(builder, field);
            builder.push(" IS NOT NULL");
        }
        (_, None) => {
            builder.push("FALSE");
        }
        (FilterOperator::Eq, Some(value)) => push_equals(builder, field, value),
        (FilterOperator::Ne, Some(value)) => {
            builder.push("(");
            push_scalar_text(builder, field);
            builder.push(" IS NOT NULL AND NOT ");
            push_equals(builder, field, value);
            builder.push(")");
        }
        (FilterOperator::Gt, Some(value)) => push_ordering(builder, field, value, ">"),
        (FilterOperator::Lt, Some(value)) => push_ordering(builder, field, value, "<"),
        (FilterOperator::In, Some(value)) => push_any_equals(builder, field, value),
        (FilterOperator::NotIn, Some(value)) => {
            builder.push("(");
            push_scalar_text(builder, field);
            builder.push(" IS NOT NULL AND NOT ");
            push_any_equals(builder, field, value);
            builder.push(")");
        }
        (FilterOperator::Like, Some(value)) => {
            push_scalar_text(builder, field);
            builder.push(" ILIKE ");
            builder.push_bind(value.to_filter_text());
        }
    }
}

fn push_equals(builder: &mut QueryBuilder<'_, Postgres>, field: &str, value: &FilterValue) {
    let comparable_types: &[&str] = match value {
        FilterValue::Integer(number) => {
            builder.push("(");
            push_scalar_number(builder, field);
            builder.push(" = ");
            builder.push_bind(*number);
            builder.push("::NUMERIC)");
            return;
        }
        FilterValue::Null | FilterValue::List(_) => {
            builder.push("FALSE");
            return;
        }
        FilterValue::Boolean(_) => &BOOLEAN_TYPES,
        FilterValue::Identifier(_) => &IDENTIFIER_TYPES,
        FilterValue::Text(_) => &TEXT_TYPES,
    };

    builder.push("(");
    push_type_guard(builder, field, comparable_types);
    builder.push(" AND LOWER(");
    push_scalar_text(builder, field);
    builder.push(") = LOWER(");
    builder.push_bind(value.to_filter_text());
    builder.push("))");
}

/// Restricts a comparison to stored values whose type tag is one of `types`.
fn push_type_guard(builder: &mut QueryBuilder<'_, Postgres>, field: &str, types: &[&str]) {
    builder.push("data -> ");
    builder.push_bind(field.to_owned());
    builder.push(" ->> 'type' IN (");
    let mut separated = builder.separated(", ");
    for field_type in types {
        separated.push_bind((*field_type).to_owned());
    }
    builder.push(")");
}

fn push_any_equals(builder: &mut QueryBuilder<'_, Postgres>, field: &str, value: &FilterValue) {
    let items: &[FilterValue] = match value {
        FilterValue::List(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };

    builder.push("(FALSE");
    for item in items {
        builder.push(" OR ");
        push_equals(builder, field, item);
    }
    builder.push(")");
}

fn push_ordering(
    builder: &mut QueryBuilder<'_, Postgres>,
    field: &str,
    value: &FilterValue,
    operator: &str,
) {
    match value {
        FilterValue::Integer(number) => {
            builder.push("(");
            push_scalar_number(builder, field);
            builder.push(' ');
            builder.push(operator);
            builder.push(' ');
            builder.push_bind(*number);
            builder.push("::NUMERIC)");
        }
        FilterValue::Text(text) => {
            builder.push("(");
            push_type_guard(builder, field, &TEXT_TYPES);
            builder.push(" AND LOWER(data -> ");
            builder.push_bind(field.to_owned());
            builder.push(" ->> 'value') ");
            builder.push(operator);
            builder.push(" LOWER(");
            builder.push_bind(text.clone());
            builder.push("))");
        }
        _ => {
            builder.push("FALSE");
        }
    }
}
