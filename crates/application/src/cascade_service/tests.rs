use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cascade_core::{AppError, AppResult};
use cascade_domain::{
    CascadeConfiguration, ChangeEvent, ExecutionPhase, FieldMapping, FieldMetadata, FieldType,
    FieldValue, Record, RecordId, RecordReference, RelatedEntityConfig, RelationshipMode,
    ValueSet,
};

use crate::cascade_ports::{
    BatchItemOutcome, CascadeConfigurationSource, DiagnosticLevel, Diagnostics, DiagnosticsSink,
    RecordQuery, RecordStore, RecordUpdate,
};

use super::{
    AttachApplication, CascadeService, FieldMetadataCache, MAX_RELATED_RECORDS,
    RelatedCascadeStatus, UPDATE_BATCH_SIZE, truncate_text,
};

#[derive(Default)]
struct FakeRecordStore {
    records: Mutex<HashMap<(String, RecordId), Record>>,
    metadata: Mutex<HashMap<(String, String), FieldMetadata>>,
    failing_metadata: Mutex<bool>,
    failing_query: Mutex<Option<String>>,
    failing_record_ids: Mutex<HashSet<RecordId>>,
    failing_batch_calls: Mutex<HashSet<usize>>,
    batch_sizes: Mutex<Vec<usize>>,
    single_updates: Mutex<Vec<RecordUpdate>>,
    store_calls: Mutex<usize>,
    metadata_lookups: Mutex<usize>,
    queries: Mutex<Vec<RecordQuery>>,
    retrieved_columns: Mutex<Vec<Vec<String>>>,
}

impl FakeRecordStore {
    async fn seed(&self, record: Record) {
        self.records.lock().await.insert(
            (record.entity_logical_name().as_str().to_owned(), record.record_id()),
            record,
        );
    }

    async fn seed_metadata(&self, metadata: FieldMetadata) {
        self.metadata.lock().await.insert(
            (
                metadata.entity_logical_name().as_str().to_owned(),
                metadata.logical_name().as_str().to_owned(),
            ),
            metadata,
        );
    }

    async fn stored(&self, entity_logical_name: &str, record_id: RecordId) -> Record {
        self.records
            .lock()
            .await
            .get(&(entity_logical_name.to_owned(), record_id))
            .cloned()
            .unwrap_or_else(|| unreachable!())
    }

    async fn count_call(&self) {
        *self.store_calls.lock().await += 1;
    }

    async fn apply(&self, update: &RecordUpdate) -> AppResult<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(update.entity_logical_name.clone(), update.record_id))
            .ok_or_else(|| {
                AppError::NotFound(format!("record '{}' does not exist", update.record_id))
            })?;
        record.merge_fields(update.values.clone());
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn retrieve_record(
        &self,
        entity_logical_name: &str,
        record_id: RecordId,
        columns: &[String],
    ) -> AppResult<Option<Record>> {
        self.count_call().await;
        self.retrieved_columns.lock().await.push(columns.to_vec());
        Ok(self
            .records
            .lock()
            .await
            .get(&(entity_logical_name.to_owned(), record_id))
            .map(|record| record.project(columns)))
    }

    async fn query_records(&self, query: RecordQuery) -> AppResult<Vec<Record>> {
        self.count_call().await;
        self.queries.lock().await.push(query.clone());
        if let Some(message) = self.failing_query.lock().await.clone() {
            return Err(AppError::Internal(message));
        }

        let mut matching: Vec<Record> = self
            .records
            .lock()
            .await
            .values()
            .filter(|record| record.entity_logical_name().as_str() == query.entity_logical_name)
            .filter(|record| {
                query
                    .record_id
                    .is_none_or(|record_id| record.record_id() == record_id)
            })
            .filter(|record| {
                query.criteria.iter().all(|criterion| {
                    criterion.matches(record.field(criterion.field_logical_name()))
                })
            })
            .map(|record| record.project(query.columns.as_slice()))
            .collect();
        matching.sort_by_key(Record::record_id);
        matching.truncate(query.limit);
        Ok(matching)
    }

    async fn update_record(&self, update: RecordUpdate) -> AppResult<()> {
        self.count_call().await;
        self.apply(&update).await?;
        self.single_updates.lock().await.push(update);
        Ok(())
    }

    async fn execute_batch(&self, updates: Vec<RecordUpdate>) -> AppResult<Vec<BatchItemOutcome>> {
        self.count_call().await;
        let call_index = {
            let mut batch_sizes = self.batch_sizes.lock().await;
            batch_sizes.push(updates.len());
            batch_sizes.len() - 1
        };

        if self.failing_batch_calls.lock().await.contains(&call_index) {
            return Err(AppError::Internal("service unavailable".to_owned()));
        }

        let failing_record_ids = self.failing_record_ids.lock().await.clone();
        let mut outcomes = Vec::with_capacity(updates.len());
        for update in &updates {
            if failing_record_ids.contains(&update.record_id) {
                outcomes.push(BatchItemOutcome::failed(update.record_id, "record is locked"));
                continue;
            }

            match self.apply(update).await {
                Ok(()) => outcomes.push(BatchItemOutcome::succeeded(update.record_id)),
                Err(error) => outcomes.push(BatchItemOutcome::failed(
                    update.record_id,
                    error.to_string(),
                )),
            }
        }

        Ok(outcomes)
    }

    async fn field_metadata(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
    ) -> AppResult<Option<FieldMetadata>> {
        *self.metadata_lookups.lock().await += 1;
        if *self.failing_metadata.lock().await {
            return Err(AppError::Internal("metadata service timed out".to_owned()));
        }

        Ok(self
            .metadata
            .lock()
            .await
            .get(&(entity_logical_name.to_owned(), field_logical_name.to_owned()))
            .cloned())
    }
}

#[derive(Default)]
struct RecordingDiagnosticsSink {
    entries: std::sync::Mutex<Vec<(DiagnosticLevel, String)>>,
    brackets: std::sync::Mutex<Vec<String>>,
}

impl RecordingDiagnosticsSink {
    fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(entry_level, _)| *entry_level == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn brackets(&self) -> Vec<String> {
        self.brackets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticsSink for RecordingDiagnosticsSink {
    fn log(&self, level: DiagnosticLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((level, message.to_owned()));
    }

    fn begin(&self, operation: &str) {
        self.brackets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(format!("begin:{operation}"));
    }

    fn end(&self, operation: &str) {
        self.brackets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(format!("end:{operation}"));
    }
}

struct FakeConfigurationSource {
    configurations: Vec<CascadeConfiguration>,
}

#[async_trait]
impl CascadeConfigurationSource for FakeConfigurationSource {
    async fn list_configurations(&self) -> AppResult<Vec<CascadeConfiguration>> {
        Ok(self.configurations.clone())
    }
}

struct Harness {
    store: Arc<FakeRecordStore>,
    sink: Arc<RecordingDiagnosticsSink>,
    service: CascadeService,
}

fn harness() -> Harness {
    let store = Arc::new(FakeRecordStore::default());
    let sink = Arc::new(RecordingDiagnosticsSink::default());
    let service = CascadeService::new(store.clone()).with_diagnostics_sink(sink.clone());
    Harness {
        store,
        sink,
        service,
    }
}

fn record(entity_logical_name: &str, record_id: RecordId) -> Record {
    Record::new(record_id, entity_logical_name).unwrap_or_else(|_| unreachable!())
}

fn account_reference(account_id: RecordId) -> FieldValue {
    FieldValue::Reference(
        RecordReference::new("account", account_id).unwrap_or_else(|_| unreachable!()),
    )
}

fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_owned())
}

fn contact_related(filter_criteria: Option<&str>) -> RelatedEntityConfig {
    RelatedEntityConfig {
        entity_logical_name: "contact".to_owned(),
        link_mode: RelationshipMode::ByLookupField,
        relationship_name: None,
        lookup_field_name: Some("parentcustomerid".to_owned()),
        filter_criteria: filter_criteria.map(str::to_owned),
        field_mappings: vec![
            FieldMapping::new("territory", "territory", true),
            FieldMapping::new("status", "status", false),
        ],
    }
}

fn territory_configuration(related_entities: Vec<RelatedEntityConfig>) -> CascadeConfiguration {
    CascadeConfiguration {
        id: "territory".to_owned(),
        name: "Account territory".to_owned(),
        parent_entity: "account".to_owned(),
        is_active: true,
        enable_tracing: true,
        related_entities,
    }
}

async fn seed_contact(store: &FakeRecordStore, account_id: RecordId) -> RecordId {
    let contact_id = RecordId::new();
    store
        .seed(
            record("contact", contact_id)
                .with_field("parentcustomerid", account_reference(account_id))
                .with_field("statecode", FieldValue::Choice(0)),
        )
        .await;
    contact_id
}

fn territory_update(account_id: RecordId, territory: &str) -> ChangeEvent {
    let post = record("account", account_id).with_field("territory", text(territory));
    let pre = record("account", account_id)
        .with_field("territory", text("West"))
        .with_field("status", FieldValue::Integer(1));
    ChangeEvent::update(post, Some(pre)).unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn territory_change_cascades_to_every_linked_child() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    let first = seed_contact(&store, account_id).await;
    let second = seed_contact(&store, account_id).await;
    let unrelated = seed_contact(&store, RecordId::new()).await;

    let summary = service
        .on_parent_changed(
            &territory_update(account_id, "East"),
            &territory_configuration(vec![contact_related(None)]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(summary.total_success_count(), 2);
    assert_eq!(summary.total_error_count(), 0);
    for contact_id in [first, second] {
        let contact = store.stored("contact", contact_id).await;
        assert_eq!(contact.field("territory"), Some(&text("East")));
        assert_eq!(contact.field("status"), Some(&FieldValue::Integer(1)));
    }
    assert!(
        store
            .stored("contact", unrelated)
            .await
            .field("territory")
            .is_none()
    );
}

#[tokio::test]
async fn child_lookup_reads_identifiers_only_with_one_row_of_overflow() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    seed_contact(&store, account_id).await;

    service
        .on_parent_changed(
            &territory_update(account_id, "East"),
            &territory_configuration(vec![contact_related(Some("statecode|eq|0"))]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let queries = store.queries.lock().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].entity_logical_name, "contact");
    assert_eq!(queries[0].limit, MAX_RELATED_RECORDS + 1);
    assert!(queries[0].columns.is_empty());
    assert!(queries[0].record_id.is_none());
    assert_eq!(queries[0].criteria.len(), 2);
    assert_eq!(queries[0].criteria[0].field_logical_name(), "parentcustomerid");
}

#[tokio::test]
async fn children_are_capped_and_warned_about_only_past_the_ceiling() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    let account_id = RecordId::new();
    for _ in 0..MAX_RELATED_RECORDS {
        seed_contact(&store, account_id).await;
    }
    let configuration = territory_configuration(vec![contact_related(None)]);
    let ceiling_warnings = || {
        sink.messages(DiagnosticLevel::Warning)
            .iter()
            .filter(|message| message.contains("record ceiling"))
            .count()
    };

    let at_ceiling = service
        .on_parent_changed(&territory_update(account_id, "East"), &configuration)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(at_ceiling.total_success_count(), MAX_RELATED_RECORDS);
    assert_eq!(ceiling_warnings(), 0);

    seed_contact(&store, account_id).await;
    let past_ceiling = service
        .on_parent_changed(&territory_update(account_id, "North"), &configuration)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(past_ceiling.total_success_count(), MAX_RELATED_RECORDS);
    assert_eq!(ceiling_warnings(), 1);
}

#[tokio::test]
async fn status_only_change_does_not_cascade() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    let account_id = RecordId::new();
    let contact_id = seed_contact(&store, account_id).await;

    let post = record("account", account_id)
        .with_field("territory", text("West"))
        .with_field("status", FieldValue::Integer(2));
    let pre = record("account", account_id)
        .with_field("territory", text("West"))
        .with_field("status", FieldValue::Integer(1));
    let event = ChangeEvent::update(post, Some(pre)).unwrap_or_else(|_| unreachable!());

    let summary = service
        .on_parent_changed(&event, &territory_configuration(vec![contact_related(None)]))
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(summary.outcomes[0].status, RelatedCascadeStatus::NotTriggered);
    assert!(!summary.any_triggered());
    assert!(store.batch_sizes.lock().await.is_empty());
    assert!(
        store
            .stored("contact", contact_id)
            .await
            .field("status")
            .is_none()
    );
    assert!(
        sink.messages(DiagnosticLevel::Info)
            .iter()
            .any(|message| message.contains("no related configuration triggered"))
    );
}

#[tokio::test]
async fn filter_limits_cascade_to_matching_children() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    let active = seed_contact(&store, account_id).await;
    let inactive = RecordId::new();
    store
        .seed(
            record("contact", inactive)
                .with_field("parentcustomerid", account_reference(account_id))
                .with_field("statecode", FieldValue::Choice(1)),
        )
        .await;

    let summary = service
        .on_parent_changed(
            &territory_update(account_id, "East"),
            &territory_configuration(vec![contact_related(Some("statecode|eq|0"))]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(summary.total_success_count(), 1);
    assert_eq!(
        store.stored("contact", active).await.field("territory"),
        Some(&text("East"))
    );
    assert!(
        store
            .stored("contact", inactive)
            .await
            .field("territory")
            .is_none()
    );
}

#[tokio::test]
async fn malformed_filter_aborts_only_its_related_configuration() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    seed_contact(&store, account_id).await;
    let opportunity_id = RecordId::new();
    store
        .seed(
            record("opportunity", opportunity_id)
                .with_field("parentaccountid", account_reference(account_id)),
        )
        .await;

    let opportunities = RelatedEntityConfig {
        entity_logical_name: "opportunity".to_owned(),
        link_mode: RelationshipMode::ByNamedRelationship,
        relationship_name: Some("opportunity_parent_parentaccountid".to_owned()),
        lookup_field_name: None,
        filter_criteria: None,
        field_mappings: vec![FieldMapping::new("territory", "territory", true)],
    };

    let summary = service
        .on_parent_changed(
            &territory_update(account_id, "East"),
            &territory_configuration(vec![
                contact_related(Some("statecode|unknownop|0")),
                opportunities,
            ]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        &summary.outcomes[0].status,
        RelatedCascadeStatus::Failed(message) if message.contains("unknownop")
    ));
    assert_eq!(summary.failed_path_count(), 1);
    assert_eq!(summary.outcomes[1].entity_logical_name, "opportunity");
    assert_eq!(summary.total_success_count(), 1);
    assert_eq!(
        store
            .stored("opportunity", opportunity_id)
            .await
            .field("territory"),
        Some(&text("East"))
    );
}

#[tokio::test]
async fn failing_child_is_reported_while_others_update() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    let account_id = RecordId::new();
    let mut contact_ids = Vec::new();
    for _ in 0..4 {
        contact_ids.push(seed_contact(&store, account_id).await);
    }
    let failing = contact_ids[2];
    store.failing_record_ids.lock().await.insert(failing);

    let summary = service
        .on_parent_changed(
            &territory_update(account_id, "East"),
            &territory_configuration(vec![contact_related(None)]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let RelatedCascadeStatus::Completed(result) = &summary.outcomes[0].status else {
        unreachable!();
    };
    assert_eq!(result.success_count, 3);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors[0].record_id, failing);
    assert_eq!(result.errors[0].message, "record is locked");
    assert!(
        sink.messages(DiagnosticLevel::Error)
            .iter()
            .any(|message| message.contains(failing.to_string().as_str()))
    );
}

#[tokio::test]
async fn whole_batch_failure_counts_every_record_and_continues() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    for _ in 0..(UPDATE_BATCH_SIZE + 20) {
        seed_contact(&store, account_id).await;
    }
    store.failing_batch_calls.lock().await.insert(0);

    let summary = service
        .on_parent_changed(
            &territory_update(account_id, "East"),
            &territory_configuration(vec![contact_related(None)]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(*store.batch_sizes.lock().await, vec![UPDATE_BATCH_SIZE, 20]);
    assert_eq!(summary.total_error_count(), UPDATE_BATCH_SIZE);
    assert_eq!(summary.total_success_count(), 20);
    let RelatedCascadeStatus::Completed(result) = &summary.outcomes[0].status else {
        unreachable!();
    };
    assert!(
        result
            .errors
            .iter()
            .all(|error| error.message.contains("service unavailable"))
    );
}

#[tokio::test]
async fn replayed_parent_change_leaves_children_unchanged() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    let contact_id = seed_contact(&store, account_id).await;
    let configuration = territory_configuration(vec![contact_related(None)]);
    let event = territory_update(account_id, "East");

    service
        .on_parent_changed(&event, &configuration)
        .await
        .unwrap_or_else(|_| unreachable!());
    let first_pass = store.stored("contact", contact_id).await;
    service
        .on_parent_changed(&event, &configuration)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(store.stored("contact", contact_id).await, first_pass);
}

#[tokio::test]
async fn bounded_text_target_is_truncated_with_warning() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    store
        .seed_metadata(
            FieldMetadata::new("contact", "territory", FieldType::Text, Some(5))
                .unwrap_or_else(|_| unreachable!()),
        )
        .await;
    let account_id = RecordId::new();
    let contact_id = seed_contact(&store, account_id).await;

    service
        .on_parent_changed(
            &territory_update(account_id, "Continental"),
            &territory_configuration(vec![contact_related(None)]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        store.stored("contact", contact_id).await.field("territory"),
        Some(&text("Cont\u{2026}"))
    );
    assert!(
        sink.messages(DiagnosticLevel::Warning)
            .iter()
            .any(|message| message.contains("truncated"))
    );
}

#[tokio::test]
async fn references_and_choices_use_labels_for_text_targets() {
    let Harness { store, service, .. } = harness();
    store
        .seed_metadata(
            FieldMetadata::new("contact", "owner_name", FieldType::Text, Some(100))
                .unwrap_or_else(|_| unreachable!()),
        )
        .await;
    store
        .seed_metadata(
            FieldMetadata::new("contact", "tier_label", FieldType::Memo, Some(100))
                .unwrap_or_else(|_| unreachable!()),
        )
        .await;

    let owner = RecordReference::new("systemuser", RecordId::new())
        .unwrap_or_else(|_| unreachable!())
        .with_display_name("Ada Lovelace");
    let account = record("account", RecordId::new())
        .with_field("ownerid", FieldValue::Reference(owner))
        .with_field("tier", FieldValue::Choice(3))
        .with_formatted_value("tier", "Gold")
        .with_field("segment", FieldValue::Choice(7));
    let diagnostics = Diagnostics::disabled();

    let owner_name = service
        .resolve_value(
            &account,
            &FieldMapping::new("ownerid", "owner_name", false),
            "contact",
            &diagnostics,
        )
        .await;
    let tier_label = service
        .resolve_value(
            &account,
            &FieldMapping::new("tier", "tier_label", false),
            "contact",
            &diagnostics,
        )
        .await;
    let segment_label = service
        .resolve_value(
            &account,
            &FieldMapping::new("segment", "tier_label", false),
            "contact",
            &diagnostics,
        )
        .await;
    let untyped = service
        .resolve_value(
            &account,
            &FieldMapping::new("tier", "tier", false),
            "contact",
            &diagnostics,
        )
        .await;

    assert_eq!(owner_name, Some(text("Ada Lovelace")));
    assert_eq!(tier_label, Some(text("Gold")));
    assert_eq!(segment_label, Some(text("7")));
    assert_eq!(untyped, Some(FieldValue::Choice(3)));
}

#[tokio::test]
async fn metadata_failure_passes_value_through_uncached() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    *store.failing_metadata.lock().await = true;
    let cache = Arc::new(FieldMetadataCache::new());
    let service = service.with_metadata_cache(cache.clone());
    let account = record("account", RecordId::new()).with_field("territory", text("Continental"));
    let diagnostics = Diagnostics::new(Some(sink.clone()), false);

    let value = service
        .resolve_value(
            &account,
            &FieldMapping::new("territory", "territory", true),
            "contact",
            &diagnostics,
        )
        .await;

    assert_eq!(value, Some(text("Continental")));
    assert_eq!(cache.len().await, 0);
    assert_eq!(sink.messages(DiagnosticLevel::Warning).len(), 1);
}

#[tokio::test]
async fn metadata_lookups_are_cached_per_field() {
    let Harness { store, service, .. } = harness();
    let account = record("account", RecordId::new()).with_field("territory", text("West"));
    let mapping = FieldMapping::new("territory", "territory", true);
    let diagnostics = Diagnostics::disabled();

    for _ in 0..3 {
        service
            .resolve_value(&account, &mapping, "contact", &diagnostics)
            .await;
    }

    assert_eq!(*store.metadata_lookups.lock().await, 1);
}

#[tokio::test]
async fn metadata_cache_keeps_first_value() {
    let cache = FieldMetadataCache::new();
    let first = FieldMetadata::new("contact", "territory", FieldType::Text, Some(10))
        .unwrap_or_else(|_| unreachable!());
    let second = FieldMetadata::new("contact", "territory", FieldType::Text, Some(20))
        .unwrap_or_else(|_| unreachable!());

    cache
        .insert_if_absent("contact", "territory", Some(first.clone()))
        .await;
    let stored = cache
        .insert_if_absent("contact", "territory", Some(second))
        .await;

    assert_eq!(stored, Some(first.clone()));
    assert_eq!(
        cache.get("contact", "territory").await,
        Some(Some(first))
    );
}

#[tokio::test]
async fn pre_image_fills_fields_missing_from_post_image() {
    let Harness { service, .. } = harness();
    let account_id = RecordId::new();
    let post = record("account", account_id)
        .with_field("territory", text("East"))
        .with_field("status", FieldValue::Null);
    let pre = record("account", account_id)
        .with_field("territory", text("West"))
        .with_field("status", FieldValue::Integer(1))
        .with_field("region", text("EMEA"));
    let mut related = contact_related(None);
    related
        .field_mappings
        .push(FieldMapping::new("region", "region", false));
    related
        .field_mappings
        .push(FieldMapping::new("rating", "rating", false));

    let values = service
        .resolve_all(&post, Some(&pre), &related, &Diagnostics::disabled())
        .await;

    assert_eq!(values.get("territory"), Some(&text("East")));
    assert_eq!(values.get("status"), Some(&FieldValue::Null));
    assert_eq!(values.get("region"), Some(&text("EMEA")));
    assert!(values.get("rating").is_none());
    assert_eq!(values.len(), 3);
}

#[tokio::test]
async fn invalid_configuration_fails_before_store_access() {
    let Harness { store, service, .. } = harness();
    let mut related = contact_related(None);
    related.field_mappings.clear();

    let result = service
        .on_parent_changed(
            &territory_update(RecordId::new(), "East"),
            &territory_configuration(vec![related]),
        )
        .await;

    assert!(matches!(result, Err(AppError::Configuration(message)) if message.contains("contact")));
    assert_eq!(*store.store_calls.lock().await, 0);
}

#[tokio::test]
async fn unclassified_locator_failure_is_raised_after_logging() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    *store.failing_query.lock().await = Some("connection reset".to_owned());

    let result = service
        .on_parent_changed(
            &territory_update(RecordId::new(), "East"),
            &territory_configuration(vec![contact_related(None)]),
        )
        .await;

    assert!(matches!(result, Err(AppError::Internal(_))));
    assert!(
        sink.messages(DiagnosticLevel::Error)
            .iter()
            .any(|message| message.contains("connection reset"))
    );
    assert_eq!(
        sink.brackets(),
        vec!["begin:on_parent_changed", "end:on_parent_changed"]
    );
}

#[tokio::test]
async fn inactive_or_foreign_entity_changes_are_no_ops() {
    let Harness { store, service, .. } = harness();
    let account_id = RecordId::new();
    seed_contact(&store, account_id).await;
    let mut inactive = territory_configuration(vec![contact_related(None)]);
    inactive.is_active = false;

    let skipped = service
        .on_parent_changed(&territory_update(account_id, "East"), &inactive)
        .await
        .unwrap_or_else(|_| unreachable!());
    let lead_event = ChangeEvent::update(
        record("lead", RecordId::new()).with_field("territory", text("East")),
        None,
    )
    .unwrap_or_else(|_| unreachable!());
    let foreign = service
        .on_parent_changed(
            &lead_event,
            &territory_configuration(vec![contact_related(None)]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(skipped.outcomes.is_empty());
    assert!(foreign.outcomes.is_empty());
    assert_eq!(*store.store_calls.lock().await, 0);
}

async fn seed_account(store: &FakeRecordStore) -> RecordId {
    let account_id = RecordId::new();
    store
        .seed(
            record("account", account_id)
                .with_field("name", text("Contoso"))
                .with_field("territory", text("West"))
                .with_field("status", FieldValue::Integer(1)),
        )
        .await;
    account_id
}

fn new_contact(account_id: RecordId) -> Record {
    record("contact", RecordId::new())
        .with_field("parentcustomerid", account_reference(account_id))
        .with_field("statecode", FieldValue::Choice(0))
}

#[tokio::test]
async fn attach_before_commit_folds_values_into_event() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let mut event = ChangeEvent::create(new_contact(account_id));

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(None)]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::FoldedIntoEvent);
    assert_eq!(event.target().field("territory"), Some(&text("West")));
    assert_eq!(event.target().field("status"), Some(&FieldValue::Integer(1)));
    assert!(store.single_updates.lock().await.is_empty());
}

#[tokio::test]
async fn attach_after_commit_writes_values_separately() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let contact = new_contact(account_id);
    let contact_id = contact.record_id();
    store.seed(contact.clone()).await;
    let mut event = ChangeEvent::create(contact);

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(None)]),
            ExecutionPhase::PostOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::Written);
    assert!(event.target().field("territory").is_none());
    assert_eq!(
        store.stored("contact", contact_id).await.field("territory"),
        Some(&text("West"))
    );
    assert_eq!(store.single_updates.lock().await.len(), 1);
}

#[tokio::test]
async fn attach_write_failure_is_reported() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let mut event = ChangeEvent::create(new_contact(account_id));

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(None)]),
            ExecutionPhase::PostOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(matches!(
        outcome.application,
        AttachApplication::WriteFailed(message) if message.contains("does not exist")
    ));
}

#[tokio::test]
async fn unchanged_lookup_is_not_applicable() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let contact = new_contact(account_id).with_field("lastname", text("Smith"));
    let pre = contact.clone().with_field("lastname", text("Smyth"));
    let mut event = ChangeEvent::update(contact, Some(pre)).unwrap_or_else(|_| unreachable!());

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(None)]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::NotApplicable);
    assert!(outcome.values.is_empty());
    assert_eq!(*store.store_calls.lock().await, 0);
}

#[tokio::test]
async fn relinked_child_pulls_values_from_new_parent() {
    let Harness { store, service, .. } = harness();
    let previous_account = seed_account(&store).await;
    let new_account = RecordId::new();
    store
        .seed(record("account", new_account).with_field("territory", text("North")))
        .await;
    let contact_id = RecordId::new();
    let post = record("contact", contact_id)
        .with_field("parentcustomerid", account_reference(new_account));
    let pre = record("contact", contact_id)
        .with_field("parentcustomerid", account_reference(previous_account));
    let mut event = ChangeEvent::update(post, Some(pre)).unwrap_or_else(|_| unreachable!());

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(None)]),
            ExecutionPhase::PreValidation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.values.get("territory"), Some(&text("North")));
    assert!(outcome.values.get("status").is_none());
}

#[tokio::test]
async fn attach_skips_children_outside_filter() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let mut event = ChangeEvent::create(
        new_contact(account_id).with_field("statecode", FieldValue::Choice(1)),
    );

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(Some("statecode|eq|0"))]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::NotApplicable);
    assert!(event.target().field("territory").is_none());
}

#[tokio::test]
async fn attach_filter_uses_event_values_for_fields_the_event_carries() {
    let Harness { store, service, .. } = harness();
    let previous_account = seed_account(&store).await;
    let new_account = seed_account(&store).await;
    let contact_id = RecordId::new();
    store
        .seed(
            record("contact", contact_id)
                .with_field("parentcustomerid", account_reference(previous_account))
                .with_field("statecode", FieldValue::Choice(1))
                .with_field("jobtitle", text("Engineer")),
        )
        .await;
    let relink = || {
        let post = record("contact", contact_id)
            .with_field("parentcustomerid", account_reference(new_account))
            .with_field("statecode", FieldValue::Choice(0));
        let pre = record("contact", contact_id)
            .with_field("parentcustomerid", account_reference(previous_account))
            .with_field("statecode", FieldValue::Choice(1));
        ChangeEvent::update(post, Some(pre)).unwrap_or_else(|_| unreachable!())
    };

    let mut event = relink();
    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(Some(
                "statecode|eq|0;jobtitle|notnull",
            ))]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::FoldedIntoEvent);
    assert_eq!(event.target().field("territory"), Some(&text("West")));
    let queried = store.queries.lock().await.clone();
    assert_eq!(queried.len(), 1);
    assert_eq!(queried[0].record_id, Some(contact_id));
    assert_eq!(queried[0].criteria.len(), 1);
    assert_eq!(queried[0].criteria[0].field_logical_name(), "jobtitle");

    let mut event = relink();
    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(Some(
                "statecode|eq|0;lastname|notnull",
            ))]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::NotApplicable);
    assert!(event.target().field("territory").is_none());
}

#[tokio::test]
async fn attach_reads_only_the_mapped_source_fields_of_the_parent() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let related = contact_related(None);
    let mut event = ChangeEvent::create(new_contact(account_id));

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![related.clone()]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::FoldedIntoEvent);
    assert_eq!(
        *store.retrieved_columns.lock().await,
        vec![related.source_fields()]
    );
    assert!(event.target().field("name").is_none());
}

#[tokio::test]
async fn attach_filter_evaluation_failure_is_permissive() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    let account_id = seed_account(&store).await;
    *store.failing_query.lock().await = Some("query timeout".to_owned());
    let contact_id = RecordId::new();
    let post = record("contact", contact_id)
        .with_field("parentcustomerid", account_reference(account_id));
    let pre = record("contact", contact_id);
    let mut event = ChangeEvent::update(post, Some(pre)).unwrap_or_else(|_| unreachable!());

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(Some("statecode|eq|0"))]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.application, AttachApplication::FoldedIntoEvent);
    assert!(
        sink.messages(DiagnosticLevel::Warning)
            .iter()
            .any(|message| message.contains("query timeout"))
    );
}

#[tokio::test]
async fn attach_merges_values_across_related_configurations() {
    let Harness {
        store,
        sink,
        service,
    } = harness();
    let account_id = seed_account(&store).await;
    let naming = RelatedEntityConfig {
        entity_logical_name: "contact".to_owned(),
        link_mode: RelationshipMode::ByNamedRelationship,
        relationship_name: Some("contact_customer_parentcustomerid".to_owned()),
        lookup_field_name: None,
        filter_criteria: None,
        field_mappings: vec![
            FieldMapping::new("name", "company_name", false),
            FieldMapping::new("name", "territory", false),
        ],
    };
    let mut event = ChangeEvent::create(new_contact(account_id));

    let outcome = service
        .on_child_attached(
            &mut event,
            &territory_configuration(vec![contact_related(None), naming]),
            ExecutionPhase::PreOperation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(outcome.values.len(), 3);
    assert_eq!(outcome.values.get("company_name"), Some(&text("Contoso")));
    assert_eq!(outcome.values.get("territory"), Some(&text("Contoso")));
    assert!(
        sink.messages(DiagnosticLevel::Debug)
            .iter()
            .any(|message| message.contains("'territory' was already resolved"))
    );
}

#[tokio::test]
async fn handle_event_routes_parent_and_child_events() {
    let Harness { store, service, .. } = harness();
    let account_id = seed_account(&store).await;
    let contact_id = seed_contact(&store, account_id).await;
    let mut dormant = territory_configuration(vec![contact_related(None)]);
    dormant.id = "dormant".to_owned();
    dormant.is_active = false;
    let service = service.with_configuration_source(Arc::new(FakeConfigurationSource {
        configurations: vec![
            territory_configuration(vec![contact_related(None)]),
            dormant,
        ],
    }));

    let mut parent_event = territory_update(account_id, "East");
    let parent_report = service
        .handle_event(&mut parent_event, ExecutionPhase::PostOperation)
        .await
        .unwrap_or_else(|_| unreachable!());
    let mut pre_commit_parent_event = territory_update(account_id, "South");
    let pre_commit_report = service
        .handle_event(&mut pre_commit_parent_event, ExecutionPhase::PreOperation)
        .await
        .unwrap_or_else(|_| unreachable!());
    let mut child_event = ChangeEvent::create(new_contact(account_id));
    let child_report = service
        .handle_event(&mut child_event, ExecutionPhase::PreOperation)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(parent_report.parent_summaries.len(), 1);
    assert!(parent_report.attach_outcomes.is_empty());
    assert!(pre_commit_report.is_empty());
    assert_eq!(
        store.stored("contact", contact_id).await.field("territory"),
        Some(&text("East"))
    );
    assert_eq!(child_report.attach_outcomes.len(), 1);
    assert_eq!(child_report.attach_outcomes[0].0, "territory");
    assert_eq!(
        child_event.target().field("territory"),
        Some(&text("West"))
    );
}

#[tokio::test]
async fn handle_event_requires_configuration_source() {
    let Harness { service, .. } = harness();
    let mut event = ChangeEvent::create(new_contact(RecordId::new()));

    let result = service
        .handle_event(&mut event, ExecutionPhase::PostOperation)
        .await;

    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[test]
fn truncation_yields_exact_length_with_ellipsis() {
    let truncated = truncate_text("Northern Territory", 8).unwrap_or_else(|| unreachable!());

    assert_eq!(truncated.chars().count(), 8);
    assert!(truncated.ends_with('\u{2026}'));
    assert_eq!(truncated, "Norther\u{2026}");
    assert_eq!(truncate_text("West", 4), None);
    assert_eq!(truncate_text("West", 0), Some(String::new()));
}

#[test]
fn value_sets_replay_to_the_same_record_state() {
    let values: ValueSet = [
        ("territory".to_owned(), text("East")),
        ("status".to_owned(), FieldValue::Integer(1)),
    ]
    .into_iter()
    .collect();
    let mut once = record("contact", RecordId::new()).with_field("lastname", text("Smith"));
    once.merge_fields(values.clone());
    let mut twice = once.clone();
    twice.merge_fields(values);

    assert_eq!(once, twice);
}
