//! Cascade worker runtime: replays recorded change events through the cascade engine.

#![forbid(unsafe_code)]

mod replay;
mod worker_config;

use std::sync::Arc;

use cascade_application::{CascadeService, RecordStore};
use cascade_core::{AppError, AppResult};
use cascade_infrastructure::{
    InMemoryRecordStore, JsonFileConfigurationSource, PostgresRecordStore, RecordSeed,
    TracingDiagnosticsSink,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::replay::{load_events, replay_events};
use crate::worker_config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;

    if config.migrate_only {
        if let Some(database_url) = config.database_url.as_deref() {
            connect_and_migrate(database_url, config.database_max_connections).await?;
            info!("migrations applied successfully");
        }
        return Ok(());
    }

    let configuration_source =
        Arc::new(JsonFileConfigurationSource::load(&config.configuration_path).await?);
    let record_store = build_record_store(&config).await?;
    let service = CascadeService::new(record_store)
        .with_configuration_source(configuration_source)
        .with_diagnostics_sink(Arc::new(TracingDiagnosticsSink::new()));

    let events = load_events(&config.events_path).await?;
    info!(
        events_path = %config.events_path.display(),
        event_count = events.len(),
        store = if config.database_url.is_some() { "postgres" } else { "in_memory" },
        "cascade-worker started"
    );

    let totals = replay_events(&service, events).await;
    info!(
        events = totals.events,
        failed_events = totals.failed_events,
        updated_children = totals.updated_children,
        failed_children = totals.failed_children,
        attached_children = totals.attached_children,
        "cascade-worker finished"
    );

    Ok(())
}

async fn build_record_store(config: &WorkerConfig) -> AppResult<Arc<dyn RecordStore>> {
    let seed = match &config.seed_path {
        Some(path) => Some(RecordSeed::load(path).await?),
        None => None,
    };

    match config.database_url.as_deref() {
        Some(database_url) => {
            let pool =
                connect_and_migrate(database_url, config.database_max_connections).await?;
            let store = PostgresRecordStore::new(pool);
            if let Some(seed) = seed {
                store.seed(seed).await?;
            }
            Ok(Arc::new(store))
        }
        None => {
            let store = InMemoryRecordStore::new();
            if let Some(seed) = seed {
                store.seed(seed).await;
            }
            Ok(Arc::new(store))
        }
    }
}

async fn connect_and_migrate(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
