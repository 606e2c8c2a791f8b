//! Infrastructure adapters for cascade application ports.

#![forbid(unsafe_code)]

mod in_memory_record_store;
mod json_file_configuration_source;
mod postgres_record_store;
mod record_seed;
mod tracing_diagnostics_sink;

pub use in_memory_record_store::InMemoryRecordStore;
pub use json_file_configuration_source::JsonFileConfigurationSource;
pub use postgres_record_store::PostgresRecordStore;
pub use record_seed::RecordSeed;
pub use tracing_diagnostics_sink::TracingDiagnosticsSink;
