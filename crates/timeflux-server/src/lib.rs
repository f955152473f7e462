pub mod cache;
pub mod config;
pub mod handlers;
pub mod observability;
pub mod pipeline;
pub mod server;

pub use cache::{DedupeCache, ReferenceCache, RulesCache, WorkspaceSnapshot};
pub use config::{
    AppConfig, CacheConfig, EngineConfig, LoggingConfig, ServerConfig, StorageBackend,
    StorageConfig, WorkspacesConfig,
};
pub use observability::{init_tracing, shutdown_tracing};
pub use pipeline::{ExecutionReport, ExecutionStatus, Pipeline, PipelineError};
pub use server::{AppState, ServerBuilder, TimefluxServer, build_app};

/// Create a rule store based on configuration.
///
/// ## Storage Backends
///
/// - **memory**: Process-local store, contents are lost on restart
/// - **postgres**: Durable store backed by PostgreSQL
///
/// The Postgres backend performs I/O here: the pool is established and the
/// schema bootstrapped before the store is handed out. A configured but
/// unreachable database is a startup failure, not a silent fallback.
pub async fn create_rule_store(
    config: &StorageConfig,
) -> Result<timeflux_store::DynRuleStore, timeflux_store::StoreError> {
    use std::sync::Arc;

    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory rule store");
            Ok(Arc::new(timeflux_db_memory::MemoryRuleStore::new()))
        }
        StorageBackend::Postgres => {
            tracing::info!("Connecting to Postgres");
            let store = timeflux_db_postgres::PostgresRuleStore::connect(&config.postgres).await?;
            tracing::info!("✓ Connected to Postgres successfully");
            Ok(Arc::new(store))
        }
    }
}
