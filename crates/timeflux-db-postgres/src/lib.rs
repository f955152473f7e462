//! # timeflux-db-postgres
//!
//! Durable implementation of the [`RuleStore`] contract backed by
//! PostgreSQL. Rules are serialized as opaque JSON documents keyed by
//! `(workspace_id, rule_id)`; the schema is bootstrapped on connect via
//! `CREATE TABLE IF NOT EXISTS`.
//!
//! [`RuleStore`]: timeflux_store::RuleStore

mod config;
mod pool;
mod store;

pub use config::PostgresConfig;
pub use pool::{PgPoolOptions, create_pool};
pub use store::PostgresRuleStore;
