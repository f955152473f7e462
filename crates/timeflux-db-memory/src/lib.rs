//! # timeflux-db-memory
//!
//! Volatile, in-process implementation of the [`RuleStore`] contract, backed
//! by a papaya lock-free `HashMap`. The default backend for development and
//! tests; production deployments use `timeflux-db-postgres`.
//!
//! [`RuleStore`]: timeflux_store::RuleStore

mod store;

pub use store::MemoryRuleStore;
