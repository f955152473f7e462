//! # timeflux-store
//!
//! Persistence abstraction for automation rules.
//!
//! This crate defines the [`RuleStore`] trait and its error type. It contains
//! no implementations; those live in `timeflux-db-memory` and
//! `timeflux-db-postgres`, and both must behave identically under the
//! contract described on [`RuleStore`].

mod error;
mod traits;

pub use error::{ErrorCategory, StoreError};
pub use traits::{RuleStore, require_rule_id, require_workspace_id};

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for a shared store trait object.
pub type DynRuleStore = std::sync::Arc<dyn RuleStore>;
