//! Core types and decision logic for the Timeflux automation engine.
//!
//! This crate is pure: it owns the rule data model, save-time validation,
//! the event context and the condition evaluator. Persistence, caching and
//! outbound API calls live in sibling crates.

pub mod context;
pub mod error;
pub mod eval;
pub mod placeholder;
pub mod rule;
pub mod validate;

pub use context::{EventContext, walk_path};
pub use error::CoreError;
pub use eval::evaluate;
pub use rule::{
    Action, ActionType, Combinator, Condition, ConditionType, HttpMethod, Operator, Rule,
    RuleTrigger,
};
pub use validate::validate_rule;

/// Convenience result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Normalizes a human-entered name for lookups: trim, then lowercase.
///
/// Returns `None` for blank input so empty names never collide in maps.
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}
