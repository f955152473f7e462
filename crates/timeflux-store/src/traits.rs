//! The rule store contract that all backends implement.

use async_trait::async_trait;
use timeflux_core::Rule;

use crate::error::StoreError;

/// Persistence contract for automation rules, scoped by workspace.
///
/// Backends must be thread-safe (`Send + Sync`) and behave identically under
/// this contract, so callers can swap the in-memory store for the durable one
/// without observable differences beyond durability.
///
/// # Example
///
/// ```ignore
/// use timeflux_store::{RuleStore, StoreError};
/// use timeflux_core::Rule;
///
/// async fn first_enabled(store: &dyn RuleStore, ws: &str) -> Result<Option<Rule>, StoreError> {
///     Ok(store.get_enabled(ws).await?.into_iter().next())
/// }
/// ```
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Saves a rule, replacing any rule with the same `(workspace, id)`.
    ///
    /// Backends assign a fresh id when the rule carries a blank one, and
    /// return the rule as persisted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidArgument` for a blank workspace id.
    async fn save(&self, workspace_id: &str, rule: Rule) -> Result<Rule, StoreError>;

    /// Reads a rule by id. Returns `None` if the rule does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing rules.
    async fn get(&self, workspace_id: &str, rule_id: &str) -> Result<Option<Rule>, StoreError>;

    /// Returns every rule of a workspace, in storage order.
    async fn get_all(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// Returns the enabled rules of a workspace, in storage order.
    ///
    /// Backends guarantee no ordering beyond storage order; execution
    /// ordering (priority) is the caller's concern.
    async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// Deletes a rule. Returns `true` when a rule was actually removed.
    async fn delete(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError>;

    /// Deletes every rule of a workspace, returning how many were removed.
    async fn delete_all(&self, workspace_id: &str) -> Result<u64, StoreError>;

    /// Returns `true` when a rule with the given id exists.
    async fn exists(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError>;

    /// Number of rules stored for a workspace.
    async fn count(&self, workspace_id: &str) -> Result<u64, StoreError>;

    /// Removes every rule of every workspace. Test/admin use only.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Returns the ids of all workspaces that currently have rules.
    async fn list_workspaces(&self) -> Result<Vec<String>, StoreError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Rejects blank workspace ids before they reach a backend.
///
/// # Errors
///
/// Returns `StoreError::InvalidArgument` describing the offending argument.
pub fn require_workspace_id(workspace_id: &str) -> Result<(), StoreError> {
    if workspace_id.trim().is_empty() {
        return Err(StoreError::invalid_argument("workspace id is blank"));
    }
    Ok(())
}

/// Rejects blank rule ids before they reach a backend.
///
/// # Errors
///
/// Returns `StoreError::InvalidArgument` describing the offending argument.
pub fn require_rule_id(rule_id: &str) -> Result<(), StoreError> {
    if rule_id.trim().is_empty() {
        return Err(StoreError::invalid_argument("rule id is blank"));
    }
    Ok(())
}
