//! Save-time rule validation.
//!
//! Enum-typed fields already reject unknown variants at deserialization;
//! what is left here are the structural checks: required fields, length
//! limits and per-action argument contracts. Nothing invalid reaches a
//! store.

use crate::error::CoreError;
use crate::rule::{Action, ActionType, Condition, HttpMethod, Rule};

/// Longest accepted rule name.
pub const MAX_NAME_LEN: usize = 100;
/// Longest accepted condition value (single value or list element).
pub const MAX_VALUE_LEN: usize = 1000;
/// Longest accepted condition path.
pub const MAX_PATH_LEN: usize = 500;
/// Longest accepted action argument value.
pub const MAX_ARG_VALUE_LEN: usize = 10_000;
/// Inclusive priority bounds.
pub const PRIORITY_MIN: i32 = -100;
/// Inclusive priority bounds.
pub const PRIORITY_MAX: i32 = 100;

/// Validates a rule before persistence.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRule`] describing the first failed check.
pub fn validate_rule(rule: &Rule) -> Result<(), CoreError> {
    if rule.name.trim().is_empty() {
        return Err(CoreError::invalid_rule("Rule name cannot be empty"));
    }
    if rule.name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::invalid_rule(format!(
            "Rule name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if rule.priority < PRIORITY_MIN || rule.priority > PRIORITY_MAX {
        return Err(CoreError::invalid_rule(format!(
            "Priority must be between {PRIORITY_MIN} and {PRIORITY_MAX}"
        )));
    }
    if let Some(trigger) = &rule.trigger
        && let Some(event) = &trigger.event
        && event.trim().is_empty()
    {
        return Err(CoreError::invalid_rule("Trigger event cannot be blank"));
    }

    for condition in &rule.conditions {
        validate_condition(condition)?;
    }
    for action in &rule.actions {
        validate_action(action)?;
    }
    Ok(())
}

fn validate_condition(condition: &Condition) -> Result<(), CoreError> {
    if let Some(value) = &condition.value
        && value.chars().count() > MAX_VALUE_LEN
    {
        return Err(CoreError::invalid_rule("Condition value too long"));
    }
    if let Some(values) = &condition.values {
        for value in values {
            if value.chars().count() > MAX_VALUE_LEN {
                return Err(CoreError::invalid_rule("Condition value in list too long"));
            }
        }
    }

    match &condition.path {
        Some(path) => {
            if path.chars().count() > MAX_PATH_LEN {
                return Err(CoreError::invalid_rule("Condition path too long"));
            }
            if condition.condition_type.requires_path() && path.trim().is_empty() {
                return Err(CoreError::invalid_rule(format!(
                    "Condition type {} requires a path",
                    condition.condition_type.as_str()
                )));
            }
            check_key_safety(path, "condition path")?;
        }
        None => {
            if condition.condition_type.requires_path() {
                return Err(CoreError::invalid_rule(format!(
                    "Condition type {} requires a path",
                    condition.condition_type.as_str()
                )));
            }
        }
    }
    Ok(())
}

fn validate_action(action: &Action) -> Result<(), CoreError> {
    for (key, value) in &action.args {
        check_key_safety(key, "action argument key")?;
        if value.chars().count() > MAX_ARG_VALUE_LEN {
            return Err(CoreError::invalid_rule(format!(
                "Action value too long: {key}"
            )));
        }
    }

    let required: &[&str] = match action.action_type {
        ActionType::AddTag | ActionType::RemoveTag => &["tag", "name", "id"],
        ActionType::SetDescription => &["description", "value"],
        ActionType::SetBillable => &["billable", "value"],
        ActionType::SetProjectById => &["projectId", "id"],
        ActionType::SetProjectByName | ActionType::SetTaskByName => &["name"],
        ActionType::SetTaskById => &["taskId", "id"],
        ActionType::OpenapiCall => &[],
    };
    if !required.is_empty() && action.arg(required).is_none() {
        return Err(CoreError::invalid_rule(format!(
            "Action {} requires one of: {}",
            action.action_type.as_str(),
            required.join(", ")
        )));
    }

    if action.action_type == ActionType::OpenapiCall {
        let method = action
            .arg(&["method"])
            .ok_or_else(|| CoreError::invalid_rule("openapi_call requires a method"))?;
        if HttpMethod::parse(method).is_none() {
            return Err(CoreError::invalid_rule(
                "openapi_call method must be one of GET, POST, PUT, PATCH, DELETE",
            ));
        }
        if action.arg(&["path"]).is_none() {
            return Err(CoreError::invalid_rule("openapi_call requires a path"));
        }
        if let Some(body) = action.arg(&["body"])
            && serde_json::from_str::<serde_json::Value>(body).is_err()
        {
            return Err(CoreError::invalid_rule(
                "openapi_call body must be a JSON template",
            ));
        }
    }
    Ok(())
}

// Path traversal characters have no legitimate use in payload field names or
// argument keys.
fn check_key_safety(key: &str, what: &str) -> Result<(), CoreError> {
    if key.contains("..") || key.contains('/') || key.contains('\\') {
        return Err(CoreError::invalid_rule(format!("Invalid {what}: {key}")));
    }
    Ok(())
}
