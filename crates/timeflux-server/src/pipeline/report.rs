//! Execution result types returned by the webhook and test endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use timeflux_core::{ActionType, EventContext, Rule};

/// Overall outcome of one webhook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// At least one rule matched and live actions ran.
    Applied,
    /// No rule matched; nothing to do.
    NoMatch,
    /// The delivery was already processed; nothing ran.
    Duplicate,
    /// Actions exceeded the inline threshold and run in the background.
    Scheduled,
    /// Dry-run evaluation; no side effects were issued.
    DryRun,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::NoMatch => "no_match",
            Self::Duplicate => "duplicate",
            Self::Scheduled => "scheduled",
            Self::DryRun => "dry_run",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one action within a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The side effect was issued and accepted.
    Applied,
    /// Dry run: the action resolved and would have been issued.
    WouldApply,
    /// Nothing to do (already in the desired state) or aborted by an
    /// earlier failure.
    Skipped,
    /// The action could not resolve its arguments or the provider
    /// rejected it.
    Failed,
    /// Deferred to a background task; the outcome is logged there.
    Scheduled,
}

/// One action's report: what ran, with which resolved arguments, and how
/// it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Arguments after placeholder and name resolution. Keys mirror the
    /// action's argument names plus any ids resolved from names.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolved_args: BTreeMap<String, String>,
    pub outcome: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One rule's evaluation and execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleReport {
    pub rule_id: String,
    pub name: String,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionReport>,
}

impl RuleReport {
    pub fn unmatched(rule: &Rule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            matched: false,
            actions: Vec::new(),
        }
    }
}

/// Full result of one webhook invocation, serialized back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub event: String,
    pub status: ExecutionStatus,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleReport>,
    pub actions_attempted: usize,
    pub actions_applied: usize,
    pub actions_failed: usize,
}

impl ExecutionReport {
    /// Report for a suppressed duplicate delivery.
    pub fn duplicate(workspace_id: &str, event_type: &str) -> Self {
        Self {
            event: event_type.to_string(),
            status: ExecutionStatus::Duplicate,
            workspace_id: workspace_id.to_string(),
            rules: Vec::new(),
            actions_attempted: 0,
            actions_applied: 0,
            actions_failed: 0,
        }
    }

    /// Report for an invocation handed to a background task. Matched rules
    /// list their planned actions with raw arguments; counts stay zero
    /// because nothing has run yet.
    pub fn scheduled(context: &EventContext, evaluated: &[(Rule, bool)]) -> Self {
        let rules = evaluated
            .iter()
            .map(|(rule, matched)| {
                if !matched {
                    return RuleReport::unmatched(rule);
                }
                let actions = rule
                    .actions
                    .iter()
                    .map(|action| ActionReport {
                        action_type: action.action_type,
                        resolved_args: action.args.clone(),
                        outcome: ActionOutcome::Scheduled,
                        error: None,
                    })
                    .collect();
                RuleReport {
                    rule_id: rule.id.clone(),
                    name: rule.name.clone(),
                    matched: true,
                    actions,
                }
            })
            .collect();
        Self {
            event: context.event_type().to_string(),
            status: ExecutionStatus::Scheduled,
            workspace_id: context.workspace_id().to_string(),
            rules,
            actions_attempted: 0,
            actions_applied: 0,
            actions_failed: 0,
        }
    }

    /// Rolls per-rule reports into the final invocation report.
    pub fn aggregate(context: &EventContext, rules: Vec<RuleReport>, dry_run: bool) -> Self {
        let any_match = rules.iter().any(|r| r.matched);
        let mut attempted = 0;
        let mut applied = 0;
        let mut failed = 0;
        for report in rules.iter().filter(|r| r.matched) {
            for action in &report.actions {
                attempted += 1;
                match action.outcome {
                    ActionOutcome::Applied | ActionOutcome::WouldApply => applied += 1,
                    ActionOutcome::Failed => failed += 1,
                    ActionOutcome::Skipped | ActionOutcome::Scheduled => {}
                }
            }
        }

        let status = if !any_match {
            ExecutionStatus::NoMatch
        } else if dry_run {
            ExecutionStatus::DryRun
        } else {
            ExecutionStatus::Applied
        };

        Self {
            event: context.event_type().to_string(),
            status,
            workspace_id: context.workspace_id().to_string(),
            rules,
            actions_attempted: attempted,
            actions_applied: applied,
            actions_failed: failed,
        }
    }

    /// Raw JSON form, for handlers that embed the report in a response.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
