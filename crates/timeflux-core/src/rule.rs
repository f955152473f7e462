//! Rule data model: one automation = trigger + conditions + actions.
//!
//! All wire names match the stored JSON documents, so previously persisted
//! rules keep deserializing as fields are added (`#[serde(default)]` on
//! everything optional).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// AND/OR aggregation policy across a rule's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    /// All conditions must match.
    #[default]
    And,
    /// At least one condition must match.
    Or,
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Comparison operator applied by a condition.
///
/// The condition type picks the positive test; `NOT_*` variants are its
/// logical complement, and `IN`/`NOT_IN` run the same test against a value
/// set instead of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
    Contains,
    NotContains,
    In,
    NotIn,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
        }
    }

    /// True for `NOT_EQUALS`, `NOT_CONTAINS` and `NOT_IN`.
    pub fn is_negated(&self) -> bool {
        matches!(self, Self::NotEquals | Self::NotContains | Self::NotIn)
    }

    /// True when the positive test runs against a value set.
    pub fn is_set(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

/// What a condition tests. Closed set: unknown strings fail deserialization,
/// which surfaces as a validation error before anything is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    DescriptionContains,
    DescriptionEquals,
    HasTag,
    ProjectIdEquals,
    ProjectNameContains,
    ClientIdEquals,
    ClientNameContains,
    IsBillable,
    JsonPathContains,
    JsonPathEquals,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DescriptionContains => "descriptionContains",
            Self::DescriptionEquals => "descriptionEquals",
            Self::HasTag => "hasTag",
            Self::ProjectIdEquals => "projectIdEquals",
            Self::ProjectNameContains => "projectNameContains",
            Self::ClientIdEquals => "clientIdEquals",
            Self::ClientNameContains => "clientNameContains",
            Self::IsBillable => "isBillable",
            Self::JsonPathContains => "jsonPathContains",
            Self::JsonPathEquals => "jsonPathEquals",
        }
    }

    /// True for condition types that read a caller-supplied dotted path.
    pub fn requires_path(&self) -> bool {
        matches!(self, Self::JsonPathContains | Self::JsonPathEquals)
    }
}

/// One predicate inside a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// What to test.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// How to compare; defaults to `EQUALS`.
    #[serde(default)]
    pub operator: Operator,
    /// Dotted field path into the event payload, for `jsonPath*` types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Single comparison value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Value set for `IN`/`NOT_IN`; comma-split `value` is the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl Condition {
    /// Shorthand used by tests and rule builders.
    pub fn new(condition_type: ConditionType, value: impl Into<String>) -> Self {
        Self {
            condition_type,
            operator: Operator::default(),
            path: None,
            value: Some(value.into()),
            values: None,
        }
    }

    /// The values the positive test runs against.
    ///
    /// `IN`/`NOT_IN` use the `values` list when present, otherwise the
    /// comma-split `value`; all other operators use `value` literally. An
    /// empty result marks the condition as malformed.
    pub fn candidate_values(&self) -> Vec<String> {
        if self.operator.is_set() {
            if let Some(values) = &self.values
                && !values.is_empty()
            {
                return values
                    .iter()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
            }
            return self
                .value
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
        }
        match self.value.as_deref() {
            Some(v) => vec![v.to_string()],
            None => Vec::new(),
        }
    }
}

/// What a matched rule does. Closed set, like [`ConditionType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddTag,
    RemoveTag,
    SetDescription,
    SetBillable,
    SetProjectById,
    SetProjectByName,
    SetTaskById,
    SetTaskByName,
    OpenapiCall,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::SetDescription => "set_description",
            Self::SetBillable => "set_billable",
            Self::SetProjectById => "set_project_by_id",
            Self::SetProjectByName => "set_project_by_name",
            Self::SetTaskById => "set_task_by_id",
            Self::SetTaskByName => "set_task_by_name",
            Self::OpenapiCall => "openapi_call",
        }
    }
}

/// One side effect of a matched rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// What to do.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Type-specific arguments; required keys depend on `action_type`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl Action {
    /// Shorthand used by tests and rule builders.
    pub fn new<I, K, V>(action_type: ActionType, args: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            action_type,
            args: args
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First non-blank argument among the given key aliases.
    pub fn arg(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.args.get(*k))
            .map(String::as_str)
            .find(|v| !v.trim().is_empty())
    }
}

/// HTTP method accepted by `openapi_call` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a method name, case-insensitive, ignoring surrounding blanks.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// True for methods that change state on the target.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

/// Event filter attached to a rule. A rule without a trigger, or with a
/// trigger that names no event, applies to every event type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleTrigger {
    /// Event type this rule listens for (e.g. `TIME_ENTRY_UPDATED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// One automation: conditions joined by a combinator, plus the actions to run
/// when they match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique within a workspace; assigned on first save when empty.
    #[serde(default)]
    pub id: String,
    /// Human-readable name, required.
    pub name: String,
    /// Disabled rules are never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How conditions combine; defaults to `AND`.
    #[serde(default)]
    pub combinator: Combinator,
    /// Ordered predicates; empty means the rule always matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Ordered side effects; empty rules are evaluable but inert.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    /// Optional event filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RuleTrigger>,
    /// Execution priority, higher first; validation clamps to [-100, 100].
    #[serde(default)]
    pub priority: i32,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Creates an enabled rule with a fresh id and no conditions or actions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            combinator: Combinator::default(),
            conditions: Vec::new(),
            actions: Vec::new(),
            trigger: None,
            priority: 0,
        }
    }

    /// Assigns a fresh UUID when the caller did not supply an id.
    pub fn ensure_id(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }

    /// True when this rule listens for the given event type.
    ///
    /// Rules without trigger metadata are wildcards, which keeps documents
    /// written before triggers existed working unchanged.
    pub fn applies_to_event(&self, event_type: &str) -> bool {
        match self.trigger.as_ref().and_then(|t| t.event.as_deref()) {
            Some(event) => event.eq_ignore_ascii_case(event_type),
            None => true,
        }
    }
}
