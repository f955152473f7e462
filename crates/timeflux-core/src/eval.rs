//! Condition evaluation: pure decision logic over one event context.
//!
//! Malformed condition data (missing value, missing path) degrades to a
//! non-match without operator negation, so a broken rule stays inert instead
//! of firing on everything through a `NOT_*` operator. Missing *payload*
//! fields, by contrast, fail the positive test and then negate normally.

use crate::context::{EventContext, scalar_to_string};
use crate::rule::{Combinator, Condition, ConditionType, Operator, Rule};

/// Decides whether `rule` matches `context`.
///
/// An empty condition list matches vacuously, which is what makes pure
/// trigger rules (event filter only, no payload predicate) work.
pub fn evaluate(rule: &Rule, context: &EventContext) -> bool {
    if rule.conditions.is_empty() {
        return true;
    }

    let is_and = rule.combinator == Combinator::And;
    for condition in &rule.conditions {
        let matched = evaluate_condition(condition, context);
        if is_and && !matched {
            // AND: fail fast on the first miss
            return false;
        }
        if !is_and && matched {
            // OR: succeed fast on the first hit
            return true;
        }
    }
    is_and
}

fn evaluate_condition(condition: &Condition, context: &EventContext) -> bool {
    match positive_outcome(condition, context) {
        Some(hit) => apply_operator(condition.operator, hit),
        // Malformed condition: absolute non-match, never negated.
        None => false,
    }
}

/// Runs the condition's positive test; `None` marks the condition itself as
/// malformed.
fn positive_outcome(condition: &Condition, context: &EventContext) -> Option<bool> {
    let candidates = condition.candidate_values();
    if candidates.is_empty() {
        return None;
    }

    let hit = match condition.condition_type {
        ConditionType::DescriptionContains => {
            any(&candidates, |v| contains_ci(context.description(), v))
        }
        ConditionType::DescriptionEquals => {
            any(&candidates, |v| equals_ci(context.description(), v))
        }
        ConditionType::HasTag => {
            let tag_ids = context.tag_ids();
            let tag_names = context.tag_names();
            any(&candidates, |v| {
                tag_ids.iter().any(|id| *id == v)
                    || tag_names.iter().any(|name| equals_ci(name, v))
            })
        }
        ConditionType::ProjectIdEquals => match context.project_id() {
            Some(id) => any(&candidates, |v| id == v),
            None => false,
        },
        ConditionType::ProjectNameContains => match context.project_name() {
            Some(name) => any(&candidates, |v| contains_ci(name, v)),
            None => false,
        },
        ConditionType::ClientIdEquals => match context.client_id() {
            Some(id) => any(&candidates, |v| id == v),
            None => false,
        },
        ConditionType::ClientNameContains => match context.client_name() {
            Some(name) => any(&candidates, |v| contains_ci(name, v)),
            None => false,
        },
        ConditionType::IsBillable => {
            any(&candidates, |v| context.billable() == parse_bool(v))
        }
        ConditionType::JsonPathContains => {
            let path = non_blank(condition.path.as_deref())?;
            match field_at(context, path) {
                Some(field) => any(&candidates, |v| contains_ci(&field, v)),
                None => false,
            }
        }
        ConditionType::JsonPathEquals => {
            let path = non_blank(condition.path.as_deref())?;
            match field_at(context, path) {
                Some(field) => any(&candidates, |v| field.trim() == v.trim()),
                None => false,
            }
        }
    };
    Some(hit)
}

fn apply_operator(operator: Operator, hit: bool) -> bool {
    if operator.is_negated() { !hit } else { hit }
}

fn field_at(context: &EventContext, path: &str) -> Option<String> {
    context.lookup_path(path).and_then(scalar_to_string)
}

fn any(candidates: &[String], test: impl Fn(&str) -> bool) -> bool {
    candidates.iter().any(|v| test(v))
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn equals_ci(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true") || value.trim() == "1"
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
