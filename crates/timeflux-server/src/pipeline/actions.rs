//! Per-rule action execution.
//!
//! Entry mutations are accumulated into one patch and flushed with a single
//! update call when the rule finishes, so a rule with three entry edits
//! costs one provider round trip. `openapi_call` actions fire individually.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use timeflux_core::{Action, ActionType, EventContext, HttpMethod, Rule, placeholder};
use timeflux_gateway::DynApiGateway;
use tracing::{debug, warn};

use super::report::{ActionOutcome, ActionReport, RuleReport};
use crate::cache::ReferenceCache;

/// The time entry as this invocation currently understands it: seeded from
/// the event payload, updated after each rule's patch lands, so later rules
/// see what earlier rules changed.
#[derive(Debug, Clone, Default)]
pub struct EntryState {
    pub entry_id: Option<String>,
    pub description: String,
    pub billable: bool,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub tag_ids: Vec<String>,
}

impl EntryState {
    pub fn from_context(context: &EventContext) -> Self {
        Self {
            entry_id: context.entry_id().map(str::to_string),
            description: context.description().to_string(),
            billable: context.billable(),
            project_id: context.project_id().map(str::to_string),
            task_id: context
                .entry()
                .get("taskId")
                .and_then(Value::as_str)
                .map(str::to_string),
            tag_ids: context.tag_ids().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Pending entry changes for one rule, flushed as a single update.
#[derive(Debug, Default)]
struct EntryPatch {
    description: Option<String>,
    billable: Option<bool>,
    project_id: Option<String>,
    task_id: Option<String>,
    tag_ids: Option<Vec<String>>,
    /// Indexes of the action reports whose `Applied` outcome depends on
    /// this patch landing.
    contributors: Vec<usize>,
}

impl EntryPatch {
    fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.billable.is_none()
            && self.project_id.is_none()
            && self.task_id.is_none()
            && self.tag_ids.is_none()
    }

    fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(billable) = self.billable {
            map.insert("billable".into(), Value::Bool(billable));
        }
        if let Some(project_id) = &self.project_id {
            map.insert("projectId".into(), Value::String(project_id.clone()));
        }
        if let Some(task_id) = &self.task_id {
            map.insert("taskId".into(), Value::String(task_id.clone()));
        }
        if let Some(tag_ids) = &self.tag_ids {
            map.insert(
                "tagIds".into(),
                Value::Array(tag_ids.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }

    fn commit(self, state: &mut EntryState) {
        if let Some(description) = self.description {
            state.description = description;
        }
        if let Some(billable) = self.billable {
            state.billable = billable;
        }
        if let Some(project_id) = self.project_id {
            state.project_id = Some(project_id);
        }
        if let Some(task_id) = self.task_id {
            state.task_id = Some(task_id);
        }
        if let Some(tag_ids) = self.tag_ids {
            state.tag_ids = tag_ids;
        }
    }

    /// The tag set as it stands mid-rule: staged tags when an earlier
    /// action touched them, the entry's tags otherwise.
    fn working_tags<'a>(&'a self, state: &'a EntryState) -> &'a [String] {
        match &self.tag_ids {
            Some(tags) => tags,
            None => &state.tag_ids,
        }
    }
}

/// Everything an action handler needs, bundled to keep signatures flat.
struct ActionCx<'a> {
    context: &'a EventContext,
    references: &'a Arc<ReferenceCache>,
    gateway: &'a DynApiGateway,
    dry_run: bool,
}

/// Runs one matched rule's actions against the current entry state.
///
/// Failures are recorded per action; when `stop_on_failure` is set the
/// remaining actions are skipped. The staged patch is flushed even after
/// an abort, so the actions that did succeed still land.
pub async fn execute_rule(
    rule: &Rule,
    context: &EventContext,
    state: &mut EntryState,
    references: &Arc<ReferenceCache>,
    gateway: &DynApiGateway,
    dry_run: bool,
    stop_on_failure: bool,
) -> RuleReport {
    let cx = ActionCx {
        context,
        references,
        gateway,
        dry_run,
    };
    let mut patch = EntryPatch::default();
    let mut reports: Vec<ActionReport> = Vec::with_capacity(rule.actions.len());
    let mut aborted = false;

    for action in &rule.actions {
        if aborted {
            reports.push(ActionReport {
                action_type: action.action_type,
                resolved_args: action.args.clone(),
                outcome: ActionOutcome::Skipped,
                error: Some("skipped after an earlier action failed".into()),
            });
            continue;
        }

        let report_index = reports.len();
        let (resolved_args, result) = apply_action(&cx, action, state, &mut patch).await;
        match result {
            Ok(outcome) => {
                if outcome == ActionOutcome::Applied && is_entry_mutation(action.action_type) {
                    patch.contributors.push(report_index);
                }
                reports.push(ActionReport {
                    action_type: action.action_type,
                    resolved_args,
                    outcome,
                    error: None,
                });
            }
            Err(message) => {
                warn!(
                    rule_id = %rule.id,
                    action = action.action_type.as_str(),
                    error = %message,
                    "Action failed"
                );
                reports.push(ActionReport {
                    action_type: action.action_type,
                    resolved_args,
                    outcome: ActionOutcome::Failed,
                    error: Some(message),
                });
                if stop_on_failure {
                    aborted = true;
                }
            }
        }
    }

    if !patch.is_empty() {
        if dry_run {
            patch.commit(state);
        } else if let Some(entry_id) = state.entry_id.clone() {
            let body = patch.to_json();
            match gateway
                .update_time_entry(context.workspace_id(), &entry_id, &body)
                .await
            {
                Ok(_) => {
                    debug!(rule_id = %rule.id, entry_id = %entry_id, "Time entry updated");
                    patch.commit(state);
                }
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        entry_id = %entry_id,
                        error = %e,
                        "Time entry update failed"
                    );
                    let message = e.to_string();
                    for index in &patch.contributors {
                        if let Some(report) = reports.get_mut(*index) {
                            report.outcome = ActionOutcome::Failed;
                            report.error = Some(message.clone());
                        }
                    }
                }
            }
        }
    }

    RuleReport {
        rule_id: rule.id.clone(),
        name: rule.name.clone(),
        matched: true,
        actions: reports,
    }
}

/// Dispatches one action. Returns the resolved arguments alongside the
/// outcome so failures still report what was attempted.
async fn apply_action(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
) -> (BTreeMap<String, String>, Result<ActionOutcome, String>) {
    let mut resolved = action.args.clone();
    if is_entry_mutation(action.action_type) && state.entry_id.is_none() {
        return (resolved, Err("event carries no time entry id".into()));
    }

    let result = match action.action_type {
        ActionType::AddTag => add_tag(cx, action, state, patch, &mut resolved).await,
        ActionType::RemoveTag => remove_tag(cx, action, state, patch, &mut resolved).await,
        ActionType::SetDescription => set_description(cx, action, state, patch, &mut resolved),
        ActionType::SetBillable => set_billable(cx, action, state, patch, &mut resolved),
        ActionType::SetProjectById => set_project_by_id(cx, action, state, patch, &mut resolved),
        ActionType::SetProjectByName => {
            set_project_by_name(cx, action, state, patch, &mut resolved).await
        }
        ActionType::SetTaskById => set_task_by_id(cx, action, state, patch, &mut resolved),
        ActionType::SetTaskByName => {
            set_task_by_name(cx, action, state, patch, &mut resolved).await
        }
        ActionType::OpenapiCall => openapi_call(cx, action, &mut resolved).await,
    };
    (resolved, result)
}

async fn add_tag(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    if let Some(id) = action.arg(&["id"]) {
        return Ok(stage_tag_add(patch, state, id, cx.dry_run));
    }
    let name = action
        .arg(&["tag", "name"])
        .ok_or("add_tag needs a tag name or id argument")?;

    let snapshot = match cx.references.get(cx.context.workspace_id()).await {
        Ok(snapshot) => snapshot,
        // Dry runs have no reference data to resolve against when the
        // provider is unreachable; claim the optimistic outcome.
        Err(_) if cx.dry_run => return Ok(ActionOutcome::WouldApply),
        Err(e) => return Err(format!("reference lookup failed: {e}")),
    };

    match snapshot.tag_id(name).map(str::to_string) {
        Some(id) => {
            resolved.insert("tagId".into(), id.clone());
            Ok(stage_tag_add(patch, state, &id, cx.dry_run))
        }
        // The live run would create the missing tag first.
        None if cx.dry_run => Ok(ActionOutcome::WouldApply),
        None => {
            let created = cx
                .gateway
                .create_tag(cx.context.workspace_id(), name)
                .await
                .map_err(|e| format!("tag create failed: {e}"))?;
            let id = created
                .get("id")
                .and_then(Value::as_str)
                .ok_or("tag create response has no id")?
                .to_string();
            debug!(
                workspace_id = %cx.context.workspace_id(),
                tag = %name,
                tag_id = %id,
                "Tag created"
            );
            cx.references.refresh_async(cx.context.workspace_id());
            resolved.insert("tagId".into(), id.clone());
            Ok(stage_tag_add(patch, state, &id, cx.dry_run))
        }
    }
}

async fn remove_tag(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let id = match action.arg(&["id"]) {
        Some(id) => Some(id.to_string()),
        None => {
            let name = action
                .arg(&["tag", "name"])
                .ok_or("remove_tag needs a tag name or id argument")?;
            let snapshot = match cx.references.get(cx.context.workspace_id()).await {
                Ok(snapshot) => snapshot,
                Err(_) if cx.dry_run => return Ok(ActionOutcome::WouldApply),
                Err(e) => return Err(format!("reference lookup failed: {e}")),
            };
            match snapshot.tag_id(name).map(str::to_string) {
                Some(id) => {
                    resolved.insert("tagId".into(), id.clone());
                    Some(id)
                }
                // Unknown tag name: nothing to remove.
                None => None,
            }
        }
    };
    match id {
        Some(id) => Ok(stage_tag_remove(patch, state, &id, cx.dry_run)),
        None => Ok(ActionOutcome::Skipped),
    }
}

fn set_description(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let template = action
        .arg(&["description", "value"])
        .ok_or("set_description needs a description argument")?;
    let rendered = placeholder::resolve(template, cx.context.payload());
    resolved.insert("description".into(), rendered.clone());

    let current = patch.description.as_deref().unwrap_or(&state.description);
    if current == rendered {
        return Ok(ActionOutcome::Skipped);
    }
    patch.description = Some(rendered);
    Ok(staged(cx.dry_run))
}

fn set_billable(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let raw = action
        .arg(&["billable", "value"])
        .ok_or("set_billable needs a billable argument")?;
    let desired = parse_bool_flag(raw);
    resolved.insert("billable".into(), desired.to_string());

    let current = patch.billable.unwrap_or(state.billable);
    if current == desired {
        return Ok(ActionOutcome::Skipped);
    }
    patch.billable = Some(desired);
    Ok(staged(cx.dry_run))
}

fn set_project_by_id(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let id = action
        .arg(&["projectId", "id"])
        .ok_or("set_project_by_id needs a projectId argument")?;
    resolved.insert("projectId".into(), id.to_string());

    let current = patch.project_id.as_deref().or(state.project_id.as_deref());
    if current == Some(id) {
        return Ok(ActionOutcome::Skipped);
    }
    patch.project_id = Some(id.to_string());
    Ok(staged(cx.dry_run))
}

async fn set_project_by_name(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let name = action
        .arg(&["name"])
        .ok_or("set_project_by_name needs a name argument")?;
    let snapshot = match cx.references.get(cx.context.workspace_id()).await {
        Ok(snapshot) => snapshot,
        Err(_) if cx.dry_run => return Ok(ActionOutcome::WouldApply),
        Err(e) => return Err(format!("reference lookup failed: {e}")),
    };
    // Unlike tags, projects are never auto-created; an unknown name is a
    // rule authoring error and fails in both modes.
    let id = snapshot
        .project_id(name)
        .map(str::to_string)
        .ok_or_else(|| format!("project not found: {name}"))?;
    resolved.insert("projectId".into(), id.clone());

    let current = patch.project_id.as_deref().or(state.project_id.as_deref());
    if current == Some(id.as_str()) {
        return Ok(ActionOutcome::Skipped);
    }
    patch.project_id = Some(id);
    Ok(staged(cx.dry_run))
}

fn set_task_by_id(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let id = action
        .arg(&["taskId", "id"])
        .ok_or("set_task_by_id needs a taskId argument")?;
    resolved.insert("taskId".into(), id.to_string());

    let current = patch.task_id.as_deref().or(state.task_id.as_deref());
    if current == Some(id) {
        return Ok(ActionOutcome::Skipped);
    }
    patch.task_id = Some(id.to_string());
    Ok(staged(cx.dry_run))
}

async fn set_task_by_name(
    cx: &ActionCx<'_>,
    action: &Action,
    state: &EntryState,
    patch: &mut EntryPatch,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let name = action
        .arg(&["name"])
        .ok_or("set_task_by_name needs a name argument")?;
    let snapshot = match cx.references.get(cx.context.workspace_id()).await {
        Ok(snapshot) => snapshot,
        Err(_) if cx.dry_run => return Ok(ActionOutcome::WouldApply),
        Err(e) => return Err(format!("reference lookup failed: {e}")),
    };

    // Prefer the entry's project (or the one staged by an earlier action);
    // fall back to a cross-project scan.
    let scope = patch.project_id.clone().or_else(|| state.project_id.clone());
    let located = match scope.as_deref() {
        Some(project_id) => snapshot
            .task_id(project_id, name)
            .map(|task_id| (project_id.to_string(), task_id.to_string()))
            .or_else(|| owned_task_match(&snapshot, name)),
        None => owned_task_match(&snapshot, name),
    };
    let (project_id, task_id) = located.ok_or_else(|| format!("task not found: {name}"))?;
    resolved.insert("taskId".into(), task_id.clone());

    // A task can only be assigned together with its project.
    if scope.as_deref() != Some(project_id.as_str()) {
        resolved.insert("projectId".into(), project_id.clone());
        patch.project_id = Some(project_id);
    }

    let current = patch.task_id.as_deref().or(state.task_id.as_deref());
    if current == Some(task_id.as_str()) {
        return Ok(ActionOutcome::Skipped);
    }
    patch.task_id = Some(task_id);
    Ok(staged(cx.dry_run))
}

fn owned_task_match(
    snapshot: &crate::cache::WorkspaceSnapshot,
    name: &str,
) -> Option<(String, String)> {
    snapshot
        .task_id_any_project(name)
        .map(|(project_id, task_id)| (project_id.to_string(), task_id.to_string()))
}

async fn openapi_call(
    cx: &ActionCx<'_>,
    action: &Action,
    resolved: &mut BTreeMap<String, String>,
) -> Result<ActionOutcome, String> {
    let method_raw = action
        .arg(&["method"])
        .ok_or("openapi_call needs a method argument")?;
    let method = HttpMethod::parse(method_raw)
        .ok_or_else(|| format!("unsupported HTTP method: {method_raw}"))?;
    let template = action
        .arg(&["path"])
        .ok_or("openapi_call needs a path argument")?;
    let path = placeholder::resolve_for_path(template, cx.context.payload());
    resolved.insert("path".into(), path.clone());

    let body = match action.arg(&["body"]) {
        Some(raw) => {
            let template: Value =
                serde_json::from_str(raw).map_err(|e| format!("body is not valid JSON: {e}"))?;
            let rendered = placeholder::resolve_in_json(&template, cx.context.payload());
            resolved.insert("body".into(), rendered.to_string());
            Some(rendered)
        }
        None => None,
    };

    // Dry runs issue no provider calls at all, GET included.
    if cx.dry_run {
        return Ok(ActionOutcome::WouldApply);
    }

    let status = cx
        .gateway
        .openapi_call(cx.context.workspace_id(), method, &path, body.as_ref())
        .await
        .map_err(|e| format!("API call failed: {e}"))?;
    resolved.insert("status".into(), status.to_string());
    Ok(ActionOutcome::Applied)
}

fn stage_tag_add(
    patch: &mut EntryPatch,
    state: &EntryState,
    tag_id: &str,
    dry_run: bool,
) -> ActionOutcome {
    let working = patch.working_tags(state);
    if working.iter().any(|t| t == tag_id) {
        return ActionOutcome::Skipped;
    }
    let mut tags = working.to_vec();
    tags.push(tag_id.to_string());
    patch.tag_ids = Some(tags);
    staged(dry_run)
}

fn stage_tag_remove(
    patch: &mut EntryPatch,
    state: &EntryState,
    tag_id: &str,
    dry_run: bool,
) -> ActionOutcome {
    let working = patch.working_tags(state);
    if !working.iter().any(|t| t == tag_id) {
        return ActionOutcome::Skipped;
    }
    let tags: Vec<String> = working
        .iter()
        .filter(|t| t.as_str() != tag_id)
        .cloned()
        .collect();
    patch.tag_ids = Some(tags);
    staged(dry_run)
}

fn staged(dry_run: bool) -> ActionOutcome {
    if dry_run {
        ActionOutcome::WouldApply
    } else {
        ActionOutcome::Applied
    }
}

fn parse_bool_flag(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.eq_ignore_ascii_case("true") || trimmed == "1"
}

fn is_entry_mutation(action_type: ActionType) -> bool {
    !matches!(action_type, ActionType::OpenapiCall)
}
