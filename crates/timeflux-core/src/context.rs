//! Decoded view of one webhook payload, scoped to a single pipeline run.

use serde_json::Value;

/// Walks `value` down a dotted path, one object field per segment.
///
/// A missing intermediate field or a non-object intermediate node yields
/// `None`; this never fails.
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.trim().split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Renders a scalar JSON value as the string the evaluator compares against.
///
/// Objects and arrays have no scalar form and yield `None`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Object(_) | Value::Array(_) => None,
    }
}

/// Queryable wrapper around one webhook event payload.
///
/// Typed accessors read from the time-entry view (the `timeEntry` sub-object
/// when the payload carries one, the payload itself otherwise); dotted-path
/// lookups walk the full payload. Never persisted; owned by one invocation.
#[derive(Debug, Clone)]
pub struct EventContext {
    workspace_id: String,
    event_type: String,
    payload: Value,
}

impl EventContext {
    pub fn new(
        workspace_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The raw event payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The time-entry view the typed accessors read from.
    pub fn entry(&self) -> &Value {
        match self.payload.get("timeEntry") {
            Some(entry) if entry.is_object() => entry,
            _ => &self.payload,
        }
    }

    /// The time entry id, when the event carries one.
    pub fn entry_id(&self) -> Option<&str> {
        self.entry().get("id").and_then(Value::as_str)
    }

    /// The entry description; empty string when absent.
    pub fn description(&self) -> &str {
        self.entry()
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn project_id(&self) -> Option<&str> {
        self.entry().get("projectId").and_then(Value::as_str)
    }

    /// The project name, from `projectName` or the embedded `project` object.
    pub fn project_name(&self) -> Option<&str> {
        self.field_or_project_field("projectName", "name")
    }

    pub fn client_id(&self) -> Option<&str> {
        self.field_or_project_field("clientId", "clientId")
    }

    pub fn client_name(&self) -> Option<&str> {
        self.field_or_project_field("clientName", "clientName")
    }

    pub fn billable(&self) -> bool {
        self.entry()
            .get("billable")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Tag ids attached to the entry.
    pub fn tag_ids(&self) -> Vec<&str> {
        self.string_array("tagIds")
    }

    /// Tag names, when the payload embeds resolved `tags` objects.
    pub fn tag_names(&self) -> Vec<&str> {
        match self.entry().get("tags") {
            Some(Value::Array(tags)) => tags
                .iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Looks up a dotted path against the full payload.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        walk_path(&self.payload, path)
    }

    fn string_array(&self, field: &str) -> Vec<&str> {
        match self.entry().get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    fn field_or_project_field(&self, field: &str, project_field: &str) -> Option<&str> {
        let entry = self.entry();
        entry
            .get(field)
            .and_then(Value::as_str)
            .or_else(|| {
                entry
                    .get("project")
                    .and_then(|p| p.get(project_field))
                    .and_then(Value::as_str)
            })
            .filter(|s| !s.is_empty())
    }
}
