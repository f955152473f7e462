//! REST handlers: webhook intake, rule CRUD, dry-run testing and cache
//! administration.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use timeflux_api::ApiError;
use timeflux_core::{Rule, validate_rule};
use tracing::info;

use crate::pipeline::{ExecutionReport, PipelineError};
use crate::server::AppState;

// ===== Request types =====

#[derive(Debug, Deserialize)]
pub struct WorkspaceQuery {
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRulesQuery {
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    /// When present, delete one rule; otherwise clear the workspace.
    #[serde(rename = "ruleId")]
    pub rule_id: Option<String>,
}

// ===== Handlers =====

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// `POST /webhook`. The provider addresses the workspace inside the
/// payload, not the URL.
pub async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<ExecutionReport>, ApiError> {
    let workspace_id = payload
        .get("workspaceId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|ws| !ws.is_empty())
        .ok_or_else(|| ApiError::bad_request("webhook payload has no workspaceId"))?
        .to_string();
    // Deliveries without an event type still evaluate; only rules with an
    // event trigger skip them.
    let event_type = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let report = state
        .pipeline
        .handle_event(&workspace_id, &event_type, payload)
        .await
        .map_err(map_pipeline_error)?;
    Ok(Json(report))
}

/// `POST /api/test`: evaluates a payload against the workspace's rules
/// without issuing any provider calls.
pub async fn test_rules(
    State(state): State<AppState>,
    Query(query): Query<WorkspaceQuery>,
    Json(payload): Json<Value>,
) -> Result<Json<ExecutionReport>, ApiError> {
    let workspace_id = require_workspace(&query.workspace_id)?;
    let event_type = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let report = state
        .pipeline
        .dry_run(workspace_id, &event_type, payload)
        .await
        .map_err(map_pipeline_error)?;
    Ok(Json(report))
}

pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<Vec<Rule>>, ApiError> {
    let rules = state.store.get_all(&query.workspace_id).await?;
    Ok(Json(rules))
}

/// `POST /api/rules`: validates, persists and returns the stored rule
/// (with its assigned id).
pub async fn save_rule(
    State(state): State<AppState>,
    Query(query): Query<WorkspaceQuery>,
    Json(body): Json<Value>,
) -> Result<Json<Rule>, ApiError> {
    let rule: Rule = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid rule: {e}")))?;
    validate_rule(&rule)?;
    let saved = state.store.save(&query.workspace_id, rule).await?;
    state.rules_cache.invalidate(&query.workspace_id);
    info!(
        workspace_id = %query.workspace_id,
        rule_id = %saved.id,
        name = %saved.name,
        "Rule saved"
    );
    Ok(Json(saved))
}

/// `DELETE /api/rules`: one rule when `ruleId` is given, the whole
/// workspace otherwise.
pub async fn delete_rules(
    State(state): State<AppState>,
    Query(query): Query<DeleteRulesQuery>,
) -> Result<Response, ApiError> {
    match &query.rule_id {
        Some(rule_id) => {
            let removed = state.store.delete(&query.workspace_id, rule_id).await?;
            if !removed {
                return Err(ApiError::not_found(format!("rule {rule_id} not found")));
            }
            state.rules_cache.invalidate(&query.workspace_id);
            info!(workspace_id = %query.workspace_id, rule_id = %rule_id, "Rule deleted");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        None => {
            let deleted = state.store.delete_all(&query.workspace_id).await?;
            state.rules_cache.invalidate(&query.workspace_id);
            info!(workspace_id = %query.workspace_id, deleted, "Workspace rules cleared");
            Ok(Json(json!({"deleted": deleted})).into_response())
        }
    }
}

/// `POST /api/cache/refresh`: rebuilds the reference snapshot now and
/// reports what it holds.
pub async fn refresh_cache(
    State(state): State<AppState>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<Value>, ApiError> {
    let workspace_id = require_workspace(&query.workspace_id)?;
    let snapshot = state.reference_cache.refresh(workspace_id).await?;
    info!(workspace_id = %workspace_id, "Reference cache refreshed");
    Ok(Json(json!({
        "workspaceId": workspace_id,
        "refreshedAt": snapshot.refreshed_at_rfc3339(),
        "counts": snapshot.counts(),
    })))
}

/// `GET /api/cache/status`: inspects the snapshot without refreshing it.
pub async fn cache_status(
    State(state): State<AppState>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<Value>, ApiError> {
    let workspace_id = require_workspace(&query.workspace_id)?;
    let body = match state.reference_cache.peek(workspace_id) {
        Some(snapshot) => json!({
            "workspaceId": workspace_id,
            "cached": true,
            "ageSeconds": snapshot.age().as_secs(),
            "refreshedAt": snapshot.refreshed_at_rfc3339(),
            "counts": snapshot.counts(),
        }),
        None => json!({
            "workspaceId": workspace_id,
            "cached": false,
        }),
    };
    Ok(Json(body))
}

// ===== Routing =====

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route(
            "/api/rules",
            get(list_rules).post(save_rule).delete(delete_rules),
        )
        .route("/api/test", post(test_rules))
        .route("/api/cache/refresh", post(refresh_cache))
        .route("/api/cache/status", get(cache_status))
}

fn require_workspace(workspace_id: &str) -> Result<&str, ApiError> {
    let trimmed = workspace_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("workspaceId must not be blank"));
    }
    Ok(trimmed)
}

fn map_pipeline_error(error: PipelineError) -> ApiError {
    match error {
        PipelineError::Store(e) => e.into(),
        missing_token @ PipelineError::MissingToken { .. } => {
            ApiError::precondition_failed(missing_token.to_string())
        }
    }
}
