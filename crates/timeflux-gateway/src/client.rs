//! HTTP client for the time-tracking provider API.
//!
//! Every call authenticates with the workspace's bearer token, retries
//! rate limits, server errors and transport failures with capped
//! exponential backoff, and list endpoints follow the provider's
//! `X-Next-Page` pagination contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode, header};
use serde_json::{Value, json};
use timeflux_core::HttpMethod;
use tracing::debug;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::token::{DynTokenStore, WorkspaceToken};
use crate::GatewayResult;

/// Page size requested from paginated list endpoints.
const PAGE_SIZE: usize = 500;
/// Total attempts per call, including the first one.
const MAX_ATTEMPTS: u32 = 4;
/// First backoff step in milliseconds; doubles per failed attempt.
const BACKOFF_BASE_MS: u64 = 250;
/// Ceiling for the computed backoff, before jitter.
const BACKOFF_CAP_MS: u64 = 2_000;
/// Ceiling for a server-supplied `Retry-After` delay.
const RETRY_AFTER_CAP_MS: u64 = 5_000;

const NEXT_PAGE_HEADER: &str = "x-next-page";
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Outbound operations against the time-tracking provider.
///
/// The pipeline and the reference cache only see this trait; the HTTP
/// implementation is injected at startup and swapped for a mock in tests.
#[async_trait]
pub trait ApiGateway: Send + Sync {
    /// All tags of the workspace. Not paginated by the provider.
    async fn get_tags(&self, workspace_id: &str) -> GatewayResult<Vec<Value>>;

    /// Creates a tag and returns the created record.
    async fn create_tag(&self, workspace_id: &str, name: &str) -> GatewayResult<Value>;

    /// Active (non-archived) projects of the workspace.
    async fn get_projects(&self, workspace_id: &str) -> GatewayResult<Vec<Value>>;

    /// Active (non-archived) clients of the workspace.
    async fn get_clients(&self, workspace_id: &str) -> GatewayResult<Vec<Value>>;

    /// Users of the workspace.
    async fn get_users(&self, workspace_id: &str) -> GatewayResult<Vec<Value>>;

    /// Tasks under one project.
    async fn get_tasks(&self, workspace_id: &str, project_id: &str) -> GatewayResult<Vec<Value>>;

    /// One time entry as the provider currently stores it.
    async fn get_time_entry(&self, workspace_id: &str, entry_id: &str) -> GatewayResult<Value>;

    /// Applies a partial update to a time entry.
    ///
    /// The provider's PUT replaces the whole document, so the current
    /// entry is fetched first, `timeInterval.start`/`end` are lifted to
    /// the root when absent there, and the patch fields are overlaid
    /// before writing back.
    async fn update_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        patch: &Value,
    ) -> GatewayResult<Value>;

    /// Replaces the tag ids of a time entry.
    async fn update_time_entry_tags(
        &self,
        workspace_id: &str,
        entry_id: &str,
        tag_ids: &[String],
    ) -> GatewayResult<Value> {
        let patch = json!({ "tagIds": tag_ids });
        self.update_time_entry(workspace_id, entry_id, &patch).await
    }

    /// Arbitrary gateway-relative call, used by `openapi_call` actions.
    /// Returns the response status. A missing body on POST/PUT/PATCH is
    /// sent as an empty JSON object.
    async fn openapi_call(
        &self,
        workspace_id: &str,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<u16>;
}

/// Shared reference to a gateway implementation.
pub type DynApiGateway = std::sync::Arc<dyn ApiGateway>;

// Compile-time check that the trait stays object safe.
#[allow(dead_code)]
fn _assert_gateway_object_safe(_gateway: &dyn ApiGateway) {}

/// Successful response with the pieces callers need.
struct ApiResponse {
    status: u16,
    next_page: Option<String>,
    body: String,
}

/// Raw outcome of a single attempt, before retry classification.
struct RawResponse {
    status: StatusCode,
    next_page: Option<String>,
    retry_after_ms: Option<u64>,
    body: String,
}

/// reqwest-backed [`ApiGateway`].
pub struct HttpApiGateway {
    http: reqwest::Client,
    base_url: String,
    tokens: DynTokenStore,
}

impl HttpApiGateway {
    /// Builds the shared HTTP client from config. Panics only if reqwest
    /// cannot construct a client, which indicates a broken TLS setup.
    #[must_use]
    pub fn new(config: &GatewayConfig, tokens: DynTokenStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn credentials(&self, workspace_id: &str) -> GatewayResult<WorkspaceToken> {
        self.tokens
            .get(workspace_id)
            .await
            .ok_or_else(|| GatewayError::missing_token(workspace_id))
    }

    fn endpoint(&self, credentials: &WorkspaceToken, path: &str) -> String {
        let base = credentials
            .api_base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    /// Sends one request with retries. Only 2xx responses are returned;
    /// everything else becomes a [`GatewayError`] after the retry budget
    /// is spent.
    async fn execute(
        &self,
        workspace_id: &str,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        idempotent: bool,
    ) -> GatewayResult<ApiResponse> {
        let credentials = self.credentials(workspace_id).await?;
        let url = self.endpoint(&credentials, path);
        // One key per logical call so the provider can collapse retried POSTs.
        let idempotency_key = idempotent.then(|| Uuid::new_v4().to_string());

        let mut attempt: u32 = 1;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .bearer_auth(&credentials.token)
                .header(header::ACCEPT, "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(key) = &idempotency_key {
                request = request.header(IDEMPOTENCY_KEY_HEADER, key);
            }

            match Self::read_response(request).await {
                Ok(raw) if raw.status.is_success() => {
                    return Ok(ApiResponse {
                        status: raw.status.as_u16(),
                        next_page: raw.next_page,
                        body: raw.body,
                    });
                }
                Ok(raw) => {
                    let status = raw.status.as_u16();
                    let retryable = status == 429 || raw.status.is_server_error();
                    if !retryable || attempt >= MAX_ATTEMPTS {
                        return Err(GatewayError::api(status, &raw.body, raw.retry_after_ms));
                    }
                    let delay = compute_delay(attempt, raw.retry_after_ms);
                    debug!(
                        workspace_id,
                        attempt,
                        status,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying API call after error status"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(GatewayError::transport(err.to_string()));
                    }
                    let delay = compute_delay(attempt, None);
                    debug!(
                        workspace_id,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying API call after transport error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }

    async fn read_response(request: reqwest::RequestBuilder) -> Result<RawResponse, reqwest::Error> {
        let response = request.send().await?;
        let status = response.status();
        let next_page = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|seconds| seconds.saturating_mul(1000));
        let body = response.text().await?;
        Ok(RawResponse {
            status,
            next_page,
            retry_after_ms,
            body,
        })
    }

    /// Collects all pages of a list endpoint.
    async fn fetch_paginated(
        &self,
        workspace_id: &str,
        path: &str,
        extra_query: &[(&str, &str)],
    ) -> GatewayResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut query: Vec<(String, String)> = extra_query
                .iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect();
            query.push(("page-size".to_string(), PAGE_SIZE.to_string()));
            query.push(("page".to_string(), page.to_string()));

            let response = self
                .execute(workspace_id, Method::GET, path, &query, None, false)
                .await?;
            let page_items = expect_array(parse_json(&response.body)?, path)?;
            if page_items.is_empty() {
                break;
            }
            let full_page = page_items.len() >= PAGE_SIZE;
            items.extend(page_items);

            match next_page_number(response.next_page.as_deref()) {
                NextPage::Jump(next) if next > page => page = next,
                NextPage::Jump(_) => break,
                NextPage::Unknown if full_page => page += 1,
                NextPage::Unknown | NextPage::End => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ApiGateway for HttpApiGateway {
    async fn get_tags(&self, workspace_id: &str) -> GatewayResult<Vec<Value>> {
        let path = format!("workspaces/{workspace_id}/tags");
        let response = self
            .execute(workspace_id, Method::GET, &path, &[], None, false)
            .await?;
        expect_array(parse_json(&response.body)?, "tags")
    }

    async fn create_tag(&self, workspace_id: &str, name: &str) -> GatewayResult<Value> {
        let path = format!("workspaces/{workspace_id}/tags");
        let body = json!({ "name": name });
        let response = self
            .execute(workspace_id, Method::POST, &path, &[], Some(&body), true)
            .await?;
        parse_json(&response.body)
    }

    async fn get_projects(&self, workspace_id: &str) -> GatewayResult<Vec<Value>> {
        let path = format!("workspaces/{workspace_id}/projects");
        self.fetch_paginated(workspace_id, &path, &[("archived", "false")])
            .await
    }

    async fn get_clients(&self, workspace_id: &str) -> GatewayResult<Vec<Value>> {
        let path = format!("workspaces/{workspace_id}/clients");
        self.fetch_paginated(workspace_id, &path, &[("archived", "false")])
            .await
    }

    async fn get_users(&self, workspace_id: &str) -> GatewayResult<Vec<Value>> {
        let path = format!("workspaces/{workspace_id}/users");
        self.fetch_paginated(workspace_id, &path, &[]).await
    }

    async fn get_tasks(&self, workspace_id: &str, project_id: &str) -> GatewayResult<Vec<Value>> {
        let path = format!("workspaces/{workspace_id}/projects/{project_id}/tasks");
        self.fetch_paginated(workspace_id, &path, &[]).await
    }

    async fn get_time_entry(&self, workspace_id: &str, entry_id: &str) -> GatewayResult<Value> {
        let path = format!("workspaces/{workspace_id}/time-entries/{entry_id}");
        let response = self
            .execute(workspace_id, Method::GET, &path, &[], None, false)
            .await?;
        let value = parse_json(&response.body)?;
        if !value.is_object() {
            return Err(GatewayError::invalid_response(format!(
                "expected a JSON object for time entry {entry_id}"
            )));
        }
        Ok(value)
    }

    async fn update_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        patch: &Value,
    ) -> GatewayResult<Value> {
        let current = self.get_time_entry(workspace_id, entry_id).await?;
        let merged = merge_entry_update(&current, patch)?;
        let path = format!("workspaces/{workspace_id}/time-entries/{entry_id}");
        let response = self
            .execute(workspace_id, Method::PUT, &path, &[], Some(&merged), false)
            .await?;
        parse_json(&response.body)
    }

    async fn openapi_call(
        &self,
        workspace_id: &str,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<u16> {
        let default_body = Value::Object(serde_json::Map::new());
        let body = match method {
            HttpMethod::Get => None,
            HttpMethod::Delete => body,
            _ => Some(body.unwrap_or(&default_body)),
        };
        let response = self
            .execute(
                workspace_id,
                to_reqwest(method),
                path,
                &[],
                body,
                method == HttpMethod::Post,
            )
            .await?;
        Ok(response.status)
    }
}

fn to_reqwest(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Delay before the attempt after `failed_attempt`. A positive
/// `Retry-After` from the server wins over the computed backoff, capped
/// at [`RETRY_AFTER_CAP_MS`]. Jitter is always added.
fn compute_delay(failed_attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    let base = match retry_after_ms {
        Some(ms) if ms > 0 => ms.min(RETRY_AFTER_CAP_MS),
        _ => {
            let shift = failed_attempt.saturating_sub(1).min(16);
            (BACKOFF_BASE_MS << shift).min(BACKOFF_CAP_MS)
        }
    };
    Duration::from_millis(base + fastrand::u64(50..150))
}

enum NextPage {
    /// Header held a page number.
    Jump(u32),
    /// Header present but not numeric; fall back to the page-size heuristic.
    Unknown,
    /// Header absent or blank; no further pages.
    End,
}

fn next_page_number(header: Option<&str>) -> NextPage {
    match header.map(str::trim) {
        None | Some("") => NextPage::End,
        Some(raw) => match raw.parse::<u32>() {
            Ok(page) => NextPage::Jump(page),
            Err(_) => NextPage::Unknown,
        },
    }
}

/// Parses a response body. Blank bodies become an empty object, which is
/// what the provider sends for some mutations.
fn parse_json(body: &str) -> GatewayResult<Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(trimmed)
        .map_err(|err| GatewayError::invalid_response(format!("invalid JSON in response body: {err}")))
}

fn expect_array(value: Value, context: &str) -> GatewayResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(GatewayError::invalid_response(format!(
            "expected a JSON array from {context}, got {}",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Builds the full document for a time entry PUT: current entry, with
/// `timeInterval.start`/`end` lifted to the root when the root lacks
/// them, then the patch fields overlaid on top.
fn merge_entry_update(current: &Value, patch: &Value) -> GatewayResult<Value> {
    let mut merged = current.as_object().cloned().unwrap_or_default();
    if let Some(interval) = current.get("timeInterval").and_then(Value::as_object) {
        for field in ["start", "end"] {
            if !merged.contains_key(field)
                && let Some(value) = interval.get(field)
            {
                merged.insert(field.to_string(), value.clone());
            }
        }
    }
    match patch.as_object() {
        Some(fields) => {
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
        }
        None => {
            return Err(GatewayError::invalid_request(
                "time entry patch must be a JSON object",
            ));
        }
    }
    Ok(Value::Object(merged))
}
