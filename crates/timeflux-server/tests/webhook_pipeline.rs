//! End-to-end webhook flows against a mocked time-tracking provider.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use timeflux_db_memory::MemoryRuleStore;
use timeflux_gateway::{
    DynApiGateway, DynTokenStore, GatewayConfig, HttpApiGateway, MemoryTokenStore,
};
use timeflux_server::{AppConfig, AppState, build_app};
use timeflux_store::DynRuleStore;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WS: &str = "ws-hook";

async fn start_app(
    mut cfg: AppConfig,
    provider: &MockServer,
    tokens: &[(&str, &str)],
) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    cfg.gateway = GatewayConfig::new(provider.uri());

    let store: DynRuleStore = Arc::new(MemoryRuleStore::new());
    let token_store: DynTokenStore = Arc::new(MemoryTokenStore::with_seed(tokens.iter().copied()));
    let gateway: DynApiGateway =
        Arc::new(HttpApiGateway::new(&cfg.gateway, Arc::clone(&token_store)));
    let state = AppState::new(&cfg, store, gateway, token_store);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

/// Reference listings for the snapshot build. One known tag, nothing else.
/// Pagination stops on the first empty page, so one catch-all mock per
/// listing endpoint is enough.
async fn mock_reference_listing(provider: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/workspaces/{WS}/tags")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "tag-bug", "name": "Bug"}])),
        )
        .mount(provider)
        .await;
    for listing in ["projects", "clients", "users"] {
        Mock::given(method("GET"))
            .and(path(format!("/workspaces/{WS}/{listing}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(provider)
            .await;
    }
}

async fn save_rule(client: &reqwest::Client, base: &str, rule: &Value) {
    let resp = client
        .post(format!("{base}/api/rules?workspaceId={WS}"))
        .json(rule)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "rule save failed: {resp:?}");
}

fn entry_payload(event_id: &str, description: &str) -> Value {
    json!({
        "id": event_id,
        "workspaceId": WS,
        "event": "TIME_ENTRY_UPDATED",
        "timeEntry": {
            "id": "te-1",
            "description": description,
            "billable": false,
            "tagIds": []
        }
    })
}

#[tokio::test]
async fn webhook_applies_matching_rule_to_the_provider() {
    let provider = MockServer::start().await;
    mock_reference_listing(&provider).await;
    Mock::given(method("GET"))
        .and(path(format!("/workspaces/{WS}/time-entries/te-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "te-1",
            "description": "fix login bug",
            "billable": false,
            "tagIds": [],
            "timeInterval": {"start": "2026-03-01T09:00:00Z", "end": "2026-03-01T09:30:00Z"}
        })))
        .expect(1)
        .mount(&provider)
        .await;
    // The PUT must carry the staged tag and the start lifted from the interval.
    Mock::given(method("PUT"))
        .and(path(format!("/workspaces/{WS}/time-entries/te-1")))
        .and(body_partial_json(json!({
            "tagIds": ["tag-bug"],
            "start": "2026-03-01T09:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "te-1"})))
        .expect(1)
        .mount(&provider)
        .await;

    let (base, shutdown_tx, handle) = start_app(AppConfig::default(), &provider, &[(WS, "secret")]).await;
    let client = reqwest::Client::new();

    save_rule(
        &client,
        &base,
        &json!({
            "name": "Tag bug reports",
            "conditions": [{"type": "descriptionContains", "value": "bug"}],
            "actions": [{"type": "add_tag", "args": {"tag": "Bug"}}]
        }),
    )
    .await;

    let resp = client
        .post(format!("{base}/webhook"))
        .json(&entry_payload("evt-1", "fix login bug"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["status"], "applied");
    assert_eq!(report["workspaceId"], WS);
    assert_eq!(report["actionsApplied"], 1);
    assert_eq!(report["actionsFailed"], 0);
    let action = &report["rules"][0]["actions"][0];
    assert_eq!(action["outcome"], "applied");
    assert_eq!(action["resolvedArgs"]["tagId"], "tag-bug");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn test_endpoint_is_idempotent_and_issues_no_mutations() {
    let provider = MockServer::start().await;
    mock_reference_listing(&provider).await;

    let (base, shutdown_tx, handle) = start_app(AppConfig::default(), &provider, &[(WS, "secret")]).await;
    let client = reqwest::Client::new();

    save_rule(
        &client,
        &base,
        &json!({
            "name": "Tag bug reports",
            "conditions": [{"type": "descriptionContains", "value": "bug"}],
            "actions": [{"type": "add_tag", "args": {"tag": "Bug"}}]
        }),
    )
    .await;

    let mut reports = Vec::new();
    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/api/test?workspaceId={WS}"))
            .json(&entry_payload("evt-dry", "fix login bug"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        reports.push(resp.json::<Value>().await.unwrap());
    }

    assert_eq!(reports[0], reports[1]);
    assert_eq!(reports[0]["status"], "dry_run");
    assert_eq!(
        reports[0]["rules"][0]["actions"][0]["outcome"],
        "would_apply"
    );

    // Reference listings are the only provider traffic a dry run may cause.
    let requests = provider.received_requests().await.unwrap();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|r| r.method.to_string() == "GET"));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn webhook_suppresses_duplicate_deliveries() {
    let provider = MockServer::start().await;
    let (base, shutdown_tx, handle) = start_app(AppConfig::default(), &provider, &[]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/webhook"))
        .json(&entry_payload("evt-dup", "quick sync"))
        .send()
        .await
        .unwrap();
    let first: Value = resp.json().await.unwrap();
    assert_eq!(first["status"], "no_match");

    let resp = client
        .post(format!("{base}/webhook"))
        .json(&entry_payload("evt-dup", "quick sync"))
        .send()
        .await
        .unwrap();
    let second: Value = resp.json().await.unwrap();
    assert_eq!(second["status"], "duplicate");

    assert!(provider.received_requests().await.unwrap().is_empty());

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn live_run_without_token_answers_precondition_failed() {
    let provider = MockServer::start().await;
    let (base, shutdown_tx, handle) = start_app(AppConfig::default(), &provider, &[]).await;
    let client = reqwest::Client::new();

    save_rule(
        &client,
        &base,
        &json!({
            "name": "Tag bug reports",
            "conditions": [{"type": "descriptionContains", "value": "bug"}],
            "actions": [{"type": "add_tag", "args": {"tag": "Bug"}}]
        }),
    )
    .await;

    let resp = client
        .post(format!("{base}/webhook"))
        .json(&entry_payload("evt-untokened", "fix login bug"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 412);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "precondition_failed");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn webhook_defers_large_action_sets() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/workspaces/{WS}/time-entries/te-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "te-1",
            "description": "fix login bug",
            "billable": false
        })))
        .mount(&provider)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/workspaces/{WS}/time-entries/te-1")))
        .and(body_partial_json(json!({
            "description": "triaged",
            "billable": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "te-1"})))
        .expect(1)
        .mount(&provider)
        .await;

    let mut cfg = AppConfig::default();
    cfg.engine.async_action_threshold = 1;
    let (base, shutdown_tx, handle) = start_app(cfg, &provider, &[(WS, "secret")]).await;
    let client = reqwest::Client::new();

    save_rule(
        &client,
        &base,
        &json!({
            "name": "Triage bugs",
            "conditions": [{"type": "descriptionContains", "value": "bug"}],
            "actions": [
                {"type": "set_description", "args": {"description": "triaged"}},
                {"type": "set_billable", "args": {"billable": "true"}}
            ]
        }),
    )
    .await;

    let resp = client
        .post(format!("{base}/webhook"))
        .json(&entry_payload("evt-deferred", "fix login bug"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["status"], "scheduled");
    assert_eq!(report["rules"][0]["actions"][0]["outcome"], "scheduled");
    assert_eq!(report["actionsApplied"], 0);

    // The background task lands the batched update shortly after the reply.
    let mut saw_update = false;
    for _ in 0..40 {
        let requests = provider.received_requests().await.unwrap();
        if requests.iter().any(|r| r.method.to_string() == "PUT") {
            saw_update = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(saw_update, "deferred actions never reached the provider");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn cache_refresh_endpoint_builds_a_snapshot() {
    let provider = MockServer::start().await;
    mock_reference_listing(&provider).await;

    let (base, shutdown_tx, handle) = start_app(AppConfig::default(), &provider, &[(WS, "secret")]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/cache/refresh?workspaceId={WS}"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["workspaceId"], WS);
    assert_eq!(body["counts"]["tags"], 1);
    assert_eq!(body["counts"]["projects"], 0);

    let resp = client
        .get(format!("{base}/api/cache/status?workspaceId={WS}"))
        .send()
        .await
        .unwrap();
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["cached"], true);
    assert_eq!(status["counts"]["tags"], 1);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
