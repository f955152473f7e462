//! Webhook execution pipeline.
//!
//! One invocation walks the same stages every time: dedupe, load enabled
//! rules, filter by trigger, evaluate conditions, then run the matched
//! rules' actions in priority order. Evaluation happens up front against
//! the incoming event; actions of later rules see the entry state left by
//! earlier ones.

mod actions;
mod report;

pub use report::{ActionOutcome, ActionReport, ExecutionReport, ExecutionStatus, RuleReport};

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use timeflux_core::{EventContext, Rule, evaluate};
use timeflux_gateway::{DynApiGateway, DynTokenStore};
use timeflux_store::StoreError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{DedupeCache, ReferenceCache, RulesCache, dedupe_key};
use crate::config::EngineConfig;
use actions::EntryState;

/// Errors that abort an invocation before any action runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The rule store could not serve the workspace's rules.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Live execution needs a provider credential and none is configured.
    #[error("no API token configured for workspace {workspace_id}")]
    MissingToken { workspace_id: String },
}

/// Shared webhook processor. One instance serves every workspace.
pub struct Pipeline {
    rules: Arc<RulesCache>,
    references: Arc<ReferenceCache>,
    gateway: DynApiGateway,
    tokens: DynTokenStore,
    dedupe: DedupeCache,
    engine: EngineConfig,
}

impl Pipeline {
    pub fn new(
        rules: Arc<RulesCache>,
        references: Arc<ReferenceCache>,
        gateway: DynApiGateway,
        tokens: DynTokenStore,
        engine: EngineConfig,
    ) -> Self {
        Self {
            rules,
            references,
            gateway,
            tokens,
            dedupe: DedupeCache::new(engine.dedupe_ttl()),
            engine,
        }
    }

    /// Processes one webhook delivery: dedupe first, then the full run.
    pub async fn handle_event(
        self: &Arc<Self>,
        workspace_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<ExecutionReport, PipelineError> {
        let key = dedupe_key(&payload);
        if self.dedupe.check_and_record(workspace_id, event_type, &key) {
            debug!(
                workspace_id = %workspace_id,
                event = %event_type,
                key = %key,
                "Duplicate webhook delivery suppressed"
            );
            return Ok(ExecutionReport::duplicate(workspace_id, event_type));
        }

        let result = self
            .run(workspace_id, event_type, payload, self.engine.dry_run, true)
            .await;
        if result.is_err() {
            // A failed invocation must stay retryable.
            self.dedupe.forget(workspace_id, event_type, &key);
        }
        result
    }

    /// Evaluates an event without side effects, for the test endpoint.
    /// Never deduped and never deferred.
    pub async fn dry_run(
        self: &Arc<Self>,
        workspace_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<ExecutionReport, PipelineError> {
        self.run(workspace_id, event_type, payload, true, false).await
    }

    async fn run(
        self: &Arc<Self>,
        workspace_id: &str,
        event_type: &str,
        payload: Value,
        dry_run: bool,
        allow_defer: bool,
    ) -> Result<ExecutionReport, PipelineError> {
        let started = Instant::now();
        let context = EventContext::new(workspace_id, event_type, payload);

        let enabled = self.rules.get_enabled(workspace_id).await?;
        let mut candidates: Vec<Rule> = enabled
            .iter()
            .filter(|rule| rule.applies_to_event(event_type))
            .cloned()
            .collect();
        // Stable sort keeps store order within one priority level.
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            workspace_id = %workspace_id,
            event = %event_type,
            rules = candidates.len(),
            dry_run,
            "Evaluating webhook event"
        );

        let evaluated: Vec<(Rule, bool)> = candidates
            .into_iter()
            .map(|rule| {
                let matched = evaluate(&rule, &context);
                (rule, matched)
            })
            .collect();
        let matched_actions: usize = evaluated
            .iter()
            .filter(|(_, matched)| *matched)
            .map(|(rule, _)| rule.actions.len())
            .sum();

        if !dry_run && matched_actions > 0 && self.tokens.get(workspace_id).await.is_none() {
            return Err(PipelineError::MissingToken {
                workspace_id: workspace_id.to_string(),
            });
        }

        if allow_defer && !dry_run && matched_actions > self.engine.async_action_threshold {
            let report = ExecutionReport::scheduled(&context, &evaluated);
            info!(
                workspace_id = %workspace_id,
                event = %event_type,
                actions = matched_actions,
                threshold = self.engine.async_action_threshold,
                "Deferring webhook actions to a background task"
            );
            self.spawn_deferred(context, evaluated);
            return Ok(report);
        }

        let mut state = EntryState::from_context(&context);
        let mut rule_reports = Vec::with_capacity(evaluated.len());
        for (rule, matched) in &evaluated {
            if !matched {
                rule_reports.push(RuleReport::unmatched(rule));
                continue;
            }
            let report = actions::execute_rule(
                rule,
                &context,
                &mut state,
                &self.references,
                &self.gateway,
                dry_run,
                self.engine.stop_rule_on_action_failure,
            )
            .await;
            rule_reports.push(report);
        }

        let report = ExecutionReport::aggregate(&context, rule_reports, dry_run);
        info!(
            workspace_id = %workspace_id,
            event = %event_type,
            status = %report.status,
            rules_matched = report.rules.iter().filter(|r| r.matched).count(),
            actions_applied = report.actions_applied,
            actions_failed = report.actions_failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Webhook event processed"
        );
        Ok(report)
    }

    fn spawn_deferred(self: &Arc<Self>, context: EventContext, evaluated: Vec<(Rule, bool)>) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let execution_id = Uuid::new_v4();
            let started = Instant::now();
            let mut state = EntryState::from_context(&context);
            let mut applied = 0usize;
            let mut failed = 0usize;
            for (rule, matched) in &evaluated {
                if !matched {
                    continue;
                }
                let report = actions::execute_rule(
                    rule,
                    &context,
                    &mut state,
                    &pipeline.references,
                    &pipeline.gateway,
                    false,
                    pipeline.engine.stop_rule_on_action_failure,
                )
                .await;
                for action in &report.actions {
                    match action.outcome {
                        ActionOutcome::Applied => applied += 1,
                        ActionOutcome::Failed => {
                            failed += 1;
                            warn!(
                                execution_id = %execution_id,
                                rule_id = %report.rule_id,
                                action = action.action_type.as_str(),
                                error = action.error.as_deref().unwrap_or(""),
                                "Deferred action failed"
                            );
                        }
                        _ => {}
                    }
                }
            }
            info!(
                execution_id = %execution_id,
                workspace_id = %context.workspace_id(),
                event = %context.event_type(),
                actions_applied = applied,
                actions_failed = failed,
                duration_ms = started.elapsed().as_millis() as u64,
                "Deferred webhook actions completed"
            );
        });
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use timeflux_core::{
        Action, ActionType, Combinator, Condition, ConditionType, HttpMethod, RuleTrigger,
    };
    use timeflux_db_memory::MemoryRuleStore;
    use timeflux_gateway::{ApiGateway, GatewayError, GatewayResult, MemoryTokenStore};
    use timeflux_store::{DynRuleStore, RuleStore};

    const WS: &str = "ws-pipe";
    const EVENT: &str = "TIME_ENTRY_UPDATED";

    /// Records every mutating call and serves a fixed reference listing.
    struct RecordingGateway {
        tags: StdMutex<Vec<Value>>,
        updates: StdMutex<Vec<(String, Value)>>,
        api_calls: StdMutex<Vec<(String, String, Option<Value>)>>,
        created_tags: StdMutex<Vec<String>>,
        fail_updates: AtomicBool,
    }

    impl RecordingGateway {
        fn new() -> Self {
            Self {
                tags: StdMutex::new(vec![json!({"id": "tag-bug", "name": "Bug"})]),
                updates: StdMutex::new(Vec::new()),
                api_calls: StdMutex::new(Vec::new()),
                created_tags: StdMutex::new(Vec::new()),
                fail_updates: AtomicBool::new(false),
            }
        }

        fn updates(&self) -> Vec<(String, Value)> {
            self.updates.lock().unwrap().clone()
        }

        fn api_calls(&self) -> Vec<(String, String, Option<Value>)> {
            self.api_calls.lock().unwrap().clone()
        }

        fn created_tags(&self) -> Vec<String> {
            self.created_tags.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ApiGateway for RecordingGateway {
        async fn get_tags(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            Ok(self.tags.lock().unwrap().clone())
        }

        async fn create_tag(&self, _ws: &str, name: &str) -> GatewayResult<Value> {
            let created = json!({"id": format!("tag-{}", name.to_lowercase()), "name": name});
            self.tags.lock().unwrap().push(created.clone());
            self.created_tags.lock().unwrap().push(name.to_string());
            Ok(created)
        }

        async fn get_projects(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            Ok(vec![json!({"id": "p-web", "name": "Website"})])
        }

        async fn get_clients(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn get_users(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn get_tasks(&self, _ws: &str, _project_id: &str) -> GatewayResult<Vec<Value>> {
            Ok(vec![json!({"id": "task-rev", "name": "Review"})])
        }

        async fn get_time_entry(&self, _ws: &str, _entry_id: &str) -> GatewayResult<Value> {
            Err(GatewayError::invalid_request("not served by this mock"))
        }

        async fn update_time_entry(
            &self,
            _ws: &str,
            entry_id: &str,
            patch: &Value,
        ) -> GatewayResult<Value> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(GatewayError::api(500, "update rejected", None));
            }
            self.updates
                .lock()
                .unwrap()
                .push((entry_id.to_string(), patch.clone()));
            Ok(patch.clone())
        }

        async fn openapi_call(
            &self,
            _ws: &str,
            method: HttpMethod,
            path: &str,
            body: Option<&Value>,
        ) -> GatewayResult<u16> {
            self.api_calls.lock().unwrap().push((
                method.as_str().to_string(),
                path.to_string(),
                body.cloned(),
            ));
            Ok(200)
        }
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        store: DynRuleStore,
        tokens: DynTokenStore,
        gateway: Arc<RecordingGateway>,
    }

    async fn harness(engine: EngineConfig) -> Harness {
        harness_with_tokens(engine, &[(WS, "secret")]).await
    }

    async fn harness_with_tokens(engine: EngineConfig, seed: &[(&str, &str)]) -> Harness {
        let gateway = Arc::new(RecordingGateway::new());
        let dyn_gateway: DynApiGateway = gateway.clone();
        let store: DynRuleStore = Arc::new(MemoryRuleStore::new());
        let rules = Arc::new(RulesCache::new(
            Arc::clone(&store),
            Duration::from_secs(300),
        ));
        let references = Arc::new(ReferenceCache::new(
            dyn_gateway.clone(),
            Duration::from_secs(1800),
        ));
        let tokens: DynTokenStore =
            Arc::new(MemoryTokenStore::with_seed(seed.iter().copied()));
        let pipeline = Arc::new(Pipeline::new(
            rules,
            references,
            dyn_gateway,
            Arc::clone(&tokens),
            engine,
        ));
        Harness {
            pipeline,
            store,
            tokens,
            gateway,
        }
    }

    fn tag_rule() -> Rule {
        let mut rule = Rule::new("Tag bugs");
        rule.conditions = vec![Condition::new(ConditionType::DescriptionContains, "bug")];
        rule.actions = vec![Action::new(ActionType::AddTag, [("tag", "Bug")])];
        rule
    }

    fn entry_payload(event_id: &str, description: &str) -> Value {
        json!({
            "id": event_id,
            "workspaceId": WS,
            "timeEntry": {
                "id": "te-1",
                "description": description,
                "billable": false,
                "projectId": "p-web",
                "tagIds": []
            }
        })
    }

    #[tokio::test]
    async fn test_matching_rule_applies_tag() {
        let h = harness(EngineConfig::default()).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix login bug"))
            .await
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::Applied);
        assert_eq!(report.actions_applied, 1);
        assert_eq!(report.actions_failed, 0);
        let action = &report.rules[0].actions[0];
        assert_eq!(action.outcome, ActionOutcome::Applied);
        assert_eq!(action.resolved_args.get("tagId").map(String::as_str), Some("tag-bug"));

        let updates = h.gateway.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "te-1");
        assert_eq!(updates[0].1, json!({"tagIds": ["tag-bug"]}));
    }

    #[tokio::test]
    async fn test_unmatched_rule_reports_no_match() {
        let h = harness(EngineConfig::default()).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "daily standup"))
            .await
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::NoMatch);
        assert_eq!(report.rules.len(), 1);
        assert!(!report.rules[0].matched);
        assert!(report.rules[0].actions.is_empty());
        assert!(h.gateway.updates().is_empty());
    }

    #[tokio::test]
    async fn test_or_combinator_matches_on_second_condition() {
        let h = harness(EngineConfig::default()).await;
        let mut rule = tag_rule();
        rule.combinator = Combinator::Or;
        rule.conditions = vec![
            Condition::new(ConditionType::DescriptionContains, "bug"),
            Condition::new(ConditionType::DescriptionContains, "hotfix"),
        ];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "deploy hotfix"))
            .await
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::Applied);
        assert!(report.rules[0].matched);
    }

    #[tokio::test]
    async fn test_missing_tag_created_then_attached() {
        let h = harness(EngineConfig::default()).await;
        let mut rule = tag_rule();
        rule.actions = vec![Action::new(ActionType::AddTag, [("tag", "Urgent")])];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "urgent bug"))
            .await
            .unwrap();

        assert_eq!(h.gateway.created_tags(), vec!["Urgent".to_string()]);
        let action = &report.rules[0].actions[0];
        assert_eq!(action.outcome, ActionOutcome::Applied);
        assert_eq!(
            action.resolved_args.get("tagId").map(String::as_str),
            Some("tag-urgent")
        );
        assert_eq!(h.gateway.updates()[0].1, json!({"tagIds": ["tag-urgent"]}));
    }

    #[tokio::test]
    async fn test_rules_run_in_priority_order() {
        let h = harness(EngineConfig::default()).await;
        let mut low = Rule::new("Low");
        low.priority = 0;
        low.actions = vec![Action::new(ActionType::SetDescription, [("value", "low pass")])];
        let mut high = Rule::new("High");
        high.priority = 10;
        high.actions = vec![Action::new(ActionType::SetDescription, [("value", "high pass")])];
        // Saved low first; priority must outrank store order.
        h.store.save(WS, low).await.unwrap();
        h.store.save(WS, high).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "anything"))
            .await
            .unwrap();

        assert_eq!(report.rules[0].name, "High");
        assert_eq!(report.rules[1].name, "Low");
        let updates = h.gateway.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1, json!({"description": "high pass"}));
        assert_eq!(updates[1].1, json!({"description": "low pass"}));
    }

    #[tokio::test]
    async fn test_entry_state_carries_across_rules() {
        let h = harness(EngineConfig::default()).await;
        let mut first = Rule::new("First");
        first.priority = 10;
        first.actions = vec![Action::new(ActionType::SetDescription, [("value", "done")])];
        let mut second = Rule::new("Second");
        second.actions = vec![Action::new(ActionType::SetDescription, [("value", "done")])];
        h.store.save(WS, first).await.unwrap();
        h.store.save(WS, second).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "anything"))
            .await
            .unwrap();

        // The second rule sees the description the first one already set.
        assert_eq!(report.rules[0].actions[0].outcome, ActionOutcome::Applied);
        assert_eq!(report.rules[1].actions[0].outcome, ActionOutcome::Skipped);
        assert_eq!(h.gateway.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_rule_batches_entry_mutations_into_one_update() {
        let h = harness(EngineConfig::default()).await;
        let mut rule = Rule::new("Sweep");
        rule.actions = vec![
            Action::new(ActionType::SetDescription, [("value", "triaged")]),
            Action::new(ActionType::SetBillable, [("value", "true")]),
            Action::new(ActionType::AddTag, [("tag", "Bug")]),
        ];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "anything"))
            .await
            .unwrap();

        assert_eq!(report.actions_applied, 3);
        let updates = h.gateway.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].1,
            json!({"description": "triaged", "billable": true, "tagIds": ["tag-bug"]})
        );
    }

    #[tokio::test]
    async fn test_dry_run_is_idempotent_and_calls_nothing() {
        let h = harness(EngineConfig::default()).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let first = h
            .pipeline
            .dry_run(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();
        let second = h
            .pipeline
            .dry_run(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();

        assert_eq!(first.status, ExecutionStatus::DryRun);
        assert_eq!(first.rules[0].actions[0].outcome, ActionOutcome::WouldApply);
        assert_eq!(first, second);
        assert!(h.gateway.updates().is_empty());
        assert!(h.gateway.created_tags().is_empty());
        assert!(h.gateway.api_calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_suppressed() {
        let h = harness(EngineConfig::default()).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let first = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();
        let second = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();

        assert_eq!(first.status, ExecutionStatus::Applied);
        assert_eq!(second.status, ExecutionStatus::Duplicate);
        assert_eq!(h.gateway.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_live_run_without_token_fails() {
        let h = harness_with_tokens(EngineConfig::default(), &[]).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let err = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MissingToken { .. }));
        assert!(h.gateway.updates().is_empty());
    }

    #[tokio::test]
    async fn test_no_token_is_fine_when_nothing_matches() {
        let h = harness_with_tokens(EngineConfig::default(), &[]).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "standup"))
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::NoMatch);
    }

    #[tokio::test]
    async fn test_failed_invocation_stays_retryable() {
        let h = harness_with_tokens(EngineConfig::default(), &[]).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let payload = entry_payload("e1", "fix bug");
        assert!(h.pipeline.handle_event(WS, EVENT, payload.clone()).await.is_err());

        // Once the credential arrives, the retried delivery must not be
        // treated as a duplicate of the failed attempt.
        h.tokens
            .put(WS, timeflux_gateway::WorkspaceToken::new("secret"))
            .await;
        let report = h.pipeline.handle_event(WS, EVENT, payload).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Applied);
    }

    #[tokio::test]
    async fn test_actions_deferred_over_threshold() {
        let engine = EngineConfig {
            async_action_threshold: 1,
            ..EngineConfig::default()
        };
        let h = harness(engine).await;
        let mut rule = Rule::new("Heavy");
        rule.actions = vec![
            Action::new(ActionType::SetDescription, [("value", "triaged")]),
            Action::new(ActionType::SetBillable, [("value", "true")]),
        ];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "anything"))
            .await
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::Scheduled);
        assert_eq!(report.actions_attempted, 0);
        assert!(report.rules[0]
            .actions
            .iter()
            .all(|a| a.outcome == ActionOutcome::Scheduled));

        let mut delivered = Vec::new();
        for _ in 0..40 {
            delivered = h.gateway.updates();
            if !delivered.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(delivered.len(), 1, "deferred actions never ran");
        assert_eq!(
            delivered[0].1,
            json!({"description": "triaged", "billable": true})
        );
    }

    #[tokio::test]
    async fn test_dry_run_never_defers() {
        let engine = EngineConfig {
            async_action_threshold: 0,
            ..EngineConfig::default()
        };
        let h = harness(engine).await;
        h.store.save(WS, tag_rule()).await.unwrap();

        let report = h
            .pipeline
            .dry_run(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::DryRun);
    }

    #[tokio::test]
    async fn test_stop_on_failure_skips_remaining_actions() {
        let engine = EngineConfig {
            stop_rule_on_action_failure: true,
            ..EngineConfig::default()
        };
        let h = harness(engine).await;
        let mut rule = Rule::new("Brittle");
        rule.actions = vec![
            Action::new(ActionType::SetProjectByName, [("name", "Nonexistent")]),
            Action::new(ActionType::AddTag, [("tag", "Bug")]),
        ];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "anything"))
            .await
            .unwrap();

        let actions = &report.rules[0].actions;
        assert_eq!(actions[0].outcome, ActionOutcome::Failed);
        assert_eq!(
            actions[0].error.as_deref(),
            Some("project not found: Nonexistent")
        );
        assert_eq!(actions[1].outcome, ActionOutcome::Skipped);
        assert!(actions[1].error.as_deref().unwrap().contains("earlier action"));
        assert_eq!(report.actions_failed, 1);
        assert!(h.gateway.updates().is_empty());
    }

    #[tokio::test]
    async fn test_failure_continues_to_next_action_by_default() {
        let h = harness(EngineConfig::default()).await;
        let mut rule = Rule::new("Resilient");
        rule.actions = vec![
            Action::new(ActionType::SetProjectByName, [("name", "Nonexistent")]),
            Action::new(ActionType::AddTag, [("tag", "Bug")]),
        ];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "anything"))
            .await
            .unwrap();

        let actions = &report.rules[0].actions;
        assert_eq!(actions[0].outcome, ActionOutcome::Failed);
        assert_eq!(actions[1].outcome, ActionOutcome::Applied);
        assert_eq!(h.gateway.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_update_failure_marks_contributors_failed() {
        let h = harness(EngineConfig::default()).await;
        h.store.save(WS, tag_rule()).await.unwrap();
        h.gateway.fail_updates.store(true, Ordering::SeqCst);

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();

        let action = &report.rules[0].actions[0];
        assert_eq!(action.outcome, ActionOutcome::Failed);
        assert!(action.error.as_deref().unwrap().contains("500"));
        assert_eq!(report.actions_failed, 1);
        assert_eq!(report.actions_applied, 0);
    }

    #[tokio::test]
    async fn test_trigger_filters_rules_before_evaluation() {
        let h = harness(EngineConfig::default()).await;
        let mut scoped = tag_rule();
        scoped.name = "Only new entries".into();
        scoped.trigger = Some(RuleTrigger {
            event: Some("NEW_TIME_ENTRY".into()),
        });
        h.store.save(WS, scoped).await.unwrap();
        h.store.save(WS, tag_rule()).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();

        // The filtered rule does not appear in the report at all.
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.rules[0].name, "Tag bugs");
    }

    #[tokio::test]
    async fn test_openapi_call_resolves_placeholders() {
        let h = harness(EngineConfig::default()).await;
        let mut rule = Rule::new("Notify");
        rule.actions = vec![Action::new(
            ActionType::OpenapiCall,
            [
                ("method", "POST"),
                ("path", "/workspaces/{{workspaceId}}/entries/{{timeEntry.id}}/notes"),
                ("body", r#"{"text": "entry {{timeEntry.description}}"}"#),
            ],
        )];
        h.store.save(WS, rule).await.unwrap();

        let report = h
            .pipeline
            .handle_event(WS, EVENT, entry_payload("e1", "fix bug"))
            .await
            .unwrap();

        let calls = h.gateway.api_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "POST");
        assert_eq!(calls[0].1, "/workspaces/ws-pipe/entries/te-1/notes");
        assert_eq!(calls[0].2, Some(json!({"text": "entry fix bug"})));

        let action = &report.rules[0].actions[0];
        assert_eq!(action.outcome, ActionOutcome::Applied);
        assert_eq!(action.resolved_args.get("status").map(String::as_str), Some("200"));
        assert!(h.gateway.updates().is_empty());
    }
}
