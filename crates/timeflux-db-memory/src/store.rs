use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use timeflux_core::Rule;
use timeflux_store::{RuleStore, StoreError, require_rule_id, require_workspace_id};

/// Composite lookup key: (workspace id, rule id).
pub type RuleKey = (String, String);

pub(crate) fn make_rule_key(workspace_id: &str, rule_id: &str) -> RuleKey {
    (workspace_id.to_string(), rule_id.to_string())
}

/// A stored rule plus the insertion sequence that defines storage order.
#[derive(Debug, Clone)]
struct StoredRule {
    seq: u64,
    rule: Rule,
}

/// In-memory rule store backed by a papaya lock-free `HashMap`.
///
/// Rules are volatile and scoped to the process. Scans filter over the whole
/// map; workspaces hold tens of rules, not millions, so a full scan stays
/// cheap. Storage order is the order of first insertion, which upserts keep.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    data: PapayaHashMap<RuleKey, StoredRule>,
    /// Atomic counter assigning storage order to new rules.
    seq_counter: AtomicU64,
}

impl MemoryRuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            data: PapayaHashMap::new(),
            seq_counter: AtomicU64::new(1),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn collect_sorted<F>(&self, workspace_id: &str, keep: F) -> Vec<Rule>
    where
        F: Fn(&Rule) -> bool,
    {
        let guard = self.data.pin();
        let mut rules: Vec<(u64, Rule)> = guard
            .iter()
            .filter(|((ws, _), stored)| ws == workspace_id && keep(&stored.rule))
            .map(|(_, stored)| (stored.seq, stored.rule.clone()))
            .collect();
        rules.sort_unstable_by_key(|(seq, _)| *seq);
        rules.into_iter().map(|(_, rule)| rule).collect()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn save(&self, workspace_id: &str, mut rule: Rule) -> Result<Rule, StoreError> {
        require_workspace_id(workspace_id)?;
        rule.ensure_id();

        let key = make_rule_key(workspace_id, &rule.id);
        let guard = self.data.pin();
        // Replacing an existing rule keeps its storage order.
        let seq = match guard.get(&key) {
            Some(existing) => existing.seq,
            None => self.next_seq(),
        };
        guard.insert(
            key,
            StoredRule {
                seq,
                rule: rule.clone(),
            },
        );
        Ok(rule)
    }

    async fn get(&self, workspace_id: &str, rule_id: &str) -> Result<Option<Rule>, StoreError> {
        require_workspace_id(workspace_id)?;
        require_rule_id(rule_id)?;
        let key = make_rule_key(workspace_id, rule_id);
        let guard = self.data.pin();
        Ok(guard.get(&key).map(|stored| stored.rule.clone()))
    }

    async fn get_all(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError> {
        require_workspace_id(workspace_id)?;
        Ok(self.collect_sorted(workspace_id, |_| true))
    }

    async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError> {
        require_workspace_id(workspace_id)?;
        Ok(self.collect_sorted(workspace_id, |rule| rule.enabled))
    }

    async fn delete(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError> {
        require_workspace_id(workspace_id)?;
        require_rule_id(rule_id)?;
        let key = make_rule_key(workspace_id, rule_id);
        let guard = self.data.pin();
        Ok(guard.remove(&key).is_some())
    }

    async fn delete_all(&self, workspace_id: &str) -> Result<u64, StoreError> {
        require_workspace_id(workspace_id)?;
        let guard = self.data.pin();
        let keys: Vec<RuleKey> = guard
            .keys()
            .filter(|(ws, _)| ws == workspace_id)
            .cloned()
            .collect();
        let mut removed = 0u64;
        for key in keys {
            if guard.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError> {
        require_workspace_id(workspace_id)?;
        require_rule_id(rule_id)?;
        let key = make_rule_key(workspace_id, rule_id);
        let guard = self.data.pin();
        Ok(guard.contains_key(&key))
    }

    async fn count(&self, workspace_id: &str) -> Result<u64, StoreError> {
        require_workspace_id(workspace_id)?;
        let guard = self.data.pin();
        Ok(guard.keys().filter(|(ws, _)| ws == workspace_id).count() as u64)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let guard = self.data.pin();
        guard.clear();
        Ok(())
    }

    async fn list_workspaces(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.data.pin();
        let workspaces: BTreeSet<String> = guard.keys().map(|(ws, _)| ws.clone()).collect();
        Ok(workspaces.into_iter().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
