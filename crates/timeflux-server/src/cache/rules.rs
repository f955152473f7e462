//! Short-TTL cache of enabled rules per workspace, so a burst of webhook
//! events does not hit the rule store once per event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use timeflux_core::Rule;
use timeflux_store::{DynRuleStore, StoreError};
use tracing::debug;

struct CachedRules {
    rules: Arc<Vec<Rule>>,
    fetched_at: Instant,
}

/// Caches `get_enabled` results. Store failures are never cached and
/// always propagate to the caller.
pub struct RulesCache {
    store: DynRuleStore,
    ttl: Duration,
    entries: DashMap<String, CachedRules>,
}

impl RulesCache {
    pub fn new(store: DynRuleStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Enabled rules for the workspace, from cache when fresh.
    pub async fn get_enabled(&self, workspace_id: &str) -> Result<Arc<Vec<Rule>>, StoreError> {
        // The Ref is dropped before the store await; DashMap guards must
        // not be held across suspension points.
        if let Some(cached) = self.entries.get(workspace_id)
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&cached.rules));
        }

        let rules = Arc::new(self.store.get_enabled(workspace_id).await?);
        debug!(
            workspace_id = %workspace_id,
            rules = rules.len(),
            "Rules cache refreshed"
        );
        self.entries.insert(
            workspace_id.to_string(),
            CachedRules {
                rules: Arc::clone(&rules),
                fetched_at: Instant::now(),
            },
        );
        Ok(rules)
    }

    /// Drops the cached rules so the next read goes to the store. Called
    /// after every rule mutation.
    pub fn invalidate(&self, workspace_id: &str) {
        self.entries.remove(workspace_id);
    }
}

impl std::fmt::Debug for RulesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesCache")
            .field("ttl", &self.ttl)
            .field("workspaces", &self.entries.len())
            .finish()
    }
}
