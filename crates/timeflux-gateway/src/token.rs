//! Per-workspace API credentials.
//!
//! Each workspace that installed the add-on has its own token, and may
//! also carry its own API base URL when the provider shards regions.

use async_trait::async_trait;
use dashmap::DashMap;

/// Credential record for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceToken {
    /// Bearer token presented on every outbound call.
    pub token: String,
    /// Workspace-specific API base URL, overriding the configured default.
    pub api_base_url: Option<String>,
}

impl WorkspaceToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base_url: None,
        }
    }

    #[must_use]
    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(api_base_url.into());
        self
    }
}

/// Lookup of workspace credentials. Injected into the gateway so hosting
/// applications can back it with whatever secret storage they have.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the credential for a workspace, or `None` when the
    /// workspace never registered one.
    async fn get(&self, workspace_id: &str) -> Option<WorkspaceToken>;

    /// Stores or replaces the credential for a workspace.
    async fn put(&self, workspace_id: &str, token: WorkspaceToken);

    /// Removes the credential for a workspace. Returns `true` when one
    /// was present.
    async fn remove(&self, workspace_id: &str) -> bool;
}

/// Shared reference to a token store implementation.
pub type DynTokenStore = std::sync::Arc<dyn TokenStore>;

/// In-memory token store, usually seeded from configuration at startup.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, WorkspaceToken>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// Seeds the store from (workspace id, token) pairs. Blank ids and
    /// blank tokens are skipped.
    pub fn with_seed<I, K, V>(seed: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (workspace_id, token) in seed {
            let workspace_id = workspace_id.into();
            let token = token.into();
            if workspace_id.trim().is_empty() || token.trim().is_empty() {
                continue;
            }
            store.tokens.insert(workspace_id, WorkspaceToken::new(token));
        }
        store
    }

    /// Number of workspaces with a stored credential.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, workspace_id: &str) -> Option<WorkspaceToken> {
        self.tokens.get(workspace_id).map(|entry| entry.value().clone())
    }

    async fn put(&self, workspace_id: &str, token: WorkspaceToken) {
        self.tokens.insert(workspace_id.to_string(), token);
    }

    async fn remove(&self, workspace_id: &str) -> bool {
        self.tokens.remove(workspace_id).is_some()
    }
}

// Compile-time check that the trait stays object safe.
#[allow(dead_code)]
fn _assert_token_store_object_safe(_store: &dyn TokenStore) {}
