//! Workspace reference data: tags, projects, clients, users and tasks,
//! fetched from the provider and cached as immutable snapshots.
//!
//! A snapshot is built completely off to the side and published with one
//! atomic pointer swap, so readers never observe a half-written snapshot
//! and never block on a refresh in progress.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use timeflux_core::normalize_name;
use timeflux_gateway::{DynApiGateway, GatewayResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Immutable view of one workspace's reference data.
///
/// Name keys are normalized (trim + lowercase); display names are kept
/// alongside for id lookups.
#[derive(Debug)]
pub struct WorkspaceSnapshot {
    tag_ids_by_name: HashMap<String, String>,
    tag_names_by_id: HashMap<String, String>,
    project_ids_by_name: HashMap<String, String>,
    project_names_by_id: HashMap<String, String>,
    client_ids_by_name: HashMap<String, String>,
    client_names_by_id: HashMap<String, String>,
    user_ids_by_name: HashMap<String, String>,
    user_names_by_id: HashMap<String, String>,
    /// Task ids by normalized task name, grouped per project id. BTreeMap
    /// so the any-project fallback scan has a stable order.
    task_ids_by_project: BTreeMap<String, HashMap<String, String>>,
    task_names_by_id: HashMap<String, String>,
    built_at: Instant,
    refreshed_at: OffsetDateTime,
}

/// Entity counts of one snapshot, reported by the cache REST endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotCounts {
    pub tags: usize,
    pub projects: usize,
    pub clients: usize,
    pub users: usize,
    pub tasks: usize,
}

impl WorkspaceSnapshot {
    pub fn tag_id(&self, name: &str) -> Option<&str> {
        normalize_name(name)
            .and_then(|key| self.tag_ids_by_name.get(&key))
            .map(String::as_str)
    }

    pub fn tag_name(&self, id: &str) -> Option<&str> {
        self.tag_names_by_id.get(id).map(String::as_str)
    }

    pub fn project_id(&self, name: &str) -> Option<&str> {
        normalize_name(name)
            .and_then(|key| self.project_ids_by_name.get(&key))
            .map(String::as_str)
    }

    pub fn project_name(&self, id: &str) -> Option<&str> {
        self.project_names_by_id.get(id).map(String::as_str)
    }

    pub fn client_id(&self, name: &str) -> Option<&str> {
        normalize_name(name)
            .and_then(|key| self.client_ids_by_name.get(&key))
            .map(String::as_str)
    }

    pub fn client_name(&self, id: &str) -> Option<&str> {
        self.client_names_by_id.get(id).map(String::as_str)
    }

    pub fn user_id(&self, name: &str) -> Option<&str> {
        normalize_name(name)
            .and_then(|key| self.user_ids_by_name.get(&key))
            .map(String::as_str)
    }

    pub fn user_name(&self, id: &str) -> Option<&str> {
        self.user_names_by_id.get(id).map(String::as_str)
    }

    /// Task id by name within one project.
    pub fn task_id(&self, project_id: &str, task_name: &str) -> Option<&str> {
        let key = normalize_name(task_name)?;
        self.task_ids_by_project
            .get(project_id)?
            .get(&key)
            .map(String::as_str)
    }

    /// Task id by name across every project, first match in project-id
    /// order. Returns `(project_id, task_id)`.
    pub fn task_id_any_project(&self, task_name: &str) -> Option<(&str, &str)> {
        let key = normalize_name(task_name)?;
        self.task_ids_by_project
            .iter()
            .find_map(|(project_id, tasks)| {
                tasks
                    .get(&key)
                    .map(|task_id| (project_id.as_str(), task_id.as_str()))
            })
    }

    pub fn task_name(&self, id: &str) -> Option<&str> {
        self.task_names_by_id.get(id).map(String::as_str)
    }

    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            tags: self.tag_names_by_id.len(),
            projects: self.project_names_by_id.len(),
            clients: self.client_names_by_id.len(),
            users: self.user_names_by_id.len(),
            tasks: self.task_names_by_id.len(),
        }
    }

    /// Time since this snapshot was built.
    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    pub fn refreshed_at_rfc3339(&self) -> String {
        self.refreshed_at.format(&Rfc3339).unwrap_or_default()
    }
}

/// Per-workspace slot: the published snapshot plus a refresh guard.
struct CacheEntry {
    current: ArcSwapOption<WorkspaceSnapshot>,
    refresh_guard: Mutex<()>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            refresh_guard: Mutex::new(()),
        }
    }
}

/// Caches one [`WorkspaceSnapshot`] per workspace with a fixed TTL.
pub struct ReferenceCache {
    gateway: DynApiGateway,
    ttl: Duration,
    entries: DashMap<String, Arc<CacheEntry>>,
}

impl ReferenceCache {
    pub fn new(gateway: DynApiGateway, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// The current snapshot: cached when fresh, otherwise refreshed.
    ///
    /// When the refresh fails but a stale snapshot exists, the stale one is
    /// returned so an in-progress evaluation is not broken. Without any
    /// snapshot the failure propagates.
    pub async fn get(&self, workspace_id: &str) -> GatewayResult<Arc<WorkspaceSnapshot>> {
        let entry = self.entry(workspace_id);
        if let Some(snapshot) = entry.current.load_full()
            && snapshot.age() < self.ttl
        {
            return Ok(snapshot);
        }

        let _guard = entry.refresh_guard.lock().await;
        // Another caller may have refreshed while this one waited.
        if let Some(snapshot) = entry.current.load_full()
            && snapshot.age() < self.ttl
        {
            return Ok(snapshot);
        }

        match self.build_snapshot(workspace_id).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                entry.current.store(Some(Arc::clone(&snapshot)));
                Ok(snapshot)
            }
            Err(e) => match entry.current.load_full() {
                Some(stale) => {
                    warn!(
                        workspace_id = %workspace_id,
                        error = %e,
                        age_secs = stale.age().as_secs(),
                        "Reference refresh failed, serving stale snapshot"
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Rebuilds the snapshot now, regardless of freshness. The previous
    /// snapshot stays published when the rebuild fails.
    pub async fn refresh(&self, workspace_id: &str) -> GatewayResult<Arc<WorkspaceSnapshot>> {
        let entry = self.entry(workspace_id);
        let _guard = entry.refresh_guard.lock().await;
        let snapshot = Arc::new(self.build_snapshot(workspace_id).await?);
        entry.current.store(Some(Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    /// Fire-and-forget warm-up; failures are logged and absorbed.
    pub fn refresh_async(self: &Arc<Self>, workspace_id: &str) {
        let cache = Arc::clone(self);
        let workspace_id = workspace_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.refresh(&workspace_id).await {
                warn!(
                    workspace_id = %workspace_id,
                    error = %e,
                    "Background reference refresh failed"
                );
            }
        });
    }

    /// The published snapshot, without any freshness check or refresh.
    pub fn peek(&self, workspace_id: &str) -> Option<Arc<WorkspaceSnapshot>> {
        self.entries
            .get(workspace_id)
            .and_then(|entry| entry.current.load_full())
    }

    fn entry(&self, workspace_id: &str) -> Arc<CacheEntry> {
        let entry = self
            .entries
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(CacheEntry::new()));
        Arc::clone(entry.value())
    }

    async fn build_snapshot(&self, workspace_id: &str) -> GatewayResult<WorkspaceSnapshot> {
        let started = Instant::now();
        let tags = self.gateway.get_tags(workspace_id).await?;
        let projects = self.gateway.get_projects(workspace_id).await?;
        let clients = self.gateway.get_clients(workspace_id).await?;
        let users = self.gateway.get_users(workspace_id).await?;

        let (tag_ids_by_name, tag_names_by_id) = index_named(&tags);
        let (project_ids_by_name, project_names_by_id) = index_named(&projects);
        let (client_ids_by_name, client_names_by_id) = index_named(&clients);
        let (user_ids_by_name, user_names_by_id) = index_named(&users);

        let mut task_ids_by_project = BTreeMap::new();
        let mut task_names_by_id = HashMap::new();
        for project_id in project_names_by_id.keys() {
            let tasks = self.gateway.get_tasks(workspace_id, project_id).await?;
            let (task_ids_by_name, names_by_id) = index_named(&tasks);
            task_names_by_id.extend(names_by_id);
            if !task_ids_by_name.is_empty() {
                task_ids_by_project.insert(project_id.clone(), task_ids_by_name);
            }
        }

        let snapshot = WorkspaceSnapshot {
            tag_ids_by_name,
            tag_names_by_id,
            project_ids_by_name,
            project_names_by_id,
            client_ids_by_name,
            client_names_by_id,
            user_ids_by_name,
            user_names_by_id,
            task_ids_by_project,
            task_names_by_id,
            built_at: Instant::now(),
            refreshed_at: OffsetDateTime::now_utc(),
        };
        let counts = snapshot.counts();
        debug!(
            workspace_id = %workspace_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            tags = counts.tags,
            projects = counts.projects,
            tasks = counts.tasks,
            "Reference snapshot built"
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("ttl", &self.ttl)
            .field("workspaces", &self.entries.len())
            .finish()
    }
}

/// Indexes `{id, name}` records into `(ids_by_normalized_name, names_by_id)`.
/// On duplicate names the first id wins, in provider order.
fn index_named(items: &[Value]) -> (HashMap<String, String>, HashMap<String, String>) {
    let mut ids_by_name = HashMap::new();
    let mut names_by_id = HashMap::new();
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            continue;
        };
        let name = item.get("name").and_then(Value::as_str).unwrap_or("");
        names_by_id.insert(id.to_string(), name.to_string());
        if let Some(key) = normalize_name(name) {
            ids_by_name.entry(key).or_insert_with(|| id.to_string());
        }
    }
    (ids_by_name, names_by_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use timeflux_core::HttpMethod;
    use timeflux_gateway::{ApiGateway, GatewayError};

    const WS: &str = "ws-ref";

    /// Serves canned reference listings and counts `get_tags` calls as a
    /// proxy for full snapshot builds.
    struct StubGateway {
        builds: AtomicUsize,
        offline: AtomicBool,
        tags: Vec<Value>,
        projects: Vec<Value>,
        tasks: Vec<Value>,
    }

    impl StubGateway {
        fn new() -> Self {
            Self {
                builds: AtomicUsize::new(0),
                offline: AtomicBool::new(false),
                tags: vec![json!({"id": "t1", "name": "Bug"})],
                projects: vec![json!({"id": "p1", "name": "Website"})],
                tasks: vec![json!({"id": "task1", "name": "Review"})],
            }
        }

        fn check_online(&self) -> GatewayResult<()> {
            if self.offline.load(Ordering::SeqCst) {
                Err(GatewayError::transport("stub offline"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ApiGateway for StubGateway {
        async fn get_tags(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.check_online()?;
            Ok(self.tags.clone())
        }

        async fn create_tag(&self, _ws: &str, _name: &str) -> GatewayResult<Value> {
            Err(GatewayError::invalid_request("not supported by stub"))
        }

        async fn get_projects(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            self.check_online()?;
            Ok(self.projects.clone())
        }

        async fn get_clients(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            self.check_online()?;
            Ok(vec![json!({"id": "c1", "name": "Acme"})])
        }

        async fn get_users(&self, _ws: &str) -> GatewayResult<Vec<Value>> {
            self.check_online()?;
            Ok(vec![json!({"id": "u1", "name": "Dana"})])
        }

        async fn get_tasks(&self, _ws: &str, _project_id: &str) -> GatewayResult<Vec<Value>> {
            self.check_online()?;
            Ok(self.tasks.clone())
        }

        async fn get_time_entry(&self, _ws: &str, _entry_id: &str) -> GatewayResult<Value> {
            Err(GatewayError::invalid_request("not supported by stub"))
        }

        async fn update_time_entry(
            &self,
            _ws: &str,
            _entry_id: &str,
            _patch: &Value,
        ) -> GatewayResult<Value> {
            Err(GatewayError::invalid_request("not supported by stub"))
        }

        async fn openapi_call(
            &self,
            _ws: &str,
            _method: HttpMethod,
            _path: &str,
            _body: Option<&Value>,
        ) -> GatewayResult<u16> {
            Err(GatewayError::invalid_request("not supported by stub"))
        }
    }

    fn cache_with_ttl(ttl: Duration) -> (Arc<ReferenceCache>, Arc<StubGateway>) {
        let stub = Arc::new(StubGateway::new());
        let gateway: DynApiGateway = stub.clone();
        (Arc::new(ReferenceCache::new(gateway, ttl)), stub)
    }

    #[tokio::test]
    async fn test_get_builds_once_and_caches() {
        let (cache, stub) = cache_with_ttl(Duration::from_secs(1800));

        let first = cache.get(WS).await.unwrap();
        let second = cache.get(WS).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stub.builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            first.counts(),
            SnapshotCounts {
                tags: 1,
                projects: 1,
                clients: 1,
                users: 1,
                tasks: 1
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_forces_rebuild() {
        let (cache, stub) = cache_with_ttl(Duration::from_secs(1800));

        let first = cache.get(WS).await.unwrap();
        let refreshed = cache.refresh(WS).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(stub.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_snapshot_served_when_refresh_fails() {
        let (cache, stub) = cache_with_ttl(Duration::from_millis(50));

        let first = cache.get(WS).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        stub.offline.store(true, Ordering::SeqCst);

        // Expired snapshot triggers a refresh attempt; its failure is
        // absorbed and the stale snapshot comes back.
        let stale = cache.get(WS).await.unwrap();
        assert!(Arc::ptr_eq(&first, &stale));

        // An explicit refresh reports the failure instead.
        assert!(cache.refresh(WS).await.is_err());
        assert!(cache.peek(WS).is_some());
    }

    #[tokio::test]
    async fn test_failure_without_snapshot_propagates() {
        let (cache, stub) = cache_with_ttl(Duration::from_secs(1800));
        stub.offline.store(true, Ordering::SeqCst);

        assert!(cache.get(WS).await.is_err());
        assert!(cache.peek(WS).is_none());
    }

    #[tokio::test]
    async fn test_lookups_normalize_names() {
        let (cache, _stub) = cache_with_ttl(Duration::from_secs(1800));
        let snapshot = cache.get(WS).await.unwrap();

        assert_eq!(snapshot.tag_id("  BUG "), Some("t1"));
        assert_eq!(snapshot.tag_name("t1"), Some("Bug"));
        assert_eq!(snapshot.project_id("website"), Some("p1"));
        assert_eq!(snapshot.project_name("p1"), Some("Website"));
        assert_eq!(snapshot.client_id("acme "), Some("c1"));
        assert_eq!(snapshot.client_name("c1"), Some("Acme"));
        assert_eq!(snapshot.user_id("DANA"), Some("u1"));
        assert_eq!(snapshot.user_name("u1"), Some("Dana"));
        assert_eq!(snapshot.task_id("p1", "REVIEW"), Some("task1"));
        assert_eq!(snapshot.task_id("p2", "Review"), None);
        assert_eq!(snapshot.task_id_any_project("review"), Some(("p1", "task1")));
        assert_eq!(snapshot.task_name("task1"), Some("Review"));
        assert_eq!(snapshot.tag_id("   "), None);
    }
}
