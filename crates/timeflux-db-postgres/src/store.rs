//! Durable rule store backed by PostgreSQL.
//!
//! Rules are stored as opaque JSON documents keyed by (workspace_id,
//! rule_id), matching the in-memory backend's observable behavior. No JSON
//! querying happens in SQL; filtering on the enabled flag is done after
//! deserialization.

use async_trait::async_trait;
use sqlx_core::error::Error as SqlxError;
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use timeflux_core::Rule;
use timeflux_store::{RuleStore, StoreError, require_rule_id, require_workspace_id};
use tracing::{debug, instrument};

use crate::config::PostgresConfig;
use crate::pool::create_pool;

const CREATE_RULES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rules (
    workspace_id VARCHAR(128) NOT NULL,
    rule_id      VARCHAR(128) NOT NULL,
    rule_json    TEXT NOT NULL,
    PRIMARY KEY (workspace_id, rule_id)
)
"#;

/// Maps a sqlx error to the store error taxonomy.
///
/// Connectivity failures (I/O, pool exhaustion, SQLSTATE class 08) become
/// `Unavailable` so callers can tell an unreachable store from a corrupt one.
fn map_db_err(op: &str, err: SqlxError) -> StoreError {
    match &err {
        SqlxError::Io(_) | SqlxError::Tls(_) | SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
            StoreError::unavailable(format!("{op}: {err}"))
        }
        SqlxError::Database(db) if db.code().as_deref().is_some_and(|c| c.starts_with("08")) => {
            StoreError::unavailable(format!("{op}: {err}"))
        }
        SqlxError::Decode(_) | SqlxError::ColumnDecode { .. } => {
            StoreError::serialization(format!("{op}: {err}"))
        }
        _ => StoreError::internal(format!("{op}: {err}")),
    }
}

fn parse_rule(json: &str) -> Result<Rule, StoreError> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::serialization(format!("Stored rule is not valid JSON: {e}")))
}

/// PostgreSQL implementation of the [`RuleStore`] contract.
pub struct PostgresRuleStore {
    pool: PgPool,
}

impl PostgresRuleStore {
    /// Wraps an existing connection pool. Call [`ensure_schema`] before use.
    ///
    /// [`ensure_schema`]: Self::ensure_schema
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the given configuration and bootstraps the schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = create_pool(config).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates the `rules` table if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        query(CREATE_RULES_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("Failed to create rules table", e))?;
        debug!("rules table ready");
        Ok(())
    }

    /// Returns the underlying pool, for health checks.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    async fn save(&self, workspace_id: &str, mut rule: Rule) -> Result<Rule, StoreError> {
        require_workspace_id(workspace_id)?;
        rule.ensure_id();
        let json = serde_json::to_string(&rule)?;

        query(
            r#"
            INSERT INTO rules (workspace_id, rule_id, rule_json)
            VALUES ($1, $2, $3)
            ON CONFLICT (workspace_id, rule_id) DO UPDATE SET rule_json = EXCLUDED.rule_json
            "#,
        )
        .bind(workspace_id)
        .bind(&rule.id)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to save rule", e))?;

        Ok(rule)
    }

    async fn get(&self, workspace_id: &str, rule_id: &str) -> Result<Option<Rule>, StoreError> {
        require_workspace_id(workspace_id)?;
        require_rule_id(rule_id)?;

        let json: Option<String> =
            query_scalar("SELECT rule_json FROM rules WHERE workspace_id = $1 AND rule_id = $2")
                .bind(workspace_id)
                .bind(rule_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_db_err("Failed to get rule", e))?;

        json.as_deref().map(parse_rule).transpose()
    }

    async fn get_all(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError> {
        require_workspace_id(workspace_id)?;

        let rows: Vec<String> =
            query_scalar("SELECT rule_json FROM rules WHERE workspace_id = $1 ORDER BY rule_id")
                .bind(workspace_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_db_err("Failed to get rules", e))?;

        rows.iter().map(|json| parse_rule(json)).collect()
    }

    async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>, StoreError> {
        let mut rules = self.get_all(workspace_id).await?;
        rules.retain(|rule| rule.enabled);
        Ok(rules)
    }

    async fn delete(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError> {
        require_workspace_id(workspace_id)?;
        require_rule_id(rule_id)?;

        let result = query("DELETE FROM rules WHERE workspace_id = $1 AND rule_id = $2")
            .bind(workspace_id)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("Failed to delete rule", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, workspace_id: &str) -> Result<u64, StoreError> {
        require_workspace_id(workspace_id)?;

        let result = query("DELETE FROM rules WHERE workspace_id = $1")
            .bind(workspace_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("Failed to delete all rules", e))?;

        Ok(result.rows_affected())
    }

    async fn exists(&self, workspace_id: &str, rule_id: &str) -> Result<bool, StoreError> {
        require_workspace_id(workspace_id)?;
        require_rule_id(rule_id)?;

        let exists: bool = query_scalar(
            "SELECT EXISTS(SELECT 1 FROM rules WHERE workspace_id = $1 AND rule_id = $2)",
        )
        .bind(workspace_id)
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("Failed to check existence", e))?;

        Ok(exists)
    }

    async fn count(&self, workspace_id: &str) -> Result<u64, StoreError> {
        require_workspace_id(workspace_id)?;

        let count: i64 = query_scalar("SELECT COUNT(*) FROM rules WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("Failed to count rules", e))?;

        Ok(count as u64)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        query("DELETE FROM rules")
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("Failed to clear rules", e))?;
        Ok(())
    }

    async fn list_workspaces(&self) -> Result<Vec<String>, StoreError> {
        let workspaces: Vec<String> =
            query_scalar("SELECT DISTINCT workspace_id FROM rules ORDER BY workspace_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_db_err("Failed to list workspaces", e))?;
        Ok(workspaces)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
