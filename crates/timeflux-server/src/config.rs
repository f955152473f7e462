//! Typed application configuration.
//!
//! Sources layer in a fixed order: built-in defaults, then an optional TOML
//! file (`timeflux.toml` unless overridden), then `TIMEFLUX__*` environment
//! variables with `__` as the section separator, so
//! `TIMEFLUX__SERVER__PORT=9090` overrides `[server] port`.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use timeflux_db_postgres::PostgresConfig;
use timeflux_gateway::GatewayConfig;

/// Bounds applied to the configured dedupe TTL.
const DEDUPE_TTL_MIN_MS: u64 = 60_000;
const DEDUPE_TTL_MAX_MS: u64 = 86_400_000;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub workspaces: WorkspacesConfig,
}

impl AppConfig {
    /// Checks cross-field constraints after deserialization. Errors are
    /// plain strings; they end up on stderr at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.host.parse::<IpAddr>().is_err() {
            return Err(format!(
                "server.host must be an IP address, got {:?}",
                self.server.host
            ));
        }
        if self.gateway.base_url.trim().is_empty()
            || !self.gateway.base_url.starts_with("http")
        {
            return Err(format!(
                "gateway.base_url must be an http(s) URL, got {:?}",
                self.gateway.base_url
            ));
        }
        if self.engine.async_action_threshold == 0 {
            return Err("engine.async_action_threshold must be at least 1".to_string());
        }
        if self.cache.reference_ttl_ms == 0 {
            return Err("cache.reference_ttl_ms must be positive".to_string());
        }
        if self.cache.rules_ttl_ms == 0 {
            return Err("cache.rules_ttl_ms must be positive".to_string());
        }
        if self.logging.level.trim().is_empty() {
            return Err("logging.level must not be empty".to_string());
        }
        if self.storage.backend == StorageBackend::Postgres
            && self.storage.postgres.url.trim().is_empty()
        {
            return Err(
                "storage.postgres.url must be set when storage.backend is postgres".to_string(),
            );
        }
        Ok(())
    }

    /// The socket address the server binds to.
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, IP only.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        let ip = self
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }
}

/// Which rule store implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile in-process store; rules are lost on restart.
    #[default]
    Memory,
    /// Durable store backed by PostgreSQL.
    Postgres,
}

/// Rule store selection and backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub postgres: PostgresConfig,
}

/// Execution pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When true, no invocation ever issues a mutating provider call.
    pub dry_run: bool,
    /// Abort the remaining actions of a rule once one of them fails.
    /// Failures never spill into other rules either way.
    pub stop_rule_on_action_failure: bool,
    /// Matched-action count above which live execution moves to a
    /// background task and the webhook answers `scheduled`.
    pub async_action_threshold: usize,
    /// How long a dedupe key suppresses webhook replays, in milliseconds.
    /// Read clamped to [1 minute, 24 hours].
    pub dedupe_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            stop_rule_on_action_failure: false,
            async_action_threshold: 5,
            dedupe_ttl_ms: 600_000,
        }
    }
}

impl EngineConfig {
    /// The dedupe TTL with the documented bounds applied.
    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_millis(self.dedupe_ttl_ms.clamp(DEDUPE_TTL_MIN_MS, DEDUPE_TTL_MAX_MS))
    }
}

/// Cache lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Reference snapshot lifetime in milliseconds.
    pub reference_ttl_ms: u64,
    /// Enabled-rules cache lifetime in milliseconds.
    pub rules_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reference_ttl_ms: 1_800_000,
            rules_ttl_ms: 300_000,
        }
    }
}

impl CacheConfig {
    pub fn reference_ttl(&self) -> Duration {
        Duration::from_millis(self.reference_ttl_ms)
    }

    pub fn rules_ttl(&self) -> Duration {
        Duration::from_millis(self.rules_ttl_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive. `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Workspace credential seeds.
///
/// `[workspaces.tokens]` maps workspace ids to provider API tokens; the
/// in-memory token store is seeded from it at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspacesConfig {
    pub tokens: BTreeMap<String, String>,
}

/// Configuration loading.
pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::AppConfig;

    /// Loads configuration from an optional TOML file plus `TIMEFLUX__*`
    /// environment overrides, then validates it.
    ///
    /// A missing file is not an error; defaults and the environment still
    /// apply. A present but broken file is.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let file = PathBuf::from(path);
            if file.exists() {
                builder = builder.add_source(File::from(file));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TIMEFLUX")
                .try_parsing(true)
                .separator("__"),
        );

        let merged = builder
            .build()
            .map_err(|e| format!("failed to read configuration: {e}"))?;

        let cfg: AppConfig = merged
            .try_deserialize()
            .map_err(|e| format!("failed to parse configuration: {e}"))?;

        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.addr().to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert!(!cfg.engine.dry_run);
        assert!(!cfg.engine.stop_rule_on_action_failure);
        assert_eq!(cfg.engine.async_action_threshold, 5);
        assert_eq!(cfg.engine.dedupe_ttl(), Duration::from_secs(600));
        assert_eq!(cfg.cache.reference_ttl(), Duration::from_secs(1800));
        assert_eq!(cfg.cache.rules_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.workspaces.tokens.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_dedupe_ttl_clamped() {
        let mut engine = EngineConfig::default();

        engine.dedupe_ttl_ms = 10;
        assert_eq!(engine.dedupe_ttl(), Duration::from_secs(60));

        engine.dedupe_ttl_ms = 999_999_999;
        assert_eq!(engine.dedupe_ttl(), Duration::from_secs(86_400));

        engine.dedupe_ttl_ms = 120_000;
        assert_eq!(engine.dedupe_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.server.host = "not-an-ip".to_string();
        assert!(cfg.validate().unwrap_err().contains("server.host"));

        let mut cfg = AppConfig::default();
        cfg.engine.async_action_threshold = 0;
        assert!(
            cfg.validate()
                .unwrap_err()
                .contains("async_action_threshold")
        );

        let mut cfg = AppConfig::default();
        cfg.gateway.base_url = String::new();
        assert!(cfg.validate().unwrap_err().contains("gateway.base_url"));

        let mut cfg = AppConfig::default();
        cfg.storage.backend = StorageBackend::Postgres;
        cfg.storage.postgres.url = "  ".to_string();
        assert!(cfg.validate().unwrap_err().contains("storage.postgres.url"));
    }

    #[test]
    fn test_toml_overrides_with_partial_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9090

            [storage]
            backend = "postgres"

            [storage.postgres]
            url = "postgres://db.internal/timeflux"

            [engine]
            dry_run = true

            [workspaces.tokens]
            ws-1 = "token-1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
        assert_eq!(cfg.storage.postgres.url, "postgres://db.internal/timeflux");
        assert_eq!(cfg.storage.postgres.pool_size, 10);
        assert!(cfg.engine.dry_run);
        assert_eq!(cfg.engine.async_action_threshold, 5);
        assert_eq!(cfg.workspaces.tokens.get("ws-1").map(String::as_str), Some("token-1"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_loader_reads_file_and_tolerates_missing_one() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[server]\nport = 7070\n\n[logging]\nlevel = \"debug\"").unwrap();

        let cfg = loader::load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.server.port, 7070);
        assert_eq!(cfg.logging.level, "debug");

        let cfg = loader::load_config(Some("/nonexistent/timeflux.toml")).unwrap();
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn test_loader_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[engine]\nasync_action_threshold = 0").unwrap();

        let err = loader::load_config(file.path().to_str()).unwrap_err();
        assert!(err.contains("async_action_threshold"));
    }
}
