use std::{env, sync::Arc};

use timeflux_gateway::{DynApiGateway, DynTokenStore, HttpApiGateway, MemoryTokenStore};
use timeflux_server::config::loader::load_config;
use timeflux_server::{AppState, ServerBuilder, create_rule_store, shutdown_tracing};
use timeflux_store::RuleStore;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From TIMEFLUX_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (timeflux.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (TIMEFLUX_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    timeflux_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );

    timeflux_server::observability::apply_logging_level(&cfg.logging.level);

    let store = match create_rule_store(&cfg.storage).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Rule store initialization failed: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(backend = store.backend_name(), "Rule store ready");

    let tokens: DynTokenStore = Arc::new(MemoryTokenStore::with_seed(
        cfg.workspaces.tokens.clone(),
    ));
    tracing::info!(
        workspaces = cfg.workspaces.tokens.len(),
        "Workspace credentials loaded"
    );

    let gateway: DynApiGateway = Arc::new(HttpApiGateway::new(&cfg.gateway, Arc::clone(&tokens)));
    let state = AppState::new(&cfg, store, gateway, tokens);

    let server = ServerBuilder::new()
        .with_config(cfg)
        .with_state(state)
        .build();

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
    }

    shutdown_tracing();
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: TIMEFLUX_CONFIG
/// 3. Default: timeflux.toml
fn resolve_config_path() -> (String, ConfigSource) {
    // 1. Check CLI: --config <path>
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    // 2. Check environment variable
    if let Ok(path) = env::var("TIMEFLUX_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    // 3. Default to timeflux.toml
    ("timeflux.toml".to_string(), ConfigSource::Default)
}
