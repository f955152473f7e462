//! HTTP server assembly: shared state, middleware stack and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use timeflux_db_memory::MemoryRuleStore;
use timeflux_gateway::{DynApiGateway, DynTokenStore, HttpApiGateway, MemoryTokenStore};
use timeflux_store::DynRuleStore;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cache::{ReferenceCache, RulesCache};
use crate::config::AppConfig;
use crate::handlers;
use crate::pipeline::Pipeline;

/// Slow provider calls must not pin webhook connections forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared resources handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: DynRuleStore,
    pub rules_cache: Arc<RulesCache>,
    pub reference_cache: Arc<ReferenceCache>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wires the caches and the pipeline around the given backends.
    pub fn new(
        cfg: &AppConfig,
        store: DynRuleStore,
        gateway: DynApiGateway,
        tokens: DynTokenStore,
    ) -> Self {
        let rules_cache = Arc::new(RulesCache::new(Arc::clone(&store), cfg.cache.rules_ttl()));
        let reference_cache = Arc::new(ReferenceCache::new(
            gateway.clone(),
            cfg.cache.reference_ttl(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&rules_cache),
            Arc::clone(&reference_cache),
            gateway,
            tokens,
            cfg.engine.clone(),
        ));
        Self {
            store,
            rules_cache,
            reference_cache,
            pipeline,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    handlers::routes()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http.request",
                        http.method = %method,
                        http.target = %uri,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    state: Option<AppState>,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            state: None,
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Uses pre-wired state instead of the defaults built from config.
    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> TimefluxServer {
        let state = self
            .state
            .unwrap_or_else(|| default_state(&self.config));
        let app = build_app(state);

        TimefluxServer {
            addr: self.addr,
            app,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory store plus an HTTP gateway; what a config-only start gets.
fn default_state(cfg: &AppConfig) -> AppState {
    let store: DynRuleStore = Arc::new(MemoryRuleStore::new());
    let tokens: DynTokenStore = Arc::new(MemoryTokenStore::with_seed(
        cfg.workspaces.tokens.clone(),
    ));
    let gateway: DynApiGateway = Arc::new(HttpApiGateway::new(&cfg.gateway, Arc::clone(&tokens)));
    AppState::new(cfg, store, gateway, tokens)
}

pub struct TimefluxServer {
    addr: SocketAddr,
    app: Router,
}

impl TimefluxServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
