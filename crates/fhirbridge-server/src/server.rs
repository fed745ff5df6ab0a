use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{Router, middleware, routing::get};
use fhirbridge_db_memory::{DynResourceStore, create_resource_store};
use fhirbridge_storage::ResourceStore;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{AppConfig, StorageBackend};
use crate::jobs::{JobRunner, JobStore};
use crate::operations::bulk::{BulkContext, BulkSettings, ExportOrchestrator, ImportOrchestrator};
use crate::upstream::RemoteFhirStore;
use crate::{handlers, middleware as app_middleware, routes};

/// Shared handler state. Owns both orchestrators, which share one job store
/// and one worker pool.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub export: Arc<ExportOrchestrator>,
    pub import: Arc<ImportOrchestrator>,
    pub runner: JobRunner,
    /// Public base URL without trailing slash.
    pub base_url: String,
}

impl AppState {
    /// Build state with the resource store selected by configuration.
    pub fn from_config(cfg: AppConfig) -> anyhow::Result<Self> {
        let store: DynResourceStore = match cfg.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory resource store");
                create_resource_store()
            }
            StorageBackend::Remote => {
                let base_url = cfg
                    .storage
                    .remote
                    .base_url
                    .clone()
                    .context("storage.remote.base_url is required for the remote backend")?;
                tracing::info!(base_url = %base_url, "Using upstream FHIR server");
                let remote = RemoteFhirStore::new(base_url, cfg.storage.remote.timeout())
                    .context("failed to create upstream FHIR client")?;
                Arc::new(remote)
            }
        };
        Ok(Self::with_store(cfg, store))
    }

    /// Build state around an existing resource store.
    pub fn with_store(cfg: AppConfig, store: Arc<dyn ResourceStore>) -> Self {
        let base_url = cfg.base_url();
        let jobs = Arc::new(JobStore::new());
        let runner = JobRunner::new(jobs, cfg.bulk.max_concurrent_jobs, cfg.bulk.job_timeout());
        let settings = BulkSettings::from_config(&cfg.bulk, base_url.clone());
        let ctx = Arc::new(BulkContext::new(runner.clone(), store, settings));

        Self {
            config: Arc::new(cfg),
            export: Arc::new(ExportOrchestrator::new(ctx.clone())),
            import: Arc::new(ImportOrchestrator::new(ctx)),
            runner,
            base_url,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(routes::router())
        .with_state(state)
        // Middleware stack (order: request id -> cors/trace -> body limit)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct FhirBridgeServer {
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    store: Option<Arc<dyn ResourceStore>>,
    shutdown: Option<CancellationToken>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            store: None,
            shutdown: None,
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

    /// Use this resource store instead of the configured backend.
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Stop serving when `token` is cancelled, in addition to Ctrl+C.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> anyhow::Result<FhirBridgeServer> {
        let state = match self.store {
            Some(store) => AppState::with_store(self.config, store),
            None => AppState::from_config(self.config)?,
        };

        Ok(FhirBridgeServer {
            addr: self.addr,
            state,
            shutdown: self.shutdown.unwrap_or_default(),
        })
    }
}

impl FhirBridgeServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let bulk = &self.state.config.bulk;
        let cleanup = self.state.runner.start_cleanup_task(
            bulk.export_path.clone(),
            bulk.retention(),
            bulk.cleanup_interval(),
        );

        tracing::info!("listening on {}", listener.local_addr()?);
        let app = build_app(self.state);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.shutdown))
            .await;

        cleanup.abort();
        result?;
        Ok(())
    }
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = token.cancelled() => {}
    }
    tracing::info!("shutdown signal received");
}
