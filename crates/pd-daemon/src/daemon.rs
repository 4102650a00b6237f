use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use pd_bridge::{api_router, ApiState};
use pd_core::config::Config;
use pd_core::store::SqliteStore;
use pd_harness::shutdown::ShutdownSignal;
use pd_integrations::source_from_config;
use pd_workflow::{local_substrate, CollectionOrchestrator, WorkflowOptions};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::worker::{WorkerRuntime, WorkerSettings};

/// The collection daemon: one worker runtime plus the HTTP API, sharing a
/// store and a shutdown signal.
///
/// Shutdown order: stop accepting HTTP connections, let the worker drain its
/// in-flight runs, then abandon whatever is still queued so waiting
/// submitters get an answer.
pub struct Daemon {
    config: Config,
    store: SqliteStore,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Open the configured store, creating its parent directory if needed.
    pub async fn new(config: Config) -> Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let path = config.store.resolved_path(&home);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let store = SqliteStore::open(&path)
            .await
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        info!(path = %path.display(), "metrics store opened");
        Ok(Self::with_store(config, store))
    }

    /// Use an already-open store.
    pub fn with_store(config: Config, store: SqliteStore) -> Self {
        Self {
            config,
            store,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A handle that can stop the daemon from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Bind `server.host:server.port` and run until shutdown.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.run_with_listener(listener).await
    }

    /// Run on an already-bound listener until shutdown.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let source = source_from_config(&self.config.source)
            .context("failed to build metrics source")?;
        info!(source = source.name(), "metrics source ready");

        let orchestrator = CollectionOrchestrator::new(
            source,
            Arc::new(self.store.clone()),
            WorkflowOptions::from(&self.config.workflow),
        )
        .with_shutdown(self.shutdown.clone());

        let (queue, substrate) = local_substrate(self.config.worker.queue_capacity);
        let worker = WorkerRuntime::new(
            Arc::new(substrate.clone()),
            orchestrator,
            WorkerSettings::from(&self.config.worker),
            self.shutdown.clone(),
        );

        let state = Arc::new(ApiState::new(self.store.clone(), queue));
        let app = api_router(state, self.config.server.allowed_origins.clone());

        let addr = listener.local_addr().context("listener has no local address")?;
        info!(%addr, "API server listening");

        let api_shutdown = self.shutdown.clone();
        let api_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { api_shutdown.wait().await })
                .await
        });

        worker.supervise().await;
        drop(worker);

        let abandoned = substrate.close();
        if abandoned > 0 {
            warn!(abandoned, "dropped queued run requests at shutdown");
        }

        match api_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "API server error"),
            Err(e) => error!(error = %e, "API server task panicked"),
        }

        info!("daemon stopped");
        Ok(())
    }
}
