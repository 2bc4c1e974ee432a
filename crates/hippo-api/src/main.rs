//! Hippo control-plane server.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hippo_api::{AppState, routes};
use hippo_config::Config;
use hippo_core::release::ReleaseTrigger;
use hippo_core::sandbox::{ResourceLimits, Sandbox};
use hippo_executor::{BuildExecutor, DockerSandbox, ExecutionSettings};
use hippo_release::{HttpReleaseTrigger, LogReleaseTrigger};
use hippo_scheduler::{LifecycleController, ReleaseNotifier, WorkerConfig, WorkerPool};
use hippo_store::{
    AppStore, BuildStore, MemoryAppStore, MemoryBuildStore, PgAppStore, PgBuildStore, create_pool,
    run_migrations,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // Record stores: Postgres when a database host is configured, the
    // in-memory arena otherwise.
    let (builds, apps): (Arc<dyn BuildStore>, Arc<dyn AppStore>) = match config.database.url() {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(&url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            (
                Arc::new(PgBuildStore::new(pool.clone())),
                Arc::new(PgAppStore::new(pool)),
            )
        }
        None => {
            warn!("No database configured; using in-memory stores");
            (
                Arc::new(MemoryBuildStore::new()),
                Arc::new(MemoryAppStore::new()),
            )
        }
    };

    // Build workers, if a sandbox backend is reachable.
    match DockerSandbox::connect() {
        Ok(sandbox) => {
            let sandbox = Arc::new(sandbox);
            if sandbox.available().await {
                let mut settings = ExecutionSettings::new(config.sandbox.build_image.clone());
                settings.limits = ResourceLimits {
                    cpus: Some(config.sandbox.cpu_limit),
                    memory_bytes: Some((config.sandbox.memory_limit_mb * 1024 * 1024) as i64),
                };
                settings.step_retries = config.orchestrator.step_retries;

                let executor = Arc::new(BuildExecutor::new(
                    sandbox,
                    builds.clone(),
                    settings,
                ));
                let worker_config = WorkerConfig {
                    lease_ttl: config.orchestrator.lease_ttl,
                    poll_interval: Duration::from_secs(1),
                    build_timeout: config.orchestrator.build_timeout,
                };
                WorkerPool::spawn(
                    config.orchestrator.workers,
                    builds.clone(),
                    executor,
                    worker_config,
                );
                info!(workers = config.orchestrator.workers, "Build workers started");
            } else {
                warn!("Docker daemon not responding; builds will stay queued");
            }
        }
        Err(e) => {
            warn!(error = %e, "Docker unavailable; builds will stay queued");
        }
    }

    // Lifecycle maintenance runs regardless of sandbox availability.
    let controller = Arc::new(LifecycleController::new(
        builds.clone(),
        config.orchestrator.max_attempts,
        config.orchestrator.cancel_grace,
    ));
    let tick = (config.orchestrator.lease_ttl / 2).max(Duration::from_secs(1));
    controller.spawn(tick);

    let trigger: Arc<dyn ReleaseTrigger> = match config.release_url.clone() {
        Some(url) => Arc::new(HttpReleaseTrigger::new(url, config.secret_key.clone())),
        None => Arc::new(LogReleaseTrigger::new()),
    };
    let notifier = Arc::new(ReleaseNotifier::new(builds.clone(), trigger));
    notifier.spawn(Duration::from_secs(5));

    let state = AppState::new(builds, apps, &config);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.bind_addr);
    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
