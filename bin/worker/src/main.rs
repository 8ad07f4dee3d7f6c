use mixtape_coordinator::{
    Coordinator, CoordinatorConfig, InMemoryBackend, InMemoryReadCache, JobService,
    StaticCredentials, StatusService, WorkerPool, WorkerRegistry,
};
use mixtape_scheduler::Scheduler;
use mixtape_worker::{config::WorkerConfig, http::HttpContentApi, runtime, seed};
use mixtape_workflow::{Credentials, Engine, EngineConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = WorkerConfig::from_env().expect("failed to load configuration");
    tracing::info!(pool_size = config.pool.size, "Loaded configuration");

    let content = Arc::new(
        HttpContentApi::new(&config.content_api).expect("failed to build content API client"),
    );
    let credentials = Arc::new(StaticCredentials::new(Credentials::bearer(
        config.content_api.access_token.clone(),
    )));

    let backend = InMemoryBackend::new();
    let scheduler = Arc::new(Scheduler::new());
    let service = JobService::new(backend.jobs.clone(), backend.runs.clone(), scheduler.clone());
    let workers = WorkerRegistry::new(backend.workers.clone());

    let engine = Engine::new(content).with_config(EngineConfig {
        max_concurrency: config.engine.max_concurrency,
    });
    let coordinator = Arc::new(
        Coordinator::new(
            engine,
            backend.jobs.clone(),
            backend.runs.clone(),
            workers.clone(),
            credentials,
        )
        .with_prepared(service.prepared())
        .with_config(CoordinatorConfig {
            worker_stale_after: Duration::from_secs(config.pool.stale_after_seconds),
        }),
    );

    let restored = service
        .restore_schedules(chrono::Utc::now())
        .await
        .expect("failed to restore schedules");
    tracing::info!(restored, "Restored stored schedules");

    if let Some(path) = &config.jobs_file {
        let summary = seed::seed_jobs(&service, path)
            .await
            .expect("failed to load jobs file");
        tracing::info!(
            saved = summary.saved,
            rejected = summary.rejected,
            scheduled = scheduler.len(),
            "Seeded jobs"
        );
    }

    // Start the worker agents
    let (jobs_tx, jobs_rx) = mpsc::channel(config.pool.size.max(1) * 4);
    let pool = WorkerPool::spawn(
        Arc::clone(&coordinator),
        jobs_rx,
        config.pool.size,
        &config.pool.device_id,
    )
    .await
    .expect("failed to start worker pool");

    let scheduler_task = tokio::spawn(runtime::scheduler_loop(
        scheduler,
        jobs_tx,
        Duration::from_secs(config.scheduler.tick_seconds.max(1)),
    ));

    let status = StatusService::new(workers, backend.runs.clone(), backend.statuses.clone())
        .with_cache(
            Arc::new(InMemoryReadCache::new()),
            Duration::from_secs(config.status.cache_ttl_seconds),
        );
    let status_task = tokio::spawn(runtime::status_loop(
        status,
        Arc::clone(&coordinator),
        Duration::from_secs(config.status.interval_seconds.max(1)),
    ));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutting down; waiting for in-flight runs");

    // Dropping the sender lets each agent finish its current run and stop.
    scheduler_task.abort();
    status_task.abort();
    pool.join().await;
    tracing::info!("Worker stopped");
}
