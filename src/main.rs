use anyhow::{Context, Result};
use batch_exchange::{config, consumer, db, jobstore, metrics, queue, scheduler};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/batch-exchange.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let metrics: Arc<dyn metrics::Metrics> = Arc::new(metrics::NoopMetrics);

    let jobstore_url = Url::parse(&cfg.jobstore.base_url).context("invalid jobstore.base_url")?;
    let jobstore: Arc<dyn jobstore::JobStoreService> = Arc::new(jobstore::JobStoreClient::new(
        jobstore_url,
        Duration::from_secs(cfg.jobstore.timeout_seconds),
    ));

    // Finalizer scheduler with liveness probe.
    let liveness = scheduler::Liveness::new();
    let liveness_threshold = Duration::from_secs(cfg.app.liveness_threshold_seconds);
    tokio::spawn(scheduler::run_finalizer_loop(
        pool.clone(),
        jobstore,
        metrics.clone(),
        liveness.clone(),
        Duration::from_millis(cfg.app.poll_interval_ms),
        cfg.app.claim_timeout_seconds as i64,
    ));

    // Surface the probe for external health checks via the log until a
    // status endpoint fronts this service.
    let probe = liveness.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(liveness_threshold);
        loop {
            ticker.tick().await;
            if probe.is_down(liveness_threshold) {
                warn!("liveness probe is down: no clean finalizer attempt within threshold");
            }
        }
    });

    // Consumer workers (queue-driven, parallel).
    let queue_url = Url::parse(&cfg.queue.base_url).context("invalid queue.base_url")?;
    let chunk_queue = Arc::new(queue::HttpChunkQueue::new(queue_url, cfg.queue.name.clone()));
    let idle_sleep = Duration::from_millis(cfg.queue.idle_sleep_ms);

    info!(queue = %cfg.queue.name, workers = cfg.queue.workers, "starting batch-exchange sink");
    let mut workers = Vec::new();
    for _ in 0..cfg.queue.workers {
        let queue = chunk_queue.clone();
        let pool = pool.clone();
        let metrics = metrics.clone();
        workers.push(tokio::spawn(async move {
            consumer::run_consumer(queue.as_ref(), &pool, metrics.as_ref(), idle_sleep).await;
        }));
    }
    for worker in workers {
        worker.await?;
    }

    Ok(())
}
