mod docker;
mod engine;
#[cfg(test)]
mod scenario_tests;

use std::sync::Arc;

use judge_common::config::Config;
use judge_common::job_store::JobStore;
use judge_common::language::LanguageRegistry;
use tokio::signal;
use tracing::{error, info};

use docker::ContainerDriver;
use engine::{sweeper_loop, worker_loop, WorkerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("judge-worker booting");

    let config = Config::from_env()?;

    let registry = LanguageRegistry::load_from_file(&config.languages_config_path)
        .map_err(|e| anyhow::anyhow!("failed to load language registry: {e}"))?;
    info!(languages = ?registry.language_ids(), "loaded language registry");

    let store = JobStore::connect(&config.database_url).await?;
    store.migrate().await?;
    info!("connected to job store and applied migrations");

    // Configurable base directory for per-job working directories,
    // defaulting to the OS temp dir.
    let workdir_base = std::env::var("WORKDIR_BASE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("judge-worker"));
    std::fs::create_dir_all(&workdir_base)?;

    let ctx = WorkerContext {
        store: store.clone(),
        registry: Arc::new(registry),
        driver: ContainerDriver::new(config.container_runtime_bin.clone(), config.output_cap_bytes),
        workdir_base,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut handles = Vec::with_capacity(config.worker_count + 1);
    for i in 0..config.worker_count {
        let worker_id = format!("worker-{i}");
        let ctx = ctx.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(worker_loop(worker_id, ctx, rx)));
    }
    handles.push(tokio::spawn(sweeper_loop(
        store,
        config.stale_claim_threshold(),
        shutdown_rx,
    )));

    info!(workers = config.worker_count, "worker pool started");

    signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task panicked");
        }
    }

    info!("judge-worker shutdown complete");
    Ok(())
}
