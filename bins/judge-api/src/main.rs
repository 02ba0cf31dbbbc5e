mod handlers;
mod routes;

use std::sync::Arc;

use judge_common::config::Config;
use judge_common::job_store::JobStore;
use judge_common::language::LanguageRegistry;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for every handler: the Job Store it inserts into and reads
/// from, and the Language Registry it validates submissions against. The
/// API never talks to the Container Driver — it does not execute anything
/// itself.
pub struct AppState {
    pub store: JobStore,
    pub registry: Arc<LanguageRegistry>,
    pub config: Config,
    pub worker_count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("judge-api booting");

    let config = Config::from_env()?;

    let registry = LanguageRegistry::load_from_file(&config.languages_config_path)
        .map_err(|e| anyhow::anyhow!("failed to load language registry: {e}"))?;
    info!(languages = ?registry.language_ids(), "loaded language registry");

    // The worker applies migrations at its own startup; the API just
    // connects to an already-migrated database.
    let store = JobStore::connect(&config.database_url).await?;
    info!("connected to job store");

    let bind_addr = config.bind_addr.clone();
    let worker_count = config.worker_count;

    let state = Arc::new(AppState {
        store,
        registry: Arc::new(registry),
        config,
        worker_count,
    });

    let app = routes::routes().with_state(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
