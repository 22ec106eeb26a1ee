use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use droidstore_server::auth::AccessGate;
use droidstore_server::http::create_router;
use droidstore_server::orchestrator::{KubeOrchestrator, NoopOrchestrator, Orchestrator};
use droidstore_server::{AppState, Config};
use droidstore_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match &config.database_uri {
        Some(uri) => {
            let store = PgStore::connect(uri).await?;
            store.migrate().await?;
            info!("connected to postgres");
            Arc::new(store)
        }
        None => {
            warn!("no database configured; runs and tasks will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let orchestrator: Arc<dyn Orchestrator> = match KubeOrchestrator::from_cluster() {
        Ok(cluster) => Arc::new(cluster),
        Err(e) => {
            warn!(error = %e, "running without a cluster; supervising jobs are disabled");
            Arc::new(NoopOrchestrator)
        }
    };

    let gate = AccessGate::new(
        config.internal_key.clone(),
        config.jwks_uri.clone(),
        config.token_audience.clone(),
    );
    let state = AppState::new(store, orchestrator, gate);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "droidstore server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
