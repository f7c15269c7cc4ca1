//! CodeQuest Mastery Service Binary
//!
//! Serves one learner's progress tracker over a JSON API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codequest_mastery::{
    api, config::MasteryConfig, InMemoryStore, ProgressTracker, MASTERY_VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting CodeQuest Mastery Service v{}", MASTERY_VERSION);

    // Load configuration
    let config = MasteryConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &config.storage.snapshot_path {
        load_snapshot(&store, path).await?;
    }

    info!(
        "Mastery config: threshold={}, similarity_threshold={}, level_base_xp={}",
        config.mastery.threshold, config.mastery.similarity_threshold, config.xp.level_base_xp
    );

    let tracker = Arc::new(ProgressTracker::new(store.clone(), config.clone()));
    let app = api::router(tracker);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("REST API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(path) = &config.storage.snapshot_path {
        save_snapshot(&store, path).await?;
    }

    info!("Shutting down CodeQuest Mastery Service");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Received shutdown signal");
}

async fn load_snapshot(store: &InMemoryStore, path: &str) -> Result<()> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let sessions = store
                .import_json(&json)
                .with_context(|| format!("invalid snapshot at {path}"))?;
            info!(sessions, "Restored snapshot from {}", path);
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No snapshot at {}, starting empty", path);
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read snapshot at {path}")),
    }
}

async fn save_snapshot(store: &InMemoryStore, path: &str) -> Result<()> {
    let json = store.export_json()?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write snapshot to {path}"))?;

    let stats = store.stats();
    info!(sessions = stats.sessions, records = stats.records, "Snapshot written to {}", path);
    Ok(())
}
