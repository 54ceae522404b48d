use crate::config::parse::load_config;
use crate::config::Config;
use crate::queue::{DuckDbQueue, RecordQueue};
use crate::remote::HttpObjectStore;
use crate::retrieve;
use crate::sync::{run_scheduler, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("remote store error: {0}")]
    Store(#[from] crate::remote::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] crate::sync::SyncError),

    #[error("retrieval error: {0}")]
    Retrieve(#[from] crate::retrieve::RetrieveError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_engine(&config_path).await.map_err(|e| e.into())
}

pub async fn retrieve(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    retrieve_to_stdout(&config_path).await.map_err(|e| e.into())
}

fn require_config_path(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/traceship/config.yml");
            eprintln!("  /etc/traceship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'traceship config init' to generate one.");
            std::process::exit(1);
        }
    }
}

async fn run_engine(config_path: &PathBuf) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let engine = Arc::new(build_engine(&config).await?);

    let cancel = CancellationToken::new();
    let scheduler_cancel = cancel.clone();
    let scheduler_engine = Arc::clone(&engine);

    info!(
        alias = %config.sync.bucket_alias,
        interval = ?config.sync.interval,
        "Starting sync scheduler"
    );
    let scheduler_handle = tokio::spawn(async move {
        run_scheduler(scheduler_engine, scheduler_cancel).await;
    });

    signal::ctrl_c().await?;
    info!("Received shutdown signal, letting in-flight cycle finish");
    cancel.cancel();

    match scheduler_handle.await {
        Ok(()) => info!("Sync scheduler stopped"),
        Err(e) => error!(error = %e, "Scheduler task join error"),
    }

    Ok(())
}

async fn retrieve_to_stdout(config_path: &PathBuf) -> Result<(), RunError> {
    let config = load_config(config_path)?;
    let store = HttpObjectStore::new(&config.remote)?;

    let records = retrieve::retrieve_ordered(
        &store,
        &config.sync.bucket_alias,
        &config.sync.key_prefix,
    )
    .await?;

    info!(records = records.len(), "Reconstructed record stream");
    for record in &records {
        // One JSON object per line, same shape as the stored batches
        match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(error = %e, "Failed to serialize record"),
        }
    }

    Ok(())
}

async fn build_engine(config: &Config) -> Result<SyncEngine, RunError> {
    info!(path = %config.storage.path.display(), "Opening local record queue");
    let queue = Arc::new(DuckDbQueue::new(&config.storage.path)?);
    queue.init_schema().await?;

    let store = Arc::new(HttpObjectStore::new(&config.remote)?);

    let writer_id = writer_id();
    info!(writer_id = %writer_id, "Writer identity set");

    Ok(SyncEngine::new(
        queue,
        store,
        config.sync.clone(),
        writer_id,
    ))
}

/// Batch keys embed this so concurrent writers sharing a bucket alias cannot
/// collide. Hostname-derived, sanitized to key-safe characters.
fn writer_id() -> String {
    let raw = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "writer".to_string());

    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    if sanitized.is_empty() {
        "writer".to_string()
    } else {
        sanitized
    }
}
