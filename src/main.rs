use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{str::FromStr, sync::Arc};
use tokio::time::{self, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod models;
mod services;

use config::{AppConfig, BlobConfig, RunFlags};
use services::{
    blob_store::{BlobStore, LocalBlobStore},
    reaper::ExpiredTransferReaper,
    s3_blob_store::S3BlobStore,
    transfer_store::SqliteTransferStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run flags ---
    let (cfg, flags) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting transfer-reaper with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("invalid database URL `{}`", cfg.database_url))?
        .create_if_missing(flags.migrate);

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect sqlite pool")?,
    );
    let store = SqliteTransferStore::new(db);

    // --- Handle migration mode ---
    if flags.migrate {
        store.migrate().await.context("applying schema")?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize blob backend ---
    let blobs: Arc<dyn BlobStore> = match &cfg.blobs {
        BlobConfig::Local { root } => {
            let local = LocalBlobStore::new(root);
            if !local.root().is_dir() {
                tracing::warn!(
                    "Blob root {} does not exist; every delete will report a missing object",
                    local.root().display()
                );
            }
            Arc::new(local)
        }
        BlobConfig::S3(settings) => {
            let s3 = S3BlobStore::connect(settings).await;
            tracing::info!("Deleting from S3 bucket {}", s3.bucket());
            Arc::new(s3)
        }
    };

    let reaper =
        ExpiredTransferReaper::new(Arc::new(store), blobs).with_concurrency(cfg.concurrency);

    match cfg.interval {
        None => run_once(&reaper, flags).await,
        Some(period) => run_every(&reaper, period, flags, ctrl_c()).await,
    }
}

/// One pass, for an external scheduler. A failed selection exits non-zero.
async fn run_once(reaper: &ExpiredTransferReaper, flags: RunFlags) -> Result<()> {
    let summary = reaper.run(Utc::now()).await?;
    if flags.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

/// Repeat passes until `shutdown` resolves. A pass always finishes before
/// the next tick is awaited, so passes from this process never overlap.
///
/// `shutdown` is created once and polled ahead of the ticker, so a signal
/// that arrives mid-pass is seen as soon as the pass returns.
async fn run_every<F>(
    reaper: &ExpiredTransferReaper,
    period: std::time::Duration,
    flags: RunFlags,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tracing::info!("Running every {}s; press Ctrl-C to stop", period.as_secs());

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, exiting");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        match reaper.run(Utc::now()).await {
            Ok(summary) if flags.json => match serde_json::to_string(&summary) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::error!("failed to serialize summary: {}", err),
            },
            Ok(_) => {}
            Err(err) => tracing::error!("cleanup pass aborted: {}", err),
        }
    }
}

/// Resolves on the first Ctrl-C, or at once if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {}", err);
    }
}
