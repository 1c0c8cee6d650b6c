use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::services::{reaper::DEFAULT_CONCURRENCY, s3_blob_store::S3Settings};

/// Centralized reaper configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub blobs: BlobConfig,
    /// `None` runs a single pass and exits.
    pub interval: Option<Duration>,
    pub concurrency: usize,
}

/// Which bucket the reaper deletes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobConfig {
    /// Sharded directory tree on local disk.
    Local { root: String },
    /// S3-compatible bucket (S3, R2, MinIO).
    S3(S3Settings),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBackend {
    Local,
    S3,
}

/// What the binary should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    pub migrate: bool,
    pub json: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Garbage-collects expired file transfers")]
pub struct Args {
    /// Database URL (overrides REAPER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend, `local` or `s3` (overrides REAPER_BLOB_BACKEND)
    #[arg(long, value_enum)]
    pub blob_backend: Option<BlobBackend>,

    /// Root directory of the local bucket (overrides REAPER_BLOB_ROOT)
    #[arg(long)]
    pub blob_root: Option<String>,

    /// S3 bucket name (overrides REAPER_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// S3-compatible endpoint URL (overrides REAPER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 region, `auto` for R2 (overrides REAPER_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Repeat the pass every N seconds instead of exiting (overrides REAPER_INTERVAL_SECS)
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Max concurrent blob deletes per transfer (overrides REAPER_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,

    /// Print the pass summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run flags.
    pub fn from_env_and_args() -> Result<(Self, RunFlags)> {
        let args = Args::parse();
        Self::merge(args, |key| env::var(key))
    }

    /// Merge parsed args over values read through `lookup`, then defaults.
    fn merge<F>(args: Args, lookup: F) -> Result<(Self, RunFlags)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_db = lookup("REAPER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/transfers.db".into());
        let env_interval = parse_env::<u64, _>(&lookup, "REAPER_INTERVAL_SECS")?;
        let env_concurrency = parse_env::<usize, _>(&lookup, "REAPER_CONCURRENCY")?;

        let interval = args
            .interval_secs
            .or(env_interval)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let env_backend = match lookup("REAPER_BLOB_BACKEND") {
            Ok(value) => Some(
                <BlobBackend as ValueEnum>::from_str(&value, true)
                    .map_err(|err| anyhow!(err))
                    .with_context(|| format!("parsing REAPER_BLOB_BACKEND value `{}`", value))?,
            ),
            Err(_) => None,
        };

        let blobs = match args
            .blob_backend
            .or(env_backend)
            .unwrap_or(BlobBackend::Local)
        {
            BlobBackend::Local => BlobConfig::Local {
                root: args
                    .blob_root
                    .or_else(|| lookup("REAPER_BLOB_ROOT").ok())
                    .unwrap_or_else(|| "./data/blobs".into()),
            },
            BlobBackend::S3 => BlobConfig::S3(S3Settings {
                bucket: args
                    .s3_bucket
                    .or_else(|| lookup("REAPER_S3_BUCKET").ok())
                    .context("the s3 backend needs REAPER_S3_BUCKET or --s3-bucket")?,
                endpoint: args
                    .s3_endpoint
                    .or_else(|| lookup("REAPER_S3_ENDPOINT").ok()),
                region: args
                    .s3_region
                    .or_else(|| lookup("REAPER_S3_REGION").ok())
                    .unwrap_or_else(|| "auto".into()),
            }),
        };

        let cfg = Self {
            database_url: args.database_url.unwrap_or(env_db),
            blobs,
            interval,
            concurrency: args
                .concurrency
                .or(env_concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY)
                .max(1),
        };

        Ok((
            cfg,
            RunFlags {
                migrate: args.migrate,
                json: args.json,
            },
        ))
    }
}

/// Read an optional numeric env var; present but unparsable is an error.
fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
