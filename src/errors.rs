//! Error types shared across the reaper.
//!
//! Store and bucket failures are typed so the reaper can record them per item;
//! only `ReaperError` ever escapes a pass.

use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transfer `{0}` not found")]
    TransferNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the object store. A missing object is not an error.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object store request for `{key}` failed: {message}")]
    Remote { key: String, message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that abort a whole reaper pass.
#[derive(Debug, Error)]
pub enum ReaperError {
    #[error("failed to select expired transfers: {0}")]
    Select(#[source] StoreError),
}
