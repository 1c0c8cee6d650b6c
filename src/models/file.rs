//! Represents a single uploaded file belonging to a transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A row of the `files` table.
///
/// `path` is the object-store key of the payload; the two map one to one.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct TransferFile {
    pub id: Uuid,

    /// Owning transfer.
    pub transfer_id: Uuid,

    /// Original filename as uploaded.
    pub filename: String,

    /// Size in bytes.
    pub size: i64,

    /// Object-store key.
    pub path: String,

    /// Per-transfer ordinal (0, 1, 2, ...).
    pub file_index: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker.
    pub deleted: bool,
}
