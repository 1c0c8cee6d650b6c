//! Represents a transfer: a group of uploaded files sharing one expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A row of the `transfers` table.
///
/// Transfers are created by the upload flow. The reaper only ever flips
/// `deleted` to true and refreshes `updated_at`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Transfer {
    /// Primary key.
    pub id: Uuid,

    /// Secure random share token handed to recipients.
    pub token: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Once this instant has passed the transfer is eligible for reaping.
    pub expires_at: DateTime<Utc>,

    /// Soft-delete marker.
    pub deleted: bool,

    /// Sum of all file sizes in bytes.
    pub total_size: i64,
}
