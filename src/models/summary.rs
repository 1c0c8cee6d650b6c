//! Outcome types reported by a reaper pass.
//!
//! Every transfer and every blob key gets an explicit outcome value so that
//! partial failures are visible to callers instead of being swallowed.

use serde::Serialize;
use uuid::Uuid;

/// Result of deleting one blob key.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlobOutcome {
    /// The object existed and was removed.
    Deleted { key: String, size: i64 },
    /// Nothing stored under the key; treated as success.
    AlreadyMissing { key: String },
    /// The store returned an error. The row is still marked deleted.
    Failed { key: String, error: String },
}

impl BlobOutcome {
    pub fn key(&self) -> &str {
        match self {
            BlobOutcome::Deleted { key, .. }
            | BlobOutcome::AlreadyMissing { key }
            | BlobOutcome::Failed { key, .. } => key,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, BlobOutcome::Failed { .. })
    }
}

/// Result of processing one expired transfer.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Rows were marked deleted. Individual blobs may still have failed.
    Cleaned {
        transfer_id: Uuid,
        blobs: Vec<BlobOutcome>,
    },
    /// A store operation failed before the transfer could be marked deleted,
    /// or while marking it. It stays eligible for the next pass.
    Failed { transfer_id: Uuid, error: String },
}

impl TransferOutcome {
    pub fn transfer_id(&self) -> Uuid {
        match self {
            TransferOutcome::Cleaned { transfer_id, .. }
            | TransferOutcome::Failed { transfer_id, .. } => *transfer_id,
        }
    }

    pub fn is_cleaned(&self) -> bool {
        matches!(self, TransferOutcome::Cleaned { .. })
    }
}

/// Aggregate of one `ExpiredTransferReaper::run` pass.
#[derive(Serialize, Clone, Debug, Default)]
pub struct ReapSummary {
    /// One entry per selected transfer, in processing order.
    pub transfers: Vec<TransferOutcome>,
}

impl ReapSummary {
    pub fn selected(&self) -> usize {
        self.transfers.len()
    }

    pub fn cleaned(&self) -> usize {
        self.transfers.iter().filter(|t| t.is_cleaned()).count()
    }

    pub fn failed(&self) -> usize {
        self.selected() - self.cleaned()
    }

    fn blobs(&self) -> impl Iterator<Item = &BlobOutcome> {
        self.transfers.iter().flat_map(|t| match t {
            TransferOutcome::Cleaned { blobs, .. } => blobs.as_slice(),
            TransferOutcome::Failed { .. } => &[][..],
        })
    }

    pub fn blobs_deleted(&self) -> usize {
        self.blobs()
            .filter(|b| matches!(b, BlobOutcome::Deleted { .. }))
            .count()
    }

    pub fn blobs_missing(&self) -> usize {
        self.blobs()
            .filter(|b| matches!(b, BlobOutcome::AlreadyMissing { .. }))
            .count()
    }

    pub fn blobs_failed(&self) -> usize {
        self.blobs().filter(|b| b.is_failure()).count()
    }

    /// Transfers left undeleted by this pass.
    pub fn failed_transfer_ids(&self) -> Vec<Uuid> {
        self.transfers
            .iter()
            .filter(|t| !t.is_cleaned())
            .map(TransferOutcome::transfer_id)
            .collect()
    }

    /// Keys whose blobs may have been orphaned: their rows are marked deleted
    /// but the object store refused the delete.
    pub fn orphaned_keys(&self) -> Vec<&str> {
        self.blobs()
            .filter(|b| b.is_failure())
            .map(BlobOutcome::key)
            .collect()
    }

    /// Bytes freed by blobs that were actually removed this pass.
    pub fn bytes_reclaimed(&self) -> i64 {
        self.blobs()
            .map(|b| match b {
                BlobOutcome::Deleted { size, .. } => *size,
                _ => 0,
            })
            .sum()
    }
}
