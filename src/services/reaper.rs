//! src/services/reaper.rs
//!
//! ExpiredTransferReaper: one garbage-collection pass over expired transfers.
//!
//! Transfers are processed one at a time. Inside a transfer the blob deletes
//! run concurrently and are collected before the rows are touched. Failures
//! are recorded per blob and per transfer; only the initial selection query
//! can fail the pass as a whole.

use crate::{
    errors::{ReaperError, StoreResult},
    models::{
        file::TransferFile,
        summary::{BlobOutcome, ReapSummary, TransferOutcome},
        transfer::Transfer,
    },
    services::{
        blob_store::{BlobStore, DeleteOutcome},
        transfer_store::TransferStore,
    },
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct ExpiredTransferReaper {
    store: Arc<dyn TransferStore>,
    blobs: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl ExpiredTransferReaper {
    pub fn new(store: Arc<dyn TransferStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Cap on in-flight blob deletes per transfer. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one pass using `now` as the expiry cutoff and as the new
    /// `updated_at` for every row marked deleted.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReapSummary, ReaperError> {
        info!("cleanup job started");

        let expired = self
            .store
            .expired_transfers(now)
            .await
            .map_err(ReaperError::Select)?;

        if expired.is_empty() {
            info!("no expired transfers found");
            return Ok(ReapSummary::default());
        }

        info!(count = expired.len(), "found expired transfers");

        let mut summary = ReapSummary {
            transfers: Vec::with_capacity(expired.len()),
        };
        for transfer in &expired {
            summary.transfers.push(self.reap_transfer(transfer, now).await);
        }

        info!(
            selected = summary.selected(),
            cleaned = summary.cleaned(),
            failed = summary.failed(),
            blobs_deleted = summary.blobs_deleted(),
            blobs_missing = summary.blobs_missing(),
            blobs_failed = summary.blobs_failed(),
            bytes_reclaimed = summary.bytes_reclaimed(),
            "cleanup job finished"
        );
        if summary.failed() > 0 {
            warn!(transfers = ?summary.failed_transfer_ids(), "transfers left for the next pass");
        }
        if summary.blobs_failed() > 0 {
            warn!(keys = ?summary.orphaned_keys(), "objects possibly orphaned");
        }

        Ok(summary)
    }

    async fn reap_transfer(&self, transfer: &Transfer, now: DateTime<Utc>) -> TransferOutcome {
        let transfer_id = transfer.id;
        debug!(%transfer_id, expires_at = %transfer.expires_at, "cleaning transfer");

        match self.try_reap_transfer(transfer, now).await {
            Ok(blobs) => {
                info!(%transfer_id, files = blobs.len(), "transfer cleaned");
                TransferOutcome::Cleaned { transfer_id, blobs }
            }
            Err(err) => {
                error!(%transfer_id, error = %err, "error cleaning transfer");
                TransferOutcome::Failed {
                    transfer_id,
                    error: err.to_string(),
                }
            }
        }
    }

    async fn try_reap_transfer(
        &self,
        transfer: &Transfer,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<BlobOutcome>> {
        let files = self.store.live_files(transfer.id).await?;
        let blobs = self.delete_blobs(files).await;

        self.store.mark_transfer_deleted(transfer.id, now).await?;
        let marked = self.store.mark_files_deleted(transfer.id, now).await?;
        debug!(transfer_id = %transfer.id, marked, "file rows marked deleted");

        Ok(blobs)
    }

    /// Delete every file's blob, at most `concurrency` at a time.
    ///
    /// Results come back in completion order.
    async fn delete_blobs(&self, files: Vec<TransferFile>) -> Vec<BlobOutcome> {
        stream::iter(files)
            .map(|file| self.delete_blob(file))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn delete_blob(&self, file: TransferFile) -> BlobOutcome {
        let key = file.path;
        match self.blobs.delete(&key).await {
            Ok(DeleteOutcome::Deleted) => {
                info!(%key, "deleted object");
                BlobOutcome::Deleted {
                    key,
                    size: file.size,
                }
            }
            Ok(DeleteOutcome::NotFound) => {
                debug!(%key, "object already missing");
                BlobOutcome::AlreadyMissing { key }
            }
            Err(err) => {
                warn!(%key, error = %err, "failed to delete object");
                BlobOutcome::Failed {
                    key,
                    error: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{StoreError, StoreResult},
        services::{
            blob_store::testing::{MemoryBlobStore, cleanup, put, temp_bucket},
            transfer_store::{SqliteTransferStore, testing::*},
        },
    };
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into()),
            )
            .with_test_writer()
            .try_init();
    }

    /// Delegates to SQLite but fails the file query for chosen transfers.
    struct FailingFileQuery {
        inner: SqliteTransferStore,
        fail_for: HashSet<Uuid>,
    }

    #[async_trait]
    impl TransferStore for FailingFileQuery {
        async fn expired_transfers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Transfer>> {
            self.inner.expired_transfers(now).await
        }

        async fn live_files(&self, transfer_id: Uuid) -> StoreResult<Vec<TransferFile>> {
            if self.fail_for.contains(&transfer_id) {
                return Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.live_files(transfer_id).await
        }

        async fn mark_transfer_deleted(
            &self,
            transfer_id: Uuid,
            now: DateTime<Utc>,
        ) -> StoreResult<()> {
            self.inner.mark_transfer_deleted(transfer_id, now).await
        }

        async fn mark_files_deleted(
            &self,
            transfer_id: Uuid,
            now: DateTime<Utc>,
        ) -> StoreResult<u64> {
            self.inner.mark_files_deleted(transfer_id, now).await
        }
    }

    fn reaper(store: &SqliteTransferStore, blobs: Arc<dyn BlobStore>) -> ExpiredTransferReaper {
        ExpiredTransferReaper::new(Arc::new(store.clone()), blobs)
    }

    #[tokio::test]
    async fn no_expired_transfers_is_a_no_op() {
        init_test_tracing();
        let store = memory_store().await;
        let now = Utc::now();
        let future = insert_transfer(&store, now + Duration::hours(1)).await;
        insert_file(&store, future, "f/1", 10).await;
        let blobs = Arc::new(MemoryBlobStore::with_objects(["f/1"]));

        let summary = reaper(&store, blobs.clone()).run(now).await.unwrap();

        assert_eq!(summary.selected(), 0);
        assert_eq!(blobs.delete_calls(), 0);
        assert!(blobs.contains("f/1"));
        let transfer = fetch_transfer(&store, future).await;
        assert!(!transfer.deleted);
        assert_ne!(transfer.updated_at, now);
    }

    #[tokio::test]
    async fn transfers_without_files_are_marked_deleted() {
        init_test_tracing();
        let store = memory_store().await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for minutes in [30, 20, 10] {
            ids.push(insert_transfer(&store, now - Duration::minutes(minutes)).await);
        }
        let blobs = Arc::new(MemoryBlobStore::default());

        let summary = reaper(&store, blobs.clone()).run(now).await.unwrap();

        assert_eq!(summary.selected(), 3);
        assert_eq!(summary.cleaned(), 3);
        assert_eq!(blobs.delete_calls(), 0);
        for id in ids {
            assert!(fetch_transfer(&store, id).await.deleted);
        }
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        init_test_tracing();
        let store = memory_store().await;
        let now = Utc::now();
        let id = insert_transfer(&store, now - Duration::hours(1)).await;
        insert_file(&store, id, "r/1", 4).await;
        let blobs = Arc::new(MemoryBlobStore::with_objects(["r/1"]));
        let reaper = reaper(&store, blobs.clone());

        let first = reaper.run(now).await.unwrap();
        let after_first = fetch_transfer(&store, id).await;

        let later = now + Duration::minutes(10);
        let second = reaper.run(later).await.unwrap();
        let after_second = fetch_transfer(&store, id).await;

        assert_eq!(first.cleaned(), 1);
        assert_eq!(second.selected(), 0);
        assert_eq!(blobs.delete_calls(), 1);
        assert_eq!(after_first.updated_at, after_second.updated_at);
        assert!(after_second.deleted);
    }

    #[tokio::test]
    async fn blob_failure_still_marks_rows_and_spares_next_transfer() {
        init_test_tracing();
        let store = memory_store().await;
        let now = Utc::now();
        let a = insert_transfer(&store, now - Duration::hours(2)).await;
        let b = insert_transfer(&store, now - Duration::hours(1)).await;
        insert_file(&store, a, "a/bad", 1).await;
        insert_file(&store, a, "a/good", 2).await;
        insert_file(&store, b, "b/1", 3).await;
        let blobs = Arc::new(MemoryBlobStore::with_objects(["a/bad", "a/good", "b/1"]));
        blobs.fail_on("a/bad");

        let summary = reaper(&store, blobs.clone()).run(now).await.unwrap();

        assert_eq!(summary.cleaned(), 2);
        assert_eq!(summary.blobs_failed(), 1);
        assert_eq!(summary.blobs_deleted(), 2);
        assert_eq!(summary.bytes_reclaimed(), 5);
        match &summary.transfers[0] {
            TransferOutcome::Cleaned { transfer_id, blobs } => {
                assert_eq!(*transfer_id, a);
                let failed: Vec<&str> = blobs
                    .iter()
                    .filter(|b| b.is_failure())
                    .map(BlobOutcome::key)
                    .collect();
                assert_eq!(failed, vec!["a/bad"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        // orphaned, but the rows moved on
        assert!(blobs.contains("a/bad"));
        assert!(!blobs.contains("a/good"));
        assert!(!blobs.contains("b/1"));
        for id in [a, b] {
            assert!(fetch_transfer(&store, id).await.deleted);
            assert!(fetch_files(&store, id).await.iter().all(|f| f.deleted));
        }
    }

    #[tokio::test]
    async fn file_query_failure_is_isolated_to_its_transfer() {
        init_test_tracing();
        let sqlite = memory_store().await;
        let now = Utc::now();
        let a = insert_transfer(&sqlite, now - Duration::hours(2)).await;
        let b = insert_transfer(&sqlite, now - Duration::hours(1)).await;
        insert_file(&sqlite, a, "a/1", 1).await;
        insert_file(&sqlite, b, "b/1", 1).await;
        let store = FailingFileQuery {
            inner: sqlite.clone(),
            fail_for: HashSet::from([a]),
        };
        let blobs = Arc::new(MemoryBlobStore::with_objects(["a/1", "b/1"]));

        let summary = ExpiredTransferReaper::new(Arc::new(store), blobs.clone())
            .run(now)
            .await
            .unwrap();

        assert_eq!(summary.failed(), 1);
        assert!(matches!(
            &summary.transfers[0],
            TransferOutcome::Failed { transfer_id, .. } if *transfer_id == a
        ));
        assert_eq!(summary.transfers[1].transfer_id(), b);
        assert!(summary.transfers[1].is_cleaned());

        assert!(!fetch_transfer(&sqlite, a).await.deleted);
        assert!(fetch_files(&sqlite, a).await.iter().all(|f| !f.deleted));
        assert!(blobs.contains("a/1"));
        assert!(fetch_transfer(&sqlite, b).await.deleted);
        assert!(!blobs.contains("b/1"));

        // the failed transfer is picked up again by the next pass
        let retry = ExpiredTransferReaper::new(Arc::new(sqlite.clone()), blobs.clone())
            .run(now)
            .await
            .unwrap();
        assert_eq!(retry.selected(), 1);
        assert_eq!(retry.transfers[0].transfer_id(), a);
        assert!(fetch_transfer(&sqlite, a).await.deleted);
    }

    #[tokio::test]
    async fn selection_failure_aborts_the_pass() {
        init_test_tracing();
        let store = memory_store().await;
        store.db.close().await;
        let blobs = Arc::new(MemoryBlobStore::default());

        let err = reaper(&store, blobs.clone())
            .run(Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, ReaperError::Select(_)));
        assert_eq!(blobs.delete_calls(), 0);
    }

    #[tokio::test]
    async fn already_missing_blobs_count_as_success() {
        init_test_tracing();
        let store = memory_store().await;
        let now = Utc::now();
        let id = insert_transfer(&store, now - Duration::minutes(1)).await;
        insert_file(&store, id, "gone/1", 7).await;
        let blobs = Arc::new(MemoryBlobStore::default());

        let summary = reaper(&store, blobs).run(now).await.unwrap();

        assert_eq!(summary.blobs_missing(), 1);
        assert_eq!(summary.blobs_failed(), 0);
        assert_eq!(summary.bytes_reclaimed(), 0);
        assert!(fetch_transfer(&store, id).await.deleted);
    }

    #[tokio::test]
    async fn cleans_expired_transfer_on_disk_and_leaves_live_one_alone() {
        init_test_tracing();
        let store = memory_store().await;
        let bucket = temp_bucket();
        let now = Utc::now();

        let t1 = insert_transfer(&store, now - Duration::days(1)).await;
        insert_file(&store, t1, "a/1", 3).await;
        insert_file(&store, t1, "a/2", 3).await;
        put(&bucket, "a/1", b"one").await;
        put(&bucket, "a/2", b"two").await;

        let live = insert_transfer(&store, now + Duration::days(1)).await;
        insert_file(&store, live, "b/1", 3).await;
        put(&bucket, "b/1", b"three").await;

        let summary = ExpiredTransferReaper::new(Arc::new(store.clone()), Arc::new(bucket.clone()))
            .with_concurrency(2)
            .run(now)
            .await
            .unwrap();

        assert_eq!(summary.selected(), 1);
        assert_eq!(summary.blobs_deleted(), 2);
        assert!(!bucket.object_path("a/1").exists());
        assert!(!bucket.object_path("a/2").exists());
        assert!(fetch_transfer(&store, t1).await.deleted);
        assert!(fetch_files(&store, t1).await.iter().all(|f| f.deleted));

        assert!(bucket.object_path("b/1").exists());
        let untouched = fetch_transfer(&store, live).await;
        assert!(!untouched.deleted);
        assert!(fetch_files(&store, live).await.iter().all(|f| !f.deleted));

        cleanup(&bucket).await;
    }
}
