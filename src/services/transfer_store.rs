//! src/services/transfer_store.rs
//!
//! TransferStore: the relational side of the reaper. Selects expired
//! transfers, lists their live files, and soft-deletes rows. Every update is
//! an unconditional SET so overlapping passes converge on the same state.

use crate::{
    errors::{StoreError, StoreResult},
    models::{file::TransferFile, transfer::Transfer},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Operations the reaper needs from the relational store.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Transfers with `expires_at <= now` and `deleted = false`, oldest expiry first.
    async fn expired_transfers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Transfer>>;

    /// Files of a transfer that are not yet soft-deleted.
    async fn live_files(&self, transfer_id: Uuid) -> StoreResult<Vec<TransferFile>>;

    /// Set `deleted = true` and `updated_at = now` on the transfer row.
    async fn mark_transfer_deleted(&self, transfer_id: Uuid, now: DateTime<Utc>)
    -> StoreResult<()>;

    /// Set `deleted = true` and `updated_at = now` on every file of the
    /// transfer. Returns the number of rows touched.
    async fn mark_files_deleted(&self, transfer_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// SQLite-backed `TransferStore`.
#[derive(Clone)]
pub struct SqliteTransferStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteTransferStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema statement by statement.
    ///
    /// Every statement is `IF NOT EXISTS`, so running this twice is harmless.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = schema_statements(SCHEMA_SQL);

        info!("Running {} migration statements...", statements.len());

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt.as_str()).execute(&*self.db).await?;
        }

        Ok(statements.len())
    }
}

/// Split a schema file into statements. `--` comment lines are dropped first
/// so a `;` inside a comment cannot cut a statement in two.
fn schema_statements(sql: &str) -> Vec<String> {
    let code = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    code.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl TransferStore for SqliteTransferStore {
    async fn expired_transfers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, Transfer>(
            "SELECT id, token, created_at, updated_at, expires_at, deleted, total_size
             FROM transfers
             WHERE expires_at <= ? AND deleted = 0
             ORDER BY expires_at ASC, id ASC",
        )
        .bind(now)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows)
    }

    async fn live_files(&self, transfer_id: Uuid) -> StoreResult<Vec<TransferFile>> {
        let rows = sqlx::query_as::<_, TransferFile>(
            "SELECT id, transfer_id, filename, size, path, file_index,
                    created_at, updated_at, deleted
             FROM files
             WHERE transfer_id = ? AND deleted = 0
             ORDER BY file_index ASC",
        )
        .bind(transfer_id)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows)
    }

    async fn mark_transfer_deleted(
        &self,
        transfer_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE transfers SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(transfer_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TransferNotFound(transfer_id));
        }

        Ok(())
    }

    async fn mark_files_deleted(&self, transfer_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE files SET deleted = 1, updated_at = ? WHERE transfer_id = ?")
                .bind(now)
                .bind(transfer_id)
                .execute(&*self.db)
                .await?;

        Ok(result.rows_affected())
    }
}
