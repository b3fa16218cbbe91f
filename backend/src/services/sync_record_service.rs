//! Sync record persistence.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{conflict_on_unique, AppError, Result};
use crate::models::sync_record::{SyncRecord, SyncStatus};

const SYNC_COLUMNS: &str = "id, database_id, collections, status, progress, error, is_finished, \
                            started_at, completed_at, created_at, updated_at";

/// Write side of a sync record, used by the job handler.
#[async_trait]
pub trait SyncStatusWriter: Send + Sync {
    /// Record a status change. Terminal statuses finish the record; a
    /// finished record is never modified again.
    async fn update_status(
        &self,
        id: Uuid,
        status: SyncStatus,
        progress: i32,
        error: Option<&str>,
    ) -> Result<()>;

    /// Fail an unfinished record, keeping the progress it reached.
    async fn fail_unfinished(&self, id: Uuid, error: &str) -> Result<()>;
}

pub struct SyncRecordService {
    db: PgPool,
}

impl SyncRecordService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a pending record. Fails with `Conflict` while another record
    /// of the same database is unfinished.
    pub async fn create_pending(&self, database_id: Uuid, collections: &[String]) -> Result<SyncRecord> {
        sqlx::query_as::<_, SyncRecord>(&format!(
            r#"
            INSERT INTO index_syncs (database_id, collections, status, progress)
            VALUES ($1, $2, 'pending', 0)
            RETURNING {SYNC_COLUMNS}
            "#
        ))
        .bind(database_id)
        .bind(collections)
        .fetch_one(&self.db)
        .await
        .map_err(|e| conflict_on_unique(e, "A sync is already in progress for this database"))
    }

    pub async fn find_unfinished(&self, database_id: Uuid) -> Result<Option<SyncRecord>> {
        sqlx::query_as::<_, SyncRecord>(&format!(
            "SELECT {SYNC_COLUMNS} FROM index_syncs WHERE database_id = $1 AND is_finished = false"
        ))
        .bind(database_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn get(&self, id: Uuid) -> Result<SyncRecord> {
        sqlx::query_as::<_, SyncRecord>(&format!(
            "SELECT {SYNC_COLUMNS} FROM index_syncs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Sync not found".to_string()))
    }

    /// Syncs of a database, newest first.
    pub async fn list_by_database(
        &self,
        database_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SyncRecord>, i64)> {
        let records = sqlx::query_as::<_, SyncRecord>(&format!(
            r#"
            SELECT {SYNC_COLUMNS} FROM index_syncs
            WHERE database_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(database_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_syncs WHERE database_id = $1")
            .bind(database_id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((records, total))
    }
}

#[async_trait]
impl SyncStatusWriter for SyncRecordService {
    async fn update_status(
        &self,
        id: Uuid,
        status: SyncStatus,
        progress: i32,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE index_syncs
            SET status = $2,
                progress = $3,
                error = COALESCE($4, error),
                is_finished = $5,
                completed_at = CASE WHEN $2 = 'completed'::index_sync_status THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND is_finished = false
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(progress.clamp(0, 100))
        .bind(error)
        .bind(status.is_terminal())
        .execute(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::warn!(sync_id = %id, status = %status, "Sync record missing or already finished");
        }
        Ok(())
    }

    async fn fail_unfinished(&self, id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE index_syncs
            SET status = 'failed', error = $2, is_finished = true, updated_at = NOW()
            WHERE id = $1 AND is_finished = false
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::warn!(sync_id = %id, "Sync record missing or already finished");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory status writer for job handler tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct StatusUpdate {
        pub status: SyncStatus,
        pub progress: i32,
        pub error: Option<String>,
    }

    #[derive(Default)]
    pub struct RecordingStatusWriter {
        pub updates: Mutex<Vec<StatusUpdate>>,
    }

    impl RecordingStatusWriter {
        pub fn last(&self) -> Option<StatusUpdate> {
            self.updates.lock().unwrap().last().cloned()
        }

        pub fn progress_trail(&self) -> Vec<i32> {
            self.updates.lock().unwrap().iter().map(|u| u.progress).collect()
        }
    }

    #[async_trait]
    impl SyncStatusWriter for RecordingStatusWriter {
        async fn update_status(
            &self,
            _id: Uuid,
            status: SyncStatus,
            progress: i32,
            error: Option<&str>,
        ) -> Result<()> {
            let mut updates = self.updates.lock().unwrap();
            if updates.last().is_some_and(|u| u.status.is_terminal()) {
                return Ok(());
            }
            updates.push(StatusUpdate {
                status,
                progress,
                error: error.map(str::to_string),
            });
            Ok(())
        }

        async fn fail_unfinished(&self, _id: Uuid, error: &str) -> Result<()> {
            let mut updates = self.updates.lock().unwrap();
            let progress = match updates.last() {
                Some(last) if last.status.is_terminal() => return Ok(()),
                Some(last) => last.progress,
                None => 0,
            };
            updates.push(StatusUpdate {
                status: SyncStatus::Failed,
                progress,
                error: Some(error.to_string()),
            });
            Ok(())
        }
    }
}
