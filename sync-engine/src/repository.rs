//! # Checkpoint Repository
//!
//! Database persistence for checkpoint history.
//!
//! ## Overview
//!
//! Checkpoint rows are append-only run records: one insert per run,
//! updates only while the run is live, never mutated after reaching a
//! terminal state. The repository also answers the two questions the
//! orchestrator asks before a run: is a sync already active for this
//! (source, entity), and what is the latest successful completion time
//! to seed the delta window.

use crate::checkpoint::{
    Checkpoint, CheckpointId, SyncCounts, SyncMode, SyncProgress, SyncStatus,
};
use crate::{Result, SyncError};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for checkpoint persistence
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Insert a new checkpoint row
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Update an existing checkpoint row
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint doesn't exist or the
    /// database operation fails
    async fn update(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Find a checkpoint by ID
    async fn find_by_id(&self, id: &CheckpointId) -> Result<Option<Checkpoint>>;

    /// All checkpoints for one (source, entity), most recent first
    async fn find_by_entity(&self, source: &str, entity: &str) -> Result<Vec<Checkpoint>>;

    /// All checkpoints in a given status, most recent first
    async fn find_by_status(&self, status: SyncStatus) -> Result<Vec<Checkpoint>>;

    /// The most recent successful checkpoint for one (source, entity).
    ///
    /// Its completion time becomes the next incremental run's `since`.
    async fn latest_successful(&self, source: &str, entity: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoint history for one (source, entity), most recent first
    async fn get_history(&self, source: &str, entity: &str, limit: u32) -> Result<Vec<Checkpoint>>;

    /// Whether a pending or running sync exists for this (source, entity)
    async fn has_active_sync(&self, source: &str, entity: &str) -> Result<bool>;

    /// Mark `Running` checkpoints older than `max_age_secs` as failed.
    ///
    /// Reclaims runs orphaned by process kills; returns how many rows
    /// were reconciled.
    async fn reconcile_stale(&self, max_age_secs: i64) -> Result<u64>;

    /// Delete a checkpoint row
    async fn delete(&self, id: &CheckpointId) -> Result<()>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of CheckpointRepository
pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    /// Create a new SQLite checkpoint repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint table if it does not exist
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_checkpoints (
                id TEXT PRIMARY KEY NOT NULL,
                source TEXT NOT NULL,
                entity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                mode TEXT NOT NULL,
                since INTEGER,
                pages_fetched INTEGER DEFAULT 0,
                rows_fetched INTEGER DEFAULT 0,
                records_written INTEGER DEFAULT 0,
                phase TEXT NOT NULL DEFAULT 'initializing',
                processed INTEGER DEFAULT 0,
                created INTEGER DEFAULT 0,
                updated INTEGER DEFAULT 0,
                skipped INTEGER DEFAULT 0,
                errors INTEGER DEFAULT 0,
                corruption_warnings INTEGER DEFAULT 0,
                error_message TEXT,
                config TEXT,
                started_at INTEGER,
                completed_at INTEGER,
                created_at INTEGER NOT NULL,
                CONSTRAINT sync_checkpoints_status_check CHECK (
                    status IN ('pending', 'running', 'success', 'partial', 'failed')
                ),
                CONSTRAINT sync_checkpoints_mode_check CHECK (
                    mode IN ('full', 'incremental', 'forced')
                )
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

const CHECKPOINT_COLUMNS: &str = r#"
    id, source, entity, status, mode, since,
    pages_fetched, rows_fetched, records_written, phase,
    processed, created, updated, skipped, errors, corruption_warnings,
    error_message, config, started_at, completed_at, created_at
"#;

/// Database row representation of a checkpoint
#[derive(Debug, FromRow)]
struct CheckpointRow {
    id: String,
    source: String,
    entity: String,
    status: String,
    mode: String,
    since: Option<i64>,
    pages_fetched: i64,
    rows_fetched: i64,
    records_written: i64,
    phase: String,
    processed: i64,
    created: i64,
    updated: i64,
    skipped: i64,
    errors: i64,
    corruption_warnings: i64,
    error_message: Option<String>,
    config: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = SyncError;

    fn try_from(row: CheckpointRow) -> Result<Self> {
        let status: SyncStatus = row.status.parse()?;
        let mode: SyncMode = row.mode.parse()?;

        let progress = SyncProgress {
            pages_fetched: row.pages_fetched as u64,
            rows_fetched: row.rows_fetched as u64,
            records_written: row.records_written as u64,
            phase: row.phase,
        };

        // Counts only exist once the run reached a terminal state
        let counts = if status.is_terminal() {
            Some(SyncCounts {
                processed: row.processed as u64,
                created: row.created as u64,
                updated: row.updated as u64,
                skipped: row.skipped as u64,
                errors: row.errors as u64,
                corruption_warnings: row.corruption_warnings as u64,
            })
        } else {
            None
        };

        Ok(Checkpoint {
            id: CheckpointId::from_string(&row.id)?,
            source: row.source,
            entity: row.entity,
            status,
            mode,
            since: row
                .since
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
            progress,
            counts,
            error_message: row.error_message,
            config_json: row.config,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn insert(&self, checkpoint: &Checkpoint) -> Result<()> {
        let counts = checkpoint.counts.unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
                id, source, entity, status, mode, since,
                pages_fetched, rows_fetched, records_written, phase,
                processed, created, updated, skipped, errors, corruption_warnings,
                error_message, config, started_at, completed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(checkpoint.id.as_str())
        .bind(&checkpoint.source)
        .bind(&checkpoint.entity)
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.mode.as_str())
        .bind(checkpoint.since.map(|t| t.timestamp()))
        .bind(checkpoint.progress.pages_fetched as i64)
        .bind(checkpoint.progress.rows_fetched as i64)
        .bind(checkpoint.progress.records_written as i64)
        .bind(&checkpoint.progress.phase)
        .bind(counts.processed as i64)
        .bind(counts.created as i64)
        .bind(counts.updated as i64)
        .bind(counts.skipped as i64)
        .bind(counts.errors as i64)
        .bind(counts.corruption_warnings as i64)
        .bind(&checkpoint.error_message)
        .bind(&checkpoint.config_json)
        .bind(checkpoint.started_at)
        .bind(checkpoint.completed_at)
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<()> {
        let counts = checkpoint.counts.unwrap_or_default();
        let result = sqlx::query(
            r#"
            UPDATE sync_checkpoints SET
                status = ?,
                pages_fetched = ?,
                rows_fetched = ?,
                records_written = ?,
                phase = ?,
                processed = ?,
                created = ?,
                updated = ?,
                skipped = ?,
                errors = ?,
                corruption_warnings = ?,
                error_message = ?,
                started_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.progress.pages_fetched as i64)
        .bind(checkpoint.progress.rows_fetched as i64)
        .bind(checkpoint.progress.records_written as i64)
        .bind(&checkpoint.progress.phase)
        .bind(counts.processed as i64)
        .bind(counts.created as i64)
        .bind(counts.updated as i64)
        .bind(counts.skipped as i64)
        .bind(counts.errors as i64)
        .bind(counts.corruption_warnings as i64)
        .bind(&checkpoint.error_message)
        .bind(checkpoint.started_at)
        .bind(checkpoint.completed_at)
        .bind(checkpoint.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::CheckpointNotFound {
                checkpoint_id: checkpoint.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &CheckpointId) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn find_by_entity(&self, source: &str, entity: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            r#"
            SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
            WHERE source = ? AND entity = ?
            ORDER BY created_at DESC
            "#
        ))
        .bind(source)
        .bind(entity)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(Checkpoint::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn find_by_status(&self, status: SyncStatus) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            r#"
            SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
            WHERE status = ?
            ORDER BY created_at DESC
            "#
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(Checkpoint::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn latest_successful(&self, source: &str, entity: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            r#"
            SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
            WHERE source = ? AND entity = ? AND status = 'success'
            ORDER BY completed_at DESC
            LIMIT 1
            "#
        ))
        .bind(source)
        .bind(entity)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn get_history(&self, source: &str, entity: &str, limit: u32) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            r#"
            SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
            WHERE source = ? AND entity = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#
        ))
        .bind(source)
        .bind(entity)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(Checkpoint::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn has_active_sync(&self, source: &str, entity: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM sync_checkpoints
            WHERE source = ? AND entity = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(source)
        .bind(entity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count > 0)
    }

    async fn reconcile_stale(&self, max_age_secs: i64) -> Result<u64> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System time before UNIX epoch")
            .as_secs() as i64;
        let cutoff = now - max_age_secs;

        let result = sqlx::query(
            r#"
            UPDATE sync_checkpoints SET
                status = 'failed',
                error_message = 'Orphaned running checkpoint reclaimed at startup',
                completed_at = ?
            WHERE status = 'running' AND started_at < ?
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &CheckpointId) -> Result<()> {
        let result = sqlx::query("DELETE FROM sync_checkpoints WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::CheckpointNotFound {
                checkpoint_id: id.to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    // One connection so every handle sees the same in-memory database
    async fn create_test_pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap()
    }

    async fn create_test_repo() -> SqliteCheckpointRepository {
        let pool = create_test_pool().await;
        SqliteCheckpointRepository::migrate(&pool).await.unwrap();
        SqliteCheckpointRepository::new(pool)
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint::new("crm_a", "contacts", SyncMode::Full, None)
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let repo = create_test_repo().await;
        let cp = checkpoint();
        let id = cp.id;

        repo.insert(&cp).await.unwrap();

        let found = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.source, "crm_a");
        assert_eq!(found.entity, "contacts");
        assert_eq!(found.status, SyncStatus::Pending);
        assert!(found.counts.is_none());
    }

    #[tokio::test]
    async fn test_update_progress_roundtrip() {
        let repo = create_test_repo().await;
        let cp = checkpoint();
        let id = cp.id;
        repo.insert(&cp).await.unwrap();

        let mut cp = cp.start().unwrap();
        cp.update_progress(3, 15_000, 14_200, "streaming").unwrap();
        repo.update(&cp).await.unwrap();

        let found = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Running);
        assert_eq!(found.progress.pages_fetched, 3);
        assert_eq!(found.progress.rows_fetched, 15_000);
        assert_eq!(found.progress.records_written, 14_200);
    }

    #[tokio::test]
    async fn test_update_missing_checkpoint_errors() {
        let repo = create_test_repo().await;
        let result = repo.update(&checkpoint()).await;
        assert!(matches!(result, Err(SyncError::CheckpointNotFound { .. })));
    }

    #[tokio::test]
    async fn test_terminal_counts_roundtrip() {
        let repo = create_test_repo().await;
        let cp = checkpoint().start().unwrap();
        let counts = SyncCounts {
            processed: 12_050,
            created: 12_000,
            updated: 30,
            skipped: 0,
            errors: 20,
            corruption_warnings: 7,
        };
        let cp = cp.complete(counts).unwrap();
        repo.insert(&cp).await.unwrap();

        let found = repo.find_by_id(&cp.id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Partial);
        assert_eq!(found.counts, Some(counts));
    }

    #[tokio::test]
    async fn test_latest_successful_ignores_failures_and_partials() {
        let repo = create_test_repo().await;

        let failed = checkpoint()
            .start()
            .unwrap()
            .fail("boom".to_string(), None)
            .unwrap();
        repo.insert(&failed).await.unwrap();
        sleep(Duration::from_millis(1100)).await;

        let success = checkpoint()
            .start()
            .unwrap()
            .complete(SyncCounts::new())
            .unwrap();
        let success_id = success.id;
        repo.insert(&success).await.unwrap();
        sleep(Duration::from_millis(1100)).await;

        let partial = checkpoint()
            .start()
            .unwrap()
            .complete(SyncCounts {
                errors: 1,
                ..Default::default()
            })
            .unwrap();
        repo.insert(&partial).await.unwrap();

        let latest = repo.latest_successful("crm_a", "contacts").await.unwrap();
        assert_eq!(latest.unwrap().id, success_id);

        // Other entities have no successful history
        assert!(repo
            .latest_successful("crm_a", "deals")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_has_active_sync() {
        let repo = create_test_repo().await;
        assert!(!repo.has_active_sync("crm_a", "contacts").await.unwrap());

        let cp = checkpoint().start().unwrap();
        repo.insert(&cp).await.unwrap();
        assert!(repo.has_active_sync("crm_a", "contacts").await.unwrap());
        assert!(!repo.has_active_sync("crm_b", "contacts").await.unwrap());

        let cp = cp.complete(SyncCounts::new()).unwrap();
        repo.update(&cp).await.unwrap();
        assert!(!repo.has_active_sync("crm_a", "contacts").await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_stale_marks_old_running_failed() {
        let repo = create_test_repo().await;

        let mut orphan = checkpoint().start().unwrap();
        // Simulate a run that started two hours ago and never finished
        orphan.started_at = Some(orphan.started_at.unwrap() - 7200);
        repo.insert(&orphan).await.unwrap();

        let fresh = checkpoint().start().unwrap();
        repo.insert(&fresh).await.unwrap();

        let reclaimed = repo.reconcile_stale(3600).await.unwrap();
        assert_eq!(reclaimed, 1);

        let found = repo.find_by_id(&orphan.id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Failed);
        assert!(found.error_message.unwrap().contains("Orphaned"));

        let found = repo.find_by_id(&fresh.id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Running);

        // Reclaimed orphan no longer blocks the advisory lock
        assert!(repo.has_active_sync("crm_a", "contacts").await.unwrap());
        let fresh = fresh.fail("shutdown".to_string(), None).unwrap();
        repo.update(&fresh).await.unwrap();
        assert!(!repo.has_active_sync("crm_a", "contacts").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_history_ordering_and_limit() {
        let repo = create_test_repo().await;
        for offset in 0..5 {
            let mut cp = checkpoint();
            // Distinct created_at values without sleeping between inserts
            cp.created_at += offset;
            repo.insert(&cp).await.unwrap();
        }

        let history = repo.get_history("crm_a", "contacts", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = create_test_repo().await;
        let cp = checkpoint();
        let id = cp.id;
        repo.insert(&cp).await.unwrap();

        repo.delete(&id).await.unwrap();
        assert!(repo.find_by_id(&id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(&id).await,
            Err(SyncError::CheckpointNotFound { .. })
        ));
    }
}
