//! # Sync Orchestrator
//!
//! Drives one entity's fetch → transform → write pipeline under a
//! checkpoint.
//!
//! ## Overview
//!
//! A run streams pages through the keyset cursor, transforms them,
//! hands the survivors to the conflict-resolution writer and releases
//! each page before fetching the next, so peak memory stays bounded by
//! one page regardless of source size. Checkpoint rows record progress
//! while the run is live and the final counts when it ends; the latest
//! successful row's completion time becomes the next run's delta
//! window.
//!
//! ## Delta Window Resolution
//!
//! In priority order: an explicit `since` on the request, a full-window
//! request (`Full` / `Forced` mode), the latest successful checkpoint's
//! completion time, and finally a full sync when no history exists.
//!
//! ## Dry Runs
//!
//! A dry run exercises the full pipeline against a write-swallowing
//! target, so its counts are the ones a live run would produce, but it
//! takes no advisory lock and writes no checkpoint row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{Checkpoint, CheckpointId, SyncCounts, SyncMode, SyncStatus};
use crate::cursor::SourceCursor;
use crate::error::{Result, SyncError};
use crate::memory::MemoryGuard;
use crate::repository::CheckpointRepository;
use crate::schema::FieldDescriptor;
use crate::transformer::RecordTransformer;
use crate::writer::{ConflictResolutionWriter, DryRunTarget, WriterConfig};
use sync_traits::{SourceClient, TargetStore};

/// Default rows per source page
pub const DEFAULT_PAGE_SIZE: usize = 5_000;

/// Default records per write round trip
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 500;

/// Default age after which an orphaned running checkpoint is reclaimed
pub const DEFAULT_STALE_RUN_TIMEOUT_SECS: i64 = 3_600;

// ============================================================================
// Configuration
// ============================================================================

/// Per-entity sync configuration, fixed at orchestrator construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Rows per source page (clamped to the hard ceiling)
    pub page_size: usize,
    /// Records per write round trip
    pub write_batch_size: usize,
    /// Age after which an orphaned running checkpoint is reclaimed
    pub stale_run_timeout_secs: i64,
    /// Fields refreshed on conflict when not forcing; empty means all
    pub safe_update_fields: Vec<String>,
    /// Fields whose diff marks a material change; empty means all
    pub significant_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            stale_run_timeout_secs: DEFAULT_STALE_RUN_TIMEOUT_SECS,
            safe_update_fields: Vec::new(),
            significant_fields: Vec::new(),
        }
    }
}

/// Per-run parameters
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// `Some(Full)` / `Some(Forced)` forces a full window; `None`
    /// resolves the window from checkpoint history
    pub mode: Option<SyncMode>,
    /// Explicit delta window lower bound, overriding everything else
    pub since: Option<DateTime<Utc>>,
    /// Stop after this many rows; 0 means unlimited
    pub max_records: u64,
    /// Count without writing or touching checkpoint history
    pub dry_run: bool,
    /// Override the configured write batch size
    pub batch_size: Option<usize>,
    /// Refresh every declared field on conflict and never skip
    pub force_overwrite: bool,
}

/// What one run did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// The persisted checkpoint, absent for dry runs
    pub checkpoint_id: Option<CheckpointId>,
    pub status: SyncStatus,
    pub total_processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub corruption_warnings: u64,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs checkpointed syncs for one (source, entity) pairing
pub struct SyncOrchestrator {
    source: String,
    entity: String,
    schema: Vec<FieldDescriptor>,
    client: Arc<dyn SourceClient>,
    store: Arc<dyn TargetStore>,
    checkpoints: Arc<dyn CheckpointRepository>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        source: impl Into<String>,
        entity: impl Into<String>,
        schema: Vec<FieldDescriptor>,
        client: Arc<dyn SourceClient>,
        store: Arc<dyn TargetStore>,
        checkpoints: Arc<dyn CheckpointRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source: source.into(),
            entity: entity.into(),
            schema,
            client,
            store,
            checkpoints,
            config,
        }
    }

    /// Run one sync.
    ///
    /// Takes the advisory lock, creates a `Running` checkpoint, streams
    /// pages and finishes the checkpoint with the final counts. A dry
    /// run does none of the checkpoint work.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SyncInProgress`] when another run holds the
    /// advisory lock, or the underlying error when the stream fails;
    /// the checkpoint is marked failed first.
    #[instrument(skip(self, request), fields(source = %self.source, entity = %self.entity, dry_run = request.dry_run))]
    pub async fn run(&self, request: SyncRequest) -> Result<SyncReport> {
        let (mode, since) = self.resolve_window(&request).await?;
        info!(mode = %mode, since = ?since, "starting sync");

        if request.dry_run {
            return self.run_dry(&request, since).await;
        }

        if self.checkpoints.has_active_sync(&self.source, &self.entity).await? {
            return Err(SyncError::SyncInProgress {
                source_name: self.source.clone(),
                entity: self.entity.clone(),
            });
        }

        let checkpoint = Checkpoint::new(&self.source, &self.entity, mode, since)
            .with_config(self.config_snapshot(&request));
        self.checkpoints.insert(&checkpoint).await?;

        let mut checkpoint = checkpoint.start()?;
        self.checkpoints.update(&checkpoint).await?;
        let checkpoint_id = checkpoint.id;

        let writer = self.build_writer(self.store.clone(), &request);
        match self.stream(&request, since, &writer, Some(&mut checkpoint)).await {
            Ok(counts) => {
                let checkpoint = checkpoint.complete(counts)?;
                self.checkpoints.update(&checkpoint).await?;
                info!(
                    checkpoint_id = %checkpoint_id,
                    status = %checkpoint.status,
                    processed = counts.processed,
                    created = counts.created,
                    updated = counts.updated,
                    skipped = counts.skipped,
                    errors = counts.errors,
                    "sync finished"
                );
                Ok(report(Some(checkpoint_id), checkpoint.status, counts))
            }
            Err(e) => {
                warn!(checkpoint_id = %checkpoint_id, error = %e, "sync failed");
                let partial = checkpoint.counts;
                let failed = checkpoint.fail(e.to_string(), partial)?;
                self.checkpoints.update(&failed).await?;
                Err(e)
            }
        }
    }

    /// Reclaim checkpoints orphaned by a previous process death.
    ///
    /// Call once at startup before scheduling runs; a stale `Running`
    /// row would otherwise hold the advisory lock forever.
    pub async fn reconcile_orphaned(&self) -> Result<u64> {
        let reclaimed = self
            .checkpoints
            .reconcile_stale(self.config.stale_run_timeout_secs)
            .await?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed orphaned running checkpoints");
        }
        Ok(reclaimed)
    }

    /// Checkpoint history for this orchestrator's (source, entity)
    pub async fn history(&self, limit: u32) -> Result<Vec<Checkpoint>> {
        self.checkpoints
            .get_history(&self.source, &self.entity, limit)
            .await
    }

    async fn run_dry(
        &self,
        request: &SyncRequest,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport> {
        let target: Arc<dyn TargetStore> = Arc::new(DryRunTarget::new(self.store.clone()));
        let writer = self.build_writer(target, request);
        let counts = self.stream(request, since, &writer, None).await?;

        let status = if counts.errors == 0 {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        Ok(report(None, status, counts))
    }

    /// The streaming loop shared by live and dry runs
    async fn stream(
        &self,
        request: &SyncRequest,
        since: Option<DateTime<Utc>>,
        writer: &ConflictResolutionWriter,
        mut checkpoint: Option<&mut Checkpoint>,
    ) -> Result<SyncCounts> {
        let mut cursor = SourceCursor::new(
            self.client.clone(),
            since,
            self.config.page_size,
            request.max_records,
        );
        let mut transformer = RecordTransformer::new(self.schema.clone());
        let mut guard = MemoryGuard::new();

        // Window size is an estimate for the logs, never a loop bound
        if let Ok(expected) = self.client.count(since).await {
            debug!(expected, "source rows in window");
        }

        let mut counts = SyncCounts::new();
        let mut write_errors: u64 = 0;
        let mut records_written: u64 = 0;

        while let Some(page) = cursor.next_page().await? {
            counts.processed += page.len() as u64;

            let mut records = transformer.transform_page(&page);
            guard.release_page(page);

            let (stats, _) = writer.write_page(std::mem::take(&mut records)).await?;
            guard.release_buffer(&mut records);

            counts.created += stats.created;
            counts.updated += stats.updated;
            counts.skipped += stats.skipped;
            write_errors += stats.errors;
            records_written += stats.created + stats.updated;

            let transform = transformer.counters();
            counts.errors = write_errors + transform.validation_errors;
            counts.corruption_warnings = transform.corruption_warnings;

            if let Some(cp) = checkpoint.as_deref_mut() {
                cp.update_progress(
                    cursor.pages_fetched(),
                    cursor.rows_fetched(),
                    records_written,
                    "streaming",
                )?;
                // Partial counts survive a crash between pages
                cp.counts = Some(counts);
                self.checkpoints.update(cp).await?;
            }
        }

        Ok(counts)
    }

    /// Resolve the run mode and delta window lower bound
    async fn resolve_window(
        &self,
        request: &SyncRequest,
    ) -> Result<(SyncMode, Option<DateTime<Utc>>)> {
        if let Some(since) = request.since {
            return Ok((SyncMode::Incremental, Some(since)));
        }
        match request.mode {
            Some(SyncMode::Forced) => return Ok((SyncMode::Forced, None)),
            Some(SyncMode::Full) => return Ok((SyncMode::Full, None)),
            Some(SyncMode::Incremental) | None => {}
        }
        if let Some(latest) = self
            .checkpoints
            .latest_successful(&self.source, &self.entity)
            .await?
        {
            if let Some(completed) = latest.completed_time() {
                return Ok((SyncMode::Incremental, Some(completed)));
            }
        }
        Ok((SyncMode::Full, None))
    }

    fn build_writer(
        &self,
        target: Arc<dyn TargetStore>,
        request: &SyncRequest,
    ) -> ConflictResolutionWriter {
        let declared_fields: Vec<String> =
            self.schema.iter().map(|d| d.name.clone()).collect();
        let config = WriterConfig {
            sub_batch_size: request.batch_size.unwrap_or(self.config.write_batch_size),
            force_overwrite: request.force_overwrite,
            safe_fields: self.config.safe_update_fields.clone(),
            significant_fields: self.config.significant_fields.clone(),
            ..WriterConfig::default()
        };
        ConflictResolutionWriter::new(target, declared_fields, config)
    }

    /// JSON snapshot of the effective run configuration
    fn config_snapshot(&self, request: &SyncRequest) -> String {
        serde_json::json!({
            "page_size": self.config.page_size,
            "write_batch_size": request.batch_size.unwrap_or(self.config.write_batch_size),
            "max_records": request.max_records,
            "force_overwrite": request.force_overwrite,
        })
        .to_string()
    }
}

fn report(
    checkpoint_id: Option<CheckpointId>,
    status: SyncStatus,
    counts: SyncCounts,
) -> SyncReport {
    SyncReport {
        checkpoint_id,
        status,
        total_processed: counts.processed,
        created: counts.created,
        updated: counts.updated,
        skipped: counts.skipped,
        errors: counts.errors,
        corruption_warnings: counts.corruption_warnings,
    }
}
