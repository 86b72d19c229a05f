//! # Conflict-Resolution Writer
//!
//! Batched writes with graceful degradation.
//!
//! ## Overview
//!
//! The writer takes one transformed page, splits it into sub-batches
//! (much smaller than the fetch page) and pushes each sub-batch through
//! up to three tiers:
//!
//! 1. **Bulk**: one `bulk_upsert` round trip for the whole sub-batch.
//! 2. **Partitioned**: on bulk failure, `filter_existing` splits the
//!    sub-batch and the halves go through `bulk_insert` / `bulk_update`.
//! 3. **Individual**: on partitioned failure, per-record `save` in an
//!    isolated error scope, so one poisoned record costs one error, not
//!    the sub-batch.
//!
//! At every tier the counts conserve:
//! `created + updated + skipped + errors == sub-batch len`.
//!
//! Conflict policy: with `force_overwrite` every declared field is
//! refreshed on conflict and nothing is skipped. Otherwise only the
//! safe-field subset is refreshed, and an existing record with no
//! material change (source timestamp not newer, significant fields
//! equal) is counted `skipped` without a write.

use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use sync_traits::{CanonicalRecord, FieldValue, TargetStore};
use tracing::{debug, warn};

/// Default records per write round trip
pub const DEFAULT_SUB_BATCH_SIZE: usize = 500;

// ============================================================================
// Outcome Types
// ============================================================================

/// Aggregated counts for one or more sub-batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl WriteStats {
    /// Total records accounted for
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped + self.errors
    }

    /// Fold another stats block into this one
    pub fn merge(&mut self, other: WriteStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// What happened to a single record on the individual fallback tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(i64),
    Updated(i64),
    Skipped(i64),
    Failed { key: i64, message: String },
}

/// Which tier handled a sub-batch, with its counts.
///
/// Callers observe degradation directly instead of inferring it from
/// logs: `BulkOk` is the healthy path, `PartitionedOk` means the bulk
/// upsert failed but the split succeeded, `Individual` carries a
/// per-record account of the last-resort tier.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    BulkOk(WriteStats),
    PartitionedOk(WriteStats),
    Individual(Vec<RecordOutcome>),
}

impl BatchOutcome {
    /// Counts for this sub-batch regardless of tier
    pub fn stats(&self) -> WriteStats {
        match self {
            BatchOutcome::BulkOk(stats) | BatchOutcome::PartitionedOk(stats) => *stats,
            BatchOutcome::Individual(outcomes) => {
                let mut stats = WriteStats::default();
                for outcome in outcomes {
                    match outcome {
                        RecordOutcome::Created(_) => stats.created += 1,
                        RecordOutcome::Updated(_) => stats.updated += 1,
                        RecordOutcome::Skipped(_) => stats.skipped += 1,
                        RecordOutcome::Failed { .. } => stats.errors += 1,
                    }
                }
                stats
            }
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Writer conflict policy and batching knobs
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Records per write round trip
    pub sub_batch_size: usize,
    /// Refresh every declared field on conflict and never skip
    pub force_overwrite: bool,
    /// Fields refreshed on conflict when not forcing; empty means all
    pub safe_fields: Vec<String>,
    /// Fields whose diff marks a material change; empty means all
    pub significant_fields: Vec<String>,
    /// Declared field carrying the source modification time
    pub updated_at_field: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            force_overwrite: false,
            safe_fields: Vec::new(),
            significant_fields: Vec::new(),
            updated_at_field: "updated_at".to_string(),
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// One sub-batch after planning: who is new, who changed, who is
/// untouched.
struct SubBatchPlan {
    new: Vec<CanonicalRecord>,
    changed: Vec<CanonicalRecord>,
    skipped: Vec<i64>,
}

/// Writes canonical records to one target table with conflict
/// resolution and tiered degradation
pub struct ConflictResolutionWriter {
    store: Arc<dyn TargetStore>,
    declared_fields: Vec<String>,
    config: WriterConfig,
}

impl ConflictResolutionWriter {
    pub fn new(
        store: Arc<dyn TargetStore>,
        declared_fields: Vec<String>,
        config: WriterConfig,
    ) -> Self {
        Self {
            store,
            declared_fields,
            config,
        }
    }

    /// Write one transformed page, sub-batch by sub-batch.
    ///
    /// Returns the aggregated stats and the per-sub-batch outcomes.
    ///
    /// # Errors
    ///
    /// Returns an error only when the planning reads fail
    /// (`filter_existing`); write failures degrade through the tiers
    /// and surface as error counts instead.
    pub async fn write_page(
        &self,
        records: Vec<CanonicalRecord>,
    ) -> Result<(WriteStats, Vec<BatchOutcome>)> {
        let sub_batch_size = self.config.sub_batch_size.max(1);
        let mut stats = WriteStats::default();
        let mut outcomes = Vec::new();

        for chunk in records.chunks(sub_batch_size) {
            let outcome = self.write_sub_batch(chunk).await?;
            stats.merge(outcome.stats());
            outcomes.push(outcome);
        }

        Ok((stats, outcomes))
    }

    /// Push one sub-batch through the degradation tiers
    pub async fn write_sub_batch(&self, records: &[CanonicalRecord]) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::BulkOk(WriteStats::default()));
        }

        let plan = self.plan(records).await?;
        let update_fields = self.update_fields();

        // Tier 1: one upsert round trip
        let to_write: Vec<CanonicalRecord> = plan
            .new
            .iter()
            .chain(plan.changed.iter())
            .cloned()
            .collect();

        if to_write.is_empty() {
            return Ok(BatchOutcome::BulkOk(WriteStats {
                skipped: plan.skipped.len() as u64,
                ..WriteStats::default()
            }));
        }

        match self.store.bulk_upsert(&to_write, &update_fields).await {
            Ok(_) => {
                return Ok(BatchOutcome::BulkOk(WriteStats {
                    created: plan.new.len() as u64,
                    updated: plan.changed.len() as u64,
                    skipped: plan.skipped.len() as u64,
                    errors: 0,
                }));
            }
            Err(e) => {
                warn!(
                    batch_size = to_write.len(),
                    error = %e,
                    "Bulk upsert failed, degrading to partitioned writes"
                );
            }
        }

        // Tier 2: insert the new, update the rest
        match self.write_partitioned(&plan, &update_fields).await {
            Ok(stats) => return Ok(BatchOutcome::PartitionedOk(stats)),
            Err(e) => {
                warn!(
                    batch_size = to_write.len(),
                    error = %e,
                    "Partitioned write failed, degrading to individual saves"
                );
            }
        }

        // Tier 3: per-record saves in isolated error scopes
        Ok(BatchOutcome::Individual(
            self.write_individually(&plan).await,
        ))
    }

    /// Split a sub-batch into new / changed / skipped
    async fn plan(&self, records: &[CanonicalRecord]) -> Result<SubBatchPlan> {
        let keys: Vec<i64> = records.iter().map(|r| r.key).collect();
        let existing: HashSet<i64> = self.store.filter_existing(&keys).await?;

        let mut plan = SubBatchPlan {
            new: Vec::new(),
            changed: Vec::new(),
            skipped: Vec::new(),
        };

        for record in records {
            if !existing.contains(&record.key) {
                plan.new.push(record.clone());
            } else if self.config.force_overwrite {
                plan.changed.push(record.clone());
            } else {
                match self.store.get(record.key).await {
                    Ok(Some(stored)) if !self.is_material_change(record, &stored) => {
                        plan.skipped.push(record.key);
                    }
                    // Unreadable or vanished rows are written rather
                    // than silently skipped
                    _ => plan.changed.push(record.clone()),
                }
            }
        }

        debug!(
            new = plan.new.len(),
            changed = plan.changed.len(),
            skipped = plan.skipped.len(),
            "Planned sub-batch"
        );

        Ok(plan)
    }

    /// Whether an incoming record materially differs from its stored
    /// counterpart.
    ///
    /// A source timestamp that is not newer than the stored one means
    /// no change; otherwise the significant fields are compared.
    fn is_material_change(&self, incoming: &CanonicalRecord, stored: &CanonicalRecord) -> bool {
        let timestamp_field = &self.config.updated_at_field;
        if let (Some(FieldValue::DateTime(src)), Some(FieldValue::DateTime(dst))) =
            (incoming.get(timestamp_field), stored.get(timestamp_field))
        {
            if src <= dst {
                return false;
            }
        }

        let diff = incoming.differing_fields(stored);
        if self.config.significant_fields.is_empty() {
            !diff.is_empty()
        } else {
            diff.iter()
                .any(|name| self.config.significant_fields.contains(name))
        }
    }

    /// Fields refreshed on conflict under the current policy
    fn update_fields(&self) -> Vec<String> {
        if self.config.force_overwrite || self.config.safe_fields.is_empty() {
            self.declared_fields.clone()
        } else {
            self.config.safe_fields.clone()
        }
    }

    async fn write_partitioned(
        &self,
        plan: &SubBatchPlan,
        update_fields: &[String],
    ) -> Result<WriteStats> {
        if !plan.new.is_empty() {
            self.store.bulk_insert(&plan.new).await?;
        }
        if !plan.changed.is_empty() {
            self.store.bulk_update(&plan.changed, update_fields).await?;
        }

        Ok(WriteStats {
            created: plan.new.len() as u64,
            updated: plan.changed.len() as u64,
            skipped: plan.skipped.len() as u64,
            errors: 0,
        })
    }

    async fn write_individually(&self, plan: &SubBatchPlan) -> Vec<RecordOutcome> {
        let mut outcomes = Vec::with_capacity(plan.new.len() + plan.changed.len());

        for (records, was_new) in [(&plan.new, true), (&plan.changed, false)] {
            for record in records.iter() {
                match self.store.save(record).await {
                    Ok(()) if was_new => outcomes.push(RecordOutcome::Created(record.key)),
                    Ok(()) => outcomes.push(RecordOutcome::Updated(record.key)),
                    Err(e) => {
                        warn!(key = record.key, error = %e, "Individual save failed");
                        outcomes.push(RecordOutcome::Failed {
                            key: record.key,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        // Skipped records never get a write at any tier; keep them in
        // the account so conservation holds
        for &key in &plan.skipped {
            outcomes.push(RecordOutcome::Skipped(key));
        }

        outcomes
    }
}

// ============================================================================
// Dry-Run Target
// ============================================================================

/// A `TargetStore` wrapper that delegates reads and swallows writes.
///
/// Dry runs push real records through the full planning path, so the
/// created / updated / skipped counts are the ones a live run would
/// produce, while the target stays untouched.
pub struct DryRunTarget {
    inner: Arc<dyn TargetStore>,
}

impl DryRunTarget {
    pub fn new(inner: Arc<dyn TargetStore>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl TargetStore for DryRunTarget {
    async fn bulk_upsert(
        &self,
        records: &[CanonicalRecord],
        _update_fields: &[String],
    ) -> sync_traits::Result<u64> {
        Ok(records.len() as u64)
    }

    async fn bulk_insert(&self, records: &[CanonicalRecord]) -> sync_traits::Result<u64> {
        Ok(records.len() as u64)
    }

    async fn bulk_update(
        &self,
        records: &[CanonicalRecord],
        _update_fields: &[String],
    ) -> sync_traits::Result<u64> {
        Ok(records.len() as u64)
    }

    async fn filter_existing(&self, keys: &[i64]) -> sync_traits::Result<HashSet<i64>> {
        self.inner.filter_existing(keys).await
    }

    async fn get(&self, key: i64) -> sync_traits::Result<Option<CanonicalRecord>> {
        self.inner.get(key).await
    }

    async fn save(&self, _record: &CanonicalRecord) -> sync_traits::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
