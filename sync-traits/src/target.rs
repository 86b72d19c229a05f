//! Target Collaborator Contract
//!
//! A `TargetStore` persists canonical records for one warehouse table.
//! The engine's writer drives it through three degradation tiers: one
//! bulk upsert per sub-batch, a partitioned insert/update split when
//! the bulk call fails, and individual saves as the last resort.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;
use crate::record::CanonicalRecord;

/// Write access to one target table, keyed by `id`.
///
/// All bulk operations must be atomic per call (one short-lived
/// transaction), never one long transaction spanning a whole run.
/// `bulk_upsert` must be idempotent on primary key: re-writing an
/// unchanged record must not create a duplicate logical row.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Insert new rows and update existing ones by primary key in a
    /// single round trip. Only `update_fields` are refreshed on
    /// conflict.
    ///
    /// Returns the number of rows written.
    async fn bulk_upsert(
        &self,
        records: &[CanonicalRecord],
        update_fields: &[String],
    ) -> Result<u64>;

    /// Insert rows known not to exist yet.
    async fn bulk_insert(&self, records: &[CanonicalRecord]) -> Result<u64>;

    /// Update existing rows by field assignment.
    async fn bulk_update(
        &self,
        records: &[CanonicalRecord],
        update_fields: &[String],
    ) -> Result<u64>;

    /// Which of `keys` already exist in the target.
    async fn filter_existing(&self, keys: &[i64]) -> Result<HashSet<i64>>;

    /// Load one stored record by primary key.
    async fn get(&self, key: i64) -> Result<Option<CanonicalRecord>>;

    /// Save a single record (insert or replace), the individual
    /// fallback path.
    async fn save(&self, record: &CanonicalRecord) -> Result<()>;
}
