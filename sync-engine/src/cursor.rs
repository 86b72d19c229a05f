//! Keyset Source Cursor
//!
//! Lazy, finite, restart-safe paging over a [`SourceClient`].
//!
//! ## Overview
//!
//! The cursor tracks the last seen primary key and asks the source for
//! `id > last_seen_id` pages, so it never materializes the whole
//! source and stays forward-progress safe while the source mutates
//! underneath it. The stream ends at the first page shorter than the
//! page size (including an empty first page, which is a normal empty
//! delta window, not an error).
//!
//! The very first page is checked against the absolute memory-safety
//! ceiling: a source that ignores the LIMIT clause fails the run
//! immediately instead of slowly exhausting memory.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::memory::MemoryGuard;
use sync_traits::{SourceClient, SourceRow};

/// Streaming page cursor over one source entity
pub struct SourceCursor {
    client: Arc<dyn SourceClient>,
    since: Option<DateTime<Utc>>,
    page_size: usize,
    /// 0 = unlimited
    max_records: u64,
    last_seen_id: i64,
    rows_fetched: u64,
    pages_fetched: u64,
    exhausted: bool,
}

impl SourceCursor {
    /// Create a cursor. `page_size` is clamped to the hard ceiling
    /// regardless of what the caller asked for.
    pub fn new(
        client: Arc<dyn SourceClient>,
        since: Option<DateTime<Utc>>,
        page_size: usize,
        max_records: u64,
    ) -> Self {
        Self {
            client,
            since,
            page_size: MemoryGuard::clamp_page_size(page_size),
            max_records,
            last_seen_id: 0,
            rows_fetched: 0,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` when the stream is exhausted.
    ///
    /// Rows come back in strictly increasing primary-key order; a
    /// source that violates the ordering contract fails the run.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Fetch`] when the page query fails (not retried)
    /// - [`SyncError::MemorySafety`] when the first page is over the
    ///   absolute ceiling
    /// - [`SyncError::OutOfOrder`] when the source breaks key order
    pub async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>> {
        if self.exhausted {
            return Ok(None);
        }

        let limit = self.next_limit();
        if limit == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        let rows = self
            .client
            .fetch_page(self.last_seen_id, self.since, limit)
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        if self.pages_fetched == 0 {
            MemoryGuard::verify_first_page(rows.len())?;
        }
        self.pages_fetched += 1;

        if rows.len() < limit {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        for row in &rows {
            if row.id <= self.last_seen_id {
                return Err(SyncError::OutOfOrder {
                    id: row.id,
                    last_seen_id: self.last_seen_id,
                });
            }
            self.last_seen_id = row.id;
        }
        self.rows_fetched += rows.len() as u64;

        debug!(
            page = self.pages_fetched,
            rows = rows.len(),
            last_seen_id = self.last_seen_id,
            "fetched page"
        );

        Ok(Some(rows))
    }

    /// Page limit for the next fetch, shrunk when a record cap is near
    fn next_limit(&self) -> usize {
        if self.max_records == 0 {
            return self.page_size;
        }
        let remaining = self.max_records.saturating_sub(self.rows_fetched);
        (remaining.min(self.page_size as u64)) as usize
    }

    /// Total rows yielded so far
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// Pages yielded so far
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Effective (clamped) page size
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
