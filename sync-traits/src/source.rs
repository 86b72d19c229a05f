//! Source Collaborator Contract
//!
//! A `SourceClient` adapts one external system (CRM database, REST API)
//! to the engine's keyset paging model. Implementations own the wire
//! protocol; the engine only sees ordered pages of [`SourceRow`]s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::SourceRow;

/// Keyset-paginated read access to one source entity.
///
/// The paging contract is `WHERE id > after_id [AND updated_at > since]
/// ORDER BY id ASC LIMIT limit`: rows come back in strictly increasing
/// primary-key order and a page shorter than `limit` (including empty)
/// means the stream is exhausted. Keyset paging stays forward-progress
/// safe under concurrent source mutation, unlike OFFSET paging, which
/// can skip or duplicate rows as the source changes mid-scan.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Number of rows the source would yield for this delta window.
    ///
    /// Advisory only; the engine streams until a short page regardless.
    async fn count(&self, since: Option<DateTime<Utc>>) -> Result<u64>;

    /// Fetch one page of rows after `after_id`, restricted to rows
    /// modified after `since` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the page query fails; the engine does not
    /// retry internally.
    async fn fetch_page(
        &self,
        after_id: i64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<SourceRow>>;
}
