//! Memory Guard
//!
//! Bounds the worst-case memory of a long streaming run.
//!
//! ## Overview
//!
//! Three mechanisms, all independent of caller configuration:
//!
//! - every requested page size is clamped to [`PAGE_SIZE_CEILING`]
//! - the very first page is checked against
//!   [`FIRST_PAGE_ABORT_THRESHOLD`]: a page that large means the LIMIT
//!   clause was bypassed somewhere, and the run aborts immediately
//!   instead of leaking until the process dies
//! - after a page is fully written, the page and its derived write
//!   buffer are explicitly released before the next fetch, so one run
//!   holds roughly one page plus one buffer at any time
//!
//! The guard also samples process RSS every few pages for
//! observability; it does not bound run duration.

use tracing::debug;

use crate::error::{Result, SyncError};
use sync_traits::{CanonicalRecord, SourceRow};

/// Hard ceiling on one page, regardless of configuration
pub const PAGE_SIZE_CEILING: usize = 5_000;

/// Absolute first-page size that triggers a fatal abort
pub const FIRST_PAGE_ABORT_THRESHOLD: usize = 10_000;

/// How many released pages between RSS samples
const SAMPLE_INTERVAL_PAGES: u64 = 8;

/// Per-run memory guard
#[derive(Debug, Default)]
pub struct MemoryGuard {
    pages_released: u64,
    peak_rss_kib: Option<u64>,
}

impl MemoryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp a caller-requested page size to the hard ceiling.
    ///
    /// Silently: an oversized request is a tuning mistake, not an
    /// error. Zero is bumped to one so the stream can make progress.
    pub fn clamp_page_size(requested: usize) -> usize {
        requested.clamp(1, PAGE_SIZE_CEILING)
    }

    /// Check the first fetched page against the absolute ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MemorySafety`] when the page is over the
    /// threshold; the run must abort.
    pub fn verify_first_page(rows: usize) -> Result<()> {
        if rows > FIRST_PAGE_ABORT_THRESHOLD {
            return Err(SyncError::MemorySafety {
                rows,
                ceiling: FIRST_PAGE_ABORT_THRESHOLD,
            });
        }
        Ok(())
    }

    /// Release a fully-processed page.
    ///
    /// Takes the page by value so the caller cannot keep a handle; the
    /// rows are dropped here, before the next fetch_page call.
    pub fn release_page(&mut self, page: Vec<SourceRow>) {
        drop(page);
        self.pages_released += 1;
        if self.pages_released % SAMPLE_INTERVAL_PAGES == 0 {
            self.sample();
        }
    }

    /// Clear a write buffer and return its capacity to the allocator
    pub fn release_buffer(&mut self, buffer: &mut Vec<CanonicalRecord>) {
        buffer.clear();
        buffer.shrink_to_fit();
    }

    /// Pages released so far in this run
    pub fn pages_released(&self) -> u64 {
        self.pages_released
    }

    /// Highest RSS observed by the periodic sampler, if available
    pub fn peak_rss_kib(&self) -> Option<u64> {
        self.peak_rss_kib
    }

    fn sample(&mut self) {
        if let Some(rss) = Self::rss_kib() {
            self.peak_rss_kib = Some(self.peak_rss_kib.map_or(rss, |peak| peak.max(rss)));
            debug!(
                rss_kib = rss,
                pages_released = self.pages_released,
                "memory sample"
            );
        }
    }

    /// Current resident set size in KiB.
    ///
    /// Linux only (`/proc/self/statm`); `None` elsewhere. The sample
    /// is observability, never a control input.
    pub fn rss_kib() -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
            let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
            Some(resident_pages * 4)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}
