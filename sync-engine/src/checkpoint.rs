//! # Checkpoint State Machine
//!
//! Append-only run records with validated state transitions.
//!
//! ## Overview
//!
//! Every sync run persists one checkpoint row: its configuration,
//! timing, counts and outcome. Rows are never mutated after reaching a
//! terminal state; the latest *successful* row's completion time seeds
//! the next run's delta window.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Success
//!     ↓         ↓   ↘ Partial
//!     └──────→ Failed
//! ```
//!
//! `Partial` means errors occurred but some records were still
//! processed; `Failed` means the run died on an unhandled error, with
//! whatever partial counts were gathered at that point.

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// ID Type
// ============================================================================

/// Unique identifier for a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    /// Create a new random checkpoint ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a checkpoint ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidCheckpointId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status and Mode
// ============================================================================

/// The current status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Run has been created but not yet started
    Pending,
    /// Run is currently streaming
    Running,
    /// Run completed with zero errors
    Success,
    /// Run completed, but some records errored
    Partial,
    /// Run died on an unhandled error
    Failed,
}

impl SyncStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Success | SyncStatus::Partial | SyncStatus::Failed
        )
    }

    /// Check if this status represents an active state
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Running)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "success" => Ok(SyncStatus::Success),
            "partial" => Ok(SyncStatus::Partial),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the delta window for a run was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Process the whole source
    Full,
    /// Process rows changed since the last successful run
    Incremental,
    /// Full sync requested explicitly, ignoring checkpoint history
    Forced,
}

impl SyncMode {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Forced => "forced",
        }
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            "forced" => Ok(SyncMode::Forced),
            _ => Err(SyncError::InvalidSyncMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress and Counts
// ============================================================================

/// Progress information for a running sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Pages fetched from the source so far
    pub pages_fetched: u64,
    /// Rows fetched from the source so far
    pub rows_fetched: u64,
    /// Records handed to the writer so far
    pub records_written: u64,
    /// Current processing phase
    pub phase: String,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            phase: "initializing".to_string(),
            ..Self::default()
        }
    }

    /// Update progress with new values
    pub fn update(&mut self, pages: u64, rows: u64, written: u64, phase: &str) {
        self.pages_fetched = pages;
        self.rows_fetched = rows;
        self.records_written = written;
        self.phase = phase.to_string();
    }
}

/// Final counts for one run.
///
/// Conservation: for every batch the writer sees,
/// `created + updated + skipped + errors` equals the batch size; over
/// a run, `processed` additionally covers records the transformer
/// dropped (counted under `errors`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Rows fetched and pushed through the pipeline
    pub processed: u64,
    /// Records newly inserted
    pub created: u64,
    /// Records updated in place
    pub updated: u64,
    /// Existing records with no material change
    pub skipped: u64,
    /// Dropped or failed records (validation + write failures)
    pub errors: u64,
    /// Fields replaced with defaults on kept records
    pub corruption_warnings: u64,
}

impl SyncCounts {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Checkpoint Entity
// ============================================================================

/// One sync run's persisted record.
///
/// Enforces valid state transitions; a checkpoint can only be created
/// `Pending` and must move through `Running` before any terminal
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier for this run
    pub id: CheckpointId,
    /// Source system identifier (e.g. a CRM name)
    pub source: String,
    /// Entity within the source (e.g. a table or endpoint)
    pub entity: String,
    /// Current status
    pub status: SyncStatus,
    /// How the delta window was chosen
    pub mode: SyncMode,
    /// Lower bound of the delta window, if incremental
    pub since: Option<DateTime<Utc>>,
    /// Progress information
    pub progress: SyncProgress,
    /// Final counts (set on completion or failure)
    pub counts: Option<SyncCounts>,
    /// Error message if failed
    pub error_message: Option<String>,
    /// JSON snapshot of the run configuration
    pub config_json: Option<String>,
    /// When the checkpoint was created
    pub created_at: i64,
    /// When the run started streaming
    pub started_at: Option<i64>,
    /// When the run reached a terminal state
    pub completed_at: Option<i64>,
}

impl Checkpoint {
    /// Create a new checkpoint in pending state
    pub fn new(
        source: impl Into<String>,
        entity: impl Into<String>,
        mode: SyncMode,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: CheckpointId::new(),
            source: source.into(),
            entity: entity.into(),
            status: SyncStatus::Pending,
            mode,
            since,
            progress: SyncProgress::new(),
            counts: None,
            error_message: None,
            config_json: None,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Attach a JSON snapshot of the run configuration
    pub fn with_config(mut self, config_json: String) -> Self {
        self.config_json = Some(config_json);
        self
    }

    /// Start the run
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is not in `Pending` state
    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.started_at = Some(current_timestamp());
        self.progress.phase = "streaming".to_string();
        Ok(self)
    }

    /// Update progress information
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not in `Running` state
    pub fn update_progress(
        &mut self,
        pages: u64,
        rows: u64,
        written: u64,
        phase: &str,
    ) -> Result<()> {
        if self.status != SyncStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Run must be running to update progress".to_string(),
            });
        }
        self.progress.update(pages, rows, written, phase);
        Ok(())
    }

    /// Complete the run with final counts.
    ///
    /// The terminal status is derived: `Success` when no record
    /// errored, `Partial` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not in `Running` state
    pub fn complete(mut self, counts: SyncCounts) -> Result<Self> {
        let terminal = if counts.errors == 0 {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        self.validate_transition(terminal)?;
        self.status = terminal;
        self.completed_at = Some(current_timestamp());
        self.counts = Some(counts);
        self.progress.phase = terminal.as_str().to_string();
        Ok(self)
    }

    /// Mark the run as failed, capturing whatever counts were gathered
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is already terminal
    pub fn fail(mut self, error_message: String, counts: Option<SyncCounts>) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error_message = Some(error_message);
        self.counts = counts;
        self.progress.phase = "failed".to_string();
        Ok(self)
    }

    /// Completion time as a UTC timestamp, for the next delta window
    pub fn completed_time(&self) -> Option<DateTime<Utc>> {
        self.completed_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// Get the duration of the run in seconds
    ///
    /// Returns None if the run hasn't started or completed yet
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start) as u64),
            _ => None,
        }
    }

    /// Validate a state transition
    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (SyncStatus::Pending, SyncStatus::Running)
                | (SyncStatus::Pending, SyncStatus::Failed)
                | (SyncStatus::Running, SyncStatus::Success)
                | (SyncStatus::Running, SyncStatus::Partial)
                | (SyncStatus::Running, SyncStatus::Failed)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_secs() as i64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        Checkpoint::new("crm_a", "contacts", SyncMode::Full, None)
    }

    #[test]
    fn test_checkpoint_id_roundtrip() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = CheckpointId::from_string(uuid_str).unwrap();
        assert_eq!(id.as_str(), uuid_str);
        assert!(CheckpointId::from_string("nope").is_err());
    }

    #[test]
    fn test_status_terminal_and_active() {
        assert!(SyncStatus::Pending.is_active());
        assert!(SyncStatus::Running.is_active());
        assert!(SyncStatus::Success.is_terminal());
        assert!(SyncStatus::Partial.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(SyncStatus::from_str("PARTIAL").unwrap(), SyncStatus::Partial);
        assert_eq!(SyncStatus::from_str("success").unwrap(), SyncStatus::Success);
        assert!(SyncStatus::from_str("done").is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<SyncMode>().unwrap(), SyncMode::Full);
        assert_eq!("FORCED".parse::<SyncMode>().unwrap(), SyncMode::Forced);
        assert!("delta".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_new_checkpoint_is_pending() {
        let cp = checkpoint();
        assert_eq!(cp.status, SyncStatus::Pending);
        assert!(cp.started_at.is_none());
        assert!(cp.completed_at.is_none());
        assert!(cp.counts.is_none());
    }

    #[test]
    fn test_start_then_complete_success() {
        let cp = checkpoint().start().unwrap();
        assert_eq!(cp.status, SyncStatus::Running);
        assert!(cp.started_at.is_some());

        let counts = SyncCounts {
            processed: 100,
            created: 90,
            updated: 10,
            ..Default::default()
        };
        let cp = cp.complete(counts).unwrap();
        assert_eq!(cp.status, SyncStatus::Success);
        assert_eq!(cp.counts, Some(counts));
        assert!(cp.completed_at.is_some());
    }

    #[test]
    fn test_complete_with_errors_is_partial() {
        let cp = checkpoint().start().unwrap();
        let counts = SyncCounts {
            processed: 100,
            created: 95,
            errors: 5,
            ..Default::default()
        };
        let cp = cp.complete(counts).unwrap();
        assert_eq!(cp.status, SyncStatus::Partial);
    }

    #[test]
    fn test_fail_captures_partial_counts() {
        let cp = checkpoint().start().unwrap();
        let counts = SyncCounts {
            processed: 40,
            created: 40,
            ..Default::default()
        };
        let cp = cp
            .fail("source connection lost".to_string(), Some(counts))
            .unwrap();
        assert_eq!(cp.status, SyncStatus::Failed);
        assert_eq!(cp.error_message.as_deref(), Some("source connection lost"));
        assert_eq!(cp.counts, Some(counts));
    }

    #[test]
    fn test_cannot_complete_without_start() {
        let result = checkpoint().complete(SyncCounts::new());
        assert!(matches!(
            result,
            Err(SyncError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_terminal_states_cannot_transition() {
        let cp = checkpoint().start().unwrap().complete(SyncCounts::new()).unwrap();
        assert!(cp.clone().start().is_err());
        assert!(cp.clone().fail("late".to_string(), None).is_err());
        assert!(cp.complete(SyncCounts::new()).is_err());
    }

    #[test]
    fn test_update_progress_requires_running() {
        let mut cp = checkpoint();
        assert!(cp.update_progress(1, 10, 10, "streaming").is_err());

        let mut cp = checkpoint().start().unwrap();
        cp.update_progress(2, 10_000, 9_500, "streaming").unwrap();
        assert_eq!(cp.progress.pages_fetched, 2);
        assert_eq!(cp.progress.rows_fetched, 10_000);
        assert_eq!(cp.progress.records_written, 9_500);
    }

    #[test]
    fn test_duration_and_completed_time() {
        let cp = checkpoint();
        assert!(cp.duration_secs().is_none());
        assert!(cp.completed_time().is_none());

        let cp = cp.start().unwrap().complete(SyncCounts::new()).unwrap();
        assert!(cp.duration_secs().is_some());
        assert_eq!(
            cp.completed_time().map(|t| t.timestamp()),
            cp.completed_at
        );
    }
}
