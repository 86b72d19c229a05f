//! # Streaming Sync Engine
//!
//! Checkpointed, memory-bounded synchronization from external sources
//! into a local warehouse.
//!
//! ## Overview
//!
//! This crate drives the full lifecycle of a sync run:
//! - Streaming source pages via keyset pagination (`SourceClient`)
//! - Transforming and validating raw rows into canonical records
//! - Writing with conflict resolution and tiered degradation
//! - Recording progress and outcomes as append-only checkpoints
//! - Bounding peak memory to one page regardless of source size
//!
//! ## Components
//!
//! - **Keyset Cursor** (`cursor`): Lazy, restart-safe paging over a source entity
//! - **Field Schema** (`schema`): Declared field layout with per-type coercion
//! - **Record Transformer** (`transformer`): Validation with distinct drop / corruption counters
//! - **Conflict-Resolution Writer** (`writer`): Bulk upserts degrading to partitioned and individual writes
//! - **Memory Guard** (`memory`): Page-size clamping and explicit page release
//! - **Checkpoint State Machine** (`checkpoint`): Validated run lifecycle transitions
//! - **Repository** (`repository`): Database persistence for checkpoint history
//! - **Orchestrator** (`orchestrator`): Ties the pipeline together under one checkpoint

pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod repository;
pub mod schema;
pub mod transformer;
pub mod writer;

pub use checkpoint::{
    Checkpoint, CheckpointId, SyncCounts, SyncMode, SyncProgress, SyncStatus,
};
pub use cursor::SourceCursor;
pub use error::{Result, SyncError};
pub use memory::{MemoryGuard, FIRST_PAGE_ABORT_THRESHOLD, PAGE_SIZE_CEILING};
pub use orchestrator::{SyncConfig, SyncOrchestrator, SyncReport, SyncRequest};
pub use repository::{CheckpointRepository, SqliteCheckpointRepository};
pub use schema::{coerce_value, CoercionError, FieldDescriptor, FieldSource, FieldType, IntWidth};
pub use transformer::{RecordTransformer, TransformCounters};
pub use writer::{
    BatchOutcome, ConflictResolutionWriter, DryRunTarget, RecordOutcome, WriteStats,
    WriterConfig,
};
