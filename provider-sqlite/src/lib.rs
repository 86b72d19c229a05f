//! # SQLite Sync Provider
//!
//! Reference implementations of the sync collaborator traits over
//! SQLite: a keyset-paginated [`SqliteSourceClient`] and a bulk-upsert
//! [`SqliteTargetStore`]. Production deployments put their own adapters
//! behind the same traits; this crate exists so the engine can be
//! exercised end to end against a real database.

pub mod source;
pub mod target;

pub use source::SqliteSourceClient;
pub use target::SqliteTargetStore;
