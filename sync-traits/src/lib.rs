//! # Sync Collaborator Traits
//!
//! Contracts between the sync engine and the systems it reads from and
//! writes to.
//!
//! ## Overview
//!
//! The engine is format-agnostic: it pages rows out of a
//! [`SourceClient`] and writes typed [`CanonicalRecord`]s into a
//! [`TargetStore`]. Everything source- or store-specific (wire
//! protocols, SQL dialects, credential handling) lives behind these
//! traits in adapter crates such as `provider-sqlite`.
//!
//! ## Traits
//!
//! - [`SourceClient`](source::SourceClient) - keyset-paginated row access to one source entity
//! - [`TargetStore`](target::TargetStore) - bulk upsert persistence for one target table
//!
//! ## Error Handling
//!
//! Implementations report failures through [`StoreError`](error::StoreError);
//! the engine maps these into its own error taxonomy and decides which
//! are recoverable.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; one run holds a source checkout
//! across all pages and must be able to move across await points.

pub mod error;
pub mod record;
pub mod source;
pub mod target;

pub use error::{Result, StoreError};
pub use record::{CanonicalRecord, FieldValue, RowPayload, SourceRow};
pub use source::SourceClient;
pub use target::TargetStore;
