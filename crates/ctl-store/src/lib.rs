//! Append-only bitemporal version store for the Campaign Timeline Ledger.
//!
//! Every change to an entity is recorded as an immutable [`Version`] on one
//! branch. For a fixed `(entity_type, entity_id, branch)` key the versions
//! form a contiguous, non-overlapping partition of time with exactly one
//! open interval: the current version.
//!
//! # Storage Backends
//!
//! All backends implement the [`VersionStore`] trait:
//!
//! - [`InMemoryVersionStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Versions are immutable once written; corrections are new versions.
//! 2. Appending closes the open version and inserts the next one atomically.
//! 3. Writers are serialized per key with a compare-and-swap on the head
//!    version number; readers never block and never see a torn write.
//! 4. The store never interprets payload contents.

pub mod error;
pub mod history;
pub mod memory;
pub mod records;
pub mod traits;
pub mod validation;

pub use error::{StoreError, StoreResult};
pub use history::HistoryIter;
pub use memory::{InMemoryVersionStore, StoreSnapshot};
pub use records::{HeadGuard, HistoryCursor, HistoryPage, NewVersion, Version, VersionKey};
pub use traits::{VersionStore, DEFAULT_APPEND_ATTEMPTS};
pub use validation::{validate_history, ValidationReport, Violation, ViolationKind};
