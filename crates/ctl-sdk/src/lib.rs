//! High-level SDK for the Campaign Timeline Ledger.
//!
//! [`Ctl`] is the single entry point a transport layer calls into: it wires
//! the version store, branch tree, resolver, merge engine and
//! [`RestoreService`] together under one [`EngineConfig`]. [`LocalState`]
//! persists the in-memory backends to a JSON file for the CLI.

pub mod config;
pub mod ctl;
pub mod error;
pub mod restore;
pub mod state;

pub use config::EngineConfig;
pub use ctl::{Ctl, Pagination, PatchRequest};
pub use error::{CtlError, CtlResult};
pub use restore::{RestoreRequest, RestoreService};
pub use state::{LocalState, StateFile};

// Re-export the types callers need to talk to the facade.
pub use ctl_branch::Branch;
pub use ctl_diff::{Diff, FieldChange, PatchOperation};
pub use ctl_merge::{ConflictField, MergeBasePolicy, MergePreview, MergeRequest, MergeResult};
pub use ctl_resolve::ResolvedState;
pub use ctl_store::{HistoryCursor, HistoryPage, NewVersion, ValidationReport, Version, VersionKey};
pub use ctl_types::{BranchId, Clock, EntityKey, ManualClock, Payload, SystemClock, Timestamp, VersionId};
