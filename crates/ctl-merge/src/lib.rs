//! Merge engine for the Campaign Timeline Ledger.
//!
//! Merges one entity from a source branch into a target branch with a
//! three-way, field-level comparison against the state both sides share:
//! the lowest common ancestor branch, resolved at a fork point.
//!
//! Conflicts are an expected outcome rather than a failure, so they are
//! returned as [`MergeResult::Conflicted`]. A merge is all-or-nothing: when
//! any field conflicts nothing is written, and the caller resolves the
//! conflicts through [`MergeEngine::merge_with_resolutions`].
//!
//! # Modules
//!
//! - [`three_way`]: the pure field-level merge of three payloads
//! - [`types`]: requests, results, conflicts and previews
//! - [`engine`]: [`MergeEngine`], which resolves the three sides and
//!   commits the result with a compare-and-swap on both branches

pub mod engine;
pub mod error;
pub mod three_way;
pub mod types;

pub use engine::{MergeEngine, DEFAULT_MERGE_ATTEMPTS};
pub use error::MergeError;
pub use three_way::{three_way, ThreeWay};
pub use types::{ConflictField, MergeBasePolicy, MergePreview, MergeRequest, MergeResult, MergeSide};
