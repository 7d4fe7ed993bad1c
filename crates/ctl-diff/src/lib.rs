//! Diff engine for the Campaign Timeline Ledger.
//!
//! Pure functions over entity payloads: structural comparison, replaying a
//! diff onto a base, and applying the JSON Patch documents produced by the
//! rules engine.
//!
//! # Key Types
//!
//! - [`Diff`] / [`FieldChange`] -- added/modified/removed fields
//! - [`PatchOperation`] -- one JSON Patch step (`add`, `remove`, `replace`, `test`)

pub mod diff;
pub mod error;
pub mod patch;

pub use diff::{apply_diff, diff, structurally_equal, Diff, FieldChange, FieldOutcome};
pub use error::{PatchError, PatchResult};
pub use patch::{apply_patch, PatchOperation};
