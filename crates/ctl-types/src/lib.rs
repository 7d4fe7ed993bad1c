//! Foundation types for the Campaign Timeline Ledger (CTL).
//!
//! This crate provides the identity, temporal, and payload types shared by
//! every other CTL crate.
//!
//! # Key Types
//!
//! - [`BranchId`] / [`VersionId`]: UUID v7 identifiers (time-ordered)
//! - [`EntityKey`]: `(entity_type, entity_id)` pair naming a tracked entity
//! - [`Timestamp`]: UTC instant with millisecond precision
//! - [`Clock`]: source of "now" ([`SystemClock`], [`ManualClock`])
//! - [`Payload`]: full entity state as an opaque JSON object

pub mod error;
pub mod identity;
pub mod payload;
pub mod temporal;

pub use error::TypeError;
pub use identity::{BranchId, EntityKey, VersionId};
pub use payload::Payload;
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
