//! Lazy ancestry resolution for the Campaign Timeline Ledger.
//!
//! A branch stores only its own writes. To answer "what does entity X look
//! like on branch B at time T", the [`VersionResolver`] walks B's ancestor
//! chain, closest first, and asks each branch for the version covering the
//! latest instant that branch is allowed to contribute:
//!
//! - the requested branch contributes up to `T`;
//! - each ancestor contributes up to the point its child diverged (capped at
//!   `T`), so ancestor writes made after a fork stay invisible below it;
//! - a non-root branch whose divergence point lies after that instant
//!   contributes nothing.
//!
//! Forking therefore copies nothing and is O(1) regardless of campaign size.

pub mod error;
pub mod resolver;

pub use error::{ResolveError, ResolveResult};
pub use resolver::{LookupPoint, ResolvedState, VersionResolver};
