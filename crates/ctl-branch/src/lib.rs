//! Branch management for the Campaign Timeline Ledger.
//!
//! Branches form a single-rooted tree. Each branch records only its parent
//! and the instant it diverged from that parent; children are found through
//! an index rather than stored pointers, so deletion (leaf-only) stays
//! trivially verifiable.
//!
//! # Architecture
//!
//! - **Forking** is O(1): no entity state is copied. A child sees its
//!   ancestors' history up to its divergence time through lazy resolution.
//! - **Deletion** only removes leaves that are not pinned, together with
//!   the versions written on that branch. Ancestors and siblings are never
//!   touched.
//!
//! # Modules
//!
//! - [`error`]: Error types for branch operations
//! - [`types`]: The [`Branch`] record
//! - [`traits`]: The [`BranchStore`] trait defining the storage interface
//! - [`names`]: Branch name validation
//! - [`memory`]: In-memory [`InMemoryBranchStore`]
//! - [`tree`]: [`BranchTree`], the fork/ancestry/delete operations

pub mod error;
pub mod memory;
pub mod names;
pub mod traits;
pub mod tree;
pub mod types;

pub use error::{BranchError, BranchResult};
pub use memory::{BranchSnapshot, InMemoryBranchStore};
pub use names::{validate_branch_name, validate_tag};
pub use traits::BranchStore;
pub use tree::BranchTree;
pub use types::Branch;
