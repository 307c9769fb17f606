//! # sluice-git
//!
//! Git plumbing layer for Sluice, built on git2-rs.
//!
//! Everything here works on bare repositories: merges, cherry-picks and
//! commits are computed in memory and written straight to the object
//! database, and refs are moved with compare-and-swap updates so that a
//! concurrent push is detected instead of clobbered.

mod error;
mod merge;
mod repository;
mod traits;

pub use error::{Error, Result};
pub use git2::Oid;
pub use merge::{MergeTree, NewCommit};
pub use repository::{BranchRef, CommitInfo, GitTime, Identity, Repository};
pub use traits::GitOps;

/// Prefix of local branch refs.
pub const BRANCH_PREFIX: &str = "refs/heads/";

/// Full ref name for a local branch.
#[must_use]
pub fn branch_ref(name: &str) -> String {
    format!("{BRANCH_PREFIX}{name}")
}

/// Parse a hex commit id.
///
/// # Errors
/// Returns [`Error::InvalidObjectId`] if the string is not a valid object id.
pub fn parse_oid(hex: &str) -> Result<Oid> {
    Oid::from_str(hex).map_err(|_| Error::InvalidObjectId(hex.to_string()))
}
