//! Trait abstractions for git operations.
//!
//! This module defines the `GitOps` trait which abstracts the ref store
//! and commit graph, enabling dependency injection and testability.

use std::path::Path;

use git2::Oid;

use crate::{BranchRef, CommitInfo, MergeTree, NewCommit, Repository, Result};

/// Trait for git repository operations.
///
/// Git operations are synchronous since git2 is a synchronous library;
/// callers that need concurrency run them on blocking workers.
#[allow(clippy::missing_errors_doc)]
pub trait GitOps {
    // === Refs ===

    /// Path to the git directory.
    fn git_dir(&self) -> &Path;

    /// List all local branches with their tips.
    fn list_branches(&self) -> Result<Vec<BranchRef>>;

    /// Check if a branch exists.
    fn branch_exists(&self, name: &str) -> bool;

    /// Get the commit ID for a branch.
    fn branch_commit(&self, branch: &str) -> Result<Oid>;

    /// Resolve any full ref name to a commit.
    fn resolve_ref(&self, refname: &str) -> Result<Oid>;

    /// Compare-and-swap a ref (`expected = None` means create-only).
    fn update_ref(
        &self,
        refname: &str,
        target: Oid,
        expected: Option<Oid>,
        log_message: &str,
    ) -> Result<()>;

    /// Point a ref at `target` unconditionally.
    fn force_ref(&self, refname: &str, target: Oid, log_message: &str) -> Result<()>;

    /// Delete a branch, optionally guarded by its expected tip.
    fn delete_branch(&self, name: &str, expected: Option<Oid>) -> Result<()>;

    /// Copy a ref from another repository on disk.
    fn fetch_ref(&self, source: &Path, src_ref: &str, dst_ref: &str) -> Result<Oid>;

    // === Commit graph ===

    /// Read commit metadata.
    fn commit_info(&self, oid: Oid) -> Result<CommitInfo>;

    /// Find the merge base of two commits, if any.
    fn merge_base(&self, one: Oid, two: Oid) -> Result<Option<Oid>>;

    /// Check if a commit is an ancestor of (or equal to) another commit.
    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool>;

    /// Count commits unique to `head` and unique to `base`.
    fn ahead_behind(&self, head: Oid, base: Oid) -> Result<(usize, usize)>;

    /// Commits reachable from `to` but not `from`, oldest first.
    fn commits_between(&self, from: Oid, to: Oid) -> Result<Vec<Oid>>;

    /// Paths that differ between the trees of two commits.
    fn changed_files(&self, from: Oid, to: Oid) -> Result<Vec<String>>;

    // === Merging ===

    /// Three-way merge of two commits.
    fn merge_tree(&self, ours: Oid, theirs: Oid) -> Result<MergeTree>;

    /// Replay a single commit on top of another.
    fn cherry_pick(&self, commit: Oid, onto: Oid) -> Result<MergeTree>;

    /// Write a commit object.
    fn write_commit(&self, commit: &NewCommit) -> Result<Oid>;
}

impl GitOps for Repository {
    fn git_dir(&self) -> &Path {
        Self::git_dir(self)
    }

    fn list_branches(&self) -> Result<Vec<BranchRef>> {
        Self::list_branches(self)
    }

    fn branch_exists(&self, name: &str) -> bool {
        Self::branch_exists(self, name)
    }

    fn branch_commit(&self, branch: &str) -> Result<Oid> {
        Self::branch_commit(self, branch)
    }

    fn resolve_ref(&self, refname: &str) -> Result<Oid> {
        Self::resolve_ref(self, refname)
    }

    fn update_ref(
        &self,
        refname: &str,
        target: Oid,
        expected: Option<Oid>,
        log_message: &str,
    ) -> Result<()> {
        Self::update_ref(self, refname, target, expected, log_message)
    }

    fn force_ref(&self, refname: &str, target: Oid, log_message: &str) -> Result<()> {
        Self::force_ref(self, refname, target, log_message)
    }

    fn delete_branch(&self, name: &str, expected: Option<Oid>) -> Result<()> {
        Self::delete_branch(self, name, expected)
    }

    fn fetch_ref(&self, source: &Path, src_ref: &str, dst_ref: &str) -> Result<Oid> {
        Self::fetch_ref(self, source, src_ref, dst_ref)
    }

    fn commit_info(&self, oid: Oid) -> Result<CommitInfo> {
        Self::commit_info(self, oid)
    }

    fn merge_base(&self, one: Oid, two: Oid) -> Result<Option<Oid>> {
        Self::merge_base(self, one, two)
    }

    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        Self::is_ancestor(self, ancestor, descendant)
    }

    fn ahead_behind(&self, head: Oid, base: Oid) -> Result<(usize, usize)> {
        Self::ahead_behind(self, head, base)
    }

    fn commits_between(&self, from: Oid, to: Oid) -> Result<Vec<Oid>> {
        Self::commits_between(self, from, to)
    }

    fn changed_files(&self, from: Oid, to: Oid) -> Result<Vec<String>> {
        Self::changed_files(self, from, to)
    }

    fn merge_tree(&self, ours: Oid, theirs: Oid) -> Result<MergeTree> {
        Self::merge_tree(self, ours, theirs)
    }

    fn cherry_pick(&self, commit: Oid, onto: Oid) -> Result<MergeTree> {
        Self::cherry_pick(self, commit, onto)
    }

    fn write_commit(&self, commit: &NewCommit) -> Result<Oid> {
        Self::write_commit(self, commit)
    }
}
