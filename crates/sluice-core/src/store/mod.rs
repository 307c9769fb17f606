//! Persisted rows behind small CRUD traits.
//!
//! Each trait covers one table. Writes to a single row are atomic; nothing
//! spans rows, so callers re-read and rely on git refs as the source of truth.

mod json;

pub use json::JsonStore;

use crate::branch::{Branch, ProtectedBranch, find_matching_rule};
use crate::error::Result;
use crate::pull::{AutoMerge, Issue, IssueId, PullId, PullRequest};
use crate::repo::{Repo, RepoId, User, UserId};

/// Repository rows.
pub trait RepoStore {
    /// Insert a repository, assigning its id.
    ///
    /// # Errors
    /// Returns [`crate::Error::AlreadyExists`] if `owner/name` is taken.
    fn insert_repo(&self, repo: Repo) -> Result<Repo>;

    /// Look up a repository by id.
    ///
    /// # Errors
    /// Returns [`crate::Error::RepoNotFound`] if there is no such row.
    fn repo(&self, id: RepoId) -> Result<Repo>;

    /// Look up a repository by `owner/name`.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn repo_by_name(&self, owner: &str, name: &str) -> Result<Option<Repo>>;

    /// All repositories, by id.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn repos(&self) -> Result<Vec<Repo>>;
}

/// User rows.
pub trait UserStore {
    /// Insert a user, assigning its id.
    ///
    /// # Errors
    /// Returns [`crate::Error::AlreadyExists`] if the name is taken.
    fn insert_user(&self, user: User) -> Result<User>;

    /// Look up a user by id.
    ///
    /// # Errors
    /// Returns [`crate::Error::UserNotFound`] if there is no such row.
    fn user(&self, id: UserId) -> Result<User>;

    /// Look up a user by login name.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn user_by_name(&self, name: &str) -> Result<Option<User>>;
}

/// Branch rows, unique per `(repo_id, name)`.
pub trait BranchIndex {
    /// The row for a branch, live or deleted.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn get_branch(&self, repo_id: RepoId, name: &str) -> Result<Option<Branch>>;

    /// Rows of a repository sorted by name.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn list_branches(&self, repo_id: RepoId, include_deleted: bool) -> Result<Vec<Branch>>;

    /// Insert or replace the row with the same `(repo_id, name)`.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn upsert_branch(&self, branch: &Branch) -> Result<()>;

    /// Write `branch` only if no live row exists for it.
    ///
    /// Returns whether the row was written.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn restore_branch(&self, branch: &Branch) -> Result<bool>;

    /// Soft-delete a live row.
    ///
    /// With `expected_commit` the row is only touched while it still points
    /// at that commit. Returns whether a row changed.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn mark_branch_deleted(
        &self,
        repo_id: RepoId,
        name: &str,
        expected_commit: Option<&str>,
        deleted_by: UserId,
    ) -> Result<bool>;

    /// Number of live rows in a repository.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn count_branches(&self, repo_id: RepoId) -> Result<usize>;
}

/// Protected branch rules, kept in insertion order.
pub trait ProtectionStore {
    /// Rules of a repository in the order they were first stored.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn protected_branches(&self, repo_id: RepoId) -> Result<Vec<ProtectedBranch>>;

    /// Insert a rule or replace the one with the same name in place.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn save_protected_branch(&self, rule: &ProtectedBranch) -> Result<()>;

    /// Remove a rule; returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn delete_protected_branch(&self, repo_id: RepoId, rule_name: &str) -> Result<bool>;

    /// The rule protecting `branch`, if any.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn protection_for(&self, repo_id: RepoId, branch: &str) -> Result<Option<ProtectedBranch>> {
        let rules = self.protected_branches(repo_id)?;
        Ok(find_matching_rule(&rules, branch).cloned())
    }
}

/// Pull requests and their issues.
pub trait PullStore {
    /// Insert an issue and its pull request.
    ///
    /// Assigns both ids and the next per-repository index.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn create_pull(&self, issue: Issue, pull: PullRequest) -> Result<PullRequest>;

    /// Look up a pull request by id.
    ///
    /// # Errors
    /// Returns [`crate::Error::PullNotFound`] if there is no such row.
    fn pull(&self, id: PullId) -> Result<PullRequest>;

    /// Look up a pull request by base repository and index.
    ///
    /// # Errors
    /// Returns [`crate::Error::PullNotFound`] if there is no such row.
    fn pull_by_index(&self, repo_id: RepoId, index: u64) -> Result<PullRequest>;

    /// Read-modify-write a pull request atomically.
    ///
    /// Nothing is written if `update` fails. `update` must not call back into
    /// the store.
    ///
    /// # Errors
    /// Returns [`crate::Error::PullNotFound`] or whatever `update` returns.
    fn update_pull(
        &self,
        id: PullId,
        update: &mut dyn FnMut(&mut PullRequest) -> Result<()>,
    ) -> Result<PullRequest>;

    /// Look up an issue by id.
    ///
    /// # Errors
    /// Returns [`crate::Error::IssueNotFound`] if there is no such row.
    fn issue(&self, id: IssueId) -> Result<Issue>;

    /// Replace an issue row.
    ///
    /// # Errors
    /// Returns [`crate::Error::IssueNotFound`] if there is no such row.
    fn save_issue(&self, issue: &Issue) -> Result<()>;

    /// Open pull requests targeting `(repo_id, branch)`.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn open_pulls_by_base(&self, repo_id: RepoId, branch: &str) -> Result<Vec<PullRequest>>;

    /// Open pull requests whose head is `(repo_id, branch)`.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn open_pulls_by_head(&self, repo_id: RepoId, branch: &str) -> Result<Vec<PullRequest>>;

    /// Every pull request based in a repository, by index.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn pulls(&self, repo_id: RepoId) -> Result<Vec<PullRequest>>;
}

/// Scheduled auto-merges, at most one per pull request.
pub trait AutoMergeStore {
    /// Store a scheduled merge.
    ///
    /// # Errors
    /// Returns [`crate::Error::AlreadyExists`] if the pull request already has one.
    fn schedule_auto_merge(&self, auto_merge: &AutoMerge) -> Result<()>;

    /// The scheduled merge of a pull request, if any.
    ///
    /// # Errors
    /// Returns error if the store can't be read.
    fn auto_merge(&self, pull_id: PullId) -> Result<Option<AutoMerge>>;

    /// Drop a scheduled merge; returns whether one existed.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    fn remove_auto_merge(&self, pull_id: PullId) -> Result<bool>;
}

/// Every table in one handle.
pub trait Store:
    RepoStore + UserStore + BranchIndex + ProtectionStore + PullStore + AutoMergeStore + Send + Sync
{
}

impl<T> Store for T where
    T: RepoStore
        + UserStore
        + BranchIndex
        + ProtectionStore
        + PullStore
        + AutoMergeStore
        + Send
        + Sync
{
}
