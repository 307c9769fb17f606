//! Error types for sluice-core.

use std::path::PathBuf;

use crate::pull::StatusKind;
use crate::repo::RepoId;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sluice-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Repository row not found.
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    /// User row not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Pull request row not found.
    #[error("pull request not found: {0}")]
    PullNotFound(String),

    /// Issue row not found.
    #[error("issue not found: #{0}")]
    IssueNotFound(u64),

    /// Branch missing from git or from the index.
    #[error("branch '{branch}' not found in repository {repo_id}")]
    BranchNotFound {
        /// Repository the branch was looked up in.
        repo_id: RepoId,
        /// Branch name.
        branch: String,
    },

    /// A row with the same identity already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Head and base repositories are not part of the same fork network.
    #[error("repositories {head} and {base} are not forks of each other")]
    UnrelatedRepositories {
        /// Head repository.
        head: RepoId,
        /// Base repository.
        base: RepoId,
    },

    /// Head and base are the same branch of the same repository.
    #[error("head and base are the same branch: {0}")]
    SameBranch(String),

    /// Pull request status change not allowed by the transition table.
    #[error("pull request cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: StatusKind,
        /// Requested status.
        to: StatusKind,
    },

    /// The caller's view of the head commit is out of date.
    #[error("head branch has moved: expected {expected}, found {actual} - refresh and retry")]
    StaleHead {
        /// Head commit the caller asked to merge.
        expected: String,
        /// Current head commit.
        actual: String,
    },

    /// The base branch moved while the merge was being prepared.
    #[error("base branch '{0}' was updated during the merge - refresh and retry")]
    StaleBase(String),

    /// The verdict does not allow merging for a non-conflict reason.
    #[error("pull request cannot be merged: {reason}")]
    NotMergeable {
        /// Verdict reason.
        reason: String,
    },

    /// Three-way merge left conflicts.
    #[error("merge conflicts in: {}", files.join(", "))]
    MergeConflicts {
        /// Conflicted paths.
        files: Vec<String>,
    },

    /// Replaying a head commit onto the base conflicted.
    #[error("rebase conflicts while replaying {commit}: {}", files.join(", "))]
    RebaseConflicts {
        /// The commit that failed to apply.
        commit: String,
        /// Conflicted paths.
        files: Vec<String>,
    },

    /// Head and base have no common ancestor.
    #[error("refusing to merge unrelated histories")]
    MergeUnrelatedHistories,

    /// Fast-forward-only merge requested but base is not an ancestor of head.
    #[error("base branch has diverged from head - fast-forward only merge is not possible")]
    MergeDivergingFastForwardOnly,

    /// Head branch already contains the base branch.
    #[error("head branch '{0}' is already up to date with its base")]
    HeadUpToDate(String),

    /// No auto-merge is scheduled for the pull request.
    #[error("no auto-merge scheduled for pull request {0}")]
    AutoMergeNotScheduled(String),

    /// The doer lacks the right to perform the action.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// Push refused by a protected branch rule.
    #[error("push to protected branch '{branch}' rejected: {reason}")]
    PushRejected {
        /// Target branch.
        branch: String,
        /// Why the push was refused.
        reason: String,
    },

    /// Unknown merge style name.
    #[error("invalid merge style '{0}' - use merge, rebase, rebase-merge, squash or fast-forward-only")]
    InvalidMergeStyle(String),

    /// Unknown update style name.
    #[error("invalid update style '{0}' - use merge or rebase")]
    InvalidUpdateStyle(String),

    /// Invalid protected branch rule pattern.
    #[error("invalid branch rule pattern '{0}'")]
    InvalidRulePattern(String),

    /// Store lock poisoned by a panicking writer.
    #[error("store lock poisoned")]
    StorePoisoned,

    /// State file parsing error.
    #[error("failed to parse {file}: {message}")]
    StateParseError {
        /// File that failed to parse.
        file: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Background job failed to run to completion.
    #[error("background job failed: {0}")]
    Join(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Git operation error.
    #[error("git error: {0}")]
    Git(#[from] sluice_git::Error),
}

impl Error {
    /// Merge failed because of conflicting changes (merge or rebase).
    #[must_use]
    pub const fn is_merge_conflict(&self) -> bool {
        matches!(self, Self::MergeConflicts { .. } | Self::RebaseConflicts { .. })
    }

    /// Merge failed because the histories share no ancestor.
    #[must_use]
    pub const fn is_unrelated_histories(&self) -> bool {
        matches!(self, Self::MergeUnrelatedHistories)
    }

    /// Fast-forward-only merge failed because base diverged.
    #[must_use]
    pub const fn is_diverging_fast_forward(&self) -> bool {
        matches!(self, Self::MergeDivergingFastForwardOnly)
    }

    /// Caller must refresh its view of the pull request and retry.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleHead { .. } | Self::StaleBase(_))
    }

    /// Storage or git failure rather than a refusal.
    #[must_use]
    pub const fn is_plumbing(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Json(_)
                | Self::Toml(_)
                | Self::Git(_)
                | Self::Join(_)
                | Self::StorePoisoned
                | Self::StateParseError { .. }
        )
    }
}
