//! Pull request data model and its status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::repo::{RepoId, UserId};

/// Pull request row id.
pub type PullId = u64;

/// Issue row id.
pub type IssueId = u64;

/// How a pull request's changes land on the base branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStyle {
    /// Two-parent merge commit, even when a fast-forward is possible.
    #[default]
    Merge,
    /// Replay head commits onto base and fast-forward.
    Rebase,
    /// Replay head commits onto base, then join them with a merge commit.
    RebaseMerge,
    /// Collapse head commits into one commit on base.
    Squash,
    /// Move base to head, refusing anything but a fast-forward.
    FastForwardOnly,
}

impl MergeStyle {
    /// All styles, in display order.
    pub const ALL: [Self; 5] = [
        Self::Merge,
        Self::Rebase,
        Self::RebaseMerge,
        Self::Squash,
        Self::FastForwardOnly,
    ];

    /// The kebab-case name used in config files and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Rebase => "rebase",
            Self::RebaseMerge => "rebase-merge",
            Self::Squash => "squash",
            Self::FastForwardOnly => "fast-forward-only",
        }
    }
}

impl fmt::Display for MergeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| Error::InvalidMergeStyle(s.to_string()))
    }
}

/// How a head branch catches up with its base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStyle {
    /// Merge the base tip into the head branch.
    #[default]
    Merge,
    /// Replay the head commits onto the base tip.
    Rebase,
}

impl UpdateStyle {
    /// The name used on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Rebase => "rebase",
        }
    }
}

impl fmt::Display for UpdateStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(Self::Merge),
            "rebase" => Ok(Self::Rebase),
            other => Err(Error::InvalidUpdateStyle(other.to_string())),
        }
    }
}

/// A merge that runs once every gate passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMerge {
    /// Pull request to merge.
    pub pull_id: PullId,
    /// User the merge runs as.
    pub doer_id: UserId,
    /// Strategy to merge with.
    pub style: MergeStyle,
    /// Commit message override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Delete the head branch afterwards.
    #[serde(default)]
    pub delete_head_branch: bool,
    /// When it was scheduled.
    pub created_at: DateTime<Utc>,
}

/// Conflicts found by the last mergeability check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Conflicted paths in the order the merge reported them.
    #[serde(default)]
    pub files: Vec<String>,
    /// Head and base share no history at all.
    #[serde(default)]
    pub unrelated: bool,
}

/// Who merged a pull request, how, and into which commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Commit the base branch points at after the merge.
    pub commit_id: String,
    /// User that performed the merge.
    pub merged_by: UserId,
    /// When the merge happened.
    pub merged_at: DateTime<Utc>,
    /// Strategy used.
    pub style: MergeStyle,
}

/// Status of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PullRequestStatus {
    /// Mergeability is being (re)computed.
    Checking,
    /// Head merges cleanly into base.
    Mergeable,
    /// Head conflicts with base, or the histories are unrelated.
    Conflict(ConflictReport),
    /// The check itself failed.
    Error {
        /// What went wrong.
        message: String,
    },
    /// Closed without merging.
    Closed,
    /// Merged into base.
    Merged(MergeRecord),
}

impl PullRequestStatus {
    /// The variant without its payload.
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        match self {
            Self::Checking => StatusKind::Checking,
            Self::Mergeable => StatusKind::Mergeable,
            Self::Conflict(_) => StatusKind::Conflict,
            Self::Error { .. } => StatusKind::Error,
            Self::Closed => StatusKind::Closed,
            Self::Merged(_) => StatusKind::Merged,
        }
    }
}

/// Payload-free view of [`PullRequestStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// See [`PullRequestStatus::Checking`].
    Checking,
    /// See [`PullRequestStatus::Mergeable`].
    Mergeable,
    /// See [`PullRequestStatus::Conflict`].
    Conflict,
    /// See [`PullRequestStatus::Error`].
    Error,
    /// See [`PullRequestStatus::Closed`].
    Closed,
    /// See [`PullRequestStatus::Merged`].
    Merged,
}

impl StatusKind {
    /// Terminal states accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Merged)
    }

    /// Whether the transition table allows `self -> to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match self {
            Self::Checking => !matches!(to, Self::Merged),
            Self::Mergeable => matches!(to, Self::Checking | Self::Closed | Self::Merged),
            Self::Conflict | Self::Error => matches!(to, Self::Checking | Self::Closed),
            Self::Closed | Self::Merged => false,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Checking => "checking",
            Self::Mergeable => "mergeable",
            Self::Conflict => "conflict",
            Self::Error => "error",
            Self::Closed => "closed",
            Self::Merged => "merged",
        };
        f.write_str(name)
    }
}

/// The issue half of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Row id.
    pub id: IssueId,
    /// Repository the issue lives in (the pull request's base repository).
    pub repo_id: RepoId,
    /// Per-repository number, starting at 1.
    pub index: u64,
    /// Title; carries the work-in-progress marker.
    pub title: String,
    /// Author.
    pub poster_id: UserId,
    /// Whether this issue is a pull request.
    pub is_pull: bool,
    /// Closed issues accept no merges.
    pub is_closed: bool,
}

/// A request to integrate a head branch into a base branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Row id.
    pub id: PullId,
    /// Matching [`Issue`] row.
    pub issue_id: IssueId,
    /// Same as the issue's index.
    pub index: u64,
    /// Repository holding the head branch.
    pub head_repo_id: RepoId,
    /// Repository holding the base branch.
    pub base_repo_id: RepoId,
    /// Branch with the proposed changes.
    pub head_branch: String,
    /// Branch the changes land on.
    pub base_branch: String,
    /// Current state.
    pub status: PullRequestStatus,
    /// Head tip at the last check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit_id: Option<String>,
    /// Base tip at the last check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit_id: Option<String>,
    /// Merge base found by the last check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_base: Option<String>,
    /// Protected paths the head changes relative to the merge base.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_protected_files: Vec<String>,
    /// When the pull request was opened.
    pub created_at: DateTime<Utc>,
}

impl PullRequest {
    /// Move to `status`, enforcing the transition table.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] if the move isn't allowed.
    pub fn transition(&mut self, status: PullRequestStatus) -> Result<()> {
        let from = self.status.kind();
        let to = status.kind();
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        self.status = status;
        Ok(())
    }

    /// Neither closed nor merged.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.status.kind().is_terminal()
    }

    /// Whether the pull request has been merged.
    #[must_use]
    pub const fn has_merged(&self) -> bool {
        matches!(self.status, PullRequestStatus::Merged(_))
    }

    /// Commit the base pointed at right after the merge.
    #[must_use]
    pub fn merged_commit_id(&self) -> Option<&str> {
        match &self.status {
            PullRequestStatus::Merged(record) => Some(&record.commit_id),
            _ => None,
        }
    }

    /// Paths in conflict as of the last check.
    #[must_use]
    pub fn conflicted_files(&self) -> &[String] {
        match &self.status {
            PullRequestStatus::Conflict(report) => &report.files,
            _ => &[],
        }
    }

    /// Head and base live in the same repository.
    #[must_use]
    pub const fn is_same_repo(&self) -> bool {
        self.head_repo_id == self.base_repo_id
    }

    /// Ref in the base repository holding a copy of the head tip.
    #[must_use]
    pub fn head_ref(&self) -> String {
        format!("refs/pull/{}/head", self.index)
    }
}
