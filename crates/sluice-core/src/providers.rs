//! Reviews and commit statuses produced by collaborators outside the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pull::PullId;
use crate::repo::{RepoId, UserId};

/// Kind of review left on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewKind {
    /// Approves the changes.
    Approve,
    /// Requests changes.
    Reject,
    /// Neither approves nor blocks.
    Comment,
}

/// A review by one user on one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Reviewed pull request.
    pub pull_id: PullId,
    /// Reviewer.
    pub reviewer_id: UserId,
    /// Verdict.
    pub kind: ReviewKind,
    /// Head commit the review was made against.
    pub commit_id: String,
    /// When the review was submitted.
    pub created_at: DateTime<Utc>,
}

/// Approvals and rejections counting only each reviewer's latest review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    /// Reviewers whose latest review approves.
    pub approvals: u32,
    /// Reviewers whose latest review requests changes.
    pub rejections: u32,
}

impl ReviewSummary {
    /// Summarise reviews given in submission order.
    #[must_use]
    pub fn from_reviews<'a>(reviews: impl IntoIterator<Item = &'a Review>) -> Self {
        let mut latest: Vec<&Review> = Vec::new();
        for review in reviews {
            if let Some(slot) = latest
                .iter_mut()
                .find(|seen| seen.reviewer_id == review.reviewer_id)
            {
                *slot = review;
            } else {
                latest.push(review);
            }
        }

        latest
            .into_iter()
            .fold(Self::default(), |mut summary, review| {
                match review.kind {
                    ReviewKind::Approve => summary.approvals += 1,
                    ReviewKind::Reject => summary.rejections += 1,
                    ReviewKind::Comment => {}
                }
                summary
            })
    }
}

/// Source of review counts for a pull request.
pub trait ReviewProvider: Send + Sync {
    /// Current review counts.
    ///
    /// # Errors
    /// Returns error if reviews can't be read.
    fn review_summary(&self, pull_id: PullId) -> Result<ReviewSummary>;
}

/// State of a commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    /// Still running.
    Pending,
    /// Passed.
    Success,
    /// Could not run.
    Error,
    /// Ran and failed.
    Failure,
    /// Passed with warnings.
    Warning,
}

impl CheckState {
    /// Check if this state counts as passing.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Warning)
    }

    /// Check if this state counts as failing.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Failure)
    }

    /// Check if the status is still running.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A CI status reported against a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    /// Repository the status was reported to.
    pub repo_id: RepoId,
    /// Commit the status is about.
    pub commit_id: String,
    /// Status context, e.g. `ci/build`.
    pub context: String,
    /// Reported state.
    pub state: CheckState,
    /// When the status was reported.
    pub created_at: DateTime<Utc>,
}

/// Source of commit statuses.
pub trait StatusCheckProvider: Send + Sync {
    /// Latest status per context for a commit.
    ///
    /// # Errors
    /// Returns error if statuses can't be read.
    fn statuses(&self, repo_id: RepoId, commit_id: &str) -> Result<Vec<CommitStatus>>;
}

/// Keep only the newest status per context, preserving first-seen order.
#[must_use]
pub fn latest_per_context<'a>(
    statuses: impl IntoIterator<Item = &'a CommitStatus>,
) -> Vec<CommitStatus> {
    let mut latest: Vec<CommitStatus> = Vec::new();
    for status in statuses {
        match latest.iter_mut().find(|seen| seen.context == status.context) {
            Some(seen) if status.created_at >= seen.created_at => *seen = status.clone(),
            Some(_) => {}
            None => latest.push(status.clone()),
        }
    }
    latest
}
