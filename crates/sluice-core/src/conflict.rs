//! Conflict, unrelated-history and divergence detection for a commit pair.
//!
//! Everything here is a pure function of the two commits: the same pair
//! always gives the same answer, and nothing is written outside the object
//! database's in-memory merge.

use serde::Serialize;
use sluice_git::{GitOps, Oid};

use crate::error::Result;
use crate::pull::{ConflictReport, PullRequestStatus};

/// Result of trying to merge head into base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictCheck {
    /// Paths left in conflict, in the order the merge reported them.
    pub conflicted_files: Vec<String>,
    /// Head and base share no common ancestor.
    pub unrelated: bool,
    /// Common ancestor, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_base: Option<String>,
}

impl ConflictCheck {
    /// Head merges into base without conflicts.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.unrelated && self.conflicted_files.is_empty()
    }

    /// The pull request status this check leads to.
    #[must_use]
    pub fn status(&self) -> PullRequestStatus {
        if self.is_clean() {
            PullRequestStatus::Mergeable
        } else {
            PullRequestStatus::Conflict(ConflictReport {
                files: self.conflicted_files.clone(),
                unrelated: self.unrelated,
            })
        }
    }
}

/// Commits unique to each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Divergence {
    /// Commits on head that base lacks.
    pub ahead: usize,
    /// Commits on base that head lacks.
    pub behind: usize,
}

/// Compares a base and a head commit in one repository.
pub struct ConflictDetector<'a> {
    git: &'a dyn GitOps,
}

impl<'a> ConflictDetector<'a> {
    /// Detector over `git`.
    #[must_use]
    pub fn new(git: &'a dyn GitOps) -> Self {
        Self { git }
    }

    /// Try merging `head` into `base`.
    ///
    /// Unrelated histories are reported without attempting a merge.
    ///
    /// # Errors
    /// Returns error if the commits can't be read or merged.
    pub fn check_conflicts(&self, base: Oid, head: Oid) -> Result<ConflictCheck> {
        let Some(merge_base) = self.git.merge_base(base, head)? else {
            tracing::debug!(%base, %head, "no merge base");
            return Ok(ConflictCheck {
                conflicted_files: Vec::new(),
                unrelated: true,
                merge_base: None,
            });
        };

        let merged = self.git.merge_tree(base, head)?;
        tracing::debug!(%base, %head, conflicts = merged.conflicts.len(), "merge tree computed");

        Ok(ConflictCheck {
            conflicted_files: merged.conflicts,
            unrelated: false,
            merge_base: Some(merge_base.to_string()),
        })
    }

    /// Whether base can fast-forward to head.
    ///
    /// # Errors
    /// Returns error if the graph walk fails.
    pub fn is_fast_forwardable(&self, base: Oid, head: Oid) -> Result<bool> {
        Ok(self.git.is_ancestor(base, head)?)
    }

    /// How far head and base have drifted apart.
    ///
    /// # Errors
    /// Returns error if the graph walk fails.
    pub fn divergence(&self, base: Oid, head: Oid) -> Result<Divergence> {
        let (ahead, behind) = self.git.ahead_behind(head, base)?;
        Ok(Divergence { ahead, behind })
    }

    /// Resolve a branch name or full ref name to a commit.
    ///
    /// # Errors
    /// Returns error if nothing by that name exists.
    pub fn resolve(&self, name: &str) -> Result<Oid> {
        if name.starts_with("refs/") {
            Ok(self.git.resolve_ref(name)?)
        } else {
            Ok(self.git.branch_commit(name)?)
        }
    }
}
