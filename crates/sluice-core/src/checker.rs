//! Mergeability checks and the merge verdict.
//!
//! A check moves a pull request through `Checking` into `Mergeable`,
//! `Conflict` or `Error` based on the git state alone. The verdict layers
//! the title, protection rules, reviews and statuses on top of the last
//! check and is computed fresh for every caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sluice_git::{GitOps, Oid};

use crate::branch::{ProtectedBranch, context_matches};
use crate::conflict::{ConflictCheck, ConflictDetector};
use crate::error::Result;
use crate::pull::{MergeStyle, PullId, PullRequest, PullRequestStatus};
use crate::repo::{RepoId, User};
use crate::services::Services;

/// One reason a pull request can't be merged right now.
///
/// Variants are declared in reporting order: the first blocker found is
/// the one named in [`Verdict::reason`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Blocker {
    /// The issue is closed.
    Closed,
    /// Already merged.
    AlreadyMerged,
    /// The title carries a work-in-progress marker.
    WorkInProgress {
        /// The configured marker that matched.
        marker: String,
    },
    /// No check result yet.
    Checking,
    /// The last check failed.
    CheckFailed {
        /// Failure message.
        message: String,
    },
    /// Head conflicts with base.
    Conflict {
        /// Conflicted paths.
        files: Vec<String>,
    },
    /// Head and base share no history.
    UnrelatedHistories,
    /// Base already contains every head commit.
    NothingToMerge,
    /// Too few approving reviews.
    NotEnoughApprovals {
        /// Approvals so far.
        granted: u32,
        /// Approvals the rule requires.
        required: u32,
    },
    /// An official reviewer requested changes.
    ChangesRequested,
    /// Base has commits head lacks.
    OutdatedBranch,
    /// Head changes paths the rule protects.
    ProtectedFiles {
        /// Protected paths touched.
        files: Vec<String>,
    },
    /// Required status contexts missing or not successful.
    StatusChecksFailing {
        /// Required contexts that don't pass.
        contexts: Vec<String>,
    },
    /// Doer is not on the merge allowlist.
    MergeNotAllowed,
    /// Fast-forward-only merge requested but base has diverged.
    NotFastForwardable,
}

impl Blocker {
    /// Human-readable reason; consumers match on this text.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Closed => "This pull request is closed.".into(),
            Self::AlreadyMerged => "This pull request has already been merged.".into(),
            Self::WorkInProgress { marker } => {
                format!("This pull request is marked as a work in progress (\"{marker}\").")
            }
            Self::Checking => "Mergeability of this pull request is still being checked.".into(),
            Self::CheckFailed { message } => format!("Mergeability check failed: {message}"),
            Self::Conflict { files } => format!(
                "This pull request has changes conflicting with the target branch: {}",
                files.join(", ")
            ),
            Self::UnrelatedHistories => {
                "The head and base branches have unrelated histories.".into()
            }
            Self::NothingToMerge => "This branch is already included in the target branch. \
                                     There is nothing to merge."
                .into(),
            Self::NotEnoughApprovals { granted, required } => format!(
                "This pull request doesn't have enough approvals yet. \
                 {granted} of {required} approvals granted."
            ),
            Self::ChangesRequested => {
                "This pull request has changes requested by an official reviewer.".into()
            }
            Self::OutdatedBranch => "The head branch is behind the base branch.".into(),
            Self::ProtectedFiles { files } => format!(
                "This pull request is blocked because it changes protected files: {}",
                files.join(", ")
            ),
            Self::StatusChecksFailing { contexts } => format!(
                "Required status checks are not passing: {}",
                contexts.join(", ")
            ),
            Self::MergeNotAllowed => {
                "You are not allowed to merge into this protected branch.".into()
            }
            Self::NotFastForwardable => "The head branch is not a descendant of the base \
                                         branch; fast-forward is not possible."
                .into(),
        }
    }
}

/// Whether a pull request can be merged right now, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Every gate passes (or was bypassed).
    pub can_merge_now: bool,
    /// Reason for the first failing gate, or the success text.
    pub reason: String,
    /// Failing gates, in reporting order.
    pub blockers: Vec<Blocker>,
    /// Protection gates that failed but were waived for an administrator.
    pub bypassed: Vec<Blocker>,
}

impl Verdict {
    const MERGEABLE: &'static str = "This pull request can be merged automatically.";

    fn from_blockers(blockers: Vec<Blocker>, bypassed: Vec<Blocker>) -> Self {
        let reason = match (blockers.first(), bypassed.first()) {
            (Some(blocker), _) => blocker.reason(),
            (None, Some(waived)) => {
                format!("{} Administrators may merge anyway.", waived.reason())
            }
            (None, None) => Self::MERGEABLE.into(),
        };
        Self {
            can_merge_now: blockers.is_empty(),
            reason,
            blockers,
            bypassed,
        }
    }
}

/// Runs mergeability checks and computes verdicts.
#[derive(Clone)]
pub struct MergeChecker {
    services: Services,
    cache: Arc<Mutex<HashMap<(Oid, Oid), ConflictCheck>>>,
}

impl MergeChecker {
    /// Checker over the given services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Put an open pull request back into `Checking`.
    ///
    /// Closed and merged pull requests are returned unchanged.
    ///
    /// # Errors
    /// Returns error if the pull request can't be loaded or saved.
    pub fn mark_checking(&self, pull_id: PullId) -> Result<PullRequest> {
        self.services.store.update_pull(pull_id, &mut |pr| {
            if pr.is_open() {
                pr.transition(PullRequestStatus::Checking)?;
            }
            Ok(())
        })
    }

    /// Recompute the git-side mergeability of a pull request.
    ///
    /// Copies the head tip to `refs/pull/<index>/head` in the base
    /// repository, then merges it against the base tip in memory. Failures
    /// of the git plumbing end up in `Error{message}` rather than being
    /// returned.
    ///
    /// # Errors
    /// Returns error if the pull request can't be loaded or saved.
    pub fn check(&self, pull_id: PullId) -> Result<PullRequest> {
        let pr = self.services.store.pull(pull_id)?;
        if !pr.is_open() {
            return Ok(pr);
        }

        match self.compute(&pr) {
            Ok(Computed {
                head,
                base,
                check,
                protected_files,
            }) => {
                let status = check.status();
                tracing::debug!(pull = pr.id, ?status, %head, %base, "pull request checked");
                self.services.store.update_pull(pull_id, &mut |pr| {
                    if !pr.is_open() {
                        return Ok(());
                    }
                    pr.transition(PullRequestStatus::Checking)?;
                    pr.transition(status.clone())?;
                    pr.head_commit_id = Some(head.to_string());
                    pr.base_commit_id = Some(base.to_string());
                    pr.merge_base.clone_from(&check.merge_base);
                    pr.changed_protected_files.clone_from(&protected_files);
                    Ok(())
                })
            }
            Err(e) => {
                tracing::warn!(pull = pr.id, error = %e, "mergeability check failed");
                let message = e.to_string();
                self.services.store.update_pull(pull_id, &mut |pr| {
                    if !pr.is_open() {
                        return Ok(());
                    }
                    pr.transition(PullRequestStatus::Checking)?;
                    pr.transition(PullRequestStatus::Error {
                        message: message.clone(),
                    })
                })
            }
        }
    }

    /// Re-check every open pull request whose head or base is `branch`.
    ///
    /// # Errors
    /// Returns error if the store can't be read or written.
    pub fn branch_moved(&self, repo_id: RepoId, branch: &str) -> Result<Vec<PullRequest>> {
        let store = &self.services.store;
        let mut pulls = store.open_pulls_by_base(repo_id, branch)?;
        for pr in store.open_pulls_by_head(repo_id, branch)? {
            if !pulls.iter().any(|seen| seen.id == pr.id) {
                pulls.push(pr);
            }
        }

        pulls
            .into_iter()
            .map(|pr| {
                self.mark_checking(pr.id)?;
                self.check(pr.id)
            })
            .collect()
    }

    /// Re-check every open pull request based in `repo_id`.
    ///
    /// # Errors
    /// Returns error if the store can't be read or written.
    pub fn protection_changed(&self, repo_id: RepoId) -> Result<Vec<PullRequest>> {
        self.services
            .store
            .pulls(repo_id)?
            .into_iter()
            .filter(PullRequest::is_open)
            .map(|pr| {
                self.mark_checking(pr.id)?;
                self.check(pr.id)
            })
            .collect()
    }

    /// Current tip of the pull request's head branch.
    ///
    /// # Errors
    /// Returns error if the head repository or branch is missing.
    pub fn live_head(&self, pr: &PullRequest) -> Result<Oid> {
        let head_repo = self.services.store.repo(pr.head_repo_id)?;
        let git = self.services.git.open(&head_repo)?;
        branch_tip(git.as_ref(), pr.head_repo_id, &pr.head_branch)
    }

    /// Current tip of the pull request's base branch.
    ///
    /// # Errors
    /// Returns error if the base repository or branch is missing.
    pub fn live_base(&self, pr: &PullRequest) -> Result<Oid> {
        let base_repo = self.services.store.repo(pr.base_repo_id)?;
        let git = self.services.git.open(&base_repo)?;
        branch_tip(git.as_ref(), pr.base_repo_id, &pr.base_branch)
    }

    /// Whether `doer` may merge `pr` with `style` right now.
    ///
    /// Advisory failures (work in progress, missing approvals, failing
    /// statuses) show up as blockers, never as errors.
    ///
    /// # Errors
    /// Returns error if rows, reviews, statuses or the commit graph can't be read.
    pub fn verdict(&self, pr: &PullRequest, doer: &User, style: MergeStyle) -> Result<Verdict> {
        let store = &self.services.store;
        let issue = store.issue(pr.issue_id)?;
        let mut blockers = Vec::new();

        if pr.has_merged() {
            blockers.push(Blocker::AlreadyMerged);
        } else if issue.is_closed || !pr.is_open() {
            blockers.push(Blocker::Closed);
        }
        if !blockers.is_empty() {
            return Ok(Verdict::from_blockers(blockers, Vec::new()));
        }

        if let Some(marker) = self.services.config.work_in_progress_marker(&issue.title) {
            blockers.push(Blocker::WorkInProgress {
                marker: marker.to_string(),
            });
        }

        let commits = match (&pr.status, recorded_commits(pr)) {
            (PullRequestStatus::Checking, _) | (PullRequestStatus::Mergeable, None) => {
                blockers.push(Blocker::Checking);
                None
            }
            (PullRequestStatus::Error { message }, _) => {
                blockers.push(Blocker::CheckFailed {
                    message: message.clone(),
                });
                None
            }
            (PullRequestStatus::Conflict(report), _) => {
                blockers.push(if report.unrelated {
                    Blocker::UnrelatedHistories
                } else {
                    Blocker::Conflict {
                        files: report.files.clone(),
                    }
                });
                None
            }
            (PullRequestStatus::Mergeable, Some(commits)) => Some(commits),
            (PullRequestStatus::Closed | PullRequestStatus::Merged(_), _) => None,
        };

        let mut divergence = None;
        let mut fast_forwardable = true;
        if let Some((head, base)) = commits {
            let base_repo = store.repo(pr.base_repo_id)?;
            let git = self.services.git.open(&base_repo)?;
            let detector = ConflictDetector::new(git.as_ref());
            divergence = Some(detector.divergence(base, head)?);
            if style == MergeStyle::FastForwardOnly {
                fast_forwardable = detector.is_fast_forwardable(base, head)?;
            }
        }

        if divergence.is_some_and(|d| d.ahead == 0) {
            blockers.push(Blocker::NothingToMerge);
        }

        let mut bypassed = Vec::new();
        if let Some(rule) = store.protection_for(pr.base_repo_id, &pr.base_branch)? {
            let gates = self.protection_gates(&rule, pr, doer, divergence.map(|d| d.behind))?;
            if rule.gates_apply_to(doer) {
                blockers.extend(gates);
            } else {
                bypassed = gates;
            }
        }

        if !fast_forwardable {
            blockers.push(Blocker::NotFastForwardable);
        }

        Ok(Verdict::from_blockers(blockers, bypassed))
    }

    fn protection_gates(
        &self,
        rule: &ProtectedBranch,
        pr: &PullRequest,
        doer: &User,
        behind: Option<usize>,
    ) -> Result<Vec<Blocker>> {
        let mut gates = Vec::new();

        let reviews = self.services.reviews.review_summary(pr.id)?;
        if reviews.approvals < rule.required_approvals {
            gates.push(Blocker::NotEnoughApprovals {
                granted: reviews.approvals,
                required: rule.required_approvals,
            });
        }
        if rule.block_on_rejected_reviews && reviews.rejections > 0 {
            gates.push(Blocker::ChangesRequested);
        }
        if rule.block_on_outdated_branch && behind.is_some_and(|behind| behind > 0) {
            gates.push(Blocker::OutdatedBranch);
        }
        let files = rule.protected_files(pr.changed_protected_files.iter().map(String::as_str));
        if !files.is_empty() {
            gates.push(Blocker::ProtectedFiles { files });
        }

        if rule.enable_status_check && !rule.status_check_contexts.is_empty() {
            let failing = self.failing_contexts(rule, pr)?;
            if !failing.is_empty() {
                gates.push(Blocker::StatusChecksFailing { contexts: failing });
            }
        }

        if !rule.can_merge(doer.id) {
            gates.push(Blocker::MergeNotAllowed);
        }

        Ok(gates)
    }

    fn failing_contexts(&self, rule: &ProtectedBranch, pr: &PullRequest) -> Result<Vec<String>> {
        let Some(head) = pr.head_commit_id.as_deref() else {
            return Ok(rule.status_check_contexts.clone());
        };
        let statuses = self.services.statuses.statuses(pr.base_repo_id, head)?;

        Ok(rule
            .status_check_contexts
            .iter()
            .filter(|required| {
                let mut matching = statuses
                    .iter()
                    .filter(|status| context_matches(required, &status.context))
                    .peekable();
                matching.peek().is_none() || matching.any(|status| !status.state.is_success())
            })
            .cloned()
            .collect())
    }

    fn compute(&self, pr: &PullRequest) -> Result<Computed> {
        let store = &self.services.store;
        let base_repo = store.repo(pr.base_repo_id)?;
        let git = self.services.git.open(&base_repo)?;

        let head = if pr.is_same_repo() {
            let tip = branch_tip(git.as_ref(), pr.head_repo_id, &pr.head_branch)?;
            git.force_ref(&pr.head_ref(), tip, "sluice: update pull request head")?;
            tip
        } else {
            let head_repo = store.repo(pr.head_repo_id)?;
            git.fetch_ref(
                &head_repo.path,
                &sluice_git::branch_ref(&pr.head_branch),
                &pr.head_ref(),
            )?
        };
        let base = branch_tip(git.as_ref(), pr.base_repo_id, &pr.base_branch)?;

        let check = match self.cached(head, base) {
            Some(cached) => cached,
            None => {
                let check = ConflictDetector::new(git.as_ref()).check_conflicts(base, head)?;
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert((head, base), check.clone());
                }
                check
            }
        };

        let protected_files = match (
            store.protection_for(pr.base_repo_id, &pr.base_branch)?,
            check.merge_base.as_deref(),
        ) {
            (Some(rule), Some(merge_base)) if !rule.protected_file_patterns.is_empty() => {
                let merge_base = sluice_git::parse_oid(merge_base)?;
                let changed = git.changed_files(merge_base, head)?;
                rule.protected_files(changed.iter().map(String::as_str))
            }
            _ => Vec::new(),
        };

        Ok(Computed {
            head,
            base,
            check,
            protected_files,
        })
    }

    fn cached(&self, head: Oid, base: Oid) -> Option<ConflictCheck> {
        self.cache.lock().ok()?.get(&(head, base)).cloned()
    }
}

struct Computed {
    head: Oid,
    base: Oid,
    check: ConflictCheck,
    protected_files: Vec<String>,
}

impl std::fmt::Debug for MergeChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeChecker").finish_non_exhaustive()
    }
}

pub(crate) fn branch_tip(git: &dyn GitOps, repo_id: RepoId, branch: &str) -> Result<Oid> {
    git.branch_commit(branch)
        .map_err(|_| crate::Error::BranchNotFound {
            repo_id,
            branch: branch.to_string(),
        })
}

fn recorded_commits(pr: &PullRequest) -> Option<(Oid, Oid)> {
    let head = sluice_git::parse_oid(pr.head_commit_id.as_deref()?).ok()?;
    let base = sluice_git::parse_oid(pr.base_commit_id.as_deref()?).ok()?;
    Some((head, base))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::providers::{CheckState, ReviewKind};
    use crate::pull::StatusKind;
    use crate::testing::Fixture;

    #[test]
    fn test_clean_pull_is_mergeable() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        assert_eq!(pr.status.kind(), StatusKind::Mergeable);
        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(verdict.can_merge_now);
        assert_eq!(verdict.reason, "This pull request can be merged automatically.");
        assert!(verdict.blockers.is_empty());
    }

    #[test]
    fn test_conflict_reason_lists_files() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "README.md", "head\n");
        fx.commit(&fx.repo, "main", Some(root), "README.md", "base\n");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Edit readme");

        assert_eq!(pr.conflicted_files(), ["README.md"]);
        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(!verdict.can_merge_now);
        assert_eq!(
            verdict.reason,
            "This pull request has changes conflicting with the target branch: README.md"
        );
    }

    #[test]
    fn test_unrelated_histories_blocker() {
        let fx = Fixture::new();
        fx.commit(&fx.repo, "orphan", None, "other.txt", "x");
        let pr = fx.open_pull(&fx.repo, "orphan", "main", "Unrelated");

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(verdict.blockers, vec![Blocker::UnrelatedHistories]);
        assert_eq!(
            verdict.reason,
            "The head and base branches have unrelated histories."
        );
    }

    #[test]
    fn test_wip_blocks_regardless_of_other_gates() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "README.md", "head\n");
        fx.commit(&fx.repo, "main", Some(root), "README.md", "base\n");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "[wip] edit readme");
        fx.review(&pr, &fx.admin, ReviewKind::Approve);

        let verdict = fx.checker().verdict(&pr, &fx.admin, MergeStyle::Merge).unwrap();
        assert!(!verdict.can_merge_now);
        assert!(verdict.reason.contains("work in progress"));
        assert_eq!(
            verdict.reason,
            "This pull request is marked as a work in progress (\"[WIP]\")."
        );
        assert_eq!(verdict.blockers.len(), 2);
    }

    #[test]
    fn test_admin_approvals_follow_apply_to_admins() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        fx.protect(&fx.repo, "main", |rule| {
            rule.required_approvals = 1;
            rule.apply_to_admins = true;
        });
        let verdict = fx.checker().verdict(&pr, &fx.admin, MergeStyle::Merge).unwrap();
        assert!(!verdict.can_merge_now);
        assert_eq!(
            verdict.reason,
            "This pull request doesn't have enough approvals yet. 0 of 1 approvals granted."
        );

        fx.protect(&fx.repo, "main", |rule| {
            rule.required_approvals = 1;
            rule.apply_to_admins = false;
        });
        let verdict = fx.checker().verdict(&pr, &fx.admin, MergeStyle::Merge).unwrap();
        assert!(verdict.can_merge_now);
        assert_eq!(
            verdict.reason,
            "This pull request doesn't have enough approvals yet. 0 of 1 approvals granted. \
             Administrators may merge anyway."
        );
        assert_eq!(verdict.bypassed.len(), 1);

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(!verdict.can_merge_now);

        fx.review(&pr, &fx.admin, ReviewKind::Approve);
        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(verdict.can_merge_now);
    }

    #[test]
    fn test_rejected_review_and_allowlist() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");
        let admin_id = fx.admin.id;

        fx.protect(&fx.repo, "main", |rule| {
            rule.block_on_rejected_reviews = true;
            rule.enable_merge_allowlist = true;
            rule.merge_allowlist_user_ids = vec![admin_id];
        });
        fx.review(&pr, &fx.admin, ReviewKind::Reject);

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(
            verdict.blockers,
            vec![Blocker::ChangesRequested, Blocker::MergeNotAllowed]
        );
        assert_eq!(
            verdict.reason,
            "This pull request has changes requested by an official reviewer."
        );
    }

    #[test]
    fn test_outdated_branch_gate() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        fx.commit(&fx.repo, "main", Some(root), "b.txt", "b");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        fx.protect(&fx.repo, "main", |rule| rule.block_on_outdated_branch = true);
        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(verdict.blockers, vec![Blocker::OutdatedBranch]);
        assert_eq!(verdict.reason, "The head branch is behind the base branch.");
    }

    #[test]
    fn test_protected_files_gate() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        let docs = fx.commit(&fx.repo, "feature", Some(root), "docs.md", "docs");
        fx.commit(&fx.repo, "feature", Some(docs), "Cargo.lock", "lock");
        fx.protect(&fx.repo, "main", |rule| {
            rule.enable_push = true;
            rule.protected_file_patterns = vec!["*.lock".into()];
        });
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Bump deps");
        assert_eq!(pr.changed_protected_files, ["Cargo.lock"]);

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(
            verdict.blockers,
            vec![Blocker::ProtectedFiles {
                files: vec!["Cargo.lock".into()]
            }]
        );
        assert_eq!(
            verdict.reason,
            "This pull request is blocked because it changes protected files: Cargo.lock"
        );
        let verdict = fx.checker().verdict(&pr, &fx.admin, MergeStyle::Merge).unwrap();
        assert!(verdict.can_merge_now);

        fx.protect(&fx.repo, "main", |rule| rule.enable_push = true);
        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(verdict.can_merge_now);
        let pr = fx.checker().check(pr.id).unwrap();
        assert!(pr.changed_protected_files.is_empty());
    }

    #[test]
    fn test_status_checks_gate() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        let head = fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        fx.protect(&fx.repo, "main", |rule| {
            rule.enable_status_check = true;
            rule.status_check_contexts = vec!["ci/*".into(), "lint".into()];
        });
        fx.status(&fx.repo, head, "ci/build", CheckState::Success);

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(
            verdict.reason,
            "Required status checks are not passing: lint"
        );

        fx.status(&fx.repo, head, "lint", CheckState::Failure);
        fx.status(&fx.repo, head, "lint", CheckState::Success);
        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(verdict.can_merge_now);
    }

    #[test]
    fn test_fast_forward_only_gate() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        let checker = fx.checker();
        assert!(checker
            .verdict(&pr, &fx.user, MergeStyle::FastForwardOnly)
            .unwrap()
            .can_merge_now);

        fx.commit(&fx.repo, "main", Some(root), "b.txt", "b");
        let pr = checker.check(pr.id).unwrap();
        let verdict = checker
            .verdict(&pr, &fx.user, MergeStyle::FastForwardOnly)
            .unwrap();
        assert_eq!(verdict.blockers, vec![Blocker::NotFastForwardable]);
        assert!(checker.verdict(&pr, &fx.user, MergeStyle::Merge).unwrap().can_merge_now);
    }

    #[test]
    fn test_nothing_to_merge() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "stale", Some(root), "a.txt", "a");
        let tip = fx.tip(&fx.repo, "stale");
        fx.commit(&fx.repo, "main", Some(tip), "b.txt", "b");
        let pr = fx.open_pull(&fx.repo, "stale", "main", "Already in");

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(verdict.blockers, vec![Blocker::NothingToMerge]);
    }

    #[test]
    fn test_check_records_error_for_missing_branch() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        fx.git(&fx.repo).delete_branch("feature", None).unwrap();
        let pr = fx.checker().check(pr.id).unwrap();
        assert_eq!(pr.status.kind(), StatusKind::Error);

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert!(verdict.reason.starts_with("Mergeability check failed: "));
    }

    #[test]
    fn test_branch_moved_rechecks_dependents() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "README.md", "head\n");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Edit readme");
        assert_eq!(pr.status.kind(), StatusKind::Mergeable);

        fx.commit(&fx.repo, "main", Some(root), "README.md", "base\n");
        let checked = fx.checker().branch_moved(fx.repo.id, "main").unwrap();
        assert_eq!(checked.len(), 1);
        assert_eq!(checked[0].status.kind(), StatusKind::Conflict);
    }

    #[test]
    fn test_closed_pull_reason() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");
        let pr = fx.lifecycle().close(pr.id, &fx.user).unwrap();

        let verdict = fx.checker().verdict(&pr, &fx.user, MergeStyle::Merge).unwrap();
        assert_eq!(verdict.blockers, vec![Blocker::Closed]);
        assert_eq!(verdict.reason, "This pull request is closed.");
    }
}
