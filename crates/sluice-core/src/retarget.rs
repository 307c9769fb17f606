//! What happens to dependent pull requests when a branch goes away.
//!
//! Pull requests based on the deleted branch move to the repository's
//! default branch, or are closed when retargeting is switched off. Only
//! the repository that lost the branch is touched: pull requests in other
//! forks keep pointing at the missing branch.

use crate::checker::MergeChecker;
use crate::error::Result;
use crate::lifecycle::close_pull;
use crate::pull::{PullId, PullRequestStatus};
use crate::repo::{Repo, User};
use crate::services::Services;

/// Pull requests changed by a branch deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetargetOutcome {
    /// Moved to the default branch.
    pub retargeted: Vec<PullId>,
    /// Closed because their head branch, or their base with retargeting
    /// off, is gone.
    pub closed: Vec<PullId>,
}

/// Adjusts pull requests after a branch deletion.
#[derive(Debug, Clone)]
pub struct PullRetargeter {
    services: Services,
    checker: MergeChecker,
}

impl PullRetargeter {
    /// Retargeter over the given services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let checker = MergeChecker::new(services.clone());
        Self::with_checker(services, checker)
    }

    pub(crate) const fn with_checker(services: Services, checker: MergeChecker) -> Self {
        Self { services, checker }
    }

    /// React to `branch` being deleted from `repo`.
    ///
    /// # Errors
    /// Returns error if the store can't be read or written.
    pub fn branch_deleted(&self, repo: &Repo, branch: &str, doer: &User) -> Result<RetargetOutcome> {
        let store = &self.services.store;
        let mut outcome = RetargetOutcome::default();

        for pr in store.open_pulls_by_head(repo.id, branch)? {
            close_pull(&self.services, pr.id, doer)?;
            outcome.closed.push(pr.id);
        }

        if !self.services.config.pull_request.retarget_children_on_merge {
            for pr in store.open_pulls_by_base(repo.id, branch)? {
                close_pull(&self.services, pr.id, doer)?;
                tracing::info!(
                    repo = %repo.full_name(),
                    index = pr.index,
                    base = branch,
                    "pull request closed, base branch deleted"
                );
                outcome.closed.push(pr.id);
            }
            return Ok(outcome);
        }
        if branch == repo.default_branch {
            tracing::warn!(repo = %repo.full_name(), branch, "default branch deleted, nothing to retarget onto");
            return Ok(outcome);
        }

        for pr in store.open_pulls_by_base(repo.id, branch)? {
            let retargeted = store.update_pull(pr.id, &mut |pr| {
                pr.base_branch.clone_from(&repo.default_branch);
                pr.transition(PullRequestStatus::Checking)
            })?;
            tracing::info!(
                repo = %repo.full_name(),
                index = retargeted.index,
                from = branch,
                to = %repo.default_branch,
                "pull request retargeted"
            );
            self.services.notifier.pull_retargeted(&retargeted, branch, doer);
            self.checker.check(retargeted.id)?;
            outcome.retargeted.push(retargeted.id);
        }

        Ok(outcome)
    }
}
