//! Opening and closing pull requests.

use chrono::Utc;

use crate::checker::MergeChecker;
use crate::error::{Error, Result};
use crate::pull::{Issue, PullId, PullRequest, PullRequestStatus};
use crate::repo::{RepoId, User, UserId};
use crate::services::Services;

/// Request to open a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPull {
    /// Repository receiving the changes.
    pub base_repo_id: RepoId,
    /// Repository holding the changes; the base repository or a fork.
    pub head_repo_id: RepoId,
    /// Target branch.
    pub base_branch: String,
    /// Source branch.
    pub head_branch: String,
    /// Issue title.
    pub title: String,
    /// Author.
    pub poster_id: UserId,
}

/// Creates and closes pull requests.
#[derive(Debug, Clone)]
pub struct PullLifecycle {
    services: Services,
    checker: MergeChecker,
}

impl PullLifecycle {
    /// Lifecycle over the given services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let checker = MergeChecker::new(services.clone());
        Self { services, checker }
    }

    /// Open a pull request and run its first check.
    ///
    /// # Errors
    /// Returns error if either branch is missing, the repositories aren't
    /// forks of each other, head and base are the same branch, or an open
    /// pull request for the same pair already exists.
    pub fn open(&self, request: OpenPull) -> Result<PullRequest> {
        let store = &self.services.store;
        let base_repo = store.repo(request.base_repo_id)?;
        let head_repo = store.repo(request.head_repo_id)?;
        let poster = store.user(request.poster_id)?;

        if !head_repo.shares_network_with(&base_repo) {
            return Err(Error::UnrelatedRepositories {
                head: head_repo.id,
                base: base_repo.id,
            });
        }
        if head_repo.id == base_repo.id && request.head_branch == request.base_branch {
            return Err(Error::SameBranch(request.head_branch));
        }

        for (repo, branch) in [
            (&base_repo, &request.base_branch),
            (&head_repo, &request.head_branch),
        ] {
            if !self.services.git.open(repo)?.branch_exists(branch) {
                return Err(Error::BranchNotFound {
                    repo_id: repo.id,
                    branch: branch.clone(),
                });
            }
        }

        let duplicate = store
            .open_pulls_by_head(head_repo.id, &request.head_branch)?
            .into_iter()
            .find(|pr| pr.base_repo_id == base_repo.id && pr.base_branch == request.base_branch);
        if let Some(existing) = duplicate {
            return Err(Error::AlreadyExists(format!(
                "pull request #{} from {} into {}",
                existing.index, request.head_branch, request.base_branch
            )));
        }

        let issue = Issue {
            id: 0,
            repo_id: base_repo.id,
            index: 0,
            title: request.title,
            poster_id: poster.id,
            is_pull: true,
            is_closed: false,
        };
        let pull = PullRequest {
            id: 0,
            issue_id: 0,
            index: 0,
            head_repo_id: head_repo.id,
            base_repo_id: base_repo.id,
            head_branch: request.head_branch,
            base_branch: request.base_branch,
            status: PullRequestStatus::Checking,
            head_commit_id: None,
            base_commit_id: None,
            merge_base: None,
            changed_protected_files: Vec::new(),
            created_at: Utc::now(),
        };

        let pr = store.create_pull(issue, pull)?;
        tracing::info!(
            repo = %base_repo.full_name(),
            index = pr.index,
            head = %pr.head_branch,
            base = %pr.base_branch,
            "pull request opened"
        );

        let pr = self.checker.check(pr.id)?;
        self.services.notifier.pull_opened(&pr, &poster);
        Ok(pr)
    }

    /// Close a pull request without merging.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] if it is already closed or merged.
    pub fn close(&self, pull_id: PullId, doer: &User) -> Result<PullRequest> {
        close_pull(&self.services, pull_id, doer)
    }
}

/// Close a pull request and its issue, then notify.
pub(crate) fn close_pull(services: &Services, pull_id: PullId, doer: &User) -> Result<PullRequest> {
    let store = &services.store;
    let pr = store.update_pull(pull_id, &mut |pr| pr.transition(PullRequestStatus::Closed))?;

    let mut issue = store.issue(pr.issue_id)?;
    issue.is_closed = true;
    store.save_issue(&issue)?;
    if store.remove_auto_merge(pr.id)? {
        tracing::debug!(pull = pr.id, "scheduled auto-merge dropped");
    }

    tracing::info!(pull = pr.id, index = pr.index, "pull request closed");
    services.notifier.pull_closed(&pr, doer);
    Ok(pr)
}
