//! Event sink for the CLI: pull request and branch events go to the log.

use sluice_core::{Notifier, PullRequest, Repo, User};

/// Logs every event at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn branch_deleted(&self, repo: &Repo, branch: &str, doer: &User) {
        tracing::info!(event = "branch_deleted", repo = %repo.full_name(), branch, doer = %doer.name);
    }

    fn pull_opened(&self, pr: &PullRequest, doer: &User) {
        log_pull("pull_opened", pr, doer);
    }

    fn pull_synchronized(&self, pr: &PullRequest, pusher: &User) {
        log_pull("pull_synchronized", pr, pusher);
    }

    fn pull_merged(&self, pr: &PullRequest, doer: &User) {
        log_pull("pull_merged", pr, doer);
    }

    fn pull_retargeted(&self, pr: &PullRequest, old_base: &str, doer: &User) {
        tracing::info!(
            event = "pull_retargeted",
            index = pr.index,
            from = old_base,
            to = %pr.base_branch,
            doer = %doer.name
        );
    }

    fn pull_closed(&self, pr: &PullRequest, doer: &User) {
        log_pull("pull_closed", pr, doer);
    }
}

fn log_pull(event: &str, pr: &PullRequest, doer: &User) {
    tracing::info!(
        event,
        index = pr.index,
        head = %pr.head_branch,
        base = %pr.base_branch,
        sha = pr.head_commit_id.as_deref().unwrap_or_default(),
        doer = %doer.name
    );
}
