//! Merging pull requests once their gates pass.
//!
//! A scheduled merge is retried whenever something that feeds the verdict
//! changes: a commit status, a review, or an explicit re-check. A gate an
//! administrator could waive is never waived here; the merge waits.

use chrono::Utc;
use serde::Serialize;

use crate::checker::MergeChecker;
use crate::error::{Error, Result};
use crate::merge::{MergeExecutor, MergeOutcome};
use crate::pull::{AutoMerge, MergeStyle, PullId};
use crate::repo::{RepoId, User};
use crate::services::Services;

/// Result of asking for a merge once checks succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// Gates are still failing; the merge waits for them.
    Scheduled {
        /// Reason the merge can't happen yet.
        waiting_on: String,
    },
    /// Every gate already passed, so the merge ran straight away.
    Merged(MergeOutcome),
}

/// Schedules, cancels and runs auto-merges.
#[derive(Debug, Clone)]
pub struct AutoMerger {
    services: Services,
    checker: MergeChecker,
    executor: MergeExecutor,
}

impl AutoMerger {
    /// Auto-merger over the given services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let checker = MergeChecker::new(services.clone());
        let executor = MergeExecutor::new(services.clone());
        Self {
            services,
            checker,
            executor,
        }
    }

    /// Merge `pull_id` as `doer` as soon as every gate passes.
    ///
    /// # Errors
    /// Returns [`Error::NotMergeable`] for a closed or merged pull request
    /// and [`Error::AlreadyExists`] if a merge is already scheduled.
    pub fn schedule(
        &self,
        pull_id: PullId,
        doer: &User,
        style: MergeStyle,
        message: Option<&str>,
        delete_head_branch: bool,
    ) -> Result<ScheduleOutcome> {
        let store = &self.services.store;
        let pr = store.pull(pull_id)?;
        if !pr.is_open() {
            let verdict = self.checker.verdict(&pr, doer, style)?;
            return Err(Error::NotMergeable {
                reason: verdict.reason,
            });
        }

        store.schedule_auto_merge(&AutoMerge {
            pull_id,
            doer_id: doer.id,
            style,
            message: message.map(String::from),
            delete_head_branch,
            created_at: Utc::now(),
        })?;
        tracing::info!(pull = pull_id, doer = %doer.name, %style, "auto-merge scheduled");

        if let Some(outcome) = self.try_merge(pull_id)? {
            return Ok(ScheduleOutcome::Merged(outcome));
        }
        let pr = store.pull(pull_id)?;
        let verdict = self.checker.verdict(&pr, doer, style)?;
        Ok(ScheduleOutcome::Scheduled {
            waiting_on: verdict.reason,
        })
    }

    /// Drop a scheduled merge.
    ///
    /// Only the user who scheduled it or an administrator may cancel.
    ///
    /// # Errors
    /// Returns [`Error::AutoMergeNotScheduled`] if nothing is scheduled and
    /// [`Error::NotAllowed`] for anybody else.
    pub fn cancel(&self, pull_id: PullId, doer: &User) -> Result<AutoMerge> {
        let store = &self.services.store;
        let scheduled = store
            .auto_merge(pull_id)?
            .ok_or_else(|| Error::AutoMergeNotScheduled(pull_id.to_string()))?;
        if scheduled.doer_id != doer.id && !doer.is_admin {
            return Err(Error::NotAllowed(
                "only the user who scheduled the auto-merge can cancel it".into(),
            ));
        }

        store.remove_auto_merge(pull_id)?;
        tracing::info!(pull = pull_id, doer = %doer.name, "auto-merge cancelled");
        Ok(scheduled)
    }

    /// Run the scheduled merge of `pull_id` if its gates pass now.
    ///
    /// Returns `None` when nothing is scheduled or the merge still has to
    /// wait. A refused merge stays scheduled.
    ///
    /// # Errors
    /// Returns error only for store or git failures.
    pub fn try_merge(&self, pull_id: PullId) -> Result<Option<MergeOutcome>> {
        let store = &self.services.store;
        let Some(scheduled) = store.auto_merge(pull_id)? else {
            return Ok(None);
        };
        let pr = store.pull(pull_id)?;
        if !pr.is_open() {
            store.remove_auto_merge(pull_id)?;
            tracing::debug!(pull = pull_id, "dropping auto-merge of finished pull request");
            return Ok(None);
        }

        let doer = store.user(scheduled.doer_id)?;
        let pr = self.checker.check(pull_id)?;
        let verdict = self.checker.verdict(&pr, &doer, scheduled.style)?;
        if !verdict.can_merge_now || !verdict.bypassed.is_empty() {
            tracing::debug!(pull = pull_id, reason = %verdict.reason, "auto-merge waiting");
            return Ok(None);
        }
        let Some(head) = pr.head_commit_id.as_deref() else {
            return Ok(None);
        };

        match self.executor.merge(
            pull_id,
            &doer,
            scheduled.style,
            head,
            scheduled.message.as_deref(),
            scheduled.delete_head_branch,
        ) {
            Ok(outcome) => {
                tracing::info!(pull = pull_id, commit = %outcome.merge_commit, "auto-merge completed");
                Ok(Some(outcome))
            }
            Err(e) if e.is_plumbing() => Err(e),
            Err(e) => {
                tracing::warn!(pull = pull_id, error = %e, "auto-merge attempt refused");
                Ok(None)
            }
        }
    }

    /// A commit status changed; retry scheduled merges whose head is `commit_id`.
    ///
    /// A failing pull request is logged and skipped.
    ///
    /// # Errors
    /// Returns error if the pull requests can't be listed.
    pub fn status_changed(&self, repo_id: RepoId, commit_id: &str) -> Result<Vec<MergeOutcome>> {
        let store = &self.services.store;
        let mut merged = Vec::new();
        for pr in store.pulls(repo_id)? {
            if !pr.is_open() || pr.head_commit_id.as_deref() != Some(commit_id) {
                continue;
            }
            match self.try_merge(pr.id) {
                Ok(Some(outcome)) => merged.push(outcome),
                Ok(None) => {}
                Err(e) => tracing::warn!(pull = pr.id, error = %e, "auto-merge attempt failed"),
            }
        }
        Ok(merged)
    }

    /// A review was submitted; retry the pull request's scheduled merge.
    ///
    /// # Errors
    /// Returns error only for store or git failures.
    pub fn review_submitted(&self, pull_id: PullId) -> Result<Option<MergeOutcome>> {
        self.try_merge(pull_id)
    }
}
