//! Merging pull requests.
//!
//! Every style builds the new base tip in memory, then moves the base
//! branch with a compare-and-swap. A push that lands on the base in the
//! meantime makes the merge fail with [`Error::StaleBase`] and leaves the
//! branch alone.

use chrono::Utc;
use serde::Serialize;
use sluice_git::{GitOps, Identity, MergeTree, NewCommit, Oid};

use crate::branch::Branch;
use crate::checker::{Blocker, MergeChecker, Verdict};
use crate::error::{Error, Result};
use crate::pull::{MergeRecord, MergeStyle, PullId, PullRequest, PullRequestStatus, StatusKind};
use crate::repo::{Repo, User};
use crate::retarget::PullRetargeter;
use crate::services::Services;

/// What a successful merge did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// The merged pull request.
    pub pull_id: PullId,
    /// New tip of the base branch.
    pub merge_commit: String,
    /// Pull requests moved off the deleted head branch.
    pub retargeted: Vec<PullId>,
    /// Whether the head branch was removed.
    pub head_branch_deleted: bool,
}

/// Merges pull requests with one of the [`MergeStyle`]s.
#[derive(Debug, Clone)]
pub struct MergeExecutor {
    services: Services,
    checker: MergeChecker,
    retargeter: PullRetargeter,
}

impl MergeExecutor {
    /// Executor over the given services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let checker = MergeChecker::new(services.clone());
        let retargeter = PullRetargeter::with_checker(services.clone(), checker.clone());
        Self {
            services,
            checker,
            retargeter,
        }
    }

    /// Merge a pull request into its base branch.
    ///
    /// `head_commit_id` is the head the caller looked at; if the branch
    /// has moved since, nothing is merged. `message` overrides the default
    /// commit message for the styles that write one.
    ///
    /// # Errors
    /// Returns [`Error::StaleHead`] or [`Error::StaleBase`] when a branch
    /// moved, one of the merge failures when git refuses, and
    /// [`Error::NotMergeable`] when the verdict blocks the doer.
    pub fn merge(
        &self,
        pull_id: PullId,
        doer: &User,
        style: MergeStyle,
        head_commit_id: &str,
        message: Option<&str>,
        delete_head_branch: bool,
    ) -> Result<MergeOutcome> {
        let store = &self.services.store;
        let mut pr = store.pull(pull_id)?;

        if pr.is_open() {
            let live_head = self.checker.live_head(&pr)?.to_string();
            let live_base = self.checker.live_base(&pr)?.to_string();
            if pr.head_commit_id.as_deref() != Some(live_head.as_str())
                || pr.base_commit_id.as_deref() != Some(live_base.as_str())
            {
                tracing::debug!(pull = pr.id, "recorded commits are stale, re-checking");
                pr = self.checker.check(pr.id)?;
            }
            ensure_head(&pr, head_commit_id)?;
        }

        let verdict = self.checker.verdict(&pr, doer, style)?;
        if !verdict.can_merge_now {
            return Err(refusal(&verdict, style));
        }
        let (head, base) = recorded_commits(&pr)?;

        let base_repo = store.repo(pr.base_repo_id)?;
        let git = self.services.git.open(&base_repo)?;
        let issue = store.issue(pr.issue_id)?;
        let head_label = if pr.is_same_repo() {
            pr.head_branch.clone()
        } else {
            let head_repo = store.repo(pr.head_repo_id)?;
            format!("{}:{}", head_repo.full_name(), pr.head_branch)
        };
        let default_message = self.services.config.merge_message(
            &issue.title,
            pr.index,
            &head_label,
            &pr.base_branch,
        );

        let ctx = StyleContext {
            git: git.as_ref(),
            doer: doer.identity(),
            base,
            head,
        };
        let new_tip = match style {
            MergeStyle::Merge => {
                ctx.merge_commit(head, message.map_or(default_message, String::from))?
            }
            MergeStyle::Squash => {
                let default_squash = squash_message(&ctx, &issue.title, pr.index)?;
                ctx.squash(message.map_or(default_squash, String::from))?
            }
            MergeStyle::Rebase => ctx.rebase()?,
            MergeStyle::RebaseMerge => {
                let rebased = ctx.rebase()?;
                ctx.merge_commit(rebased, message.map_or(default_message, String::from))?
            }
            MergeStyle::FastForwardOnly => ctx.fast_forward()?,
        };

        let current = store.pull(pr.id)?;
        if !current.status.kind().can_transition_to(StatusKind::Merged) {
            return Err(Error::InvalidTransition {
                from: current.status.kind(),
                to: StatusKind::Merged,
            });
        }
        ensure_head(&current, head_commit_id)?;

        let base_ref = sluice_git::branch_ref(&pr.base_branch);
        git.update_ref(
            &base_ref,
            new_tip,
            Some(base),
            &format!("sluice: merge pull request #{}", pr.index),
        )
        .map_err(|e| {
            if e.is_ref_changed() {
                Error::StaleBase(pr.base_branch.clone())
            } else {
                Error::Git(e)
            }
        })?;

        let record = MergeRecord {
            commit_id: new_tip.to_string(),
            merged_by: doer.id,
            merged_at: Utc::now(),
            style,
        };
        let merged = self.finish_merge(&base_repo, git.as_ref(), &pr, new_tip, &record, doer);
        tracing::info!(
            repo = %base_repo.full_name(),
            index = merged.index,
            %style,
            commit = %new_tip,
            "pull request merged"
        );

        let mut outcome = MergeOutcome {
            pull_id: merged.id,
            merge_commit: new_tip.to_string(),
            retargeted: Vec::new(),
            head_branch_deleted: false,
        };
        if delete_head_branch && merged.is_same_repo() {
            if let Some(retargeted) = self.delete_head(&base_repo, &merged, head, doer)? {
                outcome.head_branch_deleted = true;
                outcome.retargeted = retargeted;
            }
        }
        Ok(outcome)
    }

    /// Record a merge whose commit is already on the base branch.
    ///
    /// The base ref can't be taken back, so every step runs even when an
    /// earlier one fails; failures are logged. A pull request that was
    /// closed in the meantime is still recorded as merged.
    fn finish_merge(
        &self,
        repo: &Repo,
        git: &dyn GitOps,
        pr: &PullRequest,
        new_tip: Oid,
        record: &MergeRecord,
        doer: &User,
    ) -> PullRequest {
        let store = &self.services.store;

        let merged = store.update_pull(pr.id, &mut |row| {
            let from = row.status.kind();
            if row.transition(PullRequestStatus::Merged(record.clone())).is_err() {
                tracing::warn!(
                    pull = row.id,
                    %from,
                    "pull request changed state while merging, recording the merge anyway"
                );
                row.status = PullRequestStatus::Merged(record.clone());
            }
            Ok(())
        });
        let merged = merged.unwrap_or_else(|e| {
            tracing::warn!(pull = pr.id, error = %e, "could not record merge");
            let mut row = pr.clone();
            row.status = PullRequestStatus::Merged(record.clone());
            row
        });

        let closed = store.issue(merged.issue_id).and_then(|mut issue| {
            issue.is_closed = true;
            store.save_issue(&issue)
        });
        if let Err(e) = closed {
            tracing::warn!(pull = merged.id, error = %e, "could not close issue after merge");
        }

        let indexed = git.commit_info(new_tip).map_err(Error::from).and_then(|tip| {
            store.upsert_branch(&Branch::from_commit(
                repo.id,
                &merged.base_branch,
                &tip,
                doer.id,
            ))
        });
        if let Err(e) = indexed {
            tracing::warn!(branch = %merged.base_branch, error = %e, "could not index base after merge");
        }

        if let Err(e) = store.remove_auto_merge(merged.id) {
            tracing::warn!(pull = merged.id, error = %e, "could not drop scheduled auto-merge");
        }
        if let Err(e) = self.checker.branch_moved(repo.id, &merged.base_branch) {
            tracing::warn!(branch = %merged.base_branch, error = %e, "could not re-check dependents");
        }
        self.services.notifier.pull_merged(&merged, doer);
        merged
    }

    /// Remove a same-repo head branch after merge and retarget its dependents.
    ///
    /// Returns `None` when the branch was kept.
    fn delete_head(
        &self,
        repo: &Repo,
        pr: &PullRequest,
        head: Oid,
        doer: &User,
    ) -> Result<Option<Vec<PullId>>> {
        if pr.head_branch == repo.default_branch {
            tracing::debug!(branch = %pr.head_branch, "keeping default branch after merge");
            return Ok(None);
        }

        let git = self.services.git.open(repo)?;
        if let Err(e) = git.delete_branch(&pr.head_branch, Some(head)) {
            tracing::warn!(
                repo = %repo.full_name(),
                branch = %pr.head_branch,
                error = %e,
                "could not delete head branch after merge"
            );
            return Ok(None);
        }

        self.services
            .store
            .mark_branch_deleted(
                repo.id,
                &pr.head_branch,
                Some(head.to_string().as_str()),
                doer.id,
            )?;
        self.services
            .notifier
            .branch_deleted(repo, &pr.head_branch, doer);
        let outcome = self
            .retargeter
            .branch_deleted(repo, &pr.head_branch, doer)?;
        Ok(Some(outcome.retargeted))
    }
}

/// Error for a merge the verdict refuses.
///
/// Any divergence refuses a fast-forward-only merge as such, conflicts
/// and unrelated histories included.
fn refusal(verdict: &Verdict, style: MergeStyle) -> Error {
    match verdict.blockers.first() {
        Some(Blocker::Conflict { .. } | Blocker::UnrelatedHistories | Blocker::NotFastForwardable)
            if style == MergeStyle::FastForwardOnly =>
        {
            Error::MergeDivergingFastForwardOnly
        }
        Some(Blocker::Conflict { files }) => Error::MergeConflicts {
            files: files.clone(),
        },
        Some(Blocker::UnrelatedHistories) => Error::MergeUnrelatedHistories,
        Some(Blocker::NotFastForwardable) => Error::MergeDivergingFastForwardOnly,
        _ => Error::NotMergeable {
            reason: verdict.reason.clone(),
        },
    }
}

/// The recorded head must be the one the caller asked to merge.
fn ensure_head(pr: &PullRequest, expected: &str) -> Result<()> {
    match pr.head_commit_id.as_deref() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(Error::StaleHead {
            expected: expected.to_string(),
            actual: actual.unwrap_or_default().to_string(),
        }),
    }
}

fn recorded_commits(pr: &PullRequest) -> Result<(Oid, Oid)> {
    let parse = |id: Option<&str>| -> Result<Oid> {
        let id = id.ok_or_else(|| Error::NotMergeable {
            reason: "Mergeability of this pull request is still being checked.".into(),
        })?;
        Ok(sluice_git::parse_oid(id)?)
    };
    Ok((
        parse(pr.head_commit_id.as_deref())?,
        parse(pr.base_commit_id.as_deref())?,
    ))
}

/// `<title> (#<index>)` followed by the squashed commit summaries.
fn squash_message(ctx: &StyleContext<'_>, title: &str, index: u64) -> Result<String> {
    let mut message = format!("{title} (#{index})\n");
    let commits = ctx.git.commits_between(ctx.base, ctx.head)?;
    if !commits.is_empty() {
        message.push('\n');
    }
    for commit in commits {
        let info = ctx.git.commit_info(commit)?;
        message.push_str(&format!("* {}\n", info.summary));
    }
    Ok(message)
}

/// Commits a strategy starts from; new commits go on top of `base`.
pub(crate) struct StyleContext<'a> {
    pub(crate) git: &'a dyn GitOps,
    pub(crate) doer: Identity,
    pub(crate) base: Oid,
    pub(crate) head: Oid,
}

impl StyleContext<'_> {
    fn merged_tree(&self, theirs: Oid) -> Result<Oid> {
        let MergeTree { tree, conflicts } = self.git.merge_tree(self.base, theirs)?;
        match tree {
            Some(tree) if conflicts.is_empty() => Ok(tree),
            _ => Err(Error::MergeConflicts { files: conflicts }),
        }
    }

    /// Two-parent commit: base first, `theirs` second.
    pub(crate) fn merge_commit(&self, theirs: Oid, message: String) -> Result<Oid> {
        let tree = self.merged_tree(theirs)?;
        Ok(self.git.write_commit(&NewCommit {
            tree,
            parents: vec![self.base, theirs],
            message,
            author: self.doer.clone(),
            committer: self.doer.clone(),
        })?)
    }

    /// One commit on top of base holding the whole change.
    fn squash(&self, message: String) -> Result<Oid> {
        let tree = self.merged_tree(self.head)?;
        Ok(self.git.write_commit(&NewCommit {
            tree,
            parents: vec![self.base],
            message,
            author: self.doer.clone(),
            committer: self.doer.clone(),
        })?)
    }

    /// Replay the head commits onto base, keeping their authors.
    ///
    /// Merge commits and commits that end up empty are dropped. When base
    /// is already an ancestor of head the result is head itself.
    pub(crate) fn rebase(&self) -> Result<Oid> {
        if self.git.is_ancestor(self.base, self.head)? {
            return Ok(self.head);
        }

        let mut onto = self.base;
        for commit in self.git.commits_between(self.base, self.head)? {
            let info = self.git.commit_info(commit)?;
            if info.parents.len() > 1 {
                tracing::debug!(%commit, "skipping merge commit during rebase");
                continue;
            }

            let picked = self.git.cherry_pick(commit, onto)?;
            let tree = match picked.tree {
                Some(tree) if picked.conflicts.is_empty() => tree,
                _ => {
                    return Err(Error::RebaseConflicts {
                        commit: commit.to_string(),
                        files: picked.conflicts,
                    });
                }
            };
            if tree == self.git.commit_info(onto)?.tree {
                tracing::debug!(%commit, "skipping commit that is already applied");
                continue;
            }

            onto = self.git.write_commit(&NewCommit {
                tree,
                parents: vec![onto],
                message: info.message,
                author: info.author,
                committer: self.doer.clone(),
            })?;
        }
        Ok(onto)
    }

    fn fast_forward(&self) -> Result<Oid> {
        if self.git.is_ancestor(self.base, self.head)? {
            Ok(self.head)
        } else {
            Err(Error::MergeDivergingFastForwardOnly)
        }
    }
}
