//! Bringing a pull request's head branch up to date with its base.
//!
//! The new head is written the same way a merge writes the new base: built
//! in memory, then swapped in only if the head ref hasn't moved. The result
//! goes through the push path so the index, checks and notifications follow.

use serde::Serialize;
use sluice_git::{GitOps, Oid};

use crate::checker::{Blocker, branch_tip};
use crate::conflict::{ConflictDetector, Divergence};
use crate::error::{Error, Result};
use crate::merge::StyleContext;
use crate::pull::{PullId, PullRequest, UpdateStyle};
use crate::repo::User;
use crate::services::Services;
use crate::sync::{BranchSyncer, PushUpdate};

/// Scratch ref in the head repository holding a fork's base tip.
const UPDATE_BASE_REF: &str = "refs/sluice/update-base";

/// What an update did to the head branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    /// Head tip before the update.
    pub old_head: String,
    /// Head tip after the update.
    pub new_head: String,
    /// How the base was brought in.
    pub style: UpdateStyle,
}

/// Updates head branches from their base.
#[derive(Debug, Clone)]
pub struct PullUpdater {
    services: Services,
    syncer: BranchSyncer,
}

impl PullUpdater {
    /// Updater over the given services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let syncer = BranchSyncer::new(services.clone());
        Self { services, syncer }
    }

    /// Commits the head has that the base lacks, and the reverse.
    ///
    /// # Errors
    /// Returns error if either branch is missing.
    pub fn divergence(&self, pull_id: PullId) -> Result<Divergence> {
        let pr = self.services.store.pull(pull_id)?;
        let (git, head, base) = self.tips(&pr)?;
        ConflictDetector::new(git.as_ref()).divergence(base, head)
    }

    /// Merge or rebase the head branch onto the base tip.
    ///
    /// The doer needs push access to the head branch.
    ///
    /// # Errors
    /// Returns [`Error::HeadUpToDate`] when the head already contains the
    /// base, [`Error::PushRejected`] when the head branch is protected
    /// against the doer, [`Error::StaleHead`] when the head moved meanwhile,
    /// and the merge or rebase conflict errors when git refuses.
    pub fn update(&self, pull_id: PullId, doer: &User, style: UpdateStyle) -> Result<UpdateOutcome> {
        let store = &self.services.store;
        let pr = store.pull(pull_id)?;
        if !pr.is_open() {
            let blocker = if pr.has_merged() {
                Blocker::AlreadyMerged
            } else {
                Blocker::Closed
            };
            return Err(Error::NotMergeable {
                reason: blocker.reason(),
            });
        }
        self.syncer
            .check_push(pr.head_repo_id, &pr.head_branch, doer.id)?;

        let (git, head, base) = self.tips(&pr)?;
        if git.is_ancestor(base, head)? {
            return Err(Error::HeadUpToDate(pr.head_branch.clone()));
        }

        let new_head = match style {
            UpdateStyle::Merge => {
                let ctx = StyleContext {
                    git: git.as_ref(),
                    doer: doer.identity(),
                    base: head,
                    head: base,
                };
                ctx.merge_commit(base, self.message(&pr)?)?
            }
            UpdateStyle::Rebase => StyleContext {
                git: git.as_ref(),
                doer: doer.identity(),
                base,
                head,
            }
            .rebase()?,
        };

        let head_ref = sluice_git::branch_ref(&pr.head_branch);
        git.update_ref(
            &head_ref,
            new_head,
            Some(head),
            &format!("sluice: update pull request #{} from base", pr.index),
        )
        .map_err(|e| {
            if e.is_ref_changed() {
                Error::StaleHead {
                    expected: head.to_string(),
                    actual: git
                        .branch_commit(&pr.head_branch)
                        .map(|oid| oid.to_string())
                        .unwrap_or_default(),
                }
            } else {
                Error::Git(e)
            }
        })?;
        tracing::info!(
            pull = pr.id,
            branch = %pr.head_branch,
            %style,
            old = %head,
            new = %new_head,
            "head branch updated from base"
        );

        self.syncer.apply_push(
            pr.head_repo_id,
            &PushUpdate {
                refname: head_ref,
                old_commit: head.to_string(),
                new_commit: new_head.to_string(),
                pusher_id: doer.id,
            },
        )?;

        Ok(UpdateOutcome {
            old_head: head.to_string(),
            new_head: new_head.to_string(),
            style,
        })
    }

    /// Head repository plus the head and base tips, both readable in it.
    fn tips(&self, pr: &PullRequest) -> Result<(Box<dyn GitOps>, Oid, Oid)> {
        let store = &self.services.store;
        let head_repo = store.repo(pr.head_repo_id)?;
        let git = self.services.git.open(&head_repo)?;
        let head = branch_tip(git.as_ref(), pr.head_repo_id, &pr.head_branch)?;

        let base = if pr.is_same_repo() {
            branch_tip(git.as_ref(), pr.base_repo_id, &pr.base_branch)?
        } else {
            let base_repo = store.repo(pr.base_repo_id)?;
            git.fetch_ref(
                &base_repo.path,
                &sluice_git::branch_ref(&pr.base_branch),
                UPDATE_BASE_REF,
            )
            .map_err(|_| Error::BranchNotFound {
                repo_id: pr.base_repo_id,
                branch: pr.base_branch.clone(),
            })?
        };
        Ok((git, head, base))
    }

    fn message(&self, pr: &PullRequest) -> Result<String> {
        if pr.is_same_repo() {
            return Ok(format!(
                "Merge branch '{}' into {}",
                pr.base_branch, pr.head_branch
            ));
        }
        let base_repo = self.services.store.repo(pr.base_repo_id)?;
        Ok(format!(
            "Merge branch '{}' of {} into {}",
            pr.base_branch,
            base_repo.full_name(),
            pr.head_branch
        ))
    }
}
