//! Keeping the branch index in step with git refs.
//!
//! A full sync only ever acts on the *absence* of a ref or a row, so it can
//! run at the same time as push handling without clobbering a fresher tip.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::branch::Branch;
use crate::checker::MergeChecker;
use crate::error::{Error, Result};
use crate::repo::{RepoId, UserId};
use crate::retarget::{PullRetargeter, RetargetOutcome};
use crate::services::Services;

/// Rows changed by one repository sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Rows created or brought back from deletion.
    pub added: usize,
    /// Live rows whose ref has gone.
    pub marked_deleted: usize,
}

/// Totals for a sync over every repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Repositories attempted.
    pub repos: usize,
    /// Repositories synced without error.
    pub succeeded: usize,
    /// Repositories whose sync failed.
    pub failed: usize,
    /// Sum of [`SyncOutcome::added`].
    pub added: usize,
    /// Sum of [`SyncOutcome::marked_deleted`].
    pub marked_deleted: usize,
}

/// A single ref update reported by the git server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdate {
    /// Full ref name, e.g. `refs/heads/main`.
    pub refname: String,
    /// Previous tip; all zeros when the ref was created.
    pub old_commit: String,
    /// New tip; all zeros when the ref was deleted.
    pub new_commit: String,
    /// Who pushed.
    pub pusher_id: UserId,
}

/// What a push did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Not a branch ref.
    Ignored,
    /// Branch row written; `rechecked` pull requests went back through a check.
    Updated {
        /// Pull requests re-checked because their head or base moved.
        rechecked: usize,
    },
    /// Branch row soft-deleted.
    Deleted(RetargetOutcome),
}

/// Reconciles the branch index with the ref store.
#[derive(Debug, Clone)]
pub struct BranchSyncer {
    services: Services,
    checker: MergeChecker,
    retargeter: PullRetargeter,
}

impl BranchSyncer {
    /// Syncer over the given services.
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

    /// Bring the index of one repository in line with its refs.
    ///
    /// Every ref without a live row gets one (pusher = `doer_id`); every live
    /// row without a ref is soft-deleted. Rows that exist on both sides are
    /// left alone. Running it twice changes nothing the second time.
    ///
    /// # Errors
    /// Returns error if the repository, its refs or the store can't be read.
    pub fn sync_repo_branches(&self, repo_id: RepoId, doer_id: UserId) -> Result<SyncOutcome> {
        let store = &self.services.store;
        let repo = store.repo(repo_id)?;
        let git = self.services.git.open(&repo)?;

        let refs = git.list_branches()?;
        let rows = store.list_branches(repo_id, true)?;
        let by_name: HashMap<&str, &Branch> = rows.iter().map(|b| (b.name.as_str(), b)).collect();

        let mut outcome = SyncOutcome::default();
        for branch_ref in &refs {
            if by_name
                .get(branch_ref.name.as_str())
                .is_some_and(|row| !row.is_deleted)
            {
                continue;
            }
            let commit = git.commit_info(branch_ref.target)?;
            let row = Branch::from_commit(repo_id, &branch_ref.name, &commit, doer_id);
            if store.restore_branch(&row)? {
                tracing::debug!(repo = %repo.full_name(), branch = %branch_ref.name, "branch added to index");
                outcome.added += 1;
            }
        }

        let present: HashSet<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        for row in rows.iter().filter(|b| !b.is_deleted) {
            if present.contains(row.name.as_str()) {
                continue;
            }
            if store.mark_branch_deleted(repo_id, &row.name, Some(&row.commit_id), doer_id)? {
                tracing::debug!(repo = %repo.full_name(), branch = %row.name, "branch marked deleted");
                outcome.marked_deleted += 1;
            }
        }

        tracing::info!(
            repo = %repo.full_name(),
            added = outcome.added,
            marked_deleted = outcome.marked_deleted,
            "branches synced"
        );
        Ok(outcome)
    }

    /// Sync every repository on a bounded pool of blocking workers.
    ///
    /// A failing repository is logged and counted; it never stops the batch.
    ///
    /// # Errors
    /// Returns error only if the repository list can't be read.
    pub async fn sync_all_repos(&self, admin_id: UserId) -> Result<SyncSummary> {
        let repos = self.services.store.repos()?;
        let permits = self.services.config.sync.max_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut jobs = JoinSet::new();
        for repo in repos {
            let syncer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            jobs.spawn(async move {
                let name = repo.full_name();
                let repo_id = repo.id;
                let result: Result<SyncOutcome> = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Join(e.to_string()))?;
                    tokio::task::spawn_blocking(move || {
                        syncer.sync_repo_branches(repo_id, admin_id)
                    })
                    .await
                    .map_err(|e| Error::Join(e.to_string()))?
                }
                .await;
                (name, result)
            });
        }

        let mut summary = SyncSummary::default();
        while let Some(joined) = jobs.join_next().await {
            summary.repos += 1;
            match joined {
                Ok((_, Ok(outcome))) => {
                    summary.succeeded += 1;
                    summary.added += outcome.added;
                    summary.marked_deleted += outcome.marked_deleted;
                }
                Ok((name, Err(e))) => {
                    tracing::warn!(repo = %name, error = %e, "branch sync failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "branch sync job did not finish");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            repos = summary.repos,
            failed = summary.failed,
            added = summary.added,
            marked_deleted = summary.marked_deleted,
            "all repositories synced"
        );
        Ok(summary)
    }

    /// Record one ref update from a push.
    ///
    /// Deleting a branch soft-deletes its row and runs the retarget flow;
    /// anything else upserts the row and re-checks the pull requests that
    /// use the branch.
    ///
    /// # Errors
    /// Returns error if the push names unknown rows or commits.
    pub fn apply_push(&self, repo_id: RepoId, update: &PushUpdate) -> Result<PushOutcome> {
        let Some(branch) = update.refname.strip_prefix(sluice_git::BRANCH_PREFIX) else {
            tracing::debug!(refname = %update.refname, "ignoring non-branch ref");
            return Ok(PushOutcome::Ignored);
        };

        let store = &self.services.store;
        let repo = store.repo(repo_id)?;
        let pusher = store.user(update.pusher_id)?;
        let new_commit = sluice_git::parse_oid(&update.new_commit)?;

        if new_commit.is_zero() {
            store.mark_branch_deleted(repo_id, branch, None, pusher.id)?;
            tracing::info!(repo = %repo.full_name(), branch, "branch deleted by push");
            self.services.notifier.branch_deleted(&repo, branch, &pusher);
            let outcome = self.retargeter.branch_deleted(&repo, branch, &pusher)?;
            return Ok(PushOutcome::Deleted(outcome));
        }

        let git = self.services.git.open(&repo)?;
        let commit = git.commit_info(new_commit)?;
        store.upsert_branch(&Branch::from_commit(repo_id, branch, &commit, pusher.id))?;
        tracing::debug!(repo = %repo.full_name(), branch, commit = %new_commit, "branch updated by push");

        let rechecked = self.checker.branch_moved(repo_id, branch)?;
        for pr in &rechecked {
            if pr.head_repo_id == repo_id && pr.head_branch == branch {
                self.services.notifier.pull_synchronized(pr, &pusher);
            }
        }

        Ok(PushOutcome::Updated {
            rechecked: rechecked.len(),
        })
    }

    /// Refuse a ref update the branch's protection rule doesn't allow.
    ///
    /// Besides the pusher check, an update of an existing branch may not
    /// touch any path the rule's protected file patterns match.
    ///
    /// # Errors
    /// Returns [`Error::PushRejected`] when the rule refuses the update, or
    /// an error if the pushed commits can't be read.
    pub fn check_push_update(&self, repo_id: RepoId, update: &PushUpdate) -> Result<()> {
        let Some(branch) = update.refname.strip_prefix(sluice_git::BRANCH_PREFIX) else {
            return Ok(());
        };
        self.check_push(repo_id, branch, update.pusher_id)?;

        let store = &self.services.store;
        let Some(rule) = store.protection_for(repo_id, branch)? else {
            return Ok(());
        };
        let old = sluice_git::parse_oid(&update.old_commit)?;
        let new = sluice_git::parse_oid(&update.new_commit)?;
        if rule.protected_file_patterns.is_empty() || old.is_zero() || new.is_zero() {
            return Ok(());
        }
        if !rule.gates_apply_to(&store.user(update.pusher_id)?) {
            return Ok(());
        }

        let repo = store.repo(repo_id)?;
        let git = self.services.git.open(&repo)?;
        let changed = git.changed_files(old, new)?;
        let files = rule.protected_files(changed.iter().map(String::as_str));
        if files.is_empty() {
            return Ok(());
        }
        Err(Error::PushRejected {
            branch: branch.to_string(),
            reason: format!("changes protected files: {}", files.join(", ")),
        })
    }

    /// Refuse a push the branch's protection rule doesn't allow.
    ///
    /// # Errors
    /// Returns [`Error::PushRejected`] when the rule refuses the pusher.
    pub fn check_push(&self, repo_id: RepoId, branch: &str, pusher_id: UserId) -> Result<()> {
        let store = &self.services.store;
        let Some(rule) = store.protection_for(repo_id, branch)? else {
            return Ok(());
        };
        let pusher = store.user(pusher_id)?;

        match rule.push_rejection(&pusher) {
            Some(reason) => Err(Error::PushRejected {
                branch: branch.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pull::StatusKind;
    use crate::store::{BranchIndex, JsonStore, PullStore, RepoStore, UserStore};
    use crate::testing::Fixture;
    use sluice_git::Oid;

    const ZERO: &str = "0000000000000000000000000000000000000000";

    fn live_names(fx: &Fixture, repo_id: RepoId) -> Vec<String> {
        fx.store
            .list_branches(repo_id, false)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect()
    }

    fn ref_names(fx: &Fixture) -> Vec<String> {
        let mut names: Vec<String> = fx
            .git(&fx.repo)
            .list_branches()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sync_matches_ref_set() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature/a", Some(root), "a.txt", "a");
        fx.commit(&fx.repo, "feature/b", Some(root), "b.txt", "b");

        let outcome = fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        assert_eq!(outcome, SyncOutcome { added: 2, marked_deleted: 0 });
        assert_eq!(live_names(&fx, fx.repo.id), ref_names(&fx));

        let again = fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        assert_eq!(again, SyncOutcome::default());
    }

    #[test]
    fn test_out_of_band_delete_flips_one_row() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        let tip = fx.commit(&fx.repo, "feature/a", Some(root), "a.txt", "a");
        fx.commit(&fx.repo, "feature/b", Some(root), "b.txt", "b");
        fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        let before = fx.store.count_branches(fx.repo.id).unwrap();

        fx.git(&fx.repo).delete_branch("feature/a", None).unwrap();
        let outcome = fx.syncer().sync_repo_branches(fx.repo.id, fx.user.id).unwrap();

        assert_eq!(outcome, SyncOutcome { added: 0, marked_deleted: 1 });
        assert_eq!(fx.store.count_branches(fx.repo.id).unwrap(), before - 1);
        let row = fx.store.get_branch(fx.repo.id, "feature/a").unwrap().unwrap();
        assert!(row.is_deleted);
        assert_eq!(row.commit_id, tip.to_string());
        assert_eq!(row.deleted_by_id, Some(fx.user.id));
        assert_eq!(live_names(&fx, fx.repo.id), ref_names(&fx));
    }

    #[test]
    fn test_sync_restores_recreated_branch() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        fx.git(&fx.repo).delete_branch("feature", None).unwrap();
        fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();

        let tip = fx.commit(&fx.repo, "feature", Some(root), "b.txt", "b");
        let outcome = fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        assert_eq!(outcome.added, 1);
        let row = fx.store.get_branch(fx.repo.id, "feature").unwrap().unwrap();
        assert!(!row.is_deleted);
        assert_eq!(row.commit_id, tip.to_string());
        assert_eq!(row.deleted_at, None);
    }

    #[test]
    fn test_sync_leaves_live_rows_alone() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        fx.commit(&fx.repo, "main", Some(root), "a.txt", "a");

        let outcome = fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        assert_eq!(outcome, SyncOutcome::default());
        let row = fx.store.get_branch(fx.repo.id, "main").unwrap().unwrap();
        assert_eq!(row.commit_id, root.to_string());
    }

    #[test]
    fn test_push_order_does_not_matter() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        let mut updates = Vec::new();
        for i in 0..100 {
            let name = format!("branch-{i:03}");
            let tip = fx.commit(&fx.repo, &name, Some(root), &format!("{i}.txt"), "x");
            updates.push(PushUpdate {
                refname: sluice_git::branch_ref(&name),
                old_commit: ZERO.into(),
                new_commit: tip.to_string(),
                pusher_id: fx.user.id,
            });
        }

        let forward = fx.syncer();
        for update in &updates {
            forward.apply_push(fx.repo.id, update).unwrap();
        }
        let forward_rows = fx.store.list_branches(fx.repo.id, true).unwrap();

        let reversed_store = Arc::new(JsonStore::in_memory());
        reversed_store.insert_user(fx.admin.clone()).unwrap();
        reversed_store.insert_user(fx.user.clone()).unwrap();
        let repo = reversed_store.insert_repo(fx.repo.clone()).unwrap();
        assert_eq!(repo.id, fx.repo.id);
        let reversed = BranchSyncer::new(Services::new(
            reversed_store.clone(),
            crate::Config::default(),
        ));
        for update in updates.iter().rev() {
            reversed.apply_push(repo.id, update).unwrap();
        }
        reversed.sync_repo_branches(repo.id, fx.admin.id).unwrap();

        let reversed_rows = reversed_store.list_branches(repo.id, true).unwrap();
        assert_eq!(forward_rows, reversed_rows);
        assert_eq!(forward_rows.len(), 101);
    }

    #[test]
    fn test_push_delete_soft_deletes_and_retargets() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        let parent_tip = fx.commit(&fx.repo, "parent", Some(root), "p.txt", "p");
        fx.commit(&fx.repo, "child", Some(parent_tip), "c.txt", "c");
        fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        let child = fx.open_pull(&fx.repo, "child", "parent", "Child");

        fx.git(&fx.repo).delete_branch("parent", None).unwrap();
        let outcome = fx
            .syncer()
            .apply_push(
                fx.repo.id,
                &PushUpdate {
                    refname: "refs/heads/parent".into(),
                    old_commit: parent_tip.to_string(),
                    new_commit: ZERO.into(),
                    pusher_id: fx.user.id,
                },
            )
            .unwrap();

        let PushOutcome::Deleted(retarget) = outcome else {
            panic!("expected a delete");
        };
        assert_eq!(retarget.retargeted, vec![child.id]);
        assert!(fx.store.get_branch(fx.repo.id, "parent").unwrap().unwrap().is_deleted);
        let child = fx.store.pull(child.id).unwrap();
        assert_eq!(child.base_branch, "main");
        assert_eq!(child.status.kind(), StatusKind::Mergeable);
        assert!(fx.notifier.events().contains(&"branch_deleted:parent".to_string()));
    }

    #[test]
    fn test_push_to_head_synchronizes_pull() {
        let fx = Fixture::new();
        let root = fx.tip(&fx.repo, "main");
        let first = fx.commit(&fx.repo, "feature", Some(root), "a.txt", "a");
        let pr = fx.open_pull(&fx.repo, "feature", "main", "Add a");

        let second = fx.commit(&fx.repo, "feature", Some(first), "b.txt", "b");
        let outcome = fx
            .syncer()
            .apply_push(
                fx.repo.id,
                &PushUpdate {
                    refname: "refs/heads/feature".into(),
                    old_commit: first.to_string(),
                    new_commit: second.to_string(),
                    pusher_id: fx.user.id,
                },
            )
            .unwrap();

        assert_eq!(outcome, PushOutcome::Updated { rechecked: 1 });
        let pr = fx.store.pull(pr.id).unwrap();
        assert_eq!(pr.head_commit_id, Some(second.to_string()));
        assert_eq!(
            fx.notifier.events(),
            vec![format!("opened:{}", pr.id), format!("synchronized:{}", pr.id)]
        );
    }

    #[test]
    fn test_tag_push_is_ignored() {
        let fx = Fixture::new();
        let outcome = fx
            .syncer()
            .apply_push(
                fx.repo.id,
                &PushUpdate {
                    refname: "refs/tags/v1".into(),
                    old_commit: ZERO.into(),
                    new_commit: fx.tip(&fx.repo, "main").to_string(),
                    pusher_id: fx.user.id,
                },
            )
            .unwrap();
        assert_eq!(outcome, PushOutcome::Ignored);
    }

    #[test]
    fn test_check_push() {
        let fx = Fixture::new();
        let syncer = fx.syncer();
        assert!(syncer.check_push(fx.repo.id, "main", fx.user.id).is_ok());

        fx.protect(&fx.repo, "main", |_| {});
        let err = syncer.check_push(fx.repo.id, "main", fx.user.id).unwrap_err();
        assert!(matches!(err, Error::PushRejected { .. }));
        assert!(syncer.check_push(fx.repo.id, "main", fx.admin.id).is_ok());
        assert!(syncer.check_push(fx.repo.id, "develop", fx.user.id).is_ok());

        let user_id = fx.user.id;
        fx.protect(&fx.repo, "main", |rule| {
            rule.enable_push = true;
            rule.enable_push_allowlist = true;
            rule.push_allowlist_user_ids = vec![user_id];
        });
        assert!(syncer.check_push(fx.repo.id, "main", fx.user.id).is_ok());
    }

    #[test]
    fn test_push_touching_protected_files_is_rejected() {
        let fx = Fixture::new();
        let syncer = fx.syncer();
        let root = fx.tip(&fx.repo, "main");
        let lock = fx.commit(&fx.repo, "scratch", Some(root), "Cargo.lock", "lock");
        let docs = fx.commit(&fx.repo, "other", Some(root), "docs.md", "docs");
        fx.protect(&fx.repo, "main", |rule| {
            rule.enable_push = true;
            rule.protected_file_patterns = vec!["*.lock".into()];
        });
        let update = |new: Oid, pusher_id| PushUpdate {
            refname: "refs/heads/main".into(),
            old_commit: root.to_string(),
            new_commit: new.to_string(),
            pusher_id,
        };

        let err = syncer
            .check_push_update(fx.repo.id, &update(lock, fx.user.id))
            .unwrap_err();
        assert!(err.to_string().contains("changes protected files: Cargo.lock"));
        assert!(syncer.check_push_update(fx.repo.id, &update(docs, fx.user.id)).is_ok());
        assert!(syncer.check_push_update(fx.repo.id, &update(lock, fx.admin.id)).is_ok());

        let create = PushUpdate {
            old_commit: ZERO.into(),
            ..update(lock, fx.user.id)
        };
        assert!(syncer.check_push_update(fx.repo.id, &create).is_ok());
    }

    #[tokio::test]
    async fn test_sync_all_counts_failures() {
        let fx = Fixture::new();
        let other = fx.add_repo("user3", "repo2", None);
        fx.commit(&other, "main", None, "README.md", "other\n");
        let broken = fx.add_repo("user3", "broken", None);
        std::fs::remove_dir_all(&broken.path).unwrap();

        let summary = fx.syncer().sync_all_repos(fx.admin.id).await.unwrap();
        assert_eq!(summary.repos, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.added, 1);
        assert_eq!(live_names(&fx, other.id), vec!["main"]);
    }
}
