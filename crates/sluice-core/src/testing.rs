//! Shared fixtures for unit tests: real bare repositories in a temp dir.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use chrono::Utc;
use git2::Signature;
use sluice_git::{Oid, Repository};
use tempfile::TempDir;

use crate::automerge::AutoMerger;
use crate::branch::ProtectedBranch;
use crate::checker::MergeChecker;
use crate::config::Config;
use crate::lifecycle::{OpenPull, PullLifecycle};
use crate::merge::MergeExecutor;
use crate::notify::Notifier;
use crate::providers::{CheckState, CommitStatus, Review, ReviewKind};
use crate::pull::PullRequest;
use crate::repo::{Repo, User};
use crate::retarget::PullRetargeter;
use crate::services::Services;
use crate::store::{JsonStore, ProtectionStore, RepoStore, UserStore};
use crate::sync::BranchSyncer;
use crate::update::PullUpdater;

/// Records every callback as `<event>:<pull id or branch>`.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Notifier for RecordingNotifier {
    fn branch_deleted(&self, _repo: &Repo, branch: &str, _doer: &User) {
        self.push(format!("branch_deleted:{branch}"));
    }

    fn pull_opened(&self, pr: &PullRequest, _doer: &User) {
        self.push(format!("opened:{}", pr.id));
    }

    fn pull_synchronized(&self, pr: &PullRequest, _pusher: &User) {
        self.push(format!("synchronized:{}", pr.id));
    }

    fn pull_merged(&self, pr: &PullRequest, _doer: &User) {
        self.push(format!("merged:{}", pr.id));
    }

    fn pull_retargeted(&self, pr: &PullRequest, _old_base: &str, _doer: &User) {
        self.push(format!("retargeted:{}", pr.id));
    }

    fn pull_closed(&self, pr: &PullRequest, _doer: &User) {
        self.push(format!("closed:{}", pr.id));
    }
}

/// One admin, one regular user and `user2/repo1` with `main` holding a README.
pub struct Fixture {
    pub temp: TempDir,
    pub store: Arc<JsonStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
    pub admin: User,
    pub user: User,
    pub repo: Repo,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(JsonStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = Services::new(store.clone(), config).with_notifier(notifier.clone());

        let admin = store
            .insert_user(User {
                id: 0,
                name: "user1".into(),
                email: "user1@example.com".into(),
                is_admin: true,
            })
            .unwrap();
        let user = store
            .insert_user(User {
                id: 0,
                name: "user2".into(),
                email: "user2@example.com".into(),
                is_admin: false,
            })
            .unwrap();

        let mut fx = Self {
            temp,
            store,
            notifier,
            services,
            admin,
            user,
            repo: Repo {
                id: 0,
                owner: String::new(),
                name: String::new(),
                path: std::path::PathBuf::new(),
                default_branch: String::new(),
                fork_of: None,
            },
        };
        fx.repo = fx.add_repo("user2", "repo1", None);
        let git = fx.git(&fx.repo);
        commit_on(&git, "main", None, "README.md", "hello\n");
        fx.syncer().sync_repo_branches(fx.repo.id, fx.admin.id).unwrap();
        fx
    }

    /// Create a bare repository; forks start with a copy of the parent's `main`.
    pub fn add_repo(&self, owner: &str, name: &str, fork_of: Option<&Repo>) -> Repo {
        let path = self.temp.path().join(owner).join(format!("{name}.git"));
        let git = Repository::init_bare(&path).unwrap();
        if let Some(parent) = fork_of {
            git.fetch_ref(&parent.path, "refs/heads/main", "refs/heads/main")
                .unwrap();
        }

        self.store
            .insert_repo(Repo {
                id: 0,
                owner: owner.into(),
                name: name.into(),
                path,
                default_branch: "main".into(),
                fork_of: fork_of.map(|p| p.id),
            })
            .unwrap()
    }

    pub fn git(&self, repo: &Repo) -> Repository {
        Repository::open(&repo.path).unwrap()
    }

    pub fn tip(&self, repo: &Repo, branch: &str) -> Oid {
        self.git(repo).branch_commit(branch).unwrap()
    }

    /// Commit one top-level file straight into the ref store, like a push.
    pub fn commit(
        &self,
        repo: &Repo,
        branch: &str,
        parent: Option<Oid>,
        path: &str,
        content: &str,
    ) -> Oid {
        commit_on(&self.git(repo), branch, parent, path, content)
    }

    pub fn syncer(&self) -> BranchSyncer {
        BranchSyncer::new(self.services.clone())
    }

    pub fn checker(&self) -> MergeChecker {
        MergeChecker::new(self.services.clone())
    }

    pub fn lifecycle(&self) -> PullLifecycle {
        PullLifecycle::new(self.services.clone())
    }

    pub fn executor(&self) -> MergeExecutor {
        MergeExecutor::new(self.services.clone())
    }

    pub fn retargeter(&self) -> PullRetargeter {
        PullRetargeter::new(self.services.clone())
    }

    pub fn auto_merger(&self) -> AutoMerger {
        AutoMerger::new(self.services.clone())
    }

    pub fn updater(&self) -> PullUpdater {
        PullUpdater::new(self.services.clone())
    }

    pub fn add_user(&self, name: &str, is_admin: bool) -> User {
        self.store
            .insert_user(User {
                id: 0,
                name: name.into(),
                email: format!("{name}@example.com"),
                is_admin,
            })
            .unwrap()
    }

    pub fn open_pull(&self, repo: &Repo, head: &str, base: &str, title: &str) -> PullRequest {
        self.open_cross_pull(repo, head, repo, base, title)
    }

    pub fn open_cross_pull(
        &self,
        head_repo: &Repo,
        head: &str,
        base_repo: &Repo,
        base: &str,
        title: &str,
    ) -> PullRequest {
        self.lifecycle()
            .open(OpenPull {
                base_repo_id: base_repo.id,
                head_repo_id: head_repo.id,
                base_branch: base.into(),
                head_branch: head.into(),
                title: title.into(),
                poster_id: self.user.id,
            })
            .unwrap()
    }

    /// Replace the rule named `rule_name` with a fresh one shaped by `configure`.
    pub fn protect(&self, repo: &Repo, rule_name: &str, configure: impl FnOnce(&mut ProtectedBranch)) {
        let mut rule = ProtectedBranch::new(repo.id, rule_name);
        configure(&mut rule);
        self.store.save_protected_branch(&rule).unwrap();
    }

    pub fn review(&self, pr: &PullRequest, reviewer: &User, kind: ReviewKind) {
        self.store
            .record_review(Review {
                pull_id: pr.id,
                reviewer_id: reviewer.id,
                kind,
                commit_id: pr.head_commit_id.clone().unwrap_or_default(),
                created_at: Utc::now(),
            })
            .unwrap();
    }

    pub fn status(&self, repo: &Repo, commit: Oid, context: &str, state: CheckState) {
        self.store
            .record_status(CommitStatus {
                repo_id: repo.id,
                commit_id: commit.to_string(),
                context: context.into(),
                state,
                created_at: Utc::now(),
            })
            .unwrap();
    }
}

fn commit_on(repo: &Repository, branch: &str, parent: Option<Oid>, path: &str, content: &str) -> Oid {
    let git = repo.inner();
    let base_tree = parent.map(|p| git.find_commit(p).unwrap().tree().unwrap());
    let mut builder = git.treebuilder(base_tree.as_ref()).unwrap();
    let blob = git.blob(content.as_bytes()).unwrap();
    builder.insert(path, blob, 0o100_644).unwrap();
    let tree = git.find_tree(builder.write().unwrap()).unwrap();

    let sig = Signature::now("Test Author", "author@example.com").unwrap();
    let parents: Vec<git2::Commit<'_>> = parent
        .map(|p| git.find_commit(p).unwrap())
        .into_iter()
        .collect();
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    let oid = git
        .commit(None, &sig, &sig, &format!("edit {path}"), &tree, &parent_refs)
        .unwrap();
    git.reference(&sluice_git::branch_ref(branch), oid, true, "test")
        .unwrap();
    oid
}
