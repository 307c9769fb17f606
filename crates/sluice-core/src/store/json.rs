//! Store backed by a single JSON file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::{AutoMergeStore, BranchIndex, ProtectionStore, PullStore, RepoStore, UserStore};
use crate::branch::{Branch, ProtectedBranch};
use crate::error::{Error, Result};
use crate::providers::{
    CommitStatus, Review, ReviewProvider, ReviewSummary, StatusCheckProvider, latest_per_context,
};
use crate::pull::{AutoMerge, Issue, IssueId, PullId, PullRequest};
use crate::repo::{Repo, RepoId, User, UserId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    repos: BTreeMap<RepoId, Repo>,
    #[serde(default)]
    users: BTreeMap<UserId, User>,
    #[serde(default)]
    branches: Vec<Branch>,
    #[serde(default)]
    protected_branches: Vec<ProtectedBranch>,
    #[serde(default)]
    issues: BTreeMap<IssueId, Issue>,
    #[serde(default)]
    pulls: BTreeMap<PullId, PullRequest>,
    #[serde(default)]
    reviews: Vec<Review>,
    #[serde(default)]
    statuses: Vec<CommitStatus>,
    #[serde(default)]
    auto_merges: BTreeMap<PullId, AutoMerge>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn branch_mut(&mut self, repo_id: RepoId, name: &str) -> Option<&mut Branch> {
        self.branches
            .iter_mut()
            .find(|b| b.repo_id == repo_id && b.name == name)
    }

    fn open_pulls(&self, filter: impl Fn(&PullRequest) -> bool) -> Vec<PullRequest> {
        self.pulls
            .values()
            .filter(|pr| pr.is_open() && filter(pr))
            .cloned()
            .collect()
    }
}

/// JSON-file store used by the CLI and by tests.
///
/// A file-backed store re-reads the file on every call. Mutations hold an
/// exclusive lock on `<file>.lock` across load, change and write, so
/// separate processes sharing one file never lose each other's writes.
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl JsonStore {
    /// Store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Open the store at `path`, starting empty if the file doesn't exist.
    ///
    /// # Errors
    /// Returns error if the file exists but can't be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = lock_file(&path)?;
        lock.lock_shared()?;
        let tables = load(&path)?;
        lock.unlock()?;

        Ok(Self {
            path: Some(path),
            tables: Mutex::new(tables),
        })
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a review.
    ///
    /// # Errors
    /// Returns [`Error::PullNotFound`] if the pull request doesn't exist.
    pub fn record_review(&self, review: Review) -> Result<()> {
        self.write(|tables| {
            if !tables.pulls.contains_key(&review.pull_id) {
                return Err(Error::PullNotFound(review.pull_id.to_string()));
            }
            tables.reviews.push(review);
            Ok(())
        })
    }

    /// Record a commit status.
    ///
    /// # Errors
    /// Returns error if the store can't be written.
    pub fn record_status(&self, status: CommitStatus) -> Result<()> {
        self.write(|tables| {
            tables.statuses.push(status);
            Ok(())
        })
    }

    fn guard(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| Error::StorePoisoned)
    }

    fn read(&self) -> Result<MutexGuard<'_, Tables>> {
        let mut tables = self.guard()?;
        if let Some(path) = &self.path {
            let lock = lock_file(path)?;
            lock.lock_shared()?;
            *tables = load(path)?;
            lock.unlock()?;
        }
        Ok(tables)
    }

    fn write<T>(&self, apply: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.guard()?;
        let Some(path) = &self.path else {
            return apply(&mut tables);
        };

        let lock = lock_file(path)?;
        lock.lock_exclusive()?;
        let mut staged = load(path)?;
        let value = apply(&mut staged)?;
        persist(path, &staged)?;
        lock.unlock()?;
        *tables = staged;
        Ok(value)
    }
}

fn lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.with_extension("json.lock"))?;
    Ok(file)
}

fn load(path: &Path) -> Result<Tables> {
    if !path.exists() {
        return Ok(Tables::default());
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| Error::StateParseError {
        file: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write via a per-process temp file and rename over the target.
fn persist(path: &Path, tables: &Tables) -> Result<()> {
    let content = serde_json::to_string_pretty(tables)?;
    let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl RepoStore for JsonStore {
    fn insert_repo(&self, mut repo: Repo) -> Result<Repo> {
        self.write(|tables| {
            if tables
                .repos
                .values()
                .any(|r| r.owner == repo.owner && r.name == repo.name)
            {
                return Err(Error::AlreadyExists(format!(
                    "repository {}",
                    repo.full_name()
                )));
            }
            repo.id = tables.allocate_id();
            tables.repos.insert(repo.id, repo.clone());
            Ok(repo)
        })
    }

    fn repo(&self, id: RepoId) -> Result<Repo> {
        self.read()?
            .repos
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::RepoNotFound(id.to_string()))
    }

    fn repo_by_name(&self, owner: &str, name: &str) -> Result<Option<Repo>> {
        Ok(self
            .read()?
            .repos
            .values()
            .find(|r| r.owner == owner && r.name == name)
            .cloned())
    }

    fn repos(&self) -> Result<Vec<Repo>> {
        Ok(self.read()?.repos.values().cloned().collect())
    }
}

impl UserStore for JsonStore {
    fn insert_user(&self, mut user: User) -> Result<User> {
        self.write(|tables| {
            if tables.users.values().any(|u| u.name == user.name) {
                return Err(Error::AlreadyExists(format!("user {}", user.name)));
            }
            user.id = tables.allocate_id();
            tables.users.insert(user.id, user.clone());
            Ok(user)
        })
    }

    fn user(&self, id: UserId) -> Result<User> {
        self.read()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::UserNotFound(id.to_string()))
    }

    fn user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.name == name)
            .cloned())
    }
}

impl BranchIndex for JsonStore {
    fn get_branch(&self, repo_id: RepoId, name: &str) -> Result<Option<Branch>> {
        Ok(self
            .read()?
            .branches
            .iter()
            .find(|b| b.repo_id == repo_id && b.name == name)
            .cloned())
    }

    fn list_branches(&self, repo_id: RepoId, include_deleted: bool) -> Result<Vec<Branch>> {
        let mut branches: Vec<Branch> = self
            .read()?
            .branches
            .iter()
            .filter(|b| b.repo_id == repo_id && (include_deleted || !b.is_deleted))
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    fn upsert_branch(&self, branch: &Branch) -> Result<()> {
        self.write(|tables| {
            match tables.branch_mut(branch.repo_id, &branch.name) {
                Some(row) => *row = branch.clone(),
                None => tables.branches.push(branch.clone()),
            }
            Ok(())
        })
    }

    fn restore_branch(&self, branch: &Branch) -> Result<bool> {
        self.write(|tables| match tables.branch_mut(branch.repo_id, &branch.name) {
            Some(row) if !row.is_deleted => Ok(false),
            Some(row) => {
                *row = branch.clone();
                Ok(true)
            }
            None => {
                tables.branches.push(branch.clone());
                Ok(true)
            }
        })
    }

    fn mark_branch_deleted(
        &self,
        repo_id: RepoId,
        name: &str,
        expected_commit: Option<&str>,
        deleted_by: UserId,
    ) -> Result<bool> {
        self.write(|tables| {
            let Some(row) = tables.branch_mut(repo_id, name) else {
                return Ok(false);
            };
            if row.is_deleted || expected_commit.is_some_and(|c| c != row.commit_id) {
                return Ok(false);
            }
            row.is_deleted = true;
            row.deleted_by_id = Some(deleted_by);
            row.deleted_at = Some(Utc::now());
            Ok(true)
        })
    }

    fn count_branches(&self, repo_id: RepoId) -> Result<usize> {
        Ok(self
            .read()?
            .branches
            .iter()
            .filter(|b| b.repo_id == repo_id && !b.is_deleted)
            .count())
    }
}

impl ProtectionStore for JsonStore {
    fn protected_branches(&self, repo_id: RepoId) -> Result<Vec<ProtectedBranch>> {
        Ok(self
            .read()?
            .protected_branches
            .iter()
            .filter(|r| r.repo_id == repo_id)
            .cloned()
            .collect())
    }

    fn save_protected_branch(&self, rule: &ProtectedBranch) -> Result<()> {
        rule.validate()?;
        self.write(|tables| {
            match tables
                .protected_branches
                .iter_mut()
                .find(|r| r.repo_id == rule.repo_id && r.rule_name == rule.rule_name)
            {
                Some(existing) => *existing = rule.clone(),
                None => tables.protected_branches.push(rule.clone()),
            }
            Ok(())
        })
    }

    fn delete_protected_branch(&self, repo_id: RepoId, rule_name: &str) -> Result<bool> {
        self.write(|tables| {
            let before = tables.protected_branches.len();
            tables
                .protected_branches
                .retain(|r| !(r.repo_id == repo_id && r.rule_name == rule_name));
            Ok(tables.protected_branches.len() != before)
        })
    }
}

impl PullStore for JsonStore {
    fn create_pull(&self, mut issue: Issue, mut pull: PullRequest) -> Result<PullRequest> {
        self.write(|tables| {
            let index = tables
                .issues
                .values()
                .filter(|i| i.repo_id == issue.repo_id)
                .map(|i| i.index)
                .max()
                .unwrap_or(0)
                + 1;

            issue.id = tables.allocate_id();
            issue.index = index;
            issue.is_pull = true;
            pull.id = tables.allocate_id();
            pull.issue_id = issue.id;
            pull.index = index;

            tables.issues.insert(issue.id, issue);
            tables.pulls.insert(pull.id, pull.clone());
            Ok(pull)
        })
    }

    fn pull(&self, id: PullId) -> Result<PullRequest> {
        self.read()?
            .pulls
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::PullNotFound(id.to_string()))
    }

    fn pull_by_index(&self, repo_id: RepoId, index: u64) -> Result<PullRequest> {
        self.read()?
            .pulls
            .values()
            .find(|pr| pr.base_repo_id == repo_id && pr.index == index)
            .cloned()
            .ok_or_else(|| Error::PullNotFound(format!("#{index} in repository {repo_id}")))
    }

    fn update_pull(
        &self,
        id: PullId,
        update: &mut dyn FnMut(&mut PullRequest) -> Result<()>,
    ) -> Result<PullRequest> {
        self.write(|tables| {
            let row = tables
                .pulls
                .get_mut(&id)
                .ok_or_else(|| Error::PullNotFound(id.to_string()))?;
            let mut updated = row.clone();
            update(&mut updated)?;
            *row = updated.clone();
            Ok(updated)
        })
    }

    fn issue(&self, id: IssueId) -> Result<Issue> {
        self.read()?
            .issues
            .get(&id)
            .cloned()
            .ok_or(Error::IssueNotFound(id))
    }

    fn save_issue(&self, issue: &Issue) -> Result<()> {
        self.write(|tables| {
            let row = tables
                .issues
                .get_mut(&issue.id)
                .ok_or(Error::IssueNotFound(issue.id))?;
            *row = issue.clone();
            Ok(())
        })
    }

    fn open_pulls_by_base(&self, repo_id: RepoId, branch: &str) -> Result<Vec<PullRequest>> {
        Ok(self
            .read()?
            .open_pulls(|pr| pr.base_repo_id == repo_id && pr.base_branch == branch))
    }

    fn open_pulls_by_head(&self, repo_id: RepoId, branch: &str) -> Result<Vec<PullRequest>> {
        Ok(self
            .read()?
            .open_pulls(|pr| pr.head_repo_id == repo_id && pr.head_branch == branch))
    }

    fn pulls(&self, repo_id: RepoId) -> Result<Vec<PullRequest>> {
        let mut pulls: Vec<PullRequest> = self
            .read()?
            .pulls
            .values()
            .filter(|pr| pr.base_repo_id == repo_id)
            .cloned()
            .collect();
        pulls.sort_by_key(|pr| pr.index);
        Ok(pulls)
    }
}

impl AutoMergeStore for JsonStore {
    fn schedule_auto_merge(&self, auto_merge: &AutoMerge) -> Result<()> {
        self.write(|tables| {
            if !tables.pulls.contains_key(&auto_merge.pull_id) {
                return Err(Error::PullNotFound(auto_merge.pull_id.to_string()));
            }
            if tables.auto_merges.contains_key(&auto_merge.pull_id) {
                return Err(Error::AlreadyExists(format!(
                    "auto-merge for pull request {}",
                    auto_merge.pull_id
                )));
            }
            tables
                .auto_merges
                .insert(auto_merge.pull_id, auto_merge.clone());
            Ok(())
        })
    }

    fn auto_merge(&self, pull_id: PullId) -> Result<Option<AutoMerge>> {
        Ok(self.read()?.auto_merges.get(&pull_id).cloned())
    }

    fn remove_auto_merge(&self, pull_id: PullId) -> Result<bool> {
        self.write(|tables| Ok(tables.auto_merges.remove(&pull_id).is_some()))
    }
}

impl ReviewProvider for JsonStore {
    fn review_summary(&self, pull_id: PullId) -> Result<ReviewSummary> {
        let tables = self.read()?;
        Ok(ReviewSummary::from_reviews(
            tables.reviews.iter().filter(|r| r.pull_id == pull_id),
        ))
    }
}

impl StatusCheckProvider for JsonStore {
    fn statuses(&self, repo_id: RepoId, commit_id: &str) -> Result<Vec<CommitStatus>> {
        let tables = self.read()?;
        Ok(latest_per_context(tables.statuses.iter().filter(|s| {
            s.repo_id == repo_id && s.commit_id == commit_id
        })))
    }
}
