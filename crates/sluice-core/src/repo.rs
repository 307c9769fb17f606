//! Repositories, users and access to their git storage.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sluice_git::{GitOps, Identity};

use crate::error::Result;

/// Repository row id.
pub type RepoId = u64;

/// User row id.
pub type UserId = u64;

/// A hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Row id.
    pub id: RepoId,
    /// Owning user or organisation name.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Path of the bare git directory on disk.
    pub path: PathBuf,
    /// Branch new pull requests target by default.
    pub default_branch: String,
    /// Repository this one was forked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_of: Option<RepoId>,
}

impl Repo {
    /// `owner/name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Whether pull requests may flow between `self` and `other`.
    ///
    /// True for the same repository, a fork and its parent, or two forks of
    /// the same parent.
    #[must_use]
    pub fn shares_network_with(&self, other: &Self) -> bool {
        self.id == other.id
            || self.fork_of == Some(other.id)
            || other.fork_of == Some(self.id)
            || (self.fork_of.is_some() && self.fork_of == other.fork_of)
    }
}

/// An account that pushes, reviews and merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Row id.
    pub id: UserId,
    /// Login name.
    pub name: String,
    /// Email used for commit identities.
    pub email: String,
    /// Administrators bypass branch protection unless a rule says otherwise.
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    /// Commit identity for this user, stamped at write time.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::now(&self.name, &self.email)
    }
}

/// Opens the git storage behind a repository row.
pub trait GitBackend: Send + Sync {
    /// Open the repository's git directory.
    ///
    /// # Errors
    /// Returns error if the repository can't be opened.
    fn open(&self, repo: &Repo) -> Result<Box<dyn GitOps>>;
}

/// Repositories stored as bare git directories on the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskBackend;

impl GitBackend for DiskBackend {
    fn open(&self, repo: &Repo) -> Result<Box<dyn GitOps>> {
        let git = sluice_git::Repository::open(&repo.path)?;
        Ok(Box::new(git))
    }
}
