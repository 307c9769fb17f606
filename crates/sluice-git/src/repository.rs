//! Repository wrapper providing ref and commit-graph reads.

use std::path::Path;

use git2::{BranchType, ErrorCode, Oid, Signature};

use crate::error::{Error, Result};

/// High-level wrapper around a (usually bare) git repository.
pub struct Repository {
    inner: git2::Repository,
}

/// A local branch and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    /// Short branch name (without `refs/heads/`).
    pub name: String,
    /// Tip commit.
    pub target: Oid,
}

/// Seconds since the epoch plus the UTC offset the commit was made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitTime {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Offset from UTC in minutes.
    pub offset_minutes: i32,
}

/// Name and email of a commit author or committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Timestamp; `None` means "now" when writing a commit.
    pub time: Option<GitTime>,
}

impl Identity {
    /// Identity stamped with the current time when used.
    #[must_use]
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time: None,
        }
    }

    pub(crate) fn to_signature(&self) -> Result<Signature<'static>> {
        let signature = match self.time {
            Some(time) => Signature::new(
                &self.name,
                &self.email,
                &git2::Time::new(time.seconds, time.offset_minutes),
            )?,
            None => Signature::now(&self.name, &self.email)?,
        };
        Ok(signature)
    }

    fn from_signature(signature: &Signature<'_>) -> Self {
        let when = signature.when();
        Self {
            name: String::from_utf8_lossy(signature.name_bytes()).into_owned(),
            email: String::from_utf8_lossy(signature.email_bytes()).into_owned(),
            time: Some(GitTime {
                seconds: when.seconds(),
                offset_minutes: when.offset_minutes(),
            }),
        }
    }
}

/// What the index needs to know about a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Commit id.
    pub id: Oid,
    /// First line of the message.
    pub summary: String,
    /// Full message.
    pub message: String,
    /// Author identity, including the authoring time.
    pub author: Identity,
    /// Committer time.
    pub time: GitTime,
    /// Tree the commit points at.
    pub tree: Oid,
    /// Parent commits, first parent first.
    pub parents: Vec<Oid>,
}

impl Repository {
    /// Open the repository at exactly the given path (bare or not).
    ///
    /// # Errors
    /// Returns error if no repository exists at the path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = git2::Repository::open(path)
            .map_err(|_| Error::NotARepository(path.display().to_string()))?;
        Ok(Self { inner })
    }

    /// Create a new bare repository.
    ///
    /// # Errors
    /// Returns error if the directory can't be initialised.
    pub fn init_bare(path: impl AsRef<Path>) -> Result<Self> {
        let inner = git2::Repository::init_bare(path)?;
        Ok(Self { inner })
    }

    /// Get the path to the git directory.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        self.inner.path()
    }

    // === Branch operations ===

    /// Get the commit SHA for a branch.
    ///
    /// # Errors
    /// Returns error if branch doesn't exist.
    pub fn branch_commit(&self, branch_name: &str) -> Result<Oid> {
        let branch = self
            .inner
            .find_branch(branch_name, BranchType::Local)
            .map_err(|_| Error::BranchNotFound(branch_name.into()))?;

        branch
            .get()
            .target()
            .ok_or_else(|| Error::BranchNotFound(branch_name.into()))
    }

    /// Resolve any ref name to the commit it points at.
    ///
    /// # Errors
    /// Returns error if the ref doesn't exist.
    pub fn resolve_ref(&self, refname: &str) -> Result<Oid> {
        let reference = self
            .inner
            .find_reference(refname)
            .map_err(|_| Error::RefNotFound(refname.into()))?;
        let commit = reference.peel_to_commit()?;
        Ok(commit.id())
    }

    /// List all local branches with their tips.
    ///
    /// Symbolic or unborn branches are skipped.
    ///
    /// # Errors
    /// Returns error if branch listing fails.
    pub fn list_branches(&self) -> Result<Vec<BranchRef>> {
        let mut refs = Vec::new();
        for entry in self.inner.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            let Some(name) = branch.name()?.map(String::from) else {
                continue;
            };
            if let Some(target) = branch.get().target() {
                refs.push(BranchRef { name, target });
            }
        }
        Ok(refs)
    }

    /// Check if a branch exists.
    #[must_use]
    pub fn branch_exists(&self, name: &str) -> bool {
        self.inner.find_branch(name, BranchType::Local).is_ok()
    }

    // === Commit graph ===

    /// Read commit metadata.
    ///
    /// # Errors
    /// Returns error if commit not found.
    pub fn commit_info(&self, oid: Oid) -> Result<CommitInfo> {
        let commit = self.inner.find_commit(oid)?;
        let time = commit.time();
        Ok(CommitInfo {
            id: oid,
            summary: commit.summary().unwrap_or_default().to_string(),
            message: commit.message().unwrap_or_default().to_string(),
            author: Identity::from_signature(&commit.author()),
            time: GitTime {
                seconds: time.seconds(),
                offset_minutes: time.offset_minutes(),
            },
            tree: commit.tree_id(),
            parents: commit.parent_ids().collect(),
        })
    }

    /// Get the merge base between two commits, `None` for unrelated histories.
    ///
    /// # Errors
    /// Returns error if merge base calculation fails.
    pub fn merge_base(&self, one: Oid, two: Oid) -> Result<Option<Oid>> {
        match self.inner.merge_base(one, two) {
            Ok(base) => Ok(Some(base)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if `ancestor` is reachable from (or equal to) `descendant`.
    ///
    /// # Errors
    /// Returns error if the graph walk fails.
    pub fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.inner.graph_descendant_of(descendant, ancestor)?)
    }

    /// Count commits unique to `head` and unique to `base`.
    ///
    /// # Errors
    /// Returns error if the graph walk fails.
    pub fn ahead_behind(&self, head: Oid, base: Oid) -> Result<(usize, usize)> {
        Ok(self.inner.graph_ahead_behind(head, base)?)
    }

    /// Commits reachable from `to` but not from `from`, oldest first.
    ///
    /// # Errors
    /// Returns error if revwalk fails.
    pub fn commits_between(&self, from: Oid, to: Oid) -> Result<Vec<Oid>> {
        let mut revwalk = self.inner.revwalk()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;
        revwalk.push(to)?;
        revwalk.hide(from)?;

        revwalk.map(|oid| oid.map_err(Error::from)).collect()
    }

    /// Paths whose content differs between the trees of `from` and `to`.
    ///
    /// Renames show up as the old and the new path.
    ///
    /// # Errors
    /// Returns error if either commit can't be read or diffed.
    pub fn changed_files(&self, from: Oid, to: Oid) -> Result<Vec<String>> {
        let old_tree = self.inner.find_commit(from)?.tree()?;
        let new_tree = self.inner.find_commit(to)?.tree()?;
        let diff = self
            .inner
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;

        let mut paths = Vec::new();
        for delta in diff.deltas() {
            for file in [delta.old_file(), delta.new_file()] {
                if let Some(path) = file.path().and_then(Path::to_str)
                    && !paths.iter().any(|p| p == path)
                {
                    paths.push(path.to_string());
                }
            }
        }
        Ok(paths)
    }

    // === Ref updates ===

    /// Point `refname` at `target`.
    ///
    /// With `expected = Some(old)` the update only happens if the ref still
    /// points at `old`; with `None` the ref must not exist yet.
    ///
    /// # Errors
    /// Returns [`Error::RefChanged`] or [`Error::RefExists`] when the
    /// precondition doesn't hold.
    pub fn update_ref(
        &self,
        refname: &str,
        target: Oid,
        expected: Option<Oid>,
        log_message: &str,
    ) -> Result<()> {
        let result = match expected {
            Some(old) => self
                .inner
                .reference_matching(refname, target, true, old, log_message)
                .map(|_| ()),
            None => self
                .inner
                .reference(refname, target, false, log_message)
                .map(|_| ()),
        };

        result.map_err(|e| match (e.code(), expected) {
            (ErrorCode::Modified | ErrorCode::NotFound, Some(old)) => Error::RefChanged {
                name: refname.to_string(),
                expected: old.to_string(),
            },
            (ErrorCode::Exists, None) => Error::RefExists(refname.to_string()),
            _ => Error::Git2(e),
        })
    }

    /// Force `refname` to `target` regardless of its current value.
    ///
    /// # Errors
    /// Returns error if the ref can't be written.
    pub fn force_ref(&self, refname: &str, target: Oid, log_message: &str) -> Result<()> {
        self.inner.reference(refname, target, true, log_message)?;
        Ok(())
    }

    /// Delete a local branch, optionally only if it still points at `expected`.
    ///
    /// # Errors
    /// Returns error if the branch is missing or has moved.
    pub fn delete_branch(&self, name: &str, expected: Option<Oid>) -> Result<()> {
        let refname = crate::branch_ref(name);
        let mut reference = self
            .inner
            .find_reference(&refname)
            .map_err(|_| Error::BranchNotFound(name.into()))?;

        if let Some(old) = expected {
            if reference.target() != Some(old) {
                return Err(Error::RefChanged {
                    name: refname,
                    expected: old.to_string(),
                });
            }
        }

        reference.delete()?;
        Ok(())
    }

    /// Copy `src_ref` from the repository at `source` into `dst_ref` here.
    ///
    /// Used to bring a fork's head branch into the base repository.
    ///
    /// # Errors
    /// Returns error if the fetch fails or the ref is missing afterwards.
    pub fn fetch_ref(&self, source: &Path, src_ref: &str, dst_ref: &str) -> Result<Oid> {
        let url = source
            .to_str()
            .ok_or_else(|| Error::FetchFailed(format!("non-utf8 path {}", source.display())))?;
        let refspec = format!("+{src_ref}:{dst_ref}");

        let mut remote = self.inner.remote_anonymous(url)?;
        remote
            .fetch(&[refspec.as_str()], None, None)
            .map_err(|e| Error::FetchFailed(format!("{src_ref} from {url}: {}", e.message())))?;

        self.resolve_ref(dst_ref)
    }

    // === Low-level access ===

    /// Get a reference to the underlying git2 repository.
    ///
    /// Use sparingly - prefer high-level methods.
    #[must_use]
    pub const fn inner(&self) -> &git2::Repository {
        &self.inner
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.git_dir())
            .finish()
    }
}
