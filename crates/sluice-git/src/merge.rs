//! In-memory merges and commit writes.
//!
//! Nothing here touches a working tree: merges produce an in-memory index
//! which is either written out as a tree or inspected for conflicts.

use std::collections::HashSet;

use git2::{Index, MergeOptions, Oid};

use crate::Repository;
use crate::error::Result;
use crate::repository::Identity;

/// Outcome of a three-way merge computed in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTree {
    /// Resulting tree, present only when the merge is clean.
    pub tree: Option<Oid>,
    /// Paths left in conflict, in the order the merge reported them.
    pub conflicts: Vec<String>,
}

impl MergeTree {
    /// Whether the merge completed without conflicts.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// A commit to be written to the object database.
#[derive(Debug, Clone)]
pub struct NewCommit {
    /// Tree the commit records.
    pub tree: Oid,
    /// Parents, first parent first.
    pub parents: Vec<Oid>,
    /// Full commit message.
    pub message: String,
    /// Author identity.
    pub author: Identity,
    /// Committer identity.
    pub committer: Identity,
}

impl Repository {
    /// Three-way merge of two commits using their merge base.
    ///
    /// # Errors
    /// Returns error if the merge can't be computed or the tree can't be written.
    pub fn merge_tree(&self, ours: Oid, theirs: Oid) -> Result<MergeTree> {
        let repo = self.inner();
        let ours = repo.find_commit(ours)?;
        let theirs = repo.find_commit(theirs)?;

        let mut index = repo.merge_commits(&ours, &theirs, Some(&merge_options()))?;
        self.finish_merge(&mut index)
    }

    /// Apply the changes `commit` introduced relative to its first parent on top of `onto`.
    ///
    /// # Errors
    /// Returns error if the cherry-pick can't be computed.
    pub fn cherry_pick(&self, commit: Oid, onto: Oid) -> Result<MergeTree> {
        let repo = self.inner();
        let commit = repo.find_commit(commit)?;
        let onto = repo.find_commit(onto)?;

        let mainline = u32::from(commit.parent_count() > 1);
        let mut index = repo.cherrypick_commit(&commit, &onto, mainline, Some(&merge_options()))?;
        self.finish_merge(&mut index)
    }

    /// Write a commit object without moving any ref.
    ///
    /// # Errors
    /// Returns error if the tree or a parent is missing.
    pub fn write_commit(&self, commit: &NewCommit) -> Result<Oid> {
        let repo = self.inner();
        let tree = repo.find_tree(commit.tree)?;
        let parents = commit
            .parents
            .iter()
            .map(|oid| repo.find_commit(*oid))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let author = commit.author.to_signature()?;
        let committer = commit.committer.to_signature()?;

        Ok(repo.commit(
            None,
            &author,
            &committer,
            &commit.message,
            &tree,
            &parent_refs,
        )?)
    }

    fn finish_merge(&self, index: &mut Index) -> Result<MergeTree> {
        if index.has_conflicts() {
            return Ok(MergeTree {
                tree: None,
                conflicts: conflicted_paths(index)?,
            });
        }

        let tree = index.write_tree_to(self.inner())?;
        Ok(MergeTree {
            tree: Some(tree),
            conflicts: Vec::new(),
        })
    }
}

fn merge_options() -> MergeOptions {
    let mut opts = MergeOptions::new();
    opts.find_renames(true);
    opts.fail_on_conflict(false);
    opts
}

fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());

        if let Some(entry) = entry {
            let path = String::from_utf8_lossy(&entry.path).into_owned();
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    Ok(paths)
}
