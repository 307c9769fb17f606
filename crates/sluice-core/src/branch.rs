//! Branch index rows and branch protection rules.

use chrono::{DateTime, TimeZone, Utc};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use sluice_git::CommitInfo;

use crate::error::{Error, Result};
use crate::repo::{RepoId, User, UserId};

/// Indexed copy of a git branch.
///
/// Rows are soft-deleted when the ref disappears so the history stays
/// available to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Owning repository.
    pub repo_id: RepoId,
    /// Short branch name.
    pub name: String,
    /// Tip commit, kept after deletion.
    pub commit_id: String,
    /// Summary line of the tip commit.
    pub commit_message: String,
    /// Committer time of the tip commit.
    pub commit_time: DateTime<Utc>,
    /// Last user seen updating the branch.
    pub pusher_id: UserId,
    /// Set when the ref no longer exists.
    #[serde(default)]
    pub is_deleted: bool,
    /// Who removed the branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by_id: Option<UserId>,
    /// When the branch was removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Branch {
    /// Live row for `name` pointing at `commit`.
    #[must_use]
    pub fn from_commit(repo_id: RepoId, name: &str, commit: &CommitInfo, pusher_id: UserId) -> Self {
        Self {
            repo_id,
            name: name.to_string(),
            commit_id: commit.id.to_string(),
            commit_message: commit.summary.clone(),
            commit_time: Utc
                .timestamp_opt(commit.time.seconds, 0)
                .single()
                .unwrap_or_default(),
            pusher_id,
            is_deleted: false,
            deleted_by_id: None,
            deleted_at: None,
        }
    }
}

/// A protection rule applying to every branch its name matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProtectedBranch {
    /// Repository the rule belongs to.
    pub repo_id: RepoId,
    /// Exact branch name or glob over branch names.
    pub rule_name: String,

    /// Allow pushes at all.
    #[serde(default)]
    pub enable_push: bool,
    /// Restrict pushes to the allowlist below.
    #[serde(default)]
    pub enable_push_allowlist: bool,
    /// Users allowed to push when the push allowlist is on.
    #[serde(default)]
    pub push_allowlist_user_ids: Vec<UserId>,

    /// Restrict merges to the allowlist below.
    #[serde(default)]
    pub enable_merge_allowlist: bool,
    /// Users allowed to merge when the merge allowlist is on.
    #[serde(default)]
    pub merge_allowlist_user_ids: Vec<UserId>,

    /// Require status checks to pass before merging.
    #[serde(default)]
    pub enable_status_check: bool,
    /// Status contexts (globs) that must be successful.
    #[serde(default)]
    pub status_check_contexts: Vec<String>,

    /// Approving reviews required before merging.
    #[serde(default)]
    pub required_approvals: u32,
    /// Block merging while an official reviewer requests changes.
    #[serde(default)]
    pub block_on_rejected_reviews: bool,
    /// Block merging while the base has commits the head lacks.
    #[serde(default)]
    pub block_on_outdated_branch: bool,
    /// Apply the merge gates to administrators too.
    #[serde(default)]
    pub apply_to_admins: bool,
    /// Path globs nobody may change through a push or a merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protected_file_patterns: Vec<String>,
}

impl ProtectedBranch {
    /// A rule with every gate switched off and pushes disallowed.
    #[must_use]
    pub fn new(repo_id: RepoId, rule_name: impl Into<String>) -> Self {
        Self {
            repo_id,
            rule_name: rule_name.into(),
            enable_push: false,
            enable_push_allowlist: false,
            push_allowlist_user_ids: Vec::new(),
            enable_merge_allowlist: false,
            merge_allowlist_user_ids: Vec::new(),
            enable_status_check: false,
            status_check_contexts: Vec::new(),
            required_approvals: 0,
            block_on_rejected_reviews: false,
            block_on_outdated_branch: false,
            apply_to_admins: false,
            protected_file_patterns: Vec::new(),
        }
    }

    /// Whether the rule name contains glob metacharacters.
    #[must_use]
    pub fn is_glob(&self) -> bool {
        self.rule_name.contains(['*', '?', '['])
    }

    /// Check the rule name compiles.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRulePattern`] for an empty or malformed glob.
    pub fn validate(&self) -> Result<()> {
        if self.rule_name.trim().is_empty() {
            return Err(Error::InvalidRulePattern(self.rule_name.clone()));
        }
        if self.is_glob() {
            Pattern::new(&self.rule_name)
                .map_err(|_| Error::InvalidRulePattern(self.rule_name.clone()))?;
        }
        for pattern in &self.protected_file_patterns {
            if pattern.trim().is_empty() || Pattern::new(pattern).is_err() {
                return Err(Error::InvalidRulePattern(pattern.clone()));
            }
        }
        Ok(())
    }

    /// Whether this rule covers `branch`.
    #[must_use]
    pub fn matches(&self, branch: &str) -> bool {
        if !self.is_glob() {
            return self.rule_name == branch;
        }
        Pattern::new(&self.rule_name)
            .is_ok_and(|pattern| pattern.matches_with(branch, match_options()))
    }

    /// Whether the merge gates bind `user`.
    #[must_use]
    pub const fn gates_apply_to(&self, user: &User) -> bool {
        !user.is_admin || self.apply_to_admins
    }

    /// Whether `user` may push to a branch under this rule.
    #[must_use]
    pub fn can_push(&self, user: &User) -> bool {
        if !self.gates_apply_to(user) {
            return true;
        }
        if !self.enable_push {
            return false;
        }
        !self.enable_push_allowlist || self.push_allowlist_user_ids.contains(&user.id)
    }

    /// Whether `user_id` passes the merge allowlist.
    #[must_use]
    pub fn can_merge(&self, user_id: UserId) -> bool {
        !self.enable_merge_allowlist || self.merge_allowlist_user_ids.contains(&user_id)
    }

    /// Reason a push by `user` is refused, if it is.
    #[must_use]
    pub fn push_rejection(&self, user: &User) -> Option<&'static str> {
        if self.can_push(user) {
            return None;
        }
        if self.enable_push {
            Some("user is not on the push allowlist")
        } else {
            Some("pushes are disabled for this branch")
        }
    }

    /// The paths in `files` matched by a protected file pattern.
    ///
    /// Matching ignores case; `*` stops at `/`.
    #[must_use]
    pub fn protected_files<'a>(&self, files: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let patterns: Vec<Pattern> = self
            .protected_file_patterns
            .iter()
            .filter_map(|p| Pattern::new(&p.to_lowercase()).ok())
            .collect();
        if patterns.is_empty() {
            return Vec::new();
        }
        files
            .into_iter()
            .filter(|file| {
                let file = file.to_lowercase();
                patterns
                    .iter()
                    .any(|p| p.matches_with(&file, match_options()))
            })
            .map(str::to_string)
            .collect()
    }

    /// Whether a status context is one of the required ones.
    #[must_use]
    pub fn requires_context(&self, context: &str) -> bool {
        self.status_check_contexts
            .iter()
            .any(|required| context_matches(required, context))
    }
}

/// Whether a status context matches a required-context glob.
#[must_use]
pub fn context_matches(pattern: &str, context: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|pattern| pattern.matches_with(context, match_options()))
}

const fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// The rule protecting `branch`.
///
/// An exact-name rule wins over any glob; among globs the first stored wins.
#[must_use]
pub fn find_matching_rule<'a>(
    rules: &'a [ProtectedBranch],
    branch: &str,
) -> Option<&'a ProtectedBranch> {
    rules
        .iter()
        .find(|rule| !rule.is_glob() && rule.rule_name == branch)
        .or_else(|| rules.iter().find(|rule| rule.is_glob() && rule.matches(branch)))
}
