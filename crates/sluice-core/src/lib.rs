//! # sluice-core
//!
//! Core library for Sluice: keeps a persisted index of branches in step
//! with the git ref store, decides whether pull requests can be merged,
//! and merges them with one of five strategies.
//!
//! The moving parts, leaves first:
//!
//! - [`store`]: persisted rows (repos, users, branches, protection rules,
//!   issues and pull requests) behind small CRUD traits.
//! - [`sync::BranchSyncer`]: reconciles the branch index with git refs and
//!   applies individual pushes.
//! - [`conflict::ConflictDetector`]: conflicts, unrelated histories,
//!   fast-forward checks and ahead/behind counts for a commit pair.
//! - [`checker::MergeChecker`]: pull request state machine and the
//!   mergeability verdict.
//! - [`merge::MergeExecutor`]: the merge strategies.
//! - [`retarget::PullRetargeter`]: what happens to dependent pull requests
//!   when a branch goes away.
//! - [`automerge::AutoMerger`]: merges scheduled to run once gates pass.
//! - [`update::PullUpdater`]: brings a head branch up to date with its base.

pub mod automerge;
pub mod branch;
pub mod checker;
pub mod config;
pub mod conflict;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod notify;
pub mod providers;
pub mod pull;
pub mod repo;
pub mod retarget;
pub mod services;
pub mod store;
pub mod sync;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use automerge::{AutoMerger, ScheduleOutcome};
pub use branch::{Branch, ProtectedBranch, find_matching_rule};
pub use checker::{Blocker, MergeChecker, Verdict};
pub use config::Config;
pub use conflict::{ConflictCheck, ConflictDetector, Divergence};
pub use error::{Error, Result};
pub use lifecycle::{OpenPull, PullLifecycle};
pub use merge::{MergeExecutor, MergeOutcome};
pub use notify::{DedupNotifier, NoopNotifier, Notifier, TriggerGuard};
pub use providers::{
    CheckState, CommitStatus, Review, ReviewKind, ReviewProvider, ReviewSummary,
    StatusCheckProvider,
};
pub use pull::{
    AutoMerge, ConflictReport, Issue, IssueId, MergeRecord, MergeStyle, PullId, PullRequest,
    PullRequestStatus, StatusKind, UpdateStyle,
};
pub use repo::{DiskBackend, GitBackend, Repo, RepoId, User, UserId};
pub use retarget::{PullRetargeter, RetargetOutcome};
pub use services::Services;
pub use store::{
    AutoMergeStore, BranchIndex, JsonStore, ProtectionStore, PullStore, RepoStore, Store,
    UserStore,
};
pub use sync::{BranchSyncer, PushOutcome, PushUpdate, SyncOutcome, SyncSummary};
pub use update::{PullUpdater, UpdateOutcome};
