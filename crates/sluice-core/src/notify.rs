//! Callbacks consumed by webhook and CI dispatch.
//!
//! The core never delivers events itself; it calls a [`Notifier`] after the
//! fact. [`DedupNotifier`] drops repeated open/synchronize events for the
//! same pull request and head commit.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::pull::{PullId, PullRequest};
use crate::repo::{Repo, RepoId, User};

/// Receives events after the core has changed state.
///
/// Every method defaults to doing nothing.
pub trait Notifier: Send + Sync {
    /// A branch ref was removed.
    fn branch_deleted(&self, _repo: &Repo, _branch: &str, _doer: &User) {}

    /// A pull request was opened.
    fn pull_opened(&self, _pr: &PullRequest, _doer: &User) {}

    /// New commits landed on a pull request's head.
    fn pull_synchronized(&self, _pr: &PullRequest, _pusher: &User) {}

    /// A pull request was merged.
    fn pull_merged(&self, _pr: &PullRequest, _doer: &User) {}

    /// A pull request's base branch was changed.
    fn pull_retargeted(&self, _pr: &PullRequest, _old_base: &str, _doer: &User) {}

    /// A pull request was closed without merging.
    fn pull_closed(&self, _pr: &PullRequest, _doer: &User) {}
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}

/// Event kinds sharing one de-duplication slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// `opened` and `synchronized` both announce a new head.
    HeadUpdated,
}

type TriggerKey = (RepoId, PullId, TriggerKind, String);

/// Remembers recently fired triggers for a fixed time window.
#[derive(Debug)]
pub struct TriggerGuard {
    ttl: Duration,
    seen: Mutex<HashMap<TriggerKey, DateTime<Utc>>>,
}

impl TriggerGuard {
    /// Guard with a window of `ttl_secs` seconds.
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record a trigger; `false` when the same key fired within the window.
    pub fn first_within_window(
        &self,
        repo_id: RepoId,
        pull_id: PullId,
        kind: TriggerKind,
        sha: &str,
    ) -> bool {
        self.first_at((repo_id, pull_id, kind, sha.to_string()), Utc::now())
    }

    fn first_at(&self, key: TriggerKey, now: DateTime<Utc>) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        seen.retain(|_, fired| now - *fired < self.ttl);

        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }
}

/// Forwards events to an inner notifier, dropping duplicate head updates.
#[derive(Debug)]
pub struct DedupNotifier<N> {
    inner: N,
    guard: TriggerGuard,
}

impl<N: Notifier> DedupNotifier<N> {
    /// Wrap `inner` with a `ttl_secs` window.
    #[must_use]
    pub fn new(inner: N, ttl_secs: u64) -> Self {
        Self {
            inner,
            guard: TriggerGuard::new(ttl_secs),
        }
    }

    /// The wrapped notifier.
    #[must_use]
    pub const fn inner(&self) -> &N {
        &self.inner
    }

    fn head_is_new(&self, pr: &PullRequest) -> bool {
        let Some(sha) = pr.head_commit_id.as_deref() else {
            return true;
        };
        let fresh = self
            .guard
            .first_within_window(pr.base_repo_id, pr.id, TriggerKind::HeadUpdated, sha);
        if !fresh {
            tracing::debug!(pull = pr.id, sha, "dropping duplicate head update event");
        }
        fresh
    }
}

impl<N: Notifier> Notifier for DedupNotifier<N> {
    fn branch_deleted(&self, repo: &Repo, branch: &str, doer: &User) {
        self.inner.branch_deleted(repo, branch, doer);
    }

    fn pull_opened(&self, pr: &PullRequest, doer: &User) {
        if self.head_is_new(pr) {
            self.inner.pull_opened(pr, doer);
        }
    }

    fn pull_synchronized(&self, pr: &PullRequest, pusher: &User) {
        if self.head_is_new(pr) {
            self.inner.pull_synchronized(pr, pusher);
        }
    }

    fn pull_merged(&self, pr: &PullRequest, doer: &User) {
        self.inner.pull_merged(pr, doer);
    }

    fn pull_retargeted(&self, pr: &PullRequest, old_base: &str, doer: &User) {
        self.inner.pull_retargeted(pr, old_base, doer);
    }

    fn pull_closed(&self, pr: &PullRequest, doer: &User) {
        self.inner.pull_closed(pr, doer);
    }
}
