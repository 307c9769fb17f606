//! Shared handles passed to every component.

use std::sync::Arc;

use crate::config::Config;
use crate::notify::{NoopNotifier, Notifier};
use crate::providers::{ReviewProvider, StatusCheckProvider};
use crate::repo::{DiskBackend, GitBackend};
use crate::store::{JsonStore, Store};

/// The collaborators a component needs, cheap to clone.
#[derive(Clone)]
pub struct Services {
    /// Persisted rows.
    pub store: Arc<dyn Store>,
    /// Git storage.
    pub git: Arc<dyn GitBackend>,
    /// Review counts.
    pub reviews: Arc<dyn ReviewProvider>,
    /// Commit statuses.
    pub statuses: Arc<dyn StatusCheckProvider>,
    /// Event sink.
    pub notifier: Arc<dyn Notifier>,
    /// Read-only settings.
    pub config: Arc<Config>,
}

impl Services {
    /// Services over a JSON store, on-disk git and no event sink.
    #[must_use]
    pub fn new(store: Arc<JsonStore>, config: Config) -> Self {
        Self {
            store: store.clone(),
            git: Arc::new(DiskBackend),
            reviews: store.clone(),
            statuses: store,
            notifier: Arc::new(NoopNotifier),
            config: Arc::new(config),
        }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
