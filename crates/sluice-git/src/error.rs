//! Error types for sluice-git.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during git operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No repository at the given path.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// Branch not found.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Reference not found.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// A compare-and-swap ref update lost a race.
    #[error("reference {name} moved concurrently (expected {expected})")]
    RefChanged {
        /// Full ref name.
        name: String,
        /// The value the caller expected the ref to have.
        expected: String,
    },

    /// A ref that must not exist already exists.
    #[error("reference already exists: {0}")]
    RefExists(String),

    /// String is not a valid object id.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// Fetch from another repository failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Underlying git2 error.
    #[error("git error: {0}")]
    Git2(#[from] git2::Error),
}

impl Error {
    /// Whether this error means a ref was updated underneath us.
    #[must_use]
    pub const fn is_ref_changed(&self) -> bool {
        matches!(self, Self::RefChanged { .. })
    }
}
