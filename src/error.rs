//! Error types for the request cache

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for the request cache
pub type Result<T> = std::result::Result<T, Error>;

/// Request cache errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The fetcher failed; every waiter of the same computation gets the same error
    #[error("Fetch failed: {0}")]
    Fetch(SharedFetchError),

    /// The key holds a value of a different type than the caller asked for
    #[error("Type mismatch for key {key}: expected {expected}")]
    TypeMismatch {
        /// Cache key
        key: String,
        /// Requested type name
        expected: &'static str,
    },

    /// The computation ended without producing a result (the fetcher panicked)
    #[error("Computation abandoned: {0}")]
    Abandoned(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),
}

impl Error {
    /// Return the shared fetcher error, if this is a fetch failure
    #[must_use]
    pub fn fetch_error(&self) -> Option<&SharedFetchError> {
        match self {
            Self::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

/// A fetcher error shared between all waiters of one computation.
///
/// Cloning is cheap and preserves identity: clones compare equal with
/// [`SharedFetchError::same_as`].
#[derive(Clone)]
pub struct SharedFetchError(Arc<anyhow::Error>);

impl SharedFetchError {
    pub(crate) fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// The error returned by the fetcher
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Return `true` when both handles point at the same fetcher failure
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for SharedFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for SharedFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for SharedFetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}
