//! Error type shared by the application services.

use anyhow::Error;

/// Errors surfaced by the writer, the query composer, the extractor and the filter repository.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// A domain rule refused the operation.
    #[error(transparent)]
    Domain(#[from] tack_core::Error),
    /// Backing store or collaborator returned an error.
    #[error("store error: {0}")]
    Store(#[from] Error),
}

impl ServiceError {
    /// Wrap a store-specific error.
    pub fn store(err: impl Into<Error>) -> Self {
        Self::Store(err.into())
    }

    /// Domain error, if this is one.
    #[must_use]
    pub const fn domain(&self) -> Option<&tack_core::Error> {
        match self {
            Self::Domain(err) => Some(err),
            Self::Store(_) => None,
        }
    }

    /// Returns true for a domain `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.domain().is_some_and(tack_core::Error::is_not_found)
    }

    /// Returns true for a domain `Conflict`.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.domain().is_some_and(tack_core::Error::is_conflict)
    }
}

/// Result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
