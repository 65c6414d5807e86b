//! Shared error types for the services crate.

use thiserror::Error;

use lms_core::CatalogError;
use lms_core::model::{CurriculumVersion, ExerciseId, IdError};
use storage::StorageError;

/// Network-side failures. These are retried or absorbed; they never end a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("server did not acknowledge the write")]
    Rejected,
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err)
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogLoadError {
    #[error("curriculum version {0} not found")]
    VersionNotFound(CurriculumVersion),
    #[error("exercise {id} not found in {version}")]
    ExerciseNotFound {
        version: CurriculumVersion,
        id: ExerciseId,
    },
    #[error(transparent)]
    Invalid(#[from] CatalogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Validation failures from `ProgressReconciler` operations.
///
/// These are reported before anything is mutated or written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("no user session is active")]
    NoSession,
    #[error("no exercise catalog is loaded")]
    CatalogNotLoaded,
    #[error("exercise {0} is not in the active catalog")]
    UnknownExercise(ExerciseId),
    #[error("catalog is for {catalog}, session is on {session}")]
    VersionMismatch {
        session: CurriculumVersion,
        catalog: CurriculumVersion,
    },
}

/// Errors emitted by `IdentityService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    #[error(transparent)]
    InvalidUserId(#[from] IdError),
}

/// Errors raised while reading client configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid {name}: {raw:?}")]
    InvalidNumber { name: &'static str, raw: String },
    #[error(transparent)]
    InvalidVersion(#[from] IdError),
}

/// Errors emitted by `LearningSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
