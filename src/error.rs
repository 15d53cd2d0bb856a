use std::path::PathBuf;

use thiserror::Error;

use crate::version::ReleaseVersion;

pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Broad classification of a failure, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Precondition,
    Resolution,
    Conflict,
    Publish,
    Delegate,
    Internal,
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("{0}")]
    Usage(String),

    #[error("missing {0} (required before any release step)")]
    MissingCredential(&'static str),

    #[error("resume directory not found: {}", .0.display())]
    ResumeDirMissing(PathBuf),

    #[error("resume directory {} belongs to {field} {recorded}, not {requested}", .dir.display())]
    ResumeMismatch {
        dir: PathBuf,
        field: &'static str,
        recorded: String,
        requested: String,
    },

    #[error("invalid version format: {0:?} (expected vYYYYMMDD.N)")]
    InvalidVersionFormat(String),

    #[error("failed to resolve {target}")]
    CommitResolutionFailed {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to resolve release version")]
    VersionResolutionFailed(#[source] anyhow::Error),

    #[error("version {version} already exists in the TUF repository")]
    AlreadyReleased { version: ReleaseVersion },

    #[error("tag {version} already exists at {existing} (requested {requested})")]
    VersionAlreadyExists {
        version: ReleaseVersion,
        existing: String,
        requested: String,
    },

    #[error("failed to publish tag {version} to {store}")]
    TagPublishFailed {
        version: ReleaseVersion,
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("component release failed")]
    DelegateFailed(#[source] anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ReleaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReleaseError::Usage(_) | ReleaseError::InvalidVersionFormat(_) => ErrorKind::Usage,
            ReleaseError::MissingCredential(_)
            | ReleaseError::ResumeDirMissing(_)
            | ReleaseError::ResumeMismatch { .. } => ErrorKind::Precondition,
            ReleaseError::CommitResolutionFailed { .. }
            | ReleaseError::VersionResolutionFailed(_) => ErrorKind::Resolution,
            ReleaseError::AlreadyReleased { .. } | ReleaseError::VersionAlreadyExists { .. } => {
                ErrorKind::Conflict
            }
            ReleaseError::TagPublishFailed { .. } => ErrorKind::Publish,
            ReleaseError::DelegateFailed(_) => ErrorKind::Delegate,
            ReleaseError::Internal(_) => ErrorKind::Internal,
        }
    }
}
