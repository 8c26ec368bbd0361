use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::package::PackageError;
use crate::scm::git::ProcessError;
use crate::scm::revision::ResolveError;

/// Errors from syncing one component.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The revision could not be interpreted or does not exist.
    #[error(transparent)]
    Resolution(#[from] ResolveError),
    /// A git command failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Non-fast-forward update or failed replay; the checkout was restored.
    #[error("{message}")]
    Conflict {
        message: String,
        target: String,
        commit: Option<String>,
        #[source]
        source: Option<ProcessError>,
    },
    /// The checkout has local changes where a clean tree is required.
    #[error("{0}")]
    UncommittedChanges(String),
    /// A git command failed while a lock file was present.
    #[error(
        "\n____ {relpath} is locked\n\tYour repo is locked, possibly due to a concurrent git process.\n\tIf no git executable is running, remove {} and try again.\n{source}",
        .path.display()
    )]
    Lock {
        relpath: String,
        path: PathBuf,
        source: ProcessError,
    },
    /// The requested operation cannot work with this checkout.
    #[error("{0}")]
    Configuration(String),
    /// The user chose to quit.
    #[error("{0}")]
    Aborted(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether retrying after manual intervention can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::UncommittedChanges(_))
    }

    /// The failed git command behind this error, if any.
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            Self::Process(e) => Some(e),
            Self::Conflict { source, .. } => source.as_ref(),
            Self::Lock { source, .. } => Some(source),
            Self::Cache(CacheError::Git(e)) => Some(e),
            _ => None,
        }
    }
}
