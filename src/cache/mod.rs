//! Shared mirror cache.
//!
//! Working copies of the same URL fetch through one bare mirror per URL so
//! objects cross the network once. See [`MirrorCache`] for the layout.

mod lock;
mod mirror;
mod paths;

use std::path::PathBuf;

use thiserror::Error;

use crate::scm::git::ProcessError;

pub use lock::MirrorLock;
pub use mirror::Mirror;
pub use paths::{MirrorCache, url_to_cache_name};

/// Errors from mirror cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A git command failed inside the mirror.
    #[error("mirror git command failed: {0}")]
    Git(#[from] ProcessError),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Another process held the mirror lock for too long.
    #[error("timed out waiting for mirror lock {}", .0.display())]
    LockFailed(PathBuf),
}
