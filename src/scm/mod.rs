//! Git working copies: revision resolution, updates and patches.

pub mod git;
pub mod locks;
pub mod patch;
pub mod prompt;
pub mod revision;
pub mod working_copy;

#[cfg(test)]
pub(crate) mod fixtures;

pub use git::{Git, GitCli, ProcessError};
pub use patch::PatchRequest;
pub use revision::{ResolveError, RevisionSpec};
pub use working_copy::{UpdateAction, UpdateResult, WorkingCopy, WorkingCopyUpdater};
