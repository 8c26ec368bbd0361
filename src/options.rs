//! Options controlling how a component is synced.

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Knobs for one sync run.
///
/// Deserialized from the manifest's `options` table with every field
/// optional; command line flags are layered on top.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncOptions {
    /// Revision override; `unmanaged` leaves the checkout alone.
    pub revision: Option<String>,
    /// Prune deleted remote branches and discard local modifications.
    pub force: bool,
    /// Discard local modifications and hard-reset diverged branches.
    pub reset: bool,
    /// Merge instead of rebasing when a branch cannot be fast-forwarded.
    pub merge: bool,
    /// Rebase without asking when a branch cannot be fast-forwarded.
    pub auto_rebase: bool,
    /// Remove stale `*.lock` files before touching a checkout.
    pub break_repo_locks: bool,
    /// With `reset`, also remove untracked directories.
    pub delete_unversioned_trees: bool,
    /// Patches to apply after syncing.
    pub patch_refs: Vec<PatchSpec>,
    /// Rebase patch commits from their merge base onto the checkout.
    pub rebase_patch_ref: bool,
    /// Soft-reset to the synced revision after applying a patch.
    pub reset_patch_ref: bool,
    /// Number of components synced in parallel.
    pub jobs: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            revision: None,
            force: false,
            reset: false,
            merge: false,
            auto_rebase: false,
            break_repo_locks: false,
            delete_unversioned_trees: false,
            patch_refs: Vec::new(),
            rebase_patch_ref: true,
            reset_patch_ref: true,
            jobs: 1,
        }
    }
}

/// Error parsing a `--patch-ref` argument.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid patch ref {0:?}: expected <repo>@<target-ref>:<patch-ref>")]
pub struct PatchSpecError(String);

/// A patch to apply on top of one component, `<repo>@<target-ref>:<patch-ref>`.
///
/// `repo` names the component by URL or path and is also where the patch
/// ref is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchSpec {
    pub repo: String,
    pub target_ref: String,
    pub patch_ref: String,
}

impl FromStr for PatchSpec {
    type Err = PatchSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PatchSpecError(s.to_string());
        // Split on the last '@' so scp-like repos keep their user part.
        let (repo, refs) = s.rsplit_once('@').ok_or_else(err)?;
        let (target_ref, patch_ref) = refs.split_once(':').ok_or_else(err)?;
        if repo.is_empty() || target_ref.is_empty() || patch_ref.is_empty() {
            return Err(err());
        }
        Ok(Self {
            repo: repo.to_string(),
            target_ref: target_ref.to_string(),
            patch_ref: patch_ref.to_string(),
        })
    }
}
