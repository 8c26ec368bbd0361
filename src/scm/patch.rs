//! Applying a patch ref on top of a synced checkout.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::options::SyncOptions;
use crate::output::Printer;
use crate::scm::git::{self, Git, ProcessError};
use crate::scm::revision::{self, ResolveError};
use crate::scm::working_copy::WorkingCopyUpdater;

/// One patch application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    /// Repository the patch ref is fetched from.
    pub patch_repo: String,
    /// Ref holding the patch, e.g. `refs/changes/35/1235/1`.
    pub patch_ref: String,
    /// Branch the patch was written against.
    pub target_ref: String,
    /// Replay only the patch's own commits instead of checking it out.
    pub rebase: bool,
    /// Move `HEAD` back to the synced revision, keeping the patch staged.
    pub soft_reset: bool,
}

impl PatchRequest {
    pub fn new(
        patch_repo: impl Into<String>,
        patch_ref: impl Into<String>,
        target_ref: impl Into<String>,
        options: &SyncOptions,
    ) -> Self {
        Self {
            patch_repo: patch_repo.into(),
            patch_ref: patch_ref.into(),
            target_ref: target_ref.into(),
            rebase: options.rebase_patch_ref,
            soft_reset: options.reset_patch_ref,
        }
    }
}

/// Why a replay stopped.
#[derive(Debug)]
pub(crate) enum ReplayError {
    /// `commit` does not apply on top of the commits replayed so far.
    Conflict { commit: String, error: ProcessError },
    /// Git failed for a reason unrelated to the commit's changes.
    Git(ProcessError),
}

impl ReplayError {
    pub(crate) fn into_sync_error(self, message: String, target: &str) -> SyncError {
        match self {
            Self::Conflict { commit, error } => SyncError::Conflict {
                message,
                target: target.to_string(),
                commit: Some(commit),
                source: Some(error),
            },
            Self::Git(error) => SyncError::Process(error),
        }
    }
}

/// Commits of `range` that `HEAD` does not already carry, oldest first.
///
/// A commit counts as carried when it is reachable from `HEAD` or when
/// `HEAD` has a commit with the same patch id, e.g. after an earlier replay.
pub(crate) fn unapplied_commits<G: Git + ?Sized>(
    git: &G,
    cwd: &Path,
    range: &str,
    tip: &str,
) -> Result<Vec<String>, ProcessError> {
    let in_range = git.capture(&["rev-list", "--reverse", "--no-merges", range], cwd)?;
    let symmetric = format!("HEAD...{tip}");
    let missing = git.capture(
        &["rev-list", "--cherry-pick", "--right-only", "--no-merges", &symmetric],
        cwd,
    )?;
    let missing: HashSet<&str> = missing.lines().collect();
    Ok(in_range
        .lines()
        .filter(|commit| !commit.is_empty() && missing.contains(commit))
        .map(String::from)
        .collect())
}

/// Re-create `commits` on top of `HEAD`, oldest first.
///
/// A commit whose changes turn out to be present already is skipped. On
/// failure the tree is left mid cherry-pick; callers reset it. Returns the
/// number of commits created.
pub(crate) fn replay_commits<G: Git + ?Sized>(
    git: &G,
    printer: &Printer,
    cwd: &Path,
    commits: &[String],
) -> Result<usize, ReplayError> {
    let mut created = 0;
    for commit in commits {
        git::run_logged(git, printer, &["cherry-pick", "--no-commit", commit], cwd).map_err(
            |error| ReplayError::Conflict {
                commit: commit.clone(),
                error,
            },
        )?;
        match git.run(&["diff", "--cached", "--quiet"], cwd) {
            Ok(_) => {
                printer.print(format!("Skipping {commit}: its changes are already applied"));
            }
            Err(e) if e.exited_with(1) => {
                git.run(&["commit", "--quiet", "--no-verify", "-C", commit], cwd)
                    .map_err(ReplayError::Git)?;
                created += 1;
            }
            Err(e) => return Err(ReplayError::Git(e)),
        }
    }
    Ok(created)
}

impl<G: Git> WorkingCopyUpdater<G> {
    /// Apply `patch_ref` from `patch_repo`, written against `target_ref`,
    /// using the patch settings in `options`.
    pub fn apply_patch_ref(
        &self,
        patch_repo: &str,
        patch_ref: &str,
        target_ref: &str,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<(), SyncError> {
        let request = PatchRequest::new(patch_repo, patch_ref, target_ref, options);
        self.apply_patch(&request, file_list)
    }

    /// Fetch and apply a patch on top of the current `HEAD`.
    ///
    /// With `rebase`, only the commits between the merge base of the patch
    /// and its target branch are replayed, so an old checkout does not pick
    /// up unrelated target history. On failure the checkout is reset to where
    /// it was.
    pub fn apply_patch(
        &self,
        request: &PatchRequest,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<(), SyncError> {
        let checkout = self.working_copy().checkout_path();

        // A previous run may have died mid cherry-pick.
        if let Err(e) = self.git().run(&["cherry-pick", "--abort"], &checkout) {
            log::debug!("no cherry-pick to abort: {}", e.stderr.trim());
        }

        let base_rev = self.revinfo()?;
        revision::validate_revision(&request.patch_ref)?;
        revision::validate_revision(&request.target_ref)?;
        let target = self.resolve_patch_target(&request.target_ref)?;

        let printer = self.printer();
        printer.print("===Applying patch===");
        printer.print(format!(
            "Revision to patch is {} @ {}.",
            request.patch_repo, request.patch_ref
        ));
        printer.print(format!("Current dir is {}", checkout.display()));

        self.run(&["reset", "--hard"])?;
        self.run(&["fetch", "--no-tags", &request.patch_repo, &request.patch_ref])?;
        let patch_rev = self.rev_parse("FETCH_HEAD")?;

        if request.rebase {
            self.replay_patch(request, &target, &patch_rev, &base_rev)?;
        } else {
            self.run(&["checkout", "--force", &patch_rev])?;
        }

        file_list.extend(self.diff_filenames(&base_rev)?);

        if request.soft_reset {
            self.run(&["reset", "--soft", &base_rev])?;
        }
        Ok(())
    }

    fn replay_patch(
        &self,
        request: &PatchRequest,
        target: &str,
        patch_rev: &str,
        base_rev: &str,
    ) -> Result<(), SyncError> {
        let merge_base = self.capture(&["merge-base", target, patch_rev])?;
        self.printer().print(format!(
            "Merge base of {} and {} is {}",
            request.target_ref, request.patch_ref, merge_base
        ));

        let checkout = self.working_copy().checkout_path();
        let range = format!("{merge_base}..{patch_rev}");
        let commits = unapplied_commits(self.git(), &checkout, &range, patch_rev)?;
        if commits.is_empty() {
            self.printer().print(format!(
                "{} has nothing on top of {} that is not already applied",
                request.patch_ref, request.target_ref
            ));
            return Ok(());
        }

        let Err(failure) = replay_commits(self.git(), self.printer(), &checkout, &commits) else {
            return Ok(());
        };

        let printer = self.printer();
        let culprit = match &failure {
            ReplayError::Conflict { commit, .. } => format!("Commit {commit} could not be applied."),
            ReplayError::Git(e) => format!("Git failed while replaying: {e}"),
        };
        printer.print(format!(
            "Failed to apply patch {} @ {}\n\
             Patch is based on {}, the merge base of {} and {}.\n\
             {} Resetting the checkout to {}.",
            request.patch_repo,
            request.patch_ref,
            merge_base,
            request.target_ref,
            request.patch_ref,
            culprit,
            base_rev
        ));
        if let Err(e) = self.run(&["status"]) {
            log::warn!("git status failed: {e}");
        }
        self.run(&["reset", "--hard", base_rev])?;
        Err(failure.into_sync_error(
            format!(
                "Failed to apply {} @ {} on top of {}",
                request.patch_repo, request.patch_ref, base_rev
            ),
            &request.target_ref,
        ))
    }

    /// Local commit name for the branch a patch was written against.
    fn resolve_patch_target(&self, target_ref: &str) -> Result<String, SyncError> {
        if let Some(remote) = revision::ref_to_remote_ref(target_ref) {
            if self.is_valid_revision(&remote)? {
                self.printer().print(format!(
                    "Trying the corresponding remote ref for '{target_ref}': {remote}"
                ));
                return Ok(remote);
            }
        }
        if self.is_valid_revision(target_ref)? {
            return Ok(target_ref.to_string());
        }

        if let Some(mirror) = self.mirror() {
            mirror.populate(self.git(), self.printer(), &[target_ref])?;
        }
        match self.run(&["fetch", "origin", target_ref]) {
            Ok(_) => Ok(self.rev_parse("FETCH_HEAD")?),
            Err(e) => {
                log::debug!("fetching {target_ref} failed: {e}");
                Err(ResolveError::Unknown(target_ref.to_string()).into())
            }
        }
    }
}
