//! Bringing a git checkout to a requested revision.
//!
//! [`WorkingCopyUpdater::update`] is a small state machine. A missing
//! checkout is cloned. An existing one is fetched and then, depending on
//! whether `HEAD` is detached or on a branch, checked out, fast-forwarded,
//! reset, merged or rebased. Every path either reaches the target or leaves
//! the checkout where it started.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::cache::{Mirror, MirrorCache};
use crate::error::SyncError;
use crate::options::SyncOptions;
use crate::output::Printer;
use crate::scm::git::{self, CommandOutput, Git, ProcessError};
use crate::scm::locks;
use crate::scm::patch;
use crate::scm::prompt::{self, ConflictChoice, Prompter, StdinPrompter};
use crate::scm::revision::{self, ResolveError, RevisionSpec};

const DEFAULT_FETCH_REFSPEC: &str = "+refs/heads/*:refs/remotes/origin/*";

const REBASE_CONFLICT: &str = "Conflict while rebasing this branch.\n\
                               Fix the conflict and run depsync again.\n\
                               See 'man git-rebase' for details.\n";

/// A component's checkout: where it lives and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    url: String,
    declared_revision: Option<String>,
    root_dir: PathBuf,
    relpath: String,
    default_branch: String,
}

impl WorkingCopy {
    /// `url` may carry a revision suffix, `https://host/repo@refs/heads/dev`.
    pub fn new(url: &str, root_dir: impl Into<PathBuf>, relpath: impl Into<String>) -> Self {
        let (url, declared_revision) = revision::split_url_revision(url);
        Self {
            url,
            declared_revision,
            root_dir: root_dir.into(),
            relpath: relpath.into(),
            default_branch: "master".to_string(),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn declared_revision(&self) -> Option<&str> {
        self.declared_revision.as_deref()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// `root_dir/relpath` without `.` components.
    pub fn checkout_path(&self) -> PathBuf {
        self.root_dir
            .join(&self.relpath)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }

    pub fn git_dir(&self) -> PathBuf {
        self.checkout_path().join(".git")
    }

    pub fn exists(&self) -> bool {
        self.git_dir().exists()
    }
}

/// What an update did to the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Cloned,
    Updated,
    UpToDate,
    /// The user chose to skip a diverged branch.
    Skipped,
    /// The component is unmanaged and was only verified.
    Unmanaged,
}

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    /// `HEAD` after the update.
    pub revision: String,
    pub action: UpdateAction,
}

/// Drives one [`WorkingCopy`] to its target revision.
pub struct WorkingCopyUpdater<G: Git> {
    copy: WorkingCopy,
    git: G,
    cache: MirrorCache,
    printer: Printer,
    prompter: Arc<dyn Prompter>,
}

impl<G: Git> WorkingCopyUpdater<G> {
    pub fn new(copy: WorkingCopy, git: G, cache: MirrorCache, printer: Printer) -> Self {
        Self {
            copy,
            git,
            cache,
            printer,
            prompter: Arc::new(StdinPrompter),
        }
    }

    /// Answer non-fast-forward questions with `prompter` instead of stdin.
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.copy
    }

    pub(crate) fn git(&self) -> &G {
        &self.git
    }

    pub(crate) fn printer(&self) -> &Printer {
        &self.printer
    }

    pub(crate) fn mirror(&self) -> Option<Mirror> {
        self.cache.mirror_for(&self.copy.url)
    }

    /// Run a git command in the checkout, echoing it and its output.
    pub(crate) fn run(&self, args: &[&str]) -> Result<CommandOutput, ProcessError> {
        git::run_logged(&self.git, &self.printer, args, &self.copy.checkout_path())
    }

    /// Run a git command in the checkout quietly and return its stdout.
    pub(crate) fn capture(&self, args: &[&str]) -> Result<String, ProcessError> {
        self.git.capture(args, &self.copy.checkout_path())
    }

    pub(crate) fn is_valid_revision(&self, rev: &str) -> Result<bool, ProcessError> {
        git::is_valid_revision(&self.git, &self.copy.checkout_path(), rev)
    }

    pub(crate) fn rev_parse(&self, rev: &str) -> Result<String, ProcessError> {
        self.capture(&["rev-parse", "--verify", &format!("{rev}^{{commit}}")])
    }

    /// Files changed between `rev` and the working tree, as absolute paths.
    pub(crate) fn diff_filenames(&self, rev: &str) -> Result<Vec<PathBuf>, ProcessError> {
        let names = self.capture(&["-c", "core.quotePath=false", "diff", "--name-only", rev])?;
        Ok(self.absolute(names.lines()))
    }

    fn absolute<'a>(&self, names: impl Iterator<Item = &'a str>) -> Vec<PathBuf> {
        let checkout = self.copy.checkout_path();
        names
            .filter(|name| !name.is_empty())
            .map(|name| checkout.join(name))
            .collect()
    }

    fn resolve_spec(&self, options: &SyncOptions) -> Result<RevisionSpec, ResolveError> {
        RevisionSpec::resolve(
            options.revision.as_deref(),
            self.copy.declared_revision(),
            &self.copy.default_branch,
        )
    }

    /// The commit `HEAD` points at.
    pub fn revinfo(&self) -> Result<String, SyncError> {
        Ok(self.capture(&["rev-parse", "--verify", "HEAD"])?)
    }

    /// Sync the checkout, appending the paths of changed files to `file_list`.
    pub fn update(
        &self,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<UpdateResult, SyncError> {
        let spec = self.resolve_spec(options)?;
        log::debug!("updating {} to {}", self.copy.relpath, spec);

        if !self.copy.exists() {
            if spec.is_unmanaged() {
                return Err(SyncError::Configuration(format!(
                    "{}: can't use unmanaged on a missing checkout at {}",
                    self.copy.relpath,
                    self.copy.checkout_path().display()
                )));
            }
            let revision = self.clone_fresh(&spec, options, file_list)?;
            return Ok(UpdateResult {
                revision,
                action: UpdateAction::Cloned,
            });
        }

        if spec.is_unmanaged() {
            self.printer.print(format!(
                "________ unmanaged solution; skipping {}",
                self.copy.relpath
            ));
            return Ok(UpdateResult {
                revision: self.revinfo()?,
                action: UpdateAction::Unmanaged,
            });
        }

        if options.break_repo_locks {
            locks::break_locks(&self.copy.git_dir(), &self.printer)?;
        }

        self.update_existing(&spec, options, file_list)
            .map_err(|e| self.classify_lock_failure(e))
    }

    /// A git failure with a lock file present is reported as a lock error.
    fn classify_lock_failure(&self, err: SyncError) -> SyncError {
        match err {
            SyncError::Process(source) => match locks::detect(&self.copy.git_dir()) {
                Some(path) => SyncError::Lock {
                    relpath: self.copy.relpath.clone(),
                    path,
                    source,
                },
                None => SyncError::Process(source),
            },
            other => other,
        }
    }

    fn update_existing(
        &self,
        spec: &RevisionSpec,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<UpdateResult, SyncError> {
        if !self.is_valid_revision("HEAD")? {
            self.printer.print(format!(
                "_____ {} has no valid HEAD; cloning again",
                self.copy.relpath
            ));
            self.discard_checkout(options.force)?;
            let revision = self.clone_fresh(spec, options, file_list)?;
            return Ok(UpdateResult {
                revision,
                action: UpdateAction::Cloned,
            });
        }

        let mirror = self.mirror();
        if let Some(mirror) = &mirror {
            self.populate_mirror(mirror, spec)?;
        }

        if self.switch_upstream_if_needed(spec, mirror.as_ref(), options, file_list)? {
            return Ok(UpdateResult {
                revision: self.revinfo()?,
                action: UpdateAction::Updated,
            });
        }

        if options.reset {
            self.set_fetch_config()?;
        }

        let have_hash = match spec.hash() {
            Some(hash) => self.is_valid_revision(hash)?,
            None => false,
        };
        if !have_hash {
            self.fetch(options)?;
        }
        let target = self.resolve_target(spec)?;

        if options.reset || options.force {
            self.run(&["reset", "--hard", "HEAD"])?;
        }

        let label = spec.to_string();
        let action = match git::current_branch(&self.git, &self.copy.checkout_path())? {
            None => self.update_detached(&target, &label, options, file_list)?,
            Some(branch) => {
                self.update_branch(&branch, spec, &target, &label, options, file_list)?
            }
        };

        if action != UpdateAction::Skipped && options.reset && options.delete_unversioned_trees {
            self.delete_unversioned_trees()?;
        }

        Ok(UpdateResult {
            revision: self.revinfo()?,
            action,
        })
    }

    fn update_detached(
        &self,
        target: &str,
        label: &str,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<UpdateAction, SyncError> {
        self.check_clean(label)?;

        let before = self.revinfo()?;
        let after = self.rev_parse(target)?;
        if before == after {
            self.printer.print("Up-to-date; skipping checkout.");
            return Ok(UpdateAction::UpToDate);
        }

        // Overwriting untracked files is only allowed when they would be
        // deleted anyway.
        let mut args = vec!["checkout", "--quiet"];
        if options.reset && options.delete_unversioned_trees {
            args.push("--force");
        }
        args.push(target);
        self.run(&args)?;

        let changed = self.capture(&["diff", "--name-only", &before, &after])?;
        file_list.extend(self.absolute(changed.lines()));
        Ok(UpdateAction::Updated)
    }

    fn update_branch(
        &self,
        branch: &str,
        spec: &RevisionSpec,
        target: &str,
        label: &str,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<UpdateAction, SyncError> {
        let upstream = git::upstream_branch(&self.git, &self.copy.checkout_path())?;
        let target_is_branch = spec.hash().is_none() && target.starts_with("refs/remotes/");
        let tracks_target = upstream.as_deref().is_none_or(|upstream| upstream == target);
        if !target_is_branch || !tracks_target {
            self.printer.print(format!(
                "_____ {} is on branch {}; checking out {} as a detached HEAD",
                self.copy.relpath, branch, label
            ));
            return self.update_detached(target, label, options, file_list);
        }

        let head = self.revinfo()?;
        let remote = self.rev_parse(target)?;
        let checkout = self.copy.checkout_path();

        if head == remote {
            self.printer.print("Up-to-date; skipping checkout.");
            return Ok(UpdateAction::UpToDate);
        }
        if !options.reset && git::is_ancestor(&self.git, &checkout, &remote, &head)? {
            self.printer.print(format!(
                "_____ {} has local commits on top of {}; leaving {} as is",
                self.copy.relpath, label, branch
            ));
            return Ok(UpdateAction::UpToDate);
        }

        let changed = self.diff_filenames(target)?;

        if git::is_ancestor(&self.git, &checkout, &head, &remote)? {
            self.run(&["merge", "--ff-only", target])?;
        } else if options.reset {
            self.run(&["reset", "--hard", target])?;
        } else if options.merge {
            self.merge(target, label)?;
        } else {
            let choice = if options.auto_rebase {
                ConflictChoice::Rebase
            } else {
                prompt::resolve_conflict(self.prompter.as_ref(), |answer| {
                    self.printer
                        .print(format!("Input not recognized: {answer:?}"));
                })
            };
            match choice {
                ConflictChoice::Rebase => self.rebase_onto(target, label)?,
                ConflictChoice::Skip => {
                    self.printer.print(format!("Skipping {}", self.copy.relpath));
                    return Ok(UpdateAction::Skipped);
                }
                ConflictChoice::Quit => {
                    return Err(SyncError::Aborted(format!(
                        "Can't fast-forward, please merge or rebase manually.\n\
                         cd {} && git rebase {}",
                        checkout.display(),
                        target
                    )));
                }
            }
        }

        file_list.extend(changed);
        Ok(UpdateAction::Updated)
    }

    fn merge(&self, target: &str, label: &str) -> Result<(), SyncError> {
        let Err(source) = self.run(&["merge", "--no-edit", target]) else {
            return Ok(());
        };
        if !self.copy.git_dir().join("MERGE_HEAD").exists() {
            return Err(source.into());
        }
        if let Err(e) = self.git.run(&["merge", "--abort"], &self.copy.checkout_path()) {
            log::warn!("merge --abort failed in {}: {}", self.copy.relpath, e);
        }
        Err(SyncError::Conflict {
            message: format!(
                "Conflict while merging {label} into this branch.\n\
                 Merge it manually and run depsync again.\n"
            ),
            target: label.to_string(),
            commit: None,
            source: Some(source),
        })
    }

    /// Replay local commits on top of `target`, restoring `HEAD` on failure.
    fn rebase_onto(&self, target: &str, label: &str) -> Result<(), SyncError> {
        self.check_clean(label)?;

        let old_head = self.revinfo()?;
        let checkout = self.copy.checkout_path();
        self.run(&["reset", "--hard", target])?;
        // Local commits the target already carries are dropped.
        let range = format!("{target}..{old_head}");
        let replayed = patch::unapplied_commits(&self.git, &checkout, &range, &old_head)
            .map_err(patch::ReplayError::Git)
            .and_then(|commits| {
                patch::replay_commits(&self.git, &self.printer, &checkout, &commits)
            });
        if let Err(failure) = replayed {
            self.git.run(&["reset", "--hard", &old_head], &checkout)?;
            return Err(failure.into_sync_error(REBASE_CONFLICT.to_string(), label));
        }
        Ok(())
    }

    /// Fail unless the tree and index match `HEAD`.
    fn check_clean(&self, label: &str) -> Result<(), SyncError> {
        let checkout = self.copy.checkout_path();
        match self
            .git
            .run(&["update-index", "--ignore-submodules", "--refresh"], &checkout)
        {
            Ok(_) => {}
            Err(e) if e.exited_with(1) => {
                return Err(SyncError::UncommittedChanges(format!(
                    "\n____ {} at {}\n\tYou have unstaged changes.\n\tPlease commit, stash, or reset.\n",
                    self.copy.relpath, label
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let staged = self.capture(&[
            "diff-index",
            "--cached",
            "--name-status",
            "-r",
            "--ignore-submodules",
            "HEAD",
            "--",
        ])?;
        if !staged.is_empty() {
            return Err(SyncError::UncommittedChanges(format!(
                "\n____ {} at {}\n\tYour index contains uncommitted changes\n\tPlease commit, stash, or reset.\n",
                self.copy.relpath, label
            )));
        }
        Ok(())
    }

    fn set_fetch_config(&self) -> Result<(), ProcessError> {
        match self.capture(&["config", "--unset-all", "remote.origin.fetch"]) {
            // Exit 5: nothing to unset.
            Err(e) if !e.exited_with(5) => return Err(e),
            _ => {}
        }
        self.capture(&["config", "remote.origin.fetch", DEFAULT_FETCH_REFSPEC])?;
        Ok(())
    }

    fn fetch(&self, options: &SyncOptions) -> Result<(), ProcessError> {
        let mut args = vec!["fetch", "--progress"];
        if options.force {
            args.push("--prune");
        }
        args.push("origin");
        self.run(&args)?;
        Ok(())
    }

    /// Name or hash to check out for `spec`, fetching it by name if needed.
    pub(crate) fn resolve_target(&self, spec: &RevisionSpec) -> Result<String, SyncError> {
        if let Some(refspec) = spec.tracking_refspec() {
            self.run(&["fetch", "origin", &refspec])?;
        }
        if let Some(target) = spec.checkout_target() {
            if self.is_valid_revision(&target)? {
                return Ok(target);
            }
        }
        if let Some(name) = spec.fetch_ref() {
            self.run(&["fetch", "origin", name])?;
            return Ok(self.capture(&["rev-parse", "FETCH_HEAD"])?);
        }
        if let Some(hash) = spec.hash() {
            // Servers may allow fetching a reachable commit by hash.
            if self.run(&["fetch", "origin", hash]).is_ok() && self.is_valid_revision(hash)? {
                return Ok(hash.to_string());
            }
        }
        Err(ResolveError::Unknown(spec.to_string()).into())
    }

    pub(crate) fn populate_mirror(
        &self,
        mirror: &Mirror,
        spec: &RevisionSpec,
    ) -> Result<(), SyncError> {
        if let Some(hash) = spec.hash() {
            if mirror.contains(&self.git, hash)? {
                log::debug!("{} already has {}", mirror.mirror_dir().display(), hash);
                return Ok(());
            }
        }
        let branch_heads = spec.branch_heads_ref();
        let extra: Vec<&str> = spec
            .fetch_ref()
            .into_iter()
            .chain(branch_heads.as_deref())
            .collect();
        mirror.populate(&self.git, &self.printer, &extra)?;
        Ok(())
    }

    /// Point `origin` at the expected upstream.
    ///
    /// Moving between a URL and its mirror only rewrites the remote. A
    /// genuinely different upstream is fetched and the checkout hard-reset
    /// to the target; returns true in that case.
    fn switch_upstream_if_needed(
        &self,
        spec: &RevisionSpec,
        mirror: Option<&Mirror>,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<bool, SyncError> {
        let current = match self.capture(&["config", "remote.origin.url"]) {
            Ok(url) => url,
            Err(e) if e.exited_with(1) => String::new(),
            Err(e) => return Err(e.into()),
        };
        let current = current.trim_end_matches('/');
        let url = self.copy.url.trim_end_matches('/');
        let mirror_dir = mirror.map(|m| m.mirror_dir().to_string_lossy().into_owned());

        let same_upstream = current == url
            || self
                .cache
                .mirror_for(url)
                .is_some_and(|m| Path::new(current) == m.mirror_dir());
        if same_upstream {
            match mirror {
                Some(mirror) => mirror.rewrite_fetch_url(&self.git, &self.copy.checkout_path())?,
                None if current != url => {
                    self.capture(&["remote", "set-url", "origin", url])?;
                }
                None => {}
            }
            return Ok(false);
        }

        let auto_fix = self.capture(&["config", "remote.origin.depsync-auto-fix-url"]);
        if auto_fix.is_ok_and(|value| value == "false") {
            log::info!("{}: not switching upstream, auto-fix disabled", self.copy.relpath);
            return Ok(false);
        }

        let new_fetch_url = mirror_dir.as_deref().unwrap_or(url);
        self.printer.print(format!(
            "_____ switching {} from {} to new upstream {}",
            self.copy.relpath, current, new_fetch_url
        ));
        if !(options.force || options.reset) {
            self.check_clean(&spec.to_string())?;
        }
        self.run(&["remote", "set-url", "origin", new_fetch_url])?;
        if mirror.is_some() {
            self.run(&["remote", "set-url", "--push", "origin", url])?;
        }

        self.fetch(options)?;
        let target = self.resolve_target(spec)?;
        let changed = self.diff_filenames(&target)?;
        self.run(&["reset", "--hard", &target])?;
        file_list.extend(changed);
        Ok(true)
    }

    /// Clone into place, retrying once after moving a broken directory aside.
    fn clone_fresh(
        &self,
        spec: &RevisionSpec,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<String, SyncError> {
        let checkout = self.copy.checkout_path();
        let occupied = fs::read_dir(&checkout).is_ok_and(|mut entries| entries.next().is_some());

        match self.clone_into_place(spec, file_list) {
            Ok(revision) => Ok(revision),
            Err(e) if occupied => {
                log::warn!("clone into {} failed: {}", checkout.display(), e);
                self.discard_checkout(options.force)?;
                self.clone_into_place(spec, file_list)
            }
            Err(e) => Err(e),
        }
    }

    fn clone_into_place(
        &self,
        spec: &RevisionSpec,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<String, SyncError> {
        let checkout = self.copy.checkout_path();
        let parent = checkout
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.copy.root_dir.clone());
        fs::create_dir_all(&parent)?;

        let mirror = self.mirror();
        if let Some(mirror) = &mirror {
            self.populate_mirror(mirror, spec)?;
        }
        let source = match &mirror {
            Some(mirror) => mirror.mirror_dir().to_string_lossy().into_owned(),
            None => self.copy.url.clone(),
        };

        // Clone next to the checkout and move .git in, so the checkout
        // directory may already hold files.
        let tmp = tempfile::Builder::new()
            .prefix("_depsync_clone_")
            .tempdir_in(&parent)?;
        let tmp_path = tmp.path().to_string_lossy().into_owned();
        let mut args = vec!["clone", "--no-checkout", "--progress"];
        if mirror.is_some() {
            args.push("--shared");
        }
        args.push(&source);
        args.push(&tmp_path);
        log::info!("cloning {} into {}", source, checkout.display());
        git::run_logged(&self.git, &self.printer, &args, &parent)?;

        fs::create_dir_all(&checkout)?;
        fs::rename(tmp.path().join(".git"), self.copy.git_dir())?;
        drop(tmp);

        self.set_fetch_config()?;
        if let Some(mirror) = &mirror {
            mirror.rewrite_fetch_url(&self.git, &checkout)?;
        }

        let target = self.resolve_target(spec)?;
        self.run(&["checkout", "--quiet", &target])?;
        let revision = self.revinfo()?;

        let files = self.capture(&["-c", "core.quotePath=false", "ls-files"])?;
        file_list.extend(self.absolute(files.lines()));

        let shown = spec.checkout_label().unwrap_or_else(|| revision.clone());
        self.printer.print(format!(
            "Checked out {shown} to a detached HEAD. Before making any commits\n\
             in this repo, you should use 'git checkout <branch>' to switch\n\
             to an existing branch or use 'git checkout origin -b <branch>' to\n\
             create a new branch for your work."
        ));
        Ok(revision)
    }

    /// Delete the checkout with `force`, otherwise move it under
    /// `<root_dir>/_bad_scm/`.
    fn discard_checkout(&self, force: bool) -> Result<(), SyncError> {
        let checkout = self.copy.checkout_path();
        if !checkout.exists() {
            return Ok(());
        }
        if force {
            self.printer
                .print(format!("_____ deleting {}", checkout.display()));
            fs::remove_dir_all(&checkout)?;
            return Ok(());
        }

        let bad_scm = self.copy.root_dir.join("_bad_scm");
        fs::create_dir_all(&bad_scm)?;
        let name = self.copy.relpath.replace(['/', '\\'], "_");
        let name = if name.is_empty() || name == "." {
            "checkout".to_string()
        } else {
            name
        };
        let dest = tempfile::Builder::new()
            .prefix(&format!("{name}_"))
            .tempdir_in(&bad_scm)?
            .keep();
        let dest = dest.join(&name);
        self.printer.print(format!(
            "_____ moving {} to {}",
            checkout.display(),
            dest.display()
        ));
        fs::rename(&checkout, &dest)?;
        Ok(())
    }

    /// Remove untracked directories, leaving untracked files and nested
    /// repositories alone.
    fn delete_unversioned_trees(&self) -> Result<(), SyncError> {
        let checkout = self.copy.checkout_path();
        let listing = self.capture(&[
            "-c",
            "core.quotePath=false",
            "ls-files",
            "--directory",
            "--others",
            "--exclude-standard",
        ])?;
        for entry in listing.lines() {
            let Some(dir) = entry.strip_suffix('/') else {
                continue;
            };
            let path = checkout.join(dir);
            let is_dir = fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir());
            if !is_dir || path.join(".git").exists() {
                continue;
            }
            self.printer
                .print(format!("_____ deleting unversioned directory {entry}"));
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    /// Discard local changes, returning the checkout to its target revision.
    pub fn revert(
        &self,
        options: &SyncOptions,
        file_list: &mut Vec<PathBuf>,
    ) -> Result<(), SyncError> {
        if !self.copy.exists() {
            self.printer.print(format!(
                "_____ {} is missing, syncing instead",
                self.copy.relpath
            ));
            self.update(options, file_list)?;
            return Ok(());
        }

        let spec = self.resolve_spec(options)?;
        if spec.is_unmanaged() {
            self.printer.print(format!(
                "________ unmanaged solution; skipping {}",
                self.copy.relpath
            ));
            return Ok(());
        }

        let target = self.resolve_target(&spec)?;
        let changed = self.diff_filenames(&target)?;
        self.run(&["reset", "--hard", &target])?;
        self.run(&["clean", "-f", "-d"])?;
        file_list.extend(changed);
        Ok(())
    }

    /// Where local work started: the merge base of `HEAD` and its upstream.
    fn merge_base(&self) -> Result<String, SyncError> {
        let upstream = match git::upstream_branch(&self.git, &self.copy.checkout_path())? {
            Some(upstream) => upstream,
            None => format!("refs/remotes/origin/{}", self.copy.default_branch),
        };
        if self.is_valid_revision(&upstream)? {
            Ok(self.capture(&["merge-base", "HEAD", &upstream])?)
        } else {
            self.revinfo()
        }
    }

    /// Print changed files relative to the upstream and collect their paths.
    pub fn status(&self, file_list: &mut Vec<PathBuf>) -> Result<(), SyncError> {
        if !self.copy.exists() {
            self.printer.print(format!(
                "________ {} does not exist yet",
                self.copy.relpath
            ));
            return Ok(());
        }
        let base = self.merge_base()?;
        let output = self.run(&["-c", "core.quotePath=false", "diff", "--name-status", &base])?;
        let names = output
            .stdout
            .lines()
            .filter_map(|line| line.rsplit('\t').next());
        file_list.extend(self.absolute(names));
        Ok(())
    }

    /// Print the diff of the checkout against its upstream.
    pub fn diff(&self) -> Result<(), SyncError> {
        if !self.copy.exists() {
            return Ok(());
        }
        let base = self.merge_base()?;
        self.run(&["-c", "core.quotePath=false", "diff", &base])?;
        Ok(())
    }
}
