//! Shared bare mirrors of remote repositories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::CacheError;
use super::lock::{MIRROR_LOCK_TIMEOUT, MirrorLock};
use crate::output::Printer;
use crate::scm::git::{self, Git};

const HEADS_REFSPEC: &str = "+refs/heads/*:refs/heads/*";

/// A bare repository caching the objects of one remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    url: String,
    mirror_dir: PathBuf,
    lock_path: PathBuf,
}

impl Mirror {
    pub(crate) fn new(url: &str, mirror_dir: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            url: url.to_string(),
            mirror_dir,
            lock_path,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Whether the mirror has been initialised.
    pub fn exists(&self) -> bool {
        self.mirror_dir.join("config").is_file()
    }

    /// Whether the mirror already has commit `rev`.
    pub fn contains<G: Git + ?Sized>(&self, git: &G, rev: &str) -> Result<bool, CacheError> {
        if !self.exists() {
            return Ok(false);
        }
        Ok(git::is_valid_revision(git, &self.mirror_dir, rev)?)
    }

    /// Create or update the mirror.
    ///
    /// `extra_refs` are fetched in addition to every branch, e.g. change refs
    /// that the standard refspec does not cover. Concurrent calls for the
    /// same mirror are serialized by a file lock.
    pub fn populate<G: Git + ?Sized>(
        &self,
        git: &G,
        printer: &Printer,
        extra_refs: &[&str],
    ) -> Result<(), CacheError> {
        let _lock = MirrorLock::acquire(&self.lock_path, MIRROR_LOCK_TIMEOUT, || {
            printer.print(format!(
                "Waiting for another process updating the mirror of {}",
                self.url
            ));
        })
        .map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                CacheError::LockFailed(self.lock_path.clone())
            } else {
                CacheError::Io(e)
            }
        })?;

        if !self.exists() {
            log::info!("creating mirror of {} in {}", self.url, self.mirror_dir.display());
            self.init(git)?;
        } else {
            self.ensure_origin_url(git)?;
        }

        self.ensure_fetch_specs(git, extra_refs)?;

        printer.print(format!("Updating mirror of {}", self.url));
        git::run_logged(
            git,
            printer,
            &["fetch", "--prune", "--progress", "origin"],
            &self.mirror_dir,
        )?;
        Ok(())
    }

    fn init<G: Git + ?Sized>(&self, git: &G) -> Result<(), CacheError> {
        let existed = self.mirror_dir.exists();
        fs::create_dir_all(&self.mirror_dir)?;

        let result = git
            .run(&["init", "--bare", "--quiet"], &self.mirror_dir)
            .and_then(|_| {
                git.run(&["config", "remote.origin.url", &self.url], &self.mirror_dir)
            });

        if let Err(e) = result {
            if !existed {
                let _ = fs::remove_dir_all(&self.mirror_dir);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Re-point a mirror created for a different spelling of the URL.
    fn ensure_origin_url<G: Git + ?Sized>(&self, git: &G) -> Result<(), CacheError> {
        let current = match git.capture(&["config", "remote.origin.url"], &self.mirror_dir) {
            Ok(url) => url,
            Err(e) if e.exited_with(1) => String::new(),
            Err(e) => return Err(e.into()),
        };
        if current.trim_end_matches('/') != self.url.trim_end_matches('/') {
            log::warn!(
                "mirror {} fetched from {:?}; switching it to {}",
                self.mirror_dir.display(),
                current,
                self.url
            );
            git.run(&["config", "remote.origin.url", &self.url], &self.mirror_dir)?;
        }
        Ok(())
    }

    fn ensure_fetch_specs<G: Git + ?Sized>(
        &self,
        git: &G,
        extra_refs: &[&str],
    ) -> Result<(), CacheError> {
        let configured = match git.capture(
            &["config", "--get-all", "remote.origin.fetch"],
            &self.mirror_dir,
        ) {
            Ok(specs) => specs,
            // Exit 1: the key is not set yet.
            Err(e) if e.exited_with(1) => String::new(),
            Err(e) => return Err(e.into()),
        };
        let configured: Vec<&str> = configured.lines().map(str::trim).collect();

        let wanted = std::iter::once(HEADS_REFSPEC.to_string())
            .chain(extra_refs.iter().map(|r| format!("+{r}:{r}")));
        for spec in wanted {
            if !configured.contains(&spec.as_str()) {
                git.run(
                    &["config", "--add", "remote.origin.fetch", &spec],
                    &self.mirror_dir,
                )?;
            }
        }
        Ok(())
    }

    /// Point `checkout`'s fetches at the mirror; pushes still go to the
    /// original URL.
    pub fn rewrite_fetch_url<G: Git + ?Sized>(
        &self,
        git: &G,
        checkout: &Path,
    ) -> Result<(), CacheError> {
        let mirror_dir = self.mirror_dir.to_string_lossy();
        git.run(&["remote", "set-url", "origin", &mirror_dir], checkout)?;
        git.run(&["remote", "set-url", "--push", "origin", &self.url], checkout)?;
        Ok(())
    }
}
