//! Running one command over every component of a manifest.
//!
//! Components are handed to up to `jobs` worker threads over a bounded
//! channel. A failing component is reported and the others carry on. Once
//! interrupted, no further components are started; the ones in flight finish.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::cache::MirrorCache;
use crate::error::SyncError;
use crate::manifest::{Component, Manifest};
use crate::options::SyncOptions;
use crate::output::Printer;
use crate::package::{PackageCheckout, PackageError, PackageRoot};
use crate::scm::git::Git;
use crate::scm::prompt::{Prompter, StdinPrompter};
use crate::scm::revision::UNMANAGED;
use crate::scm::working_copy::{UpdateAction, WorkingCopyUpdater};

/// What to do with each component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Sync,
    Revinfo,
    Revert,
    Status,
    Diff,
}

/// Result for one component or package.
#[derive(Debug)]
pub struct ComponentReport {
    pub path: String,
    /// Revision after the operation, when the operation reports one.
    pub result: Result<Option<String>, SyncError>,
    pub action: Option<UpdateAction>,
    /// Files the operation touched or found modified.
    pub files: Vec<PathBuf>,
}

impl ComponentReport {
    fn new(path: &str, result: Result<Option<String>, SyncError>) -> Self {
        Self {
            path: path.to_string(),
            result,
            action: None,
            files: Vec::new(),
        }
    }
}

pub struct Runner<G: Git + Clone> {
    manifest: Manifest,
    options: SyncOptions,
    git: G,
    cache: MirrorCache,
    printer: Printer,
    prompter: Arc<dyn Prompter>,
    packages: Option<Arc<dyn PackageRoot>>,
    interrupted: Arc<AtomicBool>,
}

impl<G: Git + Clone> Runner<G> {
    pub fn new(manifest: Manifest, options: SyncOptions, git: G, cache: MirrorCache) -> Self {
        Self {
            manifest,
            options,
            git,
            cache,
            printer: Printer::stdout(),
            prompter: Arc::new(StdinPrompter),
            packages: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_printer(mut self, printer: Printer) -> Self {
        self.printer = printer;
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Package client for the manifest's `packages`.
    pub fn with_packages(mut self, packages: Arc<dyn PackageRoot>) -> Self {
        self.packages = Some(packages);
        self
    }

    /// Flag that stops the dispatch of further components when set.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Run `operation` over all components, then all packages.
    ///
    /// Reports come back in manifest order.
    pub fn run(&self, operation: Operation) -> Vec<ComponentReport> {
        let mut reports = self.run_components(operation);
        reports.extend(self.run_packages(operation));
        reports
    }

    fn run_components(&self, operation: Operation) -> Vec<ComponentReport> {
        let components = &self.manifest.components;
        if components.is_empty() {
            return Vec::new();
        }
        let jobs = self.options.jobs.clamp(1, components.len());
        let (work_tx, work_rx): (Sender<usize>, Receiver<usize>) = bounded(jobs);
        let (report_tx, report_rx) = unbounded();

        thread::scope(|scope| {
            let mut workers = 0;
            for id in 0..jobs {
                let work_rx = work_rx.clone();
                let report_tx = report_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("depsync-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        for index in work_rx {
                            let report = self.run_component(&components[index], operation);
                            if report_tx.send((index, report)).is_err() {
                                break;
                            }
                        }
                    });
                match spawned {
                    Ok(_) => workers += 1,
                    Err(e) => log::warn!("could not start worker thread {id}: {e}"),
                }
            }
            drop(work_rx);

            for (index, component) in components.iter().enumerate() {
                if self.interrupted.load(Ordering::SeqCst) {
                    let report = ComponentReport::new(
                        &component.path,
                        Err(SyncError::Aborted("interrupted before start".to_string())),
                    );
                    if let Err(e) = report_tx.send((index, report)) {
                        log::debug!("dropped report for {}: {e}", component.path);
                    }
                    continue;
                }
                let inline = if workers == 0 {
                    true
                } else if let Err(e) = work_tx.send(index) {
                    log::warn!("workers exited early: {e}");
                    true
                } else {
                    false
                };
                if inline {
                    let report = self.run_component(component, operation);
                    if let Err(e) = report_tx.send((index, report)) {
                        log::debug!("dropped report for {}: {e}", component.path);
                    }
                }
            }
            drop(work_tx);
        });
        drop(report_tx);

        let mut reports: Vec<(usize, ComponentReport)> = report_rx.iter().collect();
        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    fn component_options(&self, component: &Component) -> SyncOptions {
        let mut options = self.options.clone();
        if !component.managed {
            options.revision = Some(UNMANAGED.to_string());
        }
        options
    }

    fn run_component(&self, component: &Component, operation: Operation) -> ComponentReport {
        let copy = component.working_copy(&self.manifest.root_dir);
        let updater = WorkingCopyUpdater::new(
            copy,
            self.git.clone(),
            self.cache.clone(),
            self.printer.clone(),
        )
        .with_prompter(Arc::clone(&self.prompter));
        let options = self.component_options(component);

        let mut report = ComponentReport::new(&component.path, Ok(None));
        let result = match operation {
            Operation::Sync => self.sync_component(&updater, component, &options, &mut report),
            Operation::Revinfo => updater.revinfo().map(Some),
            Operation::Revert => updater.revert(&options, &mut report.files).map(|_| None),
            Operation::Status => updater.status(&mut report.files).map(|_| None),
            Operation::Diff => updater.diff().map(|_| None),
        };
        if let Err(e) = &result {
            log::warn!("{} failed: {}", component.path, e);
        }
        report.result = result;
        report
    }

    fn sync_component(
        &self,
        updater: &WorkingCopyUpdater<G>,
        component: &Component,
        options: &SyncOptions,
        report: &mut ComponentReport,
    ) -> Result<Option<String>, SyncError> {
        let result = updater.update(options, &mut report.files)?;
        report.action = Some(result.action);
        if result.action == UpdateAction::Unmanaged {
            return Ok(Some(result.revision));
        }

        let patches = options
            .patch_refs
            .iter()
            .filter(|patch| {
                self.manifest
                    .find_component(&patch.repo)
                    .is_some_and(|found| found.path == component.path)
            });
        for patch in patches {
            updater.apply_patch_ref(
                updater.working_copy().url(),
                &patch.patch_ref,
                &patch.target_ref,
                options,
                &mut report.files,
            )?;
        }
        Ok(Some(result.revision))
    }

    fn run_packages(&self, operation: Operation) -> Vec<ComponentReport> {
        let packages = &self.manifest.packages;
        if packages.is_empty() {
            return Vec::new();
        }
        let Some(root) = &self.packages else {
            log::warn!("no package client configured; skipping {} packages", packages.len());
            return Vec::new();
        };

        if operation == Operation::Sync && !self.interrupted.load(Ordering::SeqCst) {
            self.printer.print(format!(
                "________ ensuring {} packages in {}",
                packages.len(),
                self.manifest.root_dir.display()
            ));
            if let Err(e) = root.ensure(&self.manifest.root_dir, packages) {
                log::warn!("package ensure failed: {e}");
                let cause = Arc::new(e);
                return packages
                    .iter()
                    .map(|package| {
                        let failure = PackageError::Ensure {
                            package: package.name.clone(),
                            source: Arc::clone(&cause),
                        };
                        ComponentReport::new(&package.path, Err(SyncError::Package(failure)))
                    })
                    .collect();
            }
        }

        packages
            .iter()
            .map(|package| {
                let checkout = PackageCheckout::new(package.clone(), Arc::clone(root));
                let result = match operation {
                    Operation::Sync => checkout
                        .update()
                        .and_then(|_| checkout.revinfo())
                        .map(Some),
                    Operation::Revinfo => checkout.revinfo().map(Some),
                    Operation::Revert => checkout.revert().map(|_| None),
                    Operation::Status | Operation::Diff => Ok(None),
                };
                ComponentReport::new(&package.path, result.map_err(SyncError::from))
            })
            .collect()
    }
}
