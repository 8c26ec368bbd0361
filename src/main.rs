use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::{Args, Parser, Subcommand};

use depsync::cache::MirrorCache;
use depsync::manifest::Manifest;
use depsync::options::{PatchSpec, SyncOptions};
use depsync::package::{CipdClient, DEFAULT_SERVICE_URL};
use depsync::runner::{ComponentReport, Operation, Runner};
use depsync::scm::GitCli;
use depsync::scm::prompt::FixedPrompter;

#[derive(Parser)]
#[command(
    name = "depsync",
    about = "Sync the git working copies of a multi-repository checkout"
)]
struct Cli {
    /// Manifest listing the components
    #[arg(long, global = true, default_value = "depsync.json")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring every component to its pinned revision
    Sync(SyncArgs),

    /// Print the checked out revision of every component
    Revinfo,

    /// Discard local changes in every component
    Revert(SyncArgs),

    /// Show files changed relative to the upstream
    Status,

    /// Show the diff against the upstream
    Diff,

    /// Check dependencies
    Doctor,
}

#[derive(Args, Default)]
struct SyncArgs {
    /// Revision to sync every component to
    #[arg(long)]
    revision: Option<String>,

    /// Prune deleted remote branches and discard local modifications
    #[arg(long)]
    force: bool,

    /// Hard-reset diverged branches and discard local modifications
    #[arg(long)]
    reset: bool,

    /// Merge instead of rebasing branches that cannot fast-forward
    #[arg(long)]
    merge: bool,

    /// Rebase without asking
    #[arg(long)]
    auto_rebase: bool,

    /// Remove stale git lock files first
    #[arg(long)]
    break_repo_locks: bool,

    /// With --reset, also delete untracked directories
    #[arg(long)]
    delete_unversioned_trees: bool,

    /// Number of components synced in parallel
    #[arg(long, short)]
    jobs: Option<usize>,

    /// Patch to apply, as <repo>@<target-ref>:<patch-ref>
    #[arg(long = "patch-ref")]
    patch_refs: Vec<PatchSpec>,

    /// Check out patch refs as they are instead of rebasing them
    #[arg(long)]
    no_rebase_patch_ref: bool,

    /// Leave HEAD on the applied patch
    #[arg(long)]
    no_reset_patch_ref: bool,

    /// Mirror cache directory
    #[arg(long, conflicts_with = "no_cache")]
    cache_dir: Option<PathBuf>,

    /// Fetch directly from the remotes
    #[arg(long)]
    no_cache: bool,
}

impl SyncArgs {
    /// Layer the flags over the manifest's options.
    fn apply(&self, options: &mut SyncOptions) {
        if let Some(revision) = &self.revision {
            options.revision = Some(revision.clone());
        }
        options.force |= self.force;
        options.reset |= self.reset;
        options.merge |= self.merge;
        options.auto_rebase |= self.auto_rebase;
        options.break_repo_locks |= self.break_repo_locks;
        options.delete_unversioned_trees |= self.delete_unversioned_trees;
        if let Some(jobs) = self.jobs {
            options.jobs = jobs.max(1);
        }
        options.patch_refs.extend(self.patch_refs.iter().cloned());
        if self.no_rebase_patch_ref {
            options.rebase_patch_ref = false;
        }
        if self.no_reset_patch_ref {
            options.reset_patch_ref = false;
        }
    }

    fn cache(&self, manifest: &Manifest) -> MirrorCache {
        if self.no_cache {
            MirrorCache::disabled()
        } else if let Some(dir) = self.cache_dir.as_ref().or(manifest.cache_dir.as_ref()) {
            MirrorCache::new(dir)
        } else {
            MirrorCache::system()
        }
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Sync(args) => cmd_run(&cli.manifest, Operation::Sync, args),
        Commands::Revinfo => cmd_run(&cli.manifest, Operation::Revinfo, &SyncArgs::default()),
        Commands::Revert(args) => cmd_run(&cli.manifest, Operation::Revert, args),
        Commands::Status => cmd_run(&cli.manifest, Operation::Status, &SyncArgs::default()),
        Commands::Diff => cmd_run(&cli.manifest, Operation::Diff, &SyncArgs::default()),
        Commands::Doctor => cmd_doctor(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(
    manifest_path: &Path,
    operation: Operation,
    args: &SyncArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = Manifest::load(manifest_path)?;
    let mut options = manifest.options.clone();
    args.apply(&mut options);
    let cache = args.cache(&manifest);

    let service_url = manifest
        .package_service_url
        .clone()
        .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
    let mut runner = Runner::new(manifest, options, GitCli::new(), cache)
        .with_packages(Arc::new(CipdClient::new("cipd", service_url)));
    if !io::stdin().is_terminal() {
        // Nobody can answer a prompt; diverged branches fail with instructions.
        runner = runner.with_prompter(Arc::new(FixedPrompter("q".to_string())));
    }

    let interrupted = runner.interrupt_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupted; waiting for running components to finish");
        interrupted.store(true, Ordering::SeqCst);
    }) {
        log::warn!("could not install Ctrl-C handler: {e}");
    }

    let reports = runner.run(operation);
    let failed = print_reports(operation, &reports);
    if failed > 0 {
        return Err(format!("{failed} of {} components failed", reports.len()).into());
    }
    Ok(())
}

/// Print a summary line per component; returns the number of failures.
fn print_reports(operation: Operation, reports: &[ComponentReport]) -> usize {
    let mut failed = 0;
    for report in reports {
        match &report.result {
            Ok(Some(revision)) if operation == Operation::Revinfo => {
                println!("{}: {}", report.path, revision);
            }
            Ok(_) => {}
            Err(e) => {
                failed += 1;
                eprintln!("Error in {}: {}", report.path, e);
            }
        }
    }
    failed
}

fn cmd_doctor() -> Result<(), Box<dyn std::error::Error>> {
    println!("depsync System Check\n");

    let git_ok = GitCli::new().is_available();
    println!(
        "[{}] git: {}",
        if git_ok { "OK" } else { "FAIL" },
        if git_ok { "available" } else { "not found" }
    );

    let cipd_ok = std::process::Command::new("cipd")
        .arg("version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    println!(
        "[{}] cipd: {}",
        if cipd_ok { "OK" } else { "INFO" },
        if cipd_ok {
            "available"
        } else {
            "not found (needed for packages only)"
        }
    );

    let cache = MirrorCache::system();
    let cache_ok = cache.root().is_some_and(|p| p.exists());
    println!(
        "[{}] Mirror cache: {}",
        if cache_ok { "OK" } else { "INFO" },
        cache
            .root()
            .map(|p| p.display().to_string())
            .unwrap_or("unknown".into())
    );

    if !git_ok {
        std::process::exit(1);
    }

    Ok(())
}
