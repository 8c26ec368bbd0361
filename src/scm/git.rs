//! Git invocation.
//!
//! Every repository operation goes through the [`Git`] trait so the sync
//! state machine can be driven by a scripted implementation in tests. The
//! production implementation, [`GitCli`], shells out to the `git` executable
//! with interactive prompts and hooks disabled.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::output::Printer;

/// A git process that could not be started or exited non-zero.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("command failed: {} in '{}' (exit code: {code:?})\n{stderr}", .cmd.join(" "), .cwd.display())]
pub struct ProcessError {
    /// `git` followed by the caller's arguments.
    pub cmd: Vec<String>,
    pub cwd: PathBuf,
    /// `None` when the process never ran or was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessError {
    fn new(args: &[&str], cwd: &Path) -> Self {
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push("git".to_string());
        cmd.extend(args.iter().map(|arg| arg.to_string()));
        Self {
            cmd,
            cwd: cwd.to_path_buf(),
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// True when the process ran and exited with `code`.
    pub fn exited_with(&self, code: i32) -> bool {
        self.code == Some(code)
    }
}

/// Captured output of a successful git command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Capability for running git in a directory.
pub trait Git: Send + Sync {
    /// Run `git <args>` in `cwd`, failing on a non-zero exit.
    fn run(&self, args: &[&str], cwd: &Path) -> Result<CommandOutput, ProcessError>;

    /// Run `git <args>` in `cwd` and return stdout without trailing whitespace.
    fn capture(&self, args: &[&str], cwd: &Path) -> Result<String, ProcessError> {
        self.run(args, cwd)
            .map(|output| output.stdout.trim_end().to_string())
    }
}

/// Git CLI wrapper with security hardening.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
    envs: Vec<(String, String)>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
            envs: Vec::new(),
        }
    }

    /// Add an environment variable to every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Whether the git executable can be started at all.
    pub fn is_available(&self) -> bool {
        self.command()
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=/dev/null` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath=/dev/null"]);
        cmd.stdin(Stdio::null());
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

impl Git for GitCli {
    fn run(&self, args: &[&str], cwd: &Path) -> Result<CommandOutput, ProcessError> {
        log::debug!("git {} (in {})", args.join(" "), cwd.display());

        let output = self
            .command()
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| {
                let mut err = ProcessError::new(args, cwd);
                err.stderr = e.to_string();
                err
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let mut err = ProcessError::new(args, cwd);
            err.code = output.status.code();
            err.stdout = stdout;
            err.stderr = stderr;
            return Err(err);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            code: 0,
        })
    }
}

/// Run a command with a progress header and echo its output.
pub fn run_logged<G: Git + ?Sized>(
    git: &G,
    printer: &Printer,
    args: &[&str],
    cwd: &Path,
) -> Result<CommandOutput, ProcessError> {
    printer.command_header(args, cwd);
    let result = git.run(args, cwd);
    match &result {
        Ok(output) => {
            printer.raw(&output.stdout);
            printer.raw(&output.stderr);
        }
        Err(err) => {
            printer.raw(&err.stdout);
            printer.raw(&err.stderr);
        }
    }
    result
}

/// Whether `rev` names a commit in the repository at `cwd`.
pub fn is_valid_revision<G: Git + ?Sized>(
    git: &G,
    cwd: &Path,
    rev: &str,
) -> Result<bool, ProcessError> {
    let spec = format!("{rev}^{{commit}}");
    match git.run(&["rev-parse", "-q", "--verify", &spec], cwd) {
        Ok(_) => Ok(true),
        Err(e) if e.exited_with(1) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether `ancestor` is reachable from `descendant`.
pub fn is_ancestor<G: Git + ?Sized>(
    git: &G,
    cwd: &Path,
    ancestor: &str,
    descendant: &str,
) -> Result<bool, ProcessError> {
    match git.run(&["merge-base", "--is-ancestor", ancestor, descendant], cwd) {
        Ok(_) => Ok(true),
        Err(e) if e.exited_with(1) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Name of the checked out branch, `None` for a detached HEAD.
pub fn current_branch<G: Git + ?Sized>(git: &G, cwd: &Path) -> Result<Option<String>, ProcessError> {
    let branch = git.capture(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)?;
    if branch == "HEAD" {
        Ok(None)
    } else {
        Ok(Some(branch))
    }
}

/// Full name of the current branch's upstream, if one is configured.
pub fn upstream_branch<G: Git + ?Sized>(git: &G, cwd: &Path) -> Result<Option<String>, ProcessError> {
    match git.capture(&["rev-parse", "--symbolic-full-name", "@{upstream}"], cwd) {
        Ok(upstream) if upstream.is_empty() => Ok(None),
        Ok(upstream) => Ok(Some(upstream)),
        Err(e) if e.code.is_some() => Ok(None),
        Err(e) => Err(e),
    }
}

/// URL of the first remote configured in the repository at `cwd`.
pub fn first_remote_url<G: Git + ?Sized>(git: &G, cwd: &Path) -> Result<Option<String>, ProcessError> {
    let remotes = git.capture(&["config", "--local", "--get-regexp", r"remote.*.url"], cwd)?;
    Ok(parse_first_remote_url(&remotes))
}

fn parse_first_remote_url(remotes: &str) -> Option<String> {
    let line = remotes.lines().next()?;
    line.split_once(' ').map(|(_, url)| url.to_string())
}
