//! Components delivered as versioned packages instead of git checkouts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SERVICE_URL: &str = "https://chrome-infra-packages.appspot.com";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("unreadable package description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command failed: {} (exit code: {code:?})\n{stderr}", .cmd.join(" "))]
    Command {
        cmd: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{package}: {source}")]
    Ensure {
        package: String,
        source: Arc<PackageError>,
    },
}

/// One package pinned to a version, installed under `path` of the root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
    pub path: String,
    pub name: String,
    pub version: String,
}

/// A directory tree of packages managed by one package client.
pub trait PackageRoot: Send + Sync {
    /// Install exactly `packages` under `root`.
    fn ensure(&self, root: &Path, packages: &[Package]) -> Result<(), PackageError>;

    /// Instance id of the pinned version of `package`.
    fn describe(&self, package: &Package) -> Result<String, PackageError>;

    /// Remove everything the client installed under `root`.
    fn clobber(&self, root: &Path, packages: &[Package]) -> Result<(), PackageError>;
}

/// [`PackageRoot`] backed by the `cipd` executable.
#[derive(Debug, Clone)]
pub struct CipdClient {
    binary: PathBuf,
    service_url: String,
}

impl CipdClient {
    pub fn new(binary: impl Into<PathBuf>, service_url: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            service_url: service_url.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<(), PackageError> {
        log::debug!("{} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            let mut cmd = vec![self.binary.display().to_string()];
            cmd.extend(args.iter().map(|arg| arg.to_string()));
            return Err(PackageError::Command {
                cmd,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// Ensure file contents, packages grouped by install directory.
    fn ensure_file(&self, packages: &[Package]) -> String {
        let mut by_subdir: BTreeMap<&str, Vec<&Package>> = BTreeMap::new();
        for package in packages {
            by_subdir.entry(&package.path).or_default().push(package);
        }

        let mut contents = format!("$ServiceURL {}\n", self.service_url);
        for (subdir, packages) in by_subdir {
            contents.push_str(&format!("@Subdir {subdir}\n"));
            for package in packages {
                contents.push_str(&format!("{} {}\n", package.name, package.version));
            }
        }
        contents
    }
}

#[derive(Deserialize)]
struct DescribeOutput {
    result: DescribeResult,
}

#[derive(Deserialize)]
struct DescribeResult {
    pin: Pin,
}

#[derive(Deserialize)]
struct Pin {
    instance_id: String,
}

impl PackageRoot for CipdClient {
    fn ensure(&self, root: &Path, packages: &[Package]) -> Result<(), PackageError> {
        fs::create_dir_all(root)?;
        let dir = tempfile::tempdir()?;
        let ensure_file = dir.path().join("ensure");
        fs::write(&ensure_file, self.ensure_file(packages))?;

        log::info!("ensuring {} packages in {}", packages.len(), root.display());
        self.run(&[
            "ensure",
            "-root",
            &root.to_string_lossy(),
            "-ensure-file",
            &ensure_file.to_string_lossy(),
        ])
    }

    fn describe(&self, package: &Package) -> Result<String, PackageError> {
        let dir = tempfile::tempdir()?;
        let json_path = dir.path().join("describe.json");
        self.run(&[
            "describe",
            &package.name,
            "-log-level",
            "error",
            "-version",
            &package.version,
            "-json-output",
            &json_path.to_string_lossy(),
        ])?;
        let output: DescribeOutput = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        Ok(output.result.pin.instance_id)
    }

    fn clobber(&self, root: &Path, packages: &[Package]) -> Result<(), PackageError> {
        let targets = std::iter::once(root.join(".cipd"))
            .chain(packages.iter().map(|package| root.join(&package.path)));
        for target in targets {
            match fs::remove_dir_all(&target) {
                Ok(()) => log::info!("removed {}", target.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// One package seen as a component.
///
/// Syncing happens for the whole root through [`PackageRoot::ensure`], so
/// `update` and `revert` have nothing to do per package.
#[derive(Clone)]
pub struct PackageCheckout {
    package: Package,
    root: Arc<dyn PackageRoot>,
}

impl PackageCheckout {
    pub fn new(package: Package, root: Arc<dyn PackageRoot>) -> Self {
        Self { package, root }
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn update(&self) -> Result<(), PackageError> {
        Ok(())
    }

    pub fn revert(&self) -> Result<(), PackageError> {
        Ok(())
    }

    pub fn revinfo(&self) -> Result<String, PackageError> {
        self.root.describe(&self.package)
    }
}
