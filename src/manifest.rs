//! The JSON manifest listing the components of a checkout.
//!
//! ```json
//! {
//!   "root_dir": "src",
//!   "options": { "jobs": 4 },
//!   "components": [
//!     { "path": ".", "url": "https://host/main.git" },
//!     { "path": "third_party/lib", "url": "https://host/lib.git@refs/heads/stable" }
//!   ],
//!   "packages": [
//!     { "path": "buildtools", "name": "infra/gn", "version": "latest" }
//!   ]
//! }
//! ```
//!
//! A relative `root_dir` or `cache_dir` is taken relative to the manifest.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::options::SyncOptions;
use crate::package::Package;
use crate::scm::working_copy::WorkingCopy;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

fn default_branch() -> String {
    "master".to_string()
}

fn managed() -> bool {
    true
}

/// A git component.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Component {
    /// Checkout directory relative to the root.
    pub path: String,
    /// Remote URL, optionally with an `@revision` suffix.
    pub url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Unmanaged components are verified but never moved.
    #[serde(default = "managed")]
    pub managed: bool,
}

impl Component {
    pub fn working_copy(&self, root_dir: &Path) -> WorkingCopy {
        WorkingCopy::new(&self.url, root_dir, self.path.as_str())
            .with_default_branch(self.default_branch.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub root_dir: PathBuf,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Defaults for command line options.
    #[serde(default)]
    pub options: SyncOptions,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub package_service_url: Option<String>,
}

impl Manifest {
    /// Read and validate the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::parse(&text).map_err(|e| match e {
            ManifestError::Parse { source, .. } => ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if manifest.root_dir.is_relative() {
            manifest.root_dir = base.join(&manifest.root_dir);
        }
        if let Some(cache_dir) = manifest.cache_dir.as_mut() {
            if cache_dir.is_relative() {
                *cache_dir = base.join(&*cache_dir);
            }
        }
        Ok(manifest)
    }

    /// Parse and validate manifest text; paths are left as written.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(text).map_err(|source| ManifestError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        let paths = self
            .components
            .iter()
            .map(|c| c.path.as_str())
            .chain(self.packages.iter().map(|p| p.path.as_str()));
        for path in paths {
            if Path::new(path).is_absolute() || path.split(['/', '\\']).any(|part| part == "..") {
                return Err(ManifestError::Invalid(format!(
                    "path {path:?} must stay inside the root"
                )));
            }
            let normalized = path.trim_end_matches('/');
            let normalized = if normalized.is_empty() { "." } else { normalized };
            if !seen.insert(normalized) {
                return Err(ManifestError::Invalid(format!("duplicate path {path:?}")));
            }
        }
        if let Some(component) = self.components.iter().find(|c| c.url.trim().is_empty()) {
            return Err(ManifestError::Invalid(format!(
                "component {:?} has no url",
                component.path
            )));
        }
        Ok(())
    }

    /// The component a `--patch-ref` repo refers to, by URL or by path.
    pub fn find_component(&self, repo: &str) -> Option<&Component> {
        let repo = repo.trim_end_matches('/');
        self.components.iter().find(|c| {
            let (url, _) = crate::scm::revision::split_url_revision(&c.url);
            url.trim_end_matches('/') == repo || c.path.trim_end_matches('/') == repo
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_manifest_uses_defaults() {
        let manifest = Manifest::parse(
            r#"{"root_dir": "/w", "components": [{"path": "src", "url": "https://host/repo"}]}"#,
        )
        .unwrap();
        let component = &manifest.components[0];
        assert_eq!(component.default_branch, "master");
        assert!(component.managed);
        assert_eq!(manifest.options, SyncOptions::default());
        assert!(manifest.packages.is_empty());

        let copy = component.working_copy(&manifest.root_dir);
        assert_eq!(copy.checkout_path(), PathBuf::from("/w/src"));
        assert_eq!(copy.default_branch(), "master");
    }

    #[test]
    fn load_resolves_relative_dirs_against_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depsync.json");
        fs::write(
            &path,
            r#"{
                "root_dir": "checkout",
                "cache_dir": "cache",
                "options": {"jobs": 3},
                "components": [
                    {"path": ".", "url": "https://host/main", "default_branch": "main"},
                    {"path": "lib", "url": "https://host/lib@refs/heads/stable", "managed": false}
                ],
                "packages": [{"path": "tools", "name": "infra/gn", "version": "latest"}]
            }"#,
        )
        .unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.root_dir, dir.path().join("checkout"));
        assert_eq!(manifest.cache_dir, Some(dir.path().join("cache")));
        assert_eq!(manifest.options.jobs, 3);
        assert!(!manifest.components[1].managed);
        assert_eq!(manifest.packages[0].name, "infra/gn");

        let lib = manifest.components[1].working_copy(&manifest.root_dir);
        assert_eq!(lib.url(), "https://host/lib");
        assert_eq!(lib.declared_revision(), Some("refs/heads/stable"));
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let err = Manifest::parse(
            r#"{"root_dir": "/w", "components": [
                {"path": "src", "url": "a"},
                {"path": "src/", "url": "b"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Invalid(_)), "{err:?}");
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for path in ["../outside", "/abs", "a/../../b"] {
            let text = format!(
                r#"{{"root_dir": "/w", "components": [{{"path": "{path}", "url": "u"}}]}}"#
            );
            assert!(Manifest::parse(&text).is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Manifest::parse(r#"{"root_dir": "/w", "deps": {}}"#).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }), "{err:?}");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Manifest::load(Path::new("/nonexistent/depsync.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }), "{err:?}");
    }

    #[test]
    fn components_are_found_by_url_or_path() {
        let manifest = Manifest::parse(
            r#"{"root_dir": "/w", "components": [
                {"path": "src", "url": "https://host/main@refs/heads/dev"},
                {"path": "lib", "url": "https://host/lib"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(manifest.find_component("https://host/main").unwrap().path, "src");
        assert_eq!(manifest.find_component("lib").unwrap().path, "lib");
        assert!(manifest.find_component("https://host/other").is_none());
    }
}
