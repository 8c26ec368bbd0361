//! Mirror cache directory layout
//!
//! ```text
//! ~/.cache/depsync/
//! ├── chromium.googlesource.com-chromium-src-706fa062/   # bare mirror of one URL
//! ├── github.com-org-repo-4c06e3f1/
//! └── locks/
//!     └── github.com-org-repo-4c06e3f1.lock              # flock-based locking
//! ```

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::mirror::Mirror;

/// Maps remote URLs to mirror directories under a cache root.
///
/// A cache without a root is disabled: [`MirrorCache::mirror_for`] returns
/// `None` and working copies talk to their origin directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorCache {
    root: Option<PathBuf>,
}

impl MirrorCache {
    /// Creates a cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// A cache that never mirrors.
    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// Cache rooted in the system cache directory + "depsync"
    ///
    /// Uses `dirs::cache_dir()` which resolves to:
    /// - Linux: `~/.cache`
    /// - macOS: `~/Library/Caches`
    /// - Windows: `C:\Users\<user>\AppData\Local`
    pub fn system() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        Self::new(cache_dir.join("depsync"))
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Returns the locks directory path: `{root}/locks`
    pub fn locks_dir(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join("locks"))
    }

    /// Mirror of `url`, or `None` when caching is disabled.
    pub fn mirror_for(&self, url: &str) -> Option<Mirror> {
        let root = self.root.as_ref()?;
        let locks = self.locks_dir()?;
        let name = url_to_cache_name(url);
        Some(Mirror::new(
            url,
            root.join(&name),
            locks.join(format!("{name}.lock")),
        ))
    }
}

/// Flatten a URL into a single directory name.
///
/// Scheme, credentials and a trailing `.git` do not change the repository,
/// so they are dropped. The readable part is lowercased; the short SHA-256
/// suffix is taken over the case- and port-preserving remainder, so URLs
/// naming different repositories never share a mirror.
pub fn url_to_cache_name(url: &str) -> String {
    let identity = url_identity(url);
    let readable = identity
        .replace('-', "--")
        .replace(['/', '\\'], "-")
        .replace(':', "")
        .to_lowercase();
    let digest = format!("{:x}", Sha256::digest(identity.as_bytes()));
    format!("{}-{}", readable.trim_start_matches('-'), &digest[..8])
}

/// `host[:port]/path` of a URL, or the path itself for local repositories.
fn url_identity(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let joined = match trimmed.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(i) => format!("{}{}", without_credentials(&rest[..i]), &rest[i..]),
            None => without_credentials(rest).to_string(),
        },
        None => match scp_split(trimmed) {
            Some((host, path)) => format!("{}/{}", without_credentials(host), path),
            None => trimmed.to_string(),
        },
    };
    match joined.strip_suffix(".git") {
        Some(stripped) => stripped.to_string(),
        None => joined,
    }
}

fn without_credentials(authority: &str) -> &str {
    authority.rsplit('@').next().unwrap_or(authority)
}

/// Split scp-like `user@host:path` into host and path.
fn scp_split(url: &str) -> Option<(&str, &str)> {
    let colon = url.find(':')?;
    // A single letter before ':' is a Windows drive.
    if colon <= 1 || url.find('/').is_some_and(|slash| slash < colon) {
        return None;
    }
    Some((&url[..colon], &url[colon + 1..]))
}
