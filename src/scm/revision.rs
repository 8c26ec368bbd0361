//! Revision specifications.
//!
//! A component declares what it wants checked out either in its URL
//! (`https://host/repo.git@refs/heads/main`) or through an override on the
//! command line. [`RevisionSpec::resolve`] turns that text into a typed spec
//! and the spec knows which local ref, if any, a checkout should move to.

use std::fmt;

use thiserror::Error;

/// Literal revision that marks a component as not managed by the sync.
pub const UNMANAGED: &str = "unmanaged";

/// Errors from interpreting a revision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The revision text is malformed.
    #[error("invalid revision {revision:?}: {reason}")]
    Invalid {
        revision: String,
        reason: &'static str,
    },
    /// The revision does not name a commit, even after fetching.
    #[error("{0} does not appear to be a valid revision in this repository")]
    Unknown(String),
}

/// What a component should be synced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSpec {
    /// A full commit hash.
    AbsoluteHash(String),
    /// A bare branch name, taken from the `origin` remote.
    LocalBranch(String),
    /// A fully qualified `refs/...` name.
    FullRef(String),
    /// A code-review change ref (`refs/changes/...`), fetched on demand.
    GerritChangeRef(String),
    /// Leave the checkout alone.
    Unmanaged,
}

impl RevisionSpec {
    /// Resolve the effective revision for a component.
    ///
    /// `requested` (a command line override) wins over `declared` (the URL's
    /// `@rev` suffix). An empty result means the default branch of `origin`.
    pub fn resolve(
        requested: Option<&str>,
        declared: Option<&str>,
        default_branch: &str,
    ) -> Result<Self, ResolveError> {
        let requested = requested.filter(|rev| !rev.is_empty());
        if requested == Some(UNMANAGED) {
            return Ok(Self::Unmanaged);
        }
        match requested.or(declared.filter(|rev| !rev.is_empty())) {
            Some(rev) => Self::parse(rev),
            None => Ok(Self::FullRef(format!("refs/remotes/origin/{default_branch}"))),
        }
    }

    /// Parse a single non-empty revision string.
    pub fn parse(rev: &str) -> Result<Self, ResolveError> {
        validate_revision(rev)?;
        if rev == UNMANAGED {
            Ok(Self::Unmanaged)
        } else if is_commit_hash(rev) {
            Ok(Self::AbsoluteHash(rev.to_ascii_lowercase()))
        } else if rev.starts_with("refs/changes/") {
            Ok(Self::GerritChangeRef(rev.to_string()))
        } else if rev.starts_with("refs/") {
            Ok(Self::FullRef(rev.to_string()))
        } else {
            Ok(Self::LocalBranch(rev.to_string()))
        }
    }

    pub fn is_unmanaged(&self) -> bool {
        matches!(self, Self::Unmanaged)
    }

    /// The commit hash, for [`RevisionSpec::AbsoluteHash`].
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::AbsoluteHash(hash) => Some(hash),
            _ => None,
        }
    }

    /// Local name to check out after a plain `fetch origin`.
    ///
    /// `None` means the revision has to be fetched explicitly (see
    /// [`RevisionSpec::fetch_ref`]).
    pub fn checkout_target(&self) -> Option<String> {
        match self {
            Self::AbsoluteHash(hash) => Some(hash.clone()),
            Self::LocalBranch(name) => Some(
                ref_to_remote_ref(name).unwrap_or_else(|| format!("refs/remotes/origin/{name}")),
            ),
            Self::FullRef(name) => Some(ref_to_remote_ref(name).unwrap_or_else(|| name.clone())),
            Self::GerritChangeRef(_) | Self::Unmanaged => None,
        }
    }

    /// A ref outside the standard fetch refspec that must be fetched by name
    /// when it is not present locally.
    pub fn fetch_ref(&self) -> Option<&str> {
        match self {
            Self::GerritChangeRef(name) => Some(name),
            Self::FullRef(name) if ref_to_remote_ref(name).is_none() => Some(name),
            _ => None,
        }
    }

    /// Release branch on the remote (`refs/branch-heads/N`) that the default
    /// fetch refspec does not cover.
    pub fn branch_heads_ref(&self) -> Option<String> {
        let Self::FullRef(name) = self else {
            return None;
        };
        let branch = name
            .strip_prefix("refs/branch-heads/")
            .or_else(|| name.strip_prefix("refs/remotes/branch-heads/"))?;
        Some(format!("refs/branch-heads/{branch}"))
    }

    /// Refspec that keeps the remote-tracking ref of a release branch
    /// current, e.g. `+refs/branch-heads/N:refs/remotes/branch-heads/N`.
    pub fn tracking_refspec(&self) -> Option<String> {
        let name = self.branch_heads_ref()?;
        let remote = ref_to_remote_ref(&name)?;
        Some(format!("+{name}:{remote}"))
    }

    /// Name shown after "Checked out ... to a detached HEAD": the remote ref
    /// for refs, `None` when the resolved hash should be shown.
    pub fn checkout_label(&self) -> Option<String> {
        match self {
            Self::FullRef(_) => self.checkout_target(),
            _ => None,
        }
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbsoluteHash(hash) => f.write_str(hash),
            Self::LocalBranch(_) | Self::FullRef(_) => match self.checkout_target() {
                Some(target) => f.write_str(&target),
                None => f.write_str(UNMANAGED),
            },
            Self::GerritChangeRef(name) => f.write_str(name),
            Self::Unmanaged => f.write_str(UNMANAGED),
        }
    }
}

/// Whether `rev` has the shape of a full SHA-1 or SHA-256 commit hash.
pub fn is_commit_hash(rev: &str) -> bool {
    (rev.len() == 40 || rev.len() == 64) && rev.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Map a ref on the remote to the remote-tracking ref it is fetched into.
///
/// `refs/heads/X` and `refs/remotes/origin/X` become
/// `refs/remotes/origin/X`, `refs/branch-heads/X` becomes
/// `refs/remotes/branch-heads/X`. Anything else has no tracking ref.
pub fn ref_to_remote_ref(name: &str) -> Option<String> {
    if let Some(branch) = name.strip_prefix("refs/heads/") {
        return Some(format!("refs/remotes/origin/{branch}"));
    }
    if let Some(branch) = name.strip_prefix("refs/branch-heads/") {
        return Some(format!("refs/remotes/branch-heads/{branch}"));
    }
    if let Some(branch) = name.strip_prefix("origin/") {
        return Some(format!("refs/remotes/origin/{branch}"));
    }
    if name.starts_with("refs/remotes/") {
        return Some(name.to_string());
    }
    None
}

/// Split a `url@revision` pair.
///
/// Only an `@` in the path part separates a revision, so the user of
/// `ssh://user@host/repo` or `git@host:repo` is left alone.
pub fn split_url_revision(url: &str) -> (String, Option<String>) {
    let path_start = match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            url[authority_start..]
                .find('/')
                .map(|i| authority_start + i)
                .unwrap_or(url.len())
        }
        None => scp_path_start(url),
    };

    match url[path_start..].rfind('@') {
        Some(i) => {
            let at = path_start + i;
            (url[..at].to_string(), Some(url[at + 1..].to_string()))
        }
        None => (url.to_string(), None),
    }
}

/// Start of the path in an scp-like `user@host:path`, or 0 for plain paths.
fn scp_path_start(url: &str) -> usize {
    match (url.find(':'), url.find('/')) {
        // A single letter before ':' is a Windows drive.
        (Some(colon), slash) if colon > 1 && slash.is_none_or(|slash| colon < slash) => colon + 1,
        _ => 0,
    }
}

/// Reject revisions that could be mistaken for options or path traversal.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..`
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub fn validate_revision(rev: &str) -> Result<(), ResolveError> {
    let invalid = |reason| ResolveError::Invalid {
        revision: rev.to_string(),
        reason,
    };
    if rev.is_empty() {
        return Err(invalid("revision cannot be empty"));
    }
    if rev.contains("..") {
        return Err(invalid("revision cannot contain '..'"));
    }
    if rev.starts_with('-') {
        return Err(invalid("revision cannot start with '-'"));
    }
    if rev.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(invalid("revision cannot contain control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "a7142dc9f0009350b96a11f372b6ea658592aa95";

    #[test]
    fn empty_revision_uses_default_branch() {
        assert_eq!(
            RevisionSpec::resolve(None, None, "master").unwrap(),
            RevisionSpec::FullRef("refs/remotes/origin/master".into())
        );
        assert_eq!(
            RevisionSpec::resolve(Some(""), Some(""), "main").unwrap(),
            RevisionSpec::FullRef("refs/remotes/origin/main".into())
        );
    }

    #[test]
    fn requested_revision_overrides_declared() {
        assert_eq!(
            RevisionSpec::resolve(Some("feature"), Some(HASH), "master").unwrap(),
            RevisionSpec::LocalBranch("feature".into())
        );
        assert_eq!(
            RevisionSpec::resolve(None, Some(HASH), "master").unwrap(),
            RevisionSpec::AbsoluteHash(HASH.into())
        );
    }

    #[test]
    fn unmanaged_wins_over_declared() {
        let spec = RevisionSpec::resolve(Some(UNMANAGED), Some("feature"), "master").unwrap();
        assert!(spec.is_unmanaged());
        assert_eq!(spec.checkout_target(), None);
    }

    #[test]
    fn hashes_are_detected_by_shape() {
        assert!(is_commit_hash(HASH));
        assert!(is_commit_hash(&"ab".repeat(32)));
        assert!(!is_commit_hash("a7142dc"));
        assert!(!is_commit_hash(&"g".repeat(40)));
        assert_eq!(
            RevisionSpec::parse(&HASH.to_uppercase()).unwrap().hash(),
            Some(HASH)
        );
    }

    #[test]
    fn branch_names_map_to_origin() {
        let spec = RevisionSpec::parse("feature").unwrap();
        assert_eq!(spec.checkout_target().as_deref(), Some("refs/remotes/origin/feature"));
        assert_eq!(spec.checkout_label(), None);
        assert_eq!(spec.fetch_ref(), None);
    }

    #[test]
    fn heads_refs_map_to_remote_tracking_refs() {
        let spec = RevisionSpec::parse("refs/heads/feature").unwrap();
        assert_eq!(spec.checkout_target().as_deref(), Some("refs/remotes/origin/feature"));
        assert_eq!(spec.checkout_label().as_deref(), Some("refs/remotes/origin/feature"));
        assert_eq!(spec.to_string(), "refs/remotes/origin/feature");

        let spec = RevisionSpec::parse("refs/remotes/origin/feature").unwrap();
        assert_eq!(spec.checkout_target().as_deref(), Some("refs/remotes/origin/feature"));

        let spec = RevisionSpec::parse("refs/branch-heads/4044").unwrap();
        assert_eq!(spec.checkout_target().as_deref(), Some("refs/remotes/branch-heads/4044"));
    }

    #[test]
    fn branch_heads_are_fetched_into_tracking_refs() {
        for rev in ["refs/branch-heads/4044", "refs/remotes/branch-heads/4044"] {
            let spec = RevisionSpec::parse(rev).unwrap();
            assert_eq!(spec.branch_heads_ref().as_deref(), Some("refs/branch-heads/4044"));
            assert_eq!(
                spec.tracking_refspec().as_deref(),
                Some("+refs/branch-heads/4044:refs/remotes/branch-heads/4044")
            );
        }
        let spec = RevisionSpec::parse("refs/heads/main").unwrap();
        assert_eq!(spec.branch_heads_ref(), None);
        assert_eq!(spec.tracking_refspec(), None);
    }

    #[test]
    fn change_refs_are_fetched_by_name() {
        let spec = RevisionSpec::parse("refs/changes/35/1235/1").unwrap();
        assert_eq!(spec, RevisionSpec::GerritChangeRef("refs/changes/35/1235/1".into()));
        assert_eq!(spec.checkout_target(), None);
        assert_eq!(spec.fetch_ref(), Some("refs/changes/35/1235/1"));
    }

    #[test]
    fn other_refs_are_checked_out_or_fetched_by_name() {
        let spec = RevisionSpec::parse("refs/tags/v1.0").unwrap();
        assert_eq!(spec.checkout_target().as_deref(), Some("refs/tags/v1.0"));
        assert_eq!(spec.fetch_ref(), Some("refs/tags/v1.0"));
    }

    #[test]
    fn ref_to_remote_ref_mapping() {
        assert_eq!(
            ref_to_remote_ref("origin/main").as_deref(),
            Some("refs/remotes/origin/main")
        );
        assert_eq!(ref_to_remote_ref("refs/tags/v1"), None);
        assert_eq!(ref_to_remote_ref("main"), None);
    }

    #[test]
    fn split_url_revision_cases() {
        let cases: [(&str, &str, Option<&str>); 8] = [
            ("https://host/repo.git", "https://host/repo.git", None),
            (
                "https://host/repo.git@refs/heads/main",
                "https://host/repo.git",
                Some("refs/heads/main"),
            ),
            (
                "ssh://user-name@example.com/~/test.git@stable",
                "ssh://user-name@example.com/~/test.git",
                Some("stable"),
            ),
            ("ssh://user@host/repo", "ssh://user@host/repo", None),
            ("git@github.com:org/repo.git", "git@github.com:org/repo.git", None),
            ("git@github.com:org/repo.git@v1", "git@github.com:org/repo.git", Some("v1")),
            ("/tmp/origin@feature", "/tmp/origin", Some("feature")),
            ("C:\\src\\repo@abc", "C:\\src\\repo", Some("abc")),
        ];
        for (url, base, rev) in cases {
            let (got_base, got_rev) = split_url_revision(url);
            assert_eq!(got_base, base, "base of {url}");
            assert_eq!(got_rev.as_deref(), rev, "revision of {url}");
        }
    }

    #[test]
    fn validate_revision_rejects_unsafe_values() {
        for rev in ["", "a..b", "-malicious", "foo\0bar", "foo\nbar"] {
            assert!(
                matches!(RevisionSpec::parse(rev), Err(ResolveError::Invalid { .. })),
                "{rev:?} should be rejected"
            );
        }
    }

    #[test]
    fn validate_revision_accepts_refs() {
        for rev in ["main", "refs/heads/feature/x", "v1.0", HASH] {
            assert!(validate_revision(rev).is_ok(), "{rev:?} should be accepted");
        }
    }

    #[test]
    fn unknown_error_message() {
        let err = ResolveError::Unknown("deadbeef".into());
        assert_eq!(
            err.to_string(),
            "deadbeef does not appear to be a valid revision in this repository"
        );
    }
}
