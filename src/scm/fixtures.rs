//! Repositories and fake git implementations shared by the scm tests.
//!
//! Real-git fixtures return `None` when no git executable is available so
//! the tests that use them skip instead of failing.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use super::git::{CommandOutput, Git, GitCli, ProcessError};

/// Git with a fixed identity so commits can be made anywhere.
pub(crate) fn git() -> GitCli {
    GitCli::new()
        .with_env("GIT_AUTHOR_NAME", "Some User")
        .with_env("GIT_AUTHOR_EMAIL", "someuser@example.com")
        .with_env("GIT_COMMITTER_NAME", "Some User")
        .with_env("GIT_COMMITTER_EMAIL", "someuser@example.com")
}

fn run(dir: &Path, args: &[&str]) -> String {
    git()
        .capture(args, dir)
        .unwrap_or_else(|e| panic!("fixture setup failed: {e}"))
}

/// Feed `stream` to `git fast-import` in `dir`, optionally exporting marks.
fn fast_import(dir: &Path, stream: &str, marks: Option<&Path>) {
    let mut cmd = Command::new("git");
    cmd.args(["fast-import", "--quiet"]);
    if let Some(marks) = marks {
        cmd.arg(format!("--export-marks={}", marks.display()));
    }
    let mut child = cmd
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stream.as_bytes())
        .unwrap();
    assert!(child.wait().unwrap().success(), "fast-import failed");
}

const SAMPLE_IMPORT: &str = "blob
mark :1
data 6
Hello

blob
mark :2
data 4
Bye

reset refs/heads/master
commit refs/heads/master
mark :3
author Bob <bob@example.com> 1253744361 -0700
committer Bob <bob@example.com> 1253744361 -0700
data 8
A and B
M 100644 :1 a
M 100644 :2 b

blob
mark :4
data 10
Hello
You

blob
mark :5
data 8
Bye
You

commit refs/heads/origin
mark :6
author Alice <alice@example.com> 1253744424 -0700
committer Alice <alice@example.com> 1253744424 -0700
data 13
Personalized
from :3
M 100644 :4 a
M 100644 :5 b

blob
mark :7
data 5
Mooh

commit refs/heads/feature
mark :8
author Bob <bob@example.com> 1390311986 -0000
committer Bob <bob@example.com> 1390311986 -0000
data 6
Add C
from :3
M 100644 :7 c

reset refs/heads/master
from :3
";

/// A checkout that is its own `origin`.
///
/// `master` and the checked out branch `new` are at "A and B"; the
/// remote-tracking `origin/master` is one commit ahead at "Personalized".
/// `feature` adds `c` on top of "A and B". Fetching with the default refspec
/// moves `origin/master` back to `master`.
pub(crate) struct SampleRepo {
    dir: TempDir,
}

impl SampleRepo {
    pub(crate) fn create() -> Option<Self> {
        if !GitCli::new().is_available() {
            return None;
        }
        let dir = tempfile::Builder::new().suffix(".git").tempdir().unwrap();
        let path = dir.path();
        run(path, &["init", "-q", "-b", "master"]);
        fast_import(path, SAMPLE_IMPORT, None);
        run(path, &["checkout", "-q"]);
        run(path, &["remote", "add", "-f", "origin", "."]);
        run(path, &["checkout", "-q", "-b", "new", "origin/master"]);
        run(path, &["push", "-q", "origin", "origin/origin:origin/master"]);
        run(path, &["config", "--unset", "remote.origin.fetch"]);
        run(path, &["config", "user.email", "someuser@example.com"]);
        run(path, &["config", "user.name", "Some User"]);
        let url = path.to_string_lossy().into_owned();
        run(path, &["remote", "set-url", "origin", &url]);
        Some(Self { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn url(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    /// Run git in the repository, panicking on failure.
    pub(crate) fn git(&self, args: &[&str]) -> String {
        run(self.path(), args)
    }

    pub(crate) fn rev_parse(&self, rev: &str) -> String {
        self.git(&["rev-parse", rev])
    }
}

/// Parent of each numbered commit; commit 1 is the root.
const GERRIT_PARENTS: [(usize, Option<usize>); 12] = [
    (1, None),
    (2, Some(1)),
    (3, Some(2)),
    (4, Some(3)),
    (5, Some(3)),
    (6, Some(5)),
    (7, Some(2)),
    (8, Some(7)),
    (9, Some(8)),
    (10, Some(8)),
    (11, Some(3)),
    (12, Some(11)),
];

const GERRIT_REFS: [(&str, usize); 6] = [
    ("refs/heads/master", 4),
    ("refs/heads/feature", 9),
    ("refs/heads/master-with-5", 12),
    ("refs/changes/34/1234/1", 5),
    ("refs/changes/35/1235/1", 6),
    ("refs/changes/36/1236/1", 10),
];

/// An origin shaped like a code review server.
///
/// ```text
/// 1 - 2 - 3 - 4                master
///     |   |\
///     |   | 5 - 6              changes 1234 (5) and 1235 (6)
///     |   11 - 12              master-with-5, 11 repeats 5
///     7 - 8 - 9                feature
///          \
///           10                 change 1236
/// ```
///
/// Commit N adds the file `commit-N`, except 11 which adds `commit-5` like 5
/// does. Commits 5, 6, 10 and 11 also write a `change` file holding their
/// change number.
pub(crate) struct GerritRepo {
    dir: TempDir,
    hashes: HashMap<usize, String>,
}

impl GerritRepo {
    pub(crate) fn create() -> Option<Self> {
        if !GitCli::new().is_available() {
            return None;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo_1");
        fs::create_dir(&repo).unwrap();
        run(&repo, &["init", "-q", "-b", "master"]);

        let marks = dir.path().join("marks");
        fast_import(&repo, &gerrit_import(), Some(&marks));
        run(&repo, &["update-ref", "-d", "refs/depsync/scratch"]);

        let hashes = fs::read_to_string(&marks)
            .unwrap()
            .lines()
            .filter_map(|line| {
                let (mark, hash) = line.split_once(' ')?;
                Some((mark.trim_start_matches(':').parse().ok()?, hash.to_string()))
            })
            .collect();
        Some(Self { dir, hashes })
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.dir.path().join("repo_1")
    }

    pub(crate) fn url(&self) -> String {
        self.path().to_string_lossy().into_owned()
    }

    /// Hash of numbered commit `n`.
    pub(crate) fn hash(&self, n: usize) -> String {
        self.hashes[&n].clone()
    }

    pub(crate) fn commit_count(&self) -> usize {
        self.hashes.len()
    }
}

fn gerrit_change(n: usize) -> Option<&'static str> {
    match n {
        5 | 11 => Some("1234\n"),
        6 => Some("1235\n"),
        10 => Some("1236\n"),
        _ => None,
    }
}

fn gerrit_import() -> String {
    let mut stream = String::new();
    for (n, parent) in GERRIT_PARENTS {
        let message = format!("Commit {n}\n");
        stream.push_str(&format!(
            "commit refs/depsync/scratch\nmark :{n}\n\
             author A U Thor <author@example.com> {t} +0000\n\
             committer A U Thor <author@example.com> {t} +0000\n\
             data {len}\n{message}",
            t = 1_500_000_000 + n,
            len = message.len(),
        ));
        if let Some(parent) = parent {
            stream.push_str(&format!("from :{parent}\n"));
        }
        let file = if n == 11 { 5 } else { n };
        stream.push_str(&format!("M 100644 inline commit-{file}\ndata 8\ntouched\n"));
        if let Some(change) = gerrit_change(n) {
            stream.push_str(&format!(
                "M 100644 inline change\ndata {}\n{change}",
                change.len()
            ));
        }
        stream.push('\n');
    }
    for (name, n) in GERRIT_REFS {
        stream.push_str(&format!("reset {name}\nfrom :{n}\n\n"));
    }
    stream
}

/// Numbers of the `commit-N` files present in `root`.
pub(crate) fn commits_present(root: &Path, origin: &GerritRepo) -> Vec<usize> {
    (1..=origin.commit_count())
        .filter(|n| root.join(format!("commit-{n}")).exists())
        .collect()
}

type Reply = Result<&'static str, i32>;

#[derive(Default)]
struct Script {
    expected: VecDeque<(&'static str, Reply)>,
    calls: Vec<String>,
    create_git_dir_on_clone: bool,
}

/// A [`Git`] that checks each call against an expected command prefix and
/// answers with canned output or an exit code.
#[derive(Clone, Default)]
pub(crate) struct ScriptedGit {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGit {
    pub(crate) fn new(expected: Vec<(&'static str, Reply)>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                expected: expected.into(),
                ..Default::default()
            })),
        }
    }

    /// Make a successful `clone` create `<destination>/.git`.
    pub(crate) fn creating_git_dir_on_clone(self) -> Self {
        self.script.lock().unwrap().create_git_dir_on_clone = true;
        self
    }

    /// Every command run so far, arguments joined by spaces.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Expected commands that were never run.
    pub(crate) fn remaining(&self) -> Vec<&'static str> {
        let script = self.script.lock().unwrap();
        script.expected.iter().map(|(prefix, _)| *prefix).collect()
    }
}

impl Git for ScriptedGit {
    fn run(&self, args: &[&str], cwd: &Path) -> Result<CommandOutput, ProcessError> {
        let mut script = self.script.lock().unwrap();
        let joined = args.join(" ");
        script.calls.push(joined.clone());
        let Some((prefix, reply)) = script.expected.pop_front() else {
            panic!("unexpected git call: {joined}");
        };
        assert!(
            joined.starts_with(prefix),
            "expected git call starting with {prefix:?}, got {joined:?}"
        );

        match reply {
            Ok(stdout) => {
                if args.first() == Some(&"clone") && script.create_git_dir_on_clone {
                    if let Some(dest) = args.last() {
                        fs::create_dir_all(Path::new(dest).join(".git")).unwrap();
                    }
                }
                Ok(CommandOutput {
                    stdout: stdout.to_string(),
                    ..Default::default()
                })
            }
            Err(code) => Err(ProcessError {
                cmd: std::iter::once("git")
                    .chain(args.iter().copied())
                    .map(String::from)
                    .collect(),
                cwd: cwd.to_path_buf(),
                code: Some(code),
                stdout: String::new(),
                stderr: format!("scripted failure of {joined}"),
            }),
        }
    }
}
