//! Stale git lock files.
//!
//! A git process that crashes can leave `index.lock` (or a ref lock) behind,
//! after which every later command touching that file fails. These helpers
//! find and, on request, remove such files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::output::Printer;

/// The first lock file under `git_dir`, preferring `index.lock`.
pub fn detect(git_dir: &Path) -> Option<PathBuf> {
    let index_lock = git_dir.join("index.lock");
    if index_lock.is_file() {
        return Some(index_lock);
    }
    find_all(git_dir).ok()?.into_iter().next()
}

/// Every regular `*.lock` file under `git_dir`, sorted.
pub fn find_all(git_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut locks = Vec::new();
    if git_dir.is_dir() {
        collect_locks(git_dir, &mut locks)?;
    }
    locks.sort();
    Ok(locks)
}

fn collect_locks(dir: &Path, locks: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_locks(&path, locks)?;
        } else if file_type.is_file() && path.extension().is_some_and(|ext| ext == "lock") {
            locks.push(path);
        }
    }
    Ok(())
}

/// Remove every lock file under `git_dir`, returning the removed paths.
pub fn break_locks(git_dir: &Path, printer: &Printer) -> io::Result<Vec<PathBuf>> {
    let locks = find_all(git_dir)?;
    for lock in &locks {
        printer.print(format!("breaking lock file: {}", lock.display()));
        log::warn!("removing stale git lock {}", lock.display());
        fs::remove_file(lock)?;
    }
    Ok(locks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detect_finds_nothing_in_clean_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert_eq!(detect(dir.path()), None);
    }

    #[test]
    fn detect_prefers_index_lock() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/a.lock"), "").unwrap();
        fs::write(dir.path().join("index.lock"), "").unwrap();
        assert_eq!(detect(dir.path()), Some(dir.path().join("index.lock")));
    }

    #[test]
    fn detect_finds_nested_ref_locks() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/main.lock"), "").unwrap();
        assert_eq!(
            detect(dir.path()),
            Some(dir.path().join("refs/heads/main.lock"))
        );
    }

    #[test]
    fn missing_git_dir_has_no_locks() {
        let dir = tempdir().unwrap();
        assert!(find_all(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn break_locks_removes_only_lock_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("index"), "index").unwrap();
        fs::write(dir.path().join("index.lock"), "").unwrap();
        fs::write(dir.path().join("refs/heads/main"), "abc").unwrap();
        fs::write(dir.path().join("refs/heads/main.lock"), "").unwrap();
        fs::create_dir_all(dir.path().join("odd.lock")).unwrap();

        let (printer, buffer) = Printer::buffered();
        let removed = break_locks(dir.path(), &printer).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!dir.path().join("index.lock").exists());
        assert!(!dir.path().join("refs/heads/main.lock").exists());
        assert!(dir.path().join("index").exists());
        assert!(dir.path().join("refs/heads/main").exists());
        assert!(dir.path().join("odd.lock").is_dir());
        assert!(buffer.contents().contains("breaking lock file: "));
        assert!(buffer.contents().contains("index.lock"));
    }
}
