use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// How long to wait for another process to finish with a mirror; a first
/// fetch of a large repository can take minutes.
pub const MIRROR_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Exclusive advisory lock on one mirror, released on drop.
#[derive(Debug)]
pub struct MirrorLock {
    file: File,
    path: PathBuf,
}

impl MirrorLock {
    /// Take the lock at `path`, creating the file and its parents.
    ///
    /// Polls with backoff until `timeout`, then fails with
    /// `ErrorKind::TimedOut`. `on_contended` runs once, the first time the
    /// lock is found held.
    pub fn acquire(
        path: &Path,
        timeout: Duration,
        mut on_contended: impl FnMut(),
    ) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        let mut pause = Duration::from_millis(10);
        let mut contended = false;
        while let Err(e) = file.try_lock_exclusive() {
            if e.kind() != io::ErrorKind::WouldBlock {
                return Err(e);
            }
            if !contended {
                contended = true;
                on_contended();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{} still held after {timeout:?}", path.display()),
                ));
            }
            log::debug!("waiting for mirror lock {}", path.display());
            thread::sleep(pause.min(deadline - now));
            pause = (pause * 2).min(MAX_POLL_INTERVAL);
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::debug!("unlocking {} failed: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use tempfile::tempdir;

    fn uncontended() {
        panic!("lock should be free");
    }

    #[test]
    fn acquire_creates_lock_file_and_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks").join("host-repo.lock");

        let lock = MirrorLock::acquire(&path, Duration::ZERO, uncontended).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn held_lock_times_out_and_reports_contention_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.lock");
        let _held = MirrorLock::acquire(&path, Duration::ZERO, uncontended).unwrap();

        let mut reported = 0;
        let err = MirrorLock::acquire(&path, Duration::from_millis(100), || reported += 1)
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(reported, 1);
    }

    #[test]
    fn dropping_releases_the_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.lock");

        drop(MirrorLock::acquire(&path, Duration::ZERO, uncontended).unwrap());
        assert!(MirrorLock::acquire(&path, Duration::ZERO, uncontended).is_ok());
    }

    #[test]
    fn different_mirrors_do_not_contend() {
        let dir = tempdir().unwrap();
        let _a = MirrorLock::acquire(&dir.path().join("a.lock"), Duration::ZERO, uncontended)
            .unwrap();
        assert!(
            MirrorLock::acquire(&dir.path().join("b.lock"), Duration::ZERO, uncontended).is_ok()
        );
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.lock");
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                let lock = MirrorLock::acquire(&path, Duration::ZERO, uncontended).unwrap();
                barrier.wait();
                thread::sleep(Duration::from_millis(50));
                drop(lock);
            });

            barrier.wait();
            let mut waited = false;
            let result = MirrorLock::acquire(&path, Duration::from_secs(5), || waited = true);
            assert!(result.is_ok(), "lock should be acquired after release");
            assert!(waited);
        });
    }
}
