//! Single-host mutual exclusion for the queue processor.
//!
//! The lock is a file created with exclusive-create semantics holding a JSON
//! payload `{pid, started_at, timeout_at}`. The timeout is a safety net for
//! crashed holders, not a duration limit on legitimate work: a tick that
//! finds an expired or unreadable lock file removes it and proceeds.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LockError;

/// Default stale-lock timeout for queue ticks.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: DateTime<Utc>,
    timeout_at: DateTime<Utc>,
}

/// File-based process lock with stale-lock recovery.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    timeout: Duration,
    held: bool,
}

impl ProcessLock {
    /// Create a lock handle for `path`. Nothing touches the filesystem
    /// until [`acquire`](Self::acquire).
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            held: false,
        }
    }

    /// Attempt to take the lock.
    ///
    /// Returns [`LockError::Busy`] when a live holder exists. A stale lock
    /// (past its `timeout_at`, or unparseable) is removed first.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        self.cleanup_stale();

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::Busy {
                    path: self.path.clone(),
                });
            }
            Err(e) => {
                return Err(LockError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let now = Utc::now();
        let info = LockInfo {
            pid: std::process::id(),
            started_at: now,
            timeout_at: now
                + chrono::Duration::from_std(self.timeout)
                    .unwrap_or_else(|_| chrono::Duration::minutes(45)),
        };
        let payload = serde_json::to_vec(&info).expect("lock payload serializes");

        let write_result = file.write_all(&payload).and_then(|()| file.sync_all());
        if let Err(e) = write_result {
            // Don't leave a half-written lock behind.
            let _ = std::fs::remove_file(&self.path);
            return Err(LockError::Io {
                path: self.path.clone(),
                source: e,
            });
        }

        self.held = true;
        Ok(())
    }

    /// Release the lock. Idempotent; a missing file is not an error.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
            }
        }
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Remove the lock file when its holder has timed out or its payload
    /// cannot be read. Errors here are swallowed: if the file persists, the
    /// exclusive create below reports busy, which is the safe outcome.
    fn cleanup_stale(&self) {
        if !self.path.exists() {
            return;
        }

        match read_lock_info(&self.path) {
            Ok(info) if Utc::now() > info.timeout_at => {
                tracing::info!(
                    path = %self.path.display(),
                    pid = info.pid,
                    "removing stale lock file (timed out)"
                );
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => {}
            Err(_) => {
                tracing::info!(path = %self.path.display(), "removing corrupt lock file");
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_lock_info(path: &Path) -> Result<LockInfo, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("poets_generation.lock")
    }

    #[test]
    fn acquire_writes_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut lock = ProcessLock::new(lock_path(&dir), DEFAULT_TIMEOUT);

        lock.acquire().expect("acquire");
        assert!(lock.is_held());

        let info = read_lock_info(&lock_path(&dir)).expect("payload parses");
        assert_eq!(info.pid, std::process::id());
        assert!(info.timeout_at > info.started_at);
    }

    #[test]
    fn second_acquirer_observes_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut first = ProcessLock::new(lock_path(&dir), DEFAULT_TIMEOUT);
        let mut second = ProcessLock::new(lock_path(&dir), DEFAULT_TIMEOUT);

        first.acquire().expect("first acquire");
        let err = second.acquire().unwrap_err();
        assert!(matches!(err, LockError::Busy { .. }));
        assert!(!second.is_held());
    }

    #[test]
    fn release_allows_reacquisition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut first = ProcessLock::new(lock_path(&dir), DEFAULT_TIMEOUT);
        let mut second = ProcessLock::new(lock_path(&dir), DEFAULT_TIMEOUT);

        first.acquire().expect("acquire");
        first.release();
        second.acquire().expect("reacquire after release");
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut lock = ProcessLock::new(lock_path(&dir), DEFAULT_TIMEOUT);
        lock.acquire().expect("acquire");
        lock.release();
        lock.release();
        assert!(!lock_path(&dir).exists());
    }

    #[test]
    fn stale_lock_is_recovered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);

        // A holder whose timeout passed an hour ago.
        let expired = LockInfo {
            pid: 12345,
            started_at: Utc::now() - chrono::Duration::hours(2),
            timeout_at: Utc::now() - chrono::Duration::hours(1),
        };
        std::fs::write(&path, serde_json::to_vec(&expired).expect("serialize")).expect("write");

        let mut lock = ProcessLock::new(&path, DEFAULT_TIMEOUT);
        lock.acquire().expect("stale lock recovered");
        assert!(lock.is_held());
    }

    #[test]
    fn corrupt_lock_is_recovered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        std::fs::write(&path, b"not json at all").expect("write");

        let mut lock = ProcessLock::new(&path, DEFAULT_TIMEOUT);
        lock.acquire().expect("corrupt lock recovered");
    }

    #[test]
    fn live_lock_is_not_recovered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);

        let live = LockInfo {
            pid: 12345,
            started_at: Utc::now(),
            timeout_at: Utc::now() + chrono::Duration::minutes(45),
        };
        std::fs::write(&path, serde_json::to_vec(&live).expect("serialize")).expect("write");

        let mut lock = ProcessLock::new(&path, DEFAULT_TIMEOUT);
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, LockError::Busy { .. }));
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        {
            let mut lock = ProcessLock::new(&path, DEFAULT_TIMEOUT);
            lock.acquire().expect("acquire");
        }
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_acquirers_at_most_one_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut lock = ProcessLock::new(path, DEFAULT_TIMEOUT);
                    barrier.wait();
                    let acquired = lock.acquire().is_ok();
                    if acquired {
                        // Hold long enough for every other thread to attempt.
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    // Keep the holder alive until after the sleep; Drop releases.
                    acquired
                })
            })
            .collect();

        let acquired: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().expect("join")))
            .sum();
        assert_eq!(acquired, 1);
    }
}
