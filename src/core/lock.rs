//! Process-wide run lock.
//!
//! The lock is a marker file created with `O_CREAT | O_EXCL`, so two
//! processes racing for it get exactly one winner. The marker is keyed by
//! the program, not by the source volume: one operator, one card, one run.
//! The file is removed when the [`RunLock`] is dropped, which covers normal
//! completion, `?` propagation and the cancellation path alike.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::models::RunState;

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Create the lock marker, failing with `AlreadyRunning` if it exists.
    pub fn acquire(path: &Path) -> Result<Self, WorkflowError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(WorkflowError::new(
                    ErrorKind::AlreadyRunning,
                    RunState::Start,
                    format!(
                        "another run holds {} (pid {}); remove it if that process is gone",
                        path.display(),
                        holder
                    ),
                ));
            }
            Err(e) => {
                return Err(WorkflowError::new(
                    ErrorKind::AlreadyRunning,
                    RunState::Start,
                    format!(
                        "cannot create lock {} ({:?}): {}; no other run is known to hold it",
                        path.display(),
                        e.kind(),
                        e
                    ),
                ));
            }
        };

        // The pid is informational only; exclusivity comes from create_new.
        let _ = writeln!(file, "{}", std::process::id());

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Run lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove run lock"),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    #[test]
    fn unwritable_location_is_not_reported_as_a_running_instance() {
        let temp = tempdir().unwrap();
        let not_a_dir = temp.path().join("plain-file");
        std::fs::write(&not_a_dir, b"").unwrap();

        let err = RunLock::acquire(&not_a_dir.join("cardsafe.lock")).unwrap_err();
        assert!(err.message.contains("cannot create lock"), "{}", err.message);
        assert!(!err.message.contains("another run holds"));
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cardsafe.lock");

        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyRunning);
        assert!(err.message.contains(&std::process::id().to_string()));

        drop(first);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn release_removes_marker() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested/dir/cardsafe.lock");

        let lock = RunLock::acquire(&path).unwrap();
        assert!(path.exists());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn racing_acquirers_have_one_winner() {
        let temp = tempdir().unwrap();
        let path = Arc::new(temp.path().join("cardsafe.lock"));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Hold the lock past the join so losers cannot retry into it.
                    RunLock::acquire(&path).ok().map(std::mem::ManuallyDrop::new)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }
}
