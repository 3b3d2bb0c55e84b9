use std::sync::{Arc, Barrier};
use std::thread;

use cardsafe::core::{ErrorKind, RunLock};
use tempfile::tempdir;

#[test]
fn marker_holds_our_pid_and_is_removed_on_drop() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("cardsafe.lock");

    {
        let lock = RunLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    assert!(!path.exists());
    assert!(RunLock::acquire(&path).is_ok());
}

#[test]
fn stale_marker_still_blocks_and_names_its_holder() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("cardsafe.lock");
    std::fs::write(&path, "424242\n").unwrap();

    let err = RunLock::acquire(&path).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyRunning);
    assert!(err.message.contains("424242"));
    assert!(err.message.contains("cardsafe.lock"));

    // A refused acquire must not delete someone else's marker.
    assert!(path.exists());
}

#[test]
fn lock_is_reusable_after_holder_finishes() {
    let temp = tempdir().unwrap();
    let path = Arc::new(temp.path().join("cardsafe.lock"));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut wins = 0;
                for _ in 0..50 {
                    if let Ok(lock) = RunLock::acquire(&path) {
                        wins += 1;
                        lock.release();
                    }
                }
                wins
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(total > 0);
    assert!(!path.exists());
}
