//! Per-branch exclusive locks.
//!
//! A download or update of `<locale>/<type>` holds `locks/<locale>/<type>.lock`
//! for its whole duration. `flock` locks belong to an open file description,
//! so two handles in the same process exclude each other just like two
//! processes do.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// How long a transfer waits for another one on the same branch.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const FIRST_RETRY: Duration = Duration::from_millis(10);
const MAX_RETRY: Duration = Duration::from_millis(500);

/// Exclusive hold on one branch's working copy, released on drop.
#[derive(Debug)]
pub struct BranchLock {
    file: File,
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

impl BranchLock {
    /// Wait up to `timeout` for the branch, retrying with doubling pauses.
    ///
    /// Fails with `ErrorKind::TimedOut` once the deadline passes. A zero
    /// timeout tries exactly once.
    pub fn acquire_with_timeout(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;

        let start = Instant::now();
        let mut pause = FIRST_RETRY;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        log::debug!("{} still busy after {:?}", lock_path.display(), timeout);
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("{} busy for {:?}", lock_path.display(), timeout),
                        ));
                    }
                    std::thread::sleep(pause.min(timeout - waited));
                    pause = (pause * 2).min(MAX_RETRY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the branch if it is free right now. `None` when someone holds it.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for BranchLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
