//! Cross-process crawl lock
//!
//! A crawl may be started by the CLI, by cron or by the web UI, possibly in
//! different processes at the same time. The lock is a small JSON file
//! holding `{pid, trigger, acquired_at}`:
//! - it is published atomically (write a private temp file, then hard-link
//!   it to the lock path, which fails if the path already exists), so two
//!   racing acquirers can never both win and nobody reads a half-written file
//! - a lock whose holder process is gone, or whose content is unreadable,
//!   is stale and gets replaced once
//! - `LockHandle` deletes the file when released or dropped

use crate::state::Trigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;

/// Metadata stored in the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub trigger: Trigger,
    pub acquired_at: DateTime<Utc>,
}

/// Errors that can occur while acquiring or releasing the lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another crawl is running (pid {}, trigger {}, since {})", .0.pid, .0.trigger, .0.acquired_at.to_rfc3339())]
    Held(LockInfo),

    #[error("Lock file {0} is held but unreadable")]
    Contended(PathBuf),

    #[error("Lock file IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode lock metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What we found at the lock path
enum Existing {
    Live(LockInfo),
    Stale(Option<LockInfo>),
    Missing,
}

/// File-backed mutual exclusion between crawl processes
#[derive(Debug, Clone)]
pub struct CrawlLock {
    path: PathBuf,
}

impl CrawlLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the lock for a crawl started by `trigger`
    ///
    /// A stale lock is removed and acquisition retried once. If the holder
    /// is alive, fails with `LockError::Held` carrying its metadata.
    pub fn acquire(&self, trigger: Trigger) -> Result<LockHandle, LockError> {
        let info = LockInfo {
            pid: std::process::id(),
            trigger,
            acquired_at: Utc::now(),
        };

        for attempt in 0..2 {
            if self.try_create(&info)? {
                tracing::debug!("Acquired crawl lock at {}", self.path.display());
                return Ok(LockHandle {
                    path: self.path.clone(),
                    info,
                    released: false,
                });
            }

            match self.inspect() {
                Existing::Live(holder) => return Err(LockError::Held(holder)),
                Existing::Missing => continue,
                Existing::Stale(holder) if attempt == 0 => {
                    match &holder {
                        Some(h) => tracing::warn!(
                            "Removing stale crawl lock left by pid {} ({} since {})",
                            h.pid,
                            h.trigger,
                            h.acquired_at.to_rfc3339()
                        ),
                        None => tracing::warn!(
                            "Removing unreadable crawl lock at {}",
                            self.path.display()
                        ),
                    }
                    self.remove_if_unchanged(&holder)?;
                }
                Existing::Stale(_) => break,
            }
        }

        // Lost the retry race; whoever holds it now wins
        match self.inspect() {
            Existing::Live(holder) => Err(LockError::Held(holder)),
            _ => Err(LockError::Contended(self.path.clone())),
        }
    }

    /// Reads the current holder without taking the lock
    pub fn holder_info(&self) -> Option<LockInfo> {
        read_info(&self.path).ok().flatten()
    }

    /// True if a lock file exists but its holder is gone or it is unreadable
    pub fn is_stale(&self) -> bool {
        matches!(self.inspect(), Existing::Stale(_))
    }

    /// Releases a handle obtained from `acquire`
    pub fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        handle.release()
    }

    /// Publishes `info` at the lock path; false if the path already exists
    fn try_create(&self, info: &LockInfo) -> Result<bool, LockError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(&self.path, info.pid);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec(info)?)?;
            file.sync_all()?;
        }

        let linked = fs::hard_link(&tmp, &self.path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn inspect(&self) -> Existing {
        match read_info(&self.path) {
            Ok(None) => Existing::Missing,
            Ok(Some(info)) if is_process_alive(info.pid) => Existing::Live(info),
            Ok(Some(info)) => Existing::Stale(Some(info)),
            Err(_) => Existing::Stale(None),
        }
    }

    /// Removes the lock file only if it still holds what we judged stale
    fn remove_if_unchanged(&self, judged: &Option<LockInfo>) -> Result<(), LockError> {
        let current = read_info(&self.path).ok().flatten();
        if current.is_some() && current != *judged {
            return Ok(());
        }

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Proof of lock ownership; the lock file is removed on release or drop
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl LockHandle {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the lock file if it is still ours
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.remove_own()
    }

    fn remove_own(&self) -> Result<(), LockError> {
        match read_info(&self.path) {
            Ok(Some(current)) if current != self.info => {
                tracing::warn!(
                    "Crawl lock at {} was taken over by pid {}, leaving it",
                    self.path.display(),
                    current.pid
                );
                return Ok(());
            }
            Ok(None) => return Ok(()),
            _ => {}
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Released crawl lock at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.remove_own() {
                tracing::error!("Failed to release crawl lock: {}", e);
            }
        }
    }
}

/// Private staging file next to the lock, unique per acquisition attempt
fn temp_path(path: &Path, pid: u32) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);

    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{}.tmp", pid, n));
    PathBuf::from(name)
}

/// Reads lock metadata; `Ok(None)` when there is no lock file
fn read_info(path: &Path) -> Result<Option<LockInfo>, LockError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Far above any real pid_max, so never alive
    const DEAD_PID: u32 = u32::MAX - 7;

    fn lock_in(dir: &TempDir) -> CrawlLock {
        CrawlLock::new(dir.path().join("crawl.lock"))
    }

    fn write_lock(lock: &CrawlLock, info: &LockInfo) {
        fs::write(lock.path(), serde_json::to_vec(info).unwrap()).unwrap();
    }

    #[test]
    fn test_acquire_writes_metadata() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let handle = lock.acquire(Trigger::Cli).unwrap();
        let holder = lock.holder_info().unwrap();

        assert_eq!(holder.pid, std::process::id());
        assert_eq!(holder.trigger, Trigger::Cli);
        assert_eq!(&holder, handle.info());
    }

    #[test]
    fn test_second_acquire_conflicts() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let _handle = lock.acquire(Trigger::Manual).unwrap();
        match lock.acquire(Trigger::Cron) {
            Err(LockError::Held(holder)) => {
                assert_eq!(holder.pid, std::process::id());
                assert_eq!(holder.trigger, Trigger::Manual);
            }
            other => panic!("expected Held, got {:?}", other),
        }
    }

    #[test]
    fn test_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let handle = lock.acquire(Trigger::Cli).unwrap();
        lock.release(handle).unwrap();

        assert!(!lock.path().exists());
        assert!(lock.holder_info().is_none());
        assert!(lock.acquire(Trigger::Cli).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        {
            let _handle = lock.acquire(Trigger::Cli).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        write_lock(
            &lock,
            &LockInfo {
                pid: DEAD_PID,
                trigger: Trigger::Cron,
                acquired_at: Utc::now(),
            },
        );
        assert!(lock.is_stale());

        let handle = lock.acquire(Trigger::Cli).unwrap();
        assert_eq!(handle.info().pid, std::process::id());
        assert_eq!(lock.holder_info().unwrap().trigger, Trigger::Cli);
    }

    #[test]
    fn test_unparsable_lock_is_stale() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), b"not json at all").unwrap();

        assert!(lock.is_stale());
        assert!(lock.holder_info().is_none());
        assert!(lock.acquire(Trigger::Manual).is_ok());
    }

    #[test]
    fn test_handle_leaves_foreign_lock_alone() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let handle = lock.acquire(Trigger::Cli).unwrap();
        let foreign = LockInfo {
            pid: DEAD_PID,
            trigger: Trigger::Cron,
            acquired_at: Utc::now(),
        };
        write_lock(&lock, &foreign);

        handle.release().unwrap();
        assert_eq!(lock.holder_info(), Some(foreign));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let lock = CrawlLock::new(dir.path().join("run").join("crawl.lock"));
        assert!(lock.acquire(Trigger::Cli).is_ok());
    }

    #[test]
    fn test_racing_acquirers_single_winner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crawl.lock");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let lock = CrawlLock::new(path.clone());
                std::thread::spawn(move || lock.acquire(Trigger::Cli).map(std::mem::forget))
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(winners, 1);
    }
}
