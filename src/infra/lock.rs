//! File-based scheduler leadership.
//!
//! One process per host group holds an exclusive advisory lock on a
//! well-known file and records a [`LockToken`] in it. Leadership only avoids
//! duplicate scheduling work; claims stay atomic without it.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::core::scheduler::LeaderGuard;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// Contents of the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    /// Holder process id.
    pub pid: u32,
    /// Acquisition time in milliseconds since epoch.
    pub acquired_at_ms: i64,
}

impl LockToken {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;
    FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    }
}

fn unlock_or_warn(file: &File) {
    if let Err(e) = FileExt::unlock(file) {
        warn!(error = %e, "unlocking scheduler lock failed");
    }
}

#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> FileIdentity {
    FileIdentity { dev: 0, ino: 0 }
}

struct HeldLock {
    file: File,
    token: LockToken,
    identity: FileIdentity,
}

/// Exclusive scheduler lock backed by `flock`.
pub struct ProcessLock {
    path: PathBuf,
    held: Mutex<Option<HeldLock>>,
}

impl ProcessLock {
    /// Lock at `path`. Nothing is opened until [`ProcessLock::acquire`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: Mutex::new(None),
        }
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to become the scheduler.
    ///
    /// Returns `Ok(false)` when another live process holds the lock. When the
    /// recorded holder is dead (its descriptor leaked into a surviving child,
    /// for example), the file is removed and acquisition retried once on a
    /// fresh inode.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Lock`] on I/O failures other than contention.
    pub fn acquire(&self) -> Result<bool, SchedulerError> {
        let mut held = self.held.lock();
        if held.is_some() {
            return Ok(true);
        }
        if let Some(lock) = self.try_lock()? {
            info!(pid = lock.token.pid, path = %self.path.display(), "scheduler lock acquired");
            *held = Some(lock);
            return Ok(true);
        }

        let Some(holder) = Self::read_token(&self.path) else {
            debug!(path = %self.path.display(), "scheduler lock held, holder not recorded yet");
            return Ok(false);
        };
        if pid_alive(holder.pid) {
            debug!(holder_pid = holder.pid, "scheduler lock held by a live process");
            return Ok(false);
        }

        warn!(
            holder_pid = holder.pid,
            path = %self.path.display(),
            "removing stale scheduler lock (holder is dead)"
        );
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match self.try_lock()? {
            Some(lock) => {
                info!(pid = lock.token.pid, "scheduler lock acquired after stale cleanup");
                *held = Some(lock);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn try_lock(&self) -> Result<Option<HeldLock>, SchedulerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        // The path may have been unlinked between open and lock.
        let ours = identity(&file.metadata()?);
        match std::fs::metadata(&self.path) {
            Ok(meta) if identity(&meta) == ours => {}
            _ => {
                unlock_or_warn(&file);
                return Ok(None);
            }
        }

        let token = LockToken::current();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        serde_json::to_writer(&mut file, &token)?;
        file.flush()?;
        file.sync_all()?;
        Ok(Some(HeldLock {
            file,
            token,
            identity: ours,
        }))
    }

    /// Whether the lock is still ours: the path names the inode we locked and
    /// records our pid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let held = self.held.lock();
        let Some(lock) = held.as_ref() else {
            return false;
        };
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return false;
        };
        identity(&meta) == lock.identity
            && Self::read_token(&self.path).is_some_and(|t| t.pid == lock.token.pid)
    }

    /// Token written by this process, if held.
    #[must_use]
    pub fn token(&self) -> Option<LockToken> {
        self.held.lock().as_ref().map(|l| l.token)
    }

    /// Read whatever token is recorded at `path`.
    #[must_use]
    pub fn read_token(path: &Path) -> Option<LockToken> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Unlock and remove the file if it is still ours. No-op when not held.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Lock`] if removing the file fails.
    pub fn release(&self) -> Result<(), SchedulerError> {
        let Some(lock) = self.held.lock().take() else {
            return Ok(());
        };
        let still_ours = std::fs::metadata(&self.path)
            .map(|meta| identity(&meta) == lock.identity)
            .unwrap_or(false);
        let removed = if still_ours {
            match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };
        unlock_or_warn(&lock.file);
        debug!(path = %self.path.display(), still_ours, "scheduler lock released");
        removed.map_err(SchedulerError::from)
    }
}

impl LeaderGuard for ProcessLock {
    fn is_leader(&self) -> bool {
        self.is_valid()
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "releasing scheduler lock on drop failed");
        }
    }
}

/// Whether `pid` names a live (non-zombie) process.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}
